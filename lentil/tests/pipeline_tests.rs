use approx::assert_abs_diff_eq;
use lentil::cancel::CancelToken;
use lentil::coarse_grain::{coarse_grain, CoarseGrainArgs};
use lentil::diffusion_map::{diffusion_map, DiffusionArgs};
use lentil::dist_matrix::DistMatrix;
use lentil::gene_distance::{gene_distances, sparsified_gene_pairs, GenePairs, TransportArgs};
use lentil::graph_distance::{graph_distance, GraphDistanceArgs};
use lentil::pipeline::{run_pipeline, PipelineArgs, RefineArgs};
use lentil::simulate::{simulate, SimArgs};
use lentil::trajectory::{extract_trajectories, ExtractArgs, GeneLabel};
use nalgebra::DMatrix;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};
use std::collections::HashSet;

fn small_sim() -> anyhow::Result<lentil::simulate::SimData> {
    simulate(&SimArgs {
        nx: 6,
        ny: 5,
        genes_per_program: 6,
        ..Default::default()
    })
}

fn random_points(n: usize, d: usize, seed: u64) -> anyhow::Result<DMatrix<f32>> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let runif = Uniform::new(0_f32, 1_f32)?;
    Ok(DMatrix::from_fn(n, d, |_, _| runif.sample(&mut rng)))
}

#[test]
fn line_of_cells_gives_path_length() -> anyhow::Result<()> {
    let emb = DMatrix::from_column_slice(4, 1, &[0.0, 1.0, 2.0, 3.0]);
    let gd = graph_distance(
        &emb,
        &GraphDistanceArgs {
            knn: 2,
            ..Default::default()
        },
        &CancelToken::new(),
    )?;
    assert!(gd.is_connected());
    assert_abs_diff_eq!(gd.dist[(0, 3)], 3.0, epsilon = 1e-5);
    assert_abs_diff_eq!(gd.dist[(3, 0)], 3.0, epsilon = 1e-5);
    assert_abs_diff_eq!(gd.dist[(1, 2)], 1.0, epsilon = 1e-5);
    Ok(())
}

#[test]
fn graph_distance_is_a_metric() -> anyhow::Result<()> {
    let emb = random_points(40, 3, 7)?;
    let mut gd = graph_distance(
        &emb,
        &GraphDistanceArgs {
            knn: 5,
            max_components: 40,
            ..Default::default()
        },
        &CancelToken::new(),
    )?;
    gd.cap_unreachable(2.0);

    let d = &gd.dist;
    let n = d.nrows();
    for i in 0..n {
        assert_eq!(d[(i, i)], 0.0);
        for j in 0..n {
            assert_eq!(d[(i, j)], d[(j, i)]);
            assert!(d[(i, j)].is_finite());
            for k in 0..n {
                assert!(d[(i, k)] <= d[(i, j)] + d[(j, k)] + 1e-4);
            }
        }
    }
    Ok(())
}

#[test]
fn identical_genes_on_geodesic_cost() -> anyhow::Result<()> {
    let emb = DMatrix::from_column_slice(4, 1, &[0.0, 1.0, 2.0, 3.0]);
    let cost = graph_distance(
        &emb,
        &GraphDistanceArgs {
            knn: 2,
            ..Default::default()
        },
        &CancelToken::new(),
    )?
    .dist;

    // gene 1 is gene 0 scaled, gene 2 sits at the other end
    let expr = DMatrix::from_row_slice(
        3,
        4,
        &[2.0, 1.0, 0.0, 0.0, 4.0, 2.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0],
    );
    let gd = gene_distances(
        &cost,
        &expr,
        &GenePairs::All,
        &TransportArgs::default(),
        &CancelToken::new(),
    )?;
    assert_abs_diff_eq!(gd.dist.get(0, 1).unwrap_or(f32::NAN), 0.0, epsilon = 1e-6);
    assert!(gd.dist.get(0, 2).unwrap_or(0.0) > 1.0);
    assert!(gd.unconverged.is_empty());
    Ok(())
}

#[test]
fn unit_cost_gives_half_total_variation() -> anyhow::Result<()> {
    let n = 6;
    let cost = DMatrix::from_fn(n, n, |i, j| if i == j { 0.0 } else { 1.0 });
    let expr = random_points(5, n, 11)?.map(|x| x + 0.01);

    let gd = gene_distances(
        &cost,
        &expr,
        &GenePairs::All,
        &TransportArgs::default(),
        &CancelToken::new(),
    )?;

    for i in 0..expr.nrows() {
        for j in (i + 1)..expr.nrows() {
            let ri = expr.row(i) / expr.row(i).sum();
            let rj = expr.row(j) / expr.row(j).sum();
            let tv = 0.5 * (ri - rj).abs().sum();
            assert_abs_diff_eq!(gd.dist.get(i, j).unwrap_or(f32::NAN), tv, epsilon = 1e-4);
        }
    }
    Ok(())
}

#[test]
fn coarse_pass_restricts_refined_pairs() -> anyhow::Result<()> {
    let sim = simulate(&SimArgs {
        nx: 10,
        ny: 10,
        genes_per_program: 5,
        ..Default::default()
    })?;
    let cancel = CancelToken::new();

    let mut cell = graph_distance(
        &sim.embedding,
        &GraphDistanceArgs {
            knn: 5,
            max_components: 100,
            ..Default::default()
        },
        &cancel,
    )?;
    cell.cap_unreachable(2.0);

    let cg = coarse_grain(
        &sim.embedding,
        &cell.dist,
        &sim.expression,
        &CoarseGrainArgs {
            num_meta_cells: 10,
            ..Default::default()
        },
    )?;
    assert_eq!(cg.sizes.len(), 10);
    assert_eq!(cg.sizes.iter().sum::<usize>(), 100);
    assert_eq!(cg.expression.ncols(), 10);

    let coarse = gene_distances(
        &cg.dist,
        &cg.expression,
        &GenePairs::All,
        &TransportArgs::default(),
        &cancel,
    )?;
    assert!(coarse.dist.is_complete());

    let pairs = sparsified_gene_pairs(&coarse.dist, 1, 2)?;
    let ngenes = sim.expression.nrows();
    assert!(!pairs.is_empty());
    assert!(pairs.len() < ngenes * (ngenes - 1) / 2);

    let fine = gene_distances(
        &cell.dist,
        &sim.expression,
        &GenePairs::Restricted(pairs.clone()),
        &TransportArgs::default(),
        &cancel,
    )?;
    assert_eq!(fine.num_pairs, pairs.len());

    let selected: HashSet<(usize, usize)> = pairs.into_iter().collect();
    for i in 0..ngenes {
        for j in (i + 1)..ngenes {
            let d = fine.dist.get(i, j);
            if selected.contains(&(i, j)) {
                assert!(d.is_some_and(|x| x >= 0.0));
                assert_eq!(d, fine.dist.get(j, i));
            } else {
                assert_eq!(d, None);
            }
        }
    }
    Ok(())
}

#[test]
fn diffusion_map_is_ordered_and_repeatable() -> anyhow::Result<()> {
    let emb = random_points(25, 2, 3)?;
    let dist = DistMatrix::Dense(DMatrix::from_fn(25, 25, |i, j| {
        (emb.row(i) - emb.row(j)).norm()
    }));
    let args = DiffusionArgs {
        knn: 5,
        n_components: 6,
        ..Default::default()
    };

    let a = diffusion_map(&dist, &args)?;
    let b = diffusion_map(&dist, &args)?;
    assert_eq!(a.coords, b.coords);
    assert_eq!(a.eigenvalues, b.eigenvalues);

    assert_eq!(a.coords.shape(), (25, 6));
    for k in 1..a.eigenvalues.len() {
        assert!(a.eigenvalues[k - 1].abs() > a.eigenvalues[k].abs());
    }
    assert!(a.eigenvalues.iter().all(|x| x.abs() < 1.0 + 1e-4));
    Ok(())
}

#[test]
fn single_trajectory_without_walk_is_the_terminus() -> anyhow::Result<()> {
    let sim = small_sim()?;
    let cancel = CancelToken::new();
    let cost = graph_distance(
        &sim.embedding,
        &GraphDistanceArgs {
            knn: 5,
            max_components: 30,
            ..Default::default()
        },
        &cancel,
    )
    .map(|mut g| {
        g.cap_unreachable(2.0);
        g.dist
    })?;

    let gd = gene_distances(
        &cost,
        &sim.expression,
        &GenePairs::All,
        &TransportArgs::default(),
        &cancel,
    )?;
    let dm = diffusion_map(
        &gd.dist,
        &DiffusionArgs {
            knn: 4,
            n_components: 4,
            ..Default::default()
        },
    )?;

    let res = extract_trajectories(
        &dm.coords,
        &gd.dist,
        &ExtractArgs {
            num_trajectories: 1,
            t_list: vec![0],
            knn: 3,
            dims: 3,
            ..Default::default()
        },
    )?;

    assert_eq!(res.trajectories.len(), 1);
    let terminus = res.trajectories[0].terminus;
    assert_eq!(res.trajectories[0].genes, vec![terminus]);

    let norm = |g: usize| (0..3).map(|k| dm.coords[(g, k)].powi(2)).sum::<f32>();
    for g in 0..dm.coords.nrows() {
        assert!(norm(g) <= norm(terminus));
        let expected = if g == terminus {
            GeneLabel::Trajectory(0)
        } else {
            GeneLabel::Unselected
        };
        assert_eq!(res.labels[g], expected);
    }
    Ok(())
}

#[test]
fn full_pipeline_on_simulated_grid() -> anyhow::Result<()> {
    let sim = small_sim()?;
    let ngenes = sim.expression.nrows();

    let args = PipelineArgs {
        graph: GraphDistanceArgs {
            knn: 5,
            max_components: 30,
            ..Default::default()
        },
        cap_unreachable: Some(2.0),
        diffusion: DiffusionArgs {
            knn: 4,
            n_components: 4,
            ..Default::default()
        },
        extract: ExtractArgs {
            num_trajectories: 2,
            t_list: vec![3, 3],
            knn: 3,
            dims: 3,
            ..Default::default()
        },
        ..Default::default()
    };

    let out = run_pipeline(&sim.embedding, &sim.expression, &args, &CancelToken::new())?;

    assert!(out.cell_dist.dist.iter().all(|x| x.is_finite()));
    assert!(out.gene_dist.dist.is_complete());
    assert_eq!(out.gene_dist.dist.max_asymmetry(), 0.0);
    assert_eq!(out.gene_embedding.coords.shape(), (ngenes, 4));
    assert_eq!(out.trajectories.num_genes(), ngenes);
    assert!(!out.trajectories.trajectories.is_empty());

    // every gene belongs to at most one trajectory and its label says which
    let mut seen = vec![None; ngenes];
    for (t, traj) in out.trajectories.trajectories.iter().enumerate() {
        assert_eq!(traj.genes[0], traj.terminus);
        assert_eq!(traj.genes.len(), traj.pseudo_order.len());
        assert!(traj.pseudo_order.windows(2).all(|w| w[0] <= w[1]));
        for &g in &traj.genes {
            assert!(seen[g].is_none());
            seen[g] = Some(t);
        }
    }
    for (g, label) in out.trajectories.labels.iter().enumerate() {
        match seen[g] {
            Some(t) => assert_eq!(*label, GeneLabel::Trajectory(t)),
            None => assert_eq!(*label, GeneLabel::Unselected),
        }
    }

    let lines = out.trajectories.to_lines(&sim.gene_names, "\t")?;
    assert_eq!(lines.len(), ngenes + 1);
    assert!(lines[0].starts_with("gene\tselected\tpseudoorder_1"));
    Ok(())
}

#[test]
fn pipeline_with_meta_cells_and_refinement() -> anyhow::Result<()> {
    let sim = small_sim()?;
    let ngenes = sim.expression.nrows();

    let args = PipelineArgs {
        graph: GraphDistanceArgs {
            knn: 5,
            max_components: 30,
            ..Default::default()
        },
        cap_unreachable: Some(2.0),
        coarse: Some(CoarseGrainArgs {
            num_meta_cells: 8,
            ..Default::default()
        }),
        refine: Some(RefineArgs { knn: 3, alpha: 2 }),
        diffusion: DiffusionArgs {
            knn: 3,
            n_components: 3,
            ..Default::default()
        },
        extract: ExtractArgs {
            num_trajectories: 1,
            t_list: vec![2],
            knn: 3,
            dims: 2,
            ..Default::default()
        },
        ..Default::default()
    };

    let out = run_pipeline(&sim.embedding, &sim.expression, &args, &CancelToken::new())?;

    let cg = out.coarse.as_ref().map(|c| c.sizes.len());
    assert_eq!(cg, Some(8));
    let coarse_gd = out
        .coarse_gene_dist
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("missing coarse gene distances"))?;
    assert!(coarse_gd.dist.is_complete());
    assert!(out.gene_dist.num_pairs <= ngenes * (ngenes - 1) / 2);
    assert_eq!(out.trajectories.num_genes(), ngenes);
    Ok(())
}

#[test]
fn pipeline_reruns_are_identical() -> anyhow::Result<()> {
    let sim = small_sim()?;
    let args = PipelineArgs {
        graph: GraphDistanceArgs {
            knn: 5,
            max_components: 30,
            ..Default::default()
        },
        cap_unreachable: Some(2.0),
        coarse: Some(CoarseGrainArgs {
            num_meta_cells: 8,
            seed: 11,
            ..Default::default()
        }),
        diffusion: DiffusionArgs {
            knn: 3,
            n_components: 3,
            ..Default::default()
        },
        extract: ExtractArgs {
            num_trajectories: 2,
            t_list: vec![2, 3],
            knn: 3,
            dims: 2,
            ..Default::default()
        },
        ..Default::default()
    };

    let a = run_pipeline(&sim.embedding, &sim.expression, &args, &CancelToken::new())?;
    let b = run_pipeline(&sim.embedding, &sim.expression, &args, &CancelToken::new())?;

    let membership = |out: &lentil::pipeline::PipelineOutput| {
        out.coarse.as_ref().map(|c| c.membership.clone())
    };
    assert!(membership(&a).is_some());
    assert_eq!(membership(&a), membership(&b));
    assert_eq!(a.gene_embedding.coords, b.gene_embedding.coords);
    assert_eq!(a.trajectories.labels, b.trajectories.labels);
    assert_eq!(a.trajectories.trajectories, b.trajectories.trajectories);
    Ok(())
}

#[test]
fn unconverged_pairs_keep_their_estimates() -> anyhow::Result<()> {
    let cost = DMatrix::from_fn(6, 6, |i, j| (i as f32 - j as f32).abs());
    let expr = DMatrix::from_row_slice(
        4,
        6,
        &[
            4.0, 3.0, 2.0, 1.0, 0.5, 0.5, //
            0.5, 1.0, 2.0, 3.0, 2.0, 1.0, //
            1.0, 1.0, 1.0, 1.0, 1.0, 1.0, //
            0.5, 0.5, 1.0, 2.0, 3.0, 4.0,
        ],
    );
    let args = TransportArgs {
        max_iter: 1,
        ..TransportArgs::sinkhorn()
    };
    let gd = gene_distances(&cost, &expr, &GenePairs::All, &args, &CancelToken::new())?;

    let all_pairs: Vec<(usize, usize)> = (0..4)
        .flat_map(|i| ((i + 1)..4).map(move |j| (i, j)))
        .collect();
    assert_eq!(gd.unconverged, all_pairs);
    assert_eq!(gd.num_pairs, 6);
    assert!(gd.dist.is_complete());
    for &(i, j) in &all_pairs {
        let d = gd
            .dist
            .get(i, j)
            .ok_or_else(|| anyhow::anyhow!("missing ({}, {})", i, j))?;
        assert!(d.is_finite() && d >= 0.0);
        assert_eq!(gd.dist.get(j, i), Some(d));
    }

    // the same pairs converge with enough iterations
    let args = TransportArgs {
        epsilon: 0.2,
        max_iter: 10_000,
        ..TransportArgs::sinkhorn()
    };
    let converged = gene_distances(&cost, &expr, &GenePairs::All, &args, &CancelToken::new())?;
    assert!(converged.unconverged.is_empty());
    Ok(())
}

#[test]
fn refinement_without_meta_cells_is_rejected() -> anyhow::Result<()> {
    let sim = small_sim()?;
    let args = PipelineArgs {
        refine: Some(RefineArgs { knn: 2, alpha: 2 }),
        ..Default::default()
    };
    let res = run_pipeline(&sim.embedding, &sim.expression, &args, &CancelToken::new());
    assert!(matches!(res, Err(lentil::TrajError::Parameter { .. })));
    Ok(())
}

#[test]
fn cancelled_pipeline_stops() -> anyhow::Result<()> {
    let sim = small_sim()?;
    let cancel = CancelToken::new();
    cancel.cancel();
    let res = run_pipeline(&sim.embedding, &sim.expression, &PipelineArgs::default(), &cancel);
    assert!(matches!(res, Err(lentil::TrajError::Cancelled { .. })));
    Ok(())
}
