use nalgebra::DMatrix;
use rand::SeedableRng;
use rand_distr::{Distribution, Poisson, Uniform};

/// Cells on an `nx x ny` grid with two gene programs: program 1 genes
/// peak at successive positions along x, program 2 genes along y.
#[derive(Debug, Clone)]
pub struct SimArgs {
    pub nx: usize,
    pub ny: usize,
    pub genes_per_program: usize,
    /// Poisson rate at a gene's peak
    pub peak_rate: f32,
    /// width of each gene's bump, in grid units
    pub width: f32,
    pub background: f32,
    /// uniform jitter of cell positions
    pub jitter: f32,
    pub seed: u64,
}

impl Default for SimArgs {
    fn default() -> Self {
        Self {
            nx: 10,
            ny: 10,
            genes_per_program: 20,
            peak_rate: 10.0,
            width: 1.5,
            background: 0.05,
            jitter: 0.1,
            seed: 42,
        }
    }
}

pub struct SimData {
    /// cells x 2 positions
    pub embedding: DMatrix<f32>,
    /// genes x cells counts
    pub expression: DMatrix<f32>,
    pub cell_names: Vec<Box<str>>,
    pub gene_names: Vec<Box<str>>,
    /// program (0 or 1) of each gene
    pub program: Vec<usize>,
    /// peak position of each gene along its program's axis
    pub peak: Vec<f32>,
}

/// Generate a simulated dataset
///
/// ```text
/// Y(g,c) ~ Poisson( background + peak_rate * exp(-(z(c) - m(g))^2 / (2 width^2)) )
/// ```
/// where `z(c)` is the cell's coordinate on the axis of gene `g`'s program.
pub fn simulate(args: &SimArgs) -> anyhow::Result<SimData> {
    if args.nx < 2 || args.ny < 2 || args.genes_per_program < 1 {
        return Err(anyhow::anyhow!(
            "need a grid of at least 2 x 2 and one gene per program"
        ));
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(args.seed);
    let ncells = args.nx * args.ny;
    let ngenes = 2 * args.genes_per_program;

    // 1. cell positions
    let runif = Uniform::new_inclusive(-args.jitter, args.jitter)?;
    let mut embedding = DMatrix::<f32>::zeros(ncells, 2);
    for c in 0..ncells {
        embedding[(c, 0)] = (c % args.nx) as f32 + runif.sample(&mut rng);
        embedding[(c, 1)] = (c / args.nx) as f32 + runif.sample(&mut rng);
    }

    // 2. gene peaks, evenly spaced along each axis
    let mut program = Vec::with_capacity(ngenes);
    let mut peak = Vec::with_capacity(ngenes);
    for (p, len) in [args.nx, args.ny].into_iter().enumerate() {
        let span = (len - 1) as f32;
        let denom = (args.genes_per_program.max(2) - 1) as f32;
        for i in 0..args.genes_per_program {
            program.push(p);
            peak.push(span * i as f32 / denom);
        }
    }

    // 3. counts
    let mut expression = DMatrix::<f32>::zeros(ngenes, ncells);
    for g in 0..ngenes {
        for c in 0..ncells {
            let z = embedding[(c, program[g])];
            let dz = z - peak[g];
            let rate =
                args.background + args.peak_rate * (-dz * dz / (2.0 * args.width * args.width)).exp();
            let rpois = Poisson::new(rate)?;
            expression[(g, c)] = rpois.sample(&mut rng);
        }
    }

    let cell_names = (0..ncells)
        .map(|c| format!("cell_{}", c).into_boxed_str())
        .collect();
    let gene_names = (0..ngenes)
        .map(|g| format!("P{}_gene_{}", program[g] + 1, g % args.genes_per_program).into_boxed_str())
        .collect();

    Ok(SimData {
        embedding,
        expression,
        cell_names,
        gene_names,
        program,
        peak,
    })
}
