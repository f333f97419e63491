use approx::assert_abs_diff_eq;
use matrix_util::knn_graph::{KnnGraph, KnnGraphArgs};
use matrix_util::knn_match::*;
use nalgebra::DMatrix;

#[test]
fn search_others_excludes_query() -> anyhow::Result<()> {
    let data = DMatrix::<f32>::from_row_slice(1, 5, &[0.0, 1.0, 3.0, 6.0, 10.0]);
    let views: Vec<_> = data.column_iter().collect();
    let names: Vec<usize> = (0..5).collect();
    let dict = ColumnDict::<usize>::from_dvector_views(views, names);

    assert_eq!(dict.len(), 5);

    let (nn, dd) = dict.search_others(&2, 2)?;
    assert_eq!(nn.len(), 2);
    assert!(!nn.contains(&2));
    assert_eq!(nn[0], 1);
    assert_abs_diff_eq!(dd[0], 2.0);

    assert!(dict.search_others(&99, 2).is_err());
    Ok(())
}

#[test]
fn exact_graph_on_rows() -> anyhow::Result<()> {
    // two points per corner of a unit square, far apart
    let xx = DMatrix::<f32>::from_row_slice(
        4,
        2,
        &[0.0, 0.0, 0.0, 1.0, 5.0, 5.0, 5.0, 6.0],
    );
    let args = KnnGraphArgs {
        knn: 1,
        ..Default::default()
    };
    let graph = KnnGraph::from_rows(&xx, args)?;
    assert_eq!(graph.num_nodes(), 4);
    assert_eq!(graph.num_edges(), 2);

    let (membership, ncomp) = graph.connected_components();
    assert_eq!(ncomp, 2);
    assert_eq!(membership[0], membership[1]);
    assert_ne!(membership[0], membership[2]);
    Ok(())
}
