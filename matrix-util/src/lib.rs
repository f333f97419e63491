pub mod clustering;
pub mod common_io;
pub mod dmatrix_io;
pub mod dmatrix_util;
pub mod knn_graph;
pub mod knn_match;
pub mod traits;
pub mod utils;
