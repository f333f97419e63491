//! Gene trajectory inference from single-cell expression.
//!
//! Cells are connected by a kNN graph whose geodesic distances serve as
//! the ground cost of optimal transport between gene expression
//! distributions. The resulting gene-gene distances are embedded with a
//! diffusion map, and trajectories are peeled off one at a time by
//! random walks from extreme genes.

pub mod cancel;
pub mod coarse_grain;
pub mod diffusion_map;
pub mod dist_matrix;
pub mod error;
pub mod gene_distance;
pub mod gene_filter;
pub mod graph_distance;
pub mod ot_solver;
pub mod pipeline;
pub mod simulate;
pub mod trajectory;

pub use error::{Result, Stage, TrajError};
