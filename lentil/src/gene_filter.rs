use crate::error::{Result, Stage, TrajError};

use log::info;
use nalgebra::DMatrix;

/// Keep genes detected in a moderate fraction of cells
#[derive(Debug, Clone)]
pub struct GeneFilterArgs {
    pub min_frac: f32,
    pub max_frac: f32,
}

impl Default for GeneFilterArgs {
    fn default() -> Self {
        Self {
            min_frac: 0.01,
            max_frac: 0.5,
        }
    }
}

/// Fraction of cells (columns) with non-zero expression, per gene (row)
pub fn detection_fraction(expression: &DMatrix<f32>) -> Vec<f32> {
    let ncells = expression.ncols().max(1) as f32;
    expression
        .row_iter()
        .map(|row| row.iter().filter(|&&x| x > 0.0).count() as f32 / ncells)
        .collect()
}

/// Indices of genes whose detection fraction lies in `[min_frac, max_frac]`
pub fn filter_genes(expression: &DMatrix<f32>, args: &GeneFilterArgs) -> Result<Vec<usize>> {
    if !(0.0..=1.0).contains(&args.min_frac)
        || !(0.0..=1.0).contains(&args.max_frac)
        || args.min_frac > args.max_frac
    {
        return Err(TrajError::parameter(
            Stage::Pipeline,
            "min_frac..max_frac",
            format!("{}..{}", args.min_frac, args.max_frac),
            "need 0 <= min_frac <= max_frac <= 1",
        ));
    }

    let kept: Vec<usize> = detection_fraction(expression)
        .into_iter()
        .enumerate()
        .filter(|&(_, f)| f > 0.0 && f >= args.min_frac && f <= args.max_frac)
        .map(|(g, _)| g)
        .collect();

    info!(
        "kept {} of {} genes detected in {}..{} of cells",
        kept.len(),
        expression.nrows(),
        args.min_frac,
        args.max_frac
    );

    Ok(kept)
}
