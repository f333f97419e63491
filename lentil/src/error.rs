//! Error taxonomy shared by every stage of the pipeline.

use std::fmt;
use thiserror::Error;

/// Pipeline stage that raised an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    GraphDistance,
    CoarseGrain,
    Transport,
    Diffusion,
    Trajectory,
    Pipeline,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::GraphDistance => "graph-distance",
            Stage::CoarseGrain => "coarse-grain",
            Stage::Transport => "transport",
            Stage::Diffusion => "diffusion-map",
            Stage::Trajectory => "trajectory",
            Stage::Pipeline => "pipeline",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Error)]
pub enum TrajError {
    /// kNN graph broke into more components than tolerated
    #[error(
        "[{stage}] kNN graph has {components} connected components \
         (at most {max_components} allowed); {unreachable_pairs} pairs are unreachable"
    )]
    Connectivity {
        stage: Stage,
        components: usize,
        max_components: usize,
        unreachable_pairs: usize,
    },

    #[error(
        "[{stage}] cannot make {requested} clusters out of {num_points} points: \
         need 1 <= clusters < points"
    )]
    InvalidClusterCount {
        stage: Stage,
        requested: usize,
        num_points: usize,
    },

    #[error(
        "[{stage}] only {found} of {requested} non-trivial eigenvalues \
         have magnitude above {min_eigenvalue:e}"
    )]
    DegenerateSpectrum {
        stage: Stage,
        requested: usize,
        found: usize,
        min_eigenvalue: f64,
    },

    /// A gene's expression row cannot be turned into a probability vector
    #[error("[{stage}] expression row {index} is not a distribution: {reason}")]
    InvalidDistribution {
        stage: Stage,
        index: usize,
        reason: String,
    },

    #[error("[{stage}] invalid `{name}` = {value}: {constraint}")]
    Parameter {
        stage: Stage,
        name: &'static str,
        value: String,
        constraint: String,
    },

    #[error("[{stage}] cancelled")]
    Cancelled { stage: Stage },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TrajError>;

impl TrajError {
    pub fn parameter(
        stage: Stage,
        name: &'static str,
        value: impl fmt::Display,
        constraint: impl Into<String>,
    ) -> Self {
        TrajError::Parameter {
            stage,
            name,
            value: value.to_string(),
            constraint: constraint.into(),
        }
    }

    /// The stage that raised this error, if known
    pub fn stage(&self) -> Option<Stage> {
        match self {
            TrajError::Connectivity { stage, .. }
            | TrajError::InvalidClusterCount { stage, .. }
            | TrajError::DegenerateSpectrum { stage, .. }
            | TrajError::InvalidDistribution { stage, .. }
            | TrajError::Parameter { stage, .. }
            | TrajError::Cancelled { stage } => Some(*stage),
            TrajError::Other(_) => None,
        }
    }
}
