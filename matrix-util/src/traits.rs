use crate::common_io::Delimiter;

/// A matrix together with its row and column names
pub struct MatWithNames<M> {
    pub rows: Vec<Box<str>>,
    pub cols: Vec<Box<str>>,
    pub mat: M,
}

/// Row-wise and pairwise operations used by the kernel builders
pub trait MatOps {
    type Mat;
    type Scalar;

    /// Divide each row by its sum; rows summing to zero are left
    /// untouched. Returns the indices of such rows.
    fn normalize_rows_l1_inplace(&mut self) -> Vec<usize>;

    /// `n x n` matrix of Euclidean distances between rows
    fn pairwise_row_distances(&self) -> Self::Mat;

    /// Largest absolute asymmetry `max |a_ij - a_ji|` of a square matrix
    fn max_asymmetry(&self) -> Self::Scalar;
}

/// Read and write matrices from and to files
pub trait IoOps {
    type Scalar;
    type Mat;

    /// Read a matrix whose first line holds column names and whose
    /// first column holds row names. `NA`/`nan` cells become NaN.
    fn read_named_delim(
        file: &str,
        delim: impl Into<Delimiter>,
    ) -> anyhow::Result<MatWithNames<Self::Mat>>;

    /// Write with a header line and row names. Non-finite
    /// values are written as `NA` unless they are infinite.
    fn write_named_delim(
        &self,
        file: &str,
        delim: &str,
        row_names: &[Box<str>],
        column_names: &[Box<str>],
    ) -> anyhow::Result<()>;
}
