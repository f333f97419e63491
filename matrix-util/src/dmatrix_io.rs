use crate::common_io::{read_lines_of_words_delim, write_lines, Delimiter};
use crate::traits::*;
pub use nalgebra::{DMatrix, DVector};
use num_traits::Float;
use rayon::prelude::*;

use std::fmt::{Debug, Display};
use std::str::FromStr;

fn parse_cell<T>(word: &str) -> anyhow::Result<T>
where
    T: Float + FromStr,
    <T as FromStr>::Err: Debug,
{
    if word.eq_ignore_ascii_case("na") || word.eq_ignore_ascii_case("nan") || word.is_empty() {
        return Ok(T::nan());
    }
    word.parse::<T>()
        .map_err(|e| anyhow::anyhow!("failed to parse '{}': {:?}", word, e))
}

impl<T> IoOps for DMatrix<T>
where
    T: Float + nalgebra::Scalar + Send + Sync + FromStr + Display + Copy,
    <T as FromStr>::Err: Debug,
{
    type Scalar = T;
    type Mat = Self;

    fn read_named_delim(
        file: &str,
        delim: impl Into<Delimiter>,
    ) -> anyhow::Result<MatWithNames<Self::Mat>> {
        let out = read_lines_of_words_delim(file, delim, Some(0))?;

        if out.lines.is_empty() {
            return Err(anyhow::anyhow!("No data in file {}", file));
        }

        let ncols = out.lines[0].len().saturating_sub(1);

        // the header may or may not carry a name for the row-name column
        let cols: Vec<Box<str>> = if out.header.len() == ncols + 1 {
            out.header[1..].to_vec()
        } else if out.header.len() == ncols {
            out.header.clone()
        } else {
            return Err(anyhow::anyhow!(
                "header of {} has {} fields but rows carry {} values",
                file,
                out.header.len(),
                ncols
            ));
        };

        let rows: Vec<Box<str>> = out.lines.iter().map(|w| w[0].clone()).collect();

        let values = out
            .lines
            .par_iter()
            .enumerate()
            .map(|(i, words)| -> anyhow::Result<Vec<T>> {
                if words.len() != ncols + 1 {
                    return Err(anyhow::anyhow!(
                        "row {} ({}) of {} has {} values, expected {}",
                        i + 1,
                        words[0],
                        file,
                        words.len().saturating_sub(1),
                        ncols
                    ));
                }
                words[1..].iter().map(|w| parse_cell::<T>(w)).collect()
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let nrows = rows.len();
        Ok(MatWithNames {
            rows,
            cols,
            mat: DMatrix::<T>::from_row_iterator(nrows, ncols, values.into_iter().flatten()),
        })
    }

    fn write_named_delim(
        &self,
        file: &str,
        delim: &str,
        row_names: &[Box<str>],
        column_names: &[Box<str>],
    ) -> anyhow::Result<()> {
        if row_names.len() != self.nrows() || column_names.len() != self.ncols() {
            return Err(anyhow::anyhow!(
                "names ({} x {}) don't match the matrix ({} x {})",
                row_names.len(),
                column_names.len(),
                self.nrows(),
                self.ncols()
            ));
        }

        let mut header = vec!["".to_string()];
        header.extend(column_names.iter().map(|x| x.to_string()));

        let mut lines = vec![header.join(delim).into_boxed_str()];
        lines.par_extend((0..self.nrows()).into_par_iter().map(|i| {
            let mut words = vec![row_names[i].to_string()];
            words.extend(self.row(i).iter().map(|x| format_cell(*x)));
            words.join(delim).into_boxed_str()
        }));

        write_lines(&lines, file)
    }
}

fn format_cell<T: Float + Display>(x: T) -> String {
    if x.is_nan() {
        "NA".to_string()
    } else {
        format!("{}", x)
    }
}
