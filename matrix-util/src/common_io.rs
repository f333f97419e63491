use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Field separator: a literal string or any of a set of characters
pub enum Delimiter {
    Str(String),
    Chars(Vec<char>),
}

impl From<&str> for Delimiter {
    fn from(s: &str) -> Self {
        Delimiter::Str(s.to_string())
    }
}

impl From<char> for Delimiter {
    fn from(c: char) -> Self {
        Delimiter::Chars(vec![c])
    }
}

impl<const N: usize> From<&[char; N]> for Delimiter {
    fn from(chars: &[char; N]) -> Self {
        Delimiter::Chars(chars.to_vec())
    }
}

impl Delimiter {
    fn split_trimmed(&self, line: &str) -> Vec<Box<str>> {
        let words: Vec<&str> = match self {
            Delimiter::Str(s) => line.split(s.as_str()).collect(),
            Delimiter::Chars(chars) => line.split(chars.as_slice()).collect(),
        };
        words.into_iter().map(|w| w.trim().into()).collect()
    }
}

/// `,` for `.csv` and `.csv.gz`, tab for anything else
pub fn detect_delimiter(file_path: &str) -> &'static str {
    let stripped = file_path.strip_suffix(".gz").unwrap_or(file_path);
    if stripped.ends_with(".csv") {
        ","
    } else {
        "\t"
    }
}

///
/// Write one line per item; gzipped if the file name ends with `.gz`
///
pub fn write_lines<T: std::fmt::Display>(lines: &[T], output_file: &str) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        match writeln!(buf, "{}", line) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
            Err(e) => return Err(anyhow::anyhow!("writing {}: {}", output_file, e)),
        }
    }
    buf.flush()?;
    Ok(())
}

pub struct ReadLinesOut {
    pub header: Vec<Box<str>>,
    pub lines: Vec<Vec<Box<str>>>,
}

///
/// Read non-empty lines, skipping `#` and `%` comments, and split them
/// into trimmed words.
///
/// * `input_file` - file name, gzipped or not
/// * `delim` - field separator
/// * `header_line` - index of the header among the kept lines, if any;
///   lines before it are dropped
///
pub fn read_lines_of_words_delim(
    input_file: &str,
    delim: impl Into<Delimiter>,
    header_line: Option<usize>,
) -> anyhow::Result<ReadLinesOut> {
    let delim = delim.into();

    let raw: Vec<String> = open_buf_reader(input_file)?
        .lines()
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| anyhow::anyhow!("reading {}: {}", input_file, e))?
        .into_iter()
        .map(|x| x.trim_end_matches('\r').to_string())
        .filter(|x| !x.is_empty() && !x.starts_with('#') && !x.starts_with('%'))
        .collect();

    let (header, body) = match header_line {
        None => (vec![], &raw[..]),
        Some(h) if h < raw.len() => (delim.split_trimmed(&raw[h]), &raw[(h + 1)..]),
        Some(_) => return Err(anyhow::anyhow!("no header line in {}", input_file)),
    };

    // indexed parallel iterators keep the line order
    let lines = body.par_iter().map(|s| delim.split_trimmed(s)).collect();

    Ok(ReadLinesOut { header, lines })
}

/// Buffered reader, decompressing `.gz` files
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let file = File::open(input_file)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", input_file, e))?;
    if is_gz(input_file) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Buffered writer, compressing `.gz` files; `stdout` writes to the
/// standard output
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }
    let file = File::create(output_file)
        .map_err(|e| anyhow::anyhow!("failed to create {}: {}", output_file, e))?;
    if is_gz(output_file) {
        let encoder = GzEncoder::new(file, flate2::Compression::default());
        Ok(Box::new(BufWriter::new(encoder)))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

fn is_gz(file: &str) -> bool {
    Path::new(file).extension().and_then(|x| x.to_str()) == Some("gz")
}

/// Create the parent directory of `file` if it does not exist
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    match Path::new(file).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => Ok(std::fs::create_dir_all(dir)?),
        _ => Ok(()),
    }
}
