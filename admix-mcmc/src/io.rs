use flate2::read::GzDecoder;
use nalgebra::DMatrix;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
///
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    let file = File::open(input_file)?;
    match ext {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not; `stdout` and
///   `stderr` write to the console
///
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }
    if output_file.eq_ignore_ascii_case("stderr") {
        return Ok(Box::new(BufWriter::new(std::io::stderr())));
    }

    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    let file = File::create(output_file)?;
    match ext {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

///
/// Read every non-comment line of the input file into memory
/// * `input_file` - file name--either gzipped or not
///
pub fn read_lines(input_file: &str) -> anyhow::Result<Vec<Box<str>>> {
    let buf = open_buf_reader(input_file)?;
    let mut lines = vec![];
    for x in buf.lines() {
        let x = x?;
        if x.starts_with('#') || x.trim().is_empty() {
            continue;
        }
        lines.push(x.into_boxed_str());
    }
    Ok(lines)
}

///
/// Write every line into the output file
/// * `lines` - anything displayable, one per line
/// * `output_file` - file name--either gzipped or not
///
pub fn write_lines<T>(lines: &[T], output_file: &str) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        if let Err(e) = writeln!(buf, "{}", line) {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            } else {
                return Err(anyhow::anyhow!("unexpected error: {}", e));
            }
        }
    }
    buf.flush()?;
    Ok(())
}

///
/// Read a square matrix whose rows start with a taxon name:
/// `name v_1 ... v_n`, whitespace separated
/// * `input_file` - file name--either gzipped or not
///
pub fn read_named_matrix(input_file: &str) -> anyhow::Result<(Vec<String>, DMatrix<f64>)> {
    let lines = read_lines(input_file)?;

    let mut rows: Vec<(usize, anyhow::Result<(String, Vec<f64>)>)> = lines
        .iter()
        .enumerate()
        .par_bridge()
        .map(|(i, line)| {
            let mut words = line.split_whitespace();
            let parsed = match words.next() {
                Some(name) => words
                    .map(|x| x.parse::<f64>())
                    .collect::<Result<Vec<f64>, _>>()
                    .map(|v| (name.to_string(), v))
                    .map_err(|e| anyhow::anyhow!("line {}: {}", i + 1, e)),
                None => Err(anyhow::anyhow!("line {} is empty", i + 1)),
            };
            (i, parsed)
        })
        .collect();
    rows.sort_by_key(|&(i, _)| i);

    let n = rows.len();
    let mut names = Vec::with_capacity(n);
    let mut values = DMatrix::<f64>::zeros(n, n);
    for (i, row) in rows.into_iter() {
        let (name, v) = row?;
        if v.len() != n {
            return Err(anyhow::anyhow!(
                "{}: row {} has {} values, expected {}",
                input_file,
                name,
                v.len(),
                n
            ));
        }
        for (j, x) in v.into_iter().enumerate() {
            values[(i, j)] = x;
        }
        names.push(name);
    }
    Ok((names, values))
}

///
/// Write a square matrix in the layout read by [`read_named_matrix`]
///
pub fn write_named_matrix(
    names: &[String],
    values: &DMatrix<f64>,
    output_file: &str,
) -> anyhow::Result<()> {
    let lines: Vec<String> = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let row: Vec<String> = (0..values.ncols())
                .map(|j| values[(i, j)].to_string())
                .collect();
            format!("{}\t{}", name, row.join("\t"))
        })
        .collect();
    write_lines(&lines, output_file)
}

///
/// Create the parent directory of a file if needed
/// * `file` - file name
///
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    let path = Path::new(file);
    let dir = path.parent().ok_or(anyhow::anyhow!("no parent"))?;
    std::fs::create_dir_all(dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_matrix_survives_gzip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("residuals.tsv.gz");
        let file = file.to_str().ok_or(anyhow::anyhow!("path"))?;

        let names: Vec<String> = ["A", "B", "C"].iter().map(|x| x.to_string()).collect();
        let values = DMatrix::from_row_slice(3, 3, &[0.0, 1.5, -2.0, 1.5, 0.0, 0.25, -2.0, 0.25, 0.0]);
        write_named_matrix(&names, &values, file)?;

        let (names2, values2) = read_named_matrix(file)?;
        assert_eq!(names, names2);
        assert_eq!(values, values2);
        Ok(())
    }

    #[test]
    fn ragged_rows_are_refused() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("bad.tsv");
        let file = file.to_str().ok_or(anyhow::anyhow!("path"))?;
        write_lines(&["# comment", "A 0 1", "B 1"], file)?;
        assert!(read_named_matrix(file).is_err());
        Ok(())
    }
}
