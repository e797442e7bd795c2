use std::fs::File;
use std::io::{BufRead, BufReader, Error, ErrorKind, Seek};

pub(super) fn is_comment_or_empty(s: &str) -> bool {
    let t = s.trim();
    t.is_empty() || t.starts_with('#')
}

pub(super) fn split_fields(line: &str) -> impl Iterator<Item = &str> {
    let sep = if line.contains('\t') {
        '\t'
    } else if line.contains(';') {
        ';'
    } else {
        ','
    };
    line.trim().split(sep).map(str::trim)
}

/// Reads up to the first data row. A first line that is not entirely numeric
/// is taken as the header; otherwise columns are named `x0`, `x1`, ...
/// Returns the column names and the byte offset of the first data row.
pub(super) fn parse_header(reader: &mut BufReader<File>) -> Result<(Vec<String>, u64), Error> {
    let mut line = String::new();
    loop {
        let pos = reader.stream_position()?;
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                "CSV file has no header or data",
            ));
        }
        if is_comment_or_empty(&line) {
            continue;
        }

        let fields: Vec<&str> = split_fields(&line).collect();
        if fields.len() < 2 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("need at least two columns, found {}", fields.len()),
            ));
        }
        if fields.iter().all(|f| f.parse::<f64>().is_ok()) {
            let names = (0..fields.len()).map(|i| format!("x{i}")).collect();
            return Ok((names, pos));
        }
        let names = fields
            .iter()
            .map(|f| f.trim_matches(|c| c == '"' || c == '\'').to_string())
            .collect();
        return Ok((names, reader.stream_position()?));
    }
}

pub(super) fn parse_row(line: &str, dim: usize) -> Result<Vec<f64>, Error> {
    let values = split_fields(line)
        .map(|f| {
            f.parse::<f64>().map_err(|_| {
                Error::new(ErrorKind::InvalidData, format!("'{f}' is not a number"))
            })
        })
        .collect::<Result<Vec<f64>, Error>>()?;
    if values.len() != dim {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("expected {dim} values, found {}", values.len()),
        ));
    }
    if let Some(v) = values.iter().find(|v| !v.is_finite()) {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("non-finite value {v}"),
        ));
    }
    Ok(values)
}
