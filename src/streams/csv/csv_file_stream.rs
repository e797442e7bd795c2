use std::fs::File;
use std::io::{BufRead, BufReader, Error, ErrorKind, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::core::error::AlnResult;
use crate::streams::csv::parser::{is_comment_or_empty, parse_header, parse_row};
use crate::streams::stream::SampleStream;

/// Numeric samples read row by row from a delimited text file.
#[derive(Debug)]
pub struct CsvFileStream {
    path: PathBuf,
    reader: BufReader<File>,
    columns: Vec<String>,
    data_start_pos: u64,
    line: String,
}

impl CsvFileStream {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let mut reader = BufReader::new(File::open(&path)?);
        let (columns, data_start_pos) = parse_header(&mut reader)?;
        reader.seek(SeekFrom::Start(data_start_pos))?;
        Ok(Self {
            path,
            reader,
            columns,
            data_start_pos,
            line: String::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn restart(&mut self) -> Result<(), Error> {
        self.reader = BufReader::new(File::open(&self.path)?);
        self.reader.seek(SeekFrom::Start(self.data_start_pos))?;
        Ok(())
    }
}

impl SampleStream for CsvFileStream {
    fn dimension(&self) -> usize {
        self.columns.len()
    }

    fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn next_sample(&mut self) -> AlnResult<Option<Vec<f64>>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            if is_comment_or_empty(&self.line) {
                continue;
            }
            let row = parse_row(&self.line, self.columns.len()).map_err(|e| {
                Error::new(
                    ErrorKind::InvalidData,
                    format!("{}: invalid row '{}': {e}", self.path.display(), self.line.trim()),
                )
            })?;
            return Ok(Some(row));
        }
    }
}
