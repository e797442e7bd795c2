use std::collections::VecDeque;

use crate::core::error::AlnResult;
use crate::streams::SampleStream;

/// In-memory stream over prepared rows.
#[derive(Debug, Clone)]
pub struct VecSampleStream {
    dim: usize,
    rows: VecDeque<Vec<f64>>,
}

impl VecSampleStream {
    pub fn new(dim: usize, rows: Vec<Vec<f64>>) -> Self {
        Self {
            dim,
            rows: rows.into(),
        }
    }
}

impl SampleStream for VecSampleStream {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn column_names(&self) -> &[String] {
        &[]
    }

    fn next_sample(&mut self) -> AlnResult<Option<Vec<f64>>> {
        Ok(self.rows.pop_front())
    }
}
