use crate::core::error::AlnResult;

/// Source of fixed-width numeric samples.
pub trait SampleStream {
    /// values per sample, output included
    fn dimension(&self) -> usize;

    /// Column names when the source has them; empty otherwise.
    fn column_names(&self) -> &[String];

    /// `Ok(None)` once the stream is exhausted.
    fn next_sample(&mut self) -> AlnResult<Option<Vec<f64>>>;
}
