pub mod csv;
mod stream;

pub use csv::CsvFileStream;
pub use stream::SampleStream;
