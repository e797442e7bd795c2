mod csv_file_stream;
mod parser;

pub use csv_file_stream::CsvFileStream;
