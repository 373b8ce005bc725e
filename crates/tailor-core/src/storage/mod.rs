//! File formats: CSV data and Rhai function libraries.

mod csv;
mod functions;

pub use csv::{CsvFormat, parse_csv, read_csv, write_csv};
pub use functions::{evaluator_with_functions, load_function_library};
