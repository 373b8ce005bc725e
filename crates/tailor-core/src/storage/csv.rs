//! CSV import/export of numeric columns.

use crate::error::{Result, TailorError};
use crate::sheet::DataSheet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;
use tailor_engine::engine::normalize_name;

/// How a CSV file is laid out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvFormat {
    pub delimiter: char,
    pub decimal: char,
    pub thousands: Option<char>,
    /// First (non-skipped) line holds column names.
    pub header: bool,
    /// Lines to ignore before the header or data.
    pub skip_rows: usize,
}

impl Default for CsvFormat {
    fn default() -> Self {
        CsvFormat {
            delimiter: ',',
            decimal: '.',
            thousands: None,
            header: true,
            skip_rows: 0,
        }
    }
}

/// Read and parse a CSV file.
pub fn read_csv(path: &Path, format: &CsvFormat) -> Result<Vec<(String, Vec<f64>)>> {
    let content = std::fs::read_to_string(path)?;
    parse_csv(&content, format)
}

/// Parse CSV text into `(name, values)` columns.
///
/// Cells that are empty or not numeric become NaN. Header names are
/// normalized; without a header (or for surplus fields) columns are named
/// `col1`, `col2`, ...
pub fn parse_csv(text: &str, format: &CsvFormat) -> Result<Vec<(String, Vec<f64>)>> {
    let mut lines = text
        .lines()
        .enumerate()
        .skip(format.skip_rows)
        .filter(|(_, line)| !line.trim().is_empty());

    let mut names: Vec<String> = Vec::new();
    if format.header {
        let Some((_, header)) = lines.next() else {
            return Err(TailorError::Csv {
                line: format.skip_rows + 1,
                message: "CSV data is empty".to_string(),
            });
        };
        names = parse_csv_line(header, format.delimiter)
            .iter()
            .map(|name| normalize_name(name.trim()))
            .collect();
    }

    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); names.len()];
    let mut rows = 0;
    for (_, line) in lines {
        let fields = parse_csv_line(line, format.delimiter);
        while columns.len() < fields.len() {
            columns.push(vec![f64::NAN; rows]);
        }
        for (i, column) in columns.iter_mut().enumerate() {
            let value = fields
                .get(i)
                .map_or(f64::NAN, |field| parse_number(field, format));
            column.push(value);
        }
        rows += 1;
    }

    for i in names.len()..columns.len() {
        names.push(format!("col{}", i + 1));
    }
    Ok(names.into_iter().zip(columns).collect())
}

/// Parse a single CSV line, handling quoted fields
pub(crate) fn parse_csv_line(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut field_was_quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                // Check for escaped quote
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else if c == '"' {
            in_quotes = true;
            field_was_quoted = true;
        } else if c == delimiter {
            if field_was_quoted {
                fields.push(std::mem::take(&mut current));
            } else {
                fields.push(current.trim().to_string());
                current.clear();
            }
            field_was_quoted = false;
        } else {
            current.push(c);
        }
    }
    if field_was_quoted {
        fields.push(current);
    } else {
        fields.push(current.trim().to_string());
    }
    fields
}

fn number_re() -> &'static Regex {
    static NUMBER_RE: OnceLock<Regex> = OnceLock::new();
    NUMBER_RE.get_or_init(|| {
        Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$|^[+-]?(?i:nan|inf|infinity)$")
            .expect("CSV number regex must compile")
    })
}

/// Parse one cell using the format's decimal and thousands separators.
fn parse_number(field: &str, format: &CsvFormat) -> f64 {
    let mut cleaned: String = field.trim().to_string();
    if let Some(sep) = format.thousands {
        cleaned.retain(|c| c != sep);
    }
    if format.decimal != '.' {
        cleaned = cleaned.replace(format.decimal, ".");
    }
    if !number_re().is_match(&cleaned) {
        return f64::NAN;
    }
    cleaned.parse().unwrap_or(f64::NAN)
}

/// Write the sheet's names and values as CSV. Missing values are empty fields.
pub fn write_csv(sheet: &DataSheet, mut out: impl Write, delimiter: char) -> Result<()> {
    let sep = delimiter.to_string();
    let named = sheet.named_columns();
    let header: Vec<String> = named
        .iter()
        .map(|(name, _)| escape_csv_field(name, delimiter))
        .collect();
    writeln!(out, "{}", header.join(&sep))?;

    for row in 0..sheet.num_rows() {
        let line: Vec<String> = named
            .iter()
            .map(|(_, values)| {
                let v = values[row];
                if v.is_nan() { String::new() } else { v.to_string() }
            })
            .collect();
        writeln!(out, "{}", line.join(&sep))?;
    }
    out.flush()?;
    Ok(())
}

fn escape_csv_field(field: &str, delimiter: char) -> String {
    if field.contains(delimiter)
        || field.contains('"')
        || field.contains('\n')
        || field.contains('\r')
    {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
