//! Column store with calculated columns.
//!
//! A [`DataSheet`] is an ordered list of equally long `f64` columns. Every
//! column has two identities:
//!
//! - a **label** (`col1`, `col2`, ...) assigned on creation and never
//!   changed or reused; expressions are stored in terms of labels;
//! - a **name**, unique and user-editable, used whenever an expression is
//!   shown to or typed by the user.
//!
//! A calculated column derives its values from an expression over the
//! columns to its left. Whenever data changes, calculated columns from the
//! point of change rightward are re-evaluated in one sweep (see `recalc`).

mod io;
mod ops;
mod recalc;

pub use io::{ColumnData, SheetSnapshot};

use crate::source::DataSource;
use std::collections::HashMap;
use tailor_engine::{Evaluator, ExprError};

#[derive(Debug, Clone, Default)]
pub(crate) struct Calculation {
    /// Label-addressed expression, or the raw text if it does not parse.
    pub(crate) expression: Option<String>,
    pub(crate) valid: bool,
    pub(crate) error: Option<ExprError>,
}

#[derive(Debug, Clone)]
pub(crate) struct Column {
    pub(crate) label: String,
    pub(crate) values: Vec<f64>,
    pub(crate) calc: Option<Calculation>,
}

impl Column {
    fn plain(label: String, rows: usize) -> Self {
        Column {
            label,
            values: vec![f64::NAN; rows],
            calc: None,
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.calc.as_ref().is_none_or(|c| c.valid)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DataSheet {
    pub(crate) columns: Vec<Column>,
    /// label -> name
    pub(crate) names: HashMap<String, String>,
    /// name -> label
    pub(crate) labels: HashMap<String, String>,
    pub(crate) num_rows: usize,
    pub(crate) new_col_num: usize,
    pub(crate) evaluator: Evaluator,
}

impl DataSheet {
    /// Empty sheet using the built-in functions only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty sheet whose expressions may also call `evaluator`'s library.
    pub fn with_evaluator(evaluator: Evaluator) -> Self {
        DataSheet {
            evaluator,
            ..Self::default()
        }
    }

    pub fn set_evaluator(&mut self, evaluator: Evaluator) {
        self.evaluator = evaluator;
        self.recalculate_all_columns();
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_label(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(|c| c.label.as_str())
    }

    pub fn column_index(&self, label: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.label == label)
    }

    /// Labels in table order.
    pub fn column_labels(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.label.clone()).collect()
    }

    /// Names in table order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| {
                self.names
                    .get(&c.label)
                    .cloned()
                    .unwrap_or_else(|| c.label.clone())
            })
            .collect()
    }

    pub fn column_name(&self, label: &str) -> Option<&str> {
        self.names.get(label).map(|s| s.as_str())
    }

    pub fn label_for_name(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(|s| s.as_str())
    }

    pub fn column(&self, label: &str) -> Option<&[f64]> {
        self.column_ref(label).map(|c| c.values.as_slice())
    }

    /// Several columns at once; fails on the first unknown label.
    pub fn columns(&self, labels: &[&str]) -> crate::Result<Vec<&[f64]>> {
        labels
            .iter()
            .map(|label| {
                self.column(label)
                    .ok_or_else(|| crate::TailorError::UnknownColumn(label.to_string()))
            })
            .collect()
    }

    pub fn is_calculated_column(&self, label: &str) -> bool {
        self.column_ref(label).is_some_and(|c| c.calc.is_some())
    }

    /// Non-calculated columns are always valid; unknown labels are not.
    pub fn is_column_valid(&self, label: &str) -> bool {
        self.column_ref(label).is_some_and(Column::is_valid)
    }

    /// Error from the last evaluation of a calculated column.
    pub fn column_error(&self, label: &str) -> Option<&ExprError> {
        self.column_ref(label)
            .and_then(|c| c.calc.as_ref())
            .and_then(|calc| calc.error.as_ref())
    }

    /// Whether every cell is missing.
    pub fn is_empty(&self) -> bool {
        self.columns
            .iter()
            .all(|c| c.values.iter().all(|v| v.is_nan()))
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub(crate) fn column_ref(&self, label: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.label == label)
    }

    pub(crate) fn require_index(&self, label: &str) -> crate::Result<usize> {
        self.column_index(label)
            .ok_or_else(|| crate::TailorError::UnknownColumn(label.to_string()))
    }

    /// Next unused label. The counter skips values whose label is already
    /// taken as a label or a name, so default names never collide.
    pub(crate) fn next_label(&mut self) -> String {
        loop {
            self.new_col_num += 1;
            let label = format!("col{}", self.new_col_num);
            if !self.names.contains_key(&label) && !self.labels.contains_key(&label) {
                return label;
            }
        }
    }

    pub(crate) fn bind_name(&mut self, label: &str, name: &str) {
        if let Some(old) = self.names.insert(label.to_string(), name.to_string()) {
            self.labels.remove(&old);
        }
        self.labels.insert(name.to_string(), label.to_string());
    }

    pub(crate) fn unbind(&mut self, label: &str) {
        if let Some(name) = self.names.remove(label) {
            self.labels.remove(&name);
        }
    }

    /// Whether `name` can be given to the column `label` (or a new column
    /// when `label` is `None`): not another column's name or label.
    pub(crate) fn name_available(&self, name: &str, label: Option<&str>) -> bool {
        let owner_by_name = self.labels.get(name).map(|s| s.as_str());
        let taken_as_name = owner_by_name.is_some() && owner_by_name != label;
        let taken_as_label = self.names.contains_key(name) && Some(name) != label;
        !taken_as_name && !taken_as_label
    }
}

impl DataSource for DataSheet {
    fn column_values(&self, label: &str) -> Option<&[f64]> {
        self.column(label)
    }

    fn column_name(&self, label: &str) -> Option<&str> {
        DataSheet::column_name(self, label)
    }

    fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sheet_is_empty() {
        let sheet = DataSheet::new();
        assert_eq!(sheet.num_columns(), 0);
        assert_eq!(sheet.num_rows(), 0);
        assert!(sheet.is_empty());
    }

    #[test]
    fn test_next_label_skips_taken_names() {
        let mut sheet = DataSheet::new();
        sheet.insert_columns(0, 1).unwrap();
        sheet.rename_column("col1", "col2").unwrap();
        let labels = sheet.insert_columns(1, 1).unwrap();
        assert_eq!(labels, vec!["col3".to_string()]);
        assert_eq!(sheet.column_names(), vec!["col2", "col3"]);
    }

    #[test]
    fn test_unknown_label_is_not_valid() {
        let sheet = DataSheet::new();
        assert!(!sheet.is_column_valid("col1"));
        assert!(!sheet.is_calculated_column("col1"));
    }
}
