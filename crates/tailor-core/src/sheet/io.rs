//! Bulk load/dump: snapshots for project files and CSV-shaped columns.

use super::{Calculation, Column, DataSheet};
use crate::error::{Result, TailorError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tailor_engine::Evaluator;
use tailor_engine::engine::normalize_name;
use tracing::debug;

/// One column of a [`SheetSnapshot`]. Missing values are `None` so the
/// snapshot survives formats without NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnData {
    pub label: String,
    pub values: Vec<Option<f64>>,
}

/// Serializable sheet state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetSnapshot {
    /// Columns in table order.
    pub data: Vec<ColumnData>,
    /// label -> name
    pub col_names: BTreeMap<String, String>,
    /// label -> expression (label-addressed) for calculated columns
    pub calculated_column_expression: BTreeMap<String, Option<String>>,
    pub new_col_num: usize,
}

impl SheetSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl DataSheet {
    pub fn snapshot(&self) -> SheetSnapshot {
        SheetSnapshot {
            data: self
                .columns
                .iter()
                .map(|c| ColumnData {
                    label: c.label.clone(),
                    values: c
                        .values
                        .iter()
                        .map(|v| if v.is_nan() { None } else { Some(*v) })
                        .collect(),
                })
                .collect(),
            col_names: self
                .names
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            calculated_column_expression: self
                .columns
                .iter()
                .filter_map(|c| {
                    c.calc
                        .as_ref()
                        .map(|calc| (c.label.clone(), calc.expression.clone()))
                })
                .collect(),
            new_col_num: self.new_col_num,
        }
    }

    /// Rebuild a sheet from a snapshot and recalculate everything.
    pub fn from_snapshot(snapshot: &SheetSnapshot, evaluator: Evaluator) -> Result<Self> {
        let mut sheet = DataSheet::with_evaluator(evaluator);
        sheet.num_rows = snapshot.data.first().map_or(0, |c| c.values.len());
        sheet.new_col_num = snapshot.new_col_num;

        for data in &snapshot.data {
            if data.values.len() != sheet.num_rows {
                return Err(TailorError::Snapshot(format!(
                    "column '{}' has {} rows, expected {}",
                    data.label,
                    data.values.len(),
                    sheet.num_rows
                )));
            }
            if sheet.names.contains_key(&data.label) {
                return Err(TailorError::Snapshot(format!(
                    "duplicate label '{}'",
                    data.label
                )));
            }
            let name = snapshot
                .col_names
                .get(&data.label)
                .cloned()
                .unwrap_or_else(|| data.label.clone());
            if sheet.labels.contains_key(&name) {
                return Err(TailorError::Snapshot(format!("duplicate name '{}'", name)));
            }
            sheet.bind_name(&data.label, &name);
            sheet.columns.push(Column {
                label: data.label.clone(),
                values: data
                    .values
                    .iter()
                    .map(|v| v.unwrap_or(f64::NAN))
                    .collect(),
                calc: snapshot
                    .calculated_column_expression
                    .get(&data.label)
                    .map(|expression| Calculation {
                        expression: expression.clone(),
                        ..Calculation::default()
                    }),
            });
        }

        sheet.recalculate_all_columns();
        Ok(sheet)
    }

    /// `(name, values)` for every column in table order.
    pub fn named_columns(&self) -> Vec<(String, Vec<f64>)> {
        self.column_names()
            .into_iter()
            .zip(self.columns.iter().map(|c| c.values.clone()))
            .collect()
    }

    /// A name based on `base` that no column uses yet.
    fn unique_name(&self, base: &str) -> String {
        let base = if base.is_empty() { "col" } else { base };
        if self.name_available(base, None) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{}_{}", base, n))
            .find(|candidate| self.name_available(candidate, None))
            .unwrap_or_else(|| base.to_string())
    }

    fn resize_rows(&mut self, rows: usize) {
        for column in &mut self.columns {
            column.values.resize(rows, f64::NAN);
        }
        self.num_rows = rows;
    }

    fn append_plain_column(&mut self, name: &str, values: &[f64]) {
        let label = self.next_label();
        let name = self.unique_name(&normalize_name(name));
        self.bind_name(&label, &name);
        let mut values = values.to_vec();
        values.resize(self.num_rows, f64::NAN);
        self.columns.push(Column {
            label,
            values,
            calc: None,
        });
    }

    /// Replace all columns with plain columns holding `named` data.
    pub fn import_columns(&mut self, named: &[(String, Vec<f64>)]) {
        self.columns.clear();
        self.names.clear();
        self.labels.clear();
        self.num_rows = named.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
        for (name, values) in named {
            self.append_plain_column(name, values);
        }
        debug!(columns = named.len(), rows = self.num_rows, "imported columns");
    }

    /// Merge `named` data into the sheet: columns with a matching name get
    /// the new values, other names are appended. The row count follows the
    /// imported data.
    pub fn merge_columns(&mut self, named: &[(String, Vec<f64>)]) {
        let rows = named.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
        self.resize_rows(rows);
        for (name, values) in named {
            let name = normalize_name(name);
            match self.labels.get(&name).cloned() {
                Some(label) => {
                    if let Some(index) = self.column_index(&label) {
                        let column = &mut self.columns[index];
                        column.values = values.clone();
                        column.values.resize(rows, f64::NAN);
                    }
                }
                None => self.append_plain_column(&name, values),
            }
        }
        debug!(columns = named.len(), rows, "merged columns");
        self.recalculate_all_columns();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(pairs: &[(&str, &[f64])]) -> Vec<(String, Vec<f64>)> {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_vec()))
            .collect()
    }

    fn sheet() -> DataSheet {
        let mut sheet = DataSheet::new();
        sheet.import_columns(&named(&[("x", &[1.0, 2.0, 3.0]), ("y", &[1.0, f64::NAN, 9.0])]));
        let label = sheet.insert_calculated_column(2).unwrap();
        sheet.rename_column(&label, "z").unwrap();
        sheet.update_column_expression(&label, "x + 1");
        sheet
    }

    #[test]
    fn test_import_normalizes_and_dedupes_names() {
        let mut sheet = DataSheet::new();
        sheet.import_columns(&named(&[("t (s)", &[1.0]), ("1x", &[2.0, 3.0]), ("t (s)", &[4.0])]));
        assert_eq!(sheet.column_names(), vec!["t__s_", "_1x", "t__s__1"]);
        assert_eq!(sheet.num_rows(), 2);
        assert!(sheet.column("col1").unwrap()[1].is_nan());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let sheet = sheet();
        let snapshot = sheet.snapshot();
        assert_eq!(snapshot.new_col_num, 3);
        assert_eq!(
            snapshot.calculated_column_expression.get("col3"),
            Some(&Some("col1 + 1".to_string()))
        );
        assert_eq!(snapshot.data[1].values, vec![Some(1.0), None, Some(9.0)]);

        let json = snapshot.to_json().unwrap();
        let restored = DataSheet::from_snapshot(&SheetSnapshot::from_json(&json).unwrap(), Evaluator::new()).unwrap();
        assert_eq!(restored.column_names(), vec!["x", "y", "z"]);
        assert_eq!(restored.column("col3").unwrap(), &[2.0, 3.0, 4.0]);
        assert!(restored.is_column_valid("col3"));

        // the counter is restored, so labels are not reused
        let mut restored = restored;
        assert_eq!(restored.insert_columns(0, 1).unwrap(), vec!["col4"]);
    }

    #[test]
    fn test_snapshot_rejects_ragged_columns() {
        let mut snapshot = sheet().snapshot();
        snapshot.data[0].values.pop();
        assert!(matches!(
            DataSheet::from_snapshot(&snapshot, Evaluator::new()),
            Err(TailorError::Snapshot(_))
        ));
    }

    #[test]
    fn test_merge_replaces_matching_names_and_appends_new() {
        let mut sheet = sheet();
        sheet.merge_columns(&named(&[("x", &[10.0, 20.0, 30.0, 40.0]), ("w", &[5.0])]));
        assert_eq!(sheet.column_names(), vec!["x", "y", "z", "w"]);
        assert_eq!(sheet.num_rows(), 4);
        assert_eq!(sheet.column("col3").unwrap(), &[11.0, 21.0, 31.0, 41.0]);
        assert!(sheet.column("col2").unwrap()[3].is_nan());
        assert!(sheet.column("col4").unwrap()[1].is_nan());
    }

    #[test]
    fn test_named_columns() {
        let sheet = sheet();
        let dump = sheet.named_columns();
        assert_eq!(dump[0], ("x".to_string(), vec![1.0, 2.0, 3.0]));
        assert_eq!(dump[2].0, "z");
    }
}
