//! Structural edits and value access.

use super::{Calculation, Column, DataSheet};
use crate::error::{Result, TailorError};
use tailor_engine::engine::normalize_name;
use tracing::debug;

impl DataSheet {
    fn check_column_position(&self, index: usize, inclusive_end: bool) -> Result<()> {
        let len = self.columns.len();
        let ok = if inclusive_end { index <= len } else { index < len };
        if ok {
            Ok(())
        } else {
            Err(TailorError::ColumnIndex { index, len })
        }
    }

    fn check_row(&self, row: usize) -> Result<()> {
        if row < self.num_rows {
            Ok(())
        } else {
            Err(TailorError::RowIndex {
                index: row,
                len: self.num_rows,
            })
        }
    }

    /// Both ends of an inclusive row range must exist and be in order.
    fn check_row_range(&self, top: usize, bottom: usize) -> Result<()> {
        self.check_row(top)?;
        self.check_row(bottom)?;
        if top > bottom {
            return Err(TailorError::RowIndex {
                index: top,
                len: bottom + 1,
            });
        }
        Ok(())
    }

    fn check_column_range(&self, left: usize, right: usize) -> Result<()> {
        self.check_column_position(left, false)?;
        self.check_column_position(right, false)?;
        if left > right {
            return Err(TailorError::ColumnIndex {
                index: left,
                len: right + 1,
            });
        }
        Ok(())
    }

    fn check_editable(&self, index: usize) -> Result<()> {
        let column = &self.columns[index];
        if column.calc.is_some() {
            return Err(TailorError::CalculatedColumn(column.label.clone()));
        }
        Ok(())
    }

    /// Insert `count` empty columns before `position`. Returns their labels.
    pub fn insert_columns(&mut self, position: usize, count: usize) -> Result<Vec<String>> {
        self.check_column_position(position, true)?;
        let mut labels = Vec::with_capacity(count);
        for offset in 0..count {
            let label = self.next_label();
            self.bind_name(&label, &label);
            self.columns
                .insert(position + offset, Column::plain(label.clone(), self.num_rows));
            labels.push(label);
        }
        debug!(position, count, "inserted columns");
        Ok(labels)
    }

    /// Insert a calculated column without an expression before `position`.
    pub fn insert_calculated_column(&mut self, position: usize) -> Result<String> {
        let label = self
            .insert_columns(position, 1)?
            .pop()
            .ok_or(TailorError::ColumnIndex {
                index: position,
                len: self.columns.len(),
            })?;
        self.columns[position].calc = Some(Calculation::default());
        Ok(label)
    }

    /// Remove `count` columns starting at `position`.
    pub fn remove_columns(&mut self, position: usize, count: usize) -> Result<()> {
        let end = position + count;
        if end > self.columns.len() {
            return Err(TailorError::ColumnIndex {
                index: end.saturating_sub(1),
                len: self.columns.len(),
            });
        }
        let removed: Vec<Column> = self.columns.drain(position..end).collect();
        for column in &removed {
            self.unbind(&column.label);
        }
        debug!(position, count, "removed columns");

        if let Some(label) = self.column_label(position).map(str::to_string) {
            self.recalculate_columns_from(&label);
        }
        Ok(())
    }

    /// Move the column at `source` so that it ends up at index `destination`.
    pub fn move_column(&mut self, source: usize, destination: usize) -> Result<()> {
        self.check_column_position(source, false)?;
        self.check_column_position(destination, false)?;
        if source == destination {
            return Ok(());
        }
        let column = self.columns.remove(source);
        self.columns.insert(destination, column);
        debug!(source, destination, "moved column");

        let start = source.min(destination);
        if let Some(label) = self.column_label(start).map(str::to_string) {
            self.recalculate_columns_from(&label);
        }
        Ok(())
    }

    /// Rename a column. The proposed name is normalized first; the
    /// normalized name is returned.
    pub fn rename_column(&mut self, label: &str, proposed: &str) -> Result<String> {
        self.require_index(label)?;
        let name = normalize_name(proposed);
        if name.is_empty() {
            return Err(TailorError::InvalidName(proposed.to_string()));
        }
        if self.column_name(label) == Some(name.as_str()) {
            return Ok(name);
        }
        if !self.name_available(&name, Some(label)) {
            return Err(TailorError::DuplicateName(name));
        }
        self.bind_name(label, &name);
        debug!(label, name = name.as_str(), "renamed column");

        // Expressions typed before this name existed may now resolve.
        self.recalculate_columns_from(label);
        Ok(name)
    }

    pub fn value(&self, row: usize, label: &str) -> Result<f64> {
        let index = self.require_index(label)?;
        self.check_row(row)?;
        Ok(self.columns[index].values[row])
    }

    pub fn set_value(&mut self, row: usize, label: &str, value: f64) -> Result<()> {
        let index = self.require_index(label)?;
        self.check_row(row)?;
        self.check_editable(index)?;
        self.columns[index].values[row] = value;
        self.recalculate_columns_from(label);
        Ok(())
    }

    /// Set every cell in rows `top..=bottom` of columns `left..=right` to `value`.
    pub fn set_values(
        &mut self,
        top: usize,
        left: &str,
        bottom: usize,
        right: &str,
        value: f64,
    ) -> Result<()> {
        let first = self.require_index(left)?;
        let last = self.require_index(right)?;
        self.check_row_range(top, bottom)?;
        self.check_column_range(first, last)?;
        for index in first..=last {
            self.check_editable(index)?;
        }
        for column in &mut self.columns[first..=last] {
            for cell in &mut column.values[top..=bottom] {
                *cell = value;
            }
        }
        self.recalculate_columns_from(left);
        Ok(())
    }

    /// Paste a row-major block with its top-left corner at (`top`, `left`).
    pub fn set_values_from_array(&mut self, top: usize, left: &str, block: &[Vec<f64>]) -> Result<()> {
        let first = self.require_index(left)?;
        let width = block.iter().map(Vec::len).max().unwrap_or(0);
        if width == 0 {
            return Ok(());
        }
        self.check_row(top + block.len() - 1)?;
        self.check_column_position(first + width - 1, false)?;
        for index in first..first + width {
            self.check_editable(index)?;
        }
        for (r, row) in block.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                self.columns[first + c].values[top + r] = *value;
            }
        }
        self.recalculate_columns_from(left);
        Ok(())
    }

    /// Row-major copy of rows `top..=bottom` of columns `left..=right` (indices).
    pub fn values(&self, top: usize, left: usize, bottom: usize, right: usize) -> Result<Vec<Vec<f64>>> {
        self.check_row_range(top, bottom)?;
        self.check_column_range(left, right)?;
        Ok((top..=bottom)
            .map(|row| {
                self.columns[left..=right]
                    .iter()
                    .map(|c| c.values[row])
                    .collect()
            })
            .collect())
    }

    /// Insert `count` empty rows before `position`.
    pub fn insert_rows(&mut self, position: usize, count: usize) -> Result<()> {
        if position > self.num_rows {
            return Err(TailorError::RowIndex {
                index: position,
                len: self.num_rows,
            });
        }
        for column in &mut self.columns {
            column
                .values
                .splice(position..position, std::iter::repeat_n(f64::NAN, count));
        }
        self.num_rows += count;
        debug!(position, count, "inserted rows");
        self.recalculate_all_columns();
        Ok(())
    }

    /// Remove `count` rows starting at `position`.
    pub fn remove_rows(&mut self, position: usize, count: usize) -> Result<()> {
        let end = position + count;
        if end > self.num_rows {
            return Err(TailorError::RowIndex {
                index: end.saturating_sub(1),
                len: self.num_rows,
            });
        }
        for column in &mut self.columns {
            column.values.drain(position..end);
        }
        self.num_rows -= count;
        debug!(position, count, "removed rows");
        self.recalculate_all_columns();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three plain columns x, y, z with four rows.
    fn sheet() -> DataSheet {
        let mut sheet = DataSheet::new();
        sheet.insert_columns(0, 3).unwrap();
        sheet.insert_rows(0, 4).unwrap();
        sheet
            .set_values_from_array(
                0,
                "col1",
                &[
                    vec![1.0, 10.0, 100.0],
                    vec![2.0, 20.0, 200.0],
                    vec![3.0, 30.0, 300.0],
                    vec![4.0, 40.0, 400.0],
                ],
            )
            .unwrap();
        sheet
    }

    #[test]
    fn test_reversed_ranges_are_rejected() {
        let mut sheet = sheet();
        assert!(matches!(
            sheet.values(0, 2, 0, 0),
            Err(TailorError::ColumnIndex { .. })
        ));
        assert!(matches!(
            sheet.values(3, 0, 1, 0),
            Err(TailorError::RowIndex { .. })
        ));
        assert!(matches!(
            sheet.set_values(3, "col1", 1, "col1", 0.0),
            Err(TailorError::RowIndex { .. })
        ));
        assert!(matches!(
            sheet.set_values(0, "col3", 0, "col1", 0.0),
            Err(TailorError::ColumnIndex { .. })
        ));
        assert_eq!(sheet.values(1, 0, 1, 2).unwrap(), vec![vec![2.0, 20.0, 200.0]]);
    }

    #[test]
    fn test_insert_columns_assigns_fresh_labels() {
        let mut sheet = sheet();
        let labels = sheet.insert_columns(1, 2).unwrap();
        assert_eq!(labels, vec!["col4", "col5"]);
        assert_eq!(
            sheet.column_labels(),
            vec!["col1", "col4", "col5", "col2", "col3"]
        );
        assert_eq!(sheet.column_name("col4"), Some("col4"));
        assert!(sheet.column("col4").unwrap().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_labels_are_never_reused() {
        let mut sheet = sheet();
        sheet.remove_columns(2, 1).unwrap();
        let labels = sheet.insert_columns(2, 1).unwrap();
        assert_eq!(labels, vec!["col4"]);
    }

    #[test]
    fn test_insert_columns_out_of_range() {
        let mut sheet = sheet();
        assert!(matches!(
            sheet.insert_columns(4, 1),
            Err(TailorError::ColumnIndex { index: 4, len: 3 })
        ));
    }

    #[test]
    fn test_remove_columns() {
        let mut sheet = sheet();
        sheet.remove_columns(1, 2).unwrap();
        assert_eq!(sheet.column_labels(), vec!["col1"]);
        assert_eq!(sheet.label_for_name("col2"), None);
        assert!(sheet.remove_columns(1, 1).is_err());
    }

    #[test]
    fn test_move_column_uses_final_position() {
        for (source, destination, expected) in [
            (1, 1, ["col1", "col2", "col3"]),
            (0, 1, ["col2", "col1", "col3"]),
            (0, 2, ["col2", "col3", "col1"]),
            (2, 1, ["col1", "col3", "col2"]),
        ] {
            let mut sheet = sheet();
            sheet.move_column(source, destination).unwrap();
            assert_eq!(sheet.column_labels(), expected);
        }
    }

    #[test]
    fn test_rename_column_normalizes() {
        let mut sheet = sheet();
        assert_eq!(sheet.rename_column("col1", "t x y").unwrap(), "t_x_y");
        assert_eq!(sheet.column_name("col1"), Some("t_x_y"));
        assert_eq!(sheet.label_for_name("t_x_y"), Some("col1"));
        assert_eq!(sheet.label_for_name("col1"), None);
    }

    #[test]
    fn test_rename_column_rejects_duplicates() {
        let mut sheet = sheet();
        sheet.rename_column("col1", "x").unwrap();
        assert!(matches!(
            sheet.rename_column("col2", "x"),
            Err(TailorError::DuplicateName(name)) if name == "x"
        ));
        // another column's label is reserved as well
        assert!(matches!(
            sheet.rename_column("col2", "col3"),
            Err(TailorError::DuplicateName(_))
        ));
        // renaming to the current name is a no-op
        assert_eq!(sheet.rename_column("col1", "x").unwrap(), "x");
        assert!(matches!(
            sheet.rename_column("col1", ""),
            Err(TailorError::InvalidName(_))
        ));
    }

    #[test]
    fn test_get_and_set_value() {
        let mut sheet = sheet();
        assert_eq!(sheet.value(2, "col2").unwrap(), 30.0);
        sheet.set_value(2, "col2", f64::NAN).unwrap();
        assert!(sheet.value(2, "col2").unwrap().is_nan());
        assert!(sheet.value(4, "col2").is_err());
        assert!(sheet.value(0, "nope").is_err());
    }

    #[test]
    fn test_set_values_range() {
        let mut sheet = sheet();
        sheet.set_values(1, "col2", 2, "col3", 0.0).unwrap();
        assert_eq!(
            sheet.values(0, 0, 3, 2).unwrap(),
            vec![
                vec![1.0, 10.0, 100.0],
                vec![2.0, 0.0, 0.0],
                vec![3.0, 0.0, 0.0],
                vec![4.0, 40.0, 400.0],
            ]
        );
    }

    #[test]
    fn test_calculated_columns_are_read_only() {
        let mut sheet = sheet();
        let label = sheet.insert_calculated_column(3).unwrap();
        assert!(matches!(
            sheet.set_value(0, &label, 1.0),
            Err(TailorError::CalculatedColumn(_))
        ));
    }

    #[test]
    fn test_insert_and_remove_rows() {
        let mut sheet = sheet();
        sheet.insert_rows(1, 2).unwrap();
        assert_eq!(sheet.num_rows(), 6);
        let col = sheet.column("col1").unwrap();
        assert_eq!(col[0], 1.0);
        assert!(col[1].is_nan() && col[2].is_nan());
        assert_eq!(col[3], 2.0);

        sheet.remove_rows(0, 3).unwrap();
        assert_eq!(sheet.column("col1").unwrap(), &[2.0, 3.0, 4.0]);
        assert!(sheet.remove_rows(2, 2).is_err());
    }

    #[test]
    fn test_is_empty() {
        let mut sheet = DataSheet::new();
        sheet.insert_columns(0, 2).unwrap();
        sheet.insert_rows(0, 3).unwrap();
        assert!(sheet.is_empty());
        sheet.set_value(1, "col2", 0.0).unwrap();
        assert!(!sheet.is_empty());
    }
}
