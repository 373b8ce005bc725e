//! Calculated-column expressions and recalculation.
//!
//! Expressions are stored label-addressed. Text that names a column which
//! did not exist yet when it was typed is stored as-is; such "raw" names are
//! rewritten to labels as soon as a column carries that name (the repair
//! step at the start of [`DataSheet::recalculate_column`]).
//!
//! Evaluation context for the column at position `k`: the columns at
//! positions `< k` that are currently valid, bound by name. One left-to-right
//! sweep is therefore always enough and no cycle can form.

use super::DataSheet;
use std::collections::HashMap;
use tailor_engine::engine::{get_variable_names, parse, rename_program, rename_variables};
use tailor_engine::{ExprError, Scope};
use tracing::{debug, warn};

impl DataSheet {
    /// Rewrite identifiers that are current names (and not labels) to labels.
    /// Returns `None` when nothing needs rewriting.
    fn repair_raw_names(&self, expression: &str) -> Result<Option<String>, ExprError> {
        let raw: HashMap<String, String> = get_variable_names(expression)?
            .into_iter()
            .filter(|id| !self.names.contains_key(id))
            .filter_map(|id| self.labels.get(&id).map(|label| (id, label.clone())))
            .collect();
        if raw.is_empty() {
            return Ok(None);
        }
        rename_variables(expression, &raw).map(Some)
    }

    /// Stored expression with raw names resolved, still label-addressed.
    fn resolved_expression(&self, stored: &str) -> Result<String, ExprError> {
        Ok(self
            .repair_raw_names(stored)?
            .unwrap_or_else(|| stored.to_string()))
    }

    /// The expression of a calculated column as the user sees it, in terms
    /// of column names. Unparseable text is returned verbatim.
    pub fn column_expression(&self, label: &str) -> Option<String> {
        let stored = self
            .column_ref(label)?
            .calc
            .as_ref()?
            .expression
            .as_ref()?;
        let resolved = match self.resolved_expression(stored) {
            Ok(resolved) => resolved,
            Err(_) => return Some(stored.clone()),
        };
        Some(rename_variables(&resolved, &self.names).unwrap_or(resolved))
    }

    /// Set the expression of a calculated column from name-addressed text and
    /// recalculate from that column rightward. Returns `false` for columns
    /// that are not calculated.
    pub fn update_column_expression(&mut self, label: &str, expression: &str) -> bool {
        let Some(index) = self.column_index(label) else {
            warn!(label, "expression update for unknown column");
            return false;
        };
        if self.columns[index].calc.is_none() {
            warn!(label, "expression update for non-calculated column");
            return false;
        }

        let stored = match parse(expression) {
            Ok(mut program) => {
                rename_program(&mut program, &self.labels);
                program.to_string()
            }
            Err(_) => expression.to_string(),
        };
        if let Some(calc) = self.columns[index].calc.as_mut() {
            calc.expression = Some(stored);
        }
        self.recalculate_columns_from(label);
        true
    }

    /// Whether the expression of column `label` references any of `labels`.
    pub fn column_uses(&self, label: &str, labels: &[&str]) -> bool {
        let Some(stored) = self
            .column_ref(label)
            .and_then(|c| c.calc.as_ref())
            .and_then(|calc| calc.expression.as_ref())
        else {
            return false;
        };
        let Ok(resolved) = self.resolved_expression(stored) else {
            return false;
        };
        get_variable_names(&resolved)
            .map(|ids| labels.iter().any(|l| ids.contains(*l)))
            .unwrap_or(false)
    }

    fn evaluate_column(&self, index: usize, expression: &str) -> Result<Vec<f64>, ExprError> {
        let mut program = parse(expression)?;
        rename_program(&mut program, &self.names);

        let mut scope = Scope::new();
        for column in &self.columns[..index] {
            if !column.is_valid() {
                continue;
            }
            if let Some(name) = self.names.get(&column.label) {
                scope.push_series(name.clone(), &column.values);
            }
        }
        self.evaluator
            .eval(&program, &scope)?
            .into_column(self.num_rows)
    }

    /// Re-evaluate one column. Returns whether it is valid afterwards.
    ///
    /// On failure the column is marked invalid and keeps its old values.
    pub fn recalculate_column(&mut self, label: &str) -> bool {
        let Some(index) = self.column_index(label) else {
            return false;
        };
        let Some(calc) = self.columns[index].calc.as_ref() else {
            return true;
        };
        let Some(stored) = calc.expression.clone() else {
            if let Some(calc) = self.columns[index].calc.as_mut() {
                calc.valid = false;
                calc.error = None;
            }
            return false;
        };

        let repaired = self.repair_raw_names(&stored);
        let outcome = repaired.and_then(|repaired| {
            let expression = repaired.clone().unwrap_or(stored);
            self.evaluate_column(index, &expression)
                .map(|values| (repaired, values))
        });

        let column = &mut self.columns[index];
        let Some(calc) = column.calc.as_mut() else {
            return true;
        };
        match outcome {
            Ok((repaired, values)) => {
                if let Some(repaired) = repaired {
                    calc.expression = Some(repaired);
                }
                column.values = values;
                calc.valid = true;
                calc.error = None;
                debug!(label, "recalculated column");
                true
            }
            Err(err) => {
                debug!(label, error = %err, "column evaluation failed");
                calc.valid = false;
                calc.error = Some(err);
                false
            }
        }
    }

    /// Recalculate every calculated column at or right of `label`, left to right.
    pub fn recalculate_columns_from(&mut self, label: &str) {
        let Some(start) = self.column_index(label) else {
            return;
        };
        let labels: Vec<String> = self.columns[start..]
            .iter()
            .filter(|c| c.calc.is_some())
            .map(|c| c.label.clone())
            .collect();
        if labels.is_empty() {
            return;
        }
        debug!(from = label, columns = labels.len(), "recalculation sweep");
        for label in labels {
            self.recalculate_column(&label);
        }
    }

    pub fn recalculate_all_columns(&mut self) {
        if let Some(first) = self.column_label(0).map(str::to_string) {
            self.recalculate_columns_from(&first);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TailorError;

    /// x = [1, 2, 3, 4], y = [1, 4, 9, 16], calculated column col3 = x * 2.
    fn sheet() -> DataSheet {
        let mut sheet = DataSheet::new();
        sheet.insert_columns(0, 2).unwrap();
        sheet.insert_rows(0, 4).unwrap();
        sheet.rename_column("col1", "x").unwrap();
        sheet.rename_column("col2", "y").unwrap();
        sheet
            .set_values_from_array(
                0,
                "col1",
                &[
                    vec![1.0, 1.0],
                    vec![2.0, 4.0],
                    vec![3.0, 9.0],
                    vec![4.0, 16.0],
                ],
            )
            .unwrap();
        let label = sheet.insert_calculated_column(2).unwrap();
        assert!(sheet.update_column_expression(&label, "x * 2"));
        sheet
    }

    #[test]
    fn test_new_calculated_column_is_invalid() {
        let mut sheet = sheet();
        let label = sheet.insert_calculated_column(3).unwrap();
        assert!(sheet.is_calculated_column(&label));
        assert!(!sheet.is_column_valid(&label));
        assert_eq!(sheet.column_expression(&label), None);
        assert!(!sheet.recalculate_column(&label));
    }

    #[test]
    fn test_expression_is_stored_with_labels() {
        let sheet = sheet();
        assert!(sheet.is_column_valid("col3"));
        assert_eq!(sheet.column("col3").unwrap(), &[2.0, 4.0, 6.0, 8.0]);
        assert_eq!(sheet.column_expression("col3").as_deref(), Some("x * 2"));
        let stored = sheet.columns[2].calc.as_ref().unwrap().expression.clone();
        assert_eq!(stored.as_deref(), Some("col1 * 2"));
    }

    #[test]
    fn test_update_expression_of_plain_column_is_refused() {
        let mut sheet = sheet();
        assert!(!sheet.update_column_expression("col1", "1"));
        assert!(!sheet.update_column_expression("nope", "1"));
    }

    #[test]
    fn test_recalculate_outcomes() {
        for (expression, valid) in [
            ("1", true),
            ("x", true),
            ("'a'", false),
            ("", false),
            ("1 /", false),
            ("1 * foo", false),
            ("y = 4", false),
            ("t = x ** 2; t + y", true),
        ] {
            let mut sheet = sheet();
            sheet.update_column_expression("col3", expression);
            assert_eq!(sheet.is_column_valid("col3"), valid, "{expression:?}");
        }
    }

    #[test]
    fn test_failed_evaluation_keeps_values() {
        let mut sheet = sheet();
        sheet.update_column_expression("col3", "1 * foo");
        assert!(!sheet.is_column_valid("col3"));
        assert_eq!(sheet.column("col3").unwrap(), &[2.0, 4.0, 6.0, 8.0]);
        assert_eq!(
            sheet.column_error("col3"),
            Some(&ExprError::Name("foo".to_string()))
        );
    }

    #[test]
    fn test_broken_expression_is_shown_verbatim() {
        let mut sheet = sheet();
        sheet.update_column_expression("col3", "x + (2 * ");
        assert_eq!(sheet.column_expression("col3").as_deref(), Some("x + (2 * "));
        assert!(sheet.column_error("col3").is_some_and(ExprError::is_syntax));
    }

    #[test]
    fn test_columns_only_see_the_left() {
        let mut sheet = sheet();
        let label = sheet.insert_calculated_column(0).unwrap();
        sheet.update_column_expression(&label, "x + 1");
        assert!(!sheet.is_column_valid(&label));
        // moving it to the end makes x visible
        sheet.move_column(0, 3).unwrap();
        assert!(sheet.is_column_valid(&label));
        assert_eq!(sheet.column(&label).unwrap(), &[2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_value_change_propagates() {
        let mut sheet = sheet();
        let label = sheet.insert_calculated_column(3).unwrap();
        sheet.update_column_expression(&label, "col3 + y");
        sheet.set_value(0, "col1", 10.0).unwrap();
        assert_eq!(sheet.column("col3").unwrap()[0], 20.0);
        assert_eq!(sheet.column(&label).unwrap()[0], 21.0);
    }

    #[test]
    fn test_invalid_column_cascades() {
        let mut sheet = sheet();
        let b = sheet.insert_calculated_column(3).unwrap();
        sheet.rename_column(&b, "b").unwrap();
        sheet.update_column_expression(&b, "1 / x");
        let c = sheet.insert_calculated_column(4).unwrap();
        sheet.update_column_expression(&c, "b + 1");
        assert!(sheet.is_column_valid(&b) && sheet.is_column_valid(&c));

        sheet.set_value(1, "col1", 0.0).unwrap();
        assert!(!sheet.is_column_valid(&b));
        assert!(!sheet.is_column_valid(&c));
        assert_eq!(sheet.column_error(&c), Some(&ExprError::Name("b".to_string())));

        sheet.set_value(1, "col1", 2.0).unwrap();
        assert!(sheet.is_column_valid(&b) && sheet.is_column_valid(&c));
    }

    #[test]
    fn test_raw_names_are_repaired_once_bound() {
        let mut sheet = sheet();
        let label = sheet.insert_calculated_column(3).unwrap();
        sheet.update_column_expression(&label, "time * 2");
        assert!(!sheet.is_column_valid(&label));
        assert_eq!(sheet.column_expression(&label).as_deref(), Some("time * 2"));

        sheet.rename_column("col1", "time").unwrap();
        assert!(sheet.is_column_valid(&label));
        let stored = sheet.columns[3].calc.as_ref().unwrap().expression.clone();
        assert_eq!(stored.as_deref(), Some("col1 * 2"));
        // the stored form no longer depends on the name
        sheet.rename_column("col1", "t").unwrap();
        assert_eq!(sheet.column_expression(&label).as_deref(), Some("t * 2"));
    }

    #[test]
    fn test_rename_keeps_stored_expression() {
        let mut sheet = sheet();
        sheet.rename_column("col1", "time").unwrap();
        assert_eq!(sheet.column_expression("col3").as_deref(), Some("time * 2"));
        let stored = sheet.columns[2].calc.as_ref().unwrap().expression.clone();
        assert_eq!(stored.as_deref(), Some("col1 * 2"));
        assert_eq!(sheet.column("col3").unwrap(), &[2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_column_uses() {
        let sheet = sheet();
        assert!(sheet.column_uses("col3", &["col1"]));
        assert!(!sheet.column_uses("col3", &["col2"]));
        assert!(!sheet.column_uses("col1", &["col1"]));
    }

    #[test]
    fn test_remove_referenced_column_invalidates() {
        let mut sheet = sheet();
        sheet.remove_columns(0, 1).unwrap();
        assert!(!sheet.is_column_valid("col3"));
        assert!(matches!(sheet.value(0, "col1"), Err(TailorError::UnknownColumn(_))));
    }

    #[test]
    fn test_recalculate_all_is_idempotent() {
        let mut sheet = sheet();
        let label = sheet.insert_calculated_column(3).unwrap();
        sheet.update_column_expression(&label, "cumsum(y) / x");
        let before: Vec<Vec<f64>> = sheet
            .column_labels()
            .iter()
            .map(|l| sheet.column(l).unwrap().to_vec())
            .collect();
        sheet.recalculate_all_columns();
        sheet.recalculate_all_columns();
        let after: Vec<Vec<f64>> = sheet
            .column_labels()
            .iter()
            .map(|l| sheet.column(l).unwrap().to_vec())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_scalar_results_broadcast() {
        let mut sheet = sheet();
        sheet.update_column_expression("col3", "mean(y)");
        assert_eq!(sheet.column("col3").unwrap(), &[7.5; 4]);
    }
}
