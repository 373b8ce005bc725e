//! Plain-text rendering of a sheet and a fit result.

use std::io::{self, Write};
use tailor_core::{DataSheet, FitModel};
use tailor_engine::engine::format_number;

/// Write the sheet as a markdown table, followed by a note for every
/// calculated column whose expression could not be evaluated.
pub fn write_sheet(out: &mut impl Write, sheet: &DataSheet, precision: usize) -> io::Result<()> {
    let names = sheet.column_names();
    if names.is_empty() {
        writeln!(out, "*Empty sheet*")?;
        return Ok(());
    }

    write!(out, "|")?;
    for name in &names {
        write!(out, " {} |", escape_markdown(name))?;
    }
    writeln!(out)?;
    write!(out, "|")?;
    for _ in &names {
        write!(out, "---|")?;
    }
    writeln!(out)?;

    let labels = sheet.column_labels();
    for row in 0..sheet.num_rows() {
        write!(out, "|")?;
        for label in &labels {
            let value = sheet.value(row, label).unwrap_or(f64::NAN);
            write!(out, " {} |", format_number(value, precision))?;
        }
        writeln!(out)?;
    }

    for (label, name) in labels.iter().zip(&names) {
        if sheet.is_column_valid(label) {
            continue;
        }
        let expression = sheet.column_expression(label).unwrap_or_default();
        match sheet.column_error(label) {
            Some(err) => writeln!(out, "\n{} = {}: {}", name, expression, err)?,
            None => writeln!(out, "\n{} = {}: not evaluated", name, expression)?,
        }
    }
    Ok(())
}

fn escape_markdown(s: &str) -> String {
    s.replace('|', "\\|")
}

/// Write a fit report in the familiar `[[Fit Statistics]]` /
/// `[[Variables]]` layout.
pub fn write_fit_report(
    out: &mut impl Write,
    model: &FitModel,
    sheet: &DataSheet,
    precision: usize,
) -> io::Result<()> {
    let fmt = |v: f64| format_number(v, precision);
    let expression = model.model_expression(sheet).unwrap_or_default();
    let y = model.y_col_name(sheet).unwrap_or(model.y_col());
    writeln!(out, "[[Model]]")?;
    writeln!(out, "    {} = {}", y, expression)?;

    let Some(fit) = model.best_fit() else {
        writeln!(out, "    (no fit)")?;
        return Ok(());
    };
    writeln!(out, "[[Fit Statistics]]")?;
    writeln!(out, "    # function evals   = {}", fit.nfev)?;
    writeln!(out, "    # data points      = {}", fit.ndata)?;
    writeln!(out, "    # variables        = {}", fit.nvarys)?;
    writeln!(out, "    chi-square         = {}", fmt(fit.chisqr))?;
    writeln!(out, "    reduced chi-square = {}", fmt(fit.redchi))?;
    writeln!(out, "    Akaike info crit   = {}", fmt(fit.aic))?;
    writeln!(out, "    Bayesian info crit = {}", fmt(fit.bic))?;
    writeln!(out, "    message            = {}", fit.message)?;
    writeln!(out, "[[Variables]]")?;
    let width = fit.params.iter().map(|p| p.name.len()).max().unwrap_or(0);
    for p in &fit.params {
        let detail = match (p.vary, p.stderr) {
            (false, _) => "(fixed)".to_string(),
            (true, Some(stderr)) => format!("+/- {} (init = {})", fmt(stderr), fmt(p.init_value)),
            (true, None) => format!("+/- ? (init = {})", fmt(p.init_value)),
        };
        writeln!(out, "    {:<width$}  {} {}", format!("{}:", p.name), fmt(p.value), detail, width = width + 1)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_sheet(sheet: &DataSheet) -> String {
        let mut out = Vec::new();
        write_sheet(&mut out, sheet, 6).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_write_sheet() {
        let mut sheet = DataSheet::new();
        sheet.import_columns(&[
            ("x".to_string(), vec![1.0, 2.0]),
            ("y".to_string(), vec![0.5, f64::NAN]),
        ]);
        assert_eq!(render_sheet(&sheet), "| x | y |\n|---|---|\n| 1 | 0.5 |\n| 2 |  |\n");
    }

    #[test]
    fn test_write_sheet_reports_invalid_columns() {
        let mut sheet = DataSheet::new();
        sheet.import_columns(&[("x".to_string(), vec![0.0, 1.0])]);
        let label = sheet.insert_calculated_column(1).unwrap();
        sheet.rename_column(&label, "r").unwrap();
        sheet.update_column_expression(&label, "1 / x");
        let text = render_sheet(&sheet);
        assert!(text.contains("r = 1 / x: "), "{}", text);
    }

    #[test]
    fn test_empty_sheet() {
        assert_eq!(render_sheet(&DataSheet::new()), "*Empty sheet*\n");
    }

    #[test]
    fn test_fit_report() {
        let mut sheet = DataSheet::new();
        sheet.import_columns(&[
            ("t".to_string(), vec![0.0, 1.0, 2.0, 3.0]),
            ("v".to_string(), vec![1.0, 3.0, 5.0, 7.0]),
        ]);
        let mut model = FitModel::new(&sheet, "col1", "col2", None, None).unwrap();
        model.update_model_expression(&sheet, "a * t + b").unwrap();
        model.set_parameter_vary("b", false).unwrap();
        model.perform_fit(&sheet).unwrap();

        let mut out = Vec::new();
        write_fit_report(&mut out, &model, &sheet, 4).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("[[Model]]\n    v = a * t + b\n"), "{}", text);
        assert!(text.contains("# data points      = 4"));
        assert!(text.contains("b:  1 (fixed)"), "{}", text);
    }
}
