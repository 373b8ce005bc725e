//! End-to-end behaviour of the data sheet and fit models.

use tailor_core::{DataSheet, FitModel};

fn named(pairs: &[(&str, &[f64])]) -> Vec<(String, Vec<f64>)> {
    pairs.iter().map(|(n, v)| (n.to_string(), v.to_vec())).collect()
}

fn add_calculated(sheet: &mut DataSheet, name: &str, expression: &str) -> String {
    let label = sheet.insert_calculated_column(sheet.num_columns()).unwrap();
    sheet.rename_column(&label, name).unwrap();
    sheet.update_column_expression(&label, expression);
    label
}

#[test]
fn rename_keeps_expressions_working() {
    let mut sheet = DataSheet::new();
    sheet.import_columns(&named(&[("x", &[0.0, 1.0, 2.0, 3.0, 4.0])]));
    let y = add_calculated(&mut sheet, "y", "x ** 2");
    let z = add_calculated(&mut sheet, "z", "x + 1");
    assert_eq!(sheet.column(&y).unwrap(), &[0.0, 1.0, 4.0, 9.0, 16.0]);
    assert_eq!(sheet.column(&z).unwrap(), &[1.0, 2.0, 3.0, 4.0, 5.0]);
    assert!(sheet.is_column_valid(&z));

    sheet.rename_column("col1", "time").unwrap();
    assert_eq!(sheet.column_expression(&z).as_deref(), Some("time + 1"));
    assert_eq!(sheet.column_expression(&y).as_deref(), Some("time ** 2"));
    assert_eq!(sheet.column(&z).unwrap(), &[1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(sheet.snapshot().calculated_column_expression[&z].as_deref(), Some("col1 + 1"));
}

#[test]
fn invalid_columns_cascade() {
    let mut sheet = DataSheet::new();
    sheet.import_columns(&named(&[("a", &[1.0, 2.0, 4.0])]));
    let b = add_calculated(&mut sheet, "b", "1 / a");
    let c = add_calculated(&mut sheet, "c", "b + 1");
    assert_eq!(sheet.column(&c).unwrap(), &[2.0, 1.5, 1.25]);

    sheet.set_value(1, "col1", 0.0).unwrap();
    assert!(!sheet.is_column_valid(&b));
    assert!(!sheet.is_column_valid(&c));

    sheet.set_value(1, "col1", 2.0).unwrap();
    assert!(sheet.is_column_valid(&b));
    assert!(sheet.is_column_valid(&c));
}

#[test]
fn move_column_reorders() {
    let mut sheet = DataSheet::new();
    sheet.insert_columns(0, 4).unwrap();
    sheet.move_column(0, 2).unwrap();
    assert_eq!(sheet.column_labels(), vec!["col2", "col3", "col1", "col4"]);
}

#[test]
fn moving_a_source_right_of_its_user_invalidates_it() {
    let mut sheet = DataSheet::new();
    sheet.import_columns(&named(&[("x", &[1.0, 2.0])]));
    let y = add_calculated(&mut sheet, "y", "x * 10");
    assert!(sheet.is_column_valid(&y));

    sheet.move_column(0, 1).unwrap();
    assert!(!sheet.is_column_valid(&y));
    sheet.move_column(1, 0).unwrap();
    assert!(sheet.is_column_valid(&y));
    assert_eq!(sheet.column(&y).unwrap(), &[10.0, 20.0]);
}

#[test]
fn fit_follows_data_through_calculated_columns() {
    let mut sheet = DataSheet::new();
    sheet.import_columns(&named(&[("x", &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0])]));
    let y = add_calculated(&mut sheet, "y", "2 * x");

    let mut model = FitModel::new(&sheet, "col1", &y, None, None).unwrap();
    model.update_model_expression(&sheet, "a * x + b").unwrap();
    model.perform_fit(&sheet).unwrap();
    let fit = model.best_fit().unwrap();
    assert!((fit.value("a").unwrap() - 2.0).abs() < 1e-6);
    assert!(fit.value("b").unwrap().abs() < 1e-6);

    let ends = model.evaluate_best_fit(&[0.0, 6.0]).unwrap();
    assert!(ends[0].abs() < 1e-6);
    assert!((ends[1] - 12.0).abs() < 1e-6);
    assert!(model.verify_best_fit_data(&sheet));

    // a change upstream reaches the fitted column and makes the fit stale
    sheet.set_value(3, "col1", 3.5).unwrap();
    assert_eq!(sheet.column(&y).unwrap()[3], 7.0);
    assert!(!model.verify_best_fit_data(&sheet));
    assert!(model.best_fit().is_none());
}

#[test]
fn model_expression_follows_renames() {
    let mut sheet = DataSheet::new();
    sheet.import_columns(&named(&[("x", &[0.0, 1.0, 2.0]), ("y", &[1.0, 2.0, 3.0])]));
    let mut model = FitModel::new(&sheet, "col1", "col2", None, None).unwrap();
    model.update_model_expression(&sheet, "a * x + b").unwrap();
    model.perform_fit(&sheet).unwrap();

    sheet.rename_column("col1", "t").unwrap();
    assert_eq!(model.model_expression(&sheet).as_deref(), Some("a * t + b"));
    assert_eq!(model.x_col_name(&sheet), Some("t"));
    assert!(model.verify_best_fit_data(&sheet));
}

#[test]
fn snapshots_restore_sheet_and_model() {
    let mut sheet = DataSheet::new();
    sheet.import_columns(&named(&[("x", &[1.0, 2.0, 3.0, 4.0])]));
    let y = add_calculated(&mut sheet, "y", "3 * x - 1");
    let mut model = FitModel::new(&sheet, "col1", &y, None, None).unwrap();
    model.update_model_expression(&sheet, "m * x + c").unwrap();
    model.perform_fit(&sheet).unwrap();

    let sheet_json = sheet.snapshot().to_json().unwrap();
    let model_json = serde_json::to_string(&model.snapshot()).unwrap();

    let restored = DataSheet::from_snapshot(
        &tailor_core::SheetSnapshot::from_json(&sheet_json).unwrap(),
        tailor_core::Evaluator::new(),
    )
    .unwrap();
    let restored_model =
        FitModel::from_snapshot(&serde_json::from_str(&model_json).unwrap(), &restored).unwrap();
    let m = restored_model.best_fit().unwrap().value("m").unwrap();
    assert!((m - 3.0).abs() < 1e-6);
    assert_eq!(restored.column(&y).unwrap(), &[2.0, 5.0, 8.0, 11.0]);
}
