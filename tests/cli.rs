//! Integration tests for the `tailor` command line.

use std::path::PathBuf;
use std::process::Command;

fn temp_csv(name: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("tailor_cli_{}_{}.csv", std::process::id(), name));
    std::fs::write(&path, content).expect("write temp csv");
    path
}

fn run(args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_tailor"))
        // Tests must not depend on a user's ~/.config/tailor/default.rhai.
        .arg("--no-default-functions")
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute tailor");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code().unwrap_or(-1);
    (stdout, stderr, exit_code)
}

#[test]
fn test_prints_sheet() {
    let csv = temp_csv("prints", "x,y\n0,0\n1,1\n2,4\n");
    let (stdout, _, code) = run(&[csv.to_str().unwrap()]);
    assert_eq!(code, 0);
    assert_eq!(stdout, "| x | y |\n|---|---|\n| 0 | 0 |\n| 1 | 1 |\n| 2 | 4 |\n");
}

#[test]
fn test_calculated_columns() {
    let csv = temp_csv("calc", "x\n0\n1\n2\n3\n4\n");
    let (stdout, _, code) = run(&[csv.to_str().unwrap(), "-c", "y=x**2", "-c", "z = y + 1"]);
    assert_eq!(code, 0);
    assert!(stdout.starts_with("| x | y | z |\n"), "{}", stdout);
    assert!(stdout.contains("| 4 | 16 | 17 |"), "{}", stdout);
}

#[test]
fn test_invalid_column_is_reported() {
    let csv = temp_csv("invalid", "a\n1\n0\n");
    let (stdout, _, code) = run(&[csv.to_str().unwrap(), "-c", "b=1/a", "-c", "c=b+1"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("b = 1 / a:"), "{}", stdout);
    assert!(stdout.contains("c = b + 1:"), "{}", stdout);
}

#[test]
fn test_fit_linear() {
    let csv = temp_csv("fit", "t,v\n0,0\n1,2\n2,4\n3,6\n");
    let (stdout, stderr, code) = run(&[
        csv.to_str().unwrap(),
        "--fit",
        "a * t + b",
        "--x",
        "t",
        "--y",
        "v",
    ]);
    assert_eq!(code, 0, "{}", stderr);
    assert!(stdout.contains("[[Model]]\n    v = a * t + b\n"), "{}", stdout);
    assert!(stdout.contains("# data points      = 4"), "{}", stdout);
    assert!(stdout.contains("a:  2 "), "{}", stdout);
}

#[test]
fn test_fit_with_fixed_parameter() {
    let csv = temp_csv("fixed", "t,v\n0,1\n1,3\n2,5\n");
    let (stdout, stderr, code) = run(&[
        csv.to_str().unwrap(),
        "--fit",
        "a * t + b",
        "--x",
        "t",
        "--y",
        "v",
        "-p",
        "b=1",
        "--fix",
        "b",
    ]);
    assert_eq!(code, 0, "{}", stderr);
    assert!(stdout.contains("b:  1 (fixed)"), "{}", stdout);
}

#[test]
fn test_fit_unknown_column_fails() {
    let csv = temp_csv("unknown", "t,v\n0,1\n");
    let (_, stderr, code) = run(&[csv.to_str().unwrap(), "--fit", "a * t", "--x", "t", "--y", "w"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("unknown column 'w'"), "{}", stderr);
}

#[test]
fn test_fit_requires_columns() {
    let csv = temp_csv("requires", "t,v\n0,1\n");
    let (_, _, code) = run(&[csv.to_str().unwrap(), "--fit", "a * t"]);
    assert_eq!(code, 2);
}

#[test]
fn test_output_csv() {
    let csv = temp_csv("output_in", "x;y\n1;2\n3;4\n");
    let out = std::env::temp_dir().join(format!("tailor_cli_{}_output_out.csv", std::process::id()));
    let (_, _, code) = run(&[
        csv.to_str().unwrap(),
        "-d",
        ";",
        "-c",
        "s=x+y",
        "-o",
        out.to_str().unwrap(),
    ]);
    assert_eq!(code, 0);
    let written = std::fs::read_to_string(&out).unwrap();
    let _ = std::fs::remove_file(&out);
    assert_eq!(written, "x;y;s\n1;2;3\n3;4;7\n");
}
