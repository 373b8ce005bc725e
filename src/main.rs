//! Tailor - calculated columns and curve fitting for CSV data

mod config;
mod report;

use anyhow::{Context, Result, anyhow, bail};
use clap::{ArgAction, Parser, ValueHint};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tailor_core::storage::{CsvFormat, evaluator_with_functions, read_csv, write_csv};
use tailor_core::{DataSheet, FitModel};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Calculated columns and curve fitting for CSV data", long_about = None)]
struct Cli {
    /// CSV file to load
    #[arg(value_hint = ValueHint::FilePath)]
    csv: PathBuf,

    /// Field delimiter (`\t` for tab)
    #[arg(short, long, default_value = ",", value_parser = parse_delimiter)]
    delimiter: char,

    /// First row is data, not column names
    #[arg(long, action = ArgAction::SetTrue)]
    no_header: bool,

    /// Append a calculated column (repeatable)
    #[arg(short = 'c', long = "column", value_name = "NAME=EXPR", value_parser = parse_assignment)]
    columns: Vec<(String, String)>,

    /// Load a Rhai function library (repeatable)
    #[arg(short = 'f', long = "functions", value_name = "FILE", value_hint = ValueHint::FilePath)]
    functions: Vec<PathBuf>,

    /// Do not load default.rhai from the config dir
    #[arg(long, action = ArgAction::SetTrue)]
    no_default_functions: bool,

    /// Fit MODEL to the --x/--y columns
    #[arg(long, value_name = "MODEL", requires_all = ["x", "y"])]
    fit: Option<String>,

    /// Independent variable column
    #[arg(long, value_name = "NAME")]
    x: Option<String>,

    /// Dependent variable column
    #[arg(long, value_name = "NAME")]
    y: Option<String>,

    /// Column with x errors
    #[arg(long, value_name = "NAME")]
    x_err: Option<String>,

    /// Column with y errors (fit weights are 1 / error)
    #[arg(long, value_name = "NAME")]
    y_err: Option<String>,

    /// Initial parameter value (repeatable)
    #[arg(short = 'p', long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    params: Vec<(String, f64)>,

    /// Keep a parameter fixed (repeatable)
    #[arg(long = "fix", value_name = "NAME")]
    fixed: Vec<String>,

    /// Only fit rows with MIN <= x <= MAX (either side may be empty)
    #[arg(long, value_name = "MIN:MAX", value_parser = parse_domain)]
    domain: Option<(Option<f64>, Option<f64>)>,

    /// Write the resulting sheet as CSV
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Configuration file (default: <config dir>/tailor/config.toml)
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_delimiter(s: &str) -> Result<char, String> {
    match s {
        "\\t" | "tab" => Ok('\t'),
        _ => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(format!("delimiter must be a single character, got '{}'", s)),
            }
        }
    }
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing name in '{}'", s));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_param(s: &str) -> Result<(String, f64), String> {
    let (name, value) = parse_assignment(s)?;
    let value = value
        .parse()
        .map_err(|_| format!("'{}' is not a number", value))?;
    Ok((name, value))
}

fn parse_bound(s: &str) -> Result<Option<f64>, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    s.parse()
        .map(Some)
        .map_err(|_| format!("'{}' is not a number", s))
}

fn parse_domain(s: &str) -> Result<(Option<f64>, Option<f64>), String> {
    let (min, max) = s
        .split_once(':')
        .ok_or_else(|| format!("expected MIN:MAX, got '{}'", s))?;
    Ok((parse_bound(min)?, parse_bound(max)?))
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let (config, warnings) = config::load_config(cli.config.as_deref());
    for warning in warnings {
        warn!("{}", warning);
    }

    let mut functions = config.functions.files.clone();
    functions.extend(cli.functions.iter().cloned());
    config::prepend_default_functions_if_present(&mut functions, cli.no_default_functions);
    let evaluator = evaluator_with_functions(&functions).context("loading function library")?;

    let format = CsvFormat {
        delimiter: cli.delimiter,
        header: !cli.no_header,
        ..CsvFormat::default()
    };
    let columns = read_csv(&cli.csv, &format)
        .with_context(|| format!("reading {}", cli.csv.display()))?;
    let mut sheet = DataSheet::with_evaluator(evaluator);
    sheet.import_columns(&columns);

    for (name, expression) in &cli.columns {
        let label = sheet.insert_calculated_column(sheet.num_columns())?;
        sheet
            .rename_column(&label, name)
            .with_context(|| format!("adding column '{}'", name))?;
        if !sheet.update_column_expression(&label, expression) {
            debug!(column = %name, "calculated column is not valid");
        }
    }

    let model = match &cli.fit {
        Some(expression) => Some(fit(&cli, &sheet, expression, &config.fit)?),
        None => None,
    };

    let precision = config.output.precision;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    report::write_sheet(&mut out, &sheet, precision)?;
    if let Some(model) = &model {
        writeln!(out)?;
        report::write_fit_report(&mut out, model, &sheet, precision)?;
    }
    out.flush()?;

    if let Some(path) = &cli.output {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        write_csv(&sheet, BufWriter::new(file), cli.delimiter)
            .with_context(|| format!("writing {}", path.display()))?;
        eprintln!("Exported to {}", path.display());
    }
    Ok(())
}

fn column_label(sheet: &DataSheet, name: &str) -> Result<String> {
    sheet
        .label_for_name(name)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("unknown column '{}'", name))
}

fn fit(
    cli: &Cli,
    sheet: &DataSheet,
    expression: &str,
    options: &tailor_core::FitOptions,
) -> Result<FitModel> {
    let (Some(x), Some(y)) = (&cli.x, &cli.y) else {
        bail!("--fit needs --x and --y");
    };
    let x = column_label(sheet, x)?;
    let y = column_label(sheet, y)?;
    let x_err = cli.x_err.as_deref().map(|n| column_label(sheet, n)).transpose()?;
    let y_err = cli.y_err.as_deref().map(|n| column_label(sheet, n)).transpose()?;

    let mut model = FitModel::new(sheet, &x, &y, x_err.as_deref(), y_err.as_deref())?
        .with_options(options.clone());
    model.update_model_expression(sheet, expression)?;
    if let Some(err) = model.model_error() {
        bail!("{}", err);
    }
    for (name, value) in &cli.params {
        model.set_parameter_value(name, *value)?;
    }
    for name in &cli.fixed {
        model.set_parameter_vary(name, false)?;
    }
    if let Some((min, max)) = cli.domain {
        model.set_fit_domain(min, max);
        model.set_fit_domain_enabled(true);
    }
    model.perform_fit(sheet).context("fit failed")?;
    Ok(model)
}
