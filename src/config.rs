//! User configuration (`<config dir>/tailor/config.toml`).

use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tailor_core::FitOptions;

const MAX_CONFIG_FILE_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fit: FitOptions,
    pub output: OutputConfig,
    pub functions: FunctionsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Significant decimals when printing values.
    pub precision: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig { precision: 6 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FunctionsConfig {
    /// Rhai files loaded before any `--functions` file.
    pub files: Vec<PathBuf>,
}

fn config_dir() -> Option<PathBuf> {
    let proj = ProjectDirs::from("", "", "tailor")?;
    Some(proj.config_dir().to_path_buf())
}

pub fn default_functions_path() -> Option<PathBuf> {
    let mut path = config_dir()?;
    path.push("default.rhai");
    Some(path)
}

/// Put `default.rhai` from the config dir in front of `functions` if it exists.
pub fn prepend_default_functions_if_present(functions: &mut Vec<PathBuf>, no_default_functions: bool) {
    if no_default_functions {
        return;
    }
    let Some(path) = default_functions_path() else {
        return;
    };
    if path.is_file() {
        functions.insert(0, path);
    } else {
        tracing::debug!(path = %path.display(), "no default functions file");
    }
}

/// Load the configuration. A missing default file yields the defaults; any
/// problem with a file is returned as a warning and the defaults are used.
pub fn load_config(config_file: Option<&Path>) -> (Config, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();
    let path = config_file
        .map(Path::to_path_buf)
        .or_else(|| config_dir().map(|dir| dir.join("config.toml")));
    let Some(path) = path else {
        return (Config::default(), warnings);
    };

    if !path.exists() {
        if config_file.is_some() {
            warnings.push(format!("Config file not found: {}", path.display()));
        }
        return (Config::default(), warnings);
    }

    let config = match std::fs::metadata(&path) {
        Ok(meta) if meta.len() > MAX_CONFIG_FILE_BYTES => {
            warnings.push(format!(
                "Refusing to read {}: file too large ({} bytes, max {})",
                path.display(),
                meta.len(),
                MAX_CONFIG_FILE_BYTES
            ));
            None
        }
        Ok(_) => match std::fs::read_to_string(&path) {
            Ok(content) => match parse_config(&content) {
                Ok(config) => Some(config),
                Err(err) => {
                    warnings.push(format!("Failed to parse {}: {}", path.display(), err));
                    None
                }
            },
            Err(err) => {
                warnings.push(format!("Failed to read {}: {}", path.display(), err));
                None
            }
        },
        Err(err) => {
            warnings.push(format!(
                "Failed to read metadata for {}: {}",
                path.display(),
                err
            ));
            None
        }
    };
    (config.unwrap_or_default(), warnings)
}

pub fn parse_config(content: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(content)
}
