//! Loading user function libraries from disk.

use crate::error::{Result, TailorError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tailor_engine::{Evaluator, FunctionLibrary};
use tracing::info;

const MAX_FUNCTION_FILE_BYTES: u64 = 1_048_576; // 1 MiB

fn read_functions_file(path: &Path) -> Result<String> {
    let meta = std::fs::metadata(path)?;
    if meta.len() > MAX_FUNCTION_FILE_BYTES {
        return Err(TailorError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "Refusing to read {}: functions file too large ({} bytes, max {})",
                path.display(),
                meta.len(),
                MAX_FUNCTION_FILE_BYTES
            ),
        )));
    }
    Ok(std::fs::read_to_string(path)?)
}

/// Concatenate and compile the given Rhai files into one library.
/// Duplicate paths are loaded once. Returns `None` for an empty list.
pub fn load_function_library(paths: &[PathBuf]) -> Result<Option<FunctionLibrary>> {
    let mut seen: Vec<PathBuf> = Vec::new();
    let mut merged = String::new();
    for path in paths {
        let canonical = std::fs::canonicalize(path)?;
        if seen.contains(&canonical) {
            continue;
        }
        let content = read_functions_file(&canonical)?;
        if !merged.is_empty() {
            merged.push_str("\n\n");
        }
        merged.push_str(&content);
        info!(path = %canonical.display(), "loaded functions file");
        seen.push(canonical);
    }
    if seen.is_empty() {
        return Ok(None);
    }
    Ok(Some(FunctionLibrary::compile(&merged)?))
}

/// Evaluator with the functions from `paths` (built-ins only if empty).
pub fn evaluator_with_functions(paths: &[PathBuf]) -> Result<Evaluator> {
    Ok(match load_function_library(paths)? {
        Some(library) => Evaluator::with_library(Arc::new(library)),
        None => Evaluator::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("tailor_{}_{}_{}", std::process::id(), nanos, name));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_and_merge_files() {
        let a = temp_file("a.rhai", "fn double(x) { x * 2.0 }");
        let b = temp_file("b.rhai", "fn half(x) { x / 2.0 }");
        let library = load_function_library(&[a.clone(), b.clone(), a.clone()])
            .unwrap()
            .unwrap();
        assert_eq!(library.function_names(), vec!["double", "half"]);
        let _ = std::fs::remove_file(a);
        let _ = std::fs::remove_file(b);
    }

    #[test]
    fn test_no_files_means_no_library() {
        assert!(load_function_library(&[]).unwrap().is_none());
        assert!(evaluator_with_functions(&[]).unwrap().library().is_none());
    }

    #[test]
    fn test_compile_error_is_reported() {
        let path = temp_file("broken.rhai", "fn broken( {");
        let err = load_function_library(&[path.clone()]).unwrap_err();
        assert!(matches!(err, TailorError::Expr(_)));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_rejects_oversized_file() {
        let path = temp_file("big.rhai", &" ".repeat(MAX_FUNCTION_FILE_BYTES as usize + 1));
        let err = load_function_library(&[path.clone()]).unwrap_err();
        assert!(err.to_string().contains("too large"));
        let _ = std::fs::remove_file(path);
    }
}
