//! tailor-core - column store, recalculation and fit models.

pub mod error;
pub mod fit;
pub mod sheet;
pub mod source;
pub mod storage;

pub use error::{FitError, ModelError, Result, TailorError};
pub use fit::{BestFit, FitModel, FitModelSnapshot, FitOptions};
pub use sheet::{DataSheet, SheetSnapshot};
pub use source::DataSource;

pub use tailor_engine::Evaluator;
