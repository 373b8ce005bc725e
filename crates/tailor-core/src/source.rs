//! Column providers consumed by fit models.

use tailor_engine::Evaluator;

/// Read access to labeled columns.
///
/// [`crate::DataSheet`] implements this; fit models only ever read through
/// it, so they can be bound to any column provider.
pub trait DataSource {
    /// Values of the column with `label`, or `None` if there is no such column.
    fn column_values(&self, label: &str) -> Option<&[f64]>;

    /// Current display name of the column with `label`.
    fn column_name(&self, label: &str) -> Option<&str>;

    /// Evaluator (built-ins plus user functions) used by this source.
    fn evaluator(&self) -> &Evaluator;
}
