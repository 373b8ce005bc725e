use serde::{Deserialize, Serialize};

/// A fit parameter: starting value, bounds and whether the fit may change it.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub vary: bool,
}

impl Parameter {
    /// Unbounded, varying parameter starting at 1.
    pub fn new(name: impl Into<String>) -> Self {
        Parameter {
            name: name.into(),
            value: 1.0,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            vary: true,
        }
    }

    /// Starting value clamped into the bounds.
    pub(crate) fn clamped_value(&self) -> f64 {
        if self.min <= self.max {
            self.value.clamp(self.min, self.max)
        } else {
            self.value
        }
    }
}

/// Serializable form of [`Parameter`]; infinite bounds become `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    pub name: String,
    pub value: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub vary: bool,
}

impl From<&Parameter> for ParameterSnapshot {
    fn from(p: &Parameter) -> Self {
        ParameterSnapshot {
            name: p.name.clone(),
            value: p.value,
            min: p.min.is_finite().then_some(p.min),
            max: p.max.is_finite().then_some(p.max),
            vary: p.vary,
        }
    }
}

impl From<&ParameterSnapshot> for Parameter {
    fn from(p: &ParameterSnapshot) -> Self {
        Parameter {
            name: p.name.clone(),
            value: p.value,
            min: p.min.unwrap_or(f64::NEG_INFINITY),
            max: p.max.unwrap_or(f64::INFINITY),
            vary: p.vary,
        }
    }
}
