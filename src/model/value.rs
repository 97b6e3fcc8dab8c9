//! Computed value payloads.

use std::sync::Arc;

/// The atomic unit of data moved between function invocations.
///
/// Scalar math happens without heap allocation; series are shared by
/// reference so fan-out to several consumers never copies the data.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Series(Arc<Vec<f64>>),
}

impl Value {
    pub fn series(values: Vec<f64>) -> Self {
        Value::Series(Arc::new(values))
    }

    /// Number of f64 slots; doubles as the data-size cost of the payload.
    pub fn len(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Series(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            Value::Series(s) if s.len() == 1 => Some(s[0]),
            Value::Series(_) => None,
        }
    }

    /// Materialize as a vector, cloning scalars at the boundary.
    pub fn to_vec(&self) -> Vec<f64> {
        match self {
            Value::Scalar(v) => vec![*v],
            Value::Series(s) => s.to_vec(),
        }
    }
}
