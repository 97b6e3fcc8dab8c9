//! The contract a calculation function satisfies.

use crate::model::{SpecificationTemplate, TargetRef, Value, ValueRequirement, ValueSpecification};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifier of a registered function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(pub String);

impl FunctionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FunctionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Dispatch preference among functions able to produce the same value.
/// Higher wins.
pub type FunctionPriority = i32;

/// A function invocation raised an error at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FunctionError {
    pub message: String,
}

impl FunctionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A registered computation unit.
///
/// Implementations declare what they can produce for a target and, given the
/// concrete output they were chosen for, which inputs they need. Input
/// requirements may themselves contain wildcards that only bind once the
/// chosen output is concrete. The numerical content of `invoke` is outside
/// the engine.
pub trait EngineFunction: Send + Sync {
    fn id(&self) -> FunctionId;

    fn priority(&self) -> FunctionPriority {
        0
    }

    fn applies_to(&self, target: &TargetRef) -> bool;

    /// Output templates this function offers for `target`.
    fn produces(&self, target: &TargetRef) -> Vec<SpecificationTemplate>;

    /// Input requirements, given the concrete output to produce.
    fn requires(
        &self,
        target: &TargetRef,
        chosen_output: &ValueSpecification,
    ) -> Vec<ValueRequirement>;

    /// Execute against materialized inputs, ordered as `requires` declared
    /// them.
    fn invoke(&self, target: &TargetRef, inputs: &[Value]) -> Result<Value, FunctionError>;
}
