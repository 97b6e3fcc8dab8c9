//! Per-property acceptance rules attached to a requirement.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The acceptance rule for a single named property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constraint {
    /// Exactly one acceptable value.
    Exact(String),
    /// Any member of a finite set of alternatives.
    AnyOf(BTreeSet<String>),
    /// Wildcard: any concrete value is acceptable.
    Any,
}

impl Constraint {
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            Constraint::Exact(v) => v == value,
            Constraint::AnyOf(set) => set.contains(value),
            Constraint::Any => true,
        }
    }

    /// The smallest acceptable value, or `None` for a wildcard.
    ///
    /// This is the deterministic choice used when a producer's wildcard
    /// property is bound against this constraint.
    pub fn smallest(&self) -> Option<&str> {
        match self {
            Constraint::Exact(v) => Some(v.as_str()),
            Constraint::AnyOf(set) => set.iter().next().map(|s| s.as_str()),
            Constraint::Any => None,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Constraint::Any)
    }
}

/// Named constraints attached to a requirement.
///
/// Backed by a `BTreeMap` so that equality, hashing and iteration order are
/// structural and independent of insertion order; requirements are used as
/// map keys throughout the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ValueProperties {
    constraints: BTreeMap<String, Constraint>,
}

impl ValueProperties {
    /// No constraints at all.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn builder() -> ValuePropertiesBuilder {
        ValuePropertiesBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Constraint> {
        self.constraints.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Constraint)> {
        self.constraints.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ValuePropertiesBuilder {
    constraints: BTreeMap<String, Constraint>,
}

impl ValuePropertiesBuilder {
    /// Require `name` to be exactly `value`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints
            .insert(name.into(), Constraint::Exact(value.into()));
        self
    }

    /// Require `name` to be one of `values`.
    pub fn with_any_of<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = values.into_iter().map(Into::into).collect();
        self.constraints.insert(name.into(), Constraint::AnyOf(set));
        self
    }

    /// Accept any concrete value for `name`.
    pub fn with_any(mut self, name: impl Into<String>) -> Self {
        self.constraints.insert(name.into(), Constraint::Any);
        self
    }

    pub fn build(self) -> ValueProperties {
        ValueProperties {
            constraints: self.constraints,
        }
    }
}
