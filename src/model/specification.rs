//! Concrete value descriptors and the templates they are specialized from.

use super::requirement::{TargetRef, ValueRequirement};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The exact descriptor of a value as one function produces it.
///
/// Unlike a requirement, every property maps to a single concrete value;
/// a specification is produced by exactly one function invocation (or by a
/// raw market datum, which carries no properties at all).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueSpecification {
    pub target: TargetRef,
    pub value_name: String,
    pub properties: BTreeMap<String, String>,
}

impl ValueSpecification {
    pub fn new(
        target: TargetRef,
        value_name: impl Into<String>,
        properties: BTreeMap<String, String>,
    ) -> Self {
        Self {
            target,
            value_name: value_name.into(),
            properties,
        }
    }

    /// A property-less specification, the shape of a raw market datum.
    pub fn raw(target: TargetRef, value_name: impl Into<String>) -> Self {
        Self::new(target, value_name, BTreeMap::new())
    }
}

impl fmt::Display for ValueSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.target, self.value_name)
    }
}

/// One property of a declared output template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateProperty {
    Concrete(String),
    /// Bound only once the template is matched against a concrete requirement.
    Wildcard,
}

/// A declared output whose properties may still contain wildcards.
///
/// Functions advertise templates; the resolver specializes them against the
/// requirement in hand to obtain the concrete [`ValueSpecification`] the
/// function will be asked to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecificationTemplate {
    pub target: TargetRef,
    pub value_name: String,
    pub properties: BTreeMap<String, TemplateProperty>,
}

impl SpecificationTemplate {
    pub fn new(target: TargetRef, value_name: impl Into<String>) -> Self {
        Self {
            target,
            value_name: value_name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties
            .insert(name.into(), TemplateProperty::Concrete(value.into()));
        self
    }

    pub fn with_wildcard(mut self, name: impl Into<String>) -> Self {
        self.properties.insert(name.into(), TemplateProperty::Wildcard);
        self
    }

    /// Resolve this template against a concrete requirement.
    ///
    /// Concrete template properties must be acceptable to the requirement.
    /// Wildcard properties bind to the smallest acceptable value of the
    /// matching constraint; when the requirement leaves them unconstrained
    /// they are omitted from the result. Returns `None` when the template
    /// cannot satisfy the requirement at all.
    pub fn specialize(&self, requirement: &ValueRequirement) -> Option<ValueSpecification> {
        if self.target != requirement.target || self.value_name != requirement.value_name {
            return None;
        }
        let mut properties = BTreeMap::new();
        for (name, property) in &self.properties {
            match property {
                TemplateProperty::Concrete(value) => {
                    if let Some(constraint) = requirement.constraints.get(name) {
                        if !constraint.accepts(value) {
                            return None;
                        }
                    }
                    properties.insert(name.clone(), value.clone());
                }
                TemplateProperty::Wildcard => {
                    if let Some(constraint) = requirement.constraints.get(name) {
                        if let Some(value) = constraint.smallest() {
                            properties.insert(name.clone(), value.to_string());
                        }
                        // A wildcard constraint leaves the property unpinned.
                    }
                }
            }
        }
        // A constraint on a property the template never declares cannot be met.
        for (name, constraint) in requirement.constraints.iter() {
            if constraint.is_wildcard() {
                continue;
            }
            if !self.properties.contains_key(name) {
                return None;
            }
        }
        Some(ValueSpecification::new(
            requirement.target.clone(),
            self.value_name.clone(),
            properties,
        ))
    }
}
