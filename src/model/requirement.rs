//! Requested values and the rules a producer must meet.

use super::properties::{Constraint, ValueProperties};
use super::specification::ValueSpecification;
use crate::id::UniqueId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The entity a value is computed for (a trade, a position, a curve).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetRef(pub UniqueId);

impl TargetRef {
    pub fn new(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self(UniqueId::new(scheme, value))
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A request for a named value on a target.
///
/// `constraints` narrows which producers are acceptable: each named property
/// must either be unconstrained or carry a value inside the acceptable set.
/// Equality and hashing are structural, so a requirement can key the
/// resolver's memo table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueRequirement {
    pub target: TargetRef,
    pub value_name: String,
    pub constraints: ValueProperties,
}

impl ValueRequirement {
    /// An unconstrained requirement.
    pub fn new(target: TargetRef, value_name: impl Into<String>) -> Self {
        Self {
            target,
            value_name: value_name.into(),
            constraints: ValueProperties::none(),
        }
    }

    pub fn with_constraints(
        target: TargetRef,
        value_name: impl Into<String>,
        constraints: ValueProperties,
    ) -> Self {
        Self {
            target,
            value_name: value_name.into(),
            constraints,
        }
    }

    /// True iff `spec` satisfies this requirement: same target and value
    /// name, and every constrained property present with an acceptable
    /// value. Unconstrained properties impose nothing; a specification
    /// missing a constrained property does not satisfy.
    pub fn is_satisfied_by(&self, spec: &ValueSpecification) -> bool {
        if spec.target != self.target || spec.value_name != self.value_name {
            return false;
        }
        self.constraints.iter().all(|(name, constraint)| {
            if constraint.is_wildcard() {
                return true;
            }
            spec.properties
                .get(name)
                .map_or(false, |value| constraint.accepts(value))
        })
    }
}

impl fmt::Display for ValueRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.target, self.value_name)?;
        if !self.constraints.is_empty() {
            write!(f, "{{")?;
            for (i, (name, constraint)) in self.constraints.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                match constraint {
                    Constraint::Exact(v) => write!(f, "{}={}", name, v)?,
                    Constraint::AnyOf(set) => {
                        let values: Vec<&str> = set.iter().map(|s| s.as_str()).collect();
                        write!(f, "{}=[{}]", name, values.join("|"))?
                    }
                    Constraint::Any => write!(f, "{}=*", name)?,
                }
            }
            write!(f, "}}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec(properties: &[(&str, &str)]) -> ValueSpecification {
        let properties: BTreeMap<String, String> = properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ValueSpecification {
            target: TargetRef::new("Trade", "1"),
            value_name: "FairValue".into(),
            properties,
        }
    }

    #[test]
    fn test_unconstrained_requirement_accepts_any_producer() {
        let req = ValueRequirement::new(TargetRef::new("Trade", "1"), "FairValue");
        assert!(req.is_satisfied_by(&spec(&[("Currency", "USD")])));
        assert!(req.is_satisfied_by(&spec(&[])));
    }

    #[test]
    fn test_constrained_property_must_be_present_and_acceptable() {
        let req = ValueRequirement::with_constraints(
            TargetRef::new("Trade", "1"),
            "FairValue",
            ValueProperties::builder().with("Currency", "USD").build(),
        );
        assert!(req.is_satisfied_by(&spec(&[("Currency", "USD")])));
        assert!(!req.is_satisfied_by(&spec(&[("Currency", "EUR")])));
        // Missing the constrained property is a non-match, not a wildcard.
        assert!(!req.is_satisfied_by(&spec(&[])));
    }

    #[test]
    fn test_target_and_name_must_match() {
        let req = ValueRequirement::new(TargetRef::new("Trade", "2"), "FairValue");
        assert!(!req.is_satisfied_by(&spec(&[])));
        let req = ValueRequirement::new(TargetRef::new("Trade", "1"), "PresentValue");
        assert!(!req.is_satisfied_by(&spec(&[])));
    }

    #[test]
    fn test_display_includes_constraints() {
        let req = ValueRequirement::with_constraints(
            TargetRef::new("Trade", "1"),
            "FairValue",
            ValueProperties::builder()
                .with("Currency", "USD")
                .with_any("CurveName")
                .build(),
        );
        assert_eq!(
            req.to_string(),
            "Trade::1/FairValue{Currency=USD,CurveName=*}"
        );
    }
}
