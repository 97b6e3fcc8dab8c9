//! Market data leaves: raw values that need no function invocation.

use crate::model::{TargetRef, Value, ValueRequirement, ValueSpecification};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Source of raw market data keyed by target and value name.
///
/// Storage and retrieval live outside the engine; this is the boundary the
/// resolver and dispatcher see. A raw datum carries no properties, so only
/// requirements whose constraints tolerate a property-less producer bind to
/// a leaf.
pub trait MarketDataSource: Send + Sync {
    /// The concrete specification of an available datum satisfying
    /// `requirement`, if any.
    fn lookup(&self, requirement: &ValueRequirement) -> Option<ValueSpecification>;

    /// The payload for a specification previously returned by `lookup`.
    fn value(&self, spec: &ValueSpecification) -> Option<Value>;
}

/// In-memory market data, used by tests and demo wiring.
#[derive(Default)]
pub struct InMemoryMarketData {
    data: RwLock<HashMap<(TargetRef, String), Value>>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, target: TargetRef, value_name: impl Into<String>, value: Value) {
        self.data.write().insert((target, value_name.into()), value);
    }
}

impl MarketDataSource for InMemoryMarketData {
    fn lookup(&self, requirement: &ValueRequirement) -> Option<ValueSpecification> {
        let key = (requirement.target.clone(), requirement.value_name.clone());
        if !self.data.read().contains_key(&key) {
            return None;
        }
        let spec = ValueSpecification::raw(requirement.target.clone(), &requirement.value_name);
        requirement.is_satisfied_by(&spec).then_some(spec)
    }

    fn value(&self, spec: &ValueSpecification) -> Option<Value> {
        let key = (spec.target.clone(), spec.value_name.clone());
        self.data.read().get(&key).cloned()
    }
}
