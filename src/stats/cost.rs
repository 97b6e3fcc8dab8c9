//! Running per-function cost aggregates.

use crate::registry::FunctionId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Key of one cost series: the function and the shape of its input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CostKey {
    pub function: FunctionId,
    pub input_key: String,
}

impl CostKey {
    pub fn new(function: impl Into<FunctionId>, input_key: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            input_key: input_key.into(),
        }
    }
}

/// Average costs derived from an aggregate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub invocation: f64,
    pub data_input: f64,
    pub data_output: f64,
}

/// Monotonically increasing aggregate for one key.
///
/// The f64 totals are stored as bit patterns and accumulated with a
/// compare-exchange loop; readers never block writers and vice versa.
/// Entries are created lazily and never deleted during the process
/// lifetime.
#[derive(Debug, Default)]
pub struct FunctionCost {
    invocation_count: AtomicU64,
    invocation_time: AtomicU64,
    data_input: AtomicU64,
    data_output: AtomicU64,
}

impl FunctionCost {
    fn add_f64(cell: &AtomicU64, delta: f64) {
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match cell.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn record(
        &self,
        count: u64,
        invocation_time_cost: f64,
        data_input_cost: f64,
        data_output_cost: f64,
    ) {
        Self::add_f64(&self.invocation_time, invocation_time_cost);
        Self::add_f64(&self.data_input, data_input_cost);
        Self::add_f64(&self.data_output, data_output_cost);
        // Count last: a reader seeing the new count sees totals at least
        // as fresh.
        self.invocation_count.fetch_add(count, Ordering::Release);
    }

    pub fn invocation_count(&self) -> u64 {
        self.invocation_count.load(Ordering::Acquire)
    }

    /// `None` until the first observation lands; the dispatcher substitutes
    /// the configured default cost, never a guess.
    pub fn estimate(&self) -> Option<CostEstimate> {
        let count = self.invocation_count();
        if count == 0 {
            return None;
        }
        let n = count as f64;
        Some(CostEstimate {
            invocation: f64::from_bits(self.invocation_time.load(Ordering::Relaxed)) / n,
            data_input: f64::from_bits(self.data_input.load(Ordering::Relaxed)) / n,
            data_output: f64::from_bits(self.data_output.load(Ordering::Relaxed)) / n,
        })
    }
}

/// Store of all aggregates, shared between the statistics receiver and the
/// dispatcher. The map lock is held only for lookup and insertion; the
/// arithmetic happens on the per-key atomics.
#[derive(Debug, Default)]
pub struct FunctionCostStore {
    entries: RwLock<HashMap<CostKey, Arc<FunctionCost>>>,
}

impl FunctionCostStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The aggregate for `key`, created on first use.
    pub fn entry(&self, key: &CostKey) -> Arc<FunctionCost> {
        if let Some(entry) = self.entries.read().get(key) {
            return entry.clone();
        }
        self.entries.write().entry(key.clone()).or_default().clone()
    }

    pub fn record(
        &self,
        key: &CostKey,
        count: u64,
        invocation_time_cost: f64,
        data_input_cost: f64,
        data_output_cost: f64,
    ) {
        self.entry(key)
            .record(count, invocation_time_cost, data_input_cost, data_output_cost);
    }

    pub fn estimate(&self, key: &CostKey) -> Option<CostEstimate> {
        self.entries.read().get(key).and_then(|e| e.estimate())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
