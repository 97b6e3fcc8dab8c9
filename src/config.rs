//! Engine configuration options.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Recognized engine options.
///
/// All fields have working defaults; deserializing a partial document fills
/// the rest from [`EngineConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interval between automatic statistics flushes.
    pub update_period: Duration,
    /// Cost assumed for a function with no recorded statistics.
    pub default_cost_estimate: f64,
    /// How many times a node is re-dispatched after a worker failure or
    /// timeout before it is marked failed.
    pub max_retries: u32,
    /// Per-node execution timeout; expiry follows the worker-failure path.
    pub execution_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            update_period: Duration::from_secs(1),
            default_cost_estimate: 1.0,
            max_retries: 3,
            execution_timeout: Duration::from_secs(30),
        }
    }
}
