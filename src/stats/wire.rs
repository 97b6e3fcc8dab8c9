//! Closed wire format for engine messages.

use super::cost::CostKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One key's observed costs: the unit merged additively into the store.
///
/// Merging is a pure sum of the count and the three totals, so applying
/// records is commutative and associative. At-least-once delivery of a
/// batch therefore double-counts; at-most-once delivery only leaves
/// estimates temporarily stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub key: CostKey,
    pub count: u64,
    pub invocation_time_cost: f64,
    pub data_input_cost: f64,
    pub data_output_cost: f64,
}

/// One transmitted batch of records, applied in order by the receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsBatch {
    /// Lets a receiver recognize and drop an exact duplicate delivery.
    pub batch_id: u64,
    pub records: Vec<InvocationRecord>,
}

/// Every message shape the engine puts on the wire.
///
/// The `type` field is the discriminant: decoding is a direct match over a
/// compile-time-known set of shapes, never trial-and-error against
/// candidate types. Job dispatch to remote workers travels over a separate
/// channel outside this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineMessage {
    Statistics(StatisticsBatch),
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("message encode failed: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("message decode failed: {0}")]
    Decode(#[source] serde_json::Error),
}

pub fn encode(message: &EngineMessage) -> Result<Vec<u8>, WireError> {
    serde_json::to_vec(message).map_err(WireError::Encode)
}

pub fn decode(bytes: &[u8]) -> Result<EngineMessage, WireError> {
    serde_json::from_slice(bytes).map_err(WireError::Decode)
}
