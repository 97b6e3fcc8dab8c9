//! Cost statistics: recording, propagation and aggregation.

pub mod cost;
pub mod receiver;
pub mod sender;
pub mod wire;

pub use cost::{CostEstimate, CostKey, FunctionCost, FunctionCostStore};
pub use receiver::InvocationStatisticsReceiver;
pub use sender::{InvocationStatisticsSender, MessageSender, TransportError};
pub use wire::{EngineMessage, InvocationRecord, StatisticsBatch, WireError};
