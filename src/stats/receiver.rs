//! Receiving side: merges transmitted batches into the cost store.

use super::cost::FunctionCostStore;
use super::wire::{EngineMessage, StatisticsBatch};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// How many applied batch ids are remembered for duplicate detection.
const SEEN_BATCH_CAPACITY: usize = 1024;

struct SeenBatches {
    ids: HashSet<u64>,
    order: VecDeque<u64>,
}

impl SeenBatches {
    fn new() -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns false when the id was already present.
    fn insert(&mut self, id: u64) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_BATCH_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        true
    }
}

/// Applies statistics batches to the shared cost store.
///
/// Records are applied in batch order, each as a pure additive merge.
/// Recently applied batch ids are remembered so an exact duplicate
/// delivery is dropped instead of double-counted. A transport that
/// re-sends records under a fresh batch id still inflates the aggregates;
/// that risk is documented rather than hidden (see DESIGN.md).
pub struct InvocationStatisticsReceiver {
    store: Arc<FunctionCostStore>,
    seen: Mutex<SeenBatches>,
}

impl InvocationStatisticsReceiver {
    pub fn new(store: Arc<FunctionCostStore>) -> Self {
        Self {
            store,
            seen: Mutex::new(SeenBatches::new()),
        }
    }

    /// Handle one message from the transport.
    pub fn message_received(&self, message: EngineMessage) {
        match message {
            EngineMessage::Statistics(batch) => self.apply(batch),
        }
    }

    fn apply(&self, batch: StatisticsBatch) {
        if !self.seen.lock().insert(batch.batch_id) {
            warn!(batch_id = batch.batch_id, "duplicate statistics batch ignored");
            return;
        }
        debug!(
            batch_id = batch.batch_id,
            records = batch.records.len(),
            "applying statistics batch"
        );
        for record in batch.records {
            self.store.record(
                &record.key,
                record.count,
                record.invocation_time_cost,
                record.data_input_cost,
                record.data_output_cost,
            );
        }
    }
}
