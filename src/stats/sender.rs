//! Local accumulation and periodic transmission of invocation statistics.

use super::cost::CostKey;
use super::wire::{EngineMessage, InvocationRecord, StatisticsBatch};
use crate::registry::FunctionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender as ShutdownSender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// The transport could not accept a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport send failed: {reason}")]
pub struct TransportError {
    pub reason: String,
}

impl TransportError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Outbound side of the external messaging channel. Assumed reliable and
/// order-preserving per logical link; "delivered or not" is the only
/// acknowledgment semantic.
pub trait MessageSender: Send + Sync {
    fn send(&self, message: EngineMessage) -> Result<(), TransportError>;
}

#[derive(Debug, Default, Clone, Copy)]
struct PendingCost {
    count: u64,
    invocation_time: f64,
    data_input: f64,
    data_output: f64,
}

struct TimerHandle {
    shutdown: ShutdownSender<()>,
    thread: JoinHandle<()>,
}

/// Accumulates observed invocation costs and ships them in batches.
///
/// Recording is non-blocking with respect to the caller's execution path:
/// it only touches the in-memory outbox. A timer thread (or an explicit
/// [`flush`](Self::flush)) drains the outbox into a single ordered batch
/// and hands it to the transport. A failed hand-off is logged and the
/// batch dropped; estimates simply stay stale, the computation path is
/// never blocked or failed.
pub struct InvocationStatisticsSender {
    outbox: Mutex<HashMap<CostKey, PendingCost>>,
    transport: Arc<dyn MessageSender>,
    batch_ids: AtomicU64,
    timer: Mutex<Option<TimerHandle>>,
}

impl InvocationStatisticsSender {
    pub fn new(transport: Arc<dyn MessageSender>) -> Arc<Self> {
        Arc::new(Self {
            outbox: Mutex::new(HashMap::new()),
            transport,
            batch_ids: AtomicU64::new(1),
            timer: Mutex::new(None),
        })
    }

    /// Record `count` invocations under `(function, input_key)`.
    pub fn function_invoked(
        &self,
        function: FunctionId,
        input_key: impl Into<String>,
        count: u64,
        invocation_time_cost: f64,
        data_input_cost: f64,
        data_output_cost: f64,
    ) {
        debug_assert!(count >= 1);
        let key = CostKey::new(function, input_key);
        let mut outbox = self.outbox.lock();
        let slot = outbox.entry(key).or_default();
        slot.count += count;
        slot.invocation_time += invocation_time_cost;
        slot.data_input += data_input_cost;
        slot.data_output += data_output_cost;
    }

    /// Drain the outbox and transmit one batch. Synchronous and
    /// deterministic; a no-op when nothing is pending.
    pub fn flush(&self) {
        let mut drained: Vec<(CostKey, PendingCost)> = {
            let mut outbox = self.outbox.lock();
            if outbox.is_empty() {
                return;
            }
            outbox.drain().collect()
        };
        drained.sort_by(|a, b| a.0.cmp(&b.0));
        let records = drained
            .into_iter()
            .map(|(key, pending)| InvocationRecord {
                key,
                count: pending.count,
                invocation_time_cost: pending.invocation_time,
                data_input_cost: pending.data_input,
                data_output_cost: pending.data_output,
            })
            .collect();
        let batch = StatisticsBatch {
            batch_id: self.batch_ids.fetch_add(1, Ordering::Relaxed),
            records,
        };
        let batch_id = batch.batch_id;
        match self.transport.send(EngineMessage::Statistics(batch)) {
            Ok(()) => debug!(batch_id, "statistics batch transmitted"),
            Err(err) => warn!(batch_id, error = %err, "statistics batch dropped"),
        }
    }

    /// Start the automatic flush timer, firing every `update_period`.
    ///
    /// The thread holds only a weak reference, so dropping the sender
    /// stops the timer at its next tick; [`shutdown`](Self::shutdown)
    /// stops it promptly.
    pub fn start_timer(self: &Arc<Self>, update_period: Duration) {
        let (tx, rx) = mpsc::channel::<()>();
        let weak: Weak<Self> = Arc::downgrade(self);
        let thread = thread::spawn(move || loop {
            match rx.recv_timeout(update_period) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => match weak.upgrade() {
                    Some(sender) => sender.flush(),
                    None => return,
                },
            }
        });
        *self.timer.lock() = Some(TimerHandle {
            shutdown: tx,
            thread,
        });
    }

    /// Stop the timer thread and flush whatever is still pending.
    pub fn shutdown(&self) {
        let handle = self.timer.lock().take();
        if let Some(handle) = handle {
            let _ = handle.shutdown.send(());
            let _ = handle.thread.join();
        }
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::cost::FunctionCostStore;
    use crate::stats::receiver::InvocationStatisticsReceiver;
    use std::sync::atomic::AtomicUsize;

    /// Counts messages and forwards them straight to a receiver.
    struct LoopbackTransport {
        messages: AtomicUsize,
        receiver: InvocationStatisticsReceiver,
    }

    impl LoopbackTransport {
        fn new(store: Arc<FunctionCostStore>) -> Self {
            Self {
                messages: AtomicUsize::new(0),
                receiver: InvocationStatisticsReceiver::new(store),
            }
        }
    }

    impl MessageSender for LoopbackTransport {
        fn send(&self, message: EngineMessage) -> Result<(), TransportError> {
            self.messages.fetch_add(1, Ordering::SeqCst);
            self.receiver.message_received(message);
            Ok(())
        }
    }

    struct FailingTransport;

    impl MessageSender for FailingTransport {
        fn send(&self, _message: EngineMessage) -> Result<(), TransportError> {
            Err(TransportError::new("link down"))
        }
    }

    fn key(function: &str, input_key: &str) -> CostKey {
        CostKey::new(FunctionId::new(function), input_key)
    }

    #[test]
    fn test_flush_is_synchronous_and_skips_empty_outbox() {
        let store = Arc::new(FunctionCostStore::new());
        let transport = Arc::new(LoopbackTransport::new(store.clone()));
        let sender = InvocationStatisticsSender::new(transport.clone());

        sender.flush();
        assert_eq!(transport.messages.load(Ordering::SeqCst), 0);

        sender.function_invoked(FunctionId::new("A"), "1", 1, 2.0, 3.0, 4.0);
        sender.flush();
        assert_eq!(transport.messages.load(Ordering::SeqCst), 1);
        assert!(store.estimate(&key("A", "1")).is_some());

        // Nothing pending any more.
        sender.flush();
        assert_eq!(transport.messages.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_hand_off_never_fails_the_recording_path() {
        let sender = InvocationStatisticsSender::new(Arc::new(FailingTransport));
        sender.function_invoked(FunctionId::new("A"), "1", 1, 2.0, 3.0, 4.0);
        sender.flush();
        // The batch is gone, recording keeps working.
        sender.function_invoked(FunctionId::new("A"), "1", 1, 2.0, 3.0, 4.0);
        sender.flush();
    }

    /// The delivery-pattern scenario: two hot keys recorded across two
    /// timer periods, one bulk key recorded at the end, a forced flush.
    /// Exactly three batches leave the sender, and every estimate matches
    /// the per-unit costs with no loss and no duplication.
    #[test]
    fn test_periodic_batches_plus_final_flush() {
        let store = Arc::new(FunctionCostStore::new());
        let transport = Arc::new(LoopbackTransport::new(store.clone()));
        let sender = InvocationStatisticsSender::new(transport.clone());
        sender.start_timer(Duration::from_millis(100));

        for _ in 0..50 {
            sender.function_invoked(FunctionId::new("A"), "1", 1, 2.0, 3.0, 4.0);
            sender.function_invoked(FunctionId::new("A"), "2", 1, 2.0, 3.0, 4.0);
        }
        // First period boundary ships batch one; later ticks see an empty
        // outbox and stay quiet.
        thread::sleep(Duration::from_millis(400));

        for _ in 0..50 {
            sender.function_invoked(FunctionId::new("A"), "1", 1, 2.0, 3.0, 4.0);
            sender.function_invoked(FunctionId::new("A"), "2", 1, 2.0, 3.0, 4.0);
        }
        thread::sleep(Duration::from_millis(400));

        sender.function_invoked(FunctionId::new("A"), "3", 300, 300.0 * 4.0, 300.0 * 5.0, 300.0 * 6.0);
        sender.shutdown();

        assert_eq!(transport.messages.load(Ordering::SeqCst), 3);

        let estimate = store.estimate(&key("A", "1")).unwrap();
        assert!((estimate.invocation - 2.0).abs() < 1e-5);
        assert!((estimate.data_input - 3.0).abs() < 1e-5);
        assert!((estimate.data_output - 4.0).abs() < 1e-5);
        let estimate = store.estimate(&key("A", "2")).unwrap();
        assert!((estimate.invocation - 2.0).abs() < 1e-5);
        let estimate = store.estimate(&key("A", "3")).unwrap();
        assert!((estimate.invocation - 4.0).abs() < 1e-5);
        assert!((estimate.data_input - 5.0).abs() < 1e-5);
        assert!((estimate.data_output - 6.0).abs() < 1e-5);

        assert_eq!(store.entry(&key("A", "1")).invocation_count(), 100);
        assert_eq!(store.entry(&key("A", "2")).invocation_count(), 100);
        assert_eq!(store.entry(&key("A", "3")).invocation_count(), 300);
    }

    #[test]
    fn test_batches_carry_increasing_ids_and_sorted_records() {
        struct Capture {
            batches: Mutex<Vec<StatisticsBatch>>,
        }
        impl MessageSender for Capture {
            fn send(&self, message: EngineMessage) -> Result<(), TransportError> {
                let EngineMessage::Statistics(batch) = message;
                self.batches.lock().push(batch);
                Ok(())
            }
        }

        let capture = Arc::new(Capture {
            batches: Mutex::new(Vec::new()),
        });
        let sender = InvocationStatisticsSender::new(capture.clone());

        sender.function_invoked(FunctionId::new("B"), "2", 1, 1.0, 1.0, 1.0);
        sender.function_invoked(FunctionId::new("A"), "1", 1, 1.0, 1.0, 1.0);
        sender.flush();
        sender.function_invoked(FunctionId::new("A"), "1", 1, 1.0, 1.0, 1.0);
        sender.flush();

        let batches = capture.batches.lock();
        assert_eq!(batches.len(), 2);
        assert!(batches[0].batch_id < batches[1].batch_id);
        let keys: Vec<&CostKey> = batches[0].records.iter().map(|r| &r.key).collect();
        assert_eq!(keys, [&key("A", "1"), &key("B", "2")]);
    }
}
