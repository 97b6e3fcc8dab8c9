//! Calculation workers: the processes that execute one node's function.

use crate::model::{TargetRef, Value};
use crate::registry::{EngineFunction, FunctionError};
use crate::resolver::NodeId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Identifier of a worker in the pool.
pub type WorkerId = usize;

/// One unit of work: a planned invocation with materialized inputs.
pub struct Job {
    pub job_id: u64,
    pub node: NodeId,
    pub attempt: u32,
    pub function: Arc<dyn EngineFunction>,
    pub target: TargetRef,
    pub inputs: Vec<Value>,
}

/// A successful invocation together with its observed costs.
#[derive(Debug, Clone)]
pub struct JobSuccess {
    pub value: Value,
    pub elapsed: Duration,
    pub input_size: usize,
    pub output_size: usize,
}

/// Terminal result of one job attempt.
#[derive(Debug)]
pub struct JobCompletion {
    pub job_id: u64,
    pub node: NodeId,
    pub worker: WorkerId,
    pub outcome: Result<JobSuccess, FunctionError>,
}

/// Lifecycle notifications flowing back to the dispatcher.
#[derive(Debug)]
pub enum JobEvent {
    /// The worker picked the job off its queue and began executing.
    Started {
        job_id: u64,
        node: NodeId,
        worker: WorkerId,
    },
    Finished(JobCompletion),
}

/// Dispatch could not reach the worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("worker {0} unavailable")]
pub struct WorkerUnavailable(pub WorkerId);

/// A calculation node able to execute jobs.
///
/// Local workers run in-process; remote workers sit behind the external
/// messaging channel and surface through the same trait.
pub trait CalculationWorker: Send + Sync {
    fn id(&self) -> WorkerId;

    /// Jobs accepted but not yet finished.
    fn queue_depth(&self) -> usize;

    /// Enqueue a job; lifecycle events arrive on `events`.
    fn submit(&self, job: Job, events: Sender<JobEvent>) -> Result<(), WorkerUnavailable>;
}

/// In-process worker: a dedicated thread draining an mpsc job queue.
pub struct LocalWorker {
    id: WorkerId,
    queue: Mutex<Sender<(Job, Sender<JobEvent>)>>,
    depth: Arc<AtomicUsize>,
}

impl LocalWorker {
    pub fn spawn(id: WorkerId) -> Self {
        let (tx, rx) = mpsc::channel::<(Job, Sender<JobEvent>)>();
        let depth = Arc::new(AtomicUsize::new(0));
        let depth_in_thread = depth.clone();
        thread::spawn(move || {
            for (job, events) in rx {
                let _ = events.send(JobEvent::Started {
                    job_id: job.job_id,
                    node: job.node,
                    worker: id,
                });
                let started = Instant::now();
                let result = job.function.invoke(&job.target, &job.inputs);
                let elapsed = started.elapsed();
                let input_size = job.inputs.iter().map(Value::len).sum();
                let outcome = result.map(|value| JobSuccess {
                    output_size: value.len(),
                    value,
                    elapsed,
                    input_size,
                });
                depth_in_thread.fetch_sub(1, Ordering::AcqRel);
                let _ = events.send(JobEvent::Finished(JobCompletion {
                    job_id: job.job_id,
                    node: job.node,
                    worker: id,
                    outcome,
                }));
            }
        });
        Self {
            id,
            queue: Mutex::new(tx),
            depth,
        }
    }
}

impl CalculationWorker for LocalWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    fn submit(&self, job: Job, events: Sender<JobEvent>) -> Result<(), WorkerUnavailable> {
        self.depth.fetch_add(1, Ordering::AcqRel);
        if self.queue.lock().send((job, events)).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return Err(WorkerUnavailable(self.id));
        }
        Ok(())
    }
}
