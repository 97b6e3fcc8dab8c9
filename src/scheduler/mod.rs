//! Walks a dependency graph in dependency order across a worker pool.

pub mod worker;

pub use worker::{
    CalculationWorker, Job, JobCompletion, JobEvent, JobSuccess, LocalWorker, WorkerId,
    WorkerUnavailable,
};

pub use crate::cancel::CancellationToken;

use crate::config::EngineConfig;
use crate::market::MarketDataSource;
use crate::model::{Value, ValueSpecification};
use crate::registry::{FunctionError, FunctionRegistry};
use crate::resolver::{DependencyGraph, DependencyNode, InputBinding, NodeId};
use crate::stats::{CostKey, FunctionCostStore, InvocationStatisticsSender};
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Why a node finished in `Failed`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeFailure {
    /// The function raised an error at runtime. Not retried; propagates to
    /// every transitive dependent.
    #[error("invocation failed: {0}")]
    Execution(FunctionError),
    /// No worker accepted the job within the retry limit.
    #[error("no worker available")]
    NoWorkerAvailable,
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("upstream dependency failed")]
    UpstreamFailed,
    #[error("missing market data for {0}")]
    MissingMarketData(ValueSpecification),
}

/// Dispatch state of one node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeState {
    Pending,
    Ready,
    Assigned,
    Executing,
    Done,
    Failed(NodeFailure),
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Done | NodeState::Failed(_))
    }
}

/// Final outcome of executing one graph.
#[derive(Debug)]
pub struct GraphExecutionReport {
    pub states: HashMap<NodeId, NodeState>,
    pub values: HashMap<NodeId, Value>,
    pub root_value: Option<Value>,
}

impl GraphExecutionReport {
    pub fn state(&self, id: NodeId) -> Option<&NodeState> {
        self.states.get(&id)
    }

    pub fn succeeded(&self) -> bool {
        self.root_value.is_some()
    }
}

/// Lower is better: the dispatch heuristic is
/// `avg_invocation_cost / (1 + queue_depth)`, with the configured default
/// cost standing in when no statistics exist yet.
fn score(average_invocation_cost: f64, queue_depth: usize) -> f64 {
    average_invocation_cost / (1.0 + queue_depth as f64)
}

/// Statistics key for a node: its function plus the shape of its inputs.
fn input_key(node: &DependencyNode) -> String {
    if node.inputs.is_empty() {
        return "-".to_string();
    }
    node.inputs
        .iter()
        .map(|b| b.specification().value_name.as_str())
        .collect::<Vec<&str>>()
        .join(",")
}

struct InFlight {
    node: NodeId,
    deadline: Instant,
}

/// Per-execution mutable state. Ready queue and retry counters live here,
/// per graph; there is no lock spanning the whole scheduler.
struct Run<'g> {
    graph: &'g DependencyGraph,
    states: HashMap<NodeId, NodeState>,
    values: HashMap<NodeId, Value>,
    remaining: HashMap<NodeId, usize>,
    ready: VecDeque<NodeId>,
    in_flight: HashMap<u64, InFlight>,
    attempts: HashMap<NodeId, u32>,
    last_worker: HashMap<NodeId, WorkerId>,
    next_job_id: u64,
    terminal: usize,
}

impl<'g> Run<'g> {
    fn new(graph: &'g DependencyGraph) -> Self {
        let mut states = HashMap::new();
        let mut remaining = HashMap::new();
        let mut ready = VecDeque::new();
        for (id, _) in graph.nodes() {
            let producers = graph.producers_of(id).len();
            remaining.insert(id, producers);
            if producers == 0 {
                states.insert(id, NodeState::Ready);
                ready.push_back(id);
            } else {
                states.insert(id, NodeState::Pending);
            }
        }
        Self {
            graph,
            states,
            values: HashMap::new(),
            remaining,
            ready,
            in_flight: HashMap::new(),
            attempts: HashMap::new(),
            last_worker: HashMap::new(),
            next_job_id: 1,
            terminal: 0,
        }
    }

    fn set_terminal(&mut self, node: NodeId, state: NodeState) {
        let previous = self.states.insert(node, state);
        if !previous.map_or(false, |s| s.is_terminal()) {
            self.terminal += 1;
        }
    }

    fn state(&self, node: NodeId) -> Option<&NodeState> {
        self.states.get(&node)
    }
}

/// Assigns ready nodes to workers, driven by cost estimates and load.
pub struct Dispatcher<'a> {
    registry: &'a FunctionRegistry,
    workers: Vec<Arc<dyn CalculationWorker>>,
    costs: Arc<FunctionCostStore>,
    statistics: Arc<InvocationStatisticsSender>,
    config: EngineConfig,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        registry: &'a FunctionRegistry,
        workers: Vec<Arc<dyn CalculationWorker>>,
        costs: Arc<FunctionCostStore>,
        statistics: Arc<InvocationStatisticsSender>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            workers,
            costs,
            statistics,
            config,
        }
    }

    pub fn execute(
        &self,
        graph: &DependencyGraph,
        market: &dyn MarketDataSource,
    ) -> GraphExecutionReport {
        self.execute_with(graph, market, &CancellationToken::new())
    }

    /// Walk the graph to completion: every node ends `Done` or `Failed`.
    pub fn execute_with(
        &self,
        graph: &DependencyGraph,
        market: &dyn MarketDataSource,
        cancel: &CancellationToken,
    ) -> GraphExecutionReport {
        // A root satisfied directly by market data has nothing to dispatch.
        if let Some(InputBinding::Leaf(spec)) = graph.root() {
            return GraphExecutionReport {
                states: HashMap::new(),
                values: HashMap::new(),
                root_value: market.value(spec),
            };
        }

        let mut run = Run::new(graph);
        let total = graph.node_count();
        let (events_tx, events_rx) = mpsc::channel::<JobEvent>();
        let mut cancelled = false;

        while run.terminal < total {
            if cancel.is_cancelled() && !cancelled {
                cancelled = true;
                run.ready.clear();
                let pending: Vec<NodeId> = run
                    .states
                    .iter()
                    .filter(|(_, s)| {
                        matches!(s, NodeState::Pending | NodeState::Ready | NodeState::Assigned)
                    })
                    .map(|(id, _)| *id)
                    .collect();
                for node in pending {
                    run.set_terminal(node, NodeState::Failed(NodeFailure::Cancelled));
                }
                debug!("graph execution cancelled");
                continue;
            }

            if !cancelled {
                while let Some(node_id) = run.ready.pop_front() {
                    if run.state(node_id) != Some(&NodeState::Ready) {
                        continue;
                    }
                    self.dispatch_node(&mut run, market, node_id, &events_tx);
                }
                if run.terminal >= total {
                    break;
                }
            }

            if run.in_flight.is_empty() {
                if run.ready.is_empty() {
                    // Nothing running and nothing ready: the rest is terminal.
                    break;
                }
                continue;
            }

            let now = Instant::now();
            let nearest = run
                .in_flight
                .values()
                .map(|f| f.deadline)
                .min()
                .expect("in-flight jobs exist");
            if nearest <= now {
                self.expire_deadlines(&mut run);
                continue;
            }
            match events_rx.recv_timeout(nearest - now) {
                Ok(JobEvent::Started { job_id, node, .. }) => {
                    if let Some(flight) = run.in_flight.get_mut(&job_id) {
                        flight.deadline = Instant::now() + self.config.execution_timeout;
                        if run.states.get(&node) == Some(&NodeState::Assigned) {
                            run.states.insert(node, NodeState::Executing);
                        }
                    }
                }
                Ok(JobEvent::Finished(completion)) => {
                    // A completion for a job already timed out or cancelled
                    // is stale; drop it.
                    if run.in_flight.remove(&completion.job_id).is_none() {
                        continue;
                    }
                    match run.state(completion.node) {
                        Some(NodeState::Assigned) | Some(NodeState::Executing) => {}
                        _ => continue,
                    }
                    match completion.outcome {
                        Ok(success) => self.complete_node(&mut run, completion.node, success),
                        Err(err) => {
                            self.fail_node(&mut run, completion.node, NodeFailure::Execution(err))
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.expire_deadlines(&mut run);
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let root_value = graph
            .root_node()
            .and_then(|root| run.values.get(&root).cloned());
        GraphExecutionReport {
            states: run.states,
            values: run.values,
            root_value,
        }
    }

    /// Materialize inputs and hand the node to the best-scored worker.
    fn dispatch_node(
        &self,
        run: &mut Run<'_>,
        market: &dyn MarketDataSource,
        node_id: NodeId,
        events: &Sender<JobEvent>,
    ) {
        let graph = run.graph;
        let node = graph.node(node_id).expect("dispatched node exists");
        let Some(function) = self.registry.get(&node.function) else {
            self.fail_node(
                run,
                node_id,
                NodeFailure::Execution(FunctionError::new(format!(
                    "function {} is not registered",
                    node.function
                ))),
            );
            return;
        };

        let mut inputs = Vec::with_capacity(node.inputs.len());
        for binding in &node.inputs {
            match binding {
                InputBinding::Node { producer, .. } => match run.values.get(producer) {
                    Some(value) => inputs.push(value.clone()),
                    None => {
                        self.fail_node(run, node_id, NodeFailure::UpstreamFailed);
                        return;
                    }
                },
                InputBinding::Leaf(spec) => match market.value(spec) {
                    Some(value) => inputs.push(value),
                    None => {
                        self.fail_node(
                            run,
                            node_id,
                            NodeFailure::MissingMarketData(spec.clone()),
                        );
                        return;
                    }
                },
            }
        }

        let key = CostKey::new(node.function.clone(), input_key(node));
        let avoid = run.last_worker.get(&node_id).copied();
        let attempt = run.attempts.get(&node_id).copied().unwrap_or(0);
        for worker in self.workers_by_score(&key, avoid) {
            let job_id = run.next_job_id;
            run.next_job_id += 1;
            let job = Job {
                job_id,
                node: node_id,
                attempt,
                function: function.clone(),
                target: node.target.clone(),
                inputs: inputs.clone(),
            };
            match worker.submit(job, events.clone()) {
                Ok(()) => {
                    run.last_worker.insert(node_id, worker.id());
                    run.states.insert(node_id, NodeState::Assigned);
                    run.in_flight.insert(
                        job_id,
                        InFlight {
                            node: node_id,
                            deadline: Instant::now() + self.config.execution_timeout,
                        },
                    );
                    return;
                }
                Err(WorkerUnavailable(worker_id)) => {
                    warn!(worker = worker_id, node = ?node_id, "worker unavailable");
                }
            }
        }
        self.retry_or_fail(run, node_id, NodeFailure::NoWorkerAvailable);
    }

    /// Workers ordered by the dispatch heuristic; a retry prefers any
    /// worker other than the one that just failed, when the pool allows.
    fn workers_by_score(
        &self,
        key: &CostKey,
        avoid: Option<WorkerId>,
    ) -> Vec<&Arc<dyn CalculationWorker>> {
        let cost = self
            .costs
            .estimate(key)
            .map(|e| e.invocation)
            .unwrap_or(self.config.default_cost_estimate);
        let mut scored: Vec<(f64, WorkerId, &Arc<dyn CalculationWorker>)> = self
            .workers
            .iter()
            .map(|w| (score(cost, w.queue_depth()), w.id(), w))
            .collect();
        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        if let Some(avoid) = avoid {
            if scored.len() > 1 {
                let (mut preferred, avoided): (Vec<_>, Vec<_>) =
                    scored.into_iter().partition(|(_, id, _)| *id != avoid);
                preferred.extend(avoided);
                return preferred.into_iter().map(|(_, _, w)| w).collect();
            }
        }
        scored.into_iter().map(|(_, _, w)| w).collect()
    }

    fn expire_deadlines(&self, run: &mut Run<'_>) {
        let now = Instant::now();
        let expired: Vec<u64> = run
            .in_flight
            .iter()
            .filter(|(_, flight)| flight.deadline <= now)
            .map(|(job_id, _)| *job_id)
            .collect();
        for job_id in expired {
            let flight = run.in_flight.remove(&job_id).expect("expired job tracked");
            match run.state(flight.node) {
                Some(NodeState::Assigned) | Some(NodeState::Executing) => {
                    warn!(node = ?flight.node, "node execution timed out");
                    self.retry_or_fail(
                        run,
                        flight.node,
                        NodeFailure::Timeout(self.config.execution_timeout),
                    );
                }
                _ => {}
            }
        }
    }

    fn retry_or_fail(&self, run: &mut Run<'_>, node_id: NodeId, cause: NodeFailure) {
        let attempts = run.attempts.entry(node_id).or_insert(0);
        if *attempts < self.config.max_retries {
            *attempts += 1;
            debug!(node = ?node_id, attempt = *attempts, cause = %cause, "retrying node");
            run.states.insert(node_id, NodeState::Ready);
            run.ready.push_back(node_id);
        } else {
            self.fail_node(run, node_id, cause);
        }
    }

    /// Mark the node failed and propagate to every transitive dependent
    /// without executing them. Independent branches are untouched.
    fn fail_node(&self, run: &mut Run<'_>, node_id: NodeId, cause: NodeFailure) {
        warn!(node = ?node_id, cause = %cause, "node failed");
        run.set_terminal(node_id, NodeState::Failed(cause));
        for dependent in run.graph.dependents_of(node_id) {
            let already_terminal = run
                .state(dependent)
                .map_or(false, |s| s.is_terminal());
            if !already_terminal {
                run.set_terminal(dependent, NodeState::Failed(NodeFailure::UpstreamFailed));
            }
        }
    }

    /// Store the output, report observed cost, and unlock dependents.
    fn complete_node(&self, run: &mut Run<'_>, node_id: NodeId, success: JobSuccess) {
        let graph = run.graph;
        let node = graph.node(node_id).expect("completed node exists");
        self.statistics.function_invoked(
            node.function.clone(),
            input_key(node),
            1,
            success.elapsed.as_secs_f64(),
            success.input_size as f64,
            success.output_size as f64,
        );
        run.values.insert(node_id, success.value);
        run.set_terminal(node_id, NodeState::Done);
        for consumer in graph.consumers_of(node_id) {
            if run.state(consumer) != Some(&NodeState::Pending) {
                continue;
            }
            let remaining = run
                .remaining
                .get_mut(&consumer)
                .expect("consumer is tracked");
            *remaining -= 1;
            if *remaining == 0 {
                run.states.insert(consumer, NodeState::Ready);
                run.ready.push_back(consumer);
            }
        }
    }
}
