//! Value-requirement resolution and cost-aware calculation scheduling.
//!
//! A caller asks for a single derived value on a target; the resolver turns
//! that into a dependency graph of function invocations by matching declared
//! outputs against requirement constraints, and the dispatcher executes the
//! graph across a pool of workers, steered by continuously updated
//! per-function cost statistics.

pub mod cancel;
pub mod config;
pub mod id;
pub mod market;
pub mod model;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod stats;

pub use config::EngineConfig;
pub use id::{UniqueId, UniqueIdSupplier};
pub use market::{InMemoryMarketData, MarketDataSource};
pub use model::{
    Constraint, SpecificationTemplate, TargetRef, TemplateProperty, Value, ValueProperties,
    ValueRequirement, ValueSpecification,
};
pub use registry::{
    CandidateOrdering, EngineFunction, FunctionError, FunctionId, FunctionPriority,
    FunctionRegistry, PriorityThenRegistration,
};
pub use resolver::{
    DependencyGraph, DependencyNode, InputBinding, NodeId, ResolutionError, Resolver,
};
pub use scheduler::{
    CalculationWorker, CancellationToken, Dispatcher, GraphExecutionReport, LocalWorker,
    NodeFailure, NodeState,
};
pub use stats::{
    CostEstimate, CostKey, FunctionCostStore, InvocationStatisticsReceiver,
    InvocationStatisticsSender, MessageSender,
};
