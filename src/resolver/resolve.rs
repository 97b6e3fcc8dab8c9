//! Turns one requested value into a graph of function invocations.

use super::error::ResolutionError;
use super::graph::{DependencyGraph, DependencyNode, InputBinding, NodeId};
use crate::cancel::CancellationToken;
use crate::market::MarketDataSource;
use crate::model::{ValueRequirement, ValueSpecification};
use crate::registry::{Candidate, FunctionId, FunctionRegistry};
use rayon::prelude::*;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Matches requirements against candidate outputs and builds the DAG.
///
/// Resolution runs synchronously per request on an explicit work stack, so
/// arbitrarily deep graphs never exhaust the call stack. Independent
/// requests share only the read-mostly registry and market data;
/// [`Resolver::resolve_all`] fans them out across threads.
pub struct Resolver<'a> {
    registry: &'a FunctionRegistry,
    market: &'a dyn MarketDataSource,
}

/// One suspended resolution: a requirement part-way through its candidates.
struct Frame {
    requirement: ValueRequirement,
    candidates: Vec<Candidate>,
    candidate_idx: usize,
    /// Input requirements of the candidate currently being tried, computed
    /// lazily once its output is concrete.
    inputs: Option<Vec<ValueRequirement>>,
    resolved: SmallVec<[InputBinding; 4]>,
    saw_cycle: bool,
}

impl Frame {
    fn next_candidate(&mut self) {
        self.candidate_idx += 1;
        self.inputs = None;
        self.resolved.clear();
    }
}

/// Result handed from a finished frame to the one below it on the stack.
enum Outcome {
    Resolved(InputBinding),
    Failed { cycle: bool },
}

enum Step {
    Complete(InputBinding),
    Fail { cycle: bool },
    Push(ValueRequirement),
    CycleDetected(ValueRequirement),
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a FunctionRegistry, market: &'a dyn MarketDataSource) -> Self {
        Self { registry, market }
    }

    /// Resolve one root requirement into a complete dependency graph.
    pub fn resolve(
        &self,
        requirement: &ValueRequirement,
    ) -> Result<DependencyGraph, ResolutionError> {
        self.resolve_with(requirement, &CancellationToken::new())
    }

    /// As [`resolve`](Self::resolve), checking the token between work-stack
    /// steps so a deep resolution can be abandoned mid-flight.
    pub fn resolve_with(
        &self,
        requirement: &ValueRequirement,
        cancel: &CancellationToken,
    ) -> Result<DependencyGraph, ResolutionError> {
        let mut graph = DependencyGraph::new();

        // The requirement may be a raw market datum: nothing to invoke.
        if let Some(spec) = self.market.lookup(requirement) {
            graph.set_root(InputBinding::Leaf(spec));
            return Ok(graph);
        }

        let mut memo: HashMap<ValueRequirement, InputBinding> = HashMap::new();
        let mut produced: HashMap<(FunctionId, ValueSpecification), NodeId> = HashMap::new();
        let mut in_progress: HashSet<ValueRequirement> = HashSet::new();
        let mut stack: Vec<Frame> = Vec::new();
        let mut deepest_failure: Vec<ValueRequirement> = vec![requirement.clone()];
        let mut cycle_chain: Option<Vec<ValueRequirement>> = None;
        let mut pending: Option<Outcome> = None;

        in_progress.insert(requirement.clone());
        stack.push(self.frame(requirement.clone()));

        loop {
            if cancel.is_cancelled() {
                return Err(ResolutionError::Cancelled);
            }
            let step = {
                let frame = stack.last_mut().expect("stack never empties mid-loop");
                if let Some(outcome) = pending.take() {
                    match outcome {
                        Outcome::Resolved(binding) => frame.resolved.push(binding),
                        Outcome::Failed { cycle } => {
                            frame.saw_cycle |= cycle;
                            frame.next_candidate();
                        }
                    }
                }
                self.advance(frame, &mut memo, &mut produced, &mut graph, &in_progress)
            };

            match step {
                Step::Complete(binding) => {
                    let frame = stack.pop().expect("completing frame exists");
                    in_progress.remove(&frame.requirement);
                    memo.insert(frame.requirement, binding.clone());
                    if stack.is_empty() {
                        graph.set_root(binding.clone());
                        if let InputBinding::Node { producer, .. } = binding {
                            graph.retain_reachable(producer);
                        }
                        debug_assert!(graph.is_acyclic());
                        return Ok(graph);
                    }
                    pending = Some(Outcome::Resolved(binding));
                }
                Step::Fail { cycle } => {
                    let chain: Vec<ValueRequirement> =
                        stack.iter().map(|f| f.requirement.clone()).collect();
                    if chain.len() > deepest_failure.len() {
                        deepest_failure = chain;
                    }
                    let frame = stack.pop().expect("failing frame exists");
                    in_progress.remove(&frame.requirement);
                    if stack.is_empty() {
                        return Err(if cycle {
                            ResolutionError::CyclicDependency {
                                chain: cycle_chain.unwrap_or(deepest_failure),
                            }
                        } else {
                            ResolutionError::UnresolvableRequirement {
                                chain: deepest_failure,
                            }
                        });
                    }
                    pending = Some(Outcome::Failed { cycle });
                }
                Step::Push(req) => {
                    in_progress.insert(req.clone());
                    let frame = self.frame(req);
                    stack.push(frame);
                }
                Step::CycleDetected(repeated) => {
                    if cycle_chain.is_none() {
                        let start = stack
                            .iter()
                            .position(|f| f.requirement == repeated)
                            .unwrap_or(0);
                        let mut chain: Vec<ValueRequirement> = stack[start..]
                            .iter()
                            .map(|f| f.requirement.clone())
                            .collect();
                        chain.push(repeated);
                        cycle_chain = Some(chain);
                    }
                    // The frame has already moved on to its next candidate.
                }
            }
        }
    }

    /// Resolve independent root requirements in parallel. Each resolution
    /// builds its own graph; memoized sub-results are never shared across
    /// requests.
    pub fn resolve_all(
        &self,
        requirements: &[ValueRequirement],
    ) -> Vec<Result<DependencyGraph, ResolutionError>> {
        requirements.par_iter().map(|r| self.resolve(r)).collect()
    }

    fn frame(&self, requirement: ValueRequirement) -> Frame {
        let candidates = self
            .registry
            .candidates_for(&requirement.target, &requirement);
        Frame {
            requirement,
            candidates,
            candidate_idx: 0,
            inputs: None,
            resolved: SmallVec::new(),
            saw_cycle: false,
        }
    }

    /// Drive the top frame until it completes, fails, or needs a child.
    fn advance(
        &self,
        frame: &mut Frame,
        memo: &mut HashMap<ValueRequirement, InputBinding>,
        produced: &mut HashMap<(FunctionId, ValueSpecification), NodeId>,
        graph: &mut DependencyGraph,
        in_progress: &HashSet<ValueRequirement>,
    ) -> Step {
        loop {
            if frame.candidate_idx >= frame.candidates.len() {
                return Step::Fail {
                    cycle: frame.saw_cycle,
                };
            }
            let candidate = frame.candidates[frame.candidate_idx].clone();
            if frame.inputs.is_none() {
                frame.inputs = Some(
                    self.registry
                        .requirements_of(&candidate, &frame.requirement.target),
                );
            }
            let total = frame.inputs.as_ref().expect("inputs just computed").len();
            let next = frame.resolved.len();
            if next == total {
                // Every input bound: materialize the node, reusing an
                // existing one producing the identical output.
                let key = (candidate.function.id(), candidate.output.clone());
                let id = match produced.get(&key) {
                    Some(&id) => id,
                    None => {
                        let id = graph.add_node(DependencyNode {
                            function: candidate.function.id(),
                            target: frame.requirement.target.clone(),
                            inputs: frame.resolved.clone(),
                            output: candidate.output.clone(),
                        });
                        produced.insert(key, id);
                        id
                    }
                };
                return Step::Complete(InputBinding::Node {
                    producer: id,
                    spec: candidate.output,
                });
            }
            let input_req = frame.inputs.as_ref().expect("inputs present")[next].clone();
            if let Some(binding) = memo.get(&input_req) {
                frame.resolved.push(binding.clone());
                continue;
            }
            if in_progress.contains(&input_req) {
                trace!(requirement = %input_req, "candidate rejected: cyclic input");
                frame.saw_cycle = true;
                frame.next_candidate();
                return Step::CycleDetected(input_req);
            }
            if let Some(spec) = self.market.lookup(&input_req) {
                let binding = InputBinding::Leaf(spec);
                memo.insert(input_req, binding.clone());
                frame.resolved.push(binding);
                continue;
            }
            return Step::Push(input_req);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::InMemoryMarketData;
    use crate::model::{
        SpecificationTemplate, TargetRef, Value, ValueProperties,
    };
    use crate::registry::{EngineFunction, FunctionError, FunctionPriority};
    use std::sync::Arc;

    /// A function producing one value name from other value names on the
    /// same target.
    struct Calc {
        id: &'static str,
        priority: FunctionPriority,
        output: &'static str,
        needs: Vec<&'static str>,
    }

    impl Calc {
        fn new(id: &'static str, output: &'static str, needs: &[&'static str]) -> Arc<Self> {
            Arc::new(Self {
                id,
                priority: 0,
                output,
                needs: needs.to_vec(),
            })
        }

        fn with_priority(
            id: &'static str,
            priority: FunctionPriority,
            output: &'static str,
            needs: &[&'static str],
        ) -> Arc<Self> {
            Arc::new(Self {
                id,
                priority,
                output,
                needs: needs.to_vec(),
            })
        }
    }

    impl EngineFunction for Calc {
        fn id(&self) -> FunctionId {
            self.id.into()
        }

        fn priority(&self) -> FunctionPriority {
            self.priority
        }

        fn applies_to(&self, _target: &TargetRef) -> bool {
            true
        }

        fn produces(&self, target: &TargetRef) -> Vec<SpecificationTemplate> {
            vec![SpecificationTemplate::new(target.clone(), self.output)]
        }

        fn requires(
            &self,
            target: &TargetRef,
            _chosen_output: &ValueSpecification,
        ) -> Vec<ValueRequirement> {
            self.needs
                .iter()
                .map(|n| ValueRequirement::new(target.clone(), *n))
                .collect()
        }

        fn invoke(&self, _target: &TargetRef, _inputs: &[Value]) -> Result<Value, FunctionError> {
            Ok(Value::Scalar(0.0))
        }
    }

    fn target() -> TargetRef {
        TargetRef::new("Trade", "1")
    }

    #[test]
    fn test_leaf_short_circuits_resolution() {
        let registry = FunctionRegistry::new();
        let market = InMemoryMarketData::new();
        market.put(target(), "SpotRate", Value::Scalar(1.0));

        let resolver = Resolver::new(&registry, &market);
        let graph = resolver
            .resolve(&ValueRequirement::new(target(), "SpotRate"))
            .unwrap();
        assert_eq!(graph.node_count(), 0);
        assert!(matches!(graph.root(), Some(InputBinding::Leaf(_))));
    }

    #[test]
    fn test_chain_resolution() {
        let mut registry = FunctionRegistry::new();
        registry.register(Calc::new("fair_value", "FairValue", &["Curve"]));
        registry.register(Calc::new("curve", "Curve", &["Spot"]));
        let market = InMemoryMarketData::new();
        market.put(target(), "Spot", Value::Scalar(0.05));

        let resolver = Resolver::new(&registry, &market);
        let graph = resolver
            .resolve(&ValueRequirement::new(target(), "FairValue"))
            .unwrap();
        assert_eq!(graph.node_count(), 2);

        let root = graph.root_node().unwrap();
        let root_node = graph.node(root).unwrap();
        assert_eq!(root_node.function, "fair_value".into());
        let curve_id = match &root_node.inputs[0] {
            InputBinding::Node { producer, spec } => {
                assert_eq!(spec.value_name, "Curve");
                *producer
            }
            other => panic!("expected node binding, got {:?}", other),
        };
        let curve_node = graph.node(curve_id).unwrap();
        assert!(matches!(&curve_node.inputs[0], InputBinding::Leaf(spec) if spec.value_name == "Spot"));
    }

    #[test]
    fn test_diamond_shares_one_producer() {
        let mut registry = FunctionRegistry::new();
        registry.register(Calc::new("fd", "D", &["B", "C"]));
        registry.register(Calc::new("fb", "B", &["A"]));
        registry.register(Calc::new("fc", "C", &["A"]));
        registry.register(Calc::new("fa", "A", &["M"]));
        let market = InMemoryMarketData::new();
        market.put(target(), "M", Value::Scalar(1.0));

        let resolver = Resolver::new(&registry, &market);
        let graph = resolver
            .resolve(&ValueRequirement::new(target(), "D"))
            .unwrap();
        // fa is resolved once and memoized; both fb and fc consume the
        // identical node.
        assert_eq!(graph.node_count(), 4);

        let producers_of_a: Vec<NodeId> = graph
            .nodes()
            .filter(|(_, n)| n.function == "fb".into() || n.function == "fc".into())
            .map(|(_, n)| match &n.inputs[0] {
                InputBinding::Node { producer, .. } => *producer,
                other => panic!("expected node binding, got {:?}", other),
            })
            .collect();
        assert_eq!(producers_of_a.len(), 2);
        assert_eq!(producers_of_a[0], producers_of_a[1]);
    }

    #[test]
    fn test_unresolvable_reports_requirement_chain() {
        let mut registry = FunctionRegistry::new();
        registry.register(Calc::new("fa", "A", &["B"]));
        let market = InMemoryMarketData::new();

        let resolver = Resolver::new(&registry, &market);
        let err = resolver
            .resolve(&ValueRequirement::new(target(), "A"))
            .unwrap_err();
        match &err {
            ResolutionError::UnresolvableRequirement { chain } => {
                let names: Vec<&str> = chain.iter().map(|r| r.value_name.as_str()).collect();
                assert_eq!(names, ["A", "B"]);
            }
            other => panic!("expected unresolvable, got {:?}", other),
        }
    }

    #[test]
    fn test_mutual_dependency_is_a_cycle() {
        let mut registry = FunctionRegistry::new();
        registry.register(Calc::new("fa", "A", &["B"]));
        registry.register(Calc::new("fb", "B", &["A"]));
        let market = InMemoryMarketData::new();

        let resolver = Resolver::new(&registry, &market);
        let err = resolver
            .resolve(&ValueRequirement::new(target(), "A"))
            .unwrap_err();
        match &err {
            ResolutionError::CyclicDependency { chain } => {
                let names: Vec<&str> = chain.iter().map(|r| r.value_name.as_str()).collect();
                assert_eq!(names, ["A", "B", "A"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_candidate_falls_back_to_next() {
        let mut registry = FunctionRegistry::new();
        // The preferred candidate needs an input nobody can produce.
        registry.register(Calc::with_priority("broken", 10, "V", &["Missing"]));
        registry.register(Calc::with_priority("working", 0, "V", &["M"]));
        let market = InMemoryMarketData::new();
        market.put(target(), "M", Value::Scalar(1.0));

        let resolver = Resolver::new(&registry, &market);
        let graph = resolver
            .resolve(&ValueRequirement::new(target(), "V"))
            .unwrap();
        let root = graph.root_node().unwrap();
        assert_eq!(graph.node(root).unwrap().function, "working".into());
        // The abandoned candidate left nothing behind.
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_wildcard_output_pinned_by_requirement() {
        struct CurveFunction;
        impl EngineFunction for CurveFunction {
            fn id(&self) -> FunctionId {
                "curve".into()
            }
            fn applies_to(&self, _target: &TargetRef) -> bool {
                true
            }
            fn produces(&self, target: &TargetRef) -> Vec<SpecificationTemplate> {
                vec![SpecificationTemplate::new(target.clone(), "Curve").with_wildcard("CurveName")]
            }
            fn requires(
                &self,
                _target: &TargetRef,
                _chosen_output: &ValueSpecification,
            ) -> Vec<ValueRequirement> {
                Vec::new()
            }
            fn invoke(
                &self,
                _target: &TargetRef,
                _inputs: &[Value],
            ) -> Result<Value, FunctionError> {
                Ok(Value::Scalar(0.0))
            }
        }

        let mut registry = FunctionRegistry::new();
        registry.register(Arc::new(CurveFunction));
        let market = InMemoryMarketData::new();

        let resolver = Resolver::new(&registry, &market);
        let req = ValueRequirement::with_constraints(
            target(),
            "Curve",
            ValueProperties::builder()
                .with_any_of("CurveName", ["Forward", "Discount"])
                .build(),
        );
        let graph = resolver.resolve(&req).unwrap();
        let root = graph.root_node().unwrap();
        assert_eq!(
            graph.node(root).unwrap().output.properties.get("CurveName"),
            Some(&"Discount".to_string())
        );
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let mut registry = FunctionRegistry::new();
        registry.register(Calc::new("fd", "D", &["B", "C"]));
        registry.register(Calc::new("fb", "B", &["A"]));
        registry.register(Calc::new("fc", "C", &["A"]));
        registry.register(Calc::new("fa", "A", &["M"]));
        let market = InMemoryMarketData::new();
        market.put(target(), "M", Value::Scalar(1.0));

        let resolver = Resolver::new(&registry, &market);
        let req = ValueRequirement::new(target(), "D");

        let shape = |graph: &DependencyGraph| {
            let mut nodes: Vec<String> = graph
                .nodes()
                .map(|(_, n)| format!("{}->{}", n.function, n.output.value_name))
                .collect();
            nodes.sort();
            nodes
        };
        let first = resolver.resolve(&req).unwrap();
        let second = resolver.resolve(&req).unwrap();
        assert_eq!(shape(&first), shape(&second));
        assert_eq!(first.edges().len(), second.edges().len());
    }

    #[test]
    fn test_cancelled_token_abandons_resolution() {
        let mut registry = FunctionRegistry::new();
        registry.register(Calc::new("fa", "A", &["M"]));
        let market = InMemoryMarketData::new();
        market.put(target(), "M", Value::Scalar(1.0));

        let resolver = Resolver::new(&registry, &market);
        let token = CancellationToken::new();
        token.cancel();
        let err = resolver
            .resolve_with(&ValueRequirement::new(target(), "A"), &token)
            .unwrap_err();
        assert_eq!(err, ResolutionError::Cancelled);
    }

    #[test]
    fn test_resolve_all_runs_independent_requests() {
        let mut registry = FunctionRegistry::new();
        registry.register(Calc::new("fa", "A", &["M"]));
        registry.register(Calc::new("fb", "B", &["M"]));
        let market = InMemoryMarketData::new();
        market.put(target(), "M", Value::Scalar(1.0));

        let resolver = Resolver::new(&registry, &market);
        let results = resolver.resolve_all(&[
            ValueRequirement::new(target(), "A"),
            ValueRequirement::new(target(), "B"),
            ValueRequirement::new(target(), "Nope"),
        ]);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(
            results[2],
            Err(ResolutionError::UnresolvableRequirement { .. })
        ));
    }
}
