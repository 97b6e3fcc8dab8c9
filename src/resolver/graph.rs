//! The dependency graph produced by resolution.

use crate::model::{TargetRef, ValueSpecification};
use crate::registry::FunctionId;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use smallvec::SmallVec;
use std::collections::{HashSet, VecDeque};

/// Stable handle of a node within one `DependencyGraph`.
pub type NodeId = NodeIndex;

/// How one input slot of a node is satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputBinding {
    /// Produced by another node of the same graph.
    Node {
        producer: NodeId,
        spec: ValueSpecification,
    },
    /// Supplied directly by market data.
    Leaf(ValueSpecification),
}

impl InputBinding {
    pub fn specification(&self) -> &ValueSpecification {
        match self {
            InputBinding::Node { spec, .. } => spec,
            InputBinding::Leaf(spec) => spec,
        }
    }
}

/// One function invocation planned by the resolver.
#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub function: FunctionId,
    pub target: TargetRef,
    /// Input bindings in invocation order.
    pub inputs: SmallVec<[InputBinding; 4]>,
    pub output: ValueSpecification,
}

/// The DAG of invocations satisfying one root requirement.
///
/// Edges run producer -> consumer and carry the consumer's input slot.
/// Nodes are owned exclusively by the graph that created them; invariants:
/// acyclic, every input satisfied by exactly one producer (node or leaf),
/// every node reachable from the root.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: StableDiGraph<DependencyNode, usize>,
    root: Option<InputBinding>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, wiring an edge from each node-bound input's producer.
    pub fn add_node(&mut self, node: DependencyNode) -> NodeId {
        let inputs = node.inputs.clone();
        let id = self.graph.add_node(node);
        for (slot, binding) in inputs.iter().enumerate() {
            if let InputBinding::Node { producer, .. } = binding {
                self.graph.add_edge(*producer, id, slot);
            }
        }
        id
    }

    pub fn set_root(&mut self, binding: InputBinding) {
        self.root = Some(binding);
    }

    /// How the originally requested requirement is satisfied.
    pub fn root(&self) -> Option<&InputBinding> {
        self.root.as_ref()
    }

    /// The root node, when the root is not a raw market datum.
    pub fn root_node(&self) -> Option<NodeId> {
        match self.root {
            Some(InputBinding::Node { producer, .. }) => Some(producer),
            _ => None,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&DependencyNode> {
        self.graph.node_weight(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &DependencyNode)> {
        self.graph
            .node_indices()
            .map(move |id| (id, &self.graph[id]))
    }

    /// Distinct direct producers feeding `id`.
    pub fn producers_of(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut seen = SmallVec::new();
        for producer in self.graph.neighbors_directed(id, Direction::Incoming) {
            if !seen.contains(&producer) {
                seen.push(producer);
            }
        }
        seen
    }

    /// Distinct direct consumers of `id`'s output.
    pub fn consumers_of(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut seen = SmallVec::new();
        for consumer in self.graph.neighbors_directed(id, Direction::Outgoing) {
            if !seen.contains(&consumer) {
                seen.push(consumer);
            }
        }
        seen
    }

    /// All nodes transitively downstream of `start`, excluding `start`.
    pub fn dependents_of(&self, start: NodeId) -> HashSet<NodeId> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<NodeId> = self.consumers_of(start).into_iter().collect();
        while let Some(node) = queue.pop_front() {
            if visited.insert(node) {
                for consumer in self.graph.neighbors_directed(node, Direction::Outgoing) {
                    queue.push_back(consumer);
                }
            }
        }
        visited
    }

    /// Drop every node the root does not (transitively) consume.
    ///
    /// Resolution backtracking can stage nodes that the winning candidate
    /// chain never uses; this restores the reachability invariant.
    pub fn retain_reachable(&mut self, root: NodeId) {
        let mut keep = HashSet::new();
        let mut queue = VecDeque::from([root]);
        while let Some(node) = queue.pop_front() {
            if keep.insert(node) {
                for producer in self.graph.neighbors_directed(node, Direction::Incoming) {
                    queue.push_back(producer);
                }
            }
        }
        let drop: Vec<NodeId> = self
            .graph
            .node_indices()
            .filter(|id| !keep.contains(id))
            .collect();
        for id in drop {
            self.graph.remove_node(id);
        }
    }

    pub fn is_acyclic(&self) -> bool {
        !petgraph::algo::is_cyclic_directed(&self.graph)
    }

    /// Edges as (producer, consumer, input slot), for shape comparisons.
    pub fn edges(&self) -> Vec<(NodeId, NodeId, usize)> {
        self.graph
            .node_indices()
            .flat_map(|id| {
                self.graph
                    .edges_directed(id, Direction::Outgoing)
                    .map(|e| (e.source(), e.target(), *e.weight()))
            })
            .collect()
    }
}
