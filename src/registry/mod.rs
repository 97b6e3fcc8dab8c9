//! Catalog of available calculation functions.

pub mod function;

pub use function::{EngineFunction, FunctionError, FunctionId, FunctionPriority};

use crate::model::{TargetRef, ValueRequirement, ValueSpecification};
use std::sync::Arc;

/// A function able to satisfy a requirement, paired with the concrete
/// output specification it was specialized to.
#[derive(Clone)]
pub struct Candidate {
    pub function: Arc<dyn EngineFunction>,
    pub output: ValueSpecification,
    pub registration_seq: usize,
}

/// Ordering policy over candidates that can satisfy the same requirement.
///
/// Resolution is deterministic because exactly one policy is always applied.
/// Swap the policy at registry construction to change the tie-break.
pub trait CandidateOrdering: Send + Sync {
    fn sort(&self, candidates: &mut [Candidate]);
}

/// Default policy: descending priority, then ascending registration order.
#[derive(Debug, Default)]
pub struct PriorityThenRegistration;

impl CandidateOrdering for PriorityThenRegistration {
    fn sort(&self, candidates: &mut [Candidate]) {
        candidates.sort_by(|a, b| {
            b.function
                .priority()
                .cmp(&a.function.priority())
                .then(a.registration_seq.cmp(&b.registration_seq))
        });
    }
}

/// Append-only catalog of functions, populated at startup and read-only
/// during normal operation.
pub struct FunctionRegistry {
    functions: Vec<Arc<dyn EngineFunction>>,
    ordering: Box<dyn CandidateOrdering>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::with_ordering(Box::new(PriorityThenRegistration))
    }

    pub fn with_ordering(ordering: Box<dyn CandidateOrdering>) -> Self {
        Self {
            functions: Vec::new(),
            ordering,
        }
    }

    pub fn register(&mut self, function: Arc<dyn EngineFunction>) {
        self.functions.push(function);
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn get(&self, id: &FunctionId) -> Option<Arc<dyn EngineFunction>> {
        self.functions.iter().find(|f| &f.id() == id).cloned()
    }

    /// Every function able to produce a specification satisfying
    /// `requirement` for `target`, in policy order. A function offering
    /// several matching templates contributes one candidate per template,
    /// kept in declaration order (the sort is stable).
    pub fn candidates_for(
        &self,
        target: &TargetRef,
        requirement: &ValueRequirement,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for (registration_seq, function) in self.functions.iter().enumerate() {
            if !function.applies_to(target) {
                continue;
            }
            for template in function.produces(target) {
                if let Some(output) = template.specialize(requirement) {
                    if requirement.is_satisfied_by(&output) {
                        candidates.push(Candidate {
                            function: function.clone(),
                            output,
                            registration_seq,
                        });
                    }
                }
            }
        }
        self.ordering.sort(&mut candidates);
        candidates
    }

    /// A chosen candidate's own input requirements, with its wildcards
    /// bound against the concrete output it must produce.
    pub fn requirements_of(
        &self,
        candidate: &Candidate,
        target: &TargetRef,
    ) -> Vec<ValueRequirement> {
        candidate.function.requires(target, &candidate.output)
    }
}
