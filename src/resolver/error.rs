//! Resolution failures.

use crate::model::ValueRequirement;
use thiserror::Error;

fn format_chain(chain: &[ValueRequirement]) -> String {
    chain
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(" <- ")
}

/// Why a requirement could not be turned into a dependency graph.
///
/// Both variants carry the unsatisfied requirement chain, root first, for
/// diagnostics. Neither is fatal to the engine; other resolutions proceed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionError {
    /// No leaf and no function chain satisfies the requirement.
    #[error("unresolvable requirement: {}", format_chain(chain))]
    UnresolvableRequirement { chain: Vec<ValueRequirement> },

    /// The requirement transitively depends on itself. Surfaced distinctly
    /// so callers can diagnose registry misconfiguration.
    #[error("cyclic dependency: {}", format_chain(chain))]
    CyclicDependency { chain: Vec<ValueRequirement> },

    /// The caller cancelled the request mid-resolution.
    #[error("resolution cancelled")]
    Cancelled,
}

impl ResolutionError {
    pub fn chain(&self) -> &[ValueRequirement] {
        match self {
            ResolutionError::UnresolvableRequirement { chain } => chain,
            ResolutionError::CyclicDependency { chain } => chain,
            ResolutionError::Cancelled => &[],
        }
    }
}
