//! Engine-scoped identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A scheme-qualified identifier, rendered as `scheme::value`.
///
/// Used wherever the engine needs a stable handle on an external entity,
/// most prominently as the payload of a [`TargetRef`](crate::model::TargetRef).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniqueId {
    pub scheme: String,
    pub value: String,
}

impl UniqueId {
    pub fn new(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.scheme, self.value)
    }
}

/// Hands out sequential identifiers under a single scheme.
#[derive(Debug)]
pub struct UniqueIdSupplier {
    scheme: String,
    next: AtomicU64,
}

impl UniqueIdSupplier {
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> UniqueId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        UniqueId::new(self.scheme.clone(), n.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_format() {
        let id = UniqueId::new("Trade", "42");
        assert_eq!(id.to_string(), "Trade::42");
    }

    #[test]
    fn test_supplier_is_sequential() {
        let supplier = UniqueIdSupplier::new("Job");
        assert_eq!(supplier.next_id(), UniqueId::new("Job", "1"));
        assert_eq!(supplier.next_id(), UniqueId::new("Job", "2"));
        assert_eq!(supplier.next_id(), UniqueId::new("Job", "3"));
    }
}
