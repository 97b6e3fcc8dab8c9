//! The requirement/specification model: what is wanted versus what a
//! function exactly produces.

pub mod properties;
pub mod requirement;
pub mod specification;
pub mod value;

pub use properties::{Constraint, ValueProperties, ValuePropertiesBuilder};
pub use requirement::{TargetRef, ValueRequirement};
pub use specification::{SpecificationTemplate, TemplateProperty, ValueSpecification};
pub use value::Value;
