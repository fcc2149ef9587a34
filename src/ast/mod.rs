//! Parsed policy structures.
//!
//! Policies arrive already parsed, either built with the constructors here or
//! deserialized from the JSON policy format (see [`crate::loader`]).

mod expr;
mod pattern;
mod policy;
mod scope;

pub use expr::{BinaryOp, Expr, Var};
pub use pattern::{Pattern, PatternElem};
pub use policy::{Condition, ConditionKind, Effect, Policy, PolicyId, Template};
pub use scope::{ActionConstraint, EntityReference, ScopeConstraint, SlotId};
