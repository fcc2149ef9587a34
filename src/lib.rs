//! An in-memory authorization decision engine.
//!
//! Policies are evaluated against a request (principal, action, resource,
//! context) and an [`EntityStore`] holding the entity hierarchy. The
//! [`PolicyEngine`] wraps a reloadable [`PolicySet`] and optional [`Schema`];
//! [`decide`] is the stateless entry point.

pub use authorizer::{Authorizer, decide};
pub use engine::{PolicyEngine, PolicySnapshot};
pub use entities::EntityStore;
pub use error::{EvalError, PolicyError};
pub use policy_match::{PolicyEffectFilter, PolicyMatch, PolicyMatchReason};
pub use policy_set::PolicySet;
pub use schema::Schema;
pub use types::{Context, Decision, Entity, EntityUid, PolicyVersion, Request, Response, Value};
pub use validator::{ValidationResult, validate};

pub mod ast;
pub mod authorizer;
pub mod engine;
pub mod entities;
pub mod error;
pub mod evaluator;
pub mod extensions;
pub mod loader;
pub mod metrics;
pub mod policy_match;
pub mod policy_set;
pub mod schema;
pub mod types;
pub mod validator;

mod timers;
