//! Data model types for requests, entities and values.
//!
//! Canonical string forms:
//! - Entity uid: `User::"alice"` or `NS::User::"alice"`
//! - Extension value: `decimal("0.455")`, `ip("10.0.0.0/8")`, `u256("2345")`
//!
//! JSON forms are described in [`json`].

mod context;
mod decision;
mod entity;
mod entity_uid;
pub mod json;
mod request;
mod value;

pub use context::Context;
pub use decision::{AuthorizationError, Decision, PolicyVersion, Response};
pub use entity::Entity;
pub use entity_uid::{ACTION_BASENAME, EntityType, EntityUid};
pub use request::Request;
pub use value::Value;
