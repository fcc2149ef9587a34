//! Authorization request type.

use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use super::{Context, EntityUid};

/// One principal/action/resource/context query.
///
/// Entity references deserialize from either `{"type": .., "id": ..}` or the
/// literal text form `Type::"id"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Request {
    #[serde(deserialize_with = "uid_or_text")]
    pub principal: EntityUid,
    #[serde(deserialize_with = "uid_or_text")]
    pub action: EntityUid,
    #[serde(deserialize_with = "uid_or_text")]
    pub resource: EntityUid,
    #[serde(default)]
    pub context: Context,
}

impl Request {
    /// A request with an empty context.
    pub fn new(principal: EntityUid, action: EntityUid, resource: EntityUid) -> Self {
        Self {
            principal,
            action,
            resource,
            context: Context::new(),
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "principal={}, action={}, resource={}",
            self.principal, self.action, self.resource
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UidForm {
    Text(String),
    Json(EntityUid),
}

fn uid_or_text<'de, D>(de: D) -> Result<EntityUid, D::Error>
where
    D: Deserializer<'de>,
{
    match UidForm::deserialize(de)? {
        UidForm::Text(text) => text.parse().map_err(D::Error::custom),
        UidForm::Json(uid) => Ok(uid),
    }
}
