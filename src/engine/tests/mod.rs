use super::*;
use crate::ast::PolicyId;
use crate::policy_match::PolicyMatchReason;
use crate::types::{Context, Decision, Value};
use yare::parameterized;

mod metrics_sink;

const PHOTO_SCHEMA: &str = r#"{
    "": {
        "entityTypes": {
            "User": {
                "memberOfTypes": ["UserGroup"],
                "shape": {
                    "type": "Record",
                    "attributes": {
                        "department": {"type": "String"},
                        "jobLevel": {"type": "Long", "required": false}
                    }
                }
            },
            "UserGroup": {},
            "Photo": {
                "memberOfTypes": ["Album"],
                "shape": {
                    "type": "Record",
                    "attributes": {
                        "private": {"type": "Boolean"},
                        "tags": {"type": "Set", "element": {"type": "String"}}
                    }
                }
            },
            "Album": {}
        },
        "actions": {
            "readOnly": {},
            "view": {
                "memberOf": [{"id": "readOnly"}],
                "appliesTo": {
                    "principalTypes": ["User"],
                    "resourceTypes": ["Photo"],
                    "context": {
                        "type": "Record",
                        "attributes": {
                            "confidence_score": {"type": "Extension", "name": "decimal"}
                        }
                    }
                }
            },
            "edit": {
                "appliesTo": {
                    "principalTypes": ["User"],
                    "resourceTypes": ["Photo"]
                }
            }
        }
    }
}"#;

const PHOTO_ENTITIES: &str = r#"[
    {
        "uid": {"type": "User", "id": "alice"},
        "attrs": {"department": "hr", "jobLevel": 5},
        "parents": []
    },
    {
        "uid": {"type": "User", "id": "stacey"},
        "attrs": {"department": "ops"},
        "parents": [{"type": "UserGroup", "id": "jane_friends"}]
    },
    {
        "uid": {"type": "User", "id": "bob"},
        "attrs": {"department": "ops"},
        "parents": []
    },
    {"uid": {"type": "UserGroup", "id": "jane_friends"}},
    {
        "uid": {"type": "Photo", "id": "VacationPhoto94.jpg"},
        "attrs": {"private": false, "tags": ["beach"]},
        "parents": [{"type": "Album", "id": "alice_photos"}]
    },
    {
        "uid": {"type": "Photo", "id": "alice_w2.jpg"},
        "attrs": {"private": true, "tags": []},
        "parents": [{"type": "Album", "id": "alice_photos"}]
    },
    {"uid": {"type": "Album", "id": "alice_photos"}}
]"#;

/// `policy0`: alice may view the vacation photo when the classifier is
/// confident enough.
const CONFIDENCE_POLICY: &str = r#"[
    {
        "effect": "permit",
        "principal": {"op": "==", "entity": {"type": "User", "id": "alice"}},
        "action": {"op": "==", "entity": {"type": "Action", "id": "view"}},
        "resource": {"op": "==", "entity": {"type": "Photo", "id": "VacationPhoto94.jpg"}},
        "conditions": [
            {
                "kind": "when",
                "body": {"greaterThan": [
                    {".": {"left": {"Var": "context"}, "attr": "confidence_score"}},
                    {"decimal": [{"Value": "0.4"}]}
                ]}
            }
        ]
    }
]"#;

/// `policy0` lets jane's friends view anything, `policy1` forbids all access
/// to private photos, `policy2` lets alice do anything in her album.
const MULTI_POLICY: &str = r#"[
    {
        "effect": "permit",
        "principal": {"op": "in", "entity": {"type": "UserGroup", "id": "jane_friends"}},
        "action": {"op": "==", "entity": {"type": "Action", "id": "view"}},
        "resource": {"op": "All"},
        "conditions": []
    },
    {
        "effect": "forbid",
        "principal": {"op": "All"},
        "action": {"op": "All"},
        "resource": {"op": "All"},
        "conditions": [
            {"kind": "when", "body": {".": {"left": {"Var": "resource"}, "attr": "private"}}}
        ]
    },
    {
        "effect": "permit",
        "principal": {"op": "==", "entity": {"type": "User", "id": "alice"}},
        "action": {"op": "All"},
        "resource": {"op": "in", "entity": {"type": "Album", "id": "alice_photos"}},
        "conditions": []
    }
]"#;

#[derive(Clone, Default)]
struct SharedLogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

struct SharedLogWriter(Arc<std::sync::Mutex<Vec<u8>>>);

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedLogBuffer {
    type Writer = SharedLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SharedLogWriter(Arc::clone(&self.0))
    }
}

impl std::io::Write for SharedLogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedLogBuffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

fn schema() -> Schema {
    loader::load_schema(PHOTO_SCHEMA).expect("schema should load")
}

fn entities() -> EntityStore {
    loader::load_entity_store(PHOTO_ENTITIES, Some(&schema())).expect("entities should load")
}

fn engine_from_policy(policies: &str) -> PolicyEngine {
    PolicyEngine::from_json(policies).expect("policy should load")
}

fn schema_engine_from_policy(policies: &str) -> PolicyEngine {
    PolicyEngine::from_json_with_schema(policies, PHOTO_SCHEMA)
        .expect("schema + policy should load")
}

/// A request in the fixture query form.
fn photo_request(user: &str, action: &str, photo: &str, score: &str) -> Request {
    serde_json::from_value(serde_json::json!({
        "principal": format!("User::\"{user}\""),
        "action": format!("Action::\"{action}\""),
        "resource": format!("Photo::\"{photo}\""),
        "context": {"confidence_score": {"__extn": {"fn": "decimal", "arg": score}}}
    }))
    .expect("request should parse")
}

fn uid(ty: &str, id: &str) -> EntityUid {
    EntityUid::of(ty, id)
}

fn assert_allow(response: &Response) {
    assert_eq!(response.decision, Decision::Allow);
}

fn assert_deny(response: &Response) {
    assert_eq!(response.decision, Decision::Deny);
}

include!("core.rs");
include!("listing.rs");
