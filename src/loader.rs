//! Loading policies, entities, schemas and contexts from JSON.
//!
//! Policies come either as a list of policy objects (ids default to
//! `policy0`, `policy1`, ... by position) or as an object:
//!
//! ```json
//! {
//!   "staticPolicies": {"id": {..}},
//!   "templates": {"id": {..}},
//!   "templateLinks": [{"templateId": "t", "newId": "l", "values": {"?principal": {..}}}]
//! }
//! ```
//!
//! `policies` and `links` are accepted for `staticPolicies` and
//! `templateLinks`, and `policies` may itself be a list.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::ast::{PolicyId, SlotId, Template};
use crate::entities::EntityStore;
use crate::error::PolicyError;
use crate::policy_set::PolicySet;
use crate::schema::Schema;
use crate::types::{Context, Entity, EntityUid, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkJson {
    template_id: PolicyId,
    new_id: PolicyId,
    #[serde(default)]
    values: BTreeMap<SlotId, EntityUid>,
}

fn template(id: PolicyId, body: JsonValue) -> Result<Template, PolicyError> {
    let template: Template = serde_json::from_value(body)
        .map_err(|e| PolicyError::ParseError(format!("policy `{id}`: {e}")))?;
    Ok(template.with_id(id))
}

/// Add a policy body: static when it has no slots, a template otherwise.
fn add_body(set: &mut PolicySet, id: PolicyId, body: JsonValue) -> Result<(), PolicyError> {
    let template = template(id, body)?;
    if template.has_slots() {
        set.add_template(template)
    } else {
        set.add_static(template)
    }
}

fn add_list(set: &mut PolicySet, items: Vec<JsonValue>) -> Result<(), PolicyError> {
    for (idx, item) in items.into_iter().enumerate() {
        let id = item
            .get("id")
            .and_then(JsonValue::as_str)
            .map(PolicyId::new)
            .unwrap_or_else(|| PolicyId::new(format!("policy{idx}")));
        add_body(set, id, item)?;
    }
    Ok(())
}

fn add_map(set: &mut PolicySet, bodies: JsonValue) -> Result<(), PolicyError> {
    match bodies {
        JsonValue::Object(bodies) => {
            for (id, body) in bodies {
                add_body(set, PolicyId::new(id), body)?;
            }
            Ok(())
        }
        JsonValue::Array(items) => add_list(set, items),
        other => Err(PolicyError::InvalidFormat(format!(
            "expected an object or a list of policies, got `{other}`"
        ))),
    }
}

fn take_either(object: &mut Map<String, JsonValue>, keys: [&str; 2]) -> Option<JsonValue> {
    keys.iter().find_map(|key| object.remove(*key))
}

/// Parse a policy set from an already-decoded JSON document.
pub fn policies_from_json(json: JsonValue) -> Result<PolicySet, PolicyError> {
    let mut set = PolicySet::new();
    match json {
        JsonValue::Array(items) => add_list(&mut set, items)?,
        JsonValue::Object(mut object) => {
            if let Some(templates) = object.remove("templates") {
                add_map(&mut set, templates)?;
            }
            if let Some(policies) = take_either(&mut object, ["staticPolicies", "policies"]) {
                add_map(&mut set, policies)?;
            }
            if let Some(links) = take_either(&mut object, ["templateLinks", "links"]) {
                let links: Vec<LinkJson> = serde_json::from_value(links)
                    .map_err(|e| PolicyError::LinkingError(e.to_string()))?;
                for link in links {
                    set.link(&link.template_id, link.new_id, link.values)?;
                }
            }
            if let Some(unknown) = object.keys().next() {
                return Err(PolicyError::InvalidFormat(format!(
                    "unexpected key `{unknown}` in policy set"
                )));
            }
        }
        other => {
            return Err(PolicyError::InvalidFormat(format!(
                "a policy set must be a list or an object, got `{other}`"
            )));
        }
    }

    debug!(
        event = "Policies",
        phase = "Loaded",
        policies = set.len(),
        templates = set.templates().count()
    );
    Ok(set)
}

pub fn load_policies(text: &str) -> Result<PolicySet, PolicyError> {
    let json: JsonValue =
        serde_json::from_str(text).map_err(|e| PolicyError::ParseError(e.to_string()))?;
    policies_from_json(json)
}

/// Parse a list of `{"uid": .., "attrs": {..}, "parents": [..]}` objects.
pub fn load_entities(text: &str) -> Result<Vec<Entity>, PolicyError> {
    serde_json::from_str(text).map_err(|e| PolicyError::EntityError(e.to_string()))
}

/// Parse entities and build a store, checking them against `schema` when
/// one is given.
pub fn load_entity_store(text: &str, schema: Option<&Schema>) -> Result<EntityStore, PolicyError> {
    let entities = load_entities(text)?;
    match schema {
        Some(schema) => EntityStore::new_with_schema(entities, schema),
        None => EntityStore::new(entities),
    }
}

pub fn load_schema(text: &str) -> Result<Schema, PolicyError> {
    text.parse()
}

/// Parse a context; it must be a JSON object.
pub fn load_context(text: &str) -> Result<Context, PolicyError> {
    let json: JsonValue =
        serde_json::from_str(text).map_err(|e| PolicyError::ContextError(e.to_string()))?;
    if !json.is_object() {
        return Err(PolicyError::ContextError(format!(
            "expected `context` to be a record, but got `{json}`"
        )));
    }
    match Value::from_json(&json).map_err(|e| PolicyError::ContextError(e.to_string()))? {
        Value::Record(attrs) => Ok(Context::from(attrs)),
        other => Err(PolicyError::ContextError(format!(
            "expected `context` to be a record, but got {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Effect;
    use crate::extensions::ExtensionValue;

    const PERMIT_ALICE: &str = r#"{
        "effect": "permit",
        "principal": {"op": "==", "entity": {"type": "User", "id": "alice"}},
        "action": {"op": "==", "entity": {"type": "Action", "id": "view"}},
        "resource": {"op": "All"},
        "conditions": []
    }"#;

    #[test]
    fn test_list_form_default_ids() {
        let text = format!(
            r#"[{PERMIT_ALICE}, {{"effect": "forbid", "principal": {{"op": "All"}}, "action": {{"op": "All"}}, "resource": {{"op": "All"}}, "conditions": []}}]"#
        );
        let set = load_policies(&text).unwrap();
        let ids: Vec<&str> = set.policies().map(|p| p.id().as_str()).collect();
        assert_eq!(ids, vec!["policy0", "policy1"]);
        assert_eq!(set.get(&"policy1".into()).unwrap().effect(), Effect::Forbid);
    }

    #[test]
    fn test_list_form_explicit_id() {
        let set = load_policies(r#"[{"id": "mine", "effect": "permit"}]"#).unwrap();
        assert!(set.get(&"mine".into()).is_some());
    }

    #[test]
    fn test_object_form_with_links() {
        let text = format!(
            r#"{{
                "staticPolicies": {{"alice": {PERMIT_ALICE}}},
                "templates": {{
                    "t": {{
                        "effect": "permit",
                        "principal": {{"op": "in", "slot": "?principal"}},
                        "action": {{"op": "All"}},
                        "resource": {{"op": "All"}},
                        "conditions": []
                    }}
                }},
                "templateLinks": [
                    {{"templateId": "t", "newId": "admins", "values": {{"?principal": {{"type": "Group", "id": "admins"}}}}}}
                ]
            }}"#
        );
        let set = load_policies(&text).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.templates().count(), 1);
        let link = set.get(&"admins".into()).unwrap();
        assert_eq!(link.template_id(), &PolicyId::new("t"));
    }

    #[test]
    fn test_policy_set_round_trips_through_serialization() {
        let set = load_policies(&format!(r#"{{"policies": [{PERMIT_ALICE}]}}"#)).unwrap();
        let again = policies_from_json(serde_json::to_value(&set).unwrap()).unwrap();
        assert_eq!(set, again);
    }

    #[test]
    fn test_bad_inputs() {
        assert!(matches!(load_policies("{"), Err(PolicyError::ParseError(_))));
        assert!(matches!(load_policies("3"), Err(PolicyError::InvalidFormat(_))));
        assert!(matches!(
            load_policies(r#"{"rules": []}"#),
            Err(PolicyError::InvalidFormat(_))
        ));
        assert!(matches!(
            load_policies(r#"[{"effect": "maybe"}]"#),
            Err(PolicyError::ParseError(ref m)) if m.contains("policy0")
        ));
        assert!(matches!(
            load_policies(r#"{"links": [{"templateId": "nope", "newId": "x", "values": {}}]}"#),
            Err(PolicyError::LinkingError(_))
        ));
    }

    #[test]
    fn test_load_entities() {
        let store = load_entity_store(
            r#"[
                {"uid": {"type": "User", "id": "alice"}, "attrs": {"age": 30}, "parents": [{"type": "Group", "id": "g"}]},
                {"uid": {"__entity": {"type": "Group", "id": "g"}}}
            ]"#,
            None,
        )
        .unwrap();
        assert_eq!(store.len(), 2);
        let alice = store.get(&EntityUid::of("User", "alice")).unwrap();
        assert_eq!(alice.attr("age"), Some(&Value::Long(30)));
        assert!(store.is_descendant_of(&EntityUid::of("User", "alice"), &EntityUid::of("Group", "g")));
    }

    #[test]
    fn test_load_context() {
        let context = load_context(
            r#"{"confidence_score": {"__extn": {"fn": "decimal", "arg": "0.455"}}, "legacy": {"__expr": "decimal(\"0.455\")"}}"#,
        )
        .unwrap();
        let expected = Value::Extension(ExtensionValue::construct("decimal", "0.455").unwrap());
        assert_eq!(context.get("confidence_score"), Some(&expected));
        assert_eq!(context.get("legacy"), Some(&expected));

        assert!(matches!(load_context("[1]"), Err(PolicyError::ContextError(_))));
    }
}
