//! Checking data (entities, contexts, requests) against a schema.

use std::collections::BTreeMap;

use crate::error::PolicyError;
use crate::schema::{RecordType, Schema, SchemaType};
use crate::types::{Entity, Request, Value};

/// Check that `value` has type `expected`. The error describes the first
/// mismatch found, relative to `path`.
fn conform_value(
    expected: &SchemaType,
    value: &Value,
    path: &str,
) -> Result<(), String> {
    match (expected, value) {
        (SchemaType::Bool, Value::Bool(_))
        | (SchemaType::Long, Value::Long(_))
        | (SchemaType::String, Value::String(_)) => Ok(()),
        (SchemaType::Set(element), Value::Set(values)) => values
            .iter()
            .try_for_each(|v| conform_value(element, v, &format!("{path}[..]"))),
        (SchemaType::Record(record), Value::Record(attrs)) => conform_record(record, attrs, path),
        (SchemaType::Entity(ty), Value::EntityUid(uid)) if uid.entity_type() == ty => Ok(()),
        (SchemaType::Extension(kind), Value::Extension(ext)) if ext.kind() == *kind => Ok(()),
        (expected, value) => Err(format!(
            "{path}: expected {expected}, got {}",
            value.type_name()
        )),
    }
}

fn conform_record(
    record: &RecordType,
    attrs: &BTreeMap<String, Value>,
    path: &str,
) -> Result<(), String> {
    for (name, declared) in &record.attrs {
        match attrs.get(name) {
            Some(value) => conform_value(&declared.ty, value, &format!("{path}.{name}"))?,
            None if declared.required => {
                return Err(format!("{path}: missing required attribute `{name}`"));
            }
            None => {}
        }
    }
    if !record.additional_attributes {
        if let Some(extra) = attrs.keys().find(|k| !record.attrs.contains_key(*k)) {
            return Err(format!("{path}: attribute `{extra}` is not declared"));
        }
    }
    Ok(())
}

/// Check an entity against its declared type, or, for action entities,
/// against the declared action.
pub fn conform_entity(schema: &Schema, entity: &Entity) -> Result<(), PolicyError> {
    let uid = entity.uid();

    if uid.is_action() {
        if schema.action(uid).is_none() {
            return Err(PolicyError::EntityError(format!(
                "found action entity `{uid}`, but it was not declared as an action in the schema"
            )));
        }
        if let Some(attr) = entity.attrs().keys().next() {
            return Err(PolicyError::EntityError(format!(
                "attribute `{attr}` on `{uid}` should not exist according to the schema"
            )));
        }
        if let Some(parent) = entity.parents().iter().find(|p| !p.is_action()) {
            return Err(PolicyError::EntityError(format!(
                "action `{uid}` has a non-action parent `{parent}`"
            )));
        }
        return Ok(());
    }

    let declared = schema.entity_type(uid.entity_type()).ok_or_else(|| {
        PolicyError::EntityError(format!(
            "entity `{uid}` has type `{}` which is not declared in the schema",
            uid.entity_type()
        ))
    })?;

    conform_record(&declared.shape, entity.attrs(), &uid.to_string())
        .map_err(PolicyError::EntityError)?;

    if let Some(parent) = entity
        .parents()
        .iter()
        .find(|p| !declared.member_of_types.contains(p.entity_type()))
    {
        return Err(PolicyError::EntityError(format!(
            "`{uid}` is not allowed to have a parent of type `{}` according to the schema",
            parent.entity_type()
        )));
    }
    Ok(())
}

/// Check a request against the declaration of its action.
pub fn validate_request(schema: &Schema, request: &Request) -> Result<(), PolicyError> {
    let action = schema.action(&request.action).ok_or_else(|| {
        PolicyError::RequestValidationError(format!(
            "action `{}` is not declared in the schema",
            request.action
        ))
    })?;

    let principal_type = request.principal.entity_type();
    if !action.principal_types.contains(principal_type) {
        return Err(PolicyError::RequestValidationError(format!(
            "principal type `{principal_type}` is not valid for `{}`",
            request.action
        )));
    }

    let resource_type = request.resource.entity_type();
    if !action.resource_types.contains(resource_type) {
        return Err(PolicyError::RequestValidationError(format!(
            "resource type `{resource_type}` is not valid for `{}`",
            request.action
        )));
    }

    let context: BTreeMap<String, Value> = request
        .context
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    conform_record(&action.context, &context, "context")
        .map_err(PolicyError::RequestValidationError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::ExtensionValue;
    use crate::types::{Context, EntityUid};
    use yare::parameterized;

    const SCHEMA: &str = r#"{
        "": {
            "entityTypes": {
                "User": {
                    "memberOfTypes": ["UserGroup"],
                    "shape": {
                        "type": "Record",
                        "attributes": {
                            "department": {"type": "String"},
                            "jobLevel": {"type": "Long", "required": false},
                            "tags": {"type": "Set", "element": {"type": "String"}}
                        }
                    }
                },
                "UserGroup": {},
                "Photo": {}
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
                            "attributes": {"confidence_score": {"type": "Extension", "name": "decimal"}}
                        }
                    }
                }
            }
        }
    }"#;

    fn schema() -> Schema {
        SCHEMA.parse().unwrap()
    }

    fn alice() -> Entity {
        Entity::new(EntityUid::of("User", "alice"))
            .with_attr("department", "HardwareEngineering")
            .with_attr("tags", Value::set([Value::from("a")]))
    }

    fn decimal(s: &str) -> Value {
        Value::Extension(ExtensionValue::construct("decimal", s).unwrap())
    }

    #[test]
    fn test_conforming_entity() {
        let schema = schema();
        conform_entity(&schema, &alice()).unwrap();
        conform_entity(
            &schema,
            &alice()
                .with_attr("jobLevel", 5)
                .with_parent(EntityUid::of("UserGroup", "g")),
        )
        .unwrap();
        conform_entity(
            &schema,
            &Entity::new(EntityUid::of("Action", "view"))
                .with_parent(EntityUid::of("Action", "readOnly")),
        )
        .unwrap();
    }

    #[parameterized(
        undeclared_type = { Entity::new(EntityUid::of("Robot", "r2")), "not declared" },
        missing_required = { Entity::new(EntityUid::of("User", "bob")), "missing required attribute `department`" },
        undeclared_attr = { alice().with_attr("age", 3), "`age` is not declared" },
        wrong_type = { alice().with_attr("jobLevel", "high"), "expected Long, got string" },
        wrong_element = { alice().with_attr("tags", Value::set([Value::Long(1)])), "expected String" },
        bad_parent = { alice().with_parent(EntityUid::of("Photo", "p")), "parent of type `Photo`" },
        undeclared_action = { Entity::new(EntityUid::of("Action", "delete")), "not declared as an action" },
        action_attr = { Entity::new(EntityUid::of("Action", "view")).with_attr("x", 1), "should not exist" },
        action_parent = { Entity::new(EntityUid::of("Action", "view")).with_parent(EntityUid::of("UserGroup", "g")), "non-action parent" },
    )]
    fn test_nonconforming_entity(entity: Entity, message: &str) {
        let err = conform_entity(&schema(), &entity).unwrap_err();
        assert!(
            matches!(err, PolicyError::EntityError(ref m) if m.contains(message)),
            "{err}"
        );
    }

    #[test]
    fn test_valid_request() {
        let request = Request::new(
            EntityUid::of("User", "alice"),
            EntityUid::of("Action", "view"),
            EntityUid::of("Photo", "p"),
        )
        .with_context(Context::new().with_attr("confidence_score", decimal("0.4")));
        validate_request(&schema(), &request).unwrap();
    }

    #[parameterized(
        unknown_action = { "User", "delete", "Photo", Context::new().with_attr("confidence_score", decimal("0.4")), "not declared" },
        bad_principal = { "Photo", "view", "Photo", Context::new().with_attr("confidence_score", decimal("0.4")), "principal type" },
        bad_resource = { "User", "view", "User", Context::new().with_attr("confidence_score", decimal("0.4")), "resource type" },
        missing_context = { "User", "view", "Photo", Context::new(), "confidence_score" },
        wrong_context = { "User", "view", "Photo", Context::new().with_attr("confidence_score", 1), "expected decimal" },
    )]
    fn test_invalid_request(principal: &str, action: &str, resource: &str, context: Context, message: &str) {
        let request = Request::new(
            EntityUid::of(principal, "x"),
            EntityUid::of("Action", action),
            EntityUid::of(resource, "y"),
        )
        .with_context(context);
        let err = validate_request(&schema(), &request).unwrap_err();
        assert!(
            matches!(err, PolicyError::RequestValidationError(ref m) if m.contains(message)),
            "{err}"
        );
    }
}
