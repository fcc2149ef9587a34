//! The JSON schema format:
//! `{"<namespace>": {"entityTypes": {..}, "actions": {..}, "commonTypes": {..}}}`.
//!
//! Names are resolved against the enclosing namespace: `User` inside `App`
//! means `App::User`, and actions become `App::Action::"<id>"`.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::PolicyError;
use crate::extensions::ExtensionKind;
use crate::types::{EntityType, EntityUid};

use super::types::{ActionSchema, AttributeType, EntityTypeSchema, RecordType, SchemaType};
use super::Schema;

/// Nesting limit for common type references.
const MAX_TYPE_DEPTH: usize = 32;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct NamespaceJson {
    #[serde(default)]
    entity_types: BTreeMap<String, EntityTypeJson>,
    #[serde(default)]
    actions: BTreeMap<String, ActionJson>,
    #[serde(default)]
    common_types: BTreeMap<String, TypeJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityTypeJson {
    #[serde(default)]
    member_of_types: Vec<String>,
    #[serde(default)]
    shape: Option<TypeJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionJson {
    #[serde(default)]
    member_of: Vec<ActionRefJson>,
    #[serde(default)]
    applies_to: Option<AppliesToJson>,
}

#[derive(Debug, Deserialize)]
struct ActionRefJson {
    id: String,
    #[serde(rename = "type", default)]
    ty: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppliesToJson {
    #[serde(default)]
    principal_types: Vec<String>,
    #[serde(default)]
    resource_types: Vec<String>,
    #[serde(default)]
    context: Option<TypeJson>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeJson {
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    element: Option<Box<TypeJson>>,
    #[serde(default)]
    attributes: BTreeMap<String, TypeJson>,
    #[serde(default)]
    additional_attributes: bool,
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_true")]
    required: bool,
}

struct Resolver<'a> {
    namespace: &'a str,
    common_types: &'a BTreeMap<String, TypeJson>,
}

impl Resolver<'_> {
    fn entity_type(&self, name: &str) -> Result<EntityType, PolicyError> {
        let ty = EntityType::qualified(self.namespace, name);
        EntityType::from_str(ty.name())
            .map_err(|_| PolicyError::SchemaError(format!("`{name}` is not a valid type name")))
    }

    fn ty(&self, json: &TypeJson, depth: usize) -> Result<SchemaType, PolicyError> {
        if depth > MAX_TYPE_DEPTH {
            return Err(PolicyError::SchemaError(format!(
                "common type `{}` is nested too deeply or is recursive",
                json.ty
            )));
        }

        match json.ty.as_str() {
            "Boolean" | "Bool" => Ok(SchemaType::Bool),
            "Long" => Ok(SchemaType::Long),
            "String" => Ok(SchemaType::String),
            "Set" => {
                let element = json.element.as_ref().ok_or_else(|| {
                    PolicyError::SchemaError("`Set` type without `element`".to_string())
                })?;
                Ok(SchemaType::Set(Box::new(self.ty(element, depth + 1)?)))
            }
            "Record" => Ok(SchemaType::Record(self.record(json, depth)?)),
            "Entity" => Ok(SchemaType::Entity(self.entity_type(self.name(json)?)?)),
            "Extension" => {
                let name = self.name(json)?;
                ExtensionKind::from_str(name)
                    .map(SchemaType::Extension)
                    .map_err(|_| PolicyError::SchemaError(format!("unknown extension type `{name}`")))
            }
            other => {
                let common = self.common_types.get(other).ok_or_else(|| {
                    PolicyError::SchemaError(format!("unknown type `{other}`"))
                })?;
                self.ty(common, depth + 1)
            }
        }
    }

    fn name<'j>(&self, json: &'j TypeJson) -> Result<&'j str, PolicyError> {
        json.name.as_deref().ok_or_else(|| {
            PolicyError::SchemaError(format!("`{}` type without `name`", json.ty))
        })
    }

    fn record(&self, json: &TypeJson, depth: usize) -> Result<RecordType, PolicyError> {
        let attrs = json
            .attributes
            .iter()
            .map(|(name, attr)| {
                let ty = self.ty(attr, depth + 1)?;
                Ok((
                    name.clone(),
                    AttributeType {
                        ty,
                        required: attr.required,
                    },
                ))
            })
            .collect::<Result<BTreeMap<_, _>, PolicyError>>()?;
        Ok(RecordType {
            attrs,
            additional_attributes: json.additional_attributes,
        })
    }

    fn shape(&self, json: Option<&TypeJson>) -> Result<RecordType, PolicyError> {
        match json {
            None => Ok(RecordType::default()),
            Some(json) => match self.ty(json, 0)? {
                SchemaType::Record(record) => Ok(record),
                other => Err(PolicyError::SchemaError(format!(
                    "shapes and contexts must be records, got {other}"
                ))),
            },
        }
    }

    fn action_uid(&self, id: &str, ty: Option<&str>) -> EntityUid {
        let ty = match ty {
            Some(ty) => EntityType::qualified(self.namespace, ty),
            None => EntityType::action_in(self.namespace),
        };
        EntityUid::new(ty, id)
    }
}

pub(super) fn parse(json: serde_json::Value) -> Result<Schema, PolicyError> {
    let namespaces: BTreeMap<String, NamespaceJson> =
        serde_json::from_value(json).map_err(|e| PolicyError::SchemaError(e.to_string()))?;

    let mut schema = Schema::empty();
    for (namespace, body) in &namespaces {
        let resolver = Resolver {
            namespace,
            common_types: &body.common_types,
        };

        for (name, entity) in &body.entity_types {
            let ty = resolver.entity_type(name)?;
            let member_of_types = entity
                .member_of_types
                .iter()
                .map(|t| resolver.entity_type(t))
                .collect::<Result<_, _>>()?;
            let shape = resolver.shape(entity.shape.as_ref())?;
            schema.add_entity_type(
                ty,
                EntityTypeSchema {
                    member_of_types,
                    shape,
                },
            )?;
        }

        for (id, action) in &body.actions {
            let mut declared = ActionSchema::new(resolver.action_uid(id, None));
            declared.member_of = action
                .member_of
                .iter()
                .map(|r| resolver.action_uid(&r.id, r.ty.as_deref()))
                .collect();
            if let Some(applies_to) = &action.applies_to {
                declared.principal_types = applies_to
                    .principal_types
                    .iter()
                    .map(|t| resolver.entity_type(t))
                    .collect::<Result<_, _>>()?;
                declared.resource_types = applies_to
                    .resource_types
                    .iter()
                    .map(|t| resolver.entity_type(t))
                    .collect::<Result<_, _>>()?;
                declared.context = resolver.shape(applies_to.context.as_ref())?;
            }
            schema.add_action(declared)?;
        }
    }

    schema.check_references()?;
    Ok(schema)
}
