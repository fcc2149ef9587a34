//! Templates and executable policies keyed by id.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;

use itertools::Itertools;
use serde::{Serialize, Serializer};

use crate::ast::{Policy, PolicyId, SlotId, Template};
use crate::error::PolicyError;
use crate::types::EntityUid;

/// A set of policies.
///
/// Every executable policy points at a template in `templates`. A static
/// policy is stored both as a slot-free template and as its single link,
/// under the same id. Iteration is in id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    templates: BTreeMap<PolicyId, Arc<Template>>,
    links: BTreeMap<PolicyId, Policy>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an executable policy, registering its template if needed.
    pub fn add(&mut self, policy: Policy) -> Result<(), PolicyError> {
        let template = policy.template_arc();

        // Check both maps before touching either.
        let new_template = match self.templates.get(template.id()) {
            Some(existing) if existing != &template => {
                return Err(PolicyError::DuplicatePolicyId(template.id().to_string()));
            }
            Some(_) => false,
            None => true,
        };
        if self.links.contains_key(policy.id()) {
            return Err(PolicyError::DuplicatePolicyId(policy.id().to_string()));
        }

        if new_template {
            self.templates.insert(template.id().clone(), template);
        }
        self.links.insert(policy.id().clone(), policy);
        Ok(())
    }

    /// Add a slot-free template as a static policy.
    pub fn add_static(&mut self, template: Template) -> Result<(), PolicyError> {
        let id = template.id().clone();
        if self.templates.contains_key(&id) || self.links.contains_key(&id) {
            return Err(PolicyError::DuplicatePolicyId(id.to_string()));
        }
        let policy = Policy::new_static(template)?;
        self.templates.insert(id.clone(), policy.template_arc());
        self.links.insert(id, policy);
        Ok(())
    }

    /// Add a template; it takes effect only once linked.
    pub fn add_template(&mut self, template: Template) -> Result<(), PolicyError> {
        match self.templates.entry(template.id().clone()) {
            Entry::Occupied(entry) => Err(PolicyError::DuplicatePolicyId(entry.key().to_string())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(template));
                Ok(())
            }
        }
    }

    /// Link template `template_id` into a new policy `new_id`.
    pub fn link(
        &mut self,
        template_id: &PolicyId,
        new_id: PolicyId,
        values: BTreeMap<SlotId, EntityUid>,
    ) -> Result<&Policy, PolicyError> {
        let template = self.get_template(template_id).ok_or_else(|| {
            PolicyError::LinkingError(format!("no template with id `{template_id}`"))
        })?;
        if self.links.contains_key(&new_id) || self.templates.contains_key(&new_id) {
            return Err(PolicyError::LinkingError(format!(
                "policy id `{new_id}` conflicts with an existing policy or template"
            )));
        }
        let policy = Policy::link(template, new_id.clone(), values)?;
        Ok(self.links.entry(new_id).or_insert(policy))
    }

    /// All executable policies, static and linked.
    pub fn policies(&self) -> impl Iterator<Item = &Policy> {
        self.links.values()
    }

    /// Everything stored as a template, including the bodies of static policies.
    pub fn all_templates(&self) -> impl Iterator<Item = &Template> {
        self.templates.values().map(Arc::as_ref)
    }

    /// Templates with slots.
    pub fn templates(&self) -> impl Iterator<Item = &Template> {
        self.all_templates().filter(|t| t.has_slots())
    }

    pub fn static_policies(&self) -> impl Iterator<Item = &Policy> {
        self.policies().filter(|p| p.is_static())
    }

    pub fn get(&self, id: &PolicyId) -> Option<&Policy> {
        self.links.get(id)
    }

    pub fn get_template(&self, id: &PolicyId) -> Option<Arc<Template>> {
        self.templates.get(id).map(Arc::clone)
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty() && self.links.is_empty()
    }

    /// Number of executable policies.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn try_from_iter<T: IntoIterator<Item = Policy>>(iter: T) -> Result<Self, PolicyError> {
        let mut set = Self::new();
        for policy in iter {
            set.add(policy)?;
        }
        Ok(set)
    }
}

impl Display for PolicySet {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.is_empty() {
            return write!(f, "<empty policy set>");
        }
        write!(f, "{}", self.policies().join("\n"))
    }
}

/// Serializes in the loader's object form: `staticPolicies`, `templates`
/// and `templateLinks`.
impl Serialize for PolicySet {
    fn serialize<S>(&self, ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Link<'a> {
            template_id: &'a PolicyId,
            new_id: &'a PolicyId,
            values: &'a BTreeMap<SlotId, EntityUid>,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct View<'a> {
            static_policies: BTreeMap<&'a PolicyId, &'a Template>,
            templates: BTreeMap<&'a PolicyId, &'a Template>,
            template_links: Vec<Link<'a>>,
        }

        View {
            static_policies: self
                .static_policies()
                .map(|p| (p.id(), p.template()))
                .collect(),
            templates: self.templates().map(|t| (t.id(), t)).collect(),
            template_links: self
                .policies()
                .filter(|p| !p.is_static())
                .map(|p| Link {
                    template_id: p.template_id(),
                    new_id: p.id(),
                    values: p.values(),
                })
                .collect(),
        }
        .serialize(ser)
    }
}
