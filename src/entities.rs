//! The entity graph and its ancestor closure.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::error::PolicyError;
use crate::schema::Schema;
use crate::types::{Entity, EntityUid};
use crate::validator;

/// Immutable set of entities.
///
/// Ancestor sets are computed on first use and cached per entity; the cache
/// cells are populate-once, so a store can be shared between threads.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    entities: Vec<Entity>,
    index: HashMap<EntityUid, usize>,
    ancestors: Vec<OnceCell<Arc<HashSet<EntityUid>>>>,
    declares_actions: bool,
}

impl EntityStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a store; two entities with the same uid are an error.
    pub fn new(entities: impl IntoIterator<Item = Entity>) -> Result<Self, PolicyError> {
        let mut store = Self::empty();
        for entity in entities {
            store.insert(entity)?;
        }
        debug!(event = "Entities", phase = "Loaded", count = store.len());
        Ok(store)
    }

    /// Build a store whose entities conform to `schema`. The schema's action
    /// entities, with their action-group parents, are added unless the input
    /// already contains them.
    pub fn new_with_schema(
        entities: impl IntoIterator<Item = Entity>,
        schema: &Schema,
    ) -> Result<Self, PolicyError> {
        let mut store = Self::empty();
        for entity in entities {
            validator::conform_entity(schema, &entity)?;
            store.insert(entity)?;
        }
        for action in schema.action_entities() {
            if !store.contains(action.uid()) {
                store.insert(action)?;
            }
        }
        store.declares_actions = true;
        debug!(
            event = "Entities",
            phase = "Loaded",
            count = store.len(),
            schema = true
        );
        Ok(store)
    }

    fn insert(&mut self, entity: Entity) -> Result<(), PolicyError> {
        if self.index.contains_key(entity.uid()) {
            return Err(PolicyError::EntityError(format!(
                "duplicate entity `{}`",
                entity.uid()
            )));
        }
        self.index.insert(entity.uid().clone(), self.entities.len());
        self.entities.push(entity);
        self.ancestors.push(OnceCell::new());
        Ok(())
    }

    /// True when the store was built from a schema and so holds every
    /// declared action.
    pub fn declares_actions(&self) -> bool {
        self.declares_actions
    }

    pub fn get(&self, uid: &EntityUid) -> Option<&Entity> {
        self.index.get(uid).map(|idx| &self.entities[*idx])
    }

    pub fn contains(&self, uid: &EntityUid) -> bool {
        self.index.contains_key(uid)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    /// Transitive closure of the parent relation of `uid`, not including
    /// `uid` itself unless it sits on a cycle.
    pub fn ancestors(&self, uid: &EntityUid) -> Result<Arc<HashSet<EntityUid>>, PolicyError> {
        let idx = *self
            .index
            .get(uid)
            .ok_or_else(|| PolicyError::UnknownEntity(uid.to_string()))?;
        let closure = self.ancestors[idx].get_or_init(|| Arc::new(self.closure(idx)));
        Ok(Arc::clone(closure))
    }

    fn closure(&self, idx: usize) -> HashSet<EntityUid> {
        let mut seen: HashSet<EntityUid> = HashSet::new();
        let mut queue: VecDeque<&EntityUid> = self.entities[idx].parents().iter().collect();

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            // Parents that are not in the store are still ancestors, but
            // contribute nothing further.
            if let Some(parent) = self.get(next) {
                queue.extend(parent.parents().iter().filter(|p| !seen.contains(*p)));
            }
        }
        seen
    }

    /// `a == b`, or `b` is an ancestor of `a`. An entity missing from the
    /// store has no ancestors.
    pub fn is_descendant_of(&self, a: &EntityUid, b: &EntityUid) -> bool {
        a == b
            || self
                .ancestors(a)
                .map(|ancestors| ancestors.contains(b))
                .unwrap_or(false)
    }
}
