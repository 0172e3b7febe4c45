//! Action mappings and the mapping registry
//!
//! A mapping binds an application action to a trigger under a durable id.
//! The registry keeps mappings in insertion order together with the callback
//! registered for each id. It is owned by the dispatch thread; nothing
//! outside the crate sees the callbacks.

use crate::types::{Event, Payload, Trigger};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use uuid::Uuid;

/// Application action identifier
///
/// Usually a fieldless enum. `all` lists every action so UIs can show which
/// ones are still unmapped.
pub trait AppAction: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    fn all() -> Vec<Self>;
}

/// Callback invoked with the payload of a matched event
pub type TriggerCallback = Arc<dyn Fn(Payload) + Send + Sync>;

/// Binding of an action to a trigger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mapping<A> {
    /// Durable identity; re-adding the same id replaces the mapping in place
    pub id: Uuid,
    pub action: A,
    pub event: Trigger,
}

impl<A> Mapping<A> {
    /// New mapping with a fresh random id
    pub fn new(action: A, event: Trigger) -> Self {
        Self::with_id(Uuid::new_v4(), action, event)
    }

    pub fn with_id(id: Uuid, action: A, event: Trigger) -> Self {
        Self { id, action, event }
    }
}

/// A mapping that fired for an event
pub(crate) struct MatchedMapping<A> {
    pub id: Uuid,
    pub action: A,
    pub callback: TriggerCallback,
}

/// Ordered mapping table plus callbacks keyed by id
pub(crate) struct MappingRegistry<A> {
    records: Vec<Mapping<A>>,
    callbacks: HashMap<Uuid, TriggerCallback>,
}

impl<A: AppAction> MappingRegistry<A> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            callbacks: HashMap::new(),
        }
    }

    /// Insert or replace by id
    ///
    /// Returns true if an existing mapping was replaced (its position is kept).
    pub fn add(&mut self, mapping: Mapping<A>, callback: TriggerCallback) -> bool {
        let id = mapping.id;
        let replaced = match self.records.iter_mut().find(|r| r.id == id) {
            Some(existing) => {
                *existing = mapping;
                true
            }
            None => {
                self.records.push(mapping);
                false
            }
        };
        self.callbacks.insert(id, callback);
        replaced
    }

    /// Remove a mapping and drop its callback; `None` if the id is unknown
    pub fn remove(&mut self, id: Uuid) -> Option<Mapping<A>> {
        let index = self.records.iter().position(|r| r.id == id)?;
        self.callbacks.remove(&id);
        Some(self.records.remove(index))
    }

    pub fn mappings(&self) -> &[Mapping<A>] {
        &self.records
    }

    /// All mappings whose trigger fires for this event, in listing order
    ///
    /// Several mappings may share a trigger; every one of them matches.
    pub fn find_matches(&self, event: &Event) -> Vec<MatchedMapping<A>> {
        self.records
            .iter()
            .filter(|r| r.event.matches(event))
            .filter_map(|r| {
                self.callbacks.get(&r.id).map(|callback| MatchedMapping {
                    id: r.id,
                    action: r.action.clone(),
                    callback: Arc::clone(callback),
                })
            })
            .collect()
    }
}

/// Mappings bound to one action, in listing order
pub(crate) fn mappings_for<'a, A: PartialEq>(
    mappings: &'a [Mapping<A>],
    action: &'a A,
) -> impl Iterator<Item = &'a Mapping<A>> + 'a {
    mappings.iter().filter(move |m| &m.action == action)
}
