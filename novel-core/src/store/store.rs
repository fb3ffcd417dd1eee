//! Entity store with per-kind fingerprint indices.

use super::entity::{Character, Entity, EntityId, EntityKind, Event, Location};
use super::index::FingerprintIndex;
use crate::fingerprint::{Fingerprint, DEFAULT_DIMENSIONS};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from store insertion.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} fingerprint has {found} dimensions, index expects {expected}")]
    DimensionMismatch {
        kind: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{kind} id {id} is already stored")]
    DuplicateId { kind: &'static str, id: EntityId },
}

/// One kind of entity: id map, insertion order and fingerprint index.
#[derive(Debug, Clone)]
struct Collection<T> {
    items: Vec<T>,
    by_id: HashMap<EntityId, usize>,
    index: FingerprintIndex,
}

impl<T: Entity> Collection<T> {
    fn new(dimensions: usize) -> Self {
        Self {
            items: Vec::new(),
            by_id: HashMap::new(),
            index: FingerprintIndex::new(dimensions),
        }
    }

    fn add(&mut self, entity: T, fingerprint: Fingerprint) -> Result<EntityId, StoreError> {
        let kind = T::KIND.name();
        if fingerprint.dimensions() != self.index.dimensions() {
            return Err(StoreError::DimensionMismatch {
                kind,
                expected: self.index.dimensions(),
                found: fingerprint.dimensions(),
            });
        }
        let id = entity.id();
        if self.by_id.contains_key(&id) {
            return Err(StoreError::DuplicateId { kind, id });
        }

        let position = self.index.push(fingerprint);
        debug_assert_eq!(position, self.items.len());
        self.by_id.insert(id, position);
        self.items.push(entity);
        Ok(id)
    }

    fn get(&self, id: EntityId) -> Option<&T> {
        self.by_id.get(&id).map(|&pos| &self.items[pos])
    }

    fn find_by_name(&self, name: &str) -> Option<&T> {
        self.items.iter().find(|e| e.name() == name)
    }

    fn search(&self, query: &Fingerprint, k: usize) -> Vec<&T> {
        self.index
            .nearest(query, k)
            .into_iter()
            .map(|(pos, _)| &self.items[pos])
            .collect()
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, amount: usize) -> Vec<&T> {
        self.items
            .choose_multiple(rng, amount.min(self.items.len()))
            .collect()
    }
}

/// Everything the story knows about its characters, locations and events.
///
/// Append-only: entities are never updated or removed during a job.
#[derive(Debug, Clone)]
pub struct StoryStore {
    dimensions: usize,
    characters: Collection<Character>,
    locations: Collection<Location>,
    events: Collection<Event>,
}

impl Default for StoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoryStore {
    /// Create an empty store with the default fingerprint dimensionality.
    pub fn new() -> Self {
        Self::with_dimensions(DEFAULT_DIMENSIONS)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            characters: Collection::new(dimensions),
            locations: Collection::new(dimensions),
            events: Collection::new(dimensions),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Fingerprint an entity with this store's dimensionality.
    pub fn fingerprint_of<T: Entity>(&self, entity: &T) -> Fingerprint {
        Fingerprint::with_dimensions(&entity.fingerprint_text(), self.dimensions)
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    pub fn add_character(
        &mut self,
        character: Character,
        fingerprint: Fingerprint,
    ) -> Result<EntityId, StoreError> {
        self.characters.add(character, fingerprint)
    }

    pub fn add_location(
        &mut self,
        location: Location,
        fingerprint: Fingerprint,
    ) -> Result<EntityId, StoreError> {
        self.locations.add(location, fingerprint)
    }

    pub fn add_event(&mut self, event: Event, fingerprint: Fingerprint) -> Result<EntityId, StoreError> {
        self.events.add(event, fingerprint)
    }

    /// Fingerprint and add a character.
    pub fn insert_character(&mut self, character: Character) -> Result<EntityId, StoreError> {
        let fingerprint = self.fingerprint_of(&character);
        self.add_character(character, fingerprint)
    }

    /// Fingerprint and add a location.
    pub fn insert_location(&mut self, location: Location) -> Result<EntityId, StoreError> {
        let fingerprint = self.fingerprint_of(&location);
        self.add_location(location, fingerprint)
    }

    /// Fingerprint and add an event.
    pub fn insert_event(&mut self, event: Event) -> Result<EntityId, StoreError> {
        let fingerprint = self.fingerprint_of(&event);
        self.add_event(event, fingerprint)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn character(&self, id: EntityId) -> Option<&Character> {
        self.characters.get(id)
    }

    pub fn location(&self, id: EntityId) -> Option<&Location> {
        self.locations.get(id)
    }

    pub fn event(&self, id: EntityId) -> Option<&Event> {
        self.events.get(id)
    }

    /// Exact name match; the first inserted wins when names repeat.
    pub fn find_character(&self, name: &str) -> Option<&Character> {
        self.characters.find_by_name(name)
    }

    pub fn find_location(&self, name: &str) -> Option<&Location> {
        self.locations.find_by_name(name)
    }

    pub fn find_event(&self, title: &str) -> Option<&Event> {
        self.events.find_by_name(title)
    }

    /// Up to `k` characters nearest to `query`.
    pub fn search_characters(&self, query: &Fingerprint, k: usize) -> Vec<&Character> {
        self.characters.search(query, k)
    }

    pub fn search_locations(&self, query: &Fingerprint, k: usize) -> Vec<&Location> {
        self.locations.search(query, k)
    }

    pub fn search_events(&self, query: &Fingerprint, k: usize) -> Vec<&Event> {
        self.events.search(query, k)
    }

    /// A random selection of up to `amount` characters.
    pub fn sample_characters<R: Rng + ?Sized>(&self, rng: &mut R, amount: usize) -> Vec<&Character> {
        self.characters.sample(rng, amount)
    }

    pub fn sample_locations<R: Rng + ?Sized>(&self, rng: &mut R, amount: usize) -> Vec<&Location> {
        self.locations.sample(rng, amount)
    }

    /// Events from chapters before `chapter` involving any of `names`,
    /// most recent chapter first.
    pub fn events_involving(&self, names: &[String], chapter: usize, limit: usize) -> Vec<&Event> {
        let mut events: Vec<&Event> = self
            .events
            .items
            .iter()
            .filter(|e| e.chapter < chapter && e.involves_any(names))
            .collect();
        events.sort_by(|a, b| b.chapter.cmp(&a.chapter));
        events.truncate(limit);
        events
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters.items
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations.items
    }

    pub fn events(&self) -> &[Event] {
        &self.events.items
    }

    /// Number of stored entities of a kind.
    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Character => self.characters.items.len(),
            EntityKind::Location => self.locations.items.len(),
            EntityKind::Event => self.events.items.len(),
        }
    }

    /// Serializable copy of every entity, without fingerprints.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            characters: self.characters.items.clone(),
            locations: self.locations.items.clone(),
            events: self.events.items.clone(),
        }
    }

    /// Rebuild a store from a snapshot, fingerprinting every entity again.
    pub fn from_snapshot(snapshot: StoreSnapshot, dimensions: usize) -> Result<Self, StoreError> {
        let mut store = Self::with_dimensions(dimensions);
        for character in snapshot.characters {
            store.insert_character(character)?;
        }
        for location in snapshot.locations {
            store.insert_location(location)?;
        }
        for event in snapshot.events {
            store.insert_event(event)?;
        }
        Ok(store)
    }
}

/// Persisted form of a [`StoryStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub characters: Vec<Character>,
    pub locations: Vec<Location>,
    pub events: Vec<Event>,
}
