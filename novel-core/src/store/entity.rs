//! Narrative entity types.

use crate::recovery::{Record, RecordExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a stored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Create a new unique entity ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The three independently indexed kinds of entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Character,
    Location,
    Event,
}

impl EntityKind {
    /// Display name for this kind.
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Character => "character",
            EntityKind::Location => "location",
            EntityKind::Event => "event",
        }
    }
}

/// Behaviour shared by everything the store can hold.
pub trait Entity: Clone + Serialize {
    const KIND: EntityKind;

    fn id(&self) -> EntityId;

    /// Name used for exact lookup (an event's title).
    fn name(&self) -> &str;

    /// Text the entity's fingerprint is derived from.
    fn fingerprint_text(&self) -> String;
}

/// A character in the story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    pub traits: Vec<String>,
    pub background: String,
    /// Other character's name to a description of the relation.
    pub relationships: BTreeMap<String, String>,
    pub story_arc: String,
}

impl Character {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            description: description.into(),
            traits: Vec::new(),
            background: String::new(),
            relationships: BTreeMap::new(),
            story_arc: String::new(),
        }
    }

    pub fn with_traits(mut self, traits: &[&str]) -> Self {
        self.traits = traits.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.background = background.into();
        self
    }

    pub fn with_relationship(mut self, other: impl Into<String>, relation: impl Into<String>) -> Self {
        self.relationships.insert(other.into(), relation.into());
        self
    }

    pub fn with_story_arc(mut self, arc: impl Into<String>) -> Self {
        self.story_arc = arc.into();
        self
    }

    /// Build a character from a loosely-typed service record.
    pub fn from_record(record: &Record) -> Self {
        Self {
            id: EntityId::new(),
            name: record.text_or("name", "Unnamed Character"),
            description: record.text_or("description", "No description"),
            traits: record.list("traits"),
            background: record.text_or("background", "No background"),
            relationships: record.mapping("relationships"),
            story_arc: record.text_or("story_arc", ""),
        }
    }
}

impl Entity for Character {
    const KIND: EntityKind = EntityKind::Character;

    fn id(&self) -> EntityId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn fingerprint_text(&self) -> String {
        format!("{} {} {}", self.name, self.description, self.background)
    }
}

/// A place in the story world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    pub importance: String,
    pub connected_locations: Vec<String>,
}

impl Location {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        importance: impl Into<String>,
    ) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            description: description.into(),
            importance: importance.into(),
            connected_locations: Vec::new(),
        }
    }

    /// Build a location from a loosely-typed service record.
    pub fn from_record(record: &Record) -> Self {
        Self {
            id: EntityId::new(),
            name: record.text_or("name", "Unnamed Location"),
            description: record.text_or("description", ""),
            importance: record.text_or("importance", ""),
            connected_locations: record.list("connected_locations"),
        }
    }
}

impl Entity for Location {
    const KIND: EntityKind = EntityKind::Location;

    fn id(&self) -> EntityId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn fingerprint_text(&self) -> String {
        format!("{} {}", self.name, self.description)
    }
}

/// A record of something that happened in a chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EntityId,
    pub title: String,
    pub description: String,
    pub characters_involved: Vec<String>,
    /// Name of the location the event happened at (empty if unknown).
    pub location: String,
    pub chapter: usize,
    /// Reserved for explicit event chains; never populated yet.
    pub preceding_events: Vec<EntityId>,
    /// Reserved for explicit event chains; never populated yet.
    pub following_events: Vec<EntityId>,
}

impl Event {
    pub fn new(title: impl Into<String>, chapter: usize) -> Self {
        let title = title.into();
        Self {
            id: EntityId::new(),
            description: format!("Chapter {chapter} event: {title}"),
            title,
            characters_involved: Vec::new(),
            location: String::new(),
            chapter,
            preceding_events: Vec::new(),
            following_events: Vec::new(),
        }
    }

    pub fn with_characters(mut self, characters: Vec<String>) -> Self {
        self.characters_involved = characters;
        self
    }

    pub fn at_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Whether any of `names` took part in this event.
    pub fn involves_any(&self, names: &[String]) -> bool {
        self.characters_involved.iter().any(|c| names.contains(c))
    }
}

impl Entity for Event {
    const KIND: EntityKind = EntityKind::Event;

    fn id(&self) -> EntityId {
        self.id
    }

    fn name(&self) -> &str {
        &self.title
    }

    fn fingerprint_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}
