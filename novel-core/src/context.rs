//! Context assembled for each chapter call.

use crate::chapter::{Chapter, OutlineEntry};
use crate::store::{Character, Event, Location, StoryStore};
use rand::Rng;
use std::collections::BTreeMap;

/// Characters sampled when none of the outline's names resolve.
pub const SAMPLED_CHARACTERS: usize = 3;
/// Locations sampled when none of the outline's names resolve.
pub const SAMPLED_LOCATIONS: usize = 2;
/// Prior chapters summarized in the recap.
pub const RECAP_CHAPTERS: usize = 3;
/// Prior events recalled for the chapter's characters.
pub const RELATED_EVENTS: usize = 5;

/// Summary line of an earlier chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recap {
    pub number: usize,
    pub title: String,
    pub summary: String,
}

/// Everything the chapter prompt is conditioned on.
#[derive(Debug, Clone, Default)]
pub struct ChapterContext {
    /// Store entries resolved (or sampled) for the chapter.
    pub characters: Vec<Character>,
    pub locations: Vec<Location>,
    /// Character names credited to the chapter: the outline's, plus any sampled.
    pub character_names: Vec<String>,
    pub location_names: Vec<String>,
    /// Oldest first.
    pub recap: Vec<Recap>,
    /// Most recent chapter first.
    pub related_events: Vec<Event>,
}

impl ChapterContext {
    /// Gather context for `entry` from the store and the chapters written so far.
    pub fn assemble<R: Rng + ?Sized>(
        store: &StoryStore,
        entry: &OutlineEntry,
        chapters: &BTreeMap<usize, Chapter>,
        rng: &mut R,
    ) -> Self {
        let mut character_names = entry.characters.clone();
        let mut characters: Vec<Character> = entry
            .characters
            .iter()
            .filter_map(|name| store.find_character(name))
            .cloned()
            .collect();
        if characters.is_empty() {
            characters = store
                .sample_characters(rng, SAMPLED_CHARACTERS)
                .into_iter()
                .cloned()
                .collect();
            character_names.extend(characters.iter().map(|c| c.name.clone()));
        }

        let mut location_names = entry.locations.clone();
        let mut locations: Vec<Location> = entry
            .locations
            .iter()
            .filter_map(|name| store.find_location(name))
            .cloned()
            .collect();
        if locations.is_empty() {
            locations = store
                .sample_locations(rng, SAMPLED_LOCATIONS)
                .into_iter()
                .cloned()
                .collect();
            location_names.extend(locations.iter().map(|l| l.name.clone()));
        }

        let mut recap: Vec<Recap> = chapters
            .range(..entry.number)
            .rev()
            .take(RECAP_CHAPTERS)
            .map(|(_, c)| Recap {
                number: c.number,
                title: c.title.clone(),
                summary: c.summary.clone(),
            })
            .collect();
        recap.reverse();

        let related_events = store
            .events_involving(&character_names, entry.number, RELATED_EVENTS)
            .into_iter()
            .cloned()
            .collect();

        Self {
            characters,
            locations,
            character_names,
            location_names,
            recap,
            related_events,
        }
    }
}
