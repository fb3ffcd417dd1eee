//! Prompt templates.
//!
//! Every prompt opens with a `Task:` line naming what it asks for. The
//! markers are public so tests can script replies per task.

use crate::chapter::OutlineEntry;
use crate::config::StoryConfig;
use crate::context::ChapterContext;
use crate::store::{Character, Location};

pub const TASK_PLOT: &str = "Task: plot summary";
pub const TASK_CHARACTERS: &str = "Task: character list";
pub const TASK_LOCATIONS: &str = "Task: location list";
pub const TASK_OUTLINE: &str = "Task: outline";
pub const TASK_CHAPTER: &str = "Task: chapter";
pub const TASK_CHAPTER_CONDENSED: &str = "Task: chapter (condensed)";
pub const TASK_REPAIR: &str = "Task: repair";
pub const TASK_TITLE: &str = "Task: title";
pub const TASK_FOREWORD: &str = "Task: foreword";
pub const TASK_APPENDIX: &str = "Task: appendix";

pub const CHARACTER_SCHEMA: &str = r#"[
  {
    "name": "Character name",
    "description": "Physical and personality traits",
    "traits": ["Trait 1", "Trait 2"],
    "background": "Character history",
    "relationships": {"Other character": "Nature of the relationship"},
    "story_arc": "How the character changes over the story"
  }
]"#;

pub const LOCATION_SCHEMA: &str = r#"[
  {
    "name": "Location name",
    "description": "Detailed description",
    "importance": "Role of the place in the story",
    "connected_locations": ["Other location"]
  }
]"#;

pub const OUTLINE_SCHEMA: &str = r#"[
  {
    "number": 1,
    "title": "Chapter title",
    "summary": "Two or three sentences",
    "characters": ["Character name"],
    "locations": ["Location name"],
    "events": ["Main event"]
  }
]"#;

/// Character limits for entity details embedded in prompts.
const OUTLINE_DETAIL_CHARS: usize = 100;
const CHAPTER_DETAIL_CHARS: usize = 200;

/// Shorten `text` to at most `max` characters, marking the cut with `...`.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

pub fn plot(config: &StoryConfig) -> String {
    format!(
        "{TASK_PLOT}\n\n\
         Write a detailed plot summary for a book with these properties:\n\
         - Genre: {genre}\n\
         - Theme: {theme}\n\
         - Main plot idea: {plot}\n\
         - Target audience: {audience}\n\
         - Number of chapters: {count}\n\n\
         Cover the main story arc, the major turning points, the central conflicts \
         and how they resolve, and the key thematic elements. The summary must carry \
         a book of about {count} chapters. Write in {language}.",
        genre = config.genre,
        theme = config.theme,
        plot = config.main_plot,
        audience = config.target_audience,
        count = config.chapter_count,
        language = config.language,
    )
}

pub fn characters(config: &StoryConfig, plot_summary: &str) -> String {
    format!(
        "{TASK_CHARACTERS}\n\n\
         Based on this plot summary:\n{plot_summary}\n\n\
         Create 5-8 main characters and 10-15 supporting characters. Characters \
         should be deep, engaging and {complexity}. Return only a JSON array in \
         this shape, with no other commentary:\n{CHARACTER_SCHEMA}\n\n\
         Write the field values in {language}.",
        complexity = config.character_complexity,
        language = config.language,
    )
}

pub fn locations(config: &StoryConfig, plot_summary: &str) -> String {
    format!(
        "{TASK_LOCATIONS}\n\n\
         Based on this plot summary:\n{plot_summary}\n\n\
         Create 10-15 important locations, rich in detail and fitting the {genre} \
         genre. Return only a JSON array in this shape:\n{LOCATION_SCHEMA}\n\n\
         Write the field values in {language}.",
        genre = config.genre,
        language = config.language,
    )
}

pub fn outline(config: &StoryConfig, characters: &[Character], locations: &[Location]) -> String {
    let character_list = bullet_list(
        characters
            .iter()
            .map(|c| format!("{}: {}", c.name, truncate(&c.description, OUTLINE_DETAIL_CHARS))),
    );
    let location_list = bullet_list(
        locations
            .iter()
            .map(|l| format!("{}: {}", l.name, truncate(&l.description, OUTLINE_DETAIL_CHARS))),
    );

    format!(
        "{TASK_OUTLINE}\n\n\
         Create a detailed outline for a book of exactly {count} chapters.\n\n\
         Genre: {genre}\n\
         Theme: {theme}\n\
         Main plot: {plot}\n\
         Tone: {tone}\n\n\
         Characters:\n{character_list}\n\n\
         Locations:\n{location_list}\n\n\
         For each chapter give its number, a title, a short summary, 2-5 characters \
         from the list, 1-3 locations from the list and 2-4 main events. The story \
         must progress coherently across all {count} chapters. Return a JSON array \
         with one object per chapter:\n{OUTLINE_SCHEMA}\n\n\
         Write titles and summaries in {language}.",
        count = config.chapter_count,
        genre = config.genre,
        theme = config.theme,
        plot = config.main_plot,
        tone = config.tone,
        language = config.language,
    )
}

/// Full-context chapter prompt.
pub fn chapter(config: &StoryConfig, entry: &OutlineEntry, context: &ChapterContext) -> String {
    let character_details = bullet_list(context.characters.iter().map(|c| {
        format!(
            "{}: {}\n  Background: {}",
            c.name,
            c.description,
            truncate(&c.background, CHAPTER_DETAIL_CHARS)
        )
    }));
    let location_details = bullet_list(
        context
            .locations
            .iter()
            .map(|l| format!("{}: {}", l.name, truncate(&l.description, CHAPTER_DETAIL_CHARS))),
    );
    let recap = context
        .recap
        .iter()
        .map(|r| format!("Chapter {} - {}: {}", r.number, r.title, r.summary))
        .collect::<Vec<_>>()
        .join("\n");
    let related = bullet_list(
        context
            .related_events
            .iter()
            .map(|e| format!("{}: {}", e.title, e.description)),
    );

    format!(
        "{TASK_CHAPTER}\n\n\
         Write one chapter of a book from the information below.\n\n\
         Chapter number: {number}\n\
         Chapter title: {title}\n\
         Chapter summary: {summary}\n\n\
         Characters:\n{character_details}\n\n\
         Locations:\n{location_details}\n\n\
         Main events: {events}\n\n\
         Previous chapters:\n{recap}\n\n\
         Related past events:\n{related}\n\n\
         Use flowing, gripping narration, dialogue that shows the characters' \
         growth and motives, and detailed descriptions of place. Include the listed \
         events but enrich them, and refer naturally to earlier chapters. Write \
         2000-3000 words in {language}, formatted as Markdown, in a {tone} tone.",
        number = entry.number,
        title = entry.title,
        summary = entry.summary,
        events = entry.events.join(", "),
        language = config.language,
        tone = config.tone,
    )
}

/// Reduced chapter prompt used after the full one failed.
pub fn chapter_condensed(
    config: &StoryConfig,
    entry: &OutlineEntry,
    character_names: &[String],
    location_names: &[String],
) -> String {
    format!(
        "{TASK_CHAPTER_CONDENSED}\n\n\
         Write one chapter of a book from the information below.\n\n\
         Chapter number: {number}\n\
         Chapter title: {title}\n\
         Chapter summary: {summary}\n\n\
         Characters: {characters}\n\
         Locations: {locations}\n\
         Main events: {events}\n\n\
         Write fluent prose in {language}, formatted as Markdown.",
        number = entry.number,
        title = entry.title,
        summary = entry.summary,
        characters = character_names.join(", "),
        locations = location_names.join(", "),
        events = entry.events.join(", "),
        language = config.language,
    )
}

/// Chapter body used when no prompt produced usable prose.
pub fn fallback_chapter(entry: &OutlineEntry, character_names: &[String], location_names: &[String]) -> String {
    format!(
        "{summary}\n\n\
         In this chapter {characters} meet at {locations}.\n\n\
         Events: {events}.\n\n\
         [Generated placeholder: full text generation failed]",
        summary = entry.summary,
        characters = character_names.join(", "),
        locations = location_names.join(", "),
        events = entry.events.join(", "),
    )
}

/// Ask the service to turn its own malformed reply into valid JSON.
pub fn repair(kind: &str, malformed: &str, schema: &str) -> String {
    format!(
        "{TASK_REPAIR} {kind}\n\n\
         The following {kind} was supposed to be a JSON array but could not be \
         parsed:\n\n{malformed}\n\n\
         Rewrite it as a valid JSON array in exactly this shape and return nothing \
         else:\n{schema}"
    )
}

pub fn title(config: &StoryConfig) -> String {
    format!(
        "{TASK_TITLE}\n\n\
         Suggest one striking book title for this book. Reply with the title only.\n\n\
         Genre: {genre}\n\
         Theme: {theme}\n\
         Main plot: {plot}\n\n\
         The title must be in {language}.",
        genre = config.genre,
        theme = config.theme,
        plot = config.main_plot,
        language = config.language,
    )
}

pub fn foreword(config: &StoryConfig, book_title: &str) -> String {
    format!(
        "{TASK_FOREWORD}\n\n\
         Write a foreword of about 500 words for this book.\n\n\
         Title: {book_title}\n\
         Genre: {genre}\n\
         Theme: {theme}\n\n\
         Introduce the theme and the world without revealing major events. \
         Write in {language}.",
        genre = config.genre,
        theme = config.theme,
        language = config.language,
    )
}

pub fn appendix(config: &StoryConfig) -> String {
    format!(
        "{TASK_APPENDIX}\n\n\
         Write an appendix for a {genre} book about {theme} containing:\n\
         1. A description of the world and its structure\n\
         2. A glossary of important terms\n\
         3. A chronological timeline\n\n\
         It should help the reader follow the story. Write in {language}, \
         formatted as Markdown.",
        genre = config.genre,
        theme = config.theme,
        language = config.language,
    )
}

fn bullet_list(lines: impl Iterator<Item = String>) -> String {
    lines.map(|line| format!("- {line}")).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("çğüşöı", 2), "çğ...");
    }

    #[test]
    fn test_outline_truncates_descriptions() {
        let config = StoryConfig::new("Fantasy").with_chapter_count(12);
        let characters = vec![Character::new("Ada", "x".repeat(300))];
        let prompt = outline(&config, &characters, &[]);

        assert!(prompt.starts_with(TASK_OUTLINE));
        assert!(prompt.contains("exactly 12 chapters"));
        assert!(prompt.contains(&format!("- Ada: {}...", "x".repeat(100))));
        assert!(!prompt.contains(&"x".repeat(101)));
    }

    #[test]
    fn test_repair_embeds_reply_and_schema() {
        let prompt = repair("location list", "{broken", LOCATION_SCHEMA);
        assert!(prompt.starts_with("Task: repair location list"));
        assert!(prompt.contains("{broken"));
        assert!(prompt.contains("connected_locations"));
    }

    #[test]
    fn test_chapter_prompts_carry_number() {
        let config = StoryConfig::default();
        let entry = OutlineEntry::placeholder(7, None);
        let full = chapter(&config, &entry, &ChapterContext::default());
        let condensed = chapter_condensed(&config, &entry, &["Ada".into()], &[]);

        assert!(full.starts_with(TASK_CHAPTER));
        assert!(!full.starts_with(TASK_CHAPTER_CONDENSED));
        assert!(condensed.starts_with(TASK_CHAPTER_CONDENSED));
        assert!(full.contains("Chapter number: 7\n"));
        assert!(condensed.contains("Chapter number: 7\n"));
        assert!(full.contains("Event 7.1, Event 7.2"));
    }
}
