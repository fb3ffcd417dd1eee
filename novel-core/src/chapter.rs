//! Chapters and the book outline.

use crate::recovery::{Record, RecordExt};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One chapter-level descriptor of the outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub number: usize,
    pub title: String,
    pub summary: String,
    pub characters: Vec<String>,
    pub locations: Vec<String>,
    pub events: Vec<String>,
}

impl OutlineEntry {
    /// Build an entry from a loosely-typed service record.
    ///
    /// `position` is the zero-based index in the reply; the number the service
    /// gave is kept only until [`normalize_outline`] renumbers everything.
    pub fn from_record(record: &Record, position: usize) -> Self {
        let number = position + 1;
        Self {
            number: record.number("number").unwrap_or(number),
            title: record.text_or("title", &format!("Chapter {number}")),
            summary: record.text_or("summary", ""),
            characters: record.list("characters"),
            locations: record.list("locations"),
            events: record.list("events"),
        }
    }

    /// Generic entry used to pad a short outline.
    ///
    /// Cast and setting are cloned from `template` when there is one.
    pub fn placeholder(number: usize, template: Option<&OutlineEntry>) -> Self {
        Self {
            number,
            title: format!("Chapter {number}"),
            summary: format!("Part {number} of the story"),
            characters: template.map(|t| t.characters.clone()).unwrap_or_default(),
            locations: template.map(|t| t.locations.clone()).unwrap_or_default(),
            events: placeholder_events(number),
        }
    }
}

fn placeholder_events(number: usize) -> Vec<String> {
    vec![format!("Event {number}.1"), format!("Event {number}.2")]
}

/// Force an outline to exactly `chapter_count` entries numbered `1..=N`.
///
/// Short outlines are padded with placeholders cloned from the last entry,
/// long ones truncated. Numbers from the service are discarded.
pub fn normalize_outline(mut entries: Vec<OutlineEntry>, chapter_count: usize) -> Vec<OutlineEntry> {
    if entries.len() > chapter_count {
        tracing::warn!(
            returned = entries.len(),
            expected = chapter_count,
            "Outline has too many chapters, truncating"
        );
        entries.truncate(chapter_count);
    } else if entries.len() < chapter_count {
        tracing::warn!(
            returned = entries.len(),
            expected = chapter_count,
            "Outline has too few chapters, padding with placeholders"
        );
        let template = entries.last().cloned();
        for number in entries.len() + 1..=chapter_count {
            entries.push(OutlineEntry::placeholder(number, template.as_ref()));
        }
    }

    for (position, entry) in entries.iter_mut().enumerate() {
        entry.number = position + 1;
    }
    entries
}

/// Outline used when the service never produced a parsable one.
///
/// Each chapter gets up to three character names and two location names
/// drawn at random from the given pools.
pub fn fallback_outline<R: Rng + ?Sized>(
    chapter_count: usize,
    character_names: &[String],
    location_names: &[String],
    rng: &mut R,
) -> Vec<OutlineEntry> {
    use rand::seq::SliceRandom;

    let characters = non_empty_or(character_names, "Main Character");
    let locations = non_empty_or(location_names, "Main Setting");

    (1..=chapter_count)
        .map(|number| OutlineEntry {
            number,
            title: format!("Chapter {number}"),
            summary: format!("Part {number} of the story"),
            characters: characters
                .choose_multiple(rng, characters.len().min(3))
                .cloned()
                .collect(),
            locations: locations
                .choose_multiple(rng, locations.len().min(2))
                .cloned()
                .collect(),
            events: placeholder_events(number),
        })
        .collect()
}

fn non_empty_or(names: &[String], placeholder: &str) -> Vec<String> {
    if names.is_empty() {
        vec![placeholder.to_string()]
    } else {
        names.to_vec()
    }
}

/// A finished chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub number: usize,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub characters: Vec<String>,
    pub locations: Vec<String>,
    pub events: Vec<String>,
}

impl Chapter {
    /// Markdown heading used in chapter files, the draft and the book.
    pub fn heading(&self) -> String {
        format!("# Chapter {}: {}", self.number, self.title)
    }

    /// The chapter as a standalone Markdown document.
    pub fn to_markdown(&self) -> String {
        format!("{}\n\n{}", self.heading(), self.content)
    }

    /// Rebuild a chapter from a file written by [`Chapter::to_markdown`].
    ///
    /// Only the body is read back; everything else comes from `entry`.
    pub fn from_markdown(entry: &OutlineEntry, markdown: &str) -> Self {
        let body = if markdown.starts_with("# ") {
            markdown.split_once('\n').map_or("", |(_, rest)| rest)
        } else {
            markdown
        };
        Self {
            number: entry.number,
            title: entry.title.clone(),
            summary: entry.summary.clone(),
            content: body.trim_start_matches('\n').to_string(),
            characters: entry.characters.clone(),
            locations: entry.locations.clone(),
            events: entry.events.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn entry(number: usize, title: &str) -> OutlineEntry {
        OutlineEntry {
            number,
            title: title.to_string(),
            summary: String::new(),
            characters: vec!["Ada".into(), "Bran".into()],
            locations: vec!["Harbor".into()],
            events: vec!["Arrival".into()],
        }
    }

    fn numbers(outline: &[OutlineEntry]) -> Vec<usize> {
        outline.iter().map(|e| e.number).collect()
    }

    #[test]
    fn test_normalize_pads_short_outline() {
        let outline = normalize_outline(vec![entry(7, "One"), entry(7, "Two")], 5);

        assert_eq!(numbers(&outline), vec![1, 2, 3, 4, 5]);
        assert_eq!(outline[1].title, "Two");
        assert_eq!(outline[4].title, "Chapter 5");
        assert_eq!(outline[4].characters, vec!["Ada", "Bran"]);
        assert_eq!(outline[4].events, vec!["Event 5.1", "Event 5.2"]);
    }

    #[test]
    fn test_normalize_exact_renumbers() {
        let outline = normalize_outline(vec![entry(4, "A"), entry(4, "B"), entry(9, "C")], 3);
        assert_eq!(numbers(&outline), vec![1, 2, 3]);
        assert_eq!(outline[2].title, "C");
    }

    #[test]
    fn test_normalize_truncates_long_outline() {
        let raw: Vec<_> = (0..8).map(|i| entry(i, &format!("T{i}"))).collect();
        let outline = normalize_outline(raw, 3);
        assert_eq!(numbers(&outline), vec![1, 2, 3]);
        assert_eq!(outline[2].title, "T2");
    }

    #[test]
    fn test_normalize_for_many_counts() {
        for n in 1..=12usize {
            for raw_len in [0, 1, n.saturating_sub(1), n, n + 4] {
                let raw: Vec<_> = (0..raw_len).map(|i| entry(100 - i, "x")).collect();
                let outline = normalize_outline(raw, n);
                assert_eq!(numbers(&outline), (1..=n).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn test_entry_from_record_defaults() {
        let record = json!({"title": "Storm", "characters": ["Ada"]})
            .as_object()
            .cloned()
            .unwrap();
        let entry = OutlineEntry::from_record(&record, 2);
        assert_eq!(entry.number, 3);
        assert_eq!(entry.title, "Storm");
        assert_eq!(entry.characters, vec!["Ada"]);
        assert!(entry.events.is_empty());
    }

    #[test]
    fn test_fallback_outline() {
        let mut rng = StdRng::seed_from_u64(1);
        let characters: Vec<String> = ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
        let outline = fallback_outline(4, &characters, &[], &mut rng);

        assert_eq!(numbers(&outline), vec![1, 2, 3, 4]);
        assert!(outline.iter().all(|e| e.characters.len() == 3));
        assert!(outline.iter().all(|e| e.locations == vec!["Main Setting"]));
    }

    #[test]
    fn test_chapter_markdown() {
        let chapter = Chapter {
            number: 2,
            title: "The Crossing".into(),
            summary: String::new(),
            content: "They rowed at dawn.".into(),
            characters: vec![],
            locations: vec![],
            events: vec![],
        };
        assert_eq!(chapter.to_markdown(), "# Chapter 2: The Crossing\n\nThey rowed at dawn.");
    }

    #[test]
    fn test_chapter_from_markdown() {
        let outline = entry(2, "The Crossing");
        let chapter = Chapter::from_markdown(&outline, "# Chapter 2: Old title\n\nThey rowed.\n\nAt dawn.");

        assert_eq!(chapter.title, "The Crossing");
        assert_eq!(chapter.content, "They rowed.\n\nAt dawn.");
        assert_eq!(chapter.characters, vec!["Ada", "Bran"]);
        assert_eq!(chapter.events, vec!["Arrival"]);
        assert_eq!(Chapter::from_markdown(&outline, &chapter.to_markdown()), chapter);

        assert_eq!(Chapter::from_markdown(&outline, "No heading.").content, "No heading.");
        assert_eq!(Chapter::from_markdown(&outline, "# Chapter 2: Empty").content, "");
    }
}
