//! Periodic snapshots of a running job.

use crate::chapter::Chapter;
use crate::persist::{write_atomic, write_json, OutputLayout, PersistError};
use crate::store::StoryStore;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{error, info};

/// What triggered a checkpoint. Part of the snapshot file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointTag {
    /// Regular checkpoint after the given chapter.
    Chapter(usize),
    /// Emergency checkpoint from the abort path.
    Error,
}

impl fmt::Display for CheckpointTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointTag::Chapter(n) => write!(f, "chapter_{n:03}"),
            CheckpointTag::Error => write!(f, "error"),
        }
    }
}

/// Cumulative Markdown of every chapter so far, in chapter order.
pub fn render_draft<'a>(chapters: impl IntoIterator<Item = &'a Chapter>) -> String {
    let mut sorted: Vec<&Chapter> = chapters.into_iter().collect();
    sorted.sort_by_key(|c| c.number);

    let mut draft = String::new();
    for chapter in sorted {
        draft.push_str(&chapter.to_markdown());
        draft.push_str("\n\n---\n\n");
    }
    draft
}

/// Writes the draft and a store snapshot.
///
/// Saving at the same tag twice replaces the earlier files with identical
/// content. Failures are logged and reported as `false`, never raised.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    layout: OutputLayout,
}

impl CheckpointManager {
    pub fn new(layout: OutputLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Persist the current state. Returns whether everything was written.
    pub async fn save(
        &self,
        store: &StoryStore,
        chapters: &BTreeMap<usize, Chapter>,
        tag: CheckpointTag,
    ) -> bool {
        match self.try_save(store, chapters, tag).await {
            Ok(()) => {
                info!(%tag, chapters = chapters.len(), "Checkpoint saved");
                true
            }
            Err(e) => {
                error!(%tag, error = %e, "Checkpoint failed");
                false
            }
        }
    }

    async fn try_save(
        &self,
        store: &StoryStore,
        chapters: &BTreeMap<usize, Chapter>,
        tag: CheckpointTag,
    ) -> Result<(), PersistError> {
        write_atomic(&self.layout.draft_path(), render_draft(chapters.values())).await?;
        write_json(&self.layout.snapshot_path(tag), &store.snapshot()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Character, Event};
    use tempfile::TempDir;

    fn chapter(number: usize) -> Chapter {
        Chapter {
            number,
            title: format!("Title {number}"),
            summary: String::new(),
            content: format!("Body {number}"),
            characters: vec![],
            locations: vec![],
            events: vec![],
        }
    }

    fn state() -> (StoryStore, BTreeMap<usize, Chapter>) {
        let mut store = StoryStore::with_dimensions(8);
        store.insert_character(Character::new("Ada", "Navigator")).unwrap();
        store.insert_event(Event::new("Storm", 1)).unwrap();
        let chapters = [2, 1].into_iter().map(|n| (n, chapter(n))).collect();
        (store, chapters)
    }

    #[test]
    fn test_tag_display() {
        assert_eq!(CheckpointTag::Chapter(5).to_string(), "chapter_005");
        assert_eq!(CheckpointTag::Error.to_string(), "error");
    }

    #[test]
    fn test_draft_sorted_with_separators() {
        let chapters = vec![chapter(2), chapter(1)];
        let draft = render_draft(&chapters);

        assert_eq!(
            draft,
            "# Chapter 1: Title 1\n\nBody 1\n\n---\n\n# Chapter 2: Title 2\n\nBody 2\n\n---\n\n"
        );
    }

    #[tokio::test]
    async fn test_checkpoint_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(OutputLayout::in_dir(dir.path()));
        let (store, chapters) = state();
        let tag = CheckpointTag::Chapter(2);

        assert!(manager.save(&store, &chapters, tag).await);
        let snapshot = std::fs::read(manager.layout().snapshot_path(tag)).unwrap();
        let draft = std::fs::read(manager.layout().draft_path()).unwrap();

        assert!(manager.save(&store, &chapters, tag).await);
        assert_eq!(std::fs::read(manager.layout().snapshot_path(tag)).unwrap(), snapshot);
        assert_eq!(std::fs::read(manager.layout().draft_path()).unwrap(), draft);

        let files = std::fs::read_dir(&manager.layout().backup_dir).unwrap().count();
        assert_eq!(files, 1);
    }

    #[tokio::test]
    async fn test_checkpoint_failure_is_swallowed() {
        let dir = TempDir::new().unwrap();
        // A regular file where the output directory should be.
        let blocker = dir.path().join("output");
        std::fs::write(&blocker, "not a directory").unwrap();

        let manager = CheckpointManager::new(OutputLayout::new(&blocker, dir.path().join("backup")));
        let (store, chapters) = state();
        assert!(!manager.save(&store, &chapters, CheckpointTag::Error).await);
    }
}
