//! Final document assembly and rendering.

use crate::chapter::Chapter;
use crate::store::StoryStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

/// Errors from rendering the final document.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Could not launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Renders the Markdown book into a fixed-layout document.
#[async_trait]
pub trait DocumentExporter: Send + Sync {
    async fn export(&self, markdown: &Path, target: &Path) -> Result<(), ExportError>;
}

/// Exporter running `pandoc` with the XeLaTeX engine.
#[derive(Debug, Clone)]
pub struct PandocExporter {
    program: PathBuf,
}

impl Default for PandocExporter {
    fn default() -> Self {
        Self {
            program: PathBuf::from("pandoc"),
        }
    }
}

impl PandocExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific pandoc binary.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl DocumentExporter for PandocExporter {
    async fn export(&self, markdown: &Path, target: &Path) -> Result<(), ExportError> {
        let program = self.program.display().to_string();
        let output = Command::new(&self.program)
            .arg(markdown)
            .arg("-o")
            .arg(target)
            .arg("--pdf-engine=xelatex")
            .output()
            .await
            .map_err(|source| ExportError::Launch {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExportError::Failed {
                program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Everything that goes into the final book besides the chapters.
#[derive(Debug, Clone, Default)]
pub struct FrontMatter {
    pub title: String,
    pub foreword: String,
    pub appendix: String,
}

/// Concatenate the book: front matter, chapters in order, a character
/// section, a location section and the appendix.
pub fn assemble_document<'a>(
    matter: &FrontMatter,
    chapters: impl IntoIterator<Item = &'a Chapter>,
    store: &StoryStore,
) -> String {
    let mut doc = format!(
        "# {}\n\n## Foreword\n\n{}\n\n---\n\n",
        matter.title.trim(),
        matter.foreword.trim()
    );

    doc.push_str(&crate::checkpoint::render_draft(chapters));

    doc.push_str("# Characters\n\n");
    for character in store.characters() {
        doc.push_str(&format!(
            "### {}\n{}\n\n**Traits:** {}\n\n",
            character.name,
            character.description,
            character.traits.join(", ")
        ));
    }

    doc.push_str("# Locations\n\n");
    for location in store.locations() {
        doc.push_str(&format!(
            "### {}\n{}\n\n**Importance:** {}\n\n",
            location.name, location.description, location.importance
        ));
    }

    doc.push_str(&format!("# Appendix\n\n{}\n", matter.appendix.trim()));
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Character, Location};

    fn chapter(number: usize) -> Chapter {
        Chapter {
            number,
            title: format!("Part {number}"),
            summary: String::new(),
            content: "Text.".into(),
            characters: vec![],
            locations: vec![],
            events: vec![],
        }
    }

    #[test]
    fn test_document_layout() {
        let mut store = StoryStore::with_dimensions(8);
        store
            .insert_character(Character::new("Ada", "Navigator").with_traits(&["bold", "wry"]))
            .unwrap();
        store
            .insert_location(Location::new("Harbor", "Salt and rope", "Home port"))
            .unwrap();
        let matter = FrontMatter {
            title: "  The Long Tide\n".into(),
            foreword: "Read on.".into(),
            appendix: "Glossary".into(),
        };
        let chapters = vec![chapter(3), chapter(1), chapter(2)];
        let doc = assemble_document(&matter, &chapters, &store);

        assert!(doc.starts_with("# The Long Tide\n\n## Foreword\n\nRead on."));
        let positions: Vec<usize> = (1..=3)
            .map(|n| doc.find(&format!("# Chapter {n}: Part {n}")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));

        let characters = doc.find("# Characters").unwrap();
        let locations = doc.find("# Locations").unwrap();
        let appendix = doc.find("# Appendix").unwrap();
        assert!(positions[2] < characters && characters < locations && locations < appendix);
        assert!(doc.contains("**Traits:** bold, wry"));
        assert!(doc.contains("**Importance:** Home port"));
    }

    #[tokio::test]
    async fn test_missing_pandoc_is_an_error() {
        let exporter = PandocExporter::with_program("/nonexistent/pandoc-binary");
        let result = exporter
            .export(Path::new("book.md"), Path::new("book.pdf"))
            .await;
        assert!(matches!(result, Err(ExportError::Launch { .. })));
    }
}
