//! On-disk layout of a job's artifacts.
//!
//! ```text
//! output/
//!   chapter_001.md ... chapter_NNN.md   one file per chapter
//!   draft.md                            cumulative draft (checkpoints)
//!   book.md / book.pdf                  final document
//! backup/
//!   universe_data.json                  store after bootstrap
//!   story_outline.json                  normalized outline
//!   store_chapter_005.json ...          checkpoint snapshots
//!   store_error.json                    snapshot from the abort path
//! ```
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! reader never sees a half-written artifact and rewrites replace cleanly.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Errors from writing job artifacts.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where a job writes its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub output_dir: PathBuf,
    pub backup_dir: PathBuf,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            backup_dir: PathBuf::from("backup"),
        }
    }
}

impl OutputLayout {
    pub fn new(output_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            backup_dir: backup_dir.into(),
        }
    }

    /// `output/` and `backup/` under `root`.
    pub fn in_dir(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::new(root.join("output"), root.join("backup"))
    }

    /// Create both directories.
    pub async fn prepare(&self) -> Result<(), PersistError> {
        for dir in [&self.output_dir, &self.backup_dir] {
            fs::create_dir_all(dir).await.map_err(|source| PersistError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn chapter_path(&self, number: usize) -> PathBuf {
        self.output_dir.join(format!("chapter_{number:03}.md"))
    }

    pub fn draft_path(&self) -> PathBuf {
        self.output_dir.join("draft.md")
    }

    pub fn book_path(&self) -> PathBuf {
        self.output_dir.join("book.md")
    }

    pub fn pdf_path(&self) -> PathBuf {
        self.output_dir.join("book.pdf")
    }

    /// Store snapshot for a checkpoint tag.
    pub fn snapshot_path(&self, tag: impl std::fmt::Display) -> PathBuf {
        self.backup_dir.join(format!("store_{tag}.json"))
    }

    pub fn universe_path(&self) -> PathBuf {
        self.backup_dir.join("universe_data.json")
    }

    pub fn outline_path(&self, fallback: bool) -> PathBuf {
        if fallback {
            self.backup_dir.join("story_outline_default.json")
        } else {
            self.backup_dir.join("story_outline.json")
        }
    }
}

/// Replace `path` with `contents` via a temporary file and a rename.
pub async fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> Result<(), PersistError> {
    let io_err = |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    fs::write(&tmp, contents).await.map_err(io_err)?;
    fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}

/// Pretty-printed JSON, written atomically.
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistError> {
    let content = serde_json::to_string_pretty(value)?;
    write_atomic(path, content).await
}

/// Contents of `path`, or `None` if it does not exist.
pub async fn read_optional(path: &Path) -> Result<Option<String>, PersistError> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(PersistError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// JSON previously written with [`write_json`], or `None` if the file is absent.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    match read_optional(path).await? {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}
