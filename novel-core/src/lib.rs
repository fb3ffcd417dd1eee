//! Long-form narrative generation with story memory.
//!
//! This crate provides:
//! - A store of characters, locations and events with fingerprint lookup
//! - Recovery of structured output from a free-text generative service
//! - The job orchestrator (universe, outline, chapters, final book)
//! - Checkpointing so a multi-hour run leaves usable output behind
//!
//! # Quick Start
//!
//! ```ignore
//! use novel_core::{ContentClient, GeminiModel, JobSettings, Orchestrator, ServiceSettings, StoryConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StoryConfig::load("theme.config").await?;
//!     let settings = ServiceSettings::from_env(None)?;
//!     let client = ContentClient::new(GeminiModel::from_settings(&settings));
//!
//!     let mut job = Orchestrator::new(config, client, JobSettings::default())?;
//!     let report = job.run().await?;
//!     println!("Wrote {} chapters", report.chapters_written);
//!     Ok(())
//! }
//! ```

pub mod chapter;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod export;
pub mod fingerprint;
pub mod orchestrator;
pub mod persist;
pub mod prompts;
pub mod recovery;
pub mod service;
pub mod store;
pub mod testing;

// Primary public API
pub use chapter::{Chapter, OutlineEntry};
pub use checkpoint::{CheckpointManager, CheckpointTag};
pub use config::{ConfigError, ServiceSettings, StoryConfig};
pub use export::{DocumentExporter, PandocExporter};
pub use fingerprint::Fingerprint;
pub use orchestrator::{JobError, JobReport, JobSettings, Orchestrator, Phase};
pub use persist::OutputLayout;
pub use recovery::Recovered;
pub use service::{ContentClient, GeminiModel, RetryPolicy, TextModel};
pub use store::{StoreSnapshot, StoryStore};
pub use testing::{Reply, ScriptedModel};
