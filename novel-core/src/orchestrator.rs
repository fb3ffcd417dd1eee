//! The generation job.
//!
//! An [`Orchestrator`] owns every piece of state for one book and walks it
//! through a fixed sequence of phases:
//!
//! ```text
//! Bootstrapping ──► OutlineGeneration ──► ChapterLoop(1..=N) ──► Finalizing ──► Done
//! ```
//!
//! No phase is revisited. Malformed service output is recovered inside each
//! phase; only errors that survive recovery reach [`Orchestrator::run`],
//! which takes an emergency checkpoint before returning them.
//!
//! A run limited to part of the book resumes from the layout: the saved
//! universe and outline are reused instead of regenerated, and chapter
//! files outside the range are read back so the recap, the draft and the
//! final book cover every chapter on disk.

use crate::chapter::{fallback_outline, normalize_outline, Chapter, OutlineEntry};
use crate::checkpoint::{CheckpointManager, CheckpointTag};
use crate::config::{chapter_range, ConfigError, StoryConfig};
use crate::context::ChapterContext;
use crate::export::{assemble_document, DocumentExporter, FrontMatter};
use crate::persist::{read_json, read_optional, write_atomic, write_json, OutputLayout, PersistError};
use crate::prompts;
use crate::recovery::{recover_array, recover_prose, ArrayRequest, ProsePolicy, Recovered};
use crate::service::{ContentClient, GenerationFailure};
use crate::store::{Character, Event, Location, StoreError, StoreSnapshot, StoryStore};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors that abort a job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Generation(#[from] GenerationFailure),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Where the job currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Bootstrapping,
    OutlineGeneration,
    ChapterLoop { chapter: usize },
    Finalizing,
    Done,
}

/// Knobs for one job run.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub layout: OutputLayout,
    /// Wait before the condensed chapter prompt.
    pub chapter_cooldown: Duration,
    /// Checkpoint after every this many chapters.
    pub checkpoint_interval: usize,
    /// Shorter chapter text is treated as a failed generation.
    pub min_chapter_chars: usize,
    pub outline_max_tokens: usize,
    pub chapter_max_tokens: usize,
    /// First and last chapter to write in this run; the whole book by default.
    pub chapter_start: Option<usize>,
    pub chapter_end: Option<usize>,
    /// Seed for the sampling RNG. Random when unset.
    pub seed: Option<u64>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            layout: OutputLayout::default(),
            chapter_cooldown: Duration::from_secs(10),
            checkpoint_interval: 5,
            min_chapter_chars: 500,
            outline_max_tokens: 8192,
            chapter_max_tokens: 8192,
            chapter_start: None,
            chapter_end: None,
            seed: None,
        }
    }
}

impl JobSettings {
    pub fn with_layout(mut self, layout: OutputLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_chapter_cooldown(mut self, cooldown: Duration) -> Self {
        self.chapter_cooldown = cooldown;
        self
    }

    pub fn with_chapter_range(mut self, start: Option<usize>, end: Option<usize>) -> Self {
        self.chapter_start = start;
        self.chapter_end = end;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Summary of a finished job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub title: String,
    /// Chapters generated by this run.
    pub chapters_written: usize,
    /// Chapters in the final book, including ones read back from disk.
    pub chapters_in_book: usize,
    /// Chapters whose text is the templated fallback.
    pub fallback_chapters: Vec<usize>,
    pub universe_fallback: bool,
    pub outline_fallback: bool,
    /// The Markdown book, if it could be written.
    pub document: Option<PathBuf>,
    pub pdf: Option<PathBuf>,
    pub elapsed: Duration,
}

/// Drives one book from configuration to finished document.
pub struct Orchestrator {
    config: StoryConfig,
    client: ContentClient,
    settings: JobSettings,
    range: RangeInclusive<usize>,
    store: StoryStore,
    outline: Vec<OutlineEntry>,
    chapters: BTreeMap<usize, Chapter>,
    checkpoints: CheckpointManager,
    exporter: Option<Box<dyn DocumentExporter>>,
    rng: StdRng,
    phase: Phase,
    universe_fallback: bool,
    outline_fallback: bool,
    fallback_chapters: Vec<usize>,
}

impl Orchestrator {
    /// Validate the configuration and set up an idle job.
    pub fn new(config: StoryConfig, client: ContentClient, settings: JobSettings) -> Result<Self, JobError> {
        if config.chapter_count == 0 {
            return Err(ConfigError::ZeroChapters.into());
        }
        let range = chapter_range(settings.chapter_start, settings.chapter_end, config.chapter_count)?;
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            checkpoints: CheckpointManager::new(settings.layout.clone()),
            config,
            client,
            settings,
            range,
            store: StoryStore::new(),
            outline: Vec::new(),
            chapters: BTreeMap::new(),
            exporter: None,
            rng,
            phase: Phase::Bootstrapping,
            universe_fallback: false,
            outline_fallback: false,
            fallback_chapters: Vec::new(),
        })
    }

    /// Render the final book with `exporter` in addition to writing Markdown.
    pub fn with_exporter(mut self, exporter: impl DocumentExporter + 'static) -> Self {
        self.exporter = Some(Box::new(exporter));
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn store(&self) -> &StoryStore {
        &self.store
    }

    pub fn outline(&self) -> &[OutlineEntry] {
        &self.outline
    }

    pub fn chapters(&self) -> &BTreeMap<usize, Chapter> {
        &self.chapters
    }

    /// Run every phase. On error, state gathered so far is checkpointed
    /// under the `error` tag before the error is returned.
    pub async fn run(&mut self) -> Result<JobReport, JobError> {
        let started = Instant::now();
        match self.run_phases().await {
            Ok(mut report) => {
                report.elapsed = started.elapsed();
                info!(elapsed = ?report.elapsed, chapters = report.chapters_written, "Book complete");
                Ok(report)
            }
            Err(e) => {
                error!(phase = ?self.phase, error = %e, "Job aborted");
                self.checkpoints
                    .save(&self.store, &self.chapters, CheckpointTag::Error)
                    .await;
                Err(e)
            }
        }
    }

    async fn run_phases(&mut self) -> Result<JobReport, JobError> {
        self.settings.layout.prepare().await?;
        let partial = self.is_partial();

        if !(partial && self.load_universe().await?) {
            self.bootstrap().await?;
        }
        if !(partial && self.load_outline().await?) {
            self.generate_outline().await?;
        }
        if partial {
            self.load_chapters().await?;
        }
        self.chapter_loop().await?;
        self.finalize().await
    }

    /// Whether this run covers only part of the book.
    fn is_partial(&self) -> bool {
        *self.range.start() != 1 || *self.range.end() != self.config.chapter_count
    }

    fn enter(&mut self, phase: Phase) {
        info!(?phase, "Entering phase");
        self.phase = phase;
    }

    // =========================================================================
    // Bootstrapping
    // =========================================================================

    /// Build the story universe. Service and parse errors swap in the
    /// default universe.
    async fn bootstrap(&mut self) -> Result<(), JobError> {
        self.enter(Phase::Bootstrapping);

        let dimensions = self.store.dimensions();
        match self.build_universe(dimensions).await {
            Ok(store) => self.store = store,
            Err(e) => {
                warn!(error = %e, "Universe bootstrap failed, using the default universe");
                self.universe_fallback = true;
                self.store = default_universe(dimensions)?;
            }
        }

        info!(
            characters = self.store.characters().len(),
            locations = self.store.locations().len(),
            "Universe ready"
        );
        if let Err(e) = write_json(&self.settings.layout.universe_path(), &self.store.snapshot()).await {
            warn!(error = %e, "Could not save universe data");
        }
        Ok(())
    }

    /// Reuse the universe saved by an earlier run. Returns `false` when
    /// there is none.
    async fn load_universe(&mut self) -> Result<bool, JobError> {
        let path = self.settings.layout.universe_path();
        let Some(snapshot) = read_json::<StoreSnapshot>(&path).await? else {
            info!(path = %path.display(), "No saved universe, generating a new one");
            return Ok(false);
        };

        self.enter(Phase::Bootstrapping);
        // Events are rebuilt from the chapter files.
        let universe = StoreSnapshot {
            events: Vec::new(),
            ..snapshot
        };
        self.store = StoryStore::from_snapshot(universe, self.store.dimensions())?;
        info!(
            characters = self.store.characters().len(),
            locations = self.store.locations().len(),
            path = %path.display(),
            "Universe loaded"
        );
        Ok(true)
    }

    async fn build_universe(&mut self, dimensions: usize) -> Result<StoryStore, JobError> {
        info!("Generating plot summary");
        let plot = self.client.generate(&prompts::plot(&self.config), None).await?;

        info!("Generating characters");
        let characters = recover_array(
            &self.client,
            ArrayRequest {
                kind: "character list",
                prompt: prompts::characters(&self.config, &plot),
                schema: prompts::CHARACTER_SCHEMA,
                max_output_tokens: None,
            },
            |record, _| Character::from_record(record),
            default_characters,
        )
        .await?;

        info!("Generating locations");
        let locations = recover_array(
            &self.client,
            ArrayRequest {
                kind: "location list",
                prompt: prompts::locations(&self.config, &plot),
                schema: prompts::LOCATION_SCHEMA,
                max_output_tokens: None,
            },
            |record, _| Location::from_record(record),
            default_locations,
        )
        .await?;

        self.universe_fallback = characters.is_fallback() || locations.is_fallback();

        let mut store = StoryStore::with_dimensions(dimensions);
        for character in characters.into_inner() {
            store.insert_character(character)?;
        }
        for location in locations.into_inner() {
            store.insert_location(location)?;
        }
        Ok(store)
    }

    // =========================================================================
    // Outline
    // =========================================================================

    async fn generate_outline(&mut self) -> Result<(), JobError> {
        self.enter(Phase::OutlineGeneration);
        let count = self.config.chapter_count;

        let character_names: Vec<String> = self.store.characters().iter().map(|c| c.name.clone()).collect();
        let location_names: Vec<String> = self.store.locations().iter().map(|l| l.name.clone()).collect();
        let request = ArrayRequest {
            kind: "outline",
            prompt: prompts::outline(&self.config, self.store.characters(), self.store.locations()),
            schema: prompts::OUTLINE_SCHEMA,
            max_output_tokens: Some(self.settings.outline_max_tokens),
        };

        let client = &self.client;
        let rng = &mut self.rng;
        let recovered = recover_array(client, request, OutlineEntry::from_record, || {
            fallback_outline(count, &character_names, &location_names, rng)
        })
        .await?;

        self.outline_fallback = recovered.is_fallback();
        self.outline = normalize_outline(recovered.into_inner(), count);
        info!(chapters = self.outline.len(), fallback = self.outline_fallback, "Outline ready");

        let path = self.settings.layout.outline_path(self.outline_fallback);
        if let Err(e) = write_json(&path, &self.outline).await {
            warn!(error = %e, "Could not save outline");
        }
        Ok(())
    }

    /// Reuse the outline saved by an earlier run, preferring a generated one
    /// over the fallback. Returns `false` when there is none.
    async fn load_outline(&mut self) -> Result<bool, JobError> {
        for fallback in [false, true] {
            let path = self.settings.layout.outline_path(fallback);
            if let Some(entries) = read_json::<Vec<OutlineEntry>>(&path).await? {
                self.enter(Phase::OutlineGeneration);
                self.outline_fallback = fallback;
                self.outline = normalize_outline(entries, self.config.chapter_count);
                info!(chapters = self.outline.len(), path = %path.display(), "Outline loaded");
                return Ok(true);
            }
        }
        info!("No saved outline, generating a new one");
        Ok(false)
    }

    /// Read back chapter files outside this run's range and replay their events.
    async fn load_chapters(&mut self) -> Result<(), JobError> {
        let mut loaded = 0;
        for entry in self.outline.clone() {
            if self.range.contains(&entry.number) {
                continue;
            }
            let path = self.settings.layout.chapter_path(entry.number);
            if let Some(markdown) = read_optional(&path).await? {
                let chapter = Chapter::from_markdown(&entry, &markdown);
                self.record_events(&chapter)?;
                self.chapters.insert(entry.number, chapter);
                loaded += 1;
            }
        }
        info!(chapters = loaded, "Existing chapters loaded");
        Ok(())
    }

    // =========================================================================
    // Chapters
    // =========================================================================

    async fn chapter_loop(&mut self) -> Result<(), JobError> {
        let range = self.range.clone();
        let total = range.end() - range.start() + 1;

        for (done, number) in range.clone().enumerate() {
            self.enter(Phase::ChapterLoop { chapter: number });
            let percent = (done + 1) as f64 / total as f64 * 100.0;
            info!(chapter = number, "Progress: {}/{} ({:.1}%)", done + 1, total, percent);

            let entry = self.outline[number - 1].clone();
            let chapter = self.write_chapter(&entry).await;
            self.record_events(&chapter)?;

            let path = self.settings.layout.chapter_path(number);
            match write_atomic(&path, chapter.to_markdown()).await {
                Ok(()) => info!(chapter = number, path = %path.display(), "Chapter saved"),
                Err(e) => error!(chapter = number, error = %e, "Could not save chapter file"),
            }
            self.chapters.insert(number, chapter);

            if number % self.settings.checkpoint_interval.max(1) == 0 || number == *range.end() {
                self.checkpoints
                    .save(&self.store, &self.chapters, CheckpointTag::Chapter(number))
                    .await;
            }
        }
        Ok(())
    }

    /// Produce one chapter. Never fails: exhausted attempts yield a
    /// templated body built from the outline.
    async fn write_chapter(&mut self, entry: &OutlineEntry) -> Chapter {
        let context = ChapterContext::assemble(&self.store, entry, &self.chapters, &mut self.rng);
        let attempts = vec![
            prompts::chapter(&self.config, entry, &context),
            prompts::chapter_condensed(&self.config, entry, &context.character_names, &context.location_names),
        ];
        let policy = ProsePolicy {
            min_chars: self.settings.min_chapter_chars,
            cooldown: self.settings.chapter_cooldown,
            max_output_tokens: Some(self.settings.chapter_max_tokens),
        };

        let content = recover_prose(&self.client, &attempts, policy, || {
            prompts::fallback_chapter(entry, &context.character_names, &context.location_names)
        })
        .await;
        if let Recovered::FallbackApplied(_) = content {
            warn!(chapter = entry.number, "Chapter uses templated text");
            self.fallback_chapters.push(entry.number);
        }

        Chapter {
            number: entry.number,
            title: entry.title.clone(),
            summary: entry.summary.clone(),
            content: content.into_inner(),
            characters: context.character_names,
            locations: context.location_names,
            events: entry.events.clone(),
        }
    }

    /// One event per outline event title of the chapter.
    fn record_events(&mut self, chapter: &Chapter) -> Result<(), StoreError> {
        let location = chapter.locations.first().cloned().unwrap_or_default();
        for title in &chapter.events {
            let event = Event::new(title, chapter.number)
                .with_characters(chapter.characters.clone())
                .at_location(location.clone());
            self.store.insert_event(event)?;
        }
        Ok(())
    }

    // =========================================================================
    // Finalizing
    // =========================================================================

    async fn finalize(&mut self) -> Result<JobReport, JobError> {
        self.enter(Phase::Finalizing);

        let title = match self.optional_text("title", &prompts::title(&self.config)).await {
            Some(raw) => clean_title(&raw).unwrap_or_else(|| self.config.theme.clone()),
            None => self.config.theme.clone(),
        };
        let foreword = self
            .optional_text("foreword", &prompts::foreword(&self.config, &title))
            .await
            .unwrap_or_default();
        let appendix = self
            .optional_text("appendix", &prompts::appendix(&self.config))
            .await
            .unwrap_or_default();

        let matter = FrontMatter {
            title: title.clone(),
            foreword,
            appendix,
        };
        let missing: Vec<usize> = (1..=self.config.chapter_count)
            .filter(|n| !self.chapters.contains_key(n))
            .collect();
        if !missing.is_empty() {
            warn!(?missing, "The book is missing chapters that have not been written yet");
        }
        let document = assemble_document(&matter, self.chapters.values(), &self.store);

        let book_path = self.settings.layout.book_path();
        let document_path = match write_atomic(&book_path, &document).await {
            Ok(()) => {
                info!(path = %book_path.display(), "Book saved");
                Some(book_path)
            }
            Err(e) => {
                error!(error = %e, "Could not save the book");
                None
            }
        };

        let pdf = match (&self.exporter, &document_path) {
            (Some(exporter), Some(markdown)) => {
                let target = self.settings.layout.pdf_path();
                match exporter.export(markdown, &target).await {
                    Ok(()) => {
                        info!(path = %target.display(), "PDF rendered");
                        Some(target)
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            "PDF export failed; the Markdown book is complete. \
                             Install pandoc and a TeX distribution providing xelatex to render PDFs"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        self.enter(Phase::Done);
        Ok(JobReport {
            title,
            chapters_written: self.range.clone().count(),
            chapters_in_book: self.chapters.len(),
            fallback_chapters: self.fallback_chapters.clone(),
            universe_fallback: self.universe_fallback,
            outline_fallback: self.outline_fallback,
            document: document_path,
            pdf,
            elapsed: Duration::ZERO,
        })
    }

    /// Front matter is optional: a failed call is logged and skipped.
    async fn optional_text(&self, what: &str, prompt: &str) -> Option<String> {
        info!("Generating {what}");
        match self.client.generate(prompt, None).await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(error = %e, "Could not generate {what}, leaving it out");
                None
            }
        }
    }
}

/// First non-empty line, without Markdown heading marks or quotes.
fn clean_title(raw: &str) -> Option<String> {
    raw.lines()
        .map(|line| line.trim().trim_matches(|c| matches!(c, '#' | '*' | '"')).trim())
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

fn default_characters() -> Vec<Character> {
    vec![
        Character::new("Hero", "The protagonist of the story")
            .with_traits(&["Brave", "Determined", "Curious"])
            .with_background("An ordinary person drawn into extraordinary events")
            .with_story_arc("Grows from reluctance to resolve"),
        Character::new("Mentor", "A wise guide")
            .with_traits(&["Wise", "Patient", "Secretive"])
            .with_background("Has walked this road before")
            .with_relationship("Hero", "Teacher and guide")
            .with_story_arc("Passes on what they know"),
        Character::new("Rival", "The Hero's opponent")
            .with_traits(&["Ambitious", "Clever", "Proud"])
            .with_background("Wants what the Hero seeks")
            .with_relationship("Hero", "Opponent")
            .with_story_arc("Is forced to face their own choices"),
    ]
}

fn default_locations() -> Vec<Location> {
    vec![
        Location::new("Capital City", "The center of power in this world", "Main setting"),
        Location::new("Forest", "An old forest full of secrets", "Place of discovery"),
        Location::new("Mountains", "Remote, dangerous peaks", "Place of the final trial"),
    ]
}

/// Universe used when bootstrap fails outright.
fn default_universe(dimensions: usize) -> Result<StoryStore, StoreError> {
    let snapshot = StoreSnapshot {
        characters: default_characters(),
        locations: default_locations(),
        events: Vec::new(),
    };
    StoryStore::from_snapshot(snapshot, dimensions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::RetryPolicy;
    use crate::testing::{Reply, ScriptedModel};
    use tempfile::TempDir;

    fn orchestrator(model: &ScriptedModel, chapters: usize, dir: &TempDir) -> Orchestrator {
        let client = ContentClient::new(model.clone()).with_retry_policy(RetryPolicy::immediate());
        let settings = JobSettings::default()
            .with_layout(OutputLayout::in_dir(dir.path()))
            .with_chapter_cooldown(Duration::ZERO)
            .with_seed(7);
        Orchestrator::new(StoryConfig::new("Mystery").with_chapter_count(chapters), client, settings).unwrap()
    }

    #[test]
    fn test_zero_chapters_rejected() {
        let client = ContentClient::new(ScriptedModel::new());
        let result = Orchestrator::new(
            StoryConfig::default().with_chapter_count(0),
            client,
            JobSettings::default(),
        );
        assert!(matches!(result, Err(JobError::Config(ConfigError::ZeroChapters))));
    }

    #[test]
    fn test_chapter_range_validated() {
        let client = ContentClient::new(ScriptedModel::new());
        let settings = JobSettings::default().with_chapter_range(Some(3), Some(2));
        let result = Orchestrator::new(StoryConfig::default().with_chapter_count(5), client, settings);
        assert!(matches!(
            result,
            Err(JobError::Config(ConfigError::InvalidChapterRange { .. }))
        ));
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("\n# \"The Long Tide\"\nsubtitle").as_deref(), Some("The Long Tide"));
        assert_eq!(clean_title("**Salt**"), Some("Salt".to_string()));
        assert_eq!(clean_title("  \n  "), None);
    }

    #[test]
    fn test_default_universe() {
        let store = default_universe(8).unwrap();
        let names: Vec<&str> = store.characters().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Hero", "Mentor", "Rival"]);
        assert_eq!(store.locations().len(), 3);
        assert_eq!(store.find_character("Rival").unwrap().relationships["Hero"], "Opponent");
    }

    #[tokio::test]
    async fn test_bootstrap_failure_uses_default_universe() {
        let dir = TempDir::new().unwrap();
        let model = ScriptedModel::new().with_default(Reply::fail("offline"));
        let mut job = orchestrator(&model, 2, &dir);

        job.settings.layout.prepare().await.unwrap();
        job.bootstrap().await.unwrap();

        assert!(job.universe_fallback);
        assert_eq!(job.store().characters().len(), 3);
        assert!(job.settings.layout.universe_path().exists());
        // The plot call and its retry, nothing more.
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_outline_transport_failure_aborts_with_error_checkpoint() {
        let dir = TempDir::new().unwrap();
        let model = ScriptedModel::new()
            .on(prompts::TASK_PLOT, Reply::text("A plot."))
            .on(prompts::TASK_CHARACTERS, Reply::text(r#"[{"name": "Ada"}]"#))
            .on(prompts::TASK_LOCATIONS, Reply::text(r#"[{"name": "Harbor"}]"#))
            .with_default(Reply::fail("offline"));
        let mut job = orchestrator(&model, 2, &dir);

        let result = job.run().await;

        assert!(matches!(result, Err(JobError::Generation(_))));
        assert_eq!(job.phase(), Phase::OutlineGeneration);
        let snapshot = OutputLayout::in_dir(dir.path()).snapshot_path(CheckpointTag::Error);
        assert!(snapshot.exists());
    }
}
