//! Command-line book generator.
//!
//! Reads the story configuration (`theme.config` by default), talks to
//! Gemini and writes chapters, checkpoints and the final book under
//! `output/` and `backup/`.
//!
//! ```bash
//! cargo run -p novel -- --config theme.config --chapter-start 1 --chapter-end 10
//! ```

use anyhow::Context;
use clap::Parser;
use novel_core::config::{ConfigError, DEFAULT_CONFIG_PATH, ENV_TEMPLATE};
use novel_core::{
    ContentClient, GeminiModel, JobSettings, Orchestrator, OutputLayout, PandocExporter,
    ServiceSettings, StoryConfig,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE: &str = "novel.log";

#[derive(Debug, Parser)]
#[command(name = "novel", version, about = "Generate a full-length book with Gemini")]
struct Cli {
    /// Story configuration file
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Gemini API key (overrides GEMINI_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// First chapter to write
    #[arg(long)]
    chapter_start: Option<usize>,

    /// Last chapter to write
    #[arg(long)]
    chapter_end: Option<usize>,

    /// Directory for chapters and the finished book
    #[arg(long, value_name = "DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Directory for snapshots and the outline
    #[arg(long, value_name = "DIR", default_value = "backup")]
    backup_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Nothing is logged until this succeeds, so its errors go to stderr only.
    if let Err(e) = prepare_environment(Path::new(".env")) {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Create and load `.env`, then start logging.
fn prepare_environment(env_path: &Path) -> anyhow::Result<()> {
    ensure_env_file(env_path)?;
    dotenvy::from_path(env_path).ok();
    init_logging()
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let service = match ServiceSettings::from_env(cli.api_key.clone()) {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "Service configuration error");
            eprintln!("Error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let config = match StoryConfig::load(&cli.config).await {
        Ok(config) => config,
        Err(ConfigError::NotFound(path)) => {
            StoryConfig::write_default(&path)
                .await
                .with_context(|| format!("writing default config to {}", path.display()))?;
            println!("Created {}. Edit it to describe your book, then run again.", path.display());
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => {
            error!(error = %e, "Story configuration error");
            eprintln!("Error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let client = ContentClient::new(GeminiModel::from_settings(&service))
        .with_max_output_tokens(service.max_tokens)
        .with_temperature(service.temperature);
    let layout = OutputLayout::new(&cli.output_dir, &cli.backup_dir);
    let settings = JobSettings::default()
        .with_layout(layout.clone())
        .with_chapter_range(cli.chapter_start, cli.chapter_end);

    let mut job = match Orchestrator::new(config.clone(), client, settings) {
        Ok(job) => job.with_exporter(PandocExporter::new()),
        Err(e) => {
            error!(error = %e, "Invalid job settings");
            eprintln!("Error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    print_banner(&config, &service);
    let started = Instant::now();

    tokio::select! {
        result = job.run() => {
            let elapsed = started.elapsed();
            match result {
                Ok(report) => {
                    println!();
                    println!("\"{}\" is finished.", report.title);
                    println!("  Chapters written: {}", report.chapters_written);
                    println!("  Chapters in book: {}", report.chapters_in_book);
                    if !report.fallback_chapters.is_empty() {
                        println!("  Templated chapters: {:?}", report.fallback_chapters);
                    }
                    if let Some(path) = &report.document {
                        println!("  Book: {}", path.display());
                    }
                    if let Some(path) = &report.pdf {
                        println!("  PDF: {}", path.display());
                    }
                    println!("  Elapsed: {}", format_elapsed(elapsed));
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("Error: {e}");
                    eprintln!(
                        "Partial output is in {} and {}. Elapsed: {}",
                        layout.output_dir.display(),
                        layout.backup_dir.display(),
                        format_elapsed(elapsed)
                    );
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted by user");
            println!();
            println!(
                "Interrupted. Chapters and checkpoints written so far are in {} and {}.",
                layout.output_dir.display(),
                layout.backup_dir.display()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Write a `.env` template on first run.
fn ensure_env_file(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        return Ok(());
    }
    std::fs::write(path, ENV_TEMPLATE).with_context(|| format!("writing {}", path.display()))?;
    eprintln!(
        "Warning: {} not found. A template was created; set GEMINI_API_KEY in it.",
        path.display()
    );
    Ok(())
}

/// Log to stdout and to `novel.log`, filtered by `LOG_LEVEL`.
fn init_logging() -> anyhow::Result<()> {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
    let filter = EnvFilter::try_new(level.to_lowercase()).unwrap_or_else(|_| EnvFilter::new("info"));

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(LOG_FILE)
        .with_context(|| format!("opening {LOG_FILE}"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file)),
        )
        .try_init()
        .context("initializing logging")?;
    Ok(())
}

fn print_banner(config: &StoryConfig, service: &ServiceSettings) {
    println!("=== Novel generator ===");
    println!("  Genre:    {}", config.genre);
    println!("  Theme:    {}", config.theme);
    println!("  Chapters: {}", config.chapter_count);
    println!("  Language: {}", config.language);
    println!("  Model:    {}", service.model);
    println!();
    info!(genre = %config.genre, chapters = config.chapter_count, "Starting book generation");
}

fn format_elapsed(elapsed: std::time::Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_env_template_written_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");

        ensure_env_file(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), ENV_TEMPLATE);

        std::fs::write(&path, "GEMINI_API_KEY=real\n").unwrap();
        ensure_env_file(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "GEMINI_API_KEY=real\n");
    }

    #[test]
    fn test_env_template_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join(".env");
        let message = format!("{:#}", ensure_env_file(&path).unwrap_err());
        assert!(message.contains("writing"));
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(std::time::Duration::from_secs(3725)), "1h 02m 05s");
    }

    #[test]
    fn test_cli_parses_range() {
        let cli = Cli::parse_from(["novel", "--chapter-start", "2", "--chapter-end", "4"]);
        assert_eq!(cli.chapter_start, Some(2));
        assert_eq!(cli.chapter_end, Some(4));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }
}
