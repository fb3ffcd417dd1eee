//! Story and service configuration.
//!
//! The story configuration lives in a small TOML file (`theme.config` by
//! default) split into `[theme]`, `[structure]` and `[style]` sections. Every
//! key is optional and falls back to a named default. Section names may also
//! be capitalized (`[Theme]`); unknown sections and keys are rejected.
//! Service settings (API key, model, sampling) come from the process
//! environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Default location of the story configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "theme.config";

/// Value written into the `.env` template; never accepted as a real key.
pub const API_KEY_PLACEHOLDER: &str = "your_api_key_here";

/// Contents of the `.env` template written on first run.
pub const ENV_TEMPLATE: &str = "# Gemini API key\n\
GEMINI_API_KEY=your_api_key_here\n\
\n\
# Other settings\n\
GEMINI_MODEL=gemini-1.5-pro\n\
LOG_LEVEL=info\n\
MAX_TOKENS=4096\n\
TEMPERATURE=0.7\n";

const DEFAULT_MODEL: &str = "gemini-1.5-pro";
const DEFAULT_MAX_TOKENS: usize = 4096;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("chapter_count must be at least 1")]
    ZeroChapters,

    #[error("No valid GEMINI_API_KEY configured - set it in .env or pass --api-key")]
    MissingApiKey,

    #[error("Invalid value for {key}: {value:?}")]
    InvalidSetting { key: &'static str, value: String },

    #[error("Invalid chapter range {start}..={end} for a {count}-chapter book")]
    InvalidChapterRange {
        start: usize,
        end: usize,
        count: usize,
    },
}

/// Immutable description of the book to generate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryConfig {
    pub genre: String,
    pub theme: String,
    pub main_plot: String,
    pub target_audience: String,
    pub chapter_count: usize,
    pub language: String,
    pub tone: String,
    pub character_complexity: String,
}

impl Default for StoryConfig {
    fn default() -> Self {
        let theme = ThemeSection::default();
        let structure = StructureSection::default();
        let style = StyleSection::default();
        Self {
            genre: theme.genre,
            theme: theme.theme,
            main_plot: theme.main_plot,
            target_audience: theme.target_audience,
            chapter_count: structure.chapter_count,
            language: structure.language,
            tone: style.tone,
            character_complexity: style.character_complexity,
        }
    }
}

impl StoryConfig {
    /// Create a config for the given genre with defaults for everything else.
    pub fn new(genre: impl Into<String>) -> Self {
        Self {
            genre: genre.into(),
            ..Self::default()
        }
    }

    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = theme.into();
        self
    }

    pub fn with_main_plot(mut self, main_plot: impl Into<String>) -> Self {
        self.main_plot = main_plot.into();
        self
    }

    pub fn with_chapter_count(mut self, chapter_count: usize) -> Self {
        self.chapter_count = chapter_count;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Parse a config document. Missing sections and keys use defaults.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text)?;
        let config = Self::from(file);
        if config.chapter_count == 0 {
            return Err(ConfigError::ZeroChapters);
        }
        Ok(config)
    }

    /// Load and parse a config file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        Self::parse(&text)
    }

    /// Render this config in the on-disk format.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&ConfigFile::from(self.clone()))?)
    }

    /// Write the default config file, for first runs.
    pub async fn write_default(path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = Self::default().to_toml()?;
        fs::write(path, text).await.map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ============================================================================
// On-disk layout
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    #[serde(alias = "Theme")]
    theme: ThemeSection,
    #[serde(alias = "Structure")]
    structure: StructureSection,
    #[serde(alias = "Style")]
    style: StyleSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ThemeSection {
    genre: String,
    theme: String,
    main_plot: String,
    target_audience: String,
}

impl Default for ThemeSection {
    fn default() -> Self {
        Self {
            genre: "Fantasy".to_string(),
            theme: "Adventure and Discovery".to_string(),
            main_plot: "A young hero sets out on a dangerous journey to find a lost treasure."
                .to_string(),
            target_audience: "Young Adult".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StructureSection {
    chapter_count: usize,
    language: String,
}

impl Default for StructureSection {
    fn default() -> Self {
        Self {
            chapter_count: 250,
            language: "English".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StyleSection {
    tone: String,
    character_complexity: String,
}

impl Default for StyleSection {
    fn default() -> Self {
        Self {
            tone: "Balanced".to_string(),
            character_complexity: "Complex".to_string(),
        }
    }
}

impl From<ConfigFile> for StoryConfig {
    fn from(file: ConfigFile) -> Self {
        Self {
            genre: file.theme.genre,
            theme: file.theme.theme,
            main_plot: file.theme.main_plot,
            target_audience: file.theme.target_audience,
            chapter_count: file.structure.chapter_count,
            language: file.structure.language,
            tone: file.style.tone,
            character_complexity: file.style.character_complexity,
        }
    }
}

impl From<StoryConfig> for ConfigFile {
    fn from(config: StoryConfig) -> Self {
        Self {
            theme: ThemeSection {
                genre: config.genre,
                theme: config.theme,
                main_plot: config.main_plot,
                target_audience: config.target_audience,
            },
            structure: StructureSection {
                chapter_count: config.chapter_count,
                language: config.language,
            },
            style: StyleSection {
                tone: config.tone,
                character_complexity: config.character_complexity,
            },
        }
    }
}

// ============================================================================
// Service settings
// ============================================================================

/// Credentials and sampling settings for the generative service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub api_key: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl ServiceSettings {
    /// Read settings from the process environment.
    ///
    /// `api_key_override` (the CLI flag) wins over `GEMINI_API_KEY`.
    pub fn from_env(api_key_override: Option<String>) -> Result<Self, ConfigError> {
        Self::from_lookup(api_key_override, |key| std::env::var(key).ok())
    }

    /// Resolve settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(api_key_override: Option<String>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = api_key_override
            .or_else(|| lookup("GEMINI_API_KEY"))
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty() && key != API_KEY_PLACEHOLDER)
            .ok_or(ConfigError::MissingApiKey)?;

        let model = lookup("GEMINI_MODEL")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let max_tokens = match lookup("MAX_TOKENS") {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidSetting {
                    key: "MAX_TOKENS",
                    value,
                })?,
            None => DEFAULT_MAX_TOKENS,
        };

        let temperature = match lookup("TEMPERATURE") {
            Some(value) => value
                .trim()
                .parse::<f32>()
                .ok()
                .filter(|t| t.is_finite() && *t >= 0.0)
                .ok_or(ConfigError::InvalidSetting {
                    key: "TEMPERATURE",
                    value,
                })?,
            None => DEFAULT_TEMPERATURE,
        };

        Ok(Self {
            api_key,
            model,
            max_tokens,
            temperature,
        })
    }
}

/// Validate optional CLI chapter bounds against the book length.
///
/// Returns the inclusive range of chapter numbers to generate in this run.
pub fn chapter_range(
    start: Option<usize>,
    end: Option<usize>,
    chapter_count: usize,
) -> Result<std::ops::RangeInclusive<usize>, ConfigError> {
    let start = start.unwrap_or(1);
    let end = end.unwrap_or(chapter_count);
    if start == 0 || start > end || end > chapter_count {
        return Err(ConfigError::InvalidChapterRange {
            start,
            end,
            count: chapter_count,
        });
    }
    Ok(start..=end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_full_config() {
        let config = StoryConfig::parse(
            r#"
            [theme]
            genre = "Science Fiction"
            theme = "Isolation"
            main_plot = "A lighthouse keeper on Europa hears a signal."
            target_audience = "Adult"

            [structure]
            chapter_count = 12
            language = "English"

            [style]
            tone = "Dark"
            character_complexity = "Simple"
            "#,
        )
        .unwrap();

        assert_eq!(config.genre, "Science Fiction");
        assert_eq!(config.chapter_count, 12);
        assert_eq!(config.tone, "Dark");
        assert_eq!(config.character_complexity, "Simple");
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let config = StoryConfig::parse("[structure]\nchapter_count = 3\n").unwrap();
        let defaults = StoryConfig::default();

        assert_eq!(config.chapter_count, 3);
        assert_eq!(config.genre, defaults.genre);
        assert_eq!(config.language, defaults.language);
        assert_eq!(config.tone, defaults.tone);
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(StoryConfig::parse("").unwrap(), StoryConfig::default());
    }

    #[test]
    fn test_zero_chapters_rejected() {
        let result = StoryConfig::parse("[structure]\nchapter_count = 0\n");
        assert!(matches!(result, Err(ConfigError::ZeroChapters)));
    }

    #[test]
    fn test_capitalized_sections_accepted() {
        let config =
            StoryConfig::parse("[Theme]\ngenre = \"Horror\"\n[Structure]\nchapter_count = 12\n[Style]\ntone = \"Grim\"\n")
                .unwrap();
        assert_eq!(config.genre, "Horror");
        assert_eq!(config.chapter_count, 12);
        assert_eq!(config.tone, "Grim");
    }

    #[test]
    fn test_unknown_sections_and_keys_rejected() {
        for text in [
            "[Themes]\ngenre = \"Horror\"\n",
            "[settings]\nchapter_count = 12\n",
            "[structure]\nchapters = 12\n",
            "[theme]\nGenre = \"Horror\"\n",
        ] {
            assert!(
                matches!(StoryConfig::parse(text), Err(ConfigError::Parse(_))),
                "accepted {text:?}"
            );
        }
    }

    #[test]
    fn test_unquoted_ini_values_rejected() {
        let result = StoryConfig::parse("[Theme]\ngenre = Fantastik\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_default_config_round_trips() {
        let text = StoryConfig::default().to_toml().unwrap();
        assert!(text.contains("[theme]"));
        assert_eq!(StoryConfig::parse(&text).unwrap(), StoryConfig::default());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = StoryConfig::load(dir.path().join("theme.config")).await;
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_write_default_then_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("theme.config");
        StoryConfig::write_default(&path).await.unwrap();
        assert_eq!(StoryConfig::load(&path).await.unwrap(), StoryConfig::default());
    }

    #[test]
    fn test_settings_from_lookup() {
        let settings = ServiceSettings::from_lookup(
            None,
            lookup(&[("GEMINI_API_KEY", "abc"), ("TEMPERATURE", "0.5")]),
        )
        .unwrap();

        assert_eq!(settings.api_key, "abc");
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert_eq!(settings.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(settings.temperature, 0.5);
    }

    #[test]
    fn test_cli_key_overrides_env() {
        let settings =
            ServiceSettings::from_lookup(Some("cli".into()), lookup(&[("GEMINI_API_KEY", "env")]))
                .unwrap();
        assert_eq!(settings.api_key, "cli");
    }

    #[test]
    fn test_placeholder_key_rejected() {
        let result =
            ServiceSettings::from_lookup(None, lookup(&[("GEMINI_API_KEY", API_KEY_PLACEHOLDER)]));
        assert!(matches!(result, Err(ConfigError::MissingApiKey)));

        let result = ServiceSettings::from_lookup(None, lookup(&[]));
        assert!(matches!(result, Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn test_invalid_max_tokens_rejected() {
        let result = ServiceSettings::from_lookup(
            None,
            lookup(&[("GEMINI_API_KEY", "abc"), ("MAX_TOKENS", "lots")]),
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidSetting {
                key: "MAX_TOKENS",
                ..
            })
        ));
    }

    #[test]
    fn test_chapter_range() {
        assert_eq!(chapter_range(None, None, 10).unwrap(), 1..=10);
        assert_eq!(chapter_range(Some(3), Some(5), 10).unwrap(), 3..=5);
        assert!(chapter_range(Some(0), None, 10).is_err());
        assert!(chapter_range(Some(6), Some(5), 10).is_err());
        assert!(chapter_range(None, Some(11), 10).is_err());
    }
}
