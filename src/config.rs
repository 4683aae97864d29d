use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::conversation::Target;
use crate::error::{DialogueError, Result};

/// Environment variable holding the generation API key
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Token estimation method used when the service reports no usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEstimationMethod {
    /// Use tiktoken with cl100k_base encoding (most accurate)
    #[default]
    Tiktoken,
    /// Estimate as text.len() / 4
    ByteRatio,
    /// Estimate as text.chars().count() / 4
    CharRatio,
}

/// Language of the prompt templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// English
    #[default]
    En,
    /// Italian
    It,
}

impl Language {
    /// All supported languages
    pub const ALL: [Language; 2] = [Language::En, Language::It];

    /// Short code used in CLI flags and file names
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::It => "it",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = DialogueError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Language::ALL
            .into_iter()
            .find(|lang| lang.code() == wanted)
            .ok_or_else(|| DialogueError::UnsupportedLanguage(s.to_string()))
    }
}

/// Main configuration for a generation run.
///
/// Built once at startup and handed to the controller and batch runner by
/// value or reference; nothing reads configuration from global state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Number of conversations to generate
    #[serde(default = "default_num_conversations")]
    pub num_conversations: u32,
    /// Directory for conversation files and run metadata
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Prompt language
    #[serde(default)]
    pub language: Language,
    /// Generation model name
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum output tokens per request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Total exchanges per conversation, closing exchange included
    #[serde(default = "default_max_exchanges")]
    pub max_exchanges: u32,
    /// Maximum exchanges requested in a single call
    #[serde(default = "default_exchanges_per_call")]
    pub exchanges_per_call: u32,
    /// Requests-per-minute ceiling for the generation API
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Base URL of the generation API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Seconds before a single generation request is given up on
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Fallback token estimation
    #[serde(default)]
    pub token_estimation: TokenEstimationMethod,
}

fn default_num_conversations() -> u32 {
    1
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("generated_conversations")
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_max_tokens() -> u32 {
    10_000
}

fn default_max_exchanges() -> u32 {
    5
}

fn default_exchanges_per_call() -> u32 {
    5
}

fn default_requests_per_minute() -> u32 {
    9
}

fn default_api_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_conversations: default_num_conversations(),
            output_dir: default_output_dir(),
            language: Language::default(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            max_exchanges: default_max_exchanges(),
            exchanges_per_call: default_exchanges_per_call(),
            requests_per_minute: default_requests_per_minute(),
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            token_estimation: TokenEstimationMethod::default(),
        }
    }
}

/// Values supplied on the command line; `None` keeps the current value
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub num_conversations: Option<u32>,
    pub output_dir: Option<PathBuf>,
    pub language: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub max_exchanges: Option<u32>,
    pub exchanges_per_call: Option<u32>,
    pub requests_per_minute: Option<u32>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DialogueError::ConfigError(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content).map_err(|e| DialogueError::ConfigError(e.to_string()))
    }

    /// Path of the per-user config file, if the platform has a config dir
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("clinical-dialogue").join("config.toml"))
    }

    /// Merge CLI arguments into this configuration.
    /// CLI arguments take precedence over config file values.
    pub fn merge_cli_args(&mut self, overrides: ConfigOverrides) -> Result<()> {
        if let Some(n) = overrides.num_conversations {
            self.num_conversations = n;
        }
        if let Some(od) = overrides.output_dir {
            self.output_dir = od;
        }
        if let Some(lang) = overrides.language {
            self.language = lang.parse()?;
        }
        if let Some(m) = overrides.model {
            self.model = m;
        }
        if let Some(mt) = overrides.max_tokens {
            self.max_tokens = mt;
        }
        if let Some(me) = overrides.max_exchanges {
            self.max_exchanges = me;
        }
        if let Some(epc) = overrides.exchanges_per_call {
            self.exchanges_per_call = epc;
        }
        if let Some(rpm) = overrides.requests_per_minute {
            self.requests_per_minute = rpm;
        }
        Ok(())
    }

    /// Check the numeric settings the generation loop depends on
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_tokens", self.max_tokens),
            ("max_exchanges", self.max_exchanges),
            ("exchanges_per_call", self.exchanges_per_call),
            ("requests_per_minute", self.requests_per_minute),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(DialogueError::ConfigError(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(DialogueError::ConfigError(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(DialogueError::ConfigError("model must not be empty".into()));
        }
        Ok(())
    }

    /// Exchange target derived from this configuration
    pub fn target(&self) -> Target {
        Target::new(self.max_exchanges, self.exchanges_per_call)
    }
}

/// Read the API key from the environment, loading `.env` first if present
pub fn load_api_key() -> Result<String> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            tracing::warn!("Ignoring unreadable .env file: {}", e);
        }
    }
    api_key_from(std::env::var(API_KEY_ENV).ok())
}

fn api_key_from(value: Option<String>) -> Result<String> {
    match value {
        Some(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(DialogueError::MissingCredential(API_KEY_ENV.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_reference_tool() {
        let config = Config::default();
        assert_eq!(config.num_conversations, 1);
        assert_eq!(config.output_dir, PathBuf::from("generated_conversations"));
        assert_eq!(config.language, Language::En);
        assert_eq!(config.model, "gemini-2.5-flash");
        assert_eq!(config.max_tokens, 10_000);
        assert_eq!(config.max_exchanges, 5);
        assert_eq!(config.exchanges_per_call, 5);
        assert_eq!(config.requests_per_minute, 9);
        assert_eq!(config.request_timeout_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!("en".parse::<Language>().unwrap(), Language::En);
        assert_eq!("IT".parse::<Language>().unwrap(), Language::It);
        assert!(matches!(
            "fr".parse::<Language>(),
            Err(DialogueError::UnsupportedLanguage(lang)) if lang == "fr"
        ));
    }

    #[test]
    fn test_from_file_partial_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "language = \"it\"\nmax_exchanges = 20\nrequests_per_minute = 30\ntoken_estimation = \"byte_ratio\""
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.language, Language::It);
        assert_eq!(config.max_exchanges, 20);
        assert_eq!(config.requests_per_minute, 30);
        assert_eq!(config.token_estimation, TokenEstimationMethod::ByteRatio);
        // untouched keys keep their defaults
        assert_eq!(config.exchanges_per_call, 5);
    }

    #[test]
    fn test_from_file_rejects_unknown_language() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "language = \"fr\"").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(DialogueError::ConfigError(_))
        ));
    }

    #[test]
    fn test_from_missing_file() {
        let result = Config::from_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(DialogueError::ConfigError(_))));
    }

    #[test]
    fn test_cli_args_take_precedence() {
        let mut config = Config {
            max_exchanges: 20,
            ..Config::default()
        };
        config
            .merge_cli_args(ConfigOverrides {
                language: Some("it".into()),
                max_exchanges: Some(40),
                requests_per_minute: Some(60),
                ..ConfigOverrides::default()
            })
            .unwrap();

        assert_eq!(config.language, Language::It);
        assert_eq!(config.max_exchanges, 40);
        assert_eq!(config.requests_per_minute, 60);
        assert_eq!(config.model, "gemini-2.5-flash");
    }

    #[test]
    fn test_cli_unsupported_language_is_an_error() {
        let mut config = Config::default();
        let result = config.merge_cli_args(ConfigOverrides {
            language: Some("de".into()),
            ..ConfigOverrides::default()
        });
        assert!(matches!(result, Err(DialogueError::UnsupportedLanguage(_))));
    }

    #[test]
    fn test_validate_rejects_zero_settings() {
        for config in [
            Config {
                requests_per_minute: 0,
                ..Config::default()
            },
            Config {
                exchanges_per_call: 0,
                ..Config::default()
            },
            Config {
                max_exchanges: 0,
                ..Config::default()
            },
            Config {
                max_tokens: 0,
                ..Config::default()
            },
            Config {
                request_timeout_secs: 0,
                ..Config::default()
            },
        ] {
            assert!(matches!(
                config.validate(),
                Err(DialogueError::ConfigError(_))
            ));
        }
    }

    #[test]
    fn test_target_from_config() {
        let config = Config {
            max_exchanges: 12,
            exchanges_per_call: 4,
            ..Config::default()
        };
        let target = config.target();
        assert_eq!(target.total, 12);
        assert_eq!(target.per_call, 4);
    }

    #[test]
    fn test_api_key_from_environment_value() {
        assert_eq!(api_key_from(Some(" abc ".into())).unwrap(), "abc");
        assert!(matches!(
            api_key_from(Some("   ".into())),
            Err(DialogueError::MissingCredential(_))
        ));
        assert!(matches!(
            api_key_from(None),
            Err(DialogueError::MissingCredential(var)) if var == API_KEY_ENV
        ));
    }
}
