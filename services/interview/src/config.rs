//! Application Configuration Module
//!
//! Loads every setting of the interview service from environment variables
//! once at startup into a single shareable struct.

use interview_core::generic_types::VoiceProfile;
use interview_core::persistence::DEFAULT_MAX_ATTEMPTS;
use interview_core::reviewer::ScoringProvider;
use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Connection settings for the voice-conversation service.
#[derive(Debug)]
pub struct VoiceSettings {
    pub base_url: Option<String>,
    pub api_key: SecretString,
    pub workflow_id: Option<String>,
    pub profile: VoiceProfile,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub prompts_dir: PathBuf,
    pub scoring_provider: ScoringProvider,
    pub scoring_api_key: String,
    pub scoring_models: Vec<String>,
    pub scoring_timeout: Duration,
    pub persist_max_attempts: u32,
    pub voice: VoiceSettings,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables, reading a `.env` file first if present.
    ///
    /// *   `BIND_ADDRESS`: Address for the HTTP server. Defaults to "0.0.0.0:3000".
    /// *   `DATABASE_URL`: SQLite database. Defaults to "sqlite://interviews.db?mode=rwc".
    /// *   `PROMPTS_DIR`: Directory of `*.md` prompt overrides. Defaults to "prompts".
    /// *   `SCORING_PROVIDER`: "gemini" or "openai". Defaults to "gemini".
    /// *   `GEMINI_API_KEY` / `OPENAI_API_KEY`: Required for the selected provider.
    /// *   `SCORING_MODELS`: (Optional) Comma-separated model preference list.
    /// *   `SCORING_TIMEOUT_SECS`: Per-call scoring deadline. Defaults to 60.
    /// *   `PERSIST_MAX_ATTEMPTS`: Attempts per response write. Defaults to 3.
    /// *   `VOICE_BASE_URL`, `VOICE_API_KEY`, `VOICE_WORKFLOW_ID`: Voice service connection.
    /// *   `VOICE_TRANSCRIBER_PROVIDER`, `VOICE_TRANSCRIBER_MODEL`, `VOICE_LANGUAGE`,
    ///     `VOICE_PROVIDER`, `VOICE_ID`, `VOICE_LLM_PROVIDER`, `VOICE_LLM_MODEL`,
    ///     `VOICE_SILENCE_TIMEOUT_SECS`, `VOICE_MAX_DURATION_SECS`: Voice profile.
    /// *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let bind_address = parse(&var, "BIND_ADDRESS", "0.0.0.0:3000".parse::<SocketAddr>())?;
        let database_url = or("DATABASE_URL", "sqlite://interviews.db?mode=rwc");
        let prompts_dir = PathBuf::from(or("PROMPTS_DIR", "prompts"));

        let scoring_provider =
            parse(&var, "SCORING_PROVIDER", Ok::<_, String>(ScoringProvider::Gemini))?;
        let key_var = match scoring_provider {
            ScoringProvider::Gemini => "GEMINI_API_KEY",
            ScoringProvider::OpenAI => "OPENAI_API_KEY",
        };
        let scoring_api_key = var(key_var).ok_or_else(|| {
            ConfigError::MissingVar(format!(
                "{key_var} must be set for '{scoring_provider}' provider"
            ))
        })?;
        let scoring_models = var("SCORING_MODELS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| scoring_provider.default_models());
        let scoring_timeout =
            Duration::from_secs(parse(&var, "SCORING_TIMEOUT_SECS", Ok::<u64, String>(60))?);

        let persist_max_attempts =
            parse(&var, "PERSIST_MAX_ATTEMPTS", Ok::<u32, String>(DEFAULT_MAX_ATTEMPTS))?;
        if persist_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "PERSIST_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let defaults = VoiceProfile::default();
        let profile = VoiceProfile {
            transcriber_provider: or("VOICE_TRANSCRIBER_PROVIDER", &defaults.transcriber_provider),
            transcriber_model: or("VOICE_TRANSCRIBER_MODEL", &defaults.transcriber_model),
            language: or("VOICE_LANGUAGE", &defaults.language),
            voice_provider: or("VOICE_PROVIDER", &defaults.voice_provider),
            voice_id: or("VOICE_ID", &defaults.voice_id),
            llm_provider: or("VOICE_LLM_PROVIDER", &defaults.llm_provider),
            llm_model: or("VOICE_LLM_MODEL", &defaults.llm_model),
            silence_timeout_secs: parse(
                &var,
                "VOICE_SILENCE_TIMEOUT_SECS",
                Ok::<u32, String>(defaults.silence_timeout_secs),
            )?,
            max_duration_secs: parse(
                &var,
                "VOICE_MAX_DURATION_SECS",
                Ok::<u32, String>(defaults.max_duration_secs),
            )?,
        };
        let voice = VoiceSettings {
            base_url: var("VOICE_BASE_URL"),
            api_key: SecretString::from(or("VOICE_API_KEY", "")),
            workflow_id: var("VOICE_WORKFLOW_ID"),
            profile,
        };

        let log_level_str = or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            database_url,
            prompts_dir,
            scoring_provider,
            scoring_api_key,
            scoring_models,
            scoring_timeout,
            persist_max_attempts,
            voice,
            log_level,
        })
    }
}

/// Parses `key` when set, otherwise returns `default`.
fn parse<T, D, V>(var: &V, key: &str, default: Result<T, D>) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    D: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => default.map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
    }
}
