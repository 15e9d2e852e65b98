use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Defines the supported speech-to-text providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SttProvider {
    AssemblyAI,
    Cartesia,
}

pub const DEFAULT_GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub stt_provider: SttProvider,
    pub assemblyai_api_key: Option<String>,
    pub cartesia_api_key: String,
    pub cartesia_voice_id: String,
    pub cartesia_tts_model: String,
    pub cartesia_stt_model: String,
    pub groq_api_key: String,
    pub groq_api_base: String,
    pub groq_model: String,
    pub groq_temperature: f32,
    pub groq_max_tokens: u32,
    pub sample_rate: u32,
    pub static_dir: Option<PathBuf>,
    pub system_prompt_path: Option<PathBuf>,
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

fn or_default(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    or_default(name, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address = parsed::<SocketAddr>("BIND_ADDRESS", "0.0.0.0:8000")?;

        let log_level_str = or_default("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let stt_provider = match or_default("STT_PROVIDER", "assemblyai").to_lowercase().as_str() {
            "assemblyai" => SttProvider::AssemblyAI,
            "cartesia" => SttProvider::Cartesia,
            other => {
                return Err(ConfigError::InvalidValue(
                    "STT_PROVIDER".to_string(),
                    format!("'{}' is not one of 'assemblyai', 'cartesia'", other),
                ));
            }
        };

        let assemblyai_api_key = std::env::var("ASSEMBLYAI_API_KEY").ok();
        if stt_provider == SttProvider::AssemblyAI && assemblyai_api_key.is_none() {
            return Err(ConfigError::MissingVar(
                "ASSEMBLYAI_API_KEY must be set for 'assemblyai' provider".to_string(),
            ));
        }

        let cartesia_api_key = required("CARTESIA_API_KEY")?;
        let cartesia_voice_id = required("CARTESIA_VOICE_ID")?;
        let groq_api_key = required("GROQ_API_KEY")?;

        Ok(Self {
            bind_address,
            log_level,
            stt_provider,
            assemblyai_api_key,
            cartesia_api_key,
            cartesia_voice_id,
            cartesia_tts_model: or_default("CARTESIA_TTS_MODEL", "sonic-2"),
            cartesia_stt_model: or_default("CARTESIA_STT_MODEL", "ink-whisper"),
            groq_api_key,
            groq_api_base: or_default("GROQ_API_BASE", DEFAULT_GROQ_API_BASE),
            groq_model: or_default("GROQ_MODEL", "llama-3.3-70b-versatile"),
            groq_temperature: parsed("GROQ_TEMPERATURE", "0.7")?,
            groq_max_tokens: parsed("GROQ_MAX_TOKENS", "1024")?,
            sample_rate: parsed("SAMPLE_RATE", "16000")?,
            static_dir: std::env::var("STATIC_DIR").ok().map(PathBuf::from),
            system_prompt_path: std::env::var("SYSTEM_PROMPT_PATH").ok().map(PathBuf::from),
        })
    }
}
