//! Environment configuration
//!
//! Values come from the process environment, after loading `.env` if present.
//! Every key has a default so the server starts against a local Chroma and Ollama
//! without any configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_address: String,
    pub cors_origins: Vec<String>,

    pub chroma_host: String,
    pub chroma_port: u16,
    pub chroma_tenant: String,
    pub chroma_database: String,
    pub collection_name: String,
    /// SQLite file used when Chroma is unreachable. `None` skips straight to memory.
    pub local_store_path: Option<PathBuf>,

    pub max_message_length: usize,
    pub max_conversation_messages: usize,
    pub history_window: usize,

    pub inference_url: String,
    pub model: String,
    pub inference_timeout: Duration,
    pub default_max_tokens: u32,
    pub default_temperature: f32,

    pub embedding_url: String,
    pub embedding_model: String,
}

impl Settings {
    pub fn from_env() -> Result<Settings, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup, falling back to defaults for
    /// missing or empty keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Settings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let string = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_owned());

        let local_store_path = match lookup("LOCAL_STORE_PATH") {
            Some(path) if path.trim().is_empty() => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from("chroma_db_local/messages.db")),
        };

        Ok(Settings {
            bind_address: string("BIND_ADDRESS", "0.0.0.0:3000"),
            cors_origins: string(
                "CORS_ORIGINS",
                "http://localhost:3000,http://localhost:5173",
            )
            .split(',')
            .map(|origin| origin.trim().to_owned())
            .filter(|origin| !origin.is_empty())
            .collect(),

            chroma_host: string("CHROMA_HOST", "localhost"),
            chroma_port: parse(&get, "CHROMA_PORT", 8000)?,
            chroma_tenant: string("CHROMA_TENANT", "default_tenant"),
            chroma_database: string("CHROMA_DATABASE", "default_database"),
            collection_name: string("COLLECTION_NAME", "chat_messages"),
            local_store_path,

            max_message_length: positive(&get, "MAX_MESSAGE_LENGTH", 10_000)?,
            max_conversation_messages: positive(&get, "MAX_CONVERSATION_MESSAGES", 1_000)?,
            history_window: parse(&get, "HISTORY_WINDOW", 5)?,

            inference_url: string("INFERENCE_URL", "http://localhost:11434/api/generate"),
            model: string("MODEL", "gemma2:2b"),
            inference_timeout: Duration::from_secs(positive(&get, "INFERENCE_TIMEOUT_SECS", 30)?),
            default_max_tokens: parse(&get, "DEFAULT_MAX_TOKENS", 1000)?,
            default_temperature: parse(&get, "DEFAULT_TEMPERATURE", 0.5)?,

            embedding_url: string("EMBEDDING_URL", "http://localhost:11434/api/embed"),
            embedding_model: string("EMBEDDING_MODEL", "nomic-embed-text"),
        })
    }

    pub fn chroma_url(&self) -> String {
        format!("http://{}:{}", self.chroma_host, self.chroma_port)
    }
}

#[cfg(test)]
impl Default for Settings {
    fn default() -> Self {
        Settings::from_lookup(|_| None).unwrap()
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}

fn positive<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    G: Fn(&str) -> Option<String>,
{
    let value = parse(get, key, default)?;
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue {
            key,
            value: get(key).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings_from(&[]).unwrap();

        assert_eq!(settings.chroma_url(), "http://localhost:8000");
        assert_eq!(settings.collection_name, "chat_messages");
        assert_eq!(settings.max_message_length, 10_000);
        assert_eq!(settings.max_conversation_messages, 1_000);
        assert_eq!(settings.history_window, 5);
        assert_eq!(settings.model, "gemma2:2b");
        assert_eq!(settings.inference_timeout, Duration::from_secs(30));
        assert_eq!(settings.cors_origins.len(), 2);
        assert!(settings.local_store_path.is_some());
    }

    #[test]
    fn test_overrides() {
        let settings = settings_from(&[
            ("CHROMA_HOST", "chroma"),
            ("CHROMA_PORT", "9000"),
            ("MAX_MESSAGE_LENGTH", "20"),
            ("CORS_ORIGINS", "https://a.example, https://b.example,"),
            ("LOCAL_STORE_PATH", ""),
        ])
        .unwrap();

        assert_eq!(settings.chroma_url(), "http://chroma:9000");
        assert_eq!(settings.max_message_length, 20);
        assert_eq!(
            settings.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert!(settings.local_store_path.is_none());
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let err = settings_from(&[("CHROMA_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("CHROMA_PORT"));
    }

    #[test]
    fn test_zero_cap_is_rejected() {
        assert!(settings_from(&[("MAX_CONVERSATION_MESSAGES", "0")]).is_err());
    }
}
