use std::env;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use super::models::PartialChatParameters;
use crate::ai::client::ChatClientConfig;
use crate::errors::ChatError;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const API_KEY_NAME: &str = "OPENAI_API_KEY";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base: Url,
    pub params: PartialChatParameters,
    pub system_prompt: Option<String>,
    pub openai_org_id: Option<String>,
    pub credentials_file: PathBuf,
    pub connect_timeout: Duration,
}

impl AppConfig {
    /// # Errors
    ///
    /// Returns `ChatError::ConfigError` when a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::ConfigError` when a variable is set but cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ChatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_base_raw = get("LLMIUM_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let api_base = Url::parse(&api_base_raw)
            .map_err(|e| ChatError::ConfigError(format!("LLMIUM_API_BASE: {e}")))?;

        let temperature = get("LLMIUM_TEMPERATURE")
            .map(|v| {
                v.trim()
                    .parse::<f32>()
                    .map_err(|e| ChatError::ConfigError(format!("LLMIUM_TEMPERATURE: {e}")))
            })
            .transpose()?;
        let max_tokens = get("LLMIUM_MAX_TOKENS")
            .map(|v| {
                v.trim()
                    .parse::<u32>()
                    .map_err(|e| ChatError::ConfigError(format!("LLMIUM_MAX_TOKENS: {e}")))
            })
            .transpose()?;
        let connect_timeout = get("LLMIUM_CONNECT_TIMEOUT_SECS")
            .map(|v| {
                v.trim().parse::<u64>().map_err(|e| {
                    ChatError::ConfigError(format!("LLMIUM_CONNECT_TIMEOUT_SECS: {e}"))
                })
            })
            .transpose()?
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);

        let credentials_file = match get("LLMIUM_CREDENTIALS_FILE") {
            Some(path) => PathBuf::from(path),
            None => default_credentials_file()?,
        };

        Ok(Self {
            api_base,
            params: PartialChatParameters {
                temperature,
                max_tokens,
                model: get("LLMIUM_MODEL"),
            },
            system_prompt: get("LLMIUM_SYSTEM_PROMPT"),
            openai_org_id: get("OPENAI_ORG_ID"),
            credentials_file,
            connect_timeout: Duration::from_secs(connect_timeout),
        })
    }

    #[must_use]
    pub fn client_config(&self) -> ChatClientConfig {
        ChatClientConfig {
            api_base: Some(self.api_base.clone()),
            params: self.params.clone(),
            system_prompt: self.system_prompt.clone(),
            org_id: self.openai_org_id.clone(),
            connect_timeout: Some(self.connect_timeout),
        }
    }
}

fn default_credentials_file() -> Result<PathBuf, ChatError> {
    let base = dirs::config_dir().ok_or_else(|| {
        ChatError::ConfigError(
            "no config directory on this platform; set LLMIUM_CREDENTIALS_FILE".to_string(),
        )
    })?;
    Ok(base.join("llmium").join("credentials.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config =
            AppConfig::from_lookup(lookup(&[("LLMIUM_CREDENTIALS_FILE", "/tmp/creds.json")]))
                .unwrap();
        assert_eq!(config.api_base.as_str(), "https://api.openai.com/v1");
        assert_eq!(config.params, PartialChatParameters::default());
        assert!(config.system_prompt.is_none());
        assert_eq!(config.credentials_file, PathBuf::from("/tmp/creds.json"));
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_reads_parameters() {
        let config = AppConfig::from_lookup(lookup(&[
            ("LLMIUM_CREDENTIALS_FILE", "/tmp/creds.json"),
            ("LLMIUM_MODEL", "gpt-4o"),
            ("LLMIUM_TEMPERATURE", "0.7"),
            ("LLMIUM_MAX_TOKENS", "1024"),
            ("LLMIUM_SYSTEM_PROMPT", "You are terse."),
        ]))
        .unwrap();
        assert_eq!(config.params.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.params.max_tokens, Some(1024));
        assert!(config.params.temperature.is_some());
        assert_eq!(config.system_prompt.as_deref(), Some("You are terse."));
    }

    #[test]
    fn test_blank_values_are_treated_as_unset() {
        let config = AppConfig::from_lookup(lookup(&[
            ("LLMIUM_CREDENTIALS_FILE", "/tmp/creds.json"),
            ("LLMIUM_MODEL", "  "),
        ]))
        .unwrap();
        assert!(config.params.model.is_none());
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let err = AppConfig::from_lookup(lookup(&[
            ("LLMIUM_CREDENTIALS_FILE", "/tmp/creds.json"),
            ("LLMIUM_MAX_TOKENS", "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ChatError::ConfigError(msg) if msg.contains("LLMIUM_MAX_TOKENS")));
    }

    #[test]
    fn test_invalid_api_base_is_config_error() {
        let err = AppConfig::from_lookup(lookup(&[
            ("LLMIUM_CREDENTIALS_FILE", "/tmp/creds.json"),
            ("LLMIUM_API_BASE", "not a url"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ChatError::ConfigError(_)));
    }
}
