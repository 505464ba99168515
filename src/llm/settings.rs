//! Model endpoint settings.
//!
//! Precedence, highest first: CLI overrides, environment, YAML file, defaults.
//! The API key is normally read from an environment variable and never
//! written anywhere; logs only ever see the masked form.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_API_KEY_ENV: &str = "GMV_API_KEY";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SETTINGS_FILE: &str = "~/.config/gmv/llm.yaml";

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct LlmOverrides {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
    pub settings_file: Option<PathBuf>,
    /// Mock mode runs offline, so a missing key is not an error.
    pub allow_missing_key: bool,
}

/// Shape of the optional YAML settings file.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    base_url: Option<String>,
    model: Option<String>,
    api_key_env: Option<String>,
    api_key: Option<String>,
    timeout_s: Option<serde_yaml::Value>,
    verify_tls: Option<bool>,
}

/// Resolved endpoint settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub api_key: SecretString,
    pub timeout: Duration,
    pub verify_tls: bool,
}

impl LlmSettings {
    /// Resolve settings from the process environment.
    pub fn load(overrides: &LlmOverrides) -> Result<Self, ConfigError> {
        Self::resolve(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve settings with an explicit environment lookup.
    pub fn resolve<F>(overrides: &LlmOverrides, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let settings_path = expand_home(
            overrides
                .settings_file
                .as_deref()
                .unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_FILE)),
            env("HOME").as_deref(),
        );
        let file = read_settings_file(&settings_path)?;

        let api_key_env = overrides
            .api_key_env
            .clone()
            .or_else(|| env("GMV_API_KEY_ENV"))
            .or(file.api_key_env)
            .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string());

        let base_url = overrides
            .base_url
            .clone()
            .or_else(|| env("GMV_BASE_URL"))
            .or(file.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let model = overrides
            .model
            .clone()
            .or_else(|| env("GMV_MODEL"))
            .or(file.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let timeout_secs = env("GMV_TIMEOUT_S")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .or_else(|| file.timeout_s.as_ref().and_then(yaml_as_u64))
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .max(1);

        let verify_tls = file.verify_tls.unwrap_or(true);

        let api_key = env(&api_key_env)
            .or_else(|| file.api_key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()));

        let api_key = match api_key {
            Some(key) => key,
            None if overrides.allow_missing_key => String::new(),
            None => {
                return Err(ConfigError::MissingApiKey {
                    env_var: api_key_env,
                    file: settings_path.display().to_string(),
                });
            }
        };

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key_env,
            api_key: SecretString::from(api_key),
            timeout: Duration::from_secs(timeout_secs),
            verify_tls,
        })
    }

    /// Key rendered for logs: `abcd...wxyz`, or all `*` for short keys.
    pub fn masked_api_key(&self) -> String {
        let key = self.api_key.expose_secret();
        let count = key.chars().count();
        if count == 0 {
            return String::new();
        }
        if count <= 8 {
            return "*".repeat(count);
        }
        let head: String = key.chars().take(4).collect();
        let tail: String = key.chars().skip(count - 4).collect();
        format!("{head}...{tail}")
    }
}

fn yaml_as_u64(value: &serde_yaml::Value) -> Option<u64> {
    match value {
        serde_yaml::Value::Number(n) => n.as_u64(),
        serde_yaml::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn expand_home(path: &Path, home: Option<&str>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

/// A missing file is fine; an unreadable or malformed one is not silently ignored.
fn read_settings_file(path: &Path) -> Result<FileSettings, ConfigError> {
    if !path.exists() {
        return Ok(FileSettings::default());
    }
    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(FileSettings::default());
    }
    serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    fn no_file() -> LlmOverrides {
        LlmOverrides {
            settings_file: Some(PathBuf::from("/nonexistent/gmv/llm.yaml")),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_with_env_key() {
        let s = LlmSettings::resolve(&no_file(), env_of(&[("GMV_API_KEY", "sk-abcdefghijkl")]))
            .unwrap();
        assert_eq!(s.base_url, DEFAULT_BASE_URL);
        assert_eq!(s.model, DEFAULT_MODEL);
        assert_eq!(s.timeout, Duration::from_secs(60));
        assert!(s.verify_tls);
        assert_eq!(s.masked_api_key(), "sk-a...ijkl");
    }

    #[test]
    fn test_missing_key_is_error_unless_mock() {
        let err = LlmSettings::resolve(&no_file(), env_of(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey { .. }));

        let mock = LlmOverrides {
            allow_missing_key: true,
            ..no_file()
        };
        let s = LlmSettings::resolve(&mock, env_of(&[])).unwrap();
        assert_eq!(s.masked_api_key(), "");
    }

    #[test]
    fn test_precedence_cli_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("llm.yaml");
        std::fs::write(
            &file,
            "base_url: http://file/v1/\nmodel: file-model\ntimeout_s: 5\nverify_tls: false\napi_key: filekey\n",
        )
        .unwrap();

        let overrides = LlmOverrides {
            model: Some("cli-model".into()),
            settings_file: Some(file),
            ..Default::default()
        };
        let s = LlmSettings::resolve(
            &overrides,
            env_of(&[("GMV_BASE_URL", "http://env/v1"), ("GMV_TIMEOUT_S", "0")]),
        )
        .unwrap();
        assert_eq!(s.model, "cli-model");
        assert_eq!(s.base_url, "http://env/v1");
        assert_eq!(s.timeout, Duration::from_secs(1));
        assert!(!s.verify_tls);
        assert_eq!(s.masked_api_key(), "*******");
    }

    #[test]
    fn test_custom_key_env() {
        let overrides = LlmOverrides {
            api_key_env: Some("MY_KEY".into()),
            ..no_file()
        };
        let s = LlmSettings::resolve(&overrides, env_of(&[("MY_KEY", "0123456789")])).unwrap();
        assert_eq!(s.api_key_env, "MY_KEY");
        assert_eq!(s.masked_api_key(), "0123...6789");
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("llm.yaml");
        std::fs::write(&file, "model: [unclosed\n").unwrap();
        let overrides = LlmOverrides {
            settings_file: Some(file),
            allow_missing_key: true,
            ..Default::default()
        };
        assert!(matches!(
            LlmSettings::resolve(&overrides, env_of(&[])),
            Err(ConfigError::Parse { .. })
        ));
    }
}
