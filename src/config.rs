use crate::defaults;
use crate::error::{AttuneError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub detection: DetectionConfig,
    pub stt: SttConfig,
    pub llm: LlmConfig,
}

/// Listener ports for the control API and the client channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub ws_port: u16,
}

/// Attention-detection tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    /// Shared scalar controlling ignore-match strictness and escalation.
    pub sensitivity: f32,
    /// Lowercase phrases that mark a transcript as directed at the listener.
    pub attention_keywords: BTreeSet<String>,
    /// The listener's name, matched like a keyword when set.
    pub user_name: Option<String>,
    /// Dimmed state auto-restores after this much silence.
    pub silence_timeout_ms: u64,
}

/// Streaming transcription service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SttConfig {
    pub api_key: String,
    pub endpoint: String,
}

/// Optional LLM fallback for uncertain transcripts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: defaults::CONTROL_PORT,
            ws_port: defaults::WS_PORT,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            sensitivity: defaults::SENSITIVITY,
            attention_keywords: defaults::ATTENTION_KEYWORDS
                .iter()
                .map(|kw| kw.to_string())
                .collect(),
            user_name: None,
            silence_timeout_ms: defaults::SILENCE_TIMEOUT_MS,
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: defaults::STT_ENDPOINT.to_string(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: defaults::LLM_ENDPOINT.to_string(),
            model: defaults::LLM_MODEL.to_string(),
            timeout_ms: defaults::LLM_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// Returns an error if the file contains invalid JSON.
    /// Missing fields take default values and are logged once.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let value: serde_json::Value =
            serde_json::from_str(&contents).map_err(|e| AttuneError::ConfigParse {
                message: e.to_string(),
            })?;

        if let Some(object) = value.as_object() {
            for section in ["server", "detection", "stt", "llm"] {
                if !object.contains_key(section) {
                    tracing::warn!(section, "config section missing, using defaults");
                }
            }
        }

        let config: Config =
            serde_json::from_value(value).map_err(|e| AttuneError::ConfigParse {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file is missing
    ///
    /// Only returns defaults when the file does not exist; invalid JSON is an
    /// error the caller must handle.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Validate value ranges
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.detection.sensitivity) {
            return Err(AttuneError::ConfigInvalidValue {
                key: "detection.sensitivity".to_string(),
                message: "must be within [0, 1]".to_string(),
            });
        }
        if self.detection.silence_timeout_ms < defaults::MIN_SILENCE_TIMEOUT_MS {
            return Err(AttuneError::ConfigInvalidValue {
                key: "detection.silence_timeout_ms".to_string(),
                message: format!("must be at least {}", defaults::MIN_SILENCE_TIMEOUT_MS),
            });
        }
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - DEEPGRAM_API_KEY → stt.api_key
    /// - LLM_ENABLED → llm.enabled
    /// - LLM_ENDPOINT → llm.endpoint
    /// - LLM_MODEL → llm.model
    /// - SENSITIVITY_LEVEL (low|medium|high) → detection.sensitivity
    /// - SILENCE_TIMEOUT_MS → detection.silence_timeout_ms (floored at 1000)
    /// - PORT → server.port
    /// - WS_PORT → server.ws_port
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("DEEPGRAM_API_KEY") {
            if !key.is_empty() {
                self.stt.api_key = key;
            }
        }

        if let Ok(enabled) = std::env::var("LLM_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.llm.enabled = true,
                "0" | "false" | "no" => self.llm.enabled = false,
                other => tracing::warn!(value = other, "ignoring unrecognized LLM_ENABLED"),
            }
        }

        if let Ok(endpoint) = std::env::var("LLM_ENDPOINT") {
            if !endpoint.is_empty() {
                self.llm.endpoint = endpoint;
            }
        }

        if let Ok(model) = std::env::var("LLM_MODEL") {
            if !model.is_empty() {
                self.llm.model = model;
            }
        }

        if let Ok(level) = std::env::var("SENSITIVITY_LEVEL") {
            match level.to_lowercase().as_str() {
                "low" => self.detection.sensitivity = 0.3,
                "medium" => self.detection.sensitivity = 0.5,
                "high" => self.detection.sensitivity = 0.8,
                other => tracing::warn!(value = other, "ignoring unrecognized SENSITIVITY_LEVEL"),
            }
        }

        if let Ok(timeout) = std::env::var("SILENCE_TIMEOUT_MS") {
            match timeout.parse::<u64>() {
                Ok(ms) => {
                    self.detection.silence_timeout_ms = ms.max(defaults::MIN_SILENCE_TIMEOUT_MS);
                }
                Err(_) => tracing::warn!(value = %timeout, "ignoring unparseable SILENCE_TIMEOUT_MS"),
            }
        }

        if let Ok(port) = std::env::var("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %port, "ignoring unparseable PORT"),
            }
        }

        if let Ok(port) = std::env::var("WS_PORT") {
            match port.parse() {
                Ok(port) => self.server.ws_port = port,
                Err(_) => tracing::warn!(value = %port, "ignoring unparseable WS_PORT"),
            }
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/attune/config.json on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .expect("Could not determine config directory")
            .join("attune")
            .join("config.json")
    }

    /// Default location of the persisted voice-profile registry.
    pub fn default_profiles_path() -> PathBuf {
        dirs::config_dir()
            .expect("Could not determine config directory")
            .join("attune")
            .join("profiles.json")
    }
}
