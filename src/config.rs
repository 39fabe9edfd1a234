//! Configuration types for the voice assistant.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Audio capture/playback settings.
    pub audio: AudioConfig,
    /// Remote speech endpoint settings.
    pub live: LiveConfig,
    /// Booking notification settings.
    pub booking: BookingConfig,
    /// Session timing settings.
    pub session: SessionConfig,
    /// Host bridge settings.
    pub host: HostConfig,
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate the microphone is resampled to before sending, in Hz.
    pub input_sample_rate: u32,
    /// Rate of synthesized audio and of the output stream, in Hz.
    pub output_sample_rate: u32,
    /// Channels in inbound PCM chunks (interleaved).
    pub output_channels: u16,
    /// Samples per outbound frame.
    pub frame_size: usize,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            output_channels: 1,
            frame_size: 4096,
            input_device: None,
            output_device: None,
        }
    }
}

/// Remote speech endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// WebSocket endpoint (the API key is appended as `?key=`).
    pub endpoint: String,
    /// Model name, with or without the `models/` prefix.
    pub model: String,
    /// API key. Empty means read `api_key_env` at connect time.
    pub api_key: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Prebuilt voice name.
    pub voice_name: String,
    /// Replacement for the built-in consultant instruction (empty = built-in).
    pub system_instruction: String,
    /// Free text appended to the instruction.
    pub instruction_add_on: String,
    /// First realtime text sent so the agent speaks first.
    pub opening_prompt: String,
    /// Seconds to wait for the setup handshake.
    pub connect_timeout_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_owned(),
            model: "gemini-2.5-flash-native-audio-preview-12-2025".to_owned(),
            api_key: String::new(),
            api_key_env: "GEMINI_API_KEY".to_owned(),
            voice_name: "Kore".to_owned(),
            system_instruction: String::new(),
            instruction_add_on: String::new(),
            opening_prompt: crate::persona::OPENING_PROMPT.to_owned(),
            connect_timeout_secs: 15,
        }
    }
}

impl LiveConfig {
    /// The configured key, or the value of `api_key_env`.
    pub fn resolved_api_key(&self) -> Option<String> {
        if !self.api_key.trim().is_empty() {
            return Some(self.api_key.trim().to_owned());
        }
        std::env::var(&self.api_key_env)
            .ok()
            .map(|k| k.trim().to_owned())
            .filter(|k| !k.is_empty())
    }

    /// Model name in `models/<name>` form.
    pub fn qualified_model(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }

    /// The instruction sent in the session setup.
    pub fn effective_instruction(&self) -> String {
        crate::persona::assemble_instruction(&self.system_instruction, &self.instruction_add_on)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// Booking notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingConfig {
    /// Form relay URL the booking is POSTed to.
    pub relay_url: String,
    /// `_subject` of the relayed email.
    pub subject: String,
    /// Copy the visitor on the relayed email (`_cc`).
    pub cc_visitor: bool,
    /// Seconds before the relay request is abandoned.
    pub request_timeout_secs: u64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            relay_url: "https://formsubmit.co/ajax/kamleshg9569@gmail.com".to_owned(),
            subject: "Meeting Booked: Cheshta IT Solution Demo".to_owned(),
            cc_visitor: true,
            request_timeout_secs: 20,
        }
    }
}

impl BookingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Session timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds without activity before the call is ended. 0 disables.
    pub inactivity_timeout_secs: u64,
    /// Milliseconds between output level samples while a call is live.
    pub level_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 600,
            level_interval_ms: 16,
        }
    }
}

impl SessionConfig {
    /// `None` when the timeout is disabled.
    pub fn inactivity_timeout(&self) -> Option<Duration> {
        (self.inactivity_timeout_secs > 0)
            .then(|| Duration::from_secs(self.inactivity_timeout_secs))
    }

    pub fn level_interval(&self) -> Duration {
        Duration::from_millis(self.level_interval_ms.max(1))
    }
}

/// Host bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Emit `widget.opened` / `widget.closed` to the embedding host.
    pub notify_lifecycle: bool,
    /// Emit `session.level` events.
    pub emit_levels: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            notify_lifecycle: true,
            emit_levels: true,
        }
    }
}

impl AssistantConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::VoiceError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::VoiceError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/leadcall/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("leadcall").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("leadcall")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/leadcall-config/config.toml")
        }
    }

    /// Load from `path` when given, else from the default path when it
    /// exists, else defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load(path: Option<&std::path::Path>) -> crate::error::Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default_path = Self::default_config_path();
                if default_path.is_file() {
                    Self::from_file(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}
