//! Configuration system for Tellar nodes
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments (`--name`, `--language`)
//! 2. Environment variables (TELLAR_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values
//!
//! Ports are never configured: a node always scans for the first free HTTP
//! port from 8000 and the first free UDP port from 9000.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Upper bound for `agent.max_retries`
pub const MAX_AGENT_RETRIES: u32 = 10;

/// Main node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TellarConfig {
    /// Character identity
    pub character: CharacterSettings,

    /// Language agent settings
    pub agent: AgentSettings,

    /// LAN discovery settings
    pub discovery: DiscoverySettings,

    /// Autonomous conversation settings
    pub initiator: InitiatorSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Character identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterSettings {
    /// Character name, also the sender id of every outbound message
    pub name: String,

    /// Language the character speaks
    pub language: String,
}

/// Which agent implementation backs the character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentProvider {
    /// OpenAI-compatible chat completions API
    Openai,
    /// Deterministic offline replies
    Scripted,
}

/// Language agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub provider: AgentProvider,

    /// API base URL (e.g., "https://api.openai.com/v1", "http://localhost:11434/v1")
    pub base_url: String,

    /// API key (empty string for local servers like Ollama)
    pub api_key: String,

    /// Chat model identifier
    pub model: String,

    /// Image generation model identifier
    pub image_model: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum retries on transient failures
    pub max_retries: u32,
}

/// LAN discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// First UDP port probed
    pub probe_port_start: u16,

    /// Number of consecutive ports probed
    pub probe_port_count: u16,

    /// Destination address of probes
    pub broadcast_addr: String,

    /// Delay before the first scan
    pub initial_delay_ms: u64,

    /// Delay between scans
    pub scan_interval_ms: u64,

    /// How long to collect responses per probed port
    pub probe_timeout_ms: u64,

    /// Advertiser socket read timeout (bounds shutdown latency)
    pub advertise_timeout_ms: u64,

    /// Timeout of the `GET /` liveness check
    pub liveness_timeout_ms: u64,
}

/// Autonomous conversation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InitiatorSettings {
    /// Peer set polling interval while nobody has been discovered
    pub poll_interval_ms: u64,

    /// Fixed delay between reconnection attempts
    pub reconnect_delay_ms: u64,

    /// Language used when asking the character for its goal
    pub goal_language: String,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Rotation period: hourly, daily, never
    pub rotation: String,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for CharacterSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            language: "english".to_string(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            provider: AgentProvider::Openai,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o".to_string(),
            image_model: "dall-e-3".to_string(),
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            probe_port_start: 9000,
            probe_port_count: 10,
            broadcast_addr: "255.255.255.255".to_string(),
            initial_delay_ms: 1000,
            scan_interval_ms: 5000,
            probe_timeout_ms: 1000,
            advertise_timeout_ms: 3000,
            liveness_timeout_ms: 2000,
        }
    }
}

impl Default for InitiatorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            reconnect_delay_ms: 5000,
            goal_language: "english".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            rotation: "daily".to_string(),
            max_files: 5,
            json_format: false,
        }
    }
}

impl DiscoverySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn advertise_timeout(&self) -> Duration {
        Duration::from_millis(self.advertise_timeout_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    /// Ports probed on every scan, `probe_port_start..probe_port_start + probe_port_count`
    pub fn probe_ports(&self) -> std::ops::Range<u16> {
        let end = self.probe_port_start.saturating_add(self.probe_port_count);
        self.probe_port_start..end
    }
}

impl InitiatorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl TellarConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path)?;
            config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
                message: format!("{}: {}", path.display(), e.message()),
                source: Some(e),
            })?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // An explicit path must exist
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        let search_paths = [
            // Current directory
            Some(PathBuf::from("tellar.toml")),
            // User config directory
            dirs::config_dir().map(|p| p.join("tellar").join("tellar.toml")),
            // Home directory
            dirs::home_dir().map(|p| p.join(".tellar").join("tellar.toml")),
        ];

        for path in search_paths.into_iter().flatten() {
            if path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Character settings
        if let Ok(val) = std::env::var("TELLAR_NAME") {
            self.character.name = val;
        }
        if let Ok(val) = std::env::var("TELLAR_LANGUAGE") {
            self.character.language = val;
        }

        // Agent settings
        if let Ok(val) = std::env::var("TELLAR_AGENT_PROVIDER") {
            match val.to_lowercase().as_str() {
                "openai" => self.agent.provider = AgentProvider::Openai,
                "scripted" => self.agent.provider = AgentProvider::Scripted,
                other => debug!(provider = %other, "Ignoring unknown agent provider"),
            }
        }
        if let Ok(val) = std::env::var("TELLAR_AGENT_BASE_URL") {
            self.agent.base_url = val;
        }
        if let Ok(val) = std::env::var("TELLAR_AGENT_MODEL") {
            self.agent.model = val;
        }
        if let Ok(val) = std::env::var("TELLAR_AGENT_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                self.agent.timeout_secs = n;
            }
        }
        // The provider's own variable is honoured as a fallback
        if let Ok(val) = std::env::var("TELLAR_AGENT_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY")) {
            self.agent.api_key = val;
        }

        // Discovery settings
        if let Ok(val) = std::env::var("TELLAR_BROADCAST_ADDR") {
            self.discovery.broadcast_addr = val;
        }
        if let Ok(val) = std::env::var("TELLAR_SCAN_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.discovery.scan_interval_ms = n;
            }
        }

        // Initiator settings
        if let Ok(val) = std::env::var("TELLAR_RECONNECT_DELAY_MS") {
            if let Ok(n) = val.parse() {
                self.initiator.reconnect_delay_ms = n;
            }
        }

        // Logging settings
        if let Ok(val) = std::env::var("TELLAR_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("TELLAR_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("TELLAR_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.agent.base_url.starts_with("http://") && !self.agent.base_url.starts_with("https://") {
            return Err(Error::config_field_invalid(
                "agent.base_url",
                "agent.base_url must start with http:// or https://",
            ));
        }
        if self.agent.timeout_secs == 0 {
            return Err(Error::config_field_invalid(
                "agent.timeout_secs",
                "agent.timeout_secs must be greater than 0",
            ));
        }

        if self.agent.max_retries > MAX_AGENT_RETRIES {
            return Err(Error::config_field_invalid(
                "agent.max_retries",
                format!("agent.max_retries must be at most {}", MAX_AGENT_RETRIES),
            ));
        }

        if self.discovery.probe_port_count == 0 {
            return Err(Error::config_field_invalid(
                "discovery.probe_port_count",
                "discovery.probe_port_count must be greater than 0",
            ));
        }
        if self.discovery.broadcast_addr.parse::<std::net::Ipv4Addr>().is_err() {
            return Err(Error::config_field_invalid(
                "discovery.broadcast_addr",
                format!(
                    "discovery.broadcast_addr '{}' is not an IPv4 address",
                    self.discovery.broadcast_addr
                ),
            ));
        }
        let timeouts = [
            ("discovery.probe_timeout_ms", self.discovery.probe_timeout_ms),
            ("discovery.advertise_timeout_ms", self.discovery.advertise_timeout_ms),
            ("discovery.liveness_timeout_ms", self.discovery.liveness_timeout_ms),
            ("initiator.poll_interval_ms", self.initiator.poll_interval_ms),
            ("initiator.reconnect_delay_ms", self.initiator.reconnect_delay_ms),
        ];
        for (field, value) in timeouts {
            // Zero is "block forever" for std sockets and a panic for tokio intervals
            if value == 0 {
                return Err(Error::config_field_invalid(
                    field,
                    format!("{} must be greater than 0", field),
                ));
            }
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        let valid_rotations = ["hourly", "daily", "never"];
        if !valid_rotations.contains(&self.logging.rotation.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.rotation",
                format!(
                    "Invalid rotation '{}'. Must be one of: {}",
                    self.logging.rotation,
                    valid_rotations.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Apply `--name` / `--language` from the command line
    pub fn apply_cli_overrides(&mut self, name: Option<String>, language: Option<String>) {
        if let Some(name) = name {
            self.character.name = name;
        }
        if let Some(language) = language {
            self.character.language = language;
        }
    }

    /// The character name, required by every running mode
    pub fn character_name(&self) -> Result<&str> {
        let name = self.character.name.trim();
        if name.is_empty() {
            return Err(Error::config_field_invalid(
                "character.name",
                "A character name is required (--name, TELLAR_NAME or [character].name)",
            ));
        }
        Ok(name)
    }
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or(std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".tellar")
                .join("tellar.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::config_validation(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    r#"# Tellar node configuration

[character]
# Character name (can also be given with --name or TELLAR_NAME)
# name = "Sherlock Holmes"

# Language the character speaks
language = "english"

[agent]
# Agent implementation: "openai" or "scripted" (offline, for demos)
provider = "openai"

# API base URL (OpenAI, Ollama, vLLM, LM Studio, etc.)
base_url = "https://api.openai.com/v1"

# API key (or set OPENAI_API_KEY / TELLAR_AGENT_API_KEY)
api_key = ""

# Chat model identifier
model = "gpt-4o"

# Image generation model identifier
image_model = "dall-e-3"

# Request timeout in seconds
timeout_secs = 120

# Maximum retries on transient failures
max_retries = 2

[discovery]
# UDP ports probed on every scan
probe_port_start = 9000
probe_port_count = 10

# Destination of discovery probes
broadcast_addr = "255.255.255.255"

# Delay before the first scan and between scans (milliseconds)
initial_delay_ms = 1000
scan_interval_ms = 5000

# Response window per probed port (milliseconds)
probe_timeout_ms = 1000

# Advertiser read timeout (milliseconds)
advertise_timeout_ms = 3000

# Liveness check timeout (milliseconds)
liveness_timeout_ms = 2000

[initiator]
# Peer polling interval (milliseconds)
poll_interval_ms = 1000

# Fixed delay between reconnection attempts (milliseconds)
reconnect_delay_ms = 5000

# Language used to ask the character for its goal
goal_language = "english"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.tellar/logs/tellar.log"

# Rotation period: hourly, daily, never
rotation = "daily"

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = TellarConfig::default();
        assert_eq!(config.character.language, "english");
        assert_eq!(config.agent.provider, AgentProvider::Openai);
        assert_eq!(config.discovery.probe_ports(), 9000..9010);
        assert_eq!(config.discovery.initial_delay(), Duration::from_secs(1));
        assert_eq!(config.discovery.scan_interval(), Duration::from_secs(5));
        assert_eq!(config.discovery.advertise_timeout(), Duration::from_secs(3));
        assert_eq!(config.initiator.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_override() {
        env::set_var("TELLAR_BROADCAST_ADDR", "127.0.0.1");
        env::set_var("TELLAR_AGENT_PROVIDER", "scripted");
        env::set_var("TELLAR_RECONNECT_DELAY_MS", "250");

        let mut config = TellarConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.discovery.broadcast_addr, "127.0.0.1");
        assert_eq!(config.agent.provider, AgentProvider::Scripted);
        assert_eq!(config.initiator.reconnect_delay_ms, 250);

        env::remove_var("TELLAR_BROADCAST_ADDR");
        env::remove_var("TELLAR_AGENT_PROVIDER");
        env::remove_var("TELLAR_RECONNECT_DELAY_MS");
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(TellarConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_base_url() {
        let mut config = TellarConfig::default();
        config.agent.base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_broadcast_addr() {
        let mut config = TellarConfig::default();
        config.discovery.broadcast_addr = "everyone".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("broadcast_addr"));
    }

    #[test]
    fn test_validation_zero_timeout() {
        let mut config = TellarConfig::default();
        config.discovery.probe_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_initiator_intervals() {
        let mut config = TellarConfig::default();
        config.initiator.poll_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("initiator.poll_interval_ms"));

        let mut config = TellarConfig::default();
        config.initiator.reconnect_delay_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("initiator.reconnect_delay_ms"));
    }

    #[test]
    fn test_validation_max_retries_bounded() {
        let mut config = TellarConfig::default();
        config.agent.max_retries = MAX_AGENT_RETRIES;
        assert!(config.validate().is_ok());

        config.agent.max_retries = 64;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("agent.max_retries"));
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = TellarConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_character_name_required() {
        let mut config = TellarConfig::default();
        assert!(config.character_name().is_err());

        config.apply_cli_overrides(Some("Dr Watson".to_string()), Some("french".to_string()));
        assert_eq!(config.character_name().unwrap(), "Dr Watson");
        assert_eq!(config.character.language, "french");
    }

    #[test]
    fn test_path_expansion() {
        let mut config = TellarConfig::default();
        config.logging.file = Some("~/logs/tellar.log".to_string());
        config.expand_paths();
        assert!(!config.logging.file.unwrap().contains('~'));
    }

    #[test]
    fn test_default_config_file_parses() {
        let parsed: TellarConfig = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(parsed.discovery.probe_port_start, 9000);
        assert_eq!(parsed.agent.image_model, "dall-e-3");
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_parse_config_file() {
        let config_str = r#"
[character]
name = "Sherlock Holmes"

[agent]
provider = "scripted"

[discovery]
broadcast_addr = "127.0.0.1"
scan_interval_ms = 200

[logging]
level = "debug"
"#;

        let config: TellarConfig = toml::from_str(config_str).unwrap();

        assert_eq!(config.character.name, "Sherlock Holmes");
        assert_eq!(config.character.language, "english");
        assert_eq!(config.agent.provider, AgentProvider::Scripted);
        assert_eq!(config.discovery.broadcast_addr, "127.0.0.1");
        assert_eq!(config.discovery.scan_interval_ms, 200);
        assert_eq!(config.discovery.probe_timeout_ms, 1000);
        assert_eq!(config.logging.level, "debug");
    }
}
