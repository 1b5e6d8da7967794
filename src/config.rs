// Configuration File Support
//
// This module provides configuration parsing for the mcp-shell server.
// Supports TOML (default) and JSON (by `.json` extension) with environment
// variable overrides for the server and logging sections. The security
// section is only ever read from the file.
//
// Lookup order: `--config <path>`, then `MCP_SHELL_CONFIG_FILE`, then
// `~/.config/mcp-shell/config.toml`. A `.env` file is read into the process
// environment first; variables that are already set take precedence.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit configuration file
pub const CONFIG_FILE_ENV: &str = "MCP_SHELL_CONFIG_FILE";

/// Timeout applied when `max_execution_time` is zero
pub const DEFAULT_MAX_EXECUTION_TIME: Duration = Duration::from_secs(30);

/// Default output cap per stream (1MB)
pub const DEFAULT_MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Command policy and execution limits
    pub security: SecurityConfig,

    /// Server identification reported during `initialize`
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Security configuration shared read-only by the policy engine and the executor
///
/// `allowed_executables` drives secure mode. `allowed_commands`,
/// `blocked_commands` and `blocked_patterns` only apply when
/// `use_shell_execution` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Master switch; when false every command is allowed
    pub enabled: bool,

    /// Hand the raw command to `bash -c` instead of executing it directly
    pub use_shell_execution: bool,

    /// Secure mode allowlist of executable names or absolute paths
    pub allowed_executables: Vec<String>,

    /// Legacy mode literal prefixes
    pub allowed_commands: Vec<String>,

    /// Legacy mode substrings
    pub blocked_commands: Vec<String>,

    /// Legacy mode regular expressions
    pub blocked_patterns: Vec<String>,

    /// Per-call timeout, written as `"30s"`, `"1m30s"`, `"500ms"`
    #[serde(with = "duration_str")]
    pub max_execution_time: Duration,

    /// Per-stream output cap in bytes (0 = unlimited)
    pub max_output_size: usize,

    /// Working directory for child processes (created if missing)
    #[serde(deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,

    /// User the child process should run as
    #[serde(deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<String>,

    /// Emit audit events for every request
    pub audit_log: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            use_shell_execution: false,
            allowed_executables: Vec::new(),
            allowed_commands: Vec::new(),
            blocked_commands: vec![
                "rm -rf".to_string(),
                "sudo".to_string(),
                "chmod 777".to_string(),
                "dd".to_string(),
                "mkfs".to_string(),
                "fdisk".to_string(),
            ],
            blocked_patterns: vec![
                r"rm\s+.*-rf.*".to_string(),
                r"sudo\s+.*".to_string(),
                r"chmod\s+(777|666)".to_string(),
                ">/dev/".to_string(),
                r"format\s+".to_string(),
            ],
            max_execution_time: DEFAULT_MAX_EXECUTION_TIME,
            max_output_size: DEFAULT_MAX_OUTPUT_SIZE,
            working_directory: Some("/tmp/mcp-workspace".to_string()),
            run_as_user: None,
            audit_log: true,
        }
    }
}

impl SecurityConfig {
    /// Timeout actually applied to a call; zero falls back to 30 seconds
    pub fn execution_timeout(&self) -> Duration {
        if self.max_execution_time.is_zero() {
            DEFAULT_MAX_EXECUTION_TIME
        } else {
            self.max_execution_time
        }
    }
}

/// Server identification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Name reported in `serverInfo`
    pub name: String,

    /// Version reported in `serverInfo`
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "mcp-shell".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error, fatal)
    pub level: String,

    /// Log format (json, pretty, compact, console)
    pub format: String,

    /// Log destination (stdout, stderr, file)
    pub output: String,

    /// Log file path (required when output is "file")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            output: "stderr".to_string(),
            log_file: None,
        }
    }
}

/// Read `.env` into the process environment, ignoring a missing file
fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded environment from {:?}", path),
        Err(err) if err.not_found() => {}
        Err(err) => tracing::warn!(error = %err, "Ignoring unreadable .env file"),
    }
}

impl Config {
    /// Load configuration
    ///
    /// An explicit path (argument or `MCP_SHELL_CONFIG_FILE`) must exist.
    /// The default path is optional and falls back to defaults when absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        load_dotenv();

        let from_env = std::env::var(CONFIG_FILE_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file {:?} does not exist", path);
                }
                Self::load_from_path(&path)
            }
            None => Self::load_from_path(Self::config_path()),
        }
    }

    /// Load configuration from a specific path
    ///
    /// If the file does not exist, defaults are used. Environment overrides
    /// and validation are applied in both cases.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let parsed = Self::parse(path, &content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            parsed
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn parse(path: &Path, content: &str) -> Result<Self> {
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        if is_json {
            Ok(serde_json::from_str(content)?)
        } else {
            Ok(toml::from_str(content)?)
        }
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/mcp-shell/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(dir) = dirs::config_dir() {
            dir.join("mcp-shell").join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("mcp-shell")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides from the process environment
    ///
    /// - MCP_SHELL_SERVER_NAME
    /// - MCP_SHELL_VERSION
    /// - MCP_SHELL_LOG_LEVEL
    /// - MCP_SHELL_LOG_FORMAT
    /// - MCP_SHELL_LOG_OUTPUT
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(name) = get("MCP_SHELL_SERVER_NAME") {
            self.server.name = name;
        }
        if let Some(version) = get("MCP_SHELL_VERSION") {
            self.server.version = version;
        }
        if let Some(level) = get("MCP_SHELL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = get("MCP_SHELL_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(output) = get("MCP_SHELL_LOG_OUTPUT") {
            self.logging.output = output;
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "fatal" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error, fatal",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" | "console" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact, console",
                self.logging.format
            ),
        }

        match self.logging.output.to_lowercase().as_str() {
            "stdout" | "stderr" => {}
            "file" => {
                if self.logging.log_file.as_deref().unwrap_or("").is_empty() {
                    anyhow::bail!("Log output is 'file' but no log_file is configured");
                }
            }
            _ => anyhow::bail!(
                "Invalid log output: {}. Must be one of: stdout, stderr, file",
                self.logging.output
            ),
        }

        if self.server.name.trim().is_empty() {
            anyhow::bail!("Server name must not be empty");
        }

        for pattern in &self.security.blocked_patterns {
            regex::Regex::new(pattern)
                .with_context(|| format!("Invalid blocked pattern: {}", pattern))?;
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        match self.logging.level.to_lowercase().as_str() {
            "fatal" => Ok(tracing::Level::ERROR),
            level => level
                .parse()
                .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e)),
        }
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

/// Error parsing a textual duration such as `"1m30s"`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationParseError {
    #[error("empty duration")]
    Empty,

    #[error("invalid duration '{0}'")]
    Invalid(String),

    #[error("missing unit in duration '{0}'")]
    MissingUnit(String),

    #[error("unknown unit '{unit}' in duration '{input}'")]
    UnknownUnit { unit: String, input: String },
}

/// Parse a duration made of `<number><unit>` groups
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. Fractions are allowed
/// (`"1.5s"`), groups may be chained (`"1h2m3s"`), and a bare `"0"` is zero.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, DurationParseError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationParseError::Empty);
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut total_nanos = 0f64;
    let mut rest = s;

    while !rest.is_empty() {
        let number_end = rest.find(|c: char| !is_number(c)).unwrap_or(rest.len());
        if number_end == 0 {
            return Err(DurationParseError::Invalid(input.to_string()));
        }
        let value: f64 = rest[..number_end]
            .parse()
            .map_err(|_| DurationParseError::Invalid(input.to_string()))?;
        rest = &rest[number_end..];

        let unit_end = rest.find(is_number).unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(DurationParseError::MissingUnit(input.to_string())),
            other => {
                return Err(DurationParseError::UnknownUnit {
                    unit: other.to_string(),
                    input: input.to_string(),
                })
            }
        };
        total_nanos += value * scale;
        rest = &rest[unit_end..];
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Render a duration in the same notation `parse_duration` accepts
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }
    if duration.subsec_nanos() != 0 {
        let nanos = duration.as_nanos();
        return if nanos % 1_000_000 == 0 {
            format!("{}ms", nanos / 1_000_000)
        } else {
            format!("{}ns", nanos)
        };
    }

    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h", h));
    }
    if m > 0 {
        out.push_str(&format!("{}m", m));
    }
    if s > 0 {
        out.push_str(&format!("{}s", s));
    }
    out
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
