//! Command Validation Module
//!
//! The policy engine decides whether a raw command string may run at all.
//! Two mutually exclusive modes exist:
//!
//! - **Secure**: the command is tokenized, any shell syntax is rejected and the
//!   executable must be on an allowlist. The executor later runs it without a
//!   shell.
//! - **Legacy**: the command is matched against blocked substrings, blocked
//!   regular expressions and allowed prefixes, then handed to a shell. This
//!   only inspects the surface text, so payloads assembled at runtime by the
//!   shell are not detected.

use super::lexer::{
    contains_dangerous_constructs, find_dangerous_construct, find_shell_metacharacter, tokenize,
};
use crate::audit::AuditLog;
use crate::config::SecurityConfig;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Reason a command was refused by the policy engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyDenial {
    #[error("empty command")]
    EmptyCommand,

    #[error("command contains shell metacharacters (not allowed in secure mode): {0}")]
    ShellMetacharacters(String),

    #[error("command contains dangerous shell constructs (not allowed in secure mode): {0}")]
    DangerousConstructs(String),

    #[error("argument contains dangerous shell constructs: {0}")]
    DangerousArgument(String),

    #[error("executable '{0}' not in allowed list")]
    ExecutableNotAllowed(String),

    #[error("no allowed executables configured - all commands blocked for security")]
    NoAllowedExecutables,

    #[error("command matches blocked pattern: {0}")]
    BlockedPattern(String),

    #[error("command contains blocked keyword: {0}")]
    BlockedKeyword(String),

    #[error("command not in allowed list")]
    CommandNotAllowed,
}

/// Which validation path governs every call, resolved once from configuration
#[derive(Debug, Clone)]
pub enum ValidationMode {
    /// Security disabled, everything is allowed
    Disabled,

    /// Direct execution with an executable allowlist
    Secure { allowed_executables: Vec<String> },

    /// Direct execution requested but nothing is allowed
    Locked,

    /// Shell execution guarded by substring, prefix and regex lists
    Legacy {
        allowed_commands: Vec<String>,
        blocked_commands: Vec<String>,
        blocked_patterns: Vec<Regex>,
    },
}

impl ValidationMode {
    /// Select the mode for a configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a blocked pattern is not a valid regular expression.
    pub fn from_config(config: &SecurityConfig) -> Result<Self, regex::Error> {
        if !config.enabled {
            return Ok(Self::Disabled);
        }

        if config.use_shell_execution {
            let blocked_patterns = config
                .blocked_patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<Vec<_>, _>>()?;

            return Ok(Self::Legacy {
                allowed_commands: config.allowed_commands.clone(),
                blocked_commands: config.blocked_commands.clone(),
                blocked_patterns,
            });
        }

        if config.allowed_executables.is_empty() {
            Ok(Self::Locked)
        } else {
            Ok(Self::Secure {
                allowed_executables: config.allowed_executables.clone(),
            })
        }
    }

    /// Short name used in logs and audit events
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Secure { .. } => "secure",
            Self::Locked => "locked",
            Self::Legacy { .. } => "legacy",
        }
    }
}

/// Policy engine that accepts or rejects raw command strings
///
/// Stateless per call: validating the same command twice yields the same
/// decision.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    mode: ValidationMode,
    audit: AuditLog,
}

impl CommandPolicy {
    /// Build the policy for a security configuration
    pub fn new(config: &SecurityConfig, audit: AuditLog) -> Result<Self, regex::Error> {
        Ok(Self::with_mode(ValidationMode::from_config(config)?, audit))
    }

    /// Build the policy from an already resolved mode
    pub fn with_mode(mode: ValidationMode, audit: AuditLog) -> Self {
        Self { mode, audit }
    }

    /// The active validation mode
    pub fn mode(&self) -> &ValidationMode {
        &self.mode
    }

    /// Whether any validation is applied
    pub fn is_enabled(&self) -> bool {
        !matches!(self.mode, ValidationMode::Disabled)
    }

    /// Validate a raw command string
    ///
    /// # Example
    ///
    /// ```
    /// use mcp_shell::audit::AuditLog;
    /// use mcp_shell::tools::{CommandPolicy, ValidationMode};
    ///
    /// let policy = CommandPolicy::with_mode(
    ///     ValidationMode::Secure { allowed_executables: vec!["echo".to_string()] },
    ///     AuditLog::disabled(),
    /// );
    /// assert!(policy.validate("echo hello").is_ok());
    /// assert!(policy.validate("echo $(whoami)").is_err());
    /// ```
    pub fn validate(&self, command: &str) -> Result<(), PolicyDenial> {
        if let ValidationMode::Disabled = self.mode {
            debug!(command, "Security disabled, allowing command");
            self.audit.policy_bypassed(command);
            return Ok(());
        }

        debug!(command, mode = self.mode.name(), "Validating command");

        let decision = match &self.mode {
            ValidationMode::Disabled => Ok(()),
            ValidationMode::Secure {
                allowed_executables,
            } => validate_secure(command, allowed_executables),
            ValidationMode::Locked => {
                warn!(command, "No allowed executables configured - blocking all commands");
                Err(PolicyDenial::NoAllowedExecutables)
            }
            ValidationMode::Legacy {
                allowed_commands,
                blocked_commands,
                blocked_patterns,
            } => {
                warn!(
                    command,
                    "Using legacy shell execution mode - this is vulnerable to injection attacks"
                );
                validate_legacy(command, allowed_commands, blocked_commands, blocked_patterns)
            }
        };

        match &decision {
            Ok(()) => self.audit.command_allowed(command, self.mode.name()),
            Err(denial) => self.audit.command_denied(command, &denial.to_string()),
        }
        decision
    }
}

/// Allowlist validation for direct execution
fn validate_secure(command: &str, allowed_executables: &[String]) -> Result<(), PolicyDenial> {
    let command = command.trim();
    if command.is_empty() {
        return Err(PolicyDenial::EmptyCommand);
    }

    // Constructs first so substitutions get the more specific reason; every
    // construct contains a metacharacter, so the decision is the same.
    if let Some(construct) = find_dangerous_construct(command) {
        debug!(command, construct, "Dangerous shell construct detected");
        return Err(PolicyDenial::DangerousConstructs(command.to_string()));
    }

    if let Some(ch) = find_shell_metacharacter(command) {
        debug!(command, metacharacter = %ch, "Shell metacharacter detected");
        return Err(PolicyDenial::ShellMetacharacters(command.to_string()));
    }

    let tokens = tokenize(command);
    let (executable, args) = tokens.split_first().ok_or(PolicyDenial::EmptyCommand)?;

    match allowed_executables
        .iter()
        .find(|allowed| matches_executable(executable, allowed))
    {
        Some(allowed) => {
            debug!(executable, allowed_pattern = %allowed, "Command validated against allowed executable");
        }
        None => {
            warn!(executable, allowed_executables = ?allowed_executables, "Executable not in allowed list");
            return Err(PolicyDenial::ExecutableNotAllowed(executable.to_string()));
        }
    }

    if let Some(arg) = args.iter().find(|a| contains_dangerous_constructs(a)) {
        return Err(PolicyDenial::DangerousArgument(arg.to_string()));
    }

    Ok(())
}

/// Substring, pattern and prefix validation for shell execution
fn validate_legacy(
    command: &str,
    allowed_commands: &[String],
    blocked_commands: &[String],
    blocked_patterns: &[Regex],
) -> Result<(), PolicyDenial> {
    if let Some(pattern) = blocked_patterns.iter().find(|p| p.is_match(command)) {
        warn!(command, pattern = pattern.as_str(), "Command blocked by pattern");
        return Err(PolicyDenial::BlockedPattern(pattern.as_str().to_string()));
    }

    if let Some(keyword) = blocked_commands.iter().find(|k| command.contains(k.as_str())) {
        warn!(command, blocked_keyword = %keyword, "Command contains blocked keyword");
        return Err(PolicyDenial::BlockedKeyword(keyword.clone()));
    }

    if !allowed_commands.is_empty() {
        let trimmed = command.trim();
        if !allowed_commands
            .iter()
            .any(|prefix| trimmed.starts_with(prefix.as_str()))
        {
            warn!(command, allowed_commands = ?allowed_commands, "Command not in allowed list");
            return Err(PolicyDenial::CommandNotAllowed);
        }
    }

    debug!(command, "Legacy command validation passed");
    Ok(())
}

/// Check if an executable token matches an allowlist entry
///
/// - exact string equality, or
/// - the entry is absolute and the executable resolves to the same absolute path, or
/// - both are relative, basenames match and the executable resolves through `PATH`.
pub fn matches_executable(executable: &str, allowed: &str) -> bool {
    if executable == allowed {
        return true;
    }

    if Path::new(allowed).is_absolute() {
        return absolutize(Path::new(executable))
            .map(|resolved| resolved == Path::new(allowed))
            .unwrap_or(false);
    }

    let exec_path = Path::new(executable);
    if exec_path.is_absolute() {
        return false;
    }

    let basename_matches = exec_path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name == allowed);

    basename_matches && which::which(executable).is_ok()
}

/// Resolve an executable token to the program path the policy matched
///
/// Tokens containing a separator are resolved against the server's current
/// directory, bare names through `PATH`. The child must be spawned with this
/// path, since its own working directory may differ from the server's.
pub fn resolve_executable(executable: &str) -> Option<PathBuf> {
    let path = Path::new(executable);
    if path.is_absolute() || path.components().count() > 1 {
        return absolutize(path);
    }
    which::which(executable).ok()
}

/// Resolve a path against the current directory and normalize `.` and `..`
fn absolutize(path: &Path) -> Option<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Some(normalized)
}
