//! Command Executor
//!
//! Runs an already validated command as a child process, bounded by the
//! configured timeout and by the caller's cancellation token. Secure mode
//! execs the parsed argument vector directly; legacy mode hands the raw
//! string to `bash -c`.

use super::identity::{IdentityResolver, SystemIdentity};
use super::lexer::{parse_command, ParseError};
use super::timeout::{ExecutionScope, ExecutionTimeout, Interrupted};
use super::validator::resolve_executable;
use crate::audit::AuditLog;
use crate::config::SecurityConfig;
use base64::Engine as _;
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Errors that prevent a result from being produced
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("command parsing failed: {0}")]
    Parse(#[from] ParseError),

    #[error("{stream} exceeds maximum size limit ({size} > {limit} bytes)")]
    OutputLimit {
        stream: &'static str,
        size: usize,
        limit: usize,
    },

    #[error("command execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("command execution was cancelled")]
    Cancelled,

    #[error("failed to collect command output: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Interrupted> for ExecutionError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::TimedOut(limit) => Self::Timeout(limit),
            Interrupted::Cancelled => Self::Cancelled,
        }
    }
}

/// Outcome classification of a finished child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Security context reported alongside a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityInfo {
    pub security_enabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<String>,

    pub timeout_applied: bool,

    /// Best-effort environment steps that fell back to the server's own
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Result of running a command to completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,

    /// Child exit code, `-1` if it never started or was killed by a signal
    pub exit_code: i32,

    pub stdout: String,
    pub stderr: String,

    /// The command as received
    pub command: String,

    #[serde(serialize_with = "serialize_elapsed")]
    pub execution_time: Duration,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_info: Option<SecurityInfo>,
}

fn serialize_elapsed<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format!("{:?}", elapsed))
}

/// Raw bytes and exit code of a finished child
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: i32,
}

/// Executor for validated commands
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use mcp_shell::audit::AuditLog;
/// use mcp_shell::config::SecurityConfig;
/// use mcp_shell::tools::CommandExecutor;
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let executor = CommandExecutor::new(Arc::new(SecurityConfig::default()), AuditLog::disabled());
///     let result = executor.execute(&CancellationToken::new(), "echo hello", false).await?;
///     assert_eq!(result.stdout, "hello");
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: Arc<SecurityConfig>,
    audit: AuditLog,
    identity: Arc<dyn IdentityResolver>,
}

impl CommandExecutor {
    pub fn new(config: Arc<SecurityConfig>, audit: AuditLog) -> Self {
        Self {
            config,
            audit,
            identity: Arc::new(SystemIdentity),
        }
    }

    /// Replace the resolver used for `run_as_user`
    pub fn with_identity_resolver(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Execute `command` and capture its output
    ///
    /// A non-zero exit is a normal result with [`ExecutionStatus::Error`].
    ///
    /// # Errors
    ///
    /// - the command cannot be parsed for direct execution
    /// - the timeout expires or `cancel` fires (the process group is killed)
    /// - either stream exceeds `max_output_size`
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        command: &str,
        want_base64: bool,
    ) -> Result<ExecutionResult, ExecutionError> {
        let start = Instant::now();
        info!(command, base64 = want_base64, "Executing command");

        match self.run(cancel, command, want_base64, start).await {
            Ok(result) => {
                info!(
                    command,
                    status = result.status.as_str(),
                    exit_code = result.exit_code,
                    execution_time = ?result.execution_time,
                    "Command execution completed"
                );
                self.audit.command_completed(
                    command,
                    result.status.as_str(),
                    result.exit_code,
                    result.execution_time,
                );
                Ok(result)
            }
            Err(err) => {
                error!(command, error = %err, "Command execution failed");
                self.audit.command_failed(command, &err.to_string());
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        command: &str,
        want_base64: bool,
        start: Instant,
    ) -> Result<ExecutionResult, ExecutionError> {
        let scope = ExecutionScope::new(cancel, ExecutionTimeout::new(self.config.execution_timeout()));
        let mut process = self.build_process(command)?;
        let mut warnings = Vec::new();

        self.apply_working_directory(&mut process, &mut warnings).await;
        self.apply_identity(&mut process, &mut warnings);

        process
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        process.process_group(0);

        let captured = match process.spawn() {
            Ok(child) => collect(child, &scope).await?,
            Err(err) => {
                warn!(command, error = %err, "Failed to spawn process");
                Captured {
                    stdout: Vec::new(),
                    stderr: err.to_string().into_bytes(),
                    exit_code: -1,
                }
            }
        };

        self.check_output_size("stdout", captured.stdout.len())?;
        self.check_output_size("stderr", captured.stderr.len())?;

        let status = if captured.exit_code == 0 {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Error
        };

        Ok(ExecutionResult {
            status,
            exit_code: captured.exit_code,
            stdout: encode_stream(captured.stdout, want_base64),
            stderr: encode_stream(captured.stderr, want_base64),
            command: command.to_string(),
            execution_time: start.elapsed(),
            security_info: Some(SecurityInfo {
                security_enabled: self.config.enabled,
                working_dir: self.config.working_directory.clone(),
                run_as_user: self.config.run_as_user.clone(),
                timeout_applied: true,
                warnings,
            }),
        })
    }

    fn build_process(&self, command: &str) -> Result<Command, ExecutionError> {
        if self.config.use_shell_execution {
            warn!(
                command,
                "Using legacy shell execution mode - vulnerable to injection attacks"
            );
            let mut process = Command::new("bash");
            process.arg("-c").arg(command);
            return Ok(process);
        }

        let parsed = parse_command(command).map_err(|err| {
            error!(command, error = %err, "Failed to parse command securely");
            err
        })?;

        let program = resolve_executable(&parsed.executable)
            .unwrap_or_else(|| PathBuf::from(&parsed.executable));

        debug!(
            executable = %parsed.executable,
            program = %program.display(),
            args = ?parsed.args,
            "Executing command with direct execution"
        );

        let mut process = Command::new(&program);
        process.args(&parsed.args);
        Ok(process)
    }

    async fn apply_working_directory(&self, process: &mut Command, warnings: &mut Vec<String>) {
        let Some(dir) = self.config.working_directory.as_deref() else {
            return;
        };

        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o755);

        match builder.create(dir).await {
            Ok(()) => {
                debug!(working_dir = dir, "Set working directory");
                process.current_dir(dir);
            }
            Err(err) => {
                warn!(working_dir = dir, error = %err, "Could not prepare working directory, using server cwd");
                warnings.push(format!("working directory '{}' unavailable: {}", dir, err));
            }
        }
    }

    fn apply_identity(&self, process: &mut Command, warnings: &mut Vec<String>) {
        let Some(user) = self.config.run_as_user.as_deref() else {
            return;
        };

        match self.identity.resolve(user) {
            Ok(identity) => {
                debug!(user, uid = identity.uid, gid = identity.gid, "Set process credentials");
                #[cfg(unix)]
                {
                    process.gid(identity.gid);
                    process.uid(identity.uid);
                }
                #[cfg(not(unix))]
                let _ = process;
            }
            Err(err) => {
                warn!(user, error = %err, "Could not resolve run-as user, running as server user");
                warnings.push(format!("run_as_user '{}' not applied: {}", user, err));
            }
        }
    }

    fn check_output_size(&self, stream: &'static str, size: usize) -> Result<(), ExecutionError> {
        let limit = self.config.max_output_size;
        if limit > 0 && size > limit {
            warn!(stream, size, max_size = limit, "Output exceeds maximum size limit");
            return Err(ExecutionError::OutputLimit {
                stream,
                size,
                limit,
            });
        }
        Ok(())
    }
}

/// Read both streams and wait for exit inside the scope
async fn collect(mut child: Child, scope: &ExecutionScope) -> Result<Captured, ExecutionError> {
    let pid = child.id();
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    let outcome = scope
        .run(async {
            let (out, err, status) = tokio::join!(
                read_stream(stdout.as_mut()),
                read_stream(stderr.as_mut()),
                child.wait()
            );
            Ok::<_, std::io::Error>((out?, err?, status?))
        })
        .await;

    match outcome {
        Ok(Ok((stdout, stderr, status))) => Ok(Captured {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(-1),
        }),
        Ok(Err(err)) => {
            terminate(&mut child, pid).await;
            Err(ExecutionError::Io(err))
        }
        Err(interrupted) => {
            warn!(?pid, reason = %interrupted, "Killing command process group");
            terminate(&mut child, pid).await;
            Err(interrupted.into())
        }
    }
}

async fn read_stream<R: AsyncRead + Unpin>(stream: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Kill the child's process group and reap the child
async fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(errno) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(pid, error = %errno, "killpg failed");
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(err) = child.kill().await {
        debug!(error = %err, "Child already exited");
    }
}

fn encode_stream(bytes: Vec<u8>, want_base64: bool) -> String {
    if want_base64 {
        return base64::engine::general_purpose::STANDARD.encode(&bytes);
    }

    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    if text.ends_with('\n') {
        text.pop();
    }
    text
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::tools::identity::{Identity, IdentityError};
    use std::path::Path;

    fn config() -> SecurityConfig {
        SecurityConfig {
            working_directory: None,
            ..Default::default()
        }
    }

    fn executor(config: SecurityConfig) -> CommandExecutor {
        CommandExecutor::new(Arc::new(config), AuditLog::disabled())
    }

    fn pid_alive(pid: i32) -> bool {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
    }

    #[derive(Debug)]
    struct MissingUsers;

    impl IdentityResolver for MissingUsers {
        fn resolve(&self, user: &str) -> Result<Identity, IdentityError> {
            Err(IdentityError::UnknownUser(user.to_string()))
        }
    }

    #[tokio::test]
    async fn test_execute_echo_text() {
        let result = executor(config())
            .execute(&CancellationToken::new(), "echo hello world", false)
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hello world");
        assert_eq!(result.stderr, "");
        assert_eq!(result.command, "echo hello world");

        let info = result.security_info.unwrap();
        assert!(info.timeout_applied);
        assert!(!info.security_enabled);
        assert!(info.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_execute_echo_base64() {
        let result = executor(config())
            .execute(&CancellationToken::new(), "echo hello world", true)
            .await
            .unwrap();

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&result.stdout)
            .unwrap();
        assert_eq!(decoded, b"hello world\n");
        assert_eq!(result.stderr, "");
    }

    #[tokio::test]
    async fn test_legacy_mode_uses_shell() {
        let result = executor(SecurityConfig {
            use_shell_execution: true,
            ..config()
        })
        .execute(&CancellationToken::new(), "echo $((1 + 2)) | tr 3 x", false)
        .await
        .unwrap();

        assert_eq!(result.stdout, "x");
    }

    #[tokio::test]
    async fn test_legacy_mode_echo_round_trip() {
        let legacy = executor(SecurityConfig {
            use_shell_execution: true,
            ..config()
        });

        let text = legacy
            .execute(&CancellationToken::new(), "echo hello world", false)
            .await
            .unwrap();
        assert_eq!(text.status, ExecutionStatus::Success);
        assert_eq!(text.exit_code, 0);
        assert_eq!(text.stdout, "hello world");

        let encoded = legacy
            .execute(&CancellationToken::new(), "echo hello world", true)
            .await
            .unwrap();
        assert_eq!(encoded.status, ExecutionStatus::Success);
        assert_eq!(encoded.exit_code, 0);
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&encoded.stdout)
            .unwrap();
        assert_eq!(decoded, b"hello world\n");
    }

    #[tokio::test]
    async fn test_relative_program_is_not_resolved_in_working_directory() {
        use std::os::unix::fs::PermissionsExt;

        let workdir = tempfile::tempdir().unwrap();
        let planted = workdir.path().join("mcp-shell-planted").join("echo");
        std::fs::create_dir_all(planted.parent().unwrap()).unwrap();
        std::fs::write(&planted, "#!/bin/sh\necho planted\n").unwrap();
        std::fs::set_permissions(&planted, std::fs::Permissions::from_mode(0o755)).unwrap();

        let result = executor(SecurityConfig {
            working_directory: Some(workdir.path().display().to_string()),
            ..config()
        })
        .execute(&CancellationToken::new(), "mcp-shell-planted/echo hello", false)
        .await
        .unwrap();

        // Resolved against the server cwd, where no such program exists
        assert_ne!(result.stdout, "planted");
        assert_eq!(result.exit_code, -1);
    }

    #[tokio::test]
    async fn test_secure_mode_passes_tokens_literally() {
        let result = executor(config())
            .execute(&CancellationToken::new(), "echo '*' \"quoted\"", false)
            .await
            .unwrap();

        // No shell, so quotes are ordinary characters
        assert_eq!(result.stdout, "'*' \"quoted\"");
    }

    #[tokio::test]
    async fn test_secure_mode_rejects_unparseable_command() {
        let err = executor(config())
            .execute(&CancellationToken::new(), "echo $(whoami)", false)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Parse(_)));
        assert!(err.to_string().starts_with("command parsing failed"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_a_result() {
        let result = executor(config())
            .execute(&CancellationToken::new(), "false", false)
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_stderr_is_captured() {
        let result = executor(SecurityConfig {
            use_shell_execution: true,
            ..config()
        })
        .execute(&CancellationToken::new(), "echo oops >&2; exit 3", false)
        .await
        .unwrap();

        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr, "oops");
        assert_eq!(result.stdout, "");
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let result = executor(config())
            .execute(&CancellationToken::new(), "no-such-binary-mcp-shell-12345", false)
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.exit_code, -1);
        assert!(!result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_signal_termination_reports_minus_one() {
        let result = executor(SecurityConfig {
            use_shell_execution: true,
            ..config()
        })
        .execute(&CancellationToken::new(), "kill -9 $$", false)
        .await
        .unwrap();

        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.exit_code, -1);
    }

    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let command = format!("echo $$ > {}; sleep 30", pid_file.display());

        let start = Instant::now();
        let err = executor(SecurityConfig {
            use_shell_execution: true,
            max_execution_time: Duration::from_millis(500),
            ..config()
        })
        .execute(&CancellationToken::new(), &command, false)
        .await
        .unwrap_err();

        assert!(matches!(err, ExecutionError::Timeout(d) if d == Duration::from_millis(500)));
        assert!(start.elapsed() < Duration::from_secs(10));

        let pid: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(!pid_alive(pid), "shell {} survived the timeout", pid);
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = executor(config())
            .execute(&token, "sleep 30", false)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_output_limit_boundary() {
        let limited = |max| {
            executor(SecurityConfig {
                max_output_size: max,
                ..config()
            })
        };

        // "echo abcd" writes five bytes including the newline
        let result = limited(5)
            .execute(&CancellationToken::new(), "echo abcd", false)
            .await
            .unwrap();
        assert_eq!(result.stdout, "abcd");

        let err = limited(4)
            .execute(&CancellationToken::new(), "echo abcd", false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::OutputLimit { stream: "stdout", size: 5, limit: 4 }
        ));
        assert!(err.to_string().contains("stdout exceeds maximum size limit"));
    }

    #[tokio::test]
    async fn test_output_limit_zero_is_unlimited() {
        let result = executor(SecurityConfig {
            max_output_size: 0,
            ..config()
        })
        .execute(&CancellationToken::new(), "seq 100000", false)
        .await
        .unwrap();
        assert!(result.stdout.len() > 100_000);
    }

    #[tokio::test]
    async fn test_stderr_limit() {
        let err = executor(SecurityConfig {
            use_shell_execution: true,
            max_output_size: 3,
            ..config()
        })
        .execute(&CancellationToken::new(), "echo toolong >&2", false)
        .await
        .unwrap_err();
        assert!(matches!(err, ExecutionError::OutputLimit { stream: "stderr", .. }));
    }

    #[tokio::test]
    async fn test_working_directory_is_created_and_used() {
        let root = tempfile::tempdir().unwrap();
        let workdir = root.path().join("nested").join("workspace");

        let result = executor(SecurityConfig {
            working_directory: Some(workdir.display().to_string()),
            ..config()
        })
        .execute(&CancellationToken::new(), "pwd", false)
        .await
        .unwrap();

        assert!(workdir.is_dir());
        assert_eq!(
            Path::new(&result.stdout).canonicalize().unwrap(),
            workdir.canonicalize().unwrap()
        );
        let info = result.security_info.unwrap();
        assert_eq!(info.working_dir, Some(workdir.display().to_string()));
        assert!(info.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_working_directory_fallback_warns() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let blocked = file.path().join("sub");

        let result = executor(SecurityConfig {
            working_directory: Some(blocked.display().to_string()),
            ..config()
        })
        .execute(&CancellationToken::new(), "echo still runs", false)
        .await
        .unwrap();

        assert_eq!(result.stdout, "still runs");
        let info = result.security_info.unwrap();
        assert_eq!(info.warnings.len(), 1);
        assert!(info.warnings[0].contains("working directory"));
    }

    #[tokio::test]
    async fn test_run_as_user_fallback_warns() {
        let result = executor(SecurityConfig {
            run_as_user: Some("ghost".to_string()),
            ..config()
        })
        .with_identity_resolver(Arc::new(MissingUsers))
        .execute(&CancellationToken::new(), "echo hi", false)
        .await
        .unwrap();

        assert_eq!(result.stdout, "hi");
        let info = result.security_info.unwrap();
        assert_eq!(info.run_as_user.as_deref(), Some("ghost"));
        assert!(info.warnings[0].contains("user 'ghost' not found"));
    }

    #[test]
    fn test_encode_stream_trims_one_newline() {
        assert_eq!(encode_stream(b"a\n\n".to_vec(), false), "a\n");
        assert_eq!(encode_stream(b"a".to_vec(), false), "a");
        assert_eq!(encode_stream(b"a\n".to_vec(), true), "YQo=");
    }

    #[test]
    fn test_result_serialization() {
        let result = ExecutionResult {
            status: ExecutionStatus::Error,
            exit_code: 2,
            stdout: String::new(),
            stderr: "bad".to_string(),
            command: "ls /nope".to_string(),
            execution_time: Duration::from_millis(12),
            security_info: Some(SecurityInfo {
                security_enabled: true,
                working_dir: None,
                run_as_user: None,
                timeout_applied: true,
                warnings: Vec::new(),
            }),
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["exit_code"], 2);
        assert_eq!(json["execution_time"], "12ms");
        assert_eq!(json["security_info"]["timeout_applied"], true);
        assert!(json["security_info"].get("working_dir").is_none());
        assert!(json["security_info"].get("warnings").is_none());
    }
}
