//! Execution Timeout Management
//!
//! Bounds a child process by wall-clock time and by an external cancellation
//! signal, whichever fires first.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_MAX_EXECUTION_TIME;

/// Why a bounded operation stopped before completing
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("command execution timed out after {0:?}")]
    TimedOut(Duration),

    #[error("command execution was cancelled")]
    Cancelled,
}

/// Execution timeout configuration
///
/// Timeouts are enforced to prevent commands from hanging indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionTimeout {
    duration: Duration,
}

impl Default for ExecutionTimeout {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EXECUTION_TIME)
    }
}

impl ExecutionTimeout {
    /// Create a new execution timeout
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use mcp_shell::tools::ExecutionTimeout;
    ///
    /// let timeout = ExecutionTimeout::new(Duration::from_secs(5));
    /// assert_eq!(timeout.duration(), Duration::from_secs(5));
    /// ```
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Create a timeout for long-running operations (5 minutes)
    pub fn long() -> Self {
        Self::new(Duration::from_secs(300))
    }

    /// Create a timeout for medium operations (30 seconds, default)
    pub fn medium() -> Self {
        Self::default()
    }

    /// Create a timeout for quick operations (10 seconds)
    pub fn short() -> Self {
        Self::new(Duration::from_secs(10))
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Drive `future` until it completes, the timeout expires or `cancel` fires
    ///
    /// The future is dropped on interruption; cleanup of anything it was
    /// driving is up to the caller.
    pub async fn run<F, T>(&self, cancel: &CancellationToken, future: F) -> Result<T, Interrupted>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupted::Cancelled),
            result = time::timeout(self.duration, future) => {
                result.map_err(|_| Interrupted::TimedOut(self.duration))
            }
        }
    }
}

/// Deadline and cancellation scope for a single execution
///
/// Derived from the caller's token, so cancelling the caller cancels the
/// scope but cancelling the scope leaves the caller untouched.
#[derive(Debug)]
pub struct ExecutionScope {
    timeout: ExecutionTimeout,
    token: CancellationToken,
    started: Instant,
}

impl ExecutionScope {
    pub fn new(parent: &CancellationToken, timeout: ExecutionTimeout) -> Self {
        Self {
            timeout,
            token: parent.child_token(),
            started: Instant::now(),
        }
    }

    pub fn timeout(&self) -> ExecutionTimeout {
        self.timeout
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.timeout.duration().saturating_sub(self.started.elapsed())
    }

    /// Drive `future` within whatever budget remains in this scope
    pub async fn run<F, T>(&self, future: F) -> Result<T, Interrupted>
    where
        F: Future<Output = T>,
    {
        ExecutionTimeout::new(self.remaining())
            .run(&self.token, future)
            .await
            .map_err(|interrupted| match interrupted {
                Interrupted::TimedOut(_) => Interrupted::TimedOut(self.timeout.duration()),
                Interrupted::Cancelled => Interrupted::Cancelled,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_presets() {
        assert_eq!(ExecutionTimeout::default().duration(), Duration::from_secs(30));
        assert_eq!(ExecutionTimeout::medium().duration(), Duration::from_secs(30));
        assert_eq!(ExecutionTimeout::long().duration(), Duration::from_secs(300));
        assert_eq!(ExecutionTimeout::short().duration(), Duration::from_secs(10));
        assert_eq!(ExecutionTimeout::from_secs(45).duration(), Duration::from_secs(45));
    }

    #[tokio::test]
    async fn test_run_success() {
        let timeout = ExecutionTimeout::short();
        let token = CancellationToken::new();
        let result = timeout.run(&token, async { 42 }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let timeout = ExecutionTimeout::new(Duration::from_millis(50));
        let token = CancellationToken::new();
        let result = timeout
            .run(&token, time::sleep(Duration::from_secs(5)))
            .await;
        assert_eq!(result, Err(Interrupted::TimedOut(Duration::from_millis(50))));
        assert!(result.unwrap_err().to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_run_cancelled() {
        let timeout = ExecutionTimeout::long();
        let token = CancellationToken::new();
        let trigger = token.clone();

        tokio::spawn(async move {
            time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = timeout
            .run(&token, time::sleep(Duration::from_secs(5)))
            .await;
        assert_eq!(result, Err(Interrupted::Cancelled));
    }

    #[tokio::test]
    async fn test_already_cancelled_token_wins() {
        let token = CancellationToken::new();
        token.cancel();
        let result = ExecutionTimeout::short().run(&token, async { 1 }).await;
        assert_eq!(result, Err(Interrupted::Cancelled));
    }

    #[tokio::test]
    async fn test_scope_reports_full_timeout() {
        let parent = CancellationToken::new();
        let scope = ExecutionScope::new(&parent, ExecutionTimeout::new(Duration::from_millis(40)));
        assert!(scope.remaining() <= Duration::from_millis(40));

        let result = scope.run(time::sleep(Duration::from_secs(5))).await;
        assert_eq!(result, Err(Interrupted::TimedOut(Duration::from_millis(40))));
        assert_eq!(scope.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_scope_follows_parent_cancellation() {
        let parent = CancellationToken::new();
        let scope = ExecutionScope::new(&parent, ExecutionTimeout::long());
        parent.cancel();
        assert!(scope.token().is_cancelled());
        assert_eq!(scope.run(async { 7 }).await, Err(Interrupted::Cancelled));
    }

    #[tokio::test]
    async fn test_scope_cancellation_does_not_reach_parent() {
        let parent = CancellationToken::new();
        let scope = ExecutionScope::new(&parent, ExecutionTimeout::short());
        scope.token().cancel();
        assert!(!parent.is_cancelled());
    }
}
