//! Error taxonomy for the orchestration engine.
//!
//! Classification lives here so that retryable-vs-fatal is a visible,
//! testable decision (`TestError::is_transient`) rather than scattered
//! control flow.

use std::time::Duration;
use thiserror::Error;

use crate::locator::StrategyKind;

/// Errors surfaced by a driver backend.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("network error: {0}")]
    Network(String),

    #[error("driver not ready")]
    NotReady,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors from session acquisition, local or grid.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("no ready container within {0:?}")]
    Timeout(Duration),

    #[error("grid rejected the request: {0}")]
    Rejected(String),

    #[error("failed to launch local browser: {0}")]
    Launch(String),
}

/// Match counts per strategy, reported when resolution exhausts all
/// candidates without a unique match.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchCounts(pub Vec<(StrategyKind, usize)>);

impl std::fmt::Display for MatchCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (kind, count) in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", kind, count)?;
            first = false;
        }
        Ok(())
    }
}

/// Terminal error taxonomy the orchestrator reasons about.
#[derive(Debug, Error)]
pub enum TestError {
    #[error("no unique match for {target} (matches per strategy: {counts})")]
    AmbiguousOrMissing { target: String, counts: MatchCounts },

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("wait for {condition} timed out after {elapsed:?}")]
    WaitTimeout {
        condition: String,
        elapsed: Duration,
    },

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<TestError> },

    #[error("test deadline exceeded after {elapsed:?}")]
    TestTimeout { elapsed: Duration },

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl TestError {
    /// Default retry classifier: transient environment errors are worth
    /// another attempt, everything that points at the page or the test
    /// itself is not.
    pub fn is_transient(&self) -> bool {
        match self {
            TestError::WaitTimeout { .. } => true,
            TestError::Driver(DriverError::Network(_)) => true,
            TestError::Driver(DriverError::NotReady) => true,
            TestError::Driver(DriverError::Backend(_)) => true,
            TestError::Driver(DriverError::Protocol(_)) => false,
            TestError::Driver(DriverError::NotSupported(_)) => false,
            TestError::AmbiguousOrMissing { .. } => false,
            TestError::Assertion(_) => false,
            TestError::Provision(_) => false,
            TestError::RetriesExhausted { .. } => false,
            TestError::TestTimeout { .. } => false,
        }
    }

    /// Stable short tag for outcome summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            TestError::AmbiguousOrMissing { .. } => "ambiguous_or_missing_element",
            TestError::Provision(ProvisionError::Timeout(_)) => "provision_timeout",
            TestError::Provision(ProvisionError::Rejected(_)) => "provision_rejected",
            TestError::Provision(ProvisionError::Launch(_)) => "provision_launch",
            TestError::WaitTimeout { .. } => "wait_timeout",
            TestError::RetriesExhausted { .. } => "retries_exhausted",
            TestError::TestTimeout { .. } => "test_timeout",
            TestError::Assertion(_) => "assertion",
            TestError::Driver(_) => "driver",
        }
    }
}
