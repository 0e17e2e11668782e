//! Configuration schema.
//!
//! Everything is optional in the file; defaults mirror the recognized
//! option surface (chromium, "latest", fhd, 15s waits, 3 retry attempts,
//! video kept for failures only).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use verity_common::protocol::{BrowserType, Resolution, SessionRequest};

use crate::orchestrator::RunOptions;
use crate::retry::RetryPolicy;
use crate::session::ProvisionerOptions;
use crate::wait::WaitDefaults;

/// Readiness wait applied after navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationWait {
    NetworkIdle,
    AnimationsSettled,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub quiet_window_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            poll_interval_ms: 100,
            quiet_window_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerityConfig {
    /// Base URL tests navigate against.
    pub target: Option<Url>,
    pub browser: BrowserType,
    pub browser_version: String,
    pub resolution: Resolution,
    /// Remote grid endpoint; absence means locally launched browsers.
    pub grid_endpoint: Option<Url>,
    pub wait: WaitConfig,
    pub navigation_wait: NavigationWait,
    pub retry: RetryConfig,
    pub video_on_failure_only: bool,
    pub max_workers: usize,
    pub test_timeout_ms: u64,
    pub provision_timeout_ms: u64,
    pub session_pooling: bool,
    /// Whether flaky outcomes fail the suite or merely annotate it.
    pub flaky_fails_suite: bool,
    pub artifact_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for VerityConfig {
    fn default() -> Self {
        Self {
            target: None,
            browser: BrowserType::Chromium,
            browser_version: "latest".into(),
            resolution: Resolution::Fhd,
            grid_endpoint: None,
            wait: WaitConfig::default(),
            navigation_wait: NavigationWait::NetworkIdle,
            retry: RetryConfig::default(),
            video_on_failure_only: true,
            max_workers: 4,
            test_timeout_ms: 120_000,
            provision_timeout_ms: 30_000,
            session_pooling: false,
            flaky_fails_suite: false,
            artifact_dir: PathBuf::from("artifacts"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl VerityConfig {
    pub fn session_request(&self) -> SessionRequest {
        SessionRequest {
            browser: self.browser,
            browser_version: self.browser_version.clone(),
            resolution: self.resolution,
            grid_endpoint: self.grid_endpoint.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff_base: Duration::from_millis(self.retry.backoff_base_ms),
            backoff_multiplier: self.retry.backoff_multiplier,
            ..RetryPolicy::default()
        }
    }

    pub fn wait_defaults(&self) -> WaitDefaults {
        WaitDefaults {
            timeout: Duration::from_millis(self.wait.timeout_ms),
            poll_interval: Duration::from_millis(self.wait.poll_interval_ms),
            quiet_window: Duration::from_millis(self.wait.quiet_window_ms),
        }
    }

    pub fn provisioner_options(&self) -> ProvisionerOptions {
        ProvisionerOptions {
            acquire_timeout: Duration::from_millis(self.provision_timeout_ms),
            record_video: self.video_on_failure_only,
            pooling: self.session_pooling,
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            base_url: self.target.clone(),
            test_timeout: Duration::from_millis(self.test_timeout_ms),
            max_workers: self.max_workers,
            wait_defaults: self.wait_defaults(),
            navigation_wait: self.navigation_wait,
        }
    }
}
