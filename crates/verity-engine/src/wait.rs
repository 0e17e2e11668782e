//! Condition-based waiting.
//!
//! The wait engine blocks a caller until a named condition holds or a
//! deadline elapses. It never retries the surrounding action; that is the
//! retry coordinator's job. Its sleeps are ordinary timed suspensions, so
//! an enclosing test-deadline future cancels a wait cleanly at the next
//! tick.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::debug;

use verity_common::error::{DriverError, TestError};
use verity_common::locator::LocatorSpec;
use verity_common::protocol::ElementAction;

use crate::driver::Driver;
use crate::resolve::probe_unique;

/// Engine-wide wait knobs, sourced from configuration.
#[derive(Debug, Clone, Copy)]
pub struct WaitDefaults {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub quiet_window: Duration,
}

impl Default for WaitDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(15_000),
            poll_interval: Duration::from_millis(100),
            quiet_window: Duration::from_millis(500),
        }
    }
}

/// User-supplied predicate for `ConditionKind::Custom`.
#[async_trait::async_trait]
pub trait WaitPredicate: Send + Sync {
    async fn evaluate(&self, driver: &mut dyn Driver) -> Result<bool, DriverError>;
}

#[derive(Clone)]
pub enum ConditionKind {
    /// No network request started within the trailing quiet window.
    NetworkIdle { quiet_window: Duration },
    /// No animation frame mutation within the trailing quiet window.
    AnimationsSettled { quiet_window: Duration },
    ElementVisible(LocatorSpec),
    /// Visible and enabled: safe to click or type into.
    ElementActionable(LocatorSpec),
    Custom {
        name: String,
        predicate: Arc<dyn WaitPredicate>,
    },
}

impl std::fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionKind::NetworkIdle { .. } => f.write_str("network-idle"),
            ConditionKind::AnimationsSettled { .. } => f.write_str("animations-settled"),
            ConditionKind::ElementVisible(spec) => write!(f, "element-visible({})", spec),
            ConditionKind::ElementActionable(spec) => write!(f, "element-actionable({})", spec),
            ConditionKind::Custom { name, .. } => write!(f, "custom({})", name),
        }
    }
}

impl std::fmt::Debug for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// A condition plus its deadline parameters.
#[derive(Debug, Clone)]
pub struct WaitCondition {
    pub kind: ConditionKind,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitCondition {
    pub fn new(kind: ConditionKind, defaults: &WaitDefaults) -> Self {
        Self {
            kind,
            timeout: defaults.timeout,
            poll_interval: defaults.poll_interval,
        }
    }

    pub fn network_idle(defaults: &WaitDefaults) -> Self {
        Self::new(
            ConditionKind::NetworkIdle {
                quiet_window: defaults.quiet_window,
            },
            defaults,
        )
    }

    pub fn animations_settled(defaults: &WaitDefaults) -> Self {
        Self::new(
            ConditionKind::AnimationsSettled {
                quiet_window: defaults.quiet_window,
            },
            defaults,
        )
    }

    pub fn element_visible(spec: LocatorSpec, defaults: &WaitDefaults) -> Self {
        Self::new(ConditionKind::ElementVisible(spec), defaults)
    }

    pub fn element_actionable(spec: LocatorSpec, defaults: &WaitDefaults) -> Self {
        Self::new(ConditionKind::ElementActionable(spec), defaults)
    }

    pub fn custom(
        name: impl Into<String>,
        predicate: Arc<dyn WaitPredicate>,
        defaults: &WaitDefaults,
    ) -> Self {
        Self::new(
            ConditionKind::Custom {
                name: name.into(),
                predicate,
            },
            defaults,
        )
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Block until `condition` holds or its timeout elapses.
pub async fn wait_for(
    driver: &mut dyn Driver,
    condition: &WaitCondition,
) -> Result<(), TestError> {
    let started = Instant::now();
    loop {
        if evaluate(driver, &condition.kind, started).await? {
            debug!(condition = %condition.kind, elapsed = ?started.elapsed(), "condition satisfied");
            return Ok(());
        }

        let elapsed = started.elapsed();
        if elapsed >= condition.timeout {
            return Err(TestError::WaitTimeout {
                condition: condition.kind.to_string(),
                elapsed,
            });
        }

        let remaining = condition.timeout - elapsed;
        sleep_tick(condition.poll_interval, remaining).await;
    }
}

/// One poll tick: the configured interval plus a small jitter, capped by
/// the remaining deadline. Jitter keeps a fleet of workers from polling a
/// shared grid in lockstep.
pub async fn sleep_tick(poll_interval: Duration, remaining: Duration) {
    let jitter_ceiling = (poll_interval / 5).max(Duration::from_millis(1));
    let jitter =
        Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ceiling.as_millis() as u64));
    sleep((poll_interval + jitter).min(remaining)).await;
}

async fn evaluate(
    driver: &mut dyn Driver,
    kind: &ConditionKind,
    started: Instant,
) -> Result<bool, TestError> {
    match kind {
        ConditionKind::NetworkIdle { quiet_window } => {
            let since = Instant::now().checked_sub(*quiet_window).unwrap_or(started);
            Ok(!driver.network_active_since(since.into_std()).await?)
        }
        ConditionKind::AnimationsSettled { quiet_window } => {
            let since = Instant::now().checked_sub(*quiet_window).unwrap_or(started);
            Ok(!driver.animation_active_since(since.into_std()).await?)
        }
        ConditionKind::ElementVisible(spec) => element_state(driver, spec, false).await,
        ConditionKind::ElementActionable(spec) => element_state(driver, spec, true).await,
        ConditionKind::Custom { predicate, .. } => Ok(predicate.evaluate(driver).await?),
    }
}

async fn element_state(
    driver: &mut dyn Driver,
    spec: &LocatorSpec,
    require_enabled: bool,
) -> Result<bool, TestError> {
    let Some(handle) = probe_unique(driver, spec).await?.0 else {
        return Ok(false);
    };

    let visible = driver
        .act(&handle, &ElementAction::IsVisible)
        .await?
        .as_flag()
        .unwrap_or(false);
    if !visible {
        return Ok(false);
    }
    if !require_enabled {
        return Ok(true);
    }

    Ok(driver
        .act(&handle, &ElementAction::IsEnabled)
        .await?
        .as_flag()
        .unwrap_or(false))
}
