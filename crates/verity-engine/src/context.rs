//! The façade a test body drives.
//!
//! Every action goes resolve → act under the retry coordinator; waits go
//! through the wait engine. The context records a per-test log (attached
//! to the artifact bundle on failure) and the attempt high-water mark used
//! to grade a passing-but-retried test as flaky.

use async_trait::async_trait;
use tokio::time::Instant;
use url::Url;

use verity_common::error::{DriverError, TestError};
use verity_common::locator::LocatorSpec;
use verity_common::protocol::{ActionOutput, ElementAction, ElementHandle};

use crate::config::NavigationWait;
use crate::driver::Driver;
use crate::resolve::probe_unique;
use crate::retry::{RetryPolicy, with_retry};
use crate::session::Session;
use crate::wait::{WaitCondition, WaitDefaults, WaitPredicate, wait_for};

pub struct TestContext {
    session: Session,
    policy: RetryPolicy,
    defaults: WaitDefaults,
    base_url: Option<Url>,
    navigation_wait: NavigationWait,
    started: Instant,
    log: Vec<String>,
    attempts_peak: u32,
}

impl TestContext {
    pub fn new(
        session: Session,
        policy: RetryPolicy,
        defaults: WaitDefaults,
        base_url: Option<Url>,
        navigation_wait: NavigationWait,
        log: Vec<String>,
    ) -> Self {
        Self {
            session,
            policy,
            defaults,
            base_url,
            navigation_wait,
            started: Instant::now(),
            log,
            attempts_peak: 1,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(session = self.session.id(), "{}", line);
        self.log
            .push(format!("[{:>6}ms] {}", self.started.elapsed().as_millis(), line));
    }

    /// Dismantle the context after the body finished (or was abandoned).
    pub fn into_parts(self) -> (Session, Vec<String>, u32) {
        (self.session, self.log, self.attempts_peak)
    }

    fn note_attempts(&mut self, attempts: u32) {
        self.attempts_peak = self.attempts_peak.max(attempts);
    }

    /// Navigate to `path` (joined against the base URL when one is set)
    /// and apply the configured post-navigation readiness wait.
    pub async fn navigate(&mut self, path: &str) -> Result<(), TestError> {
        let target = match &self.base_url {
            Some(base) => base
                .join(path)
                .map_err(|e| TestError::Assertion(format!("bad navigation target '{}': {}", path, e)))?
                .to_string(),
            None => path.to_string(),
        };
        if target.is_empty() {
            return Err(TestError::Assertion(
                "no navigation target: provide a path or configure a base URL".into(),
            ));
        }

        self.log(format!("navigate to {}", target));
        let defaults = self.defaults;
        let navigation_wait = self.navigation_wait;
        let retried = with_retry(&self.policy, &mut self.session, move |session, _attempt| {
            let target = target.clone();
            Box::pin(async move {
                session.driver_mut().navigate(&target).await?;
                match navigation_wait {
                    NavigationWait::NetworkIdle => {
                        wait_for(
                            session.driver_mut(),
                            &WaitCondition::network_idle(&defaults),
                        )
                        .await
                    }
                    NavigationWait::AnimationsSettled => {
                        wait_for(
                            session.driver_mut(),
                            &WaitCondition::animations_settled(&defaults),
                        )
                        .await
                    }
                    NavigationWait::None => Ok(()),
                }
            })
        })
        .await?;
        self.note_attempts(retried.attempts);
        Ok(())
    }

    /// Resolve a target without acting on it. Resolution polls on its own;
    /// it is not additionally retried.
    pub async fn resolve(&mut self, spec: &LocatorSpec) -> Result<ElementHandle, TestError> {
        crate::resolve::resolve(
            self.session.driver_mut(),
            spec,
            self.defaults.timeout,
            self.defaults.poll_interval,
        )
        .await
    }

    /// Resolve `spec` and perform `action`, retry-wrapped as one unit.
    pub async fn perform(
        &mut self,
        spec: &LocatorSpec,
        action: ElementAction,
    ) -> Result<ActionOutput, TestError> {
        self.log(format!("{} on {}", action.name(), spec));
        let defaults = self.defaults;
        let retried = with_retry(&self.policy, &mut self.session, |session, _attempt| {
            let spec = spec.clone();
            let action = action.clone();
            Box::pin(async move {
                let handle = crate::resolve::resolve(
                    session.driver_mut(),
                    &spec,
                    defaults.timeout,
                    defaults.poll_interval,
                )
                .await?;
                Ok(session.driver_mut().act(&handle, &action).await?)
            })
        })
        .await?;
        self.note_attempts(retried.attempts);
        Ok(retried.value)
    }

    pub async fn click(&mut self, spec: &LocatorSpec) -> Result<(), TestError> {
        self.perform(spec, ElementAction::Click).await.map(|_| ())
    }

    pub async fn double_click(&mut self, spec: &LocatorSpec) -> Result<(), TestError> {
        self.perform(spec, ElementAction::DoubleClick)
            .await
            .map(|_| ())
    }

    pub async fn right_click(&mut self, spec: &LocatorSpec) -> Result<(), TestError> {
        self.perform(spec, ElementAction::RightClick)
            .await
            .map(|_| ())
    }

    pub async fn hover(&mut self, spec: &LocatorSpec) -> Result<(), TestError> {
        self.perform(spec, ElementAction::Hover).await.map(|_| ())
    }

    pub async fn fill(&mut self, spec: &LocatorSpec, text: impl Into<String>) -> Result<(), TestError> {
        self.perform(spec, ElementAction::Fill { text: text.into() })
            .await
            .map(|_| ())
    }

    pub async fn clear(&mut self, spec: &LocatorSpec) -> Result<(), TestError> {
        self.perform(spec, ElementAction::Clear).await.map(|_| ())
    }

    pub async fn press(&mut self, spec: &LocatorSpec, key: impl Into<String>) -> Result<(), TestError> {
        self.perform(spec, ElementAction::Press { key: key.into() })
            .await
            .map(|_| ())
    }

    pub async fn select_option(
        &mut self,
        spec: &LocatorSpec,
        value: impl Into<String>,
    ) -> Result<(), TestError> {
        self.perform(
            spec,
            ElementAction::SelectOption {
                value: value.into(),
            },
        )
        .await
        .map(|_| ())
    }

    pub async fn read_text(&mut self, spec: &LocatorSpec) -> Result<String, TestError> {
        Ok(self
            .perform(spec, ElementAction::ReadText)
            .await?
            .into_text()
            .unwrap_or_default())
    }

    pub async fn read_attribute(
        &mut self,
        spec: &LocatorSpec,
        name: impl Into<String>,
    ) -> Result<Option<String>, TestError> {
        match self
            .perform(spec, ElementAction::ReadAttribute { name: name.into() })
            .await?
        {
            ActionOutput::Attribute(value) => Ok(value),
            other => Ok(other.into_text()),
        }
    }

    pub async fn is_visible(&mut self, spec: &LocatorSpec) -> Result<bool, TestError> {
        Ok(self
            .perform(spec, ElementAction::IsVisible)
            .await?
            .as_flag()
            .unwrap_or(false))
    }

    pub async fn is_enabled(&mut self, spec: &LocatorSpec) -> Result<bool, TestError> {
        Ok(self
            .perform(spec, ElementAction::IsEnabled)
            .await?
            .as_flag()
            .unwrap_or(false))
    }

    pub async fn is_checked(&mut self, spec: &LocatorSpec) -> Result<bool, TestError> {
        Ok(self
            .perform(spec, ElementAction::IsChecked)
            .await?
            .as_flag()
            .unwrap_or(false))
    }

    /// Count matches for the highest-priority strategy that finds any.
    pub async fn count(&mut self, spec: &LocatorSpec) -> Result<usize, TestError> {
        for (strategy, value) in spec.strategies() {
            let matches = self.session.driver_mut().query(*strategy, value).await?;
            if !matches.is_empty() {
                return Ok(matches.len());
            }
        }
        Ok(0)
    }

    pub async fn wait_for(&mut self, condition: &WaitCondition) -> Result<(), TestError> {
        self.log(format!("wait for {}", condition.kind));
        wait_for(self.session.driver_mut(), condition).await
    }

    /// Block until in-flight network activity settles.
    pub async fn wait_until_loaded(&mut self) -> Result<(), TestError> {
        let condition = WaitCondition::network_idle(&self.defaults);
        self.wait_for(&condition).await
    }

    pub async fn wait_animations_settled(&mut self) -> Result<(), TestError> {
        let condition = WaitCondition::animations_settled(&self.defaults);
        self.wait_for(&condition).await
    }

    pub async fn wait_visible(&mut self, spec: &LocatorSpec) -> Result<(), TestError> {
        let condition = WaitCondition::element_visible(spec.clone(), &self.defaults);
        self.wait_for(&condition).await
    }

    pub async fn wait_actionable(&mut self, spec: &LocatorSpec) -> Result<(), TestError> {
        let condition = WaitCondition::element_actionable(spec.clone(), &self.defaults);
        self.wait_for(&condition).await
    }

    pub async fn wait_hidden(&mut self, spec: &LocatorSpec) -> Result<(), TestError> {
        let condition = WaitCondition::custom(
            format!("element-hidden({})", spec),
            std::sync::Arc::new(HiddenPredicate(spec.clone())),
            &self.defaults,
        );
        self.wait_for(&condition).await
    }

    pub async fn expect_visible(&mut self, spec: &LocatorSpec) -> Result<(), TestError> {
        if self.is_visible(spec).await? {
            Ok(())
        } else {
            Err(TestError::Assertion(format!(
                "expected {} to be visible",
                spec
            )))
        }
    }

    /// The element is absent or present-but-invisible.
    pub async fn expect_hidden(&mut self, spec: &LocatorSpec) -> Result<(), TestError> {
        let (resolved, _) = probe_unique(self.session.driver_mut(), spec).await?;
        match resolved {
            None => Ok(()),
            Some(handle) => {
                let visible = self
                    .session
                    .driver_mut()
                    .act(&handle, &ElementAction::IsVisible)
                    .await?
                    .as_flag()
                    .unwrap_or(false);
                if visible {
                    Err(TestError::Assertion(format!(
                        "expected {} to be hidden",
                        spec
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }

    pub async fn expect_text(
        &mut self,
        spec: &LocatorSpec,
        expected: &str,
    ) -> Result<(), TestError> {
        let text = self.read_text(spec).await?;
        if text.contains(expected) {
            Ok(())
        } else {
            Err(TestError::Assertion(format!(
                "expected {} to contain '{}', got '{}'",
                spec, expected, text
            )))
        }
    }

    pub async fn expect_value(
        &mut self,
        spec: &LocatorSpec,
        expected: &str,
    ) -> Result<(), TestError> {
        let value = self
            .perform(spec, ElementAction::ReadValue)
            .await?
            .into_text()
            .unwrap_or_default();
        if value == expected {
            Ok(())
        } else {
            Err(TestError::Assertion(format!(
                "expected {} value '{}', got '{}'",
                spec, expected, value
            )))
        }
    }

    pub async fn expect_attribute(
        &mut self,
        spec: &LocatorSpec,
        name: &str,
        expected: &str,
    ) -> Result<(), TestError> {
        let value = self.read_attribute(spec, name).await?;
        if value.as_deref() == Some(expected) {
            Ok(())
        } else {
            Err(TestError::Assertion(format!(
                "expected {} attribute '{}' = '{}', got {:?}",
                spec, name, expected, value
            )))
        }
    }

    pub async fn expect_count(
        &mut self,
        spec: &LocatorSpec,
        expected: usize,
    ) -> Result<(), TestError> {
        let count = self.count(spec).await?;
        if count == expected {
            Ok(())
        } else {
            Err(TestError::Assertion(format!(
                "expected {} matches for {}, got {}",
                expected, spec, count
            )))
        }
    }
}

struct HiddenPredicate(LocatorSpec);

#[async_trait]
impl WaitPredicate for HiddenPredicate {
    async fn evaluate(&self, driver: &mut dyn Driver) -> Result<bool, DriverError> {
        for (strategy, value) in self.0.strategies() {
            let matches = driver.query(*strategy, value).await?;
            if matches.len() == 1 {
                let visible = driver
                    .act(&matches[0], &ElementAction::IsVisible)
                    .await?
                    .as_flag()
                    .unwrap_or(false);
                return Ok(!visible);
            }
        }
        // No strategy resolved the element: it is gone.
        Ok(true)
    }
}
