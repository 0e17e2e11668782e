//! Per-test state machine and bounded suite execution.
//!
//! Each test walks `Pending → Provisioning → Running → {Passed | Failed |
//! Flaky} → Capturing (Failed only) → Releasing → Done`. The session is
//! released on every exit path; artifacts are gathered only on the failure
//! path.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use verity_common::error::TestError;
use verity_common::protocol::{
    FailureArtifactBundle, SessionRequest, TestOutcome, TestStatus,
};

use crate::capture::capture;
use crate::config::NavigationWait;
use crate::context::TestContext;
use crate::retry::RetryPolicy;
use crate::session::SessionProvisioner;
use crate::wait::WaitDefaults;

/// Suite-level knobs, sourced from configuration.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub base_url: Option<Url>,
    /// Whole-test deadline, distinct from per-wait timeouts.
    pub test_timeout: Duration,
    pub max_workers: usize,
    pub wait_defaults: WaitDefaults,
    pub navigation_wait: NavigationWait,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            base_url: None,
            test_timeout: Duration::from_secs(120),
            max_workers: 4,
            wait_defaults: WaitDefaults::default(),
            navigation_wait: NavigationWait::NetworkIdle,
        }
    }
}

pub type TestBody = Arc<
    dyn for<'a> Fn(&'a mut TestContext) -> BoxFuture<'a, Result<(), TestError>> + Send + Sync,
>;

/// One schedulable test: an id and an async body driven through a
/// `TestContext`.
#[derive(Clone)]
pub struct TestCase {
    pub id: String,
    pub skip: bool,
    pub body: TestBody,
}

impl TestCase {
    pub fn new<F>(id: impl Into<String>, body: F) -> Self
    where
        F: for<'a> Fn(&'a mut TestContext) -> BoxFuture<'a, Result<(), TestError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: id.into(),
            skip: false,
            body: Arc::new(body),
        }
    }

    pub fn skipped(id: impl Into<String>) -> Self {
        let mut case = Self::new(id, |_ctx| Box::pin(async { Ok(()) }));
        case.skip = true;
        case
    }
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase")
            .field("id", &self.id)
            .field("skip", &self.skip)
            .field("body", &"<fn>")
            .finish()
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    provisioner: Arc<SessionProvisioner>,
    request: SessionRequest,
    policy: RetryPolicy,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(
        provisioner: Arc<SessionProvisioner>,
        request: SessionRequest,
        policy: RetryPolicy,
        options: RunOptions,
    ) -> Self {
        Self {
            provisioner,
            request,
            policy,
            options,
        }
    }

    /// Run every test across a bounded worker pool and return outcomes in
    /// input order. Pooled sessions are torn down before returning.
    pub async fn run_suite(&self, tests: Vec<TestCase>) -> Vec<TestOutcome> {
        let workers = match self.provisioner.capacity().await {
            Some(grid_capacity) => self.options.max_workers.min(grid_capacity.max(1)),
            None => self.options.max_workers,
        }
        .max(1);
        info!(tests = tests.len(), workers, "starting suite");

        let slots = Arc::new(Semaphore::new(workers));
        let mut handles = Vec::with_capacity(tests.len());
        for test in tests {
            let orchestrator = self.clone();
            let slots = Arc::clone(&slots);
            let test_id = test.id.clone();
            let handle = tokio::spawn(async move {
                let _permit = slots.acquire_owned().await.ok();
                orchestrator.run_one(test).await
            });
            handles.push((test_id, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (test_id, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_error) => {
                    error!(test = %test_id, %join_error, "test worker crashed");
                    outcomes.push(TestOutcome {
                        test_id: test_id.clone(),
                        status: TestStatus::Failed,
                        attempts_used: 0,
                        duration_ms: 0,
                        error: Some(format!("worker crashed: {}", join_error)),
                        artifacts: Some(FailureArtifactBundle::log_only(
                            test_id,
                            vec![format!("worker crashed: {}", join_error)],
                        )),
                    });
                }
            }
        }

        self.provisioner.shutdown().await;
        outcomes
    }

    /// Run a single test through the full state machine.
    pub async fn run_one(&self, test: TestCase) -> TestOutcome {
        if test.skip {
            info!(test = %test.id, "skipped");
            return TestOutcome::skipped(test.id);
        }

        let started = Instant::now();
        let mut log = vec![format!(
            "provisioning {} session ({})",
            self.request.browser,
            if self.request.is_remote() { "grid" } else { "local" }
        )];
        debug!(test = %test.id, "Pending -> Provisioning");

        let mut session = match self.provisioner.acquire(&self.request).await {
            Ok(session) => session,
            Err(provision_error) => {
                // No session to run against: Failed -> Releasing -> Done,
                // with a minimal log-only bundle.
                let error = TestError::from(provision_error);
                warn!(test = %test.id, %error, "provisioning failed");
                log.push(format!("provisioning failed: {}", error));
                return TestOutcome {
                    test_id: test.id.clone(),
                    status: TestStatus::Failed,
                    attempts_used: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error: Some(format!("{}: {}", error.kind(), error)),
                    artifacts: Some(FailureArtifactBundle::log_only(test.id, log)),
                };
            }
        };

        log.push(format!("session {} ready", session.id()));
        if session.was_remapped() {
            log.push(format!(
                "browser remapped: requested={} actual={}",
                session.requested_browser(),
                session.actual_browser()
            ));
        }

        session.mark_in_use();
        debug!(test = %test.id, session = session.id(), "Provisioning -> Running");
        let mut ctx = TestContext::new(
            session,
            self.policy.clone(),
            self.options.wait_defaults,
            self.options.base_url.clone(),
            self.options.navigation_wait,
            log,
        );

        // The deadline wrapper abandons the body at its next suspension
        // point; the context (and the session it owns) survives the drop.
        let body_result = tokio::time::timeout(self.options.test_timeout, (test.body)(&mut ctx)).await;
        let (mut session, mut log, attempts_used) = ctx.into_parts();

        let (status, test_error) = match body_result {
            Err(_deadline) => {
                // State after an abandoned action is unknown; never pool.
                session.mark_failed();
                (
                    TestStatus::Failed,
                    Some(TestError::TestTimeout {
                        elapsed: started.elapsed(),
                    }),
                )
            }
            Ok(Ok(())) => {
                if attempts_used > 1 {
                    (TestStatus::Flaky, None)
                } else {
                    (TestStatus::Passed, None)
                }
            }
            Ok(Err(error)) => (TestStatus::Failed, Some(error)),
        };

        let artifacts = if status == TestStatus::Failed {
            debug!(test = %test.id, "Running -> Capturing");
            if let Some(error) = &test_error {
                log.push(format!("failed: {}", error));
            }
            let is_recording = session.is_recording();
            Some(
                capture(
                    session.driver_mut(),
                    &test.id,
                    log.clone(),
                    is_recording,
                )
                .await,
            )
        } else {
            // Success path: finalize and discard the recording so no
            // artifact or recorder state leaks into the next test.
            if session.is_recording() {
                let _ = session.driver_mut().stop_recording().await;
                session.mark_recording_stopped();
            }
            None
        };

        debug!(test = %test.id, "-> Releasing");
        let release_result = if status == TestStatus::Failed {
            session.mark_failed();
            self.provisioner.release(&mut session).await
        } else {
            self.provisioner.checkin(session).await
        };
        if let Err(release_error) = release_result {
            warn!(test = %test.id, %release_error, "session release failed");
        }

        // An exhausted retry burned its attempts even though the body
        // never reported back; keep the count honest.
        let attempts_used = match &test_error {
            Some(TestError::RetriesExhausted { attempts, .. }) => attempts_used.max(*attempts),
            _ => attempts_used,
        };

        let outcome = TestOutcome {
            test_id: test.id.clone(),
            status,
            attempts_used,
            duration_ms: started.elapsed().as_millis() as u64,
            error: test_error.map(|e| format!("{}: {}", e.kind(), e)),
            artifacts,
        };
        info!(
            test = %test.id,
            status = ?outcome.status,
            attempts = outcome.attempts_used,
            duration_ms = outcome.duration_ms,
            "Done"
        );
        outcome
    }
}
