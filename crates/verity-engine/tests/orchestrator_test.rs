use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

use verity_common::error::{DriverError, ProvisionError, TestError};
use verity_common::locator::{LocatorSpec, StrategyKind};
use verity_common::protocol::{
    ActionOutput, BrowserType, ElementAction, ElementHandle, SessionRequest, SessionStatus,
    TestStatus,
};
use verity_engine::config::NavigationWait;
use verity_engine::driver::{ContainerHandle, Driver, DriverLauncher, Grid};
use verity_engine::orchestrator::{Orchestrator, RunOptions, TestCase};
use verity_engine::retry::RetryPolicy;
use verity_engine::session::{ProvisionerOptions, SessionProvisioner};
use verity_engine::wait::WaitDefaults;

#[derive(Default)]
struct Telemetry {
    launches: AtomicUsize,
    connects: AtomicUsize,
    closes: AtomicUsize,
    resets: AtomicUsize,
    containers_released: AtomicUsize,
    connected_browser: Mutex<Option<BrowserType>>,
}

#[derive(Clone, Copy)]
enum Behavior {
    Healthy,
    /// First N actions fail with a network error, then succeed.
    NetworkFlaky(u32),
    /// Every action hangs far past any test deadline.
    SlowAction,
    /// Screenshot capture is broken.
    ScreenshotBroken,
}

struct MockDriver {
    telemetry: Arc<Telemetry>,
    behavior: Behavior,
    failures_left: u32,
}

impl MockDriver {
    fn new(telemetry: Arc<Telemetry>, behavior: Behavior) -> Self {
        let failures_left = match behavior {
            Behavior::NetworkFlaky(failures) => failures,
            _ => 0,
        };
        Self {
            telemetry,
            behavior,
            failures_left,
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn query(
        &mut self,
        strategy: StrategyKind,
        value: &str,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        Ok(vec![ElementHandle {
            id: 1,
            strategy,
            selector: value.to_string(),
        }])
    }

    async fn act(
        &mut self,
        _target: &ElementHandle,
        _action: &ElementAction,
    ) -> Result<ActionOutput, DriverError> {
        match self.behavior {
            Behavior::NetworkFlaky(_) if self.failures_left > 0 => {
                self.failures_left -= 1;
                Err(DriverError::Network("connection reset by grid".into()))
            }
            Behavior::SlowAction => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(ActionOutput::Done)
            }
            _ => Ok(ActionOutput::Done),
        }
    }

    async fn navigate(&mut self, _url: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, DriverError> {
        match self.behavior {
            Behavior::ScreenshotBroken => {
                Err(DriverError::Backend("renderer disconnected".into()))
            }
            _ => Ok(vec![0x89, 0x50, 0x4e, 0x47]),
        }
    }

    async fn network_active_since(
        &mut self,
        _since: std::time::Instant,
    ) -> Result<bool, DriverError> {
        Ok(false)
    }

    async fn animation_active_since(
        &mut self,
        _since: std::time::Instant,
    ) -> Result<bool, DriverError> {
        Ok(false)
    }

    async fn dom_snapshot(&mut self) -> Result<String, DriverError> {
        Ok("<html></html>".into())
    }

    async fn reset(&mut self) -> Result<(), DriverError> {
        self.telemetry.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.telemetry.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockLauncher {
    telemetry: Arc<Telemetry>,
    behavior: Behavior,
}

#[async_trait]
impl DriverLauncher for MockLauncher {
    async fn launch(&self, _request: &SessionRequest) -> Result<Box<dyn Driver>, ProvisionError> {
        self.telemetry.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockDriver::new(
            Arc::clone(&self.telemetry),
            self.behavior,
        )))
    }

    async fn connect(
        &self,
        _container: &ContainerHandle,
        request: &SessionRequest,
    ) -> Result<Box<dyn Driver>, ProvisionError> {
        self.telemetry.connects.fetch_add(1, Ordering::SeqCst);
        *self.telemetry.connected_browser.lock().unwrap() = Some(request.browser);
        Ok(Box::new(MockDriver::new(
            Arc::clone(&self.telemetry),
            self.behavior,
        )))
    }
}

struct RejectingLauncher;

#[async_trait]
impl DriverLauncher for RejectingLauncher {
    async fn launch(&self, _request: &SessionRequest) -> Result<Box<dyn Driver>, ProvisionError> {
        Err(ProvisionError::Rejected("no capacity left".into()))
    }

    async fn connect(
        &self,
        _container: &ContainerHandle,
        _request: &SessionRequest,
    ) -> Result<Box<dyn Driver>, ProvisionError> {
        Err(ProvisionError::Rejected("no capacity left".into()))
    }
}

struct MockGrid {
    telemetry: Arc<Telemetry>,
}

#[async_trait]
impl Grid for MockGrid {
    async fn request_container(
        &self,
        _request: &SessionRequest,
    ) -> Result<ContainerHandle, ProvisionError> {
        Ok(ContainerHandle {
            id: "c-1".into(),
            endpoint: Url::parse("http://grid.invalid:4444/wd/hub").unwrap(),
        })
    }

    async fn release_container(&self, _container: ContainerHandle) -> Result<(), ProvisionError> {
        self.telemetry.containers_released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn capacity(&self) -> Option<usize> {
        Some(2)
    }
}

fn provisioner(
    telemetry: &Arc<Telemetry>,
    behavior: Behavior,
    with_grid: bool,
    pooling: bool,
) -> Arc<SessionProvisioner> {
    let launcher = Arc::new(MockLauncher {
        telemetry: Arc::clone(telemetry),
        behavior,
    });
    let grid: Option<Arc<dyn Grid>> = if with_grid {
        Some(Arc::new(MockGrid {
            telemetry: Arc::clone(telemetry),
        }))
    } else {
        None
    };
    Arc::new(SessionProvisioner::new(
        launcher,
        grid,
        ProvisionerOptions {
            acquire_timeout: Duration::from_secs(5),
            record_video: false,
            pooling,
        },
    ))
}

fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff_base: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        ..RetryPolicy::default()
    }
}

fn run_options() -> RunOptions {
    RunOptions {
        base_url: None,
        test_timeout: Duration::from_secs(60),
        max_workers: 2,
        wait_defaults: WaitDefaults {
            timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(50),
            quiet_window: Duration::from_millis(100),
        },
        navigation_wait: NavigationWait::None,
    }
}

fn local_request() -> SessionRequest {
    SessionRequest::local(BrowserType::Chromium)
}

fn remote_request(browser: BrowserType) -> SessionRequest {
    SessionRequest::remote(browser, Url::parse("http://grid.invalid:4444").unwrap())
}

fn click_case(id: &str) -> TestCase {
    TestCase::new(id, |ctx| {
        Box::pin(async move { ctx.click(&LocatorSpec::css("#go")).await })
    })
}

#[tokio::test]
async fn release_is_idempotent() {
    let telemetry = Arc::new(Telemetry::default());
    let provisioner = provisioner(&telemetry, Behavior::Healthy, false, false);

    let mut session = provisioner.acquire(&local_request()).await.unwrap();
    provisioner.release(&mut session).await.unwrap();
    provisioner.release(&mut session).await.unwrap();

    assert_eq!(session.status(), SessionStatus::Closed);
    assert_eq!(telemetry.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn grid_webkit_request_is_remapped_to_chromium() {
    let telemetry = Arc::new(Telemetry::default());
    let provisioner = provisioner(&telemetry, Behavior::Healthy, true, false);

    let mut session = provisioner
        .acquire(&remote_request(BrowserType::Webkit))
        .await
        .unwrap();

    assert_eq!(session.requested_browser(), BrowserType::Webkit);
    assert_eq!(session.actual_browser(), BrowserType::Chromium);
    assert!(session.was_remapped());
    // The dispatch the grid saw already carried the remapped engine.
    assert_eq!(
        *telemetry.connected_browser.lock().unwrap(),
        Some(BrowserType::Chromium)
    );

    provisioner.release(&mut session).await.unwrap();
    assert_eq!(telemetry.containers_released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn local_webkit_request_is_not_remapped() {
    let telemetry = Arc::new(Telemetry::default());
    let provisioner = provisioner(&telemetry, Behavior::Healthy, false, false);

    let mut session = provisioner
        .acquire(&SessionRequest::local(BrowserType::Webkit))
        .await
        .unwrap();
    assert_eq!(session.actual_browser(), BrowserType::Webkit);
    assert!(!session.was_remapped());
    provisioner.release(&mut session).await.unwrap();
}

#[tokio::test]
async fn passing_test_carries_no_artifacts() {
    let telemetry = Arc::new(Telemetry::default());
    let provisioner = provisioner(&telemetry, Behavior::Healthy, false, false);
    let orchestrator = Orchestrator::new(provisioner, local_request(), quick_policy(), run_options());

    let outcome = orchestrator.run_one(click_case("passes")).await;

    assert_eq!(outcome.status, TestStatus::Passed);
    assert_eq!(outcome.attempts_used, 1);
    assert!(outcome.artifacts.is_none());
    assert!(outcome.error.is_none());
    assert_eq!(telemetry.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_test_gets_an_artifact_bundle() {
    let telemetry = Arc::new(Telemetry::default());
    let provisioner = provisioner(&telemetry, Behavior::Healthy, false, false);
    let orchestrator = Orchestrator::new(provisioner, local_request(), quick_policy(), run_options());

    let case = TestCase::new("fails", |_ctx| {
        Box::pin(async move { Err(TestError::Assertion("title mismatch".into())) })
    });
    let outcome = orchestrator.run_one(case).await;

    assert_eq!(outcome.status, TestStatus::Failed);
    let error = outcome.error.as_deref().unwrap();
    assert!(error.starts_with("assertion"));

    let bundle = outcome.artifacts.as_ref().unwrap();
    assert!(bundle.screenshot.is_some());
    assert!(bundle.dom_snapshot.is_some());
    assert!(!bundle.log_lines.is_empty());
    assert_eq!(telemetry.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn network_flaky_action_passing_on_third_attempt_grades_flaky() {
    let telemetry = Arc::new(Telemetry::default());
    let provisioner = provisioner(&telemetry, Behavior::NetworkFlaky(2), false, false);
    let orchestrator = Orchestrator::new(provisioner, local_request(), quick_policy(), run_options());

    let outcome = orchestrator.run_one(click_case("flaky-click")).await;

    assert_eq!(outcome.status, TestStatus::Flaky);
    assert_eq!(outcome.attempts_used, 3);
    // Flaky is still a pass: no artifact bundle.
    assert!(outcome.artifacts.is_none());
    assert!(outcome.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_with_the_last_error_preserved() {
    let telemetry = Arc::new(Telemetry::default());
    let provisioner = provisioner(&telemetry, Behavior::NetworkFlaky(10), false, false);
    let orchestrator = Orchestrator::new(provisioner, local_request(), quick_policy(), run_options());

    let outcome = orchestrator.run_one(click_case("always-flaky")).await;

    assert_eq!(outcome.status, TestStatus::Failed);
    assert_eq!(outcome.attempts_used, 3);
    let error = outcome.error.as_deref().unwrap();
    assert!(error.starts_with("retries_exhausted"));
    assert!(error.contains("3 attempts"));
    assert!(outcome.artifacts.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_fails_with_timeout_and_never_pools_the_session() {
    let telemetry = Arc::new(Telemetry::default());
    let provisioner = provisioner(&telemetry, Behavior::SlowAction, false, true);
    let mut options = run_options();
    options.test_timeout = Duration::from_secs(1);
    let orchestrator = Orchestrator::new(provisioner, local_request(), quick_policy(), options);

    let outcome = orchestrator.run_one(click_case("hangs")).await;

    assert_eq!(outcome.status, TestStatus::Failed);
    let error = outcome.error.as_deref().unwrap();
    assert!(error.starts_with("test_timeout"));
    // The abandoned session was released, not parked for reuse.
    assert_eq!(telemetry.closes.load(Ordering::SeqCst), 1);
    assert_eq!(telemetry.resets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn provisioning_failure_skips_running_and_synthesizes_a_log_bundle() {
    let provisioner = Arc::new(SessionProvisioner::new(
        Arc::new(RejectingLauncher),
        None,
        ProvisionerOptions::default(),
    ));
    let orchestrator = Orchestrator::new(provisioner, local_request(), quick_policy(), run_options());

    let outcome = orchestrator.run_one(click_case("never-runs")).await;

    assert_eq!(outcome.status, TestStatus::Failed);
    let error = outcome.error.as_deref().unwrap();
    assert!(error.starts_with("provision_rejected"));

    let bundle = outcome.artifacts.as_ref().unwrap();
    assert!(bundle.screenshot.is_none());
    assert!(bundle.video.is_none());
    assert!(
        bundle
            .log_lines
            .iter()
            .any(|line| line.contains("provisioning failed"))
    );
}

#[tokio::test]
async fn capture_degrades_instead_of_masking_the_test_failure() {
    let telemetry = Arc::new(Telemetry::default());
    let provisioner = provisioner(&telemetry, Behavior::ScreenshotBroken, false, false);
    let orchestrator = Orchestrator::new(provisioner, local_request(), quick_policy(), run_options());

    let case = TestCase::new("fails-and-capture-breaks", |_ctx| {
        Box::pin(async move { Err(TestError::Assertion("boom".into())) })
    });
    let outcome = orchestrator.run_one(case).await;

    assert_eq!(outcome.status, TestStatus::Failed);
    // The reported error is still the assertion, not the capture failure.
    assert!(outcome.error.as_deref().unwrap().starts_with("assertion"));

    let bundle = outcome.artifacts.as_ref().unwrap();
    assert!(bundle.screenshot.is_none());
    assert!(bundle.warnings.iter().any(|w| w.contains("screenshot")));
}

#[tokio::test]
async fn pooling_reuses_a_warmed_session_across_sequential_tests() {
    let telemetry = Arc::new(Telemetry::default());
    let provisioner = provisioner(&telemetry, Behavior::Healthy, false, true);
    let mut options = run_options();
    options.max_workers = 1;
    let orchestrator = Orchestrator::new(provisioner, local_request(), quick_policy(), options);

    let outcomes = orchestrator
        .run_suite(vec![click_case("first"), click_case("second")])
        .await;

    assert!(outcomes.iter().all(|o| o.status == TestStatus::Passed));
    assert_eq!(telemetry.launches.load(Ordering::SeqCst), 1);
    assert!(telemetry.resets.load(Ordering::SeqCst) >= 1);
    // Suite shutdown closed the pooled session.
    assert_eq!(telemetry.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn skipped_tests_never_touch_the_provisioner() {
    let telemetry = Arc::new(Telemetry::default());
    let provisioner = provisioner(&telemetry, Behavior::Healthy, false, false);
    let orchestrator = Orchestrator::new(provisioner, local_request(), quick_policy(), run_options());

    let outcomes = orchestrator
        .run_suite(vec![TestCase::skipped("later")])
        .await;

    assert_eq!(outcomes[0].status, TestStatus::Skipped);
    assert!(outcomes[0].artifacts.is_none());
    assert_eq!(telemetry.launches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn outcomes_preserve_suite_order() {
    let telemetry = Arc::new(Telemetry::default());
    let provisioner = provisioner(&telemetry, Behavior::Healthy, false, false);
    let orchestrator = Orchestrator::new(provisioner, local_request(), quick_policy(), run_options());

    let outcomes = orchestrator
        .run_suite(vec![click_case("a"), click_case("b"), click_case("c")])
        .await;

    let ids: Vec<&str> = outcomes.iter().map(|o| o.test_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}
