//! Session lifecycle: acquisition, release, optional pooling.
//!
//! The provisioner owns every session it hands out; the orchestrator only
//! borrows one for the duration of a test. Acquisition failures surface to
//! the caller un-retried — retry policy is caller-supplied and belongs to
//! the retry coordinator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use verity_common::error::ProvisionError;
use verity_common::protocol::{BrowserType, Resolution, SessionRequest, SessionStatus};

use crate::driver::{ContainerHandle, Driver, DriverLauncher, Grid};

/// One live browser session. Owned by the provisioner, borrowed by the
/// orchestrator while a test runs against it.
pub struct Session {
    id: String,
    requested_browser: BrowserType,
    actual_browser: BrowserType,
    resolution: Resolution,
    status: SessionStatus,
    created_at: Instant,
    recording: bool,
    request: SessionRequest,
    container: Option<ContainerHandle>,
    driver: Box<dyn Driver>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Browser type the caller asked for.
    pub fn requested_browser(&self) -> BrowserType {
        self.requested_browser
    }

    /// Engine actually provisioned; differs from the request when the
    /// grid remapped it.
    pub fn actual_browser(&self) -> BrowserType {
        self.actual_browser
    }

    pub fn was_remapped(&self) -> bool {
        self.requested_browser != self.actual_browser
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn driver_mut(&mut self) -> &mut dyn Driver {
        self.driver.as_mut()
    }

    pub fn mark_in_use(&mut self) {
        self.status = SessionStatus::InUse;
    }

    /// Flag the session as unknown-state; it will never be pooled again.
    pub fn mark_failed(&mut self) {
        self.status = SessionStatus::Failed;
    }

    /// Note that the running recording was finalized (or discarded).
    pub fn mark_recording_stopped(&mut self) {
        self.recording = false;
    }

    fn matches(&self, request: &SessionRequest) -> bool {
        self.request == *request
    }
}

/// Provisioner knobs, sourced from configuration.
#[derive(Debug, Clone)]
pub struct ProvisionerOptions {
    /// Deadline for producing a ready session, local or grid.
    pub acquire_timeout: Duration,
    /// Start video recording at acquisition so failures have full tape.
    pub record_video: bool,
    /// Reuse warmed sessions across sequential tests of identical config.
    pub pooling: bool,
}

impl Default for ProvisionerOptions {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(30),
            record_video: false,
            pooling: false,
        }
    }
}

/// Acquires and releases browser sessions, local or grid-provisioned.
pub struct SessionProvisioner {
    launcher: Arc<dyn DriverLauncher>,
    grid: Option<Arc<dyn Grid>>,
    options: ProvisionerOptions,
    next_id: AtomicU64,
    pool: Mutex<Vec<Session>>,
}

impl SessionProvisioner {
    pub fn new(
        launcher: Arc<dyn DriverLauncher>,
        grid: Option<Arc<dyn Grid>>,
        options: ProvisionerOptions,
    ) -> Self {
        Self {
            launcher,
            grid,
            options,
            next_id: AtomicU64::new(1),
            pool: Mutex::new(Vec::new()),
        }
    }

    /// Concurrent session capacity, when the grid reports one.
    pub async fn capacity(&self) -> Option<usize> {
        match &self.grid {
            Some(grid) => grid.capacity().await,
            None => None,
        }
    }

    /// Acquire a session for `request`, reusing a pooled one when allowed.
    pub async fn acquire(&self, request: &SessionRequest) -> Result<Session, ProvisionError> {
        if self.options.pooling
            && let Some(mut pooled) = self.checkout(request)
        {
            debug!(session = pooled.id(), "reusing pooled session");
            pooled.status = SessionStatus::Ready;
            // Recording runs per test; re-arm it for the reused session.
            if self.options.record_video && !pooled.recording {
                match pooled.driver.start_recording().await {
                    Ok(()) => pooled.recording = true,
                    Err(error) => {
                        warn!(session = pooled.id(), %error, "video recording unavailable");
                    }
                }
            }
            return Ok(pooled);
        }

        tokio::time::timeout(self.options.acquire_timeout, self.provision(request))
            .await
            .map_err(|_| ProvisionError::Timeout(self.options.acquire_timeout))?
    }

    async fn provision(&self, request: &SessionRequest) -> Result<Session, ProvisionError> {
        let id = format!("s-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let requested_browser = request.browser;

        // The grid has no native WebKit support; remap to chromium before
        // dispatch and keep both types visible in the session metadata.
        let mut dispatch = request.clone();
        let actual_browser = if request.is_remote() && requested_browser == BrowserType::Webkit {
            warn!(
                session = %id,
                "grid has no webkit support, remapping request to chromium"
            );
            dispatch.browser = BrowserType::Chromium;
            BrowserType::Chromium
        } else {
            requested_browser
        };

        debug!(session = %id, browser = %actual_browser, remote = request.is_remote(), "provisioning");

        let (driver, container) = match (&self.grid, &dispatch.grid_endpoint) {
            (Some(grid), Some(_)) => {
                let container = grid.request_container(&dispatch).await?;
                let driver = self.launcher.connect(&container, &dispatch).await?;
                (driver, Some(container))
            }
            _ => (self.launcher.launch(&dispatch).await?, None),
        };

        let mut session = Session {
            id,
            requested_browser,
            actual_browser,
            resolution: request.resolution,
            status: SessionStatus::Provisioning,
            created_at: Instant::now(),
            recording: false,
            request: request.clone(),
            container,
            driver,
        };

        if self.options.record_video {
            match session.driver.start_recording().await {
                Ok(()) => session.recording = true,
                Err(error) => {
                    warn!(session = session.id(), %error, "video recording unavailable");
                }
            }
        }

        session.status = SessionStatus::Ready;
        info!(
            session = session.id(),
            browser = %session.actual_browser(),
            "session ready"
        );
        Ok(session)
    }

    /// Close a session and free its grid container. Idempotent: releasing
    /// an already-Closed session is a no-op.
    pub async fn release(&self, session: &mut Session) -> Result<(), ProvisionError> {
        if session.status == SessionStatus::Closed {
            debug!(session = session.id(), "release on closed session, no-op");
            return Ok(());
        }

        session.status = SessionStatus::Releasing;
        if let Err(error) = session.driver.close().await {
            warn!(session = session.id(), %error, "driver close failed during release");
        }

        if let Some(container) = session.container.take()
            && let Some(grid) = &self.grid
            && let Err(error) = grid.release_container(container).await
        {
            warn!(session = session.id(), %error, "container release failed");
        }

        session.status = SessionStatus::Closed;
        debug!(session = session.id(), "session closed");
        Ok(())
    }

    /// Return a healthy session to the pool for reuse, resetting it to a
    /// clean browsing context first. Anything that cannot be reset (or
    /// that pooling is disabled for) is released instead.
    pub async fn checkin(&self, mut session: Session) -> Result<(), ProvisionError> {
        if !self.options.pooling || session.status == SessionStatus::Failed {
            return self.release(&mut session).await;
        }

        match session.driver.reset().await {
            Ok(()) => {
                session.status = SessionStatus::Ready;
                debug!(session = session.id(), "session reset and pooled");
                self.pool
                    .lock()
                    .expect("session pool lock poisoned")
                    .push(session);
                Ok(())
            }
            Err(error) => {
                warn!(session = session.id(), %error, "reset failed, releasing instead of pooling");
                self.release(&mut session).await
            }
        }
    }

    /// Close every pooled session. Called once at orchestrator shutdown.
    pub async fn shutdown(&self) {
        let pooled: Vec<Session> = self
            .pool
            .lock()
            .expect("session pool lock poisoned")
            .drain(..)
            .collect();
        for mut session in pooled {
            if let Err(error) = self.release(&mut session).await {
                warn!(session = session.id(), %error, "release failed during shutdown");
            }
        }
    }

    fn checkout(&self, request: &SessionRequest) -> Option<Session> {
        let mut pool = self.pool.lock().expect("session pool lock poisoned");
        let index = pool.iter().position(|session| session.matches(request))?;
        Some(pool.swap_remove(index))
    }
}
