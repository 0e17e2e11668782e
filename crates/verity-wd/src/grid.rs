//! Selenoid-compatible grid client.
//!
//! Container acquisition is modeled on the grid's `/status` document: a
//! free slot yields a container handle pointing at the hub, sustained
//! exhaustion with a deep queue is a rejection, and anything else polls
//! until the caller's deadline cancels us.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use verity_common::error::ProvisionError;
use verity_common::protocol::SessionRequest;
use verity_engine::driver::{ContainerHandle, Grid};

#[derive(Debug, Deserialize)]
struct GridStatus {
    total: usize,
    used: usize,
    #[serde(default)]
    queued: usize,
    #[serde(default)]
    pending: usize,
}

pub struct SelenoidGrid {
    endpoint: Url,
    http: reqwest::Client,
    poll_interval: Duration,
    next_container: AtomicU64,
}

impl SelenoidGrid {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            http: reqwest::Client::new(),
            poll_interval: Duration::from_millis(500),
            next_container: AtomicU64::new(1),
        }
    }

    fn status_url(&self) -> Option<Url> {
        self.endpoint.join("status").ok()
    }

    /// WebDriver hub the containers serve sessions on.
    fn hub_url(&self) -> Result<Url, ProvisionError> {
        self.endpoint
            .join("wd/hub")
            .map_err(|e| ProvisionError::Rejected(format!("bad grid endpoint: {}", e)))
    }

    async fn fetch_status(&self) -> Option<GridStatus> {
        let url = self.status_url()?;
        match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                response.json::<GridStatus>().await.ok()
            }
            Ok(response) => {
                debug!(status = %response.status(), "grid status probe failed");
                None
            }
            Err(error) => {
                debug!(%error, "grid unreachable");
                None
            }
        }
    }
}

#[async_trait]
impl Grid for SelenoidGrid {
    /// Poll for a free slot. The loop's sleeps are the cancellation
    /// points: the provisioner's acquire deadline drops this future, so a
    /// still-provisioning request cannot orphan a container.
    async fn request_container(
        &self,
        request: &SessionRequest,
    ) -> Result<ContainerHandle, ProvisionError> {
        loop {
            if let Some(status) = self.fetch_status().await {
                if status.used + status.pending < status.total {
                    let id = format!("c-{}", self.next_container.fetch_add(1, Ordering::SeqCst));
                    debug!(
                        container = %id,
                        browser = %request.browser,
                        used = status.used,
                        total = status.total,
                        "grid slot available"
                    );
                    return Ok(ContainerHandle {
                        id,
                        endpoint: self.hub_url()?,
                    });
                }

                // A queue deeper than the whole grid will not drain within
                // any sane deadline; report exhaustion instead of stalling.
                if status.queued >= status.total.max(1) {
                    return Err(ProvisionError::Rejected(format!(
                        "grid exhausted: {} used of {}, {} queued",
                        status.used, status.total, status.queued
                    )));
                }

                debug!(
                    used = status.used,
                    pending = status.pending,
                    total = status.total,
                    "grid busy, waiting for a slot"
                );
            }

            sleep(self.poll_interval).await;
        }
    }

    async fn release_container(&self, container: ContainerHandle) -> Result<(), ProvisionError> {
        // Selenoid tears the container down when its WebDriver session
        // quits; nothing to do beyond bookkeeping.
        debug!(container = %container.id, "container released");
        Ok(())
    }

    async fn capacity(&self) -> Option<usize> {
        match self.fetch_status().await {
            Some(status) => Some(status.total),
            None => {
                warn!("grid capacity unknown, status endpoint unreachable");
                None
            }
        }
    }
}
