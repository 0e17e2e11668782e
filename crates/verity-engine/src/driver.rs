//! Driver, grid and launcher capability boundaries.
//!
//! The engine never talks to a concrete automation protocol; it consumes
//! these traits. Backends (see `verity-wd`) implement them.

use async_trait::async_trait;
use std::time::Instant;
use url::Url;

use verity_common::error::{DriverError, ProvisionError};
use verity_common::locator::StrategyKind;
use verity_common::protocol::{ActionOutput, ElementAction, ElementHandle, SessionRequest};

/// Abstract browser capability the engine orchestrates.
///
/// Optional capabilities (recording, DOM snapshots) default to
/// `NotSupported`; the capture pipeline degrades gracefully around them.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Query the live page for elements matching one strategy candidate.
    async fn query(
        &mut self,
        strategy: StrategyKind,
        value: &str,
    ) -> Result<Vec<ElementHandle>, DriverError>;

    /// Perform an action against a previously resolved element.
    async fn act(
        &mut self,
        target: &ElementHandle,
        action: &ElementAction,
    ) -> Result<ActionOutput, DriverError>;

    async fn navigate(&mut self, url: &str) -> Result<(), DriverError>;

    /// Capture the current viewport as an image blob.
    async fn screenshot(&mut self) -> Result<Vec<u8>, DriverError>;

    /// True if any network request started after `since`.
    async fn network_active_since(&mut self, since: Instant) -> Result<bool, DriverError>;

    /// True if any animation frame mutation was observed after `since`.
    async fn animation_active_since(&mut self, since: Instant) -> Result<bool, DriverError>;

    async fn start_recording(&mut self) -> Result<(), DriverError> {
        Err(DriverError::NotSupported("start_recording".into()))
    }

    /// Finalize the running recording and return the video blob, if any.
    async fn stop_recording(&mut self) -> Result<Option<Vec<u8>>, DriverError> {
        Err(DriverError::NotSupported("stop_recording".into()))
    }

    async fn dom_snapshot(&mut self) -> Result<String, DriverError> {
        Err(DriverError::NotSupported("dom_snapshot".into()))
    }

    /// Reset to a clean browsing context, preparing the session for reuse.
    async fn reset(&mut self) -> Result<(), DriverError>;

    /// Close the backend and release its resources.
    async fn close(&mut self) -> Result<(), DriverError>;
}

/// A container slot obtained from a browser grid.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub id: String,
    /// WebDriver endpoint the container serves sessions on.
    pub endpoint: Url,
}

/// Remote browser grid boundary (Selenoid-style container farms).
#[async_trait]
pub trait Grid: Send + Sync {
    async fn request_container(
        &self,
        request: &SessionRequest,
    ) -> Result<ContainerHandle, ProvisionError>;

    async fn release_container(&self, container: ContainerHandle) -> Result<(), ProvisionError>;

    /// Number of concurrently available containers, when the grid reports it.
    async fn capacity(&self) -> Option<usize> {
        None
    }
}

/// Creates drivers: launches a local browser or connects to a grid container.
#[async_trait]
pub trait DriverLauncher: Send + Sync {
    async fn launch(&self, request: &SessionRequest) -> Result<Box<dyn Driver>, ProvisionError>;

    async fn connect(
        &self,
        container: &ContainerHandle,
        request: &SessionRequest,
    ) -> Result<Box<dyn Driver>, ProvisionError>;
}
