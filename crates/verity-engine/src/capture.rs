//! Failure artifact capture.
//!
//! Invoked once per failed test, after the body has finished and before
//! the session is released. Capture problems never escalate: losing a
//! screenshot must not mask the real test failure, so each missing
//! artifact degrades the bundle with a warning instead.

use tracing::{debug, warn};

use verity_common::protocol::FailureArtifactBundle;

use crate::driver::Driver;

/// Gather screenshot, video and DOM snapshot for a failed test.
///
/// `recording` says whether video has been rolling since session
/// acquisition; only then is there a segment to finalize.
pub async fn capture(
    driver: &mut dyn Driver,
    test_id: &str,
    log_lines: Vec<String>,
    recording: bool,
) -> FailureArtifactBundle {
    let mut bundle = FailureArtifactBundle::new(test_id, log_lines);

    match driver.screenshot().await {
        Ok(blob) => {
            debug!(test = test_id, bytes = blob.len(), "screenshot captured");
            bundle.screenshot = Some(blob);
        }
        Err(error) => {
            warn!(test = test_id, %error, "screenshot capture failed");
            bundle.degrade("screenshot", error);
        }
    }

    if recording {
        match driver.stop_recording().await {
            Ok(Some(blob)) => {
                debug!(test = test_id, bytes = blob.len(), "video retrieved");
                bundle.video = Some(blob);
            }
            Ok(None) => {
                bundle.degrade("video", "recording finalized without a segment");
            }
            Err(error) => {
                warn!(test = test_id, %error, "video retrieval failed");
                bundle.degrade("video", error);
            }
        }
    }

    match driver.dom_snapshot().await {
        Ok(snapshot) => bundle.dom_snapshot = Some(snapshot),
        Err(error) => {
            debug!(test = test_id, %error, "dom snapshot unavailable");
            bundle.degrade("dom snapshot", error);
        }
    }

    bundle
}
