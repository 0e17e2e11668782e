//! Prioritized selector resolution.
//!
//! Strategies are tried in the locator's declared order on every polling
//! tick. Zero matches moves on to the next strategy; multiple matches is
//! ambiguous for that strategy only and also moves on, since a
//! lower-priority candidate may be more specific in context. The page is
//! re-queried each tick because resolution frequently races page mutation.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use verity_common::error::{MatchCounts, TestError};
use verity_common::locator::LocatorSpec;
use verity_common::protocol::ElementHandle;

use crate::driver::Driver;
use crate::wait::sleep_tick;

/// Resolve `spec` to a unique live element within `timeout`.
pub async fn resolve(
    driver: &mut dyn Driver,
    spec: &LocatorSpec,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<ElementHandle, TestError> {
    let started = Instant::now();
    loop {
        let (resolved, counts) = probe_unique(driver, spec).await?;
        if let Some(handle) = resolved {
            debug!(target = %spec, strategy = %handle.strategy, "resolved element");
            return Ok(handle);
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(TestError::AmbiguousOrMissing {
                target: spec.describe(),
                counts,
            });
        }

        sleep_tick(poll_interval, timeout - elapsed).await;
    }
}

/// One resolution pass over all strategies. Returns the first unique match
/// along with the per-strategy match counts observed this pass.
pub(crate) async fn probe_unique(
    driver: &mut dyn Driver,
    spec: &LocatorSpec,
) -> Result<(Option<ElementHandle>, MatchCounts), TestError> {
    let mut counts = Vec::with_capacity(spec.strategies().len());

    for (strategy, value) in spec.strategies() {
        let mut matches = driver.query(*strategy, value).await?;
        counts.push((*strategy, matches.len()));

        match matches.len() {
            1 => return Ok((matches.pop(), MatchCounts(counts))),
            0 => {}
            n => {
                debug!(strategy = %strategy, value, matches = n, "ambiguous strategy, trying next");
            }
        }
    }

    Ok((None, MatchCounts(counts)))
}
