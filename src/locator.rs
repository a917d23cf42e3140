//! Element Locator - bounded-retry lookup of host nodes.
//!
//! Lookups that may race the host's rendering go through here. A lookup
//! never fails hard and never waits forever: it looks once, then
//! retries up to `max_attempts` more times with `delay` between lookups, so a
//! miss resolves to [`LocateError::NotFound`] after exactly
//! `max_attempts * delay`.

use std::time::Duration;

use crate::error::LocateError;
use crate::host::{Descriptor, HostTree, NodeId};

/// Retry budget for one lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial lookup.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        RetryPolicy { max_attempts, delay }
    }

    /// Spread a wall-clock budget over retries of `delay` each.
    pub fn within(budget: Duration, delay: Duration) -> Self {
        let max_attempts = if delay.is_zero() {
            0
        } else {
            (budget.as_millis() / delay.as_millis().max(1)) as u32
        };
        RetryPolicy { max_attempts, delay }
    }

    /// Upper bound on the time a lookup can take.
    pub fn budget(&self) -> Duration {
        self.delay * self.max_attempts
    }
}

/// Query the host until the descriptor matches or the retry budget runs out.
pub async fn locate(
    host: &dyn HostTree,
    descriptor: &Descriptor,
    scope: Option<NodeId>,
    policy: RetryPolicy,
) -> Result<NodeId, LocateError> {
    let mut attempts = 0;
    loop {
        if let Some(node) = host.query(descriptor, scope) {
            if attempts > 0 {
                log::debug!(
                    target: "pinned_panel::locator",
                    "Located '{}' after {} retries",
                    descriptor,
                    attempts
                );
            }
            return Ok(node);
        }
        if attempts >= policy.max_attempts {
            log::debug!(
                target: "pinned_panel::locator",
                "'{}' not found after {} retries",
                descriptor,
                attempts
            );
            return Err(LocateError::NotFound {
                descriptor: descriptor.to_string(),
                attempts: attempts + 1,
            });
        }
        attempts += 1;
        tokio::time::sleep(policy.delay).await;
    }
}
