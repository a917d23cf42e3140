//! Host readiness gates.
//!
//! `wait_until_ready` blocks start-up until the host reports it is fully
//! initialized. Without a ceiling it waits indefinitely, polling at a fixed
//! interval. `wait_for_panel_region` is the shorter, always-bounded check run
//! before the start-up restore: the panel region and at least one activator
//! must be in the tree.

use std::time::Duration;
use tokio::time::Instant;

use crate::config::PanelCatalog;
use crate::error::ReadinessError;
use crate::host::HostTree;

/// Poll `is_ready()` every `poll` until it holds, or until `ceiling` elapses.
pub async fn wait_until_ready(
    host: &dyn HostTree,
    poll: Duration,
    ceiling: Option<Duration>,
) -> Result<Duration, ReadinessError> {
    let start = Instant::now();
    let mut polls: u64 = 0;
    while !host.is_ready() {
        let waited = start.elapsed();
        if let Some(ceiling) = ceiling {
            if waited >= ceiling {
                log::error!(target: "pinned_panel::readiness", "Host not ready after {:?}, giving up", waited);
                return Err(ReadinessError::Timeout {
                    waited_ms: waited.as_millis() as u64,
                });
            }
        }
        polls += 1;
        if polls % 30 == 0 {
            log::debug!(target: "pinned_panel::readiness", "Still waiting for host ({:?})", waited);
        }
        tokio::time::sleep(poll).await;
    }
    let waited = start.elapsed();
    log::info!(target: "pinned_panel::readiness", "Host ready after {:?}", waited);
    Ok(waited)
}

/// True once the panel region and any panel activator can be found.
pub fn panel_region_ready(host: &dyn HostTree, catalog: &PanelCatalog) -> bool {
    host.query(&catalog.layout.panel_region, None).is_some()
        && catalog
            .panels
            .iter()
            .any(|panel| host.query(&panel.activator.primary(), None).is_some())
}

/// Poll [`panel_region_ready`] until it holds or `timeout` elapses.
pub async fn wait_for_panel_region(
    host: &dyn HostTree,
    catalog: &PanelCatalog,
    poll: Duration,
    timeout: Duration,
) -> bool {
    let start = Instant::now();
    loop {
        if panel_region_ready(host, catalog) {
            return true;
        }
        if start.elapsed() >= timeout {
            log::warn!(target: "pinned_panel::readiness", "Panel region not ready after {:?}", timeout);
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{SimulatedHost, SimulatedHostOptions};
    use crate::models::PanelKind;

    fn host(ready: bool) -> SimulatedHost {
        SimulatedHost::new(SimulatedHostOptions {
            ready,
            ..SimulatedHostOptions::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_host_passes_immediately() {
        let waited = wait_until_ready(&host(true), Duration::from_millis(333), None).await;
        assert_eq!(waited, Ok(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_wait_until_ready() {
        let host = host(false);
        let flip = host.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(120)).await;
            flip.set_ready(true);
        });
        let waited = wait_until_ready(&host, Duration::from_millis(333), None).await.unwrap();
        assert!(waited >= Duration::from_secs(120));
        assert!(waited < Duration::from_millis(120_333 + 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_times_out() {
        let result = wait_until_ready(&host(false), Duration::from_millis(500), Some(Duration::from_secs(2))).await;
        assert_eq!(result, Err(ReadinessError::Timeout { waited_ms: 2000 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panel_region_requires_an_activator() {
        let host = host(true);
        let catalog = PanelCatalog::default();
        assert!(panel_region_ready(&host, &catalog));
        for kind in PanelKind::ALL {
            host.remove_activator(kind);
        }
        assert!(!panel_region_ready(&host, &catalog));
        assert!(!wait_for_panel_region(&host, &catalog, Duration::from_millis(200), Duration::from_secs(10)).await);

        let restore = host.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            restore.restore_activator(PanelKind::Connect);
        });
        assert!(wait_for_panel_region(&host, &catalog, Duration::from_millis(200), Duration::from_secs(10)).await);
    }
}
