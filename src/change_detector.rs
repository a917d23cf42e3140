//! Change Detector - host mutation batches in, one "host changed" signal out.
//!
//! Two watches are attached:
//! - the panel region: structure plus the attributes that flip when a panel
//!   shows or hides (`style`, `class`, `hidden`, `aria-selected`)
//! - the main content area: structure only (navigation)
//!
//! Whatever is queued on either watch when the detector wakes is drained and
//! reported as a single [`HostChanged`]. If the anchors are not in the tree
//! yet, attaching is retried on a fixed delay until the detector is shut down.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::LayoutSpec;
use crate::host::{HostTree, MutationStream, WatchOptions};

/// Attributes that signal a panel changing visibility.
pub const PANEL_ATTRIBUTES: [&str; 4] = ["style", "class", "hidden", "aria-selected"];

/// One coalesced notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostChanged {
    /// Watches are in place; evaluate the current state once.
    Attached,
    /// One or more mutation batches arrived.
    Mutations { batches: usize, records: usize },
}

struct Watches {
    panel_region: MutationStream,
    main_content: Option<MutationStream>,
}

/// Watches the host and emits debounced signals.
pub struct ChangeDetector {
    layout: LayoutSpec,
    retry_delay: Duration,
}

impl ChangeDetector {
    pub fn new(layout: LayoutSpec, retry_delay: Duration) -> Self {
        ChangeDetector { layout, retry_delay }
    }

    /// Run the detector on its own task until `shutdown` flips to true or the
    /// signal receiver goes away.
    pub fn spawn(
        self,
        host: Arc<dyn HostTree>,
        signals: mpsc::UnboundedSender<HostChanged>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(host, signals, shutdown).await })
    }

    async fn run(
        self,
        host: Arc<dyn HostTree>,
        signals: mpsc::UnboundedSender<HostChanged>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let mut watches = match self.attach_when_present(host.as_ref(), &mut shutdown).await {
                Some(w) => w,
                None => break,
            };
            if signals.send(HostChanged::Attached).is_err() {
                break;
            }

            let reattach = loop {
                tokio::select! {
                    _ = shutdown.changed() => break false,
                    batch = watches.panel_region.recv() => match batch {
                        Some(batch) => {
                            if !emit(&signals, &mut watches, batch.len()) {
                                break false;
                            }
                        }
                        None => break true,
                    },
                    batch = next_batch(&mut watches.main_content) => match batch {
                        Some(batch) => {
                            if !emit(&signals, &mut watches, batch.len()) {
                                break false;
                            }
                        }
                        None => {
                            log::debug!(target: "pinned_panel::detector", "Main content watch closed");
                            watches.main_content = None;
                        }
                    },
                }
            };
            if !reattach || *shutdown.borrow() {
                break;
            }
            log::info!(target: "pinned_panel::detector", "Panel region watch lost, re-attaching");
        }
        log::debug!(target: "pinned_panel::detector", "Change detector stopped");
    }

    async fn attach_when_present(
        &self,
        host: &dyn HostTree,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Watches> {
        loop {
            if *shutdown.borrow() {
                return None;
            }
            if let Some(watches) = self.attach(host) {
                log::info!(target: "pinned_panel::detector", "Watching panel region and main view");
                return Some(watches);
            }
            log::debug!(
                target: "pinned_panel::detector",
                "Layout anchors missing, retrying in {:?}",
                self.retry_delay
            );
            tokio::select! {
                _ = tokio::time::sleep(self.retry_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// Attach both watches. Needs the main view and the panel region; the
    /// main content watch is optional.
    fn attach(&self, host: &dyn HostTree) -> Option<Watches> {
        let main_view = host.query(&self.layout.main_view, None)?;
        let region = host.query(&self.layout.panel_region, None)?;

        let panel_region = match host.observe(region, WatchOptions::structure_and_attributes(&PANEL_ATTRIBUTES)) {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!(target: "pinned_panel::detector", "Cannot watch panel region: {}", e);
                return None;
            }
        };

        let main_content = host
            .query(&self.layout.main_view_container, Some(main_view))
            .and_then(|container| host.query(&self.layout.main_content, Some(container)))
            .and_then(|content| match host.observe(content, WatchOptions::structure()) {
                Ok(stream) => Some(stream),
                Err(e) => {
                    log::warn!(target: "pinned_panel::detector", "Cannot watch main content: {}", e);
                    None
                }
            });

        Some(Watches {
            panel_region,
            main_content,
        })
    }
}

async fn next_batch(stream: &mut Option<MutationStream>) -> Option<Vec<crate::host::MutationRecord>> {
    match stream {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Drain everything already queued and send a single signal for all of it.
fn emit(signals: &mpsc::UnboundedSender<HostChanged>, watches: &mut Watches, first_len: usize) -> bool {
    let mut batches = 1;
    let mut records = first_len;
    while let Ok(batch) = watches.panel_region.try_recv() {
        batches += 1;
        records += batch.len();
    }
    if let Some(main) = watches.main_content.as_mut() {
        while let Ok(batch) = main.try_recv() {
            batches += 1;
            records += batch.len();
        }
    }
    log::trace!(
        target: "pinned_panel::detector",
        "Host changed: {} batches, {} records",
        batches,
        records
    );
    signals.send(HostChanged::Mutations { batches, records }).is_ok()
}
