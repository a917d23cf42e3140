//! Action Sequencer - drive the host from the observed panel to a target panel.
//!
//! One run walks a fixed list of named steps:
//!
//! ```text
//! Inspect -> Close(current) -> Recheck -> Guard -> Open -> Cleanup -> Finish
//!    |                            |          |                          ^
//!    +--- target already active --+----------+--- satisfied / skip -----+
//! ```
//!
//! Every suspension point is an explicit settle delay or a bounded locator
//! wait. A run never retries internally: lookups that miss degrade to
//! [`SequencerError::NotFound`] and the caller decides when to try again.
//!
//! The sequencer is not reentrant. Callers hold the in-flight guard for the
//! whole run.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Timings;
use crate::error::{LocateError, SequencerError};
use crate::host::HostTree;
use crate::locator;
use crate::models::{ObservedState, PanelKind};
use crate::observe::Observer;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// Target was active on entry; nothing was touched.
    AlreadyActive,
    /// Closing the previous panel revealed the target.
    SatisfiedByClose,
    /// Target content was already rendered, so it was not toggled.
    AlreadyOpen,
    /// Target opened and confirmed.
    Switched,
    Failed(SequencerError),
}

impl SequenceOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, SequenceOutcome::Failed(_))
    }

    pub fn error(&self) -> Option<&SequencerError> {
        match self {
            SequenceOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for SequenceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceOutcome::AlreadyActive => write!(f, "already active"),
            SequenceOutcome::SatisfiedByClose => write!(f, "satisfied by close"),
            SequenceOutcome::AlreadyOpen => write!(f, "already open"),
            SequenceOutcome::Switched => write!(f, "switched"),
            SequenceOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Diagnostics for one sequencer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceReport {
    pub target: PanelKind,
    pub initial: ObservedState,
    pub final_state: ObservedState,
    /// Activations dispatched, in order.
    pub activations: Vec<PanelKind>,
    pub outcome: SequenceOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Inspect,
    Close(PanelKind),
    Recheck,
    Guard,
    Open,
    Cleanup(SequenceOutcome),
    Finish(SequenceOutcome),
}

/// Close-current / open-target / clean-up state machine.
pub struct Sequencer {
    observer: Arc<Observer>,
    timings: Timings,
}

impl Sequencer {
    pub fn new(observer: Arc<Observer>, timings: Timings) -> Self {
        Sequencer { observer, timings }
    }

    /// Run the full sequence towards `target`.
    pub async fn run(&self, host: &dyn HostTree, target: PanelKind) -> SequenceReport {
        let initial = self.observer.observe(host);
        log::info!(
            target: "pinned_panel::sequencer",
            "Switch requested: {} -> {}",
            display_state(initial),
            target
        );

        let mut activations = Vec::new();
        let mut step = Step::Inspect;
        loop {
            log::trace!(target: "pinned_panel::sequencer", "step {:?}", step);
            step = match step {
                Step::Inspect => match initial {
                    Some(current) if current == target => Step::Finish(SequenceOutcome::AlreadyActive),
                    Some(current) => Step::Close(current),
                    None => Step::Guard,
                },

                Step::Close(current) => {
                    match self.press(host, current, self.timings.close_lookup_ms).await {
                        Ok(()) => {
                            activations.push(current);
                            tokio::time::sleep(Timings::ms(self.timings.close_settle_ms)).await;
                        }
                        Err(e) => {
                            log::warn!(
                                target: "pinned_panel::sequencer",
                                "Could not close {}: {}",
                                current,
                                e
                            );
                        }
                    }
                    Step::Recheck
                }

                Step::Recheck => {
                    let observed = self.observer.observe(host);
                    log::debug!(
                        target: "pinned_panel::sequencer",
                        "After close: {}",
                        display_state(observed)
                    );
                    if observed == Some(target) {
                        Step::Finish(SequenceOutcome::SatisfiedByClose)
                    } else {
                        Step::Guard
                    }
                }

                Step::Guard => {
                    if self.observer.content_visible(host, target) {
                        log::info!(
                            target: "pinned_panel::sequencer",
                            "{} content already visible, not toggling it",
                            target
                        );
                        Step::Cleanup(SequenceOutcome::AlreadyOpen)
                    } else {
                        Step::Open
                    }
                }

                Step::Open => match self.press(host, target, self.timings.open_lookup_ms).await {
                    Ok(()) => {
                        activations.push(target);
                        tokio::time::sleep(Timings::ms(self.timings.open_settle_ms)).await;
                        Step::Cleanup(SequenceOutcome::Switched)
                    }
                    Err(e) => {
                        log::error!(
                            target: "pinned_panel::sequencer",
                            "Could not open {}: {}",
                            target,
                            e
                        );
                        Step::Finish(SequenceOutcome::Failed(e))
                    }
                },

                Step::Cleanup(outcome) => {
                    if target != PanelKind::NowPlaying {
                        if let Some(kind) = self.close_incidental_now_playing(host).await {
                            activations.push(kind);
                        }
                    }
                    Step::Finish(outcome)
                }

                Step::Finish(outcome) => {
                    let final_state = self.observer.observe(host);
                    let outcome = match outcome {
                        SequenceOutcome::Switched | SequenceOutcome::AlreadyOpen
                            if final_state != Some(target) =>
                        {
                            SequenceOutcome::Failed(SequencerError::Unconfirmed {
                                expected: target,
                                observed: final_state,
                            })
                        }
                        other => other,
                    };
                    match &outcome {
                        SequenceOutcome::Failed(e) => log::warn!(
                            target: "pinned_panel::sequencer",
                            "Switch to {} incomplete ({}); final panel: {}",
                            target,
                            e,
                            display_state(final_state)
                        ),
                        ok => log::info!(
                            target: "pinned_panel::sequencer",
                            "Switch to {} done ({}); final panel: {}",
                            target,
                            ok,
                            display_state(final_state)
                        ),
                    }
                    return SequenceReport {
                        target,
                        initial,
                        final_state,
                        activations,
                        outcome,
                    };
                }
            };
        }
    }

    /// Locate a panel's activator within `budget_ms` and dispatch one activation.
    async fn press(&self, host: &dyn HostTree, kind: PanelKind, budget_ms: u64) -> Result<(), SequencerError> {
        let detector = self.observer.detector(kind).ok_or_else(|| LocateError::NotFound {
            descriptor: format!("<no detector for {}>", kind),
            attempts: 0,
        })?;
        let node = locator::locate(host, detector.activator(), None, self.timings.lookup(budget_ms)).await?;
        host.activate(node)?;
        log::debug!(target: "pinned_panel::sequencer", "Activated {} ({})", kind, node);
        Ok(())
    }

    /// Close Now Playing if it is showing as a side effect of the previous steps.
    async fn close_incidental_now_playing(&self, host: &dyn HostTree) -> Option<PanelKind> {
        tokio::time::sleep(Timings::ms(self.timings.cleanup_precheck_ms)).await;
        if !self.observer.content_visible(host, PanelKind::NowPlaying) {
            return None;
        }
        log::info!(target: "pinned_panel::sequencer", "Now Playing lingering, closing it");
        match self.press(host, PanelKind::NowPlaying, self.timings.cleanup_lookup_ms).await {
            Ok(()) => {
                tokio::time::sleep(Timings::ms(self.timings.cleanup_settle_ms)).await;
                Some(PanelKind::NowPlaying)
            }
            Err(e) => {
                log::warn!(target: "pinned_panel::sequencer", "Now Playing cleanup failed: {}", e);
                None
            }
        }
    }

    /// Upper bound on the wall-clock time of one run.
    pub fn worst_case_duration(&self) -> Duration {
        let t = &self.timings;
        t.lookup(t.close_lookup_ms).budget()
            + t.lookup(t.open_lookup_ms).budget()
            + t.lookup(t.cleanup_lookup_ms).budget()
            + Timings::ms(t.close_settle_ms + t.open_settle_ms + t.cleanup_precheck_ms + t.cleanup_settle_ms)
    }
}

pub(crate) fn display_state(state: ObservedState) -> String {
    state.map(|k| k.to_string()).unwrap_or_else(|| "none".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PanelCatalog;
    use crate::host::{SimulatedHost, SimulatedHostOptions};
    use tokio::time::Instant;

    fn sequencer() -> Sequencer {
        Sequencer::new(
            Arc::new(Observer::from_catalog(&PanelCatalog::default())),
            Timings::default(),
        )
    }

    fn host(options: SimulatedHostOptions) -> SimulatedHost {
        SimulatedHost::new(options)
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_mutation_when_already_active() {
        let host = host(SimulatedHostOptions::default());
        host.open_now(PanelKind::Queue);
        let report = sequencer().run(&host, PanelKind::Queue).await;
        assert_eq!(report.outcome, SequenceOutcome::AlreadyActive);
        assert!(report.activations.is_empty());
        assert_eq!(host.activation_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_then_open() {
        let host = host(SimulatedHostOptions::default());
        host.open_now(PanelKind::FriendActivity);
        let report = sequencer().run(&host, PanelKind::Queue).await;
        assert_eq!(report.outcome, SequenceOutcome::Switched);
        assert_eq!(report.initial, Some(PanelKind::FriendActivity));
        assert_eq!(report.final_state, Some(PanelKind::Queue));
        assert_eq!(host.activations(), vec![PanelKind::FriendActivity, PanelKind::Queue]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_from_empty_sidebar() {
        let host = host(SimulatedHostOptions::default());
        let report = sequencer().run(&host, PanelKind::Connect).await;
        assert_eq!(report.outcome, SequenceOutcome::Switched);
        assert_eq!(host.activations(), vec![PanelKind::Connect]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_revealing_target_stops_early() {
        let host = host(SimulatedHostOptions {
            reveal_now_playing_on_close: true,
            ..SimulatedHostOptions::default()
        });
        host.open_now(PanelKind::Queue);
        let report = sequencer().run(&host, PanelKind::NowPlaying).await;
        assert_eq!(report.outcome, SequenceOutcome::SatisfiedByClose);
        assert_eq!(host.activations(), vec![PanelKind::Queue]);
        assert_eq!(host.open_panels(), vec![PanelKind::NowPlaying]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lingering_now_playing_is_closed() {
        let host = host(SimulatedHostOptions {
            reveal_now_playing_on_close: true,
            now_playing_persists: true,
            ..SimulatedHostOptions::default()
        });
        host.open_now(PanelKind::FriendActivity);
        let report = sequencer().run(&host, PanelKind::Queue).await;
        assert_eq!(report.outcome, SequenceOutcome::Switched);
        assert_eq!(
            host.activations(),
            vec![PanelKind::FriendActivity, PanelKind::Queue, PanelKind::NowPlaying]
        );
        assert_eq!(host.open_panels(), vec![PanelKind::Queue]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_now_playing_target_skips_cleanup() {
        let host = host(SimulatedHostOptions {
            now_playing_persists: true,
            ..SimulatedHostOptions::default()
        });
        host.open_now(PanelKind::Connect);
        let report = sequencer().run(&host, PanelKind::NowPlaying).await;
        assert!(report.outcome.is_success());
        assert_eq!(host.activations(), vec![PanelKind::Connect, PanelKind::NowPlaying]);
        assert_eq!(host.open_panels(), vec![PanelKind::NowPlaying]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_activator_aborts_within_budget() {
        let host = host(SimulatedHostOptions::default());
        host.remove_activator(PanelKind::Queue);
        let seq = sequencer();
        let start = Instant::now();
        let report = seq.run(&host, PanelKind::Queue).await;
        assert!(matches!(
            report.outcome,
            SequenceOutcome::Failed(SequencerError::NotFound(LocateError::NotFound { .. }))
        ));
        assert!(report.activations.is_empty());
        assert!(start.elapsed() <= seq.worst_case_duration());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_open_leaves_now_playing_alone() {
        let host = host(SimulatedHostOptions {
            reveal_now_playing_on_close: true,
            now_playing_persists: true,
            ..SimulatedHostOptions::default()
        });
        host.open_now(PanelKind::FriendActivity);
        host.remove_activator(PanelKind::Queue);
        let report = sequencer().run(&host, PanelKind::Queue).await;
        assert!(matches!(report.outcome, SequenceOutcome::Failed(_)));
        assert_eq!(host.activations(), vec![PanelKind::FriendActivity]);
        assert_eq!(host.open_panels(), vec![PanelKind::NowPlaying]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_failure_still_attempts_open() {
        let host = host(SimulatedHostOptions::default());
        host.open_now(PanelKind::Connect);
        host.remove_activator(PanelKind::Connect);
        let report = sequencer().run(&host, PanelKind::Queue).await;
        assert_eq!(report.outcome, SequenceOutcome::Switched);
        assert_eq!(host.activations(), vec![PanelKind::Queue]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_render_is_unconfirmed() {
        let host = host(SimulatedHostOptions {
            render_delays: vec![Duration::from_secs(2)],
            ..SimulatedHostOptions::default()
        });
        let report = sequencer().run(&host, PanelKind::Queue).await;
        assert_eq!(
            report.outcome,
            SequenceOutcome::Failed(SequencerError::Unconfirmed {
                expected: PanelKind::Queue,
                observed: None,
            })
        );
        // The activation still lands later; no extra activation was sent.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(host.open_panels(), vec![PanelKind::Queue]);
        assert_eq!(host.activation_count(), 1);
    }
}
