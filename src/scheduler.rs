//! Auto-Restore Scheduler - dwell countdown between a deviation and a restore.
//!
//! States: `Idle -> Armed -> Firing -> Idle`.
//!
//! The scheduler owns the single timer handle. Arming always cancels the
//! previous timer first, and every armed timer carries a generation number so a
//! timer that lost a race with `cancel()` recognises itself as stale when it
//! wakes up. Deciding *whether* to arm is a pure function of the preference,
//! the observed panel and a couple of host facts, see [`decide`].

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::models::{ObservedState, PanelKind, Preference, MAX_DWELL_SECONDS};

/// Scheduler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    Armed {
        /// Panel observed when the countdown started.
        deviated: ObservedState,
        deadline: Instant,
        generation: u64,
    },
    Firing,
}

/// Why a pending countdown was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisarmReason {
    Converged,
    Disabled,
    StartupGrace,
    NoPanelRegion,
    PreferenceChanged,
    Shutdown,
}

/// What the current observation asks the scheduler to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Arm { deviated: ObservedState, target: PanelKind },
    Disarm(DisarmReason),
}

/// Transition taken by [`Scheduler::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Armed { deviated: ObservedState, dwell: Duration },
    /// Already counting down for the same deviation.
    Kept,
    Disarmed(DisarmReason),
    /// Nothing was armed and nothing needs to be.
    Unchanged,
}

/// Decide what a "host changed" signal means for the countdown.
///
/// With no panel detected, a countdown is only started while the panel region
/// itself is present (something else, such as search results, is shown there).
pub fn decide(prefs: &Preference, observed: ObservedState, region_present: bool, startup_grace: bool) -> Verdict {
    let target = match prefs.active_target() {
        Some(target) => target,
        None => return Verdict::Disarm(DisarmReason::Disabled),
    };
    if startup_grace {
        return Verdict::Disarm(DisarmReason::StartupGrace);
    }
    if !prefs.is_deviated(observed) {
        return Verdict::Disarm(DisarmReason::Converged);
    }
    match observed {
        Some(_) => Verdict::Arm { deviated: observed, target },
        None if region_present => Verdict::Arm { deviated: None, target },
        None => Verdict::Disarm(DisarmReason::NoPanelRegion),
    }
}

/// Read-only view of the scheduler for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub phase: SchedulerPhase,
    pub armed: bool,
    pub last_fired_at: Option<Instant>,
}

/// Process-wide countdown state. One instance per controller.
pub struct Scheduler {
    phase: SchedulerPhase,
    timer: Option<JoinHandle<()>>,
    last_fired_at: Option<Instant>,
    generation: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            phase: SchedulerPhase::Idle,
            timer: None,
            last_fired_at: None,
            generation: 0,
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.phase, SchedulerPhase::Armed { .. })
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            phase: self.phase,
            armed: self.is_armed(),
            last_fired_at: self.last_fired_at,
        }
    }

    /// Apply a verdict. `fire` is spawned as the countdown task when arming and
    /// receives the generation it was armed with.
    pub fn apply<F, Fut>(&mut self, verdict: Verdict, dwell: Duration, fire: F) -> Transition
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        match verdict {
            Verdict::Arm { deviated, .. } => {
                if let SchedulerPhase::Armed { deviated: current, .. } = self.phase {
                    if current == deviated {
                        return Transition::Kept;
                    }
                }
                self.arm(deviated, dwell, fire);
                Transition::Armed { deviated, dwell }
            }
            Verdict::Disarm(reason) => {
                if self.cancel() {
                    Transition::Disarmed(reason)
                } else {
                    Transition::Unchanged
                }
            }
        }
    }

    fn arm<F, Fut>(&mut self, deviated: ObservedState, dwell: Duration, fire: F)
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        let now = Instant::now();
        let deadline = now
            .checked_add(dwell)
            .unwrap_or_else(|| now + Duration::from_secs(MAX_DWELL_SECONDS));
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            fire(generation).await;
        }));
        self.phase = SchedulerPhase::Armed {
            deviated,
            deadline,
            generation,
        };
        log::debug!(
            target: "pinned_panel::scheduler",
            "Armed generation {} for {:?}",
            generation,
            dwell
        );
    }

    /// Cancel the pending countdown, if any. Returns true if one was armed.
    pub fn cancel(&mut self) -> bool {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if self.is_armed() {
            self.phase = SchedulerPhase::Idle;
            true
        } else {
            false
        }
    }

    /// Claim the countdown for firing. False when `generation` was cancelled or replaced.
    ///
    /// The timer handle is released without aborting it: the caller is
    /// running inside that task.
    pub fn begin_fire(&mut self, generation: u64) -> bool {
        match self.phase {
            SchedulerPhase::Armed { generation: current, .. } if current == generation => {
                self.timer = None;
                self.phase = SchedulerPhase::Firing;
                self.last_fired_at = Some(Instant::now());
                true
            }
            _ => {
                log::debug!(target: "pinned_panel::scheduler", "Stale timer generation {} ignored", generation);
                false
            }
        }
    }

    /// Return to Idle after a firing, unless a new countdown was armed meanwhile.
    pub fn finish_fire(&mut self) {
        if self.phase == SchedulerPhase::Firing {
            self.phase = SchedulerPhase::Idle;
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn enabled(target: PanelKind) -> Preference {
        Preference {
            enabled: true,
            desired_panel: Some(target),
            dwell_seconds: 20,
        }
    }

    #[test]
    fn test_decide() {
        let prefs = enabled(PanelKind::Queue);
        assert_eq!(
            decide(&prefs, Some(PanelKind::FriendActivity), true, false),
            Verdict::Arm {
                deviated: Some(PanelKind::FriendActivity),
                target: PanelKind::Queue
            }
        );
        assert_eq!(
            decide(&prefs, Some(PanelKind::Queue), true, false),
            Verdict::Disarm(DisarmReason::Converged)
        );
        assert_eq!(
            decide(&prefs, None, false, false),
            Verdict::Disarm(DisarmReason::NoPanelRegion)
        );
        assert!(matches!(decide(&prefs, None, true, false), Verdict::Arm { deviated: None, .. }));
        assert_eq!(
            decide(&prefs, Some(PanelKind::Connect), true, true),
            Verdict::Disarm(DisarmReason::StartupGrace)
        );
        assert_eq!(
            decide(&Preference::default(), Some(PanelKind::Connect), true, false),
            Verdict::Disarm(DisarmReason::Disabled)
        );
    }

    fn counting(fired: &Arc<AtomicU64>) -> impl FnOnce(u64) -> std::future::Ready<()> + Send + 'static {
        let fired = fired.clone();
        move |generation| {
            fired.store(generation, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    fn arm_verdict(deviated: PanelKind) -> Verdict {
        Verdict::Arm {
            deviated: Some(deviated),
            target: PanelKind::Queue,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_dwell() {
        let fired = Arc::new(AtomicU64::new(0));
        let mut scheduler = Scheduler::new();
        let t = scheduler.apply(arm_verdict(PanelKind::Connect), Duration::from_secs(20), counting(&fired));
        assert!(matches!(t, Transition::Armed { .. }));

        tokio::time::sleep(Duration::from_millis(19_999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_deviation_keeps_countdown() {
        let fired = Arc::new(AtomicU64::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.apply(arm_verdict(PanelKind::Connect), Duration::from_secs(20), counting(&fired));
        tokio::time::sleep(Duration::from_secs(10)).await;
        let t = scheduler.apply(arm_verdict(PanelKind::Connect), Duration::from_secs(20), counting(&fired));
        assert_eq!(t, Transition::Kept);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_deviation_rearms_and_cancels_old_timer() {
        let fired = Arc::new(AtomicU64::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.apply(arm_verdict(PanelKind::Connect), Duration::from_secs(20), counting(&fired));
        tokio::time::sleep(Duration::from_secs(10)).await;
        scheduler.apply(arm_verdict(PanelKind::FriendActivity), Duration::from_secs(20), counting(&fired));

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0, "first timer must not fire");
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_cancels() {
        let fired = Arc::new(AtomicU64::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.apply(arm_verdict(PanelKind::Connect), Duration::from_secs(20), counting(&fired));
        let t = scheduler.apply(
            Verdict::Disarm(DisarmReason::Converged),
            Duration::from_secs(20),
            counting(&fired),
        );
        assert_eq!(t, Transition::Disarmed(DisarmReason::Converged));
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(
            scheduler.apply(Verdict::Disarm(DisarmReason::Converged), Duration::ZERO, counting(&fired)),
            Transition::Unchanged
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_lifecycle_and_stale_generation() {
        let fired = Arc::new(AtomicU64::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.apply(arm_verdict(PanelKind::Connect), Duration::from_secs(20), counting(&fired));
        assert!(!scheduler.begin_fire(7));
        assert!(scheduler.begin_fire(1));
        assert_eq!(scheduler.phase(), SchedulerPhase::Firing);
        assert!(scheduler.snapshot().last_fired_at.is_some());
        assert!(!scheduler.begin_fire(1));
        scheduler.finish_fire();
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_deadline_still_arms() {
        let fired = Arc::new(AtomicU64::new(0));
        let mut scheduler = Scheduler::new();
        let t = scheduler.apply(arm_verdict(PanelKind::Connect), Duration::MAX, counting(&fired));
        assert!(matches!(t, Transition::Armed { .. }));
        assert!(scheduler.is_armed());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_while_firing_survives_finish() {
        let fired = Arc::new(AtomicU64::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.apply(arm_verdict(PanelKind::Connect), Duration::from_secs(20), counting(&fired));
        assert!(scheduler.begin_fire(1));
        scheduler.apply(arm_verdict(PanelKind::Connect), Duration::from_secs(20), counting(&fired));
        scheduler.finish_fire();
        assert!(scheduler.is_armed());
    }
}
