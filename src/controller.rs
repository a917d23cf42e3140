//! Panel controller - owns every piece of process-wide state.
//!
//! One `PanelController` is built at start-up and shared as `Arc`. It holds:
//! - the host handle and the preference store
//! - the cached preference
//! - the scheduler (single timer handle)
//! - the in-flight flag guarding the sequencer
//! - the inter-operation cooldown
//! - the start-up grace flag
//!
//! Entry points:
//! - [`PanelController::start`]: readiness gate, change detector, start-up restore
//! - [`PanelController::on_host_changed`]: debounced host signal -> scheduler
//! - [`PanelController::apply_preference_and_reconcile`]: user edits
//! - [`PanelController::reconcile_now`]: one manual run
//! - [`PanelController::shutdown`]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::change_detector::{ChangeDetector, HostChanged};
use crate::config::{ControllerConfig, PreferenceStore, Timings};
use crate::error::{ConfigError, ReadinessError, SequencerError};
use crate::host::HostTree;
use crate::models::{ObservedState, PanelKind, Preference};
use crate::observe::Observer;
use crate::readiness;
use crate::scheduler::{self, DisarmReason, Scheduler, SchedulerSnapshot, Transition};
use crate::sequencer::{display_state, SequenceReport, Sequencer};

/// What asked for a sequencer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Timer,
    PreferenceEdit,
    Startup,
    Manual,
}

impl Trigger {
    /// Explicit user edits and start-up restore are not throttled.
    fn respects_cooldown(&self) -> bool {
        matches!(self, Trigger::Timer | Trigger::Manual)
    }
}

/// Diagnostics published on the optional event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Armed { deviated: ObservedState, dwell: Duration },
    Disarmed(DisarmReason),
    Fired { observed: ObservedState },
    SequenceFinished { trigger: Trigger, report: SequenceReport },
    Rejected { trigger: Trigger, error: SequencerError },
    StartupComplete,
}

/// RAII claim on the in-flight flag. Released on every exit path.
pub struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    pub fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reconciles the host's visible panel with the user's preference.
pub struct PanelController {
    host: Arc<dyn HostTree>,
    store: Arc<dyn PreferenceStore>,
    prefs: Mutex<Preference>,
    config: ControllerConfig,
    observer: Arc<Observer>,
    sequencer: Sequencer,
    scheduler: Mutex<Scheduler>,
    in_flight: AtomicBool,
    /// A host signal arrived while the sequencer was running.
    pending_signal: AtomicBool,
    last_action_at: Mutex<Option<Instant>>,
    startup_grace: AtomicBool,
    events: Option<mpsc::Sender<ControllerEvent>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PanelController {
    /// Build a controller. The preference is read from `store` once, here.
    pub fn new(host: Arc<dyn HostTree>, store: Arc<dyn PreferenceStore>, config: ControllerConfig) -> Self {
        let observer = Arc::new(Observer::from_catalog(&config.catalog));
        let sequencer = Sequencer::new(observer.clone(), config.timings.clone());
        let prefs = store.get();
        log::info!(target: "pinned_panel::controller", "Loaded preference {:?}", prefs);
        let (shutdown_tx, _) = watch::channel(false);

        PanelController {
            host,
            store,
            prefs: Mutex::new(prefs),
            config,
            observer,
            sequencer,
            scheduler: Mutex::new(Scheduler::new()),
            in_flight: AtomicBool::new(false),
            pending_signal: AtomicBool::new(false),
            last_action_at: Mutex::new(None),
            startup_grace: AtomicBool::new(true),
            events: None,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Publish diagnostics on `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<ControllerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn preference(&self) -> Preference {
        *lock(&self.prefs)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Fresh observation of the active panel.
    pub fn observe(&self) -> ObservedState {
        self.observer.observe(self.host.as_ref())
    }

    pub fn scheduler_snapshot(&self) -> SchedulerSnapshot {
        lock(&self.scheduler).snapshot()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn in_startup_grace(&self) -> bool {
        self.startup_grace.load(Ordering::Acquire)
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn timings(&self) -> &Timings {
        &self.config.timings
    }

    fn emit(&self, event: ControllerEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(event) {
                log::trace!(target: "pinned_panel::controller", "Event dropped: {}", e);
            }
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Wait for the host, attach the change detector and restore the preferred
    /// panel once. The start-up grace period ends `startup_grace_ms` later.
    pub async fn start(self: &Arc<Self>) -> Result<(), ReadinessError> {
        log::info!(target: "pinned_panel::controller", "Initializing...");
        let t = self.timings().clone();
        readiness::wait_until_ready(
            self.host.as_ref(),
            Timings::ms(t.readiness_poll_ms),
            t.readiness_ceiling_ms.map(Timings::ms),
        )
        .await?;
        tokio::time::sleep(Timings::ms(t.post_ready_settle_ms)).await;

        self.spawn_change_detector();
        self.restore_on_startup().await;

        let weak = Arc::downgrade(self);
        self.track(tokio::spawn(async move {
            tokio::time::sleep(Timings::ms(t.startup_grace_ms)).await;
            if let Some(this) = weak.upgrade() {
                this.startup_grace.store(false, Ordering::Release);
                log::info!(target: "pinned_panel::controller", "Startup phase complete, auto-restore enabled");
                this.emit(ControllerEvent::StartupComplete);
                this.evaluate();
            }
        }));
        log::info!(target: "pinned_panel::controller", "Initialized");
        Ok(())
    }

    fn spawn_change_detector(self: &Arc<Self>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<HostChanged>();
        let detector = ChangeDetector::new(
            self.config.catalog.layout.clone(),
            Timings::ms(self.timings().detector_retry_ms),
        );
        self.track(detector.spawn(self.host.clone(), tx, self.shutdown_tx.subscribe()));

        let weak = Arc::downgrade(self);
        self.track(tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                match weak.upgrade() {
                    Some(this) => {
                        log::trace!(target: "pinned_panel::controller", "{:?}", signal);
                        this.on_host_changed();
                    }
                    None => break,
                }
            }
        }));
    }

    async fn restore_on_startup(self: &Arc<Self>) {
        let target = match self.preference().active_target() {
            Some(target) => target,
            None => return,
        };
        let t = self.timings().clone();
        log::info!(target: "pinned_panel::controller", "Checking startup panel state for {}", target);

        let ready = readiness::wait_for_panel_region(
            self.host.as_ref(),
            &self.config.catalog,
            Timings::ms(t.sidebar_ready_poll_ms),
            Timings::ms(t.sidebar_ready_timeout_ms),
        )
        .await;
        if !ready {
            log::warn!(target: "pinned_panel::controller", "Panel region not ready, skipping startup switch");
            return;
        }
        if self.observe() == Some(target) {
            log::info!(target: "pinned_panel::controller", "{} already active at startup", target);
            return;
        }
        self.cancel_timer(DisarmReason::PreferenceChanged);

        for attempt in 1..=t.startup_switch_attempts {
            if let Err(e) = self.run_sequencer(target, Trigger::Startup).await {
                log::warn!(target: "pinned_panel::controller", "Startup switch attempt {} rejected: {}", attempt, e);
            }
            tokio::time::sleep(Timings::ms(t.startup_verify_ms)).await;
            if self.observe() == Some(target) {
                log::info!(target: "pinned_panel::controller", "Startup switch succeeded on attempt {}", attempt);
                return;
            }
            if attempt < t.startup_switch_attempts {
                log::info!(target: "pinned_panel::controller", "Startup switch attempt {} failed, retrying", attempt);
                tokio::time::sleep(Timings::ms(t.startup_retry_ms)).await;
            } else {
                log::warn!(
                    target: "pinned_panel::controller",
                    "Startup switch failed after {} attempts",
                    t.startup_switch_attempts
                );
            }
        }
    }

    /// Debounced "host changed" signal from the change detector.
    pub fn on_host_changed(self: &Arc<Self>) {
        if self.is_in_flight() {
            self.pending_signal.store(true, Ordering::Release);
            return;
        }
        self.evaluate();
    }

    /// Arm, keep or disarm the countdown for the current observation.
    fn evaluate(self: &Arc<Self>) {
        if self.is_shut_down() {
            return;
        }
        let prefs = self.preference();
        let observed = self.observe();
        let region_present = self
            .host
            .query(&self.config.catalog.layout.panel_region, None)
            .is_some();
        let verdict = scheduler::decide(&prefs, observed, region_present, self.in_startup_grace());

        let weak = Arc::downgrade(self);
        let transition = lock(&self.scheduler).apply(verdict, prefs.dwell(), move |generation| async move {
            if let Some(this) = weak.upgrade() {
                this.on_timer_fired(generation).await;
            }
        });

        match transition {
            Transition::Armed { deviated, dwell } => {
                log::info!(
                    target: "pinned_panel::controller",
                    "Active panel {} is not preferred, restoring in {:?}",
                    display_state(deviated),
                    dwell
                );
                self.emit(ControllerEvent::Armed { deviated, dwell });
            }
            Transition::Disarmed(reason) => {
                log::info!(target: "pinned_panel::controller", "Auto-restore timer cleared ({:?})", reason);
                self.emit(ControllerEvent::Disarmed(reason));
            }
            Transition::Kept | Transition::Unchanged => {}
        }
    }

    fn cancel_timer(&self, reason: DisarmReason) {
        let cancelled = lock(&self.scheduler).cancel();
        if cancelled {
            log::info!(target: "pinned_panel::controller", "Auto-restore timer cleared ({:?})", reason);
            self.emit(ControllerEvent::Disarmed(reason));
        }
    }

    async fn on_timer_fired(self: Arc<Self>, generation: u64) {
        let claimed = lock(&self.scheduler).begin_fire(generation);
        if !claimed {
            return;
        }
        let observed = self.observe();
        let prefs = self.preference();
        log::info!(
            target: "pinned_panel::controller",
            "Auto-restore timer fired; active: {}, preferred: {:?}",
            display_state(observed),
            prefs.desired_panel
        );
        self.emit(ControllerEvent::Fired { observed });

        match prefs.active_target() {
            Some(target) if observed != Some(target) => {
                if let Err(e) = self.run_sequencer(target, Trigger::Timer).await {
                    log::info!(target: "pinned_panel::controller", "Timer run skipped: {}", e);
                }
            }
            Some(target) => {
                log::info!(target: "pinned_panel::controller", "{} already active, nothing to restore", target)
            }
            None => {}
        }
        lock(&self.scheduler).finish_fire();
    }

    /// Run the sequencer under the in-flight guard and the cooldown.
    ///
    /// A call that finds the guard set is rejected, never queued.
    pub async fn run_sequencer(
        self: &Arc<Self>,
        target: PanelKind,
        trigger: Trigger,
    ) -> Result<SequenceReport, SequencerError> {
        let guard = match InFlightGuard::try_acquire(&self.in_flight) {
            Some(guard) => guard,
            None => return Err(self.reject(trigger, SequencerError::ConcurrentCallRejected)),
        };

        if trigger.respects_cooldown() {
            let last = *lock(&self.last_action_at);
            if let Some(last) = last {
                let cooldown = Timings::ms(self.timings().action_cooldown_ms);
                let since = last.elapsed();
                if since < cooldown {
                    drop(guard);
                    let remaining_ms = (cooldown - since).as_millis() as u64;
                    return Err(self.reject(trigger, SequencerError::CooldownActive { remaining_ms }));
                }
            }
        }

        let report = self.sequencer.run(self.host.as_ref(), target).await;
        *lock(&self.last_action_at) = Some(Instant::now());
        drop(guard);

        self.emit(ControllerEvent::SequenceFinished {
            trigger,
            report: report.clone(),
        });
        if self.pending_signal.swap(false, Ordering::AcqRel) {
            self.evaluate();
        }
        Ok(report)
    }

    fn reject(&self, trigger: Trigger, error: SequencerError) -> SequencerError {
        log::warn!(target: "pinned_panel::controller", "{:?} run rejected: {}", trigger, error);
        self.emit(ControllerEvent::Rejected {
            trigger,
            error: error.clone(),
        });
        error
    }

    /// Persist an edited preference and reconcile at once.
    ///
    /// Any pending countdown is cancelled. If the new preference is enabled
    /// with a target, the sequencer runs immediately and the scheduler
    /// re-evaluates shortly after.
    pub async fn apply_preference_and_reconcile(
        self: &Arc<Self>,
        prefs: Preference,
    ) -> Result<Option<SequenceReport>, ConfigError> {
        let stored = self.store.set(prefs)?;
        *lock(&self.prefs) = stored;
        log::info!(target: "pinned_panel::controller", "Preference updated: {:?}", stored);

        let reason = if stored.enabled {
            DisarmReason::PreferenceChanged
        } else {
            DisarmReason::Disabled
        };
        self.cancel_timer(reason);

        let target = match stored.active_target() {
            Some(target) => target,
            None => return Ok(None),
        };
        let report = match self.run_sequencer(target, Trigger::PreferenceEdit).await {
            Ok(report) => Some(report),
            Err(_) => None,
        };

        let weak = Arc::downgrade(self);
        let delay = Timings::ms(self.timings().post_edit_reevaluate_ms);
        self.track(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(this) = weak.upgrade() {
                this.evaluate();
            }
        }));
        Ok(report)
    }

    /// Run once towards the preferred panel, outside the dwell countdown.
    pub async fn reconcile_now(self: &Arc<Self>) -> Result<Option<SequenceReport>, SequencerError> {
        match self.preference().active_target() {
            Some(target) => self.run_sequencer(target, Trigger::Manual).await.map(Some),
            None => Ok(None),
        }
    }

    /// Stop the change detector and cancel the countdown. An in-flight run
    /// finishes on its own.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        self.cancel_timer(DisarmReason::Shutdown);
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        log::info!(target: "pinned_panel::controller", "Controller shut down");
    }
}

impl Drop for PanelController {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}
