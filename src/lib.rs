//! Pinned Panel Controller
//!
//! Keeps a user-chosen auxiliary panel pinned in a host application's UI that
//! this crate does not own. The host is reached only through the [`HostTree`]
//! seam: descriptor queries, rendering snapshots, synthetic activations and
//! mutation batches. There is no confirmation API, so every action is followed
//! by a settle delay and a fresh observation.
//!
//! **Architecture**: the change detector feeds one debounced signal per
//! mutation batch into the controller, which asks the observer for the active
//! panel and lets the scheduler arm or cancel a dwell countdown. When the
//! countdown expires and the host is still deviated, the sequencer closes the
//! current panel, opens the preferred one and cleans up any incidental Now
//! Playing view.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Panel kinds, preference, observed state
//! - **config**: Timings, panel catalog, preference store
//! - **host**: Host tree abstraction, descriptors, simulated host
//! - **locator**: Bounded-retry element lookup
//! - **observe**: Prioritized panel detectors
//! - **sequencer**: Close / open / cleanup state machine
//! - **scheduler**: Dwell countdown state machine
//! - **change_detector**: Mutation batches to host-changed signals
//! - **readiness**: Host readiness gates
//! - **controller**: Process-wide state and entry points
//! - **log_collector**: `log` backend

// Core foundational modules
pub mod error;
pub mod models;

pub mod config;
pub mod host;

pub mod locator;
pub mod observe;
pub mod sequencer;
pub mod scheduler;
pub mod change_detector;
pub mod readiness;

pub mod controller;

pub mod log_collector;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::LogCollector;

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{
    ConfigError, DescriptorError, HostError, LocateError, ReadinessError, Result, SequencerError,
};

pub use models::{ObservedState, PanelKind, Preference, DEFAULT_DWELL_SECONDS, MAX_DWELL_SECONDS, MIN_DWELL_SECONDS};

pub use config::{
    ControllerConfig, JsonPreferenceStore, MemoryPreferenceStore, PanelCatalog, PanelSpec, PreferenceStore,
    Timings, VisibilityRule,
};

pub use host::{Descriptor, HostTree, MutationRecord, NodeId, NodeSnapshot, SimulatedHost, SimulatedHostOptions, WatchOptions};

pub use locator::{locate, RetryPolicy};
pub use observe::{Detector, MatchResult, Observer, PanelDetector};
pub use sequencer::{SequenceOutcome, SequenceReport, Sequencer};
pub use scheduler::{DisarmReason, Scheduler, SchedulerPhase, SchedulerSnapshot};
pub use change_detector::{ChangeDetector, HostChanged};
pub use controller::{ControllerEvent, InFlightGuard, PanelController, Trigger};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_reexports_build_a_controller() {
        let host = SimulatedHost::new(SimulatedHostOptions::default());
        let controller = PanelController::new(
            std::sync::Arc::new(host),
            std::sync::Arc::new(MemoryPreferenceStore::default()),
            ControllerConfig::default(),
        );
        assert_eq!(controller.preference(), Preference::default());
        assert_eq!(controller.observe(), None);
    }
}
