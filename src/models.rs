//! Core data types for the pinned panel controller.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default dwell time before auto-restore acts, in seconds.
pub const DEFAULT_DWELL_SECONDS: u64 = 20;

/// Lower bound applied to every persisted dwell time.
pub const MIN_DWELL_SECONDS: u64 = DEFAULT_DWELL_SECONDS;

/// Upper bound applied to every persisted dwell time (one day).
pub const MAX_DWELL_SECONDS: u64 = 24 * 60 * 60;

/// One of the mutually-exclusive auxiliary panels the host can display.
///
/// Declaration order is the observation priority order: when several panels
/// look active at once, the earliest variant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PanelKind {
    FriendActivity,
    Queue,
    Connect,
    NowPlaying,
}

impl PanelKind {
    /// All panel kinds in observation priority order.
    pub const ALL: [PanelKind; 4] = [
        PanelKind::FriendActivity,
        PanelKind::Queue,
        PanelKind::Connect,
        PanelKind::NowPlaying,
    ];

    /// The host-facing label, also used as the persisted preference value.
    pub fn label(&self) -> &'static str {
        match self {
            PanelKind::FriendActivity => "Friend Activity",
            PanelKind::Queue => "Queue",
            PanelKind::Connect => "Connect to a device",
            PanelKind::NowPlaying => "Now Playing view",
        }
    }

    /// Resolve a persisted label or variant name, ignoring case.
    pub fn from_label(label: &str) -> Option<PanelKind> {
        let needle = label.trim();
        PanelKind::ALL.iter().copied().find(|kind| {
            kind.label().eq_ignore_ascii_case(needle) || kind.variant_name().eq_ignore_ascii_case(needle)
        })
    }

    fn variant_name(&self) -> &'static str {
        match self {
            PanelKind::FriendActivity => "FriendActivity",
            PanelKind::Queue => "Queue",
            PanelKind::Connect => "Connect",
            PanelKind::NowPlaying => "NowPlaying",
        }
    }
}

impl fmt::Display for PanelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PanelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PanelKind::from_label(s).ok_or_else(|| format!("unknown panel: '{}'", s))
    }
}

impl Serialize for PanelKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for PanelKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        PanelKind::from_label(&raw).ok_or_else(|| {
            serde::de::Error::unknown_variant(
                &raw,
                &["Friend Activity", "Queue", "Connect to a device", "Now Playing view"],
            )
        })
    }
}

/// The panel currently visible in the host, or `None`.
///
/// Always recomputed from the live tree; never cached across cycles.
pub type ObservedState = Option<PanelKind>;

/// User preference for auto-restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preference {
    pub enabled: bool,
    pub desired_panel: Option<PanelKind>,
    pub dwell_seconds: u64,
}

impl Default for Preference {
    fn default() -> Self {
        Preference {
            enabled: false,
            desired_panel: None,
            dwell_seconds: DEFAULT_DWELL_SECONDS,
        }
    }
}

impl Preference {
    /// Return a copy with `dwell_seconds` clamped to
    /// `MIN_DWELL_SECONDS..=MAX_DWELL_SECONDS`.
    pub fn clamped(mut self) -> Self {
        self.dwell_seconds = self.dwell_seconds.clamp(MIN_DWELL_SECONDS, MAX_DWELL_SECONDS);
        self
    }

    /// The panel to restore, but only while auto-restore is enabled.
    pub fn active_target(&self) -> Option<PanelKind> {
        if self.enabled {
            self.desired_panel
        } else {
            None
        }
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_secs(self.dwell_seconds)
    }

    /// True when `observed` differs from an enabled preference.
    pub fn is_deviated(&self, observed: ObservedState) -> bool {
        match self.active_target() {
            Some(target) => observed != Some(target),
            None => false,
        }
    }
}
