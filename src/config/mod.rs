//! Configuration module for the pinned panel controller.
//!
//! # Module Structure
//!
//! - `loader`: config file locations and TOML (de)serialization
//! - `prefs`: the user preference store (`{enabled, desiredPanel, dwellSeconds}`)
//!
//! # Configuration Flow
//!
//! 1. `ControllerConfig` is loaded from `controller.toml` or falls back to defaults
//! 2. `validate()` rejects catalogs the observer could not use
//! 3. The controller builds its detectors, locator budgets and timers from it
//!
//! Every field is defaulted, so a config file only needs the values it changes.

pub mod loader;
pub mod prefs;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::ConfigError;
use crate::host::Descriptor;
use crate::locator::RetryPolicy;
use crate::models::PanelKind;

pub use prefs::{JsonPreferenceStore, MemoryPreferenceStore, PreferenceStore, PREF_KEY};

fn descriptor(source: &str) -> Descriptor {
    Descriptor::parse(source).unwrap_or_else(|e| panic!("built-in descriptor '{}': {}", source, e))
}

/// Fixed delays and lookup budgets, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub retry_delay_ms: u64,
    pub readiness_poll_ms: u64,
    /// `None` waits for the host forever.
    pub readiness_ceiling_ms: Option<u64>,
    pub post_ready_settle_ms: u64,
    pub startup_grace_ms: u64,
    pub sidebar_ready_timeout_ms: u64,
    pub sidebar_ready_poll_ms: u64,
    pub startup_switch_attempts: u32,
    pub startup_verify_ms: u64,
    pub startup_retry_ms: u64,
    pub close_lookup_ms: u64,
    pub close_settle_ms: u64,
    pub open_lookup_ms: u64,
    pub open_settle_ms: u64,
    pub cleanup_precheck_ms: u64,
    pub cleanup_lookup_ms: u64,
    pub cleanup_settle_ms: u64,
    pub action_cooldown_ms: u64,
    pub post_edit_reevaluate_ms: u64,
    pub detector_retry_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            retry_delay_ms: 333,
            readiness_poll_ms: 333,
            readiness_ceiling_ms: None,
            post_ready_settle_ms: 1000,
            startup_grace_ms: 2000,
            sidebar_ready_timeout_ms: 10_000,
            sidebar_ready_poll_ms: 200,
            startup_switch_attempts: 3,
            startup_verify_ms: 500,
            startup_retry_ms: 1000,
            close_lookup_ms: 1000,
            close_settle_ms: 250,
            open_lookup_ms: 2000,
            open_settle_ms: 100,
            cleanup_precheck_ms: 150,
            cleanup_lookup_ms: 500,
            cleanup_settle_ms: 150,
            action_cooldown_ms: 300,
            post_edit_reevaluate_ms: 300,
            detector_retry_ms: 999,
        }
    }
}

impl Timings {
    pub fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    /// Locator budget spread over `retry_delay_ms` steps.
    pub fn lookup(&self, budget_ms: u64) -> RetryPolicy {
        RetryPolicy::within(Duration::from_millis(budget_ms), Duration::from_millis(self.retry_delay_ms))
    }
}

/// How a panel's content is judged visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum VisibilityRule {
    /// The content node itself is rendered with non-zero extent.
    Rendered,
    /// Prefer a nested scrollable region with extent; fall back to the container.
    ScrollRegion { region: Descriptor },
}

/// Descriptor bundle for one panel kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelSpec {
    pub kind: PanelKind,
    pub activator: Descriptor,
    pub content: Vec<Descriptor>,
    /// Whether an activator's selected flag may stand in for content detection.
    #[serde(default = "default_true")]
    pub activator_fallback: bool,
    #[serde(default = "default_visibility")]
    pub visibility: VisibilityRule,
}

fn default_visibility() -> VisibilityRule {
    VisibilityRule::Rendered
}

fn default_true() -> bool {
    true
}

/// Structural anchors of the host layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutSpec {
    /// Region hosting the auxiliary panels.
    pub panel_region: Descriptor,
    pub main_view: Descriptor,
    pub main_view_container: Descriptor,
    pub main_content: Descriptor,
}

impl Default for LayoutSpec {
    fn default() -> Self {
        LayoutSpec {
            panel_region: descriptor(".Root__right-sidebar"),
            main_view: descriptor(".Root__main-view"),
            main_view_container: descriptor(".main-view-container"),
            main_content: descriptor(".os-content"),
        }
    }
}

/// Ordered panel catalog. Order is observation priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelCatalog {
    /// Attribute an activator carries while its panel is shown.
    pub selected_attribute: String,
    pub layout: LayoutSpec,
    pub panels: Vec<PanelSpec>,
}

impl Default for PanelCatalog {
    fn default() -> Self {
        PanelCatalog {
            panels: vec![
                PanelSpec {
                    kind: PanelKind::FriendActivity,
                    activator: descriptor(r#"button[aria-label="Friend Activity"]"#),
                    content: vec![descriptor(r#"aside[aria-label="Friend Activity"]"#)],
                    visibility: VisibilityRule::ScrollRegion {
                        region: descriptor(".main-buddyFeed-scrollableContainer"),
                    },
                    // The feed button's selected flag lingers after the panel closes.
                    activator_fallback: false,
                },
                PanelSpec {
                    kind: PanelKind::Queue,
                    activator: descriptor(r#"button[aria-label="Queue"]"#),
                    content: vec![descriptor(r#"aside[aria-label="Queue"]"#)],
                    visibility: VisibilityRule::Rendered,
                    activator_fallback: true,
                },
                PanelSpec {
                    kind: PanelKind::Connect,
                    activator: descriptor(r#"button[aria-label="Connect to a device"]"#),
                    content: vec![
                        descriptor(r#"aside[aria-label="Connect to a device"]"#),
                        descriptor(r#"div[aria-label="Connect to a device"][role="dialog"]"#),
                        descriptor(r#"div[aria-label="Devices Available"][role="dialog"]"#),
                    ],
                    visibility: VisibilityRule::Rendered,
                    activator_fallback: true,
                },
                PanelSpec {
                    kind: PanelKind::NowPlaying,
                    activator: descriptor(
                        r#"button[data-testid="control-button-npv"], button[aria-label="Now Playing view"], button[aria-label="Now playing view"]"#,
                    ),
                    content: vec![descriptor(
                        r#"aside[aria-label="Now Playing view"], aside[aria-label="Now playing view"]"#,
                    )],
                    visibility: VisibilityRule::Rendered,
                    activator_fallback: true,
                },
            ],
            layout: LayoutSpec::default(),
            selected_attribute: "aria-selected".to_string(),
        }
    }
}

impl PanelCatalog {
    pub fn spec(&self, kind: PanelKind) -> Option<&PanelSpec> {
        self.panels.iter().find(|p| p.kind == kind)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.panels.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "panel catalog must list at least one panel".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for panel in &self.panels {
            if !seen.insert(panel.kind) {
                return Err(ConfigError::ValidationFailed(format!(
                    "panel '{}' is listed more than once",
                    panel.kind
                )));
            }
            if panel.content.is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "panel '{}' has no content descriptor",
                    panel.kind
                )));
            }
        }
        if self.selected_attribute.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "selected_attribute cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete controller configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub timings: Timings,
    pub catalog: PanelCatalog,
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timings;
        if t.retry_delay_ms == 0 || t.readiness_poll_ms == 0 || t.sidebar_ready_poll_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "poll and retry delays must be positive".to_string(),
            ));
        }
        if t.startup_switch_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "startup_switch_attempts must be at least 1".to_string(),
            ));
        }
        self.catalog.validate()
    }
}
