//! Observation Layer - which panel is the host showing right now?
//!
//! **Architecture**:
//! - Each panel kind is a [`Detector`] with a uniform `evidence()`.
//! - The [`Observer`] walks its detectors in priority order, twice:
//!   1. content pass: a rendered, visible content node is authoritative
//!   2. activator pass: a "selected" flag on the panel's button, used only when
//!      no content matched, and only for detectors that allow it
//!
//! The result is recomputed from the live tree on every call.

use crate::config::{PanelCatalog, PanelSpec, VisibilityRule};
use crate::host::{Descriptor, HostTree};
use crate::models::{ObservedState, PanelKind};

/// Which signal an evidence pass looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidencePass {
    Content,
    Activator,
}

/// Outcome of probing one detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// Content node visible (and, for scroll-region panels, its region too).
    Content,
    /// Content container visible but the preferred inner region is empty.
    ContentContainer,
    /// The activator carries the selected flag.
    Selected,
    NoMatch,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        !matches!(self, MatchResult::NoMatch)
    }
}

/// A single observed panel with the evidence that identified it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub panel: PanelKind,
    pub evidence: MatchResult,
}

/// Detects whether one panel kind is active.
pub trait Detector: Send + Sync {
    fn kind(&self) -> PanelKind;

    fn evidence(&self, host: &dyn HostTree, pass: EvidencePass) -> MatchResult;

    /// Direct content check, bypassing priority order.
    fn content_visible(&self, host: &dyn HostTree) -> bool {
        self.evidence(host, EvidencePass::Content).is_match()
    }

    fn activator(&self) -> &Descriptor;
}

/// Descriptor-driven detector built from a catalog entry.
pub struct PanelDetector {
    spec: PanelSpec,
    selected_attribute: String,
}

impl PanelDetector {
    pub fn new(spec: PanelSpec, selected_attribute: impl Into<String>) -> Self {
        PanelDetector {
            spec,
            selected_attribute: selected_attribute.into(),
        }
    }

    fn inspect_content(&self, host: &dyn HostTree) -> MatchResult {
        for descriptor in &self.spec.content {
            let node = match host.query(descriptor, None) {
                Some(node) => node,
                None => continue,
            };
            let snapshot = match host.inspect(node) {
                Some(s) if s.is_visible() => s,
                _ => continue,
            };
            return match &self.spec.visibility {
                VisibilityRule::Rendered => MatchResult::Content,
                VisibilityRule::ScrollRegion { region } => {
                    let scrollable = host
                        .query(region, Some(snapshot.id))
                        .and_then(|n| host.inspect(n))
                        .map(|s| s.rendered && s.height > 0.0)
                        .unwrap_or(false);
                    log::trace!(
                        target: "pinned_panel::observe",
                        "{} container visible, scroll region populated: {}",
                        self.spec.kind,
                        scrollable
                    );
                    if scrollable {
                        MatchResult::Content
                    } else {
                        MatchResult::ContentContainer
                    }
                }
            };
        }
        MatchResult::NoMatch
    }

    fn inspect_activator(&self, host: &dyn HostTree) -> MatchResult {
        if !self.spec.activator_fallback {
            return MatchResult::NoMatch;
        }
        // Only the first alternative is trusted for the selected flag.
        let primary = self.spec.activator.primary();
        host.query(&primary, None)
            .and_then(|n| host.inspect(n))
            .filter(|s| s.flag(&self.selected_attribute))
            .map(|_| MatchResult::Selected)
            .unwrap_or(MatchResult::NoMatch)
    }
}

impl Detector for PanelDetector {
    fn kind(&self) -> PanelKind {
        self.spec.kind
    }

    fn evidence(&self, host: &dyn HostTree, pass: EvidencePass) -> MatchResult {
        match pass {
            EvidencePass::Content => self.inspect_content(host),
            EvidencePass::Activator => self.inspect_activator(host),
        }
    }

    fn activator(&self) -> &Descriptor {
        &self.spec.activator
    }
}

/// Ordered detector list; derives the single active panel.
pub struct Observer {
    detectors: Vec<Box<dyn Detector>>,
}

impl Observer {
    pub fn new(detectors: Vec<Box<dyn Detector>>) -> Self {
        Observer { detectors }
    }

    pub fn from_catalog(catalog: &PanelCatalog) -> Self {
        let detectors = catalog
            .panels
            .iter()
            .map(|spec| {
                Box::new(PanelDetector::new(spec.clone(), catalog.selected_attribute.clone()))
                    as Box<dyn Detector>
            })
            .collect();
        Observer::new(detectors)
    }

    /// Append a detector at the lowest priority.
    pub fn push(&mut self, detector: Box<dyn Detector>) {
        self.detectors.push(detector);
    }

    pub fn detector(&self, kind: PanelKind) -> Option<&dyn Detector> {
        self.detectors.iter().find(|d| d.kind() == kind).map(|d| d.as_ref())
    }

    /// The active panel and the evidence for it.
    pub fn observe_detailed(&self, host: &dyn HostTree) -> Option<Observation> {
        for pass in [EvidencePass::Content, EvidencePass::Activator] {
            for detector in &self.detectors {
                let evidence = detector.evidence(host, pass);
                if evidence.is_match() {
                    log::debug!(
                        target: "pinned_panel::observe",
                        "Active panel: {} ({:?})",
                        detector.kind(),
                        evidence
                    );
                    return Some(Observation {
                        panel: detector.kind(),
                        evidence,
                    });
                }
            }
        }
        log::debug!(target: "pinned_panel::observe", "No active panel detected");
        None
    }

    pub fn observe(&self, host: &dyn HostTree) -> ObservedState {
        self.observe_detailed(host).map(|o| o.panel)
    }

    /// Content visibility of one kind, ignoring every other panel.
    pub fn content_visible(&self, host: &dyn HostTree, kind: PanelKind) -> bool {
        self.detector(kind).map(|d| d.content_visible(host)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{SimulatedHost, SimulatedHostOptions};

    fn setup(options: SimulatedHostOptions) -> (SimulatedHost, Observer) {
        let host = SimulatedHost::new(SimulatedHostOptions {
            render_delays: Vec::new(),
            ..options
        });
        (host, Observer::from_catalog(&PanelCatalog::default()))
    }

    #[test]
    fn test_nothing_open() {
        let (host, observer) = setup(SimulatedHostOptions::default());
        assert_eq!(observer.observe(&host), None);
    }

    #[test]
    fn test_content_detection_per_kind() {
        let (host, observer) = setup(SimulatedHostOptions::default());
        for kind in PanelKind::ALL {
            host.open_now(kind);
            assert_eq!(observer.observe(&host), Some(kind));
        }
    }

    #[test]
    fn test_priority_breaks_ties() {
        let (host, observer) = setup(SimulatedHostOptions::default());
        host.open_now(PanelKind::NowPlaying);
        host.open_alongside(PanelKind::Queue);
        assert_eq!(observer.observe(&host), Some(PanelKind::Queue));
        assert!(observer.content_visible(&host, PanelKind::NowPlaying));
    }

    #[test]
    fn test_friend_feed_falls_back_to_container() {
        let (host, observer) = setup(SimulatedHostOptions::default());
        host.open_now(PanelKind::FriendActivity);
        let detailed = observer.observe_detailed(&host).unwrap();
        assert_eq!(detailed.evidence, MatchResult::Content);

        host.collapse_friend_feed();
        let detailed = observer.observe_detailed(&host).unwrap();
        assert_eq!(detailed.panel, PanelKind::FriendActivity);
        assert_eq!(detailed.evidence, MatchResult::ContentContainer);
    }

    #[test]
    fn test_hidden_content_is_not_active() {
        let (host, observer) = setup(SimulatedHostOptions::default());
        host.open_now(PanelKind::Queue);
        host.set_content_hidden(PanelKind::Queue, true);
        host.set_activator_selected(PanelKind::Queue, false);
        assert_eq!(observer.observe(&host), None);
    }

    #[test]
    fn test_activator_fallback_when_content_missing() {
        let (host, observer) = setup(SimulatedHostOptions::default());
        host.set_activator_selected(PanelKind::Connect, true);
        let detailed = observer.observe_detailed(&host).unwrap();
        assert_eq!(detailed.panel, PanelKind::Connect);
        assert_eq!(detailed.evidence, MatchResult::Selected);
    }

    #[test]
    fn test_content_pass_beats_higher_priority_activator() {
        let (host, observer) = setup(SimulatedHostOptions::default());
        host.set_activator_selected(PanelKind::Queue, true);
        host.open_alongside(PanelKind::NowPlaying);
        assert_eq!(observer.observe(&host), Some(PanelKind::NowPlaying));
    }

    #[test]
    fn test_friend_activity_skipped_in_activator_pass() {
        let (host, observer) = setup(SimulatedHostOptions {
            stale_friend_activity_selection: true,
            ..SimulatedHostOptions::default()
        });
        host.set_activator_selected(PanelKind::FriendActivity, true);
        assert_eq!(observer.observe(&host), None);
    }

    #[test]
    fn test_activator_pass_uses_primary_alternative_only() {
        let mut catalog = PanelCatalog::default();
        // Put a never-matching alternative first for Now Playing.
        if let Some(spec) = catalog.panels.iter_mut().find(|p| p.kind == PanelKind::NowPlaying) {
            spec.activator = Descriptor::parse(
                r#"button[data-testid="legacy-npv"], button[aria-label="Now Playing view"]"#,
            )
            .unwrap();
        }
        let observer = Observer::from_catalog(&catalog);
        let (host, _) = setup(SimulatedHostOptions::default());
        host.set_activator_selected(PanelKind::NowPlaying, true);
        assert_eq!(observer.observe(&host), None);
    }

    struct AlwaysVisible(Descriptor);

    impl Detector for AlwaysVisible {
        fn kind(&self) -> PanelKind {
            PanelKind::Connect
        }
        fn evidence(&self, _host: &dyn HostTree, pass: EvidencePass) -> MatchResult {
            match pass {
                EvidencePass::Content => MatchResult::Content,
                EvidencePass::Activator => MatchResult::NoMatch,
            }
        }
        fn activator(&self) -> &Descriptor {
            &self.0
        }
    }

    #[test]
    fn test_appended_detector_has_lowest_priority() {
        let (host, mut observer) = setup(SimulatedHostOptions::default());
        observer.push(Box::new(AlwaysVisible(Descriptor::parse("button").unwrap())));
        assert_eq!(observer.observe(&host), Some(PanelKind::Connect));
        host.open_now(PanelKind::Queue);
        assert_eq!(observer.observe(&host), Some(PanelKind::Queue));
    }
}
