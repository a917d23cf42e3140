//! Simulated host: an in-memory UI tree that honors the activation contract.
//!
//! The layout mirrors the host application the controller was written for:
//!
//! ```text
//! body
//!  +- header            button[aria-label="Friend Activity"]
//!  +- div.Root__main-view
//!  |   +- div.main-view-container
//!  |       +- div.os-content
//!  +- footer            Queue / Connect / Now Playing activators
//!  +- div.Root__right-sidebar
//!      +- aside[aria-label=...]   (only while a panel is open)
//! ```
//!
//! Activating a panel's button toggles that panel after a render delay. Panels
//! are mutually exclusive, except for the quirks below which reproduce the
//! host's incidental Now Playing behaviour. All changes made by one activation
//! land as a single mutation batch.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use super::descriptor::ElementView;
use super::{Descriptor, HostTree, MutationRecord, MutationStream, NodeId, NodeSnapshot, WatchOptions};
use crate::error::HostError;
use crate::models::PanelKind;

const PANEL_WIDTH: f32 = 320.0;
const PANEL_HEIGHT: f32 = 720.0;

/// Behaviour switches for the simulated host.
#[derive(Debug, Clone)]
pub struct SimulatedHostOptions {
    /// Render delays applied to successive activations, cycled. Empty means immediate.
    pub render_delays: Vec<Duration>,
    /// Closing any other panel makes Now Playing appear.
    pub reveal_now_playing_on_close: bool,
    /// Now Playing stays rendered when another panel opens.
    pub now_playing_persists: bool,
    /// The Friend Activity button keeps `aria-selected="true"` after its panel closes.
    pub stale_friend_activity_selection: bool,
    /// The Friend Activity feed's scrollable region is rendered with height.
    pub friend_feed_scroll_region: bool,
    pub ready: bool,
}

impl Default for SimulatedHostOptions {
    fn default() -> Self {
        SimulatedHostOptions {
            render_delays: vec![Duration::from_millis(60)],
            reveal_now_playing_on_close: false,
            now_playing_persists: false,
            stale_friend_activity_selection: false,
            friend_feed_scroll_region: true,
            ready: true,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attributes: BTreeMap<String, String>,
    parent: Option<usize>,
    children: Vec<usize>,
    display_none: bool,
    width: f32,
    height: f32,
}

impl ElementView for Node {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct PanelNodes {
    activator: usize,
    activator_home: usize,
    content: usize,
}

struct Watcher {
    target: usize,
    options: WatchOptions,
    tx: mpsc::UnboundedSender<Vec<MutationRecord>>,
}

struct SimState {
    nodes: Vec<Node>,
    root: usize,
    sidebar: usize,
    main_content: usize,
    panels: HashMap<PanelKind, PanelNodes>,
    open: BTreeSet<PanelKind>,
    watchers: Vec<Watcher>,
    activations: Vec<PanelKind>,
    delay_cursor: usize,
    ready: bool,
    pending: Vec<MutationRecord>,
}

impl SimState {
    fn add_node(&mut self, parent: Option<usize>, tag: &str, attrs: &[(&str, &str)]) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            tag: tag.to_string(),
            attributes: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            parent,
            children: Vec::new(),
            display_none: false,
            width: 0.0,
            height: 0.0,
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(id);
        }
        id
    }

    fn is_attached(&self, mut id: usize) -> bool {
        loop {
            if id == self.root {
                return true;
            }
            match self.nodes[id].parent {
                Some(p) => id = p,
                None => return false,
            }
        }
    }

    fn is_rendered(&self, id: usize) -> bool {
        if !self.is_attached(id) {
            return false;
        }
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            if self.nodes[c].display_none {
                return false;
            }
            cursor = self.nodes[c].parent;
        }
        true
    }

    fn is_ancestor(&self, ancestor: usize, mut id: usize) -> bool {
        while let Some(p) = self.nodes[id].parent {
            if p == ancestor {
                return true;
            }
            id = p;
        }
        false
    }

    fn attach(&mut self, child: usize, parent: usize) {
        if self.nodes[child].parent.is_some() {
            return;
        }
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
        self.pending.push(MutationRecord::ChildList { target: NodeId(parent) });
    }

    fn detach(&mut self, child: usize) {
        if let Some(parent) = self.nodes[child].parent.take() {
            self.nodes[parent].children.retain(|c| *c != child);
            self.pending.push(MutationRecord::ChildList { target: NodeId(parent) });
        }
    }

    fn set_attribute(&mut self, id: usize, name: &str, value: &str) {
        let previous = self.nodes[id].attributes.insert(name.to_string(), value.to_string());
        if previous.as_deref() != Some(value) {
            self.pending.push(MutationRecord::Attribute {
                target: NodeId(id),
                name: name.to_string(),
            });
        }
    }

    fn open_panel(&mut self, kind: PanelKind) {
        if let Some(nodes) = self.panels.get(&kind).copied() {
            let sidebar = self.sidebar;
            self.attach(nodes.content, sidebar);
            self.set_attribute(nodes.activator, "aria-selected", "true");
            self.open.insert(kind);
        }
    }

    fn close_panel(&mut self, kind: PanelKind, keep_stale_selection: bool) {
        if let Some(nodes) = self.panels.get(&kind).copied() {
            self.detach(nodes.content);
            if !keep_stale_selection {
                self.set_attribute(nodes.activator, "aria-selected", "false");
            }
            self.open.remove(&kind);
        }
    }

    fn toggle(&mut self, kind: PanelKind, options: &SimulatedHostOptions) {
        if self.open.contains(&kind) {
            let stale = kind == PanelKind::FriendActivity && options.stale_friend_activity_selection;
            self.close_panel(kind, stale);
            if options.reveal_now_playing_on_close && kind != PanelKind::NowPlaying {
                self.open_panel(PanelKind::NowPlaying);
            }
            return;
        }
        let others: Vec<PanelKind> = self.open.iter().copied().filter(|k| *k != kind).collect();
        for other in others {
            if other == PanelKind::NowPlaying && options.now_playing_persists {
                continue;
            }
            let stale = other == PanelKind::FriendActivity && options.stale_friend_activity_selection;
            self.close_panel(other, stale);
        }
        self.open_panel(kind);
    }

    /// Deliver everything recorded since the last flush as one batch per watcher.
    fn flush(&mut self) {
        let records = std::mem::take(&mut self.pending);
        if records.is_empty() {
            return;
        }
        self.watchers.retain(|w| !w.tx.is_closed());
        let mut deliveries = Vec::new();
        for (index, watcher) in self.watchers.iter().enumerate() {
            let batch: Vec<MutationRecord> = records
                .iter()
                .filter(|r| {
                    let node = r.target().0;
                    let is_target = node == watcher.target;
                    (is_target || self.is_ancestor(watcher.target, node))
                        && watcher.options.accepts(r, is_target)
                })
                .cloned()
                .collect();
            if !batch.is_empty() {
                deliveries.push((index, batch));
            }
        }
        for (index, batch) in deliveries {
            let _ = self.watchers[index].tx.send(batch);
        }
    }

    fn panel_for_activator(&self, id: usize) -> Option<PanelKind> {
        self.panels
            .iter()
            .find(|(_, nodes)| nodes.activator == id)
            .map(|(kind, _)| *kind)
    }
}

/// In-memory host used by the demo binary and the test suite.
#[derive(Clone)]
pub struct SimulatedHost {
    state: Arc<Mutex<SimState>>,
    options: Arc<SimulatedHostOptions>,
}

impl SimulatedHost {
    pub fn new(options: SimulatedHostOptions) -> Self {
        let mut s = SimState {
            nodes: Vec::new(),
            root: 0,
            sidebar: 0,
            main_content: 0,
            panels: HashMap::new(),
            open: BTreeSet::new(),
            watchers: Vec::new(),
            activations: Vec::new(),
            delay_cursor: 0,
            ready: options.ready,
            pending: Vec::new(),
        };

        let root = s.add_node(None, "body", &[]);
        s.root = root;
        let header = s.add_node(Some(root), "header", &[]);
        let main_view = s.add_node(Some(root), "div", &[("class", "Root__main-view")]);
        let container = s.add_node(Some(main_view), "div", &[("class", "main-view-container")]);
        let main_content = s.add_node(Some(container), "div", &[("class", "os-content")]);
        s.main_content = main_content;
        let footer = s.add_node(Some(root), "footer", &[]);
        let sidebar = s.add_node(Some(root), "div", &[("class", "Root__right-sidebar")]);
        s.sidebar = sidebar;

        let fa_button = s.add_node(Some(header), "button", &[("aria-label", "Friend Activity")]);
        let queue_button = s.add_node(Some(footer), "button", &[("aria-label", "Queue")]);
        let connect_button = s.add_node(Some(footer), "button", &[("aria-label", "Connect to a device")]);
        let npv_button = s.add_node(
            Some(footer),
            "button",
            &[("data-testid", "control-button-npv"), ("aria-label", "Now Playing view")],
        );

        let fa_content = s.add_node(None, "aside", &[("aria-label", "Friend Activity")]);
        let feed = s.add_node(Some(fa_content), "div", &[("class", "main-buddyFeed-scrollableContainer")]);
        if options.friend_feed_scroll_region {
            s.nodes[feed].width = PANEL_WIDTH;
            s.nodes[feed].height = PANEL_HEIGHT - 80.0;
        }
        let queue_content = s.add_node(None, "aside", &[("aria-label", "Queue")]);
        let connect_content = s.add_node(None, "aside", &[("aria-label", "Connect to a device")]);
        let npv_content = s.add_node(None, "aside", &[("aria-label", "Now Playing view")]);

        for (kind, activator, home, content) in [
            (PanelKind::FriendActivity, fa_button, header, fa_content),
            (PanelKind::Queue, queue_button, footer, queue_content),
            (PanelKind::Connect, connect_button, footer, connect_content),
            (PanelKind::NowPlaying, npv_button, footer, npv_content),
        ] {
            s.nodes[activator].width = 32.0;
            s.nodes[activator].height = 32.0;
            s.nodes[content].width = PANEL_WIDTH;
            s.nodes[content].height = PANEL_HEIGHT;
            s.panels.insert(
                kind,
                PanelNodes {
                    activator,
                    activator_home: home,
                    content,
                },
            );
        }

        SimulatedHost {
            state: Arc::new(Mutex::new(s)),
            options: Arc::new(options),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_delay(&self) -> Duration {
        let mut s = self.state();
        if self.options.render_delays.is_empty() {
            return Duration::ZERO;
        }
        let delay = self.options.render_delays[s.delay_cursor % self.options.render_delays.len()];
        s.delay_cursor += 1;
        delay
    }

    fn schedule_toggle(&self, kind: PanelKind) {
        let delay = self.next_delay();
        let apply = {
            let host = self.clone();
            move || {
                let mut s = host.state();
                s.toggle(kind, &host.options);
                s.flush();
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) if !delay.is_zero() => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    apply();
                });
            }
            _ => apply(),
        }
    }

    /// Simulate the user clicking a panel's button. Not recorded as a synthetic activation.
    pub fn user_toggle(&self, kind: PanelKind) {
        self.schedule_toggle(kind);
    }

    /// Put a panel into the open state at once, as if the host restored it.
    pub fn open_now(&self, kind: PanelKind) {
        let mut s = self.state();
        let others: Vec<PanelKind> = s.open.iter().copied().filter(|k| *k != kind).collect();
        for other in others {
            s.close_panel(other, false);
        }
        s.open_panel(kind);
        s.flush();
    }

    /// Open an extra panel alongside whatever is already open.
    pub fn open_alongside(&self, kind: PanelKind) {
        let mut s = self.state();
        s.open_panel(kind);
        s.flush();
    }

    pub fn close_now(&self, kind: PanelKind) {
        let mut s = self.state();
        s.close_panel(kind, false);
        s.flush();
    }

    /// Hide or show an open panel's content with inline `display: none`.
    pub fn set_content_hidden(&self, kind: PanelKind, hidden: bool) {
        let mut s = self.state();
        if let Some(nodes) = s.panels.get(&kind).copied() {
            s.nodes[nodes.content].display_none = hidden;
            s.set_attribute(nodes.content, "style", if hidden { "display: none" } else { "" });
            s.flush();
        }
    }

    /// Collapse the friend feed's scrollable region to zero height.
    pub fn collapse_friend_feed(&self) {
        let mut s = self.state();
        if let Some(nodes) = s.panels.get(&PanelKind::FriendActivity).copied() {
            let feed = s.nodes[nodes.content].children.first().copied();
            if let Some(feed) = feed {
                s.nodes[feed].height = 0.0;
            }
        }
    }

    /// Remove a panel's activator from the tree (the host hid the button).
    pub fn remove_activator(&self, kind: PanelKind) {
        let mut s = self.state();
        if let Some(nodes) = s.panels.get(&kind).copied() {
            s.detach(nodes.activator);
            s.flush();
        }
    }

    pub fn restore_activator(&self, kind: PanelKind) {
        let mut s = self.state();
        if let Some(nodes) = s.panels.get(&kind).copied() {
            s.attach(nodes.activator, nodes.activator_home);
            s.flush();
        }
    }

    /// Drop the panel region out of the tree, as the host does while it rebuilds
    /// its layout. Watches on the region are disconnected.
    pub fn detach_panel_region(&self) {
        let mut s = self.state();
        let sidebar = s.sidebar;
        s.detach(sidebar);
        s.watchers.retain(|w| w.target != sidebar);
        s.flush();
    }

    pub fn restore_panel_region(&self) {
        let mut s = self.state();
        let (sidebar, root) = (s.sidebar, s.root);
        s.attach(sidebar, root);
        s.flush();
    }

    /// Set a flag attribute on a panel's activator without changing the panel.
    pub fn set_activator_selected(&self, kind: PanelKind, selected: bool) {
        let mut s = self.state();
        if let Some(nodes) = s.panels.get(&kind).copied() {
            s.set_attribute(nodes.activator, "aria-selected", if selected { "true" } else { "false" });
            s.flush();
        }
    }

    /// Mutate the main content area without touching any panel.
    pub fn touch_main_content(&self) {
        let mut s = self.state();
        let parent = s.main_content;
        let child = s.add_node(None, "div", &[("class", "route-card")]);
        s.attach(child, parent);
        s.flush();
    }

    pub fn set_ready(&self, ready: bool) {
        self.state().ready = ready;
    }

    /// Panels whose content is currently attached, in priority order.
    pub fn open_panels(&self) -> Vec<PanelKind> {
        self.state().open.iter().copied().collect()
    }

    /// Panels activated through [`HostTree::activate`], in order.
    pub fn activations(&self) -> Vec<PanelKind> {
        self.state().activations.clone()
    }

    pub fn activation_count(&self) -> usize {
        self.state().activations.len()
    }

    pub fn watcher_count(&self) -> usize {
        let mut s = self.state();
        s.watchers.retain(|w| !w.tx.is_closed());
        s.watchers.len()
    }
}

impl HostTree for SimulatedHost {
    fn query(&self, descriptor: &Descriptor, scope: Option<NodeId>) -> Option<NodeId> {
        let s = self.state();
        let start = scope.map(|n| n.0).unwrap_or(s.root);
        if start >= s.nodes.len() || !s.is_attached(start) {
            return None;
        }
        // Pre-order walk of descendants, like querySelector.
        let mut stack: Vec<usize> = s.nodes[start].children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if descriptor.matches(&s.nodes[id]) {
                return Some(NodeId(id));
            }
            stack.extend(s.nodes[id].children.iter().rev().copied());
        }
        None
    }

    fn inspect(&self, node: NodeId) -> Option<NodeSnapshot> {
        let s = self.state();
        let n = s.nodes.get(node.0)?;
        let rendered = s.is_rendered(node.0);
        Some(NodeSnapshot {
            id: node,
            tag: n.tag.clone(),
            attributes: n.attributes.clone(),
            rendered,
            display_none: n.display_none,
            width: if rendered { n.width } else { 0.0 },
            height: if rendered { n.height } else { 0.0 },
        })
    }

    fn activate(&self, node: NodeId) -> Result<(), HostError> {
        let kind = {
            let mut s = self.state();
            if node.0 >= s.nodes.len() {
                return Err(HostError::UnknownNode(node.0));
            }
            if !s.is_attached(node.0) {
                return Err(HostError::Detached(node.0));
            }
            let kind = s.panel_for_activator(node.0).ok_or_else(|| {
                HostError::ActivationRejected(format!("node {} is not a panel activator", node))
            })?;
            s.activations.push(kind);
            kind
        };
        self.schedule_toggle(kind);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.state().ready
    }

    fn observe(&self, target: NodeId, options: WatchOptions) -> Result<MutationStream, HostError> {
        let mut s = self.state();
        if target.0 >= s.nodes.len() {
            return Err(HostError::UnknownNode(target.0));
        }
        if !s.is_attached(target.0) {
            return Err(HostError::NotObservable(format!("node {} is detached", target)));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        s.watchers.push(Watcher {
            target: target.0,
            options,
            tx,
        });
        Ok(rx)
    }
}
