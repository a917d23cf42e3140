//! Host Module - the seam between the controller and the application it steers
//!
//! The controller never owns the host's UI tree. It can only:
//! - query nodes by [`Descriptor`]
//! - inspect a node's rendering state through a [`NodeSnapshot`]
//! - send a synthetic activation to a node
//! - subscribe to batches of structural/attribute mutations
//!
//! There is no confirmation API: an activation is fire-and-forget, and the host
//! re-renders after a short, variable delay.

pub mod descriptor;
pub mod sim;

use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::mpsc;

use crate::error::HostError;

pub use descriptor::{Descriptor, ElementView};
pub use sim::{SimulatedHost, SimulatedHostOptions};

/// Opaque handle to a node in the host tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Point-in-time view of a node's rendering state.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    /// Attached to the render tree (has an offset parent).
    pub rendered: bool,
    /// Inline `display: none`.
    pub display_none: bool,
    pub width: f32,
    pub height: f32,
}

impl NodeSnapshot {
    /// Rendered, not explicitly hidden, and with a non-zero bounding extent.
    pub fn is_visible(&self) -> bool {
        self.rendered && !self.display_none && (self.width > 0.0 || self.height > 0.0)
    }

    /// True if the node carries `aria-selected="true"` (or another flag attribute set to "true").
    pub fn flag(&self, attribute: &str) -> bool {
        self.attributes.get(attribute).map(|v| v == "true").unwrap_or(false)
    }
}

impl ElementView for NodeSnapshot {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|v| v.as_str())
    }
}

/// What a watch subscription reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchOptions {
    pub child_list: bool,
    pub subtree: bool,
    pub attributes: bool,
    /// Restrict attribute records to these names; `None` reports all.
    pub attribute_filter: Option<Vec<String>>,
}

impl WatchOptions {
    pub fn structure() -> Self {
        WatchOptions {
            child_list: true,
            subtree: true,
            ..WatchOptions::default()
        }
    }

    pub fn structure_and_attributes(filter: &[&str]) -> Self {
        WatchOptions {
            child_list: true,
            subtree: true,
            attributes: true,
            attribute_filter: Some(filter.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// Decide whether a record about `node`, observed from `target`, is reported.
    pub fn accepts(&self, record: &MutationRecord, target_is_node: bool) -> bool {
        if !target_is_node && !self.subtree {
            return false;
        }
        match record {
            MutationRecord::ChildList { .. } => self.child_list,
            MutationRecord::Attribute { name, .. } => {
                self.attributes
                    && self
                        .attribute_filter
                        .as_ref()
                        .map(|f| f.iter().any(|n| n == name))
                        .unwrap_or(true)
            }
        }
    }
}

/// A single mutation reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    ChildList { target: NodeId },
    Attribute { target: NodeId, name: String },
}

impl MutationRecord {
    pub fn target(&self) -> NodeId {
        match self {
            MutationRecord::ChildList { target } | MutationRecord::Attribute { target, .. } => *target,
        }
    }
}

/// Stream of mutation batches. Dropping the receiver disconnects the watch.
pub type MutationStream = mpsc::UnboundedReceiver<Vec<MutationRecord>>;

/// Trait for host tree access
///
/// All reads are synchronous snapshots of the live tree. `activate` only
/// dispatches the event; its effect lands later, asynchronously.
pub trait HostTree: Send + Sync {
    /// First node (document order) matching the descriptor within `scope`,
    /// or within the whole document when `scope` is `None`.
    fn query(&self, descriptor: &Descriptor, scope: Option<NodeId>) -> Option<NodeId>;

    /// Current rendering state of a node, `None` if it no longer exists.
    fn inspect(&self, node: NodeId) -> Option<NodeSnapshot>;

    /// Dispatch a synthetic activation (click) on a node.
    fn activate(&self, node: NodeId) -> Result<(), HostError>;

    /// Platform initialized and document fully loaded.
    fn is_ready(&self) -> bool;

    /// Subscribe to mutations at or below `target`.
    fn observe(&self, target: NodeId, options: WatchOptions) -> Result<MutationStream, HostError>;
}
