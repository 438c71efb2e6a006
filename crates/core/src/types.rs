//! Identifier vocabulary and payload types shared across the broker.
//!
//! Window, tree, and element ids are fixed-width integers by wire contract;
//! the element id is a composite that packs the owning sub-tree id into its
//! high bits (see [`composite`]).

use serde::{Deserialize, Serialize};

/// Addressable UI surface; the unit of operator registration.
pub type WindowId = i32;

/// Embedded sub-tree (card/widget) id, unique within a window.
pub type TreeId = u32;

/// Composite element id: sub-tree id in the high 32 bits, local id below.
pub type ElementId = i64;

/// Calling principal identity, compared by equality only.
pub type AuthToken = u32;

/// User session that owns a window connection.
pub type AccountId = i32;

/// Correlation id matching an asynchronous query to its callback.
pub type RequestId = u32;

/// Sentinel for "no window referenced".
pub const INVALID_WINDOW_ID: WindowId = -1;

/// Sentinel for "no element referenced" and for undefined ids in results.
pub const INVALID_ELEMENT_ID: ElementId = -1;

/// The window's primary tree. Embedded sub-trees use non-zero ids.
pub const MAIN_TREE_ID: TreeId = 0;

// ---------------------------------------------------------------------------
// Composite element id packing
// ---------------------------------------------------------------------------

/// Bit packing for composite element ids.
///
/// Routing and authorization both key off the tree id embedded in an element
/// id, so the encoding lives here instead of ad hoc shifts at call sites.
/// Sentinel ids (negative) carry no tree id; screen them before decoding.
pub mod composite {
    use super::{ElementId, TreeId};

    const TREE_SHIFT: u32 = 32;
    const LOCAL_MASK: i64 = 0xFFFF_FFFF;

    /// Pack a tree id and a tree-local element id into one composite id.
    pub fn encode(tree_id: TreeId, local_id: u32) -> ElementId {
        ((tree_id as i64) << TREE_SHIFT) | (local_id as i64 & LOCAL_MASK)
    }

    /// Split a composite id into (tree id, tree-local element id).
    pub fn decode(element_id: ElementId) -> (TreeId, u32) {
        (tree_of(element_id), (element_id & LOCAL_MASK) as u32)
    }

    /// The tree id embedded in a composite element id.
    pub fn tree_of(element_id: ElementId) -> TreeId {
        (element_id >> TREE_SHIFT) as TreeId
    }
}

// ---------------------------------------------------------------------------
// Query payloads
// ---------------------------------------------------------------------------

/// One node of a remote UI tree, described by an opaque attribute bag.
///
/// The broker routes and validates these; it never interprets `attributes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementInfo {
    pub element_id: ElementId,
    pub window_id: WindowId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ElementId>,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl ElementInfo {
    pub fn new(element_id: ElementId, window_id: WindowId) -> Self {
        Self {
            element_id,
            window_id,
            parent_id: None,
            attributes: serde_json::Value::Null,
        }
    }

    /// The sub-tree this element claims to belong to.
    pub fn tree_id(&self) -> TreeId {
        composite::tree_of(self.element_id)
    }
}

/// Prefetch hint forwarded to the remote operator with a search call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchMode {
    #[default]
    Default,
    Predecessors,
    Siblings,
    Children,
}

/// Every result kind the remote side can deliver for a pending request.
///
/// The remote callback interface is a set of per-query-kind completion
/// methods; collapsing them into one tagged union dispatched through one
/// channel keeps the exactly-once completion invariant in a single code path.
#[derive(Debug, Clone)]
pub enum QueryPayload {
    ElementsById(Vec<ElementInfo>),
    ElementsByText(Vec<ElementInfo>),
    FocusedElement(ElementInfo),
    FocusMove(ElementInfo),
    ActionResult(bool),
    CursorPosition(i32),
    ElementsByProperty(Vec<ElementInfo>),
}
