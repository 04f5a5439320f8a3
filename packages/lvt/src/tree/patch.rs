//! Patches and patch application
//!
//! A patch is isomorphic to the tree it came from: only changed slots are
//! present, keyed by slot index. Whole-value slot patches carry the new
//! value (including statics for nested nodes); same-shape recursions carry
//! only the diverging slots; range slots carry an ordered edit script.

use std::collections::BTreeMap;

use crate::error::PatchError;

use super::{Node, Range, RangeChild, SlotValue};

/// Changed slots of one node, keyed by slot index.
///
/// `BTreeMap` keeps encoding deterministic.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodePatch {
    /// Diverging slots only
    pub slots: BTreeMap<usize, SlotPatch>,
}

impl NodePatch {
    /// A patch with no changes.
    pub fn empty() -> Self {
        NodePatch::default()
    }

    /// True when no slot changed.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// The change recorded for one slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotPatch {
    /// The whole value was replaced: primitive update, branch change, or
    /// a kind change (primitive ↔ node ↔ range)
    Value(SlotValue),
    /// Same-shape nested node, recursed slot-by-slot
    Node(NodePatch),
    /// Keyed range edit script; `keep` is implicit
    Range(Vec<RangeOp>),
}

/// One step of a range edit script.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeOp {
    /// Insert a new child at `at`
    Insert {
        /// Key of the new child
        key: String,
        /// Target index in the new order
        at: usize,
        /// The new child's slot values
        child: RangeChild,
    },
    /// Remove the child with `key`
    Delete {
        /// Key of the removed child
        key: String,
    },
    /// Move the child with `key` to index `to`
    Move {
        /// Key of the moved child
        key: String,
        /// Target index in the new order
        to: usize,
    },
    /// Patch the child with `key` in place
    Update {
        /// Key of the patched child
        key: String,
        /// Slot-level sub-patch
        patch: NodePatch,
    },
}

/// Apply `patch` to `prev`, producing the next tree.
///
/// Structural disagreements (unknown slots, kind mismatches, range children
/// with the wrong slot count) are reported as [`PatchError`]; a valid
/// `diff(prev, next)` output always applies cleanly (see the round-trip
/// tests).
pub fn apply_patch(prev: &Node, patch: &NodePatch) -> Result<Node, PatchError> {
    let mut next = prev.clone();
    apply_node(&mut next, patch)?;
    Ok(next)
}

fn apply_node(node: &mut Node, patch: &NodePatch) -> Result<(), PatchError> {
    for (&slot, change) in &patch.slots {
        let value = node
            .dynamics
            .get_mut(slot)
            .ok_or(PatchError::SlotOutOfRange(slot))?;
        apply_slot(slot, value, change)?;
    }
    Ok(())
}

fn apply_slot(slot: usize, value: &mut SlotValue, change: &SlotPatch) -> Result<(), PatchError> {
    match change {
        SlotPatch::Value(new) => {
            *value = new.clone();
            Ok(())
        }
        SlotPatch::Node(sub) => match value {
            SlotValue::Node(node) => apply_node(node, sub),
            other => Err(PatchError::KindMismatch {
                slot,
                message: format!("expected nested node, found {}", kind_name(other)),
            }),
        },
        SlotPatch::Range(ops) => match value {
            SlotValue::Range(range) => apply_range(range, ops),
            other => Err(PatchError::KindMismatch {
                slot,
                message: format!("expected range, found {}", kind_name(other)),
            }),
        },
    }
}

fn apply_range(range: &mut Range, ops: &[RangeOp]) -> Result<(), PatchError> {
    let expected = range.child_slots();
    for op in ops {
        match op {
            RangeOp::Delete { key } => {
                let at = range
                    .position(key)
                    .ok_or_else(|| PatchError::UnknownKey(key.clone()))?;
                range.children.remove(at);
            }
            RangeOp::Insert { key, at, child } => {
                if child.dynamics.len() != expected {
                    return Err(PatchError::ShapeMismatch {
                        expected,
                        got: child.dynamics.len(),
                    });
                }
                let at = (*at).min(range.children.len());
                let mut child = child.clone();
                child.key = key.clone();
                range.children.insert(at, child);
            }
            RangeOp::Move { key, to } => {
                let from = range
                    .position(key)
                    .ok_or_else(|| PatchError::UnknownKey(key.clone()))?;
                let child = range.children.remove(from);
                let to = (*to).min(range.children.len());
                range.children.insert(to, child);
            }
            RangeOp::Update { key, patch } => {
                let at = range
                    .position(key)
                    .ok_or_else(|| PatchError::UnknownKey(key.clone()))?;
                let child = &mut range.children[at];
                for (&slot, change) in &patch.slots {
                    let value = child
                        .dynamics
                        .get_mut(slot)
                        .ok_or(PatchError::SlotOutOfRange(slot))?;
                    apply_slot(slot, value, change)?;
                }
            }
        }
    }
    Ok(())
}

fn kind_name(value: &SlotValue) -> &'static str {
    match value {
        SlotValue::Text(_) => "text",
        SlotValue::Node(_) => "node",
        SlotValue::Range(_) => "range",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(keys: &[&str]) -> SlotValue {
        SlotValue::Range(Range {
            fragment_id: "root.0".into(),
            statics: vec!["<li>".to_string(), "</li>".to_string()].into(),
            children: keys
                .iter()
                .map(|k| RangeChild {
                    key: k.to_string(),
                    dynamics: vec![SlotValue::Text(k.to_string())],
                })
                .collect(),
        })
    }

    fn host(value: SlotValue) -> Node {
        Node {
            fragment_id: "root".into(),
            statics: vec!["<ul>".to_string(), "</ul>".to_string()].into(),
            dynamics: vec![value],
        }
    }

    fn keys(node: &Node) -> Vec<String> {
        match &node.dynamics[0] {
            SlotValue::Range(r) => r.children.iter().map(|c| c.key.clone()).collect(),
            _ => panic!("not a range"),
        }
    }

    #[test]
    fn test_apply_primitive_replacement() {
        let prev = Node {
            fragment_id: "root".into(),
            statics: vec!["<p>".to_string(), "</p>".to_string()].into(),
            dynamics: vec![SlotValue::Text("0".into())],
        };
        let mut patch = NodePatch::empty();
        patch
            .slots
            .insert(0, SlotPatch::Value(SlotValue::Text("1".into())));
        let next = apply_patch(&prev, &patch).unwrap();
        assert_eq!(next.to_html(), "<p>1</p>");
    }

    #[test]
    fn test_apply_range_move() {
        let prev = host(list(&["A", "B", "C"]));
        let mut patch = NodePatch::empty();
        patch.slots.insert(
            0,
            SlotPatch::Range(vec![RangeOp::Move { key: "C".into(), to: 0 }]),
        );
        let next = apply_patch(&prev, &patch).unwrap();
        assert_eq!(keys(&next), vec!["C", "A", "B"]);
    }

    #[test]
    fn test_apply_range_insert_shape_mismatch() {
        let prev = host(list(&["A"]));
        let mut patch = NodePatch::empty();
        patch.slots.insert(
            0,
            SlotPatch::Range(vec![RangeOp::Insert {
                key: "B".into(),
                at: 1,
                child: RangeChild { key: "B".into(), dynamics: vec![] },
            }]),
        );
        assert!(matches!(
            apply_patch(&prev, &patch),
            Err(PatchError::ShapeMismatch { expected: 1, got: 0 })
        ));
    }

    #[test]
    fn test_apply_unknown_slot() {
        let prev = host(list(&[]));
        let mut patch = NodePatch::empty();
        patch
            .slots
            .insert(7, SlotPatch::Value(SlotValue::Text(String::new())));
        assert!(matches!(
            apply_patch(&prev, &patch),
            Err(PatchError::SlotOutOfRange(7))
        ));
    }
}
