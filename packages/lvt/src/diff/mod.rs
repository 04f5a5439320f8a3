//! Diffing
//!
//! Computes the minimal patch between two renders of the same compiled
//! shape. Non-range slots diff in `O(|tree|)`; range slots produce a keyed
//! edit script in `O(n log n)`: keys are matched by equality, and a
//! longest-increasing-subsequence pass keeps the largest stable set in
//! place so a pure permutation yields only `move` ops.

use std::collections::{HashMap, HashSet};

use crate::tree::{Node, NodePatch, Range, RangeOp, SlotPatch, SlotValue};

/// The result of a diff: the patch plus the fragments it touches.
#[derive(Debug, Clone, PartialEq)]
pub struct Diff {
    /// Changed slots, isomorphic to the tree
    pub patch: NodePatch,
    /// Fragment IDs with at least one changed slot, innermost first
    pub affected: Vec<String>,
}

impl Diff {
    /// True when the two renders were identical.
    pub fn is_empty(&self) -> bool {
        self.patch.is_empty()
    }
}

/// Diff two renders of the same shape.
///
/// `diff(r, r)` is empty; `apply_patch(r1, diff(r1, r2).patch) == r2`.
pub fn diff(prev: &Node, next: &Node) -> Diff {
    let mut affected = Vec::new();
    let patch = diff_node(prev, next, &mut affected).unwrap_or_default();
    Diff { patch, affected }
}

fn diff_node(prev: &Node, next: &Node, affected: &mut Vec<String>) -> Option<NodePatch> {
    debug_assert_eq!(prev.dynamics.len(), next.dynamics.len());
    let patch = diff_dynamics(&prev.dynamics, &next.dynamics, affected)?;
    affected.push(prev.fragment_id.to_string());
    Some(patch)
}

fn diff_dynamics(
    prev: &[SlotValue],
    next: &[SlotValue],
    affected: &mut Vec<String>,
) -> Option<NodePatch> {
    let mut patch = NodePatch::empty();
    for (slot, (p, n)) in prev.iter().zip(next).enumerate() {
        if let Some(change) = diff_slot(p, n, affected) {
            patch.slots.insert(slot, change);
        }
    }
    (!patch.is_empty()).then_some(patch)
}

fn diff_slot(prev: &SlotValue, next: &SlotValue, affected: &mut Vec<String>) -> Option<SlotPatch> {
    match (prev, next) {
        // Primitive vs primitive: emit on any difference, including
        // empty-to-non-empty, so the client clears stale text.
        (SlotValue::Text(p), SlotValue::Text(n)) => {
            (p != n).then(|| SlotPatch::Value(SlotValue::Text(n.clone())))
        }
        // Same shape: recurse slot-by-slot. A different statics array means
        // the conditional took the other branch: replace the whole slot,
        // never diff across branches.
        (SlotValue::Node(p), SlotValue::Node(n)) => {
            if p.statics == n.statics {
                diff_node(p, n, affected).map(SlotPatch::Node)
            } else {
                Some(SlotPatch::Value(SlotValue::Node(n.clone())))
            }
        }
        (SlotValue::Range(p), SlotValue::Range(n)) => {
            if p.statics == n.statics {
                let ops = diff_range(p, n, affected);
                if ops.is_empty() {
                    None
                } else {
                    affected.push(p.fragment_id.to_string());
                    Some(SlotPatch::Range(ops))
                }
            } else {
                Some(SlotPatch::Value(SlotValue::Range(n.clone())))
            }
        }
        // Kind change (primitive ↔ node ↔ range): always emitted whole.
        (_, n) => Some(SlotPatch::Value(n.clone())),
    }
}

/// Keyed range diff: deletes, minimal moves (LIS), inserts, then in-place
/// child updates. `keep` is implicit; unmentioned keys stay put.
fn diff_range(prev: &Range, next: &Range, affected: &mut Vec<String>) -> Vec<RangeOp> {
    let old_index: HashMap<&str, usize> = prev
        .children
        .iter()
        .enumerate()
        .map(|(i, c)| (c.key.as_str(), i))
        .collect();
    let new_keys: HashSet<&str> = next.children.iter().map(|c| c.key.as_str()).collect();

    let mut ops = Vec::new();

    for child in &prev.children {
        if !new_keys.contains(child.key.as_str()) {
            ops.push(RangeOp::Delete { key: child.key.clone() });
        }
    }

    // Old indices of the kept children, in new order; the LIS of that
    // sequence is the largest set that can stay untouched.
    let kept_old: Vec<usize> = next
        .children
        .iter()
        .filter_map(|c| old_index.get(c.key.as_str()).copied())
        .collect();
    let stable = lis_positions(&kept_old);

    let mut kept_seen = 0usize;
    for (new_at, child) in next.children.iter().enumerate() {
        match old_index.get(child.key.as_str()) {
            None => ops.push(RangeOp::Insert {
                key: child.key.clone(),
                at: new_at,
                child: child.clone(),
            }),
            Some(_) => {
                if !stable.contains(&kept_seen) {
                    ops.push(RangeOp::Move { key: child.key.clone(), to: new_at });
                }
                kept_seen += 1;
            }
        }
    }

    for child in &next.children {
        if let Some(&old_at) = old_index.get(child.key.as_str()) {
            let prev_child = &prev.children[old_at];
            if let Some(patch) = diff_dynamics(&prev_child.dynamics, &child.dynamics, affected) {
                ops.push(RangeOp::Update { key: child.key.clone(), patch });
            }
        }
    }

    ops
}

/// Positions (into `seq`) of one longest strictly increasing subsequence.
fn lis_positions(seq: &[usize]) -> HashSet<usize> {
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];
    for (i, &value) in seq.iter().enumerate() {
        let pos = tails.partition_point(|&t| seq[t] < value);
        if pos > 0 {
            prev[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }
    let mut positions = HashSet::new();
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        positions.insert(i);
        cursor = prev[i];
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::CompiledTemplate;
    use crate::render::render;
    use crate::tree::apply_patch;
    use serde_json::json;

    fn items(entries: &[(&str, &str)]) -> serde_json::Value {
        json!({
            "Items": entries
                .iter()
                .map(|(id, name)| json!({ "ID": id, "Name": name }))
                .collect::<Vec<_>>()
        })
    }

    const LIST: &str =
        "<ul>{{range .Items}}<li data-key=\"{{.ID}}\">{{.Name}}</li>{{end}}</ul>";

    #[test]
    fn test_diff_identical_is_empty() {
        let tmpl = CompiledTemplate::compile("<p>{{.A}}</p>").unwrap();
        let tree = render(&tmpl, &json!({ "A": "x" }));
        assert!(diff(&tree, &tree).is_empty());
    }

    #[test]
    fn test_diff_primitive_change() {
        let tmpl = CompiledTemplate::compile("<p>Count: {{.N}}</p>").unwrap();
        let r1 = render(&tmpl, &json!({ "N": 0 }));
        let r2 = render(&tmpl, &json!({ "N": 1 }));
        let diff = diff(&r1, &r2);
        assert_eq!(
            diff.patch.slots.get(&0),
            Some(&SlotPatch::Value(SlotValue::Text("1".into())))
        );
        assert_eq!(diff.affected, ["root"]);
    }

    #[test]
    fn test_empty_to_non_empty_is_emitted() {
        let tmpl = CompiledTemplate::compile("<p>{{.A}}</p>").unwrap();
        let r1 = render(&tmpl, &json!({ "A": "x" }));
        let r2 = render(&tmpl, &json!({ "A": "" }));
        assert!(!diff(&r1, &r2).is_empty());
        assert!(!diff(&r2, &r1).is_empty());
    }

    #[test]
    fn test_branch_change_emits_whole_subtree() {
        let tmpl =
            CompiledTemplate::compile("<div>{{if .Show}}<b>{{.Msg}}</b>{{end}}</div>").unwrap();
        let off = render(&tmpl, &json!({ "Show": false }));
        let on = render(&tmpl, &json!({ "Show": true, "Msg": "hi" }));
        let diff = diff(&off, &on);
        let Some(SlotPatch::Value(SlotValue::Node(node))) = diff.patch.slots.get(&0) else {
            panic!("expected whole-value emission, got {:?}", diff.patch);
        };
        assert_eq!(node.to_html(), "<b>hi</b>");
    }

    #[test]
    fn test_permutation_yields_only_moves() {
        let tmpl = CompiledTemplate::compile(LIST).unwrap();
        let r1 = render(&tmpl, &items(&[("A", "a"), ("B", "b"), ("C", "c")]));
        let r2 = render(&tmpl, &items(&[("C", "c"), ("A", "a"), ("B", "b")]));
        let diff = diff(&r1, &r2);
        let Some(SlotPatch::Range(ops)) = diff.patch.slots.get(&0) else {
            panic!("expected range ops");
        };
        assert_eq!(ops, &[RangeOp::Move { key: "C".into(), to: 0 }]);
    }

    #[test]
    fn test_range_insert_delete_update() {
        let tmpl = CompiledTemplate::compile(LIST).unwrap();
        let r1 = render(&tmpl, &items(&[("A", "a"), ("B", "b")]));
        let r2 = render(&tmpl, &items(&[("B", "b2"), ("D", "d")]));
        let diff = diff(&r1, &r2);
        let Some(SlotPatch::Range(ops)) = diff.patch.slots.get(&0) else {
            panic!("expected range ops");
        };
        assert!(ops.iter().any(|op| matches!(op, RangeOp::Delete { key } if key == "A")));
        assert!(ops
            .iter()
            .any(|op| matches!(op, RangeOp::Insert { key, at: 1, .. } if key == "D")));
        assert!(ops
            .iter()
            .any(|op| matches!(op, RangeOp::Update { key, .. } if key == "B")));
        assert!(!ops.iter().any(|op| matches!(op, RangeOp::Move { .. })));
    }

    #[test]
    fn test_round_trip_through_apply() {
        let tmpl = CompiledTemplate::compile(
            "<div>{{.Title}}{{if .Show}}<b>{{.Msg}}</b>{{end}}\
             <ul>{{range .Items}}<li data-key=\"{{.ID}}\">{{.Name}}</li>{{end}}</ul></div>",
        )
        .unwrap();
        let r1 = render(
            &tmpl,
            &json!({ "Title": "t", "Show": false,
                     "Items": [ { "ID": "A", "Name": "a" }, { "ID": "B", "Name": "b" } ] }),
        );
        let r2 = render(
            &tmpl,
            &json!({ "Title": "t2", "Show": true, "Msg": "m",
                     "Items": [ { "ID": "B", "Name": "b2" }, { "ID": "C", "Name": "c" } ] }),
        );
        let patch = diff(&r1, &r2).patch;
        assert_eq!(apply_patch(&r1, &patch).unwrap(), r2);
    }

    #[test]
    fn test_lis_positions() {
        // 2,0,1: the LIS is [0,1] at positions {1,2}.
        let stable = lis_positions(&[2, 0, 1]);
        assert_eq!(stable, [1, 2].into_iter().collect());
        assert!(lis_positions(&[]).is_empty());
        assert_eq!(lis_positions(&[0, 1, 2]).len(), 3);
    }
}
