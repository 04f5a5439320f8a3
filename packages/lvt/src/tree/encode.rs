//! Wire encoding
//!
//! Trees and patches serialise to the LiveView-style JSON shape: statics
//! under `"s"`, dynamics keyed by stringified slot index, range children
//! under `"d"` with their key under `"k"`. A patch omits `"s"` for
//! same-shape recursions and carries edit-script arrays for range slots;
//! a whole-value replacement re-sends `"s"` so the client can rebuild a
//! branch it has never seen.

use serde_json::{json, Map, Value};

use super::{Node, NodePatch, Range, RangeChild, RangeOp, SlotPatch, SlotValue};

/// Encode a full tree, statics included (initial render, reconnect).
pub fn encode_full(node: &Node) -> Value {
    let mut object = Map::new();
    object.insert("s".into(), statics_value(&node.statics));
    for (i, value) in node.dynamics.iter().enumerate() {
        object.insert(i.to_string(), encode_slot(value));
    }
    Value::Object(object)
}

/// Encode a patch: changed slots only, `"s"` omitted on recursions.
pub fn encode_patch(patch: &NodePatch) -> Value {
    let mut object = Map::new();
    for (&slot, change) in &patch.slots {
        object.insert(slot.to_string(), encode_slot_patch(change));
    }
    Value::Object(object)
}

fn encode_slot(value: &SlotValue) -> Value {
    match value {
        SlotValue::Text(text) => Value::String(text.clone()),
        SlotValue::Node(node) => encode_full(node),
        SlotValue::Range(range) => encode_range(range),
    }
}

fn encode_range(range: &Range) -> Value {
    let children: Vec<Value> = range.children.iter().map(encode_range_child).collect();
    json!({
        "s": statics_value(&range.statics),
        "d": children,
    })
}

fn encode_range_child(child: &RangeChild) -> Value {
    let mut object = Map::new();
    object.insert("k".into(), Value::String(child.key.clone()));
    for (i, value) in child.dynamics.iter().enumerate() {
        object.insert(i.to_string(), encode_slot(value));
    }
    Value::Object(object)
}

fn encode_slot_patch(change: &SlotPatch) -> Value {
    match change {
        SlotPatch::Value(value) => encode_slot(value),
        SlotPatch::Node(patch) => encode_patch(patch),
        SlotPatch::Range(ops) => Value::Array(ops.iter().map(encode_range_op).collect()),
    }
}

fn encode_range_op(op: &RangeOp) -> Value {
    match op {
        RangeOp::Delete { key } => json!({ "op": "delete", "k": key }),
        RangeOp::Move { key, to } => json!({ "op": "move", "k": key, "to": to }),
        RangeOp::Insert { key, at, child } => {
            let mut dynamics = Map::new();
            for (i, value) in child.dynamics.iter().enumerate() {
                dynamics.insert(i.to_string(), encode_slot(value));
            }
            json!({ "op": "insert", "k": key, "at": at, "d": dynamics })
        }
        RangeOp::Update { key, patch } => {
            json!({ "op": "update", "k": key, "d": encode_patch(patch) })
        }
    }
}

fn statics_value(statics: &[String]) -> Value {
    Value::Array(statics.iter().map(|s| Value::String(s.clone())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_full_counter() {
        let node = Node {
            fragment_id: "root".into(),
            statics: vec!["<p>Count: ".to_string(), "</p>".to_string()].into(),
            dynamics: vec![SlotValue::Text("0".into())],
        };
        assert_eq!(
            encode_full(&node),
            json!({ "s": ["<p>Count: ", "</p>"], "0": "0" })
        );
    }

    #[test]
    fn test_encode_patch_nested_value_keeps_statics() {
        let inner = Node {
            fragment_id: "root.0".into(),
            statics: vec!["<b>".to_string(), "</b>".to_string()].into(),
            dynamics: vec![SlotValue::Text("hi".into())],
        };
        let mut patch = NodePatch::empty();
        patch
            .slots
            .insert(0, SlotPatch::Value(SlotValue::Node(inner)));
        assert_eq!(
            encode_patch(&patch),
            json!({ "0": { "s": ["<b>", "</b>"], "0": "hi" } })
        );
    }

    #[test]
    fn test_encode_range_ops() {
        let mut patch = NodePatch::empty();
        patch.slots.insert(
            0,
            SlotPatch::Range(vec![RangeOp::Move { key: "C".into(), to: 0 }]),
        );
        assert_eq!(
            encode_patch(&patch),
            json!({ "0": [{ "op": "move", "k": "C", "to": 0 }] })
        );
    }
}
