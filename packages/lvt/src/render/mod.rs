//! Rendering
//!
//! Executes a compiled shape against a data value and produces a concrete
//! [`Node`]. Rendering is deterministic (identical shape and data yield a
//! byte-identical tree) and never panics: an evaluation fault (missing
//! key, traversal through a non-object, composite value in a text slot) is
//! logged and the offending slot renders as the empty string.

use std::collections::HashSet;

use serde_json::Value;

use crate::compile::{CompiledTemplate, KeyRule, ShapeId, SlotKind, ROOT_SHAPE};
use crate::template::Path;
use crate::tree::{Node, Range, RangeChild, SlotValue};

/// Render `tmpl` against `data`.
///
/// # Example
/// ```rust
/// use lvt::compile::CompiledTemplate;
/// use serde_json::json;
///
/// let tmpl = CompiledTemplate::compile("<p>Count: {{.N}}</p>").unwrap();
/// let tree = lvt::render::render(&tmpl, &json!({ "N": 0 }));
/// assert_eq!(tree.to_html(), "<p>Count: 0</p>");
/// ```
pub fn render(tmpl: &CompiledTemplate, data: &Value) -> Node {
    render_shape(tmpl, ROOT_SHAPE, data)
}

fn render_shape(tmpl: &CompiledTemplate, id: ShapeId, ctx: &Value) -> Node {
    let shape = tmpl.shape(id);
    let dynamics = shape
        .slots
        .iter()
        .map(|slot| render_slot(tmpl, slot, ctx))
        .collect();
    Node {
        fragment_id: shape.fragment_id.clone(),
        statics: shape.statics.clone(),
        dynamics,
    }
}

fn render_slot(tmpl: &CompiledTemplate, slot: &SlotKind, ctx: &Value) -> SlotValue {
    match slot {
        SlotKind::Expr { path, raw } => SlotValue::Text(eval_text(path, ctx, *raw)),
        SlotKind::Cond { cond, then_shape, else_shape } => {
            if truthy(eval(cond, ctx).unwrap_or(&Value::Null)) {
                SlotValue::Node(render_shape(tmpl, *then_shape, ctx))
            } else if let Some(else_shape) = else_shape {
                SlotValue::Node(render_shape(tmpl, *else_shape, ctx))
            } else {
                SlotValue::Text(String::new())
            }
        }
        SlotKind::With { context, body } => match eval(context, ctx) {
            Ok(value) if truthy(value) => SlotValue::Node(render_shape(tmpl, *body, value)),
            _ => SlotValue::Text(String::new()),
        },
        SlotKind::Range { over, child, key } => {
            SlotValue::Range(render_range(tmpl, over, *child, key, ctx))
        }
    }
}

fn render_range(
    tmpl: &CompiledTemplate,
    over: &Path,
    child: ShapeId,
    key: &KeyRule,
    ctx: &Value,
) -> Range {
    let shape = tmpl.shape(child);
    let items: &[Value] = match eval(over, ctx) {
        Ok(Value::Array(items)) => items,
        Ok(Value::Null) => &[],
        Err(cause) => {
            tracing::warn!(path = %over, %cause, "eval failed; rendering empty range");
            &[]
        }
        Ok(other) => {
            tracing::warn!(
                path = %over,
                kind = value_kind(other),
                "range expression is not a list; rendering empty"
            );
            &[]
        }
    };

    let mut children: Vec<RangeChild> = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let dynamics = shape
            .slots
            .iter()
            .map(|slot| render_slot(tmpl, slot, item))
            .collect();
        let key = match key {
            KeyRule::Attr(path) => eval_text(path, item, false),
            KeyRule::Index => index.to_string(),
        };
        children.push(RangeChild { key, dynamics });
    }

    // Duplicate keys break keyed diffing; collapse to index fallback for
    // this render and let the operator know.
    let mut seen = HashSet::new();
    if children.iter().any(|c| !seen.insert(c.key.as_str())) {
        tracing::error!(
            path = %over,
            fragment = %shape.fragment_id,
            "duplicate range keys; falling back to index keys for this render"
        );
        for (index, child) in children.iter_mut().enumerate() {
            child.key = index.to_string();
        }
    }

    Range {
        fragment_id: shape.fragment_id.clone(),
        statics: shape.statics.clone(),
        children,
    }
}

/// Evaluate a path to text, escaping unless the slot is raw.
fn eval_text(path: &Path, ctx: &Value, raw: bool) -> String {
    let text = match eval(path, ctx) {
        Ok(Value::Null) => String::new(),
        Ok(Value::String(s)) => s.clone(),
        Ok(Value::Number(n)) => n.to_string(),
        Ok(Value::Bool(b)) => b.to_string(),
        Ok(other) => {
            tracing::warn!(
                path = %path,
                kind = value_kind(other),
                "composite value in text slot; rendering empty"
            );
            return String::new();
        }
        Err(cause) => {
            tracing::warn!(path = %path, %cause, "eval failed; rendering empty");
            return String::new();
        }
    };
    if raw {
        text
    } else {
        escape_html(&text)
    }
}

/// Walk a dot-path through nested objects.
fn eval<'a>(path: &Path, ctx: &'a Value) -> Result<&'a Value, String> {
    let mut current = ctx;
    for segment in &path.segments {
        match current {
            Value::Object(map) => {
                current = map
                    .get(segment)
                    .ok_or_else(|| format!("missing field {segment:?}"))?;
            }
            other => {
                return Err(format!(
                    "cannot take field {segment:?} of {}",
                    value_kind(other)
                ));
            }
        }
    }
    Ok(current)
}

/// Zero values are falsy: `null`, `false`, `""`, `0`, `[]`, `{}`.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Escape HTML special characters.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#039;")
}
