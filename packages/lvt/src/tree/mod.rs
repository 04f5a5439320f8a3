//! Rendered fragment trees
//!
//! A render produces a tree of [`Node`]s: interleaved static strings and
//! dynamic slot values. The statics come from the compiled shape and are
//! shared (`Arc`) across every render of the same template; only the
//! dynamics vary with data. The rendered HTML of a node is
//! `s0 ‖ v0 ‖ s1 ‖ v1 ‖ … ‖ sn`.

mod encode;
mod patch;

pub use encode::{encode_full, encode_patch};
pub use patch::{apply_patch, NodePatch, RangeOp, SlotPatch};

use std::sync::Arc;

/// One rendered static/dynamic fragment.
///
/// Invariant: `statics.len() == dynamics.len() + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Stable fragment identity, derived from the compiled shape
    pub fragment_id: Arc<str>,
    /// Static segments, shared with every render of the same shape
    pub statics: Arc<[String]>,
    /// One evaluated value per slot
    pub dynamics: Vec<SlotValue>,
}

/// The value filling one dynamic slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue {
    /// An escaped (or raw) primitive rendered to text
    Text(String),
    /// A nested fragment (conditional branch, `with` body)
    Node(Node),
    /// An iterated list of children sharing one shape
    Range(Range),
}

/// A rendered range slot: ordered children all sharing `statics`.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    /// Fragment identity of the child shape
    pub fragment_id: Arc<str>,
    /// Child shape statics, shared by every child
    pub statics: Arc<[String]>,
    /// Children in render order; key order is significant
    pub children: Vec<RangeChild>,
}

/// One child of a range, identified by an opaque key.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeChild {
    /// Stable key: `data-key` expression value, or the iteration index
    pub key: String,
    /// The child's slot values
    pub dynamics: Vec<SlotValue>,
}

impl Node {
    /// Render this tree to an HTML string (first-page render).
    ///
    /// Every nested node's host element is tagged with its
    /// `data-lvt-id` so the client can target morphs per fragment. The
    /// attribute is added here, at serialisation time: the wire statics
    /// stay clean and the client injects the same IDs when it recomposes.
    /// Range subtrees are left untagged; their children carry `data-key`.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        write_interleaved(&self.statics, &self.dynamics, None, true, &mut out);
        out
    }
}

impl SlotValue {
    /// True for the empty-string slot (untaken conditional branch).
    pub fn is_empty_text(&self) -> bool {
        matches!(self, SlotValue::Text(t) if t.is_empty())
    }

    fn write_html(&self, tagged: bool, out: &mut String) {
        match self {
            SlotValue::Text(text) => out.push_str(text),
            SlotValue::Node(node) => {
                let tag_id = tagged.then(|| node.fragment_id.as_ref());
                write_interleaved(&node.statics, &node.dynamics, tag_id, tagged, out);
            }
            SlotValue::Range(range) => {
                for child in &range.children {
                    write_interleaved(&range.statics, &child.dynamics, None, false, out);
                }
            }
        }
    }
}

impl Range {
    /// Number of dynamic slots every child must carry.
    pub fn child_slots(&self) -> usize {
        self.statics.len().saturating_sub(1)
    }

    /// Position of the child with `key`, if present.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.children.iter().position(|c| c.key == key)
    }
}

fn write_interleaved(
    statics: &[String],
    dynamics: &[SlotValue],
    tag_id: Option<&str>,
    tagged: bool,
    out: &mut String,
) {
    debug_assert_eq!(statics.len(), dynamics.len() + 1);
    for (i, segment) in statics.iter().enumerate() {
        if i == 0 {
            write_host_segment(segment, tag_id, out);
        } else {
            out.push_str(segment);
        }
        if let Some(value) = dynamics.get(i) {
            value.write_html(tagged, out);
        }
    }
}

/// Write a node's first static segment, inserting `data-lvt-id` into the
/// opening tag when the segment starts with the node's host element.
fn write_host_segment(segment: &str, tag_id: Option<&str>, out: &mut String) {
    if let Some(id) = tag_id {
        if let Some(end) = host_tag_name_end(segment) {
            out.push_str(&segment[..end]);
            out.push_str(" data-lvt-id=\"");
            out.push_str(id);
            out.push('"');
            out.push_str(&segment[end..]);
            return;
        }
    }
    out.push_str(segment);
}

/// Byte offset just past the tag name of a leading `<tag`; `None` when the
/// segment does not open with an element (no host to tag).
fn host_tag_name_end(segment: &str) -> Option<usize> {
    let rest = segment.strip_prefix('<')?;
    let len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
        .unwrap_or(rest.len());
    (len > 0).then_some(1 + len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statics(segments: &[&str]) -> Arc<[String]> {
        segments.iter().map(|s| s.to_string()).collect::<Vec<_>>().into()
    }

    #[test]
    fn test_to_html_interleaves() {
        let node = Node {
            fragment_id: "root".into(),
            statics: statics(&["<p>Count: ", "</p>"]),
            dynamics: vec![SlotValue::Text("0".into())],
        };
        assert_eq!(node.to_html(), "<p>Count: 0</p>");
    }

    #[test]
    fn test_to_html_nested_and_range() {
        let range = Range {
            fragment_id: "root.1".into(),
            statics: statics(&["<li>", "</li>"]),
            children: vec![
                RangeChild { key: "a".into(), dynamics: vec![SlotValue::Text("a".into())] },
                RangeChild { key: "b".into(), dynamics: vec![SlotValue::Text("b".into())] },
            ],
        };
        let inner = Node {
            fragment_id: "root.0".into(),
            statics: statics(&["<b>", "</b>"]),
            dynamics: vec![SlotValue::Text("hi".into())],
        };
        let node = Node {
            fragment_id: "root".into(),
            statics: statics(&["<div>", "<ul>", "</ul></div>"]),
            dynamics: vec![SlotValue::Node(inner), SlotValue::Range(range)],
        };
        // Nested nodes are tagged with their fragment ID; range children
        // rely on data-key instead.
        assert_eq!(
            node.to_html(),
            "<div><b data-lvt-id=\"root.0\">hi</b><ul><li>a</li><li>b</li></ul></div>"
        );
    }

    #[test]
    fn test_host_tag_name_end() {
        assert_eq!(host_tag_name_end("<b>"), Some(2));
        assert_eq!(host_tag_name_end("<my-widget class=\"x\">"), Some(10));
        assert_eq!(host_tag_name_end("plain text"), None);
        assert_eq!(host_tag_name_end("</p>"), None);
    }

    #[test]
    fn test_textual_branch_has_no_host_to_tag() {
        let inner = Node {
            fragment_id: "root.0".into(),
            statics: statics(&["yes"]),
            dynamics: vec![],
        };
        let node = Node {
            fragment_id: "root".into(),
            statics: statics(&["<div>", "</div>"]),
            dynamics: vec![SlotValue::Node(inner)],
        };
        assert_eq!(node.to_html(), "<div>yes</div>");
    }
}
