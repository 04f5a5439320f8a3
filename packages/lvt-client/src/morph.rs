//! DOM morphing
//!
//! Applies a freshly composed sub-tree over the live DOM while preserving
//! node identity: children match by `id`, then by `data-key`, then
//! positionally, so reorders become moves and existing elements (focus,
//! scroll, form state included) survive. Surviving elements whose
//! attributes changed get a `lvt:updated` event.

use wasm_bindgen::JsCast;
use web_sys::{Element, HtmlInputElement, HtmlTemplateElement, Node};

use crate::bindings::emit;
use crate::runtime;

/// Morph `html` into the children of `root`.
pub fn morph_into(root: &Element, html: &str) {
    let Some(fragment) = parse_fragment(html) else {
        return;
    };
    morph_children(root.unchecked_ref::<Node>(), fragment.unchecked_ref::<Node>());
}

/// Morph one fragment's host element in place. The html must be the
/// fragment's own rendering (a single host element); anything else is
/// refused and the caller falls back to a root morph.
pub fn morph_fragment(target: &Element, html: &str) -> bool {
    let Some(fragment) = parse_fragment(html) else {
        return false;
    };
    let children = collect_children(fragment.unchecked_ref::<Node>());
    if children.len() != 1 {
        return false;
    }
    let Some(to_el) = children[0].dyn_ref::<Element>() else {
        return false;
    };
    morph_element(target, to_el);
    true
}

fn parse_fragment(html: &str) -> Option<web_sys::DocumentFragment> {
    let document = runtime::document()?;
    let template = document.create_element("template").ok()?;
    let template = template.dyn_into::<HtmlTemplateElement>().ok()?;
    template.set_inner_html(html);
    Some(template.content())
}

/// Reconcile the child lists of two parents, left to right.
fn morph_children(from_parent: &Node, to_parent: &Node) {
    let targets = collect_children(to_parent);
    let mut pool = collect_children(from_parent);

    for (index, target) in targets.iter().enumerate() {
        match take_match(&mut pool, target) {
            Some(existing) => {
                place_at(from_parent, &existing, index);
                if let (Some(from_el), Some(to_el)) =
                    (existing.dyn_ref::<Element>(), target.dyn_ref::<Element>())
                {
                    morph_element(from_el, to_el);
                } else if existing.text_content() != target.text_content() {
                    existing.set_text_content(target.text_content().as_deref());
                }
            }
            None => {
                // Adopt the new node straight out of the template fragment.
                place_at(from_parent, target, index);
            }
        }
    }

    for leftover in pool {
        let _ = from_parent.remove_child(&leftover);
    }
}

/// Sync one matched element: attributes, form state, then children.
fn morph_element(from: &Element, to: &Element) {
    // Captured before the attribute sync so form-state updates can tell a
    // server-side change from a user edit.
    let value_before = from.get_attribute("value");
    let checked_before = from.has_attribute("checked");
    let changed = sync_attributes(from, to);
    sync_input_state(from, to, value_before, checked_before);
    morph_children(from.unchecked_ref::<Node>(), to.unchecked_ref::<Node>());
    if changed {
        emit(from, "lvt:updated", None);
    }
}

/// Match by `id`, then `data-key` + tag, then first positional candidate of
/// the same type and tag.
fn take_match(pool: &mut Vec<Node>, target: &Node) -> Option<Node> {
    let index = match target.dyn_ref::<Element>() {
        Some(to_el) => {
            let tag = to_el.tag_name();
            if let Some(id) = non_empty(to_el.get_attribute("id")) {
                pool.iter().position(|n| {
                    n.dyn_ref::<Element>()
                        .map(|el| el.get_attribute("id").as_deref() == Some(id.as_str()))
                        .unwrap_or(false)
                })
            } else if let Some(key) = non_empty(to_el.get_attribute("data-key")) {
                pool.iter().position(|n| {
                    n.dyn_ref::<Element>()
                        .map(|el| {
                            el.tag_name() == tag
                                && el.get_attribute("data-key").as_deref() == Some(key.as_str())
                        })
                        .unwrap_or(false)
                })
            } else {
                pool.iter().position(|n| {
                    n.dyn_ref::<Element>()
                        .map(|el| {
                            el.tag_name() == tag && el.get_attribute("data-key").is_none()
                        })
                        .unwrap_or(false)
                })
            }
        }
        None => pool
            .iter()
            .position(|n| n.dyn_ref::<Element>().is_none()),
    };
    index.map(|i| pool.remove(i))
}

/// Move `node` so it sits at `index` under `parent`; skip the move when it
/// is already there (a focused element is never touched needlessly).
fn place_at(parent: &Node, node: &Node, index: usize) {
    let reference = parent.child_nodes().item(index as u32);
    if let Some(reference) = &reference {
        if reference.is_same_node(Some(node)) {
            return;
        }
    }
    let _ = parent.insert_before(node, reference.as_ref());
}

/// Bring `from`'s attributes in line with `to`'s; true when anything
/// changed.
fn sync_attributes(from: &Element, to: &Element) -> bool {
    let mut changed = false;

    let from_names = attribute_names(from);
    for name in &from_names {
        if to.get_attribute(name).is_none() {
            let _ = from.remove_attribute(name);
            changed = true;
        }
    }

    let to_attrs = to.attributes();
    for i in 0..to_attrs.length() {
        if let Some(attr) = to_attrs.item(i) {
            let name = attr.name();
            let value = attr.value();
            if from.get_attribute(&name).as_deref() != Some(value.as_str()) {
                let _ = from.set_attribute(&name, &value);
                changed = true;
            }
        }
    }

    changed
}

/// Form-state policy: live `value`/`checked` are only overwritten when the
/// server-rendered attribute itself changed, and never on the focused
/// element, so the user's in-progress input is retained.
fn sync_input_state(
    from: &Element,
    to: &Element,
    value_before: Option<String>,
    checked_before: bool,
) {
    let Some(input) = from.dyn_ref::<HtmlInputElement>() else {
        return;
    };
    let focused = runtime::document()
        .and_then(|d| d.active_element())
        .map(|el| el.is_same_node(Some(from.unchecked_ref::<Node>())))
        .unwrap_or(false);
    if focused {
        return;
    }
    let value_after = to.get_attribute("value");
    if value_after != value_before {
        input.set_value(value_after.as_deref().unwrap_or_default());
    }
    let checked_after = to.has_attribute("checked");
    if checked_after != checked_before {
        input.set_checked(checked_after);
    }
}

fn attribute_names(element: &Element) -> Vec<String> {
    let attrs = element.attributes();
    (0..attrs.length())
        .filter_map(|i| attrs.item(i).map(|a| a.name()))
        .collect()
}

fn collect_children(parent: &Node) -> Vec<Node> {
    let nodes = parent.child_nodes();
    (0..nodes.length()).filter_map(|i| nodes.item(i)).collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
