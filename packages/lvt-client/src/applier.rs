//! Frame application
//!
//! Takes decoded server frames, merges patches into the cached tree, and
//! morphs the recomposed HTML into the DOM. The morph targets the
//! innermost fragment the patch is confined to, located by its
//! `data-lvt-id` host attribute; anything wider (multi-slot patches, the
//! root itself) goes through the root container. A patch that fails to
//! merge (unknown slot, cyclic payload) is a hard error: it is logged and
//! skipped wholesale, leaving the cached tree untouched.

use serde_json::{json, Value};

use crate::{bindings, compose, morph, runtime, socket};

/// Apply one decoded server frame.
pub fn apply_server_frame(frame: Value) {
    match frame.get("type").and_then(Value::as_str) {
        Some("full") => {
            let Some(root) = frame.get("root") else {
                return;
            };
            runtime::with(|client| client.tree = root.clone());
            rerender_root();
        }
        Some("patch") => {
            let Some(root) = frame.get("root") else {
                return;
            };
            // Ack-only patches (validation errors, empty echoes) carry no
            // slots and need no DOM work.
            let changed = root
                .as_object()
                .map(|map| map.keys().any(|k| k != "s"))
                .unwrap_or(false);
            if changed {
                let merged = runtime::with(|client| {
                    let snapshot = client.tree.clone();
                    match compose::merge_patch(&mut client.tree, root) {
                        Ok(()) => {
                            let (fragment_id, node) =
                                compose::patch_target(&client.tree, root);
                            let html = if fragment_id == "root" {
                                compose::html_of(&client.tree)
                            } else {
                                compose::html_of_fragment(node, &fragment_id)
                            };
                            Ok((fragment_id, html))
                        }
                        Err(err) => {
                            client.tree = snapshot;
                            Err(err)
                        }
                    }
                });
                match merged {
                    Some(Ok((fragment_id, html))) => apply_html(&fragment_id, html),
                    Some(Err(err)) => {
                        runtime::log_error(&format!("lvt: patch skipped: {err}"));
                        return;
                    }
                    None => return,
                }
            }

            let ack = frame
                .pointer("/meta/ack")
                .and_then(Value::as_str)
                .map(str::to_string);
            bindings::resolve_pending(ack, frame.get("errors").cloned());
        }
        Some("ping") => {
            let t = frame.get("t").and_then(Value::as_u64).unwrap_or_default();
            socket::send_frame(json!({ "type": "pong", "t": t }));
        }
        Some("pong") => {}
        other => {
            runtime::log_error(&format!("lvt: unknown frame type {other:?}"));
        }
    }
}

/// Morph the recomposed HTML in at the located fragment, widening to the
/// root container when the host element cannot be found (or the fragment
/// has no single host to morph).
fn apply_html(fragment_id: &str, html: Result<String, String>) {
    let html = match html {
        Ok(html) => html,
        Err(err) => {
            runtime::log_error(&format!("lvt: compose failed: {err}"));
            return;
        }
    };
    if fragment_id != "root" {
        if let Some(target) = runtime::fragment_element(fragment_id) {
            if morph::morph_fragment(&target, &html) {
                return;
            }
        }
    } else if let Some(root) = runtime::root_element() {
        morph::morph_into(&root, &html);
        return;
    }
    rerender_root();
}

/// Recompose the whole cached tree and morph it into the root container.
fn rerender_root() {
    let Some(html) = runtime::with(|client| compose::html_of(&client.tree)) else {
        return;
    };
    match html {
        Ok(html) => {
            if let Some(root) = runtime::root_element() {
                morph::morph_into(&root, &html);
            }
        }
        Err(err) => runtime::log_error(&format!("lvt: compose failed: {err}")),
    }
}
