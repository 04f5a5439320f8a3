//! # LVT Client
//!
//! The browser half of LVT, compiled to WebAssembly. It reads the
//! bootstrap block the server embeds in the initial page, opens the wire
//! (WebSocket, falling back to HTTP long-poll), applies incoming patches
//! to its cached tree, morphs the recomposed HTML into the live DOM, and
//! implements the `lvt-*` binding attributes with their request lifecycle
//! events (`lvt:pending`, `lvt:success`, `lvt:error`, `lvt:done`).
//!
//! The tree cache and patch merging live in [`compose`], which is plain
//! Rust and tested natively; everything touching the DOM is wasm-only.

pub mod compose;

#[cfg(target_arch = "wasm32")]
mod applier;
#[cfg(target_arch = "wasm32")]
mod bindings;
#[cfg(target_arch = "wasm32")]
mod morph;
#[cfg(target_arch = "wasm32")]
mod runtime;
#[cfg(target_arch = "wasm32")]
mod socket;

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Entry point: wire the client up against the server-rendered page.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    if let Err(err) = boot() {
        runtime::log_error(&format!("lvt: boot failed: {err}"));
    }
}

#[cfg(target_arch = "wasm32")]
fn boot() -> Result<(), String> {
    use serde_json::Value;

    let document = runtime::document().ok_or("no document")?;
    let bootstrap = document
        .get_element_by_id("__LVT_BOOT__")
        .and_then(|el| el.text_content())
        .ok_or("missing __LVT_BOOT__ block")?;
    let bootstrap: Value =
        serde_json::from_str(&bootstrap).map_err(|err| format!("bad bootstrap: {err}"))?;

    let field = |key: &str| {
        bootstrap
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let client = runtime::Client {
        tree: bootstrap.get("tree").cloned().ok_or("bootstrap missing tree")?,
        group: field("group"),
        ws_path: field("ws"),
        poll_path: field("poll"),
        socket: None,
        poll_conn: None,
        polling: false,
        outbox: Vec::new(),
        reconnects: 0,
        pending: std::collections::VecDeque::new(),
    };
    web_sys::console::debug_1(&format!("lvt: joining group {}", client.group).into());

    runtime::install(client);
    bindings::install();
    socket::connect();
    socket::install_keepalive();
    Ok(())
}
