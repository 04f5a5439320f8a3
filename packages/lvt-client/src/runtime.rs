//! Client runtime state
//!
//! The browser is single-threaded, so the whole client lives in one
//! thread-local cell: the cached tree, the wire handles, the outbox, and
//! the pending-action queue driving the form/button lifecycle.

use std::cell::RefCell;
use std::collections::VecDeque;

use serde_json::Value;
use web_sys::{Document, Element, WebSocket};

/// One in-flight action awaiting its ack from the server.
pub struct Pending {
    /// The element that initiated the action
    pub element: Element,
    /// Action name; matched against `meta.ack`
    pub name: String,
    /// True for `submit` actions (auto-reset candidates)
    pub is_submit: bool,
    /// A `lvt-disable-with` element to restore, with its original text
    pub disabled: Option<(Element, String)>,
}

/// The whole client state.
pub struct Client {
    /// Cached wire tree (statics + dynamics)
    pub tree: Value,
    /// Session group from the bootstrap
    pub group: String,
    /// WebSocket endpoint path
    pub ws_path: String,
    /// Long-poll endpoint path
    pub poll_path: String,
    /// The open socket, if any
    pub socket: Option<WebSocket>,
    /// Long-poll connection ID once the fallback engaged
    pub poll_conn: Option<String>,
    /// True while the poll loop owns the wire
    pub polling: bool,
    /// Frames queued while no wire is available
    pub outbox: Vec<Value>,
    /// Consecutive failed socket attempts
    pub reconnects: u32,
    /// Actions awaiting their ack
    pub pending: VecDeque<Pending>,
}

thread_local! {
    static CLIENT: RefCell<Option<Client>> = const { RefCell::new(None) };
}

/// Install the client state at boot.
pub fn install(client: Client) {
    CLIENT.with(|cell| *cell.borrow_mut() = Some(client));
}

/// Run `f` with the client state; no-op before boot.
pub fn with<R>(f: impl FnOnce(&mut Client) -> R) -> Option<R> {
    CLIENT.with(|cell| cell.borrow_mut().as_mut().map(f))
}

/// The document, when running in a browser.
pub fn document() -> Option<Document> {
    web_sys::window()?.document()
}

/// The live root container (`data-lvt-id="root"`).
pub fn root_element() -> Option<Element> {
    fragment_element("root")
}

/// Locate a fragment's host element by its `data-lvt-id`.
pub fn fragment_element(fragment_id: &str) -> Option<Element> {
    let document = document()?;
    document
        .query_selector(&format!("[data-lvt-id=\"{fragment_id}\"]"))
        .ok()
        .flatten()
}

/// Log an error to the browser console.
pub fn log_error(message: &str) {
    web_sys::console::error_1(&message.into());
}
