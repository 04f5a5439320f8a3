//! Wire transport
//!
//! Prefers a WebSocket with the `lvt.v1` subprotocol; after repeated
//! connection failures the client falls back to the HTTP long-poll
//! endpoint, threading the connection ID the server hands back through
//! every poll. Frames sent while no wire is up queue in the outbox and
//! flush on the next opportunity.

use js_sys::Date;
use serde_json::{json, Value};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::{Headers, MessageEvent, Request, RequestInit, Response, WebSocket};

use crate::{applier, bindings, runtime};

/// Socket failures before the long-poll fallback engages.
const MAX_SOCKET_ATTEMPTS: u32 = 3;
/// Keep-alive ping cadence.
const PING_INTERVAL_MS: i32 = 30_000;
/// Pause between failed poll rounds.
const POLL_RETRY_MS: i32 = 2_000;

/// Open the WebSocket wire.
pub fn connect() {
    let Some(window) = web_sys::window() else {
        return;
    };
    let Some(ws_path) = runtime::with(|client| client.ws_path.clone()) else {
        return;
    };

    let location = window.location();
    let scheme = match location.protocol().as_deref() {
        Ok("https:") => "wss",
        _ => "ws",
    };
    let host = location.host().unwrap_or_default();
    let url = format!("{scheme}://{host}{ws_path}");

    let socket = match WebSocket::new_with_str(&url, "lvt.v1") {
        Ok(socket) => socket,
        Err(_) => {
            note_failure();
            return;
        }
    };

    let onmessage = Closure::wrap(Box::new(|event: MessageEvent| {
        if let Some(text) = event.data().as_string() {
            match serde_json::from_str::<Value>(&text) {
                Ok(frame) => applier::apply_server_frame(frame),
                Err(err) => runtime::log_error(&format!("lvt: bad frame: {err}")),
            }
        }
    }) as Box<dyn FnMut(MessageEvent)>);
    socket.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    onmessage.forget();

    let onopen = Closure::wrap(Box::new(|| {
        runtime::with(|client| client.reconnects = 0);
        flush_outbox();
        if let Some(root) = runtime::root_element() {
            bindings::emit(&root, "lvt:connected", None);
        }
    }) as Box<dyn FnMut()>);
    socket.set_onopen(Some(onopen.as_ref().unchecked_ref()));
    onopen.forget();

    let onclose = Closure::wrap(Box::new(|| {
        runtime::with(|client| client.socket = None);
        if let Some(root) = runtime::root_element() {
            bindings::emit(&root, "lvt:disconnected", None);
        }
        note_failure();
    }) as Box<dyn FnMut()>);
    socket.set_onclose(Some(onclose.as_ref().unchecked_ref()));
    onclose.forget();

    runtime::with(|client| client.socket = Some(socket));
}

/// Count a failed attempt: retry with linear backoff, then fall back to
/// long-polling.
fn note_failure() {
    let attempts = runtime::with(|client| {
        client.reconnects += 1;
        client.reconnects
    })
    .unwrap_or(0);
    if attempts >= MAX_SOCKET_ATTEMPTS {
        start_polling();
    } else {
        let retry = Closure::once_into_js(connect);
        if let Some(window) = web_sys::window() {
            let _ = window.set_timeout_with_callback_and_timeout_and_arguments_0(
                retry.unchecked_ref(),
                1_000 * attempts as i32,
            );
        }
    }
}

/// Queue or send one frame, depending on the wire state.
pub fn send_frame(frame: Value) {
    let delivered = runtime::with(|client| {
        if let Some(socket) = &client.socket {
            if socket.ready_state() == WebSocket::OPEN {
                return socket.send_with_str(&frame.to_string()).is_ok();
            }
        }
        client.outbox.push(frame.clone());
        false
    })
    .unwrap_or(false);
    let _ = delivered;
}

/// Drain the outbox onto an open socket.
fn flush_outbox() {
    let queued = runtime::with(|client| std::mem::take(&mut client.outbox)).unwrap_or_default();
    for frame in queued {
        send_frame(frame);
    }
}

/// Install the keep-alive ping.
pub fn install_keepalive() {
    let ping = Closure::wrap(Box::new(|| {
        let live = runtime::with(|client| {
            client
                .socket
                .as_ref()
                .map(|s| s.ready_state() == WebSocket::OPEN)
                .unwrap_or(false)
        })
        .unwrap_or(false);
        if live {
            send_frame(json!({ "type": "ping", "t": Date::now() as u64 }));
        }
    }) as Box<dyn FnMut()>);
    if let Some(window) = web_sys::window() {
        let _ = window.set_interval_with_callback_and_timeout_and_arguments_0(
            ping.as_ref().unchecked_ref(),
            PING_INTERVAL_MS,
        );
    }
    ping.forget();
}

/// Switch to the long-poll loop.
fn start_polling() {
    let already = runtime::with(|client| {
        let was = client.polling;
        client.polling = true;
        was
    })
    .unwrap_or(true);
    if already {
        return;
    }
    runtime::log_error("lvt: socket unavailable; falling back to long-poll");
    spawn_local(poll_loop());
}

async fn poll_loop() {
    loop {
        let Some((path, conn, frames)) = runtime::with(|client| {
            (
                client.poll_path.clone(),
                client.poll_conn.clone(),
                std::mem::take(&mut client.outbox),
            )
        }) else {
            return;
        };

        let mut body = json!({ "frames": frames });
        if let Some(conn) = conn {
            body["conn"] = Value::String(conn);
        }

        match post_json(&path, body.to_string()).await {
            Ok(reply) => {
                if let Some(conn) = reply.get("conn").and_then(Value::as_str) {
                    let conn = conn.to_string();
                    runtime::with(|client| client.poll_conn = Some(conn));
                }
                if let Some(frames) = reply.get("frames").and_then(Value::as_array) {
                    for frame in frames {
                        applier::apply_server_frame(frame.clone());
                    }
                }
            }
            Err(_) => {
                // Evicted or unreachable: drop the connection ID so the
                // next round rejoins, and give the server a moment.
                runtime::with(|client| client.poll_conn = None);
                wait_ms(POLL_RETRY_MS).await;
            }
        }
    }
}

async fn post_json(url: &str, body: String) -> Result<Value, JsValue> {
    let window = web_sys::window().ok_or(JsValue::NULL)?;

    let headers = Headers::new()?;
    headers.set("content-type", "application/json")?;
    let init = RequestInit::new();
    init.set_method("POST");
    init.set_headers(&headers);
    init.set_body(&JsValue::from_str(&body));

    let request = Request::new_with_str_and_init(url, &init)?;
    let response = JsFuture::from(window.fetch_with_request(&request)).await?;
    let response: Response = response.dyn_into()?;
    if !response.ok() {
        return Err(JsValue::from_str("poll request failed"));
    }
    let text = JsFuture::from(response.text()?).await?;
    let text = text.as_string().ok_or(JsValue::NULL)?;
    serde_json::from_str(&text).map_err(|err| JsValue::from_str(&err.to_string()))
}

async fn wait_ms(ms: i32) {
    let promise = js_sys::Promise::new(&mut |resolve, _reject| {
        if let Some(window) = web_sys::window() {
            let _ = window
                .set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, ms);
        }
    });
    let _ = JsFuture::from(promise).await;
}
