//! `lvt-*` binding runtime
//!
//! One set of delegated listeners at the document root picks every binding
//! attribute up, so elements added by later patches need no re-wiring.
//! Rate limiting (`lvt-throttle` wins over `lvt-debounce`), key filters,
//! confirmation prompts, and `lvt-data-*` payload fields are resolved at
//! event time; the form/button lifecycle (`lvt:pending` → `lvt:success` /
//! `lvt:error` → `lvt:done`) resolves when the server acks the action.

use js_sys::Date;
use serde_json::{json, Map, Value};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{
    CustomEvent, CustomEventInit, Document, Element, Event, HtmlElement, HtmlFormElement,
    HtmlInputElement, HtmlSelectElement, HtmlTextAreaElement, KeyboardEvent, Node,
};

use crate::runtime::{self, Pending};
use crate::socket;

/// Install the delegated listeners.
pub fn install() {
    let Some(document) = runtime::document() else {
        return;
    };
    listen(&document, "click", on_click);
    listen(&document, "submit", on_submit);
    listen(&document, "change", on_change);
    listen(&document, "input", on_input);
    listen(&document, "focusin", on_focus);
    listen(&document, "focusout", on_blur);
    listen(&document, "keydown", on_keydown);
    listen(&document, "keyup", on_keyup);
}

fn listen(document: &Document, kind: &str, handler: fn(Event)) {
    let closure = Closure::wrap(Box::new(handler) as Box<dyn FnMut(Event)>);
    let _ = document.add_event_listener_with_callback(kind, closure.as_ref().unchecked_ref());
    closure.forget();
}

fn on_click(event: Event) {
    let Some(target) = target_element(&event) else {
        return;
    };

    if let Some(element) = closest(&target, "[lvt-click]") {
        if confirmed(&element) {
            let name = attr(&element, "lvt-click");
            let frame = json!({ "type": "action", "name": name, "data": data_attrs(&element) });
            begin_action(&element, &name, false);
            rate_limited_send(&element, frame);
        }
    }

    // `lvt-window-click`: bound to the document, fires on any click.
    if let Some(document) = runtime::document() {
        if let Ok(bound) = document.query_selector_all("[lvt-window-click]") {
            for i in 0..bound.length() {
                let Some(element) = bound.item(i).and_then(|n| n.dyn_into::<Element>().ok())
                else {
                    continue;
                };
                let name = attr(&element, "lvt-window-click");
                socket::send_frame(json!({ "type": "action", "name": name, "data": data_attrs(&element) }));
            }
        }
    }

    // `lvt-click-away`: fire for every bound element the click landed
    // outside of.
    if let Some(document) = runtime::document() {
        if let Ok(bound) = document.query_selector_all("[lvt-click-away]") {
            for i in 0..bound.length() {
                let Some(element) = bound.item(i).and_then(|n| n.dyn_into::<Element>().ok())
                else {
                    continue;
                };
                if element.contains(Some(target.unchecked_ref::<Node>())) {
                    continue;
                }
                let name = attr(&element, "lvt-click-away");
                socket::send_frame(json!({ "type": "action", "name": name, "data": data_attrs(&element) }));
            }
        }
    }
}

fn on_submit(event: Event) {
    let Some(target) = target_element(&event) else {
        return;
    };
    let Some(form) = closest(&target, "[lvt-submit]") else {
        return;
    };
    event.prevent_default();

    let name = attr(&form, "lvt-submit");
    let frame = json!({ "type": "submit", "name": name, "form": form_values(&form) });
    begin_action(&form, &name, true);
    socket::send_frame(frame);
}

fn on_change(event: Event) {
    let Some(target) = target_element(&event) else {
        return;
    };
    let Some(container) = closest(&target, "[lvt-change]") else {
        return;
    };
    let name = attr(&container, "lvt-change");
    let scope = closest(&target, "form").unwrap_or_else(|| container.clone());
    socket::send_frame(json!({ "type": "change", "name": name, "form": form_values(&scope) }));
}

fn on_input(event: Event) {
    let Some(target) = target_element(&event) else {
        return;
    };
    let Some(element) = closest(&target, "[lvt-input]") else {
        return;
    };
    let name = attr(&element, "lvt-input");
    let value = control_value(&target);
    let frame = json!({ "type": "input", "name": name, "value": value });
    rate_limited_send(&element, frame);
}

fn on_focus(event: Event) {
    simple_event(&event, "lvt-focus", "focus");
}

fn on_blur(event: Event) {
    simple_event(&event, "lvt-blur", "blur");
}

fn on_keydown(event: Event) {
    key_event(&event, "keydown");
}

fn on_keyup(event: Event) {
    key_event(&event, "keyup");
}

fn simple_event(event: &Event, attr_name: &str, frame_type: &str) {
    let Some(target) = target_element(event) else {
        return;
    };
    let Some(element) = closest(&target, &format!("[{attr_name}]")) else {
        return;
    };
    let name = attr(&element, attr_name);
    socket::send_frame(json!({ "type": frame_type, "name": name }));
}

fn key_event(event: &Event, frame_type: &str) {
    let Some(key) = event.dyn_ref::<KeyboardEvent>().map(|k| k.key()) else {
        return;
    };

    if let Some(target) = target_element(event) {
        if let Some(element) = closest(&target, &format!("[lvt-{frame_type}]")) {
            if key_allowed(&element, &key) {
                let name = attr(&element, &format!("lvt-{frame_type}"));
                let frame = json!({ "type": frame_type, "name": name, "key": key });
                rate_limited_send(&element, frame);
            }
        }
    }

    // `lvt-window-keydown` / `lvt-window-keyup` listen regardless of where
    // the event originated.
    let selector = format!("[lvt-window-{frame_type}]");
    if let Some(document) = runtime::document() {
        if let Ok(bound) = document.query_selector_all(&selector) {
            for i in 0..bound.length() {
                let Some(element) = bound.item(i).and_then(|n| n.dyn_into::<Element>().ok())
                else {
                    continue;
                };
                if !key_allowed(&element, &key) {
                    continue;
                }
                let name = attr(&element, &format!("lvt-window-{frame_type}"));
                socket::send_frame(json!({ "type": frame_type, "name": name, "key": key }));
            }
        }
    }
}

/// `lvt-key` filters the event down to one `event.key`.
fn key_allowed(element: &Element, key: &str) -> bool {
    match element.get_attribute("lvt-key") {
        Some(want) => want == key,
        None => true,
    }
}

/// `lvt-confirm` gates the action behind a prompt.
fn confirmed(element: &Element) -> bool {
    match element.get_attribute("lvt-confirm") {
        Some(message) => web_sys::window()
            .and_then(|w| w.confirm_with_message(&message).ok())
            .unwrap_or(false),
        None => true,
    }
}

/// Start the request lifecycle: record the pending action, apply
/// `lvt-disable-with`, and emit `lvt:pending`.
fn begin_action(element: &Element, name: &str, is_submit: bool) {
    let disabled = disable_with(element);
    emit(element, "lvt:pending", None);
    runtime::with(|client| {
        client.pending.push_back(Pending {
            element: element.clone(),
            name: name.to_string(),
            is_submit,
            disabled,
        });
    });
}

/// Apply `lvt-disable-with` on the element (or its nearest carrier inside a
/// form) and return what to restore.
fn disable_with(element: &Element) -> Option<(Element, String)> {
    let carrier = if element.has_attribute("lvt-disable-with") {
        Some(element.clone())
    } else {
        element
            .query_selector("[lvt-disable-with]")
            .ok()
            .flatten()
    }?;
    let replacement = carrier.get_attribute("lvt-disable-with")?;
    let original = carrier.text_content().unwrap_or_default();
    let _ = carrier.set_attribute("disabled", "");
    carrier.set_text_content(Some(&replacement));
    Some((carrier, original))
}

/// Resolve the pending action matching the server's ack: restore
/// `lvt-disable-with`, emit `lvt:success` or `lvt:error`, always emit
/// `lvt:done`, and auto-reset successful submits unless `lvt-preserve`.
pub fn resolve_pending(ack: Option<String>, errors: Option<Value>) {
    let Some(ack) = ack else {
        return;
    };
    let pending = runtime::with(|client| {
        let index = client.pending.iter().position(|p| p.name == ack)?;
        client.pending.remove(index)
    })
    .flatten();
    let Some(pending) = pending else {
        return;
    };

    if let Some((carrier, original)) = pending.disabled {
        let _ = carrier.remove_attribute("disabled");
        carrier.set_text_content(Some(&original));
    }

    let failed = errors
        .as_ref()
        .and_then(Value::as_object)
        .map(|map| !map.is_empty())
        .unwrap_or(false);
    if failed {
        emit(&pending.element, "lvt:error", errors.as_ref());
    } else {
        emit(&pending.element, "lvt:success", None);
        if pending.is_submit && !pending.element.has_attribute("lvt-preserve") {
            if let Some(form) = pending.element.dyn_ref::<HtmlFormElement>() {
                form.reset();
            }
        }
    }
    emit(&pending.element, "lvt:done", None);
}

/// Dispatch a bubbling `lvt:*` custom event.
pub fn emit(element: &Element, kind: &str, detail: Option<&Value>) {
    let init = CustomEventInit::new();
    init.set_bubbles(true);
    if let Some(detail) = detail {
        init.set_detail(&JsValue::from_str(&detail.to_string()));
    }
    if let Ok(event) = CustomEvent::new_with_event_init_dict(kind, &init) {
        let _ = element.dispatch_event(&event);
    }
}

/// Send now, or via the element's `lvt-throttle`/`lvt-debounce` schedule.
/// Throttle wins when both are present.
fn rate_limited_send(element: &Element, frame: Value) {
    let throttle = attr_ms(element, "lvt-throttle");
    let debounce = attr_ms(element, "lvt-debounce");

    if let Some(ms) = throttle {
        let now = Date::now();
        let last = dataset_get(element, "lvtThrottledAt")
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0);
        if now - last < ms as f64 {
            return;
        }
        dataset_set(element, "lvtThrottledAt", &now.to_string());
        socket::send_frame(frame);
        return;
    }

    if let Some(ms) = debounce {
        if let Some(previous) = dataset_get(element, "lvtDebounce").and_then(|v| v.parse::<i32>().ok())
        {
            if let Some(window) = web_sys::window() {
                window.clear_timeout_with_handle(previous);
            }
        }
        let deferred = Closure::once_into_js(move || socket::send_frame(frame));
        if let Some(window) = web_sys::window() {
            if let Ok(timer) = window.set_timeout_with_callback_and_timeout_and_arguments_0(
                deferred.unchecked_ref(),
                ms,
            ) {
                dataset_set(element, "lvtDebounce", &timer.to_string());
            }
        }
        return;
    }

    socket::send_frame(frame);
}

/// `lvt-data-*` attributes become extra payload fields.
fn data_attrs(element: &Element) -> Map<String, Value> {
    let mut data = Map::new();
    let attrs = element.attributes();
    for i in 0..attrs.length() {
        if let Some(attr) = attrs.item(i) {
            if let Some(field) = attr.name().strip_prefix("lvt-data-") {
                data.insert(field.to_string(), Value::String(attr.value()));
            }
        }
    }
    data
}

/// Flat map of every named control inside `scope`. Unchecked checkboxes
/// and radios are omitted, like a native form submission.
fn form_values(scope: &Element) -> Map<String, Value> {
    let mut values = Map::new();
    let Ok(controls) = scope.query_selector_all("input[name],textarea[name],select[name]") else {
        return values;
    };
    for i in 0..controls.length() {
        let Some(node) = controls.item(i) else {
            continue;
        };
        if let Some(input) = node.dyn_ref::<HtmlInputElement>() {
            let kind = input.type_();
            if (kind == "checkbox" || kind == "radio") && !input.checked() {
                continue;
            }
            values.insert(input.name(), Value::String(input.value()));
        } else if let Some(area) = node.dyn_ref::<HtmlTextAreaElement>() {
            values.insert(area.name(), Value::String(area.value()));
        } else if let Some(select) = node.dyn_ref::<HtmlSelectElement>() {
            values.insert(select.name(), Value::String(select.value()));
        }
    }
    values
}

fn control_value(element: &Element) -> String {
    if let Some(input) = element.dyn_ref::<HtmlInputElement>() {
        input.value()
    } else if let Some(area) = element.dyn_ref::<HtmlTextAreaElement>() {
        area.value()
    } else if let Some(select) = element.dyn_ref::<HtmlSelectElement>() {
        select.value()
    } else {
        String::new()
    }
}

fn target_element(event: &Event) -> Option<Element> {
    event.target()?.dyn_into::<Element>().ok()
}

fn closest(element: &Element, selector: &str) -> Option<Element> {
    element.closest(selector).ok().flatten()
}

fn attr(element: &Element, name: &str) -> String {
    element.get_attribute(name).unwrap_or_default()
}

fn attr_ms(element: &Element, name: &str) -> Option<i32> {
    element.get_attribute(name)?.parse().ok()
}

fn dataset_get(element: &Element, key: &str) -> Option<String> {
    element.dyn_ref::<HtmlElement>()?.dataset().get(key)
}

fn dataset_set(element: &Element, key: &str, value: &str) {
    if let Some(html) = element.dyn_ref::<HtmlElement>() {
        let _ = html.dataset().set(key, value);
    }
}
