//! Actions and wire frames
//!
//! Inbound messages are internally-tagged JSON (`{"type": "...", ...}`).
//! The dispatcher turns each into an [`ActionContext`] and hands it to the
//! group's store under the group mutex; validation failures collect into an
//! [`Errors`] bag that rides the `errors` block of the acting connection's
//! next patch.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;

/// The `errors` key for non-field errors.
pub const GENERAL_ERROR: &str = "_general";

/// A frame received from the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Named user action (click, custom)
    Action {
        /// Action name
        name: String,
        /// Extra fields from `lvt-data-*` attributes
        #[serde(default)]
        data: Map<String, Value>,
    },
    /// Form submission
    Submit {
        /// Action name
        name: String,
        /// Flat map of named inputs
        #[serde(default)]
        form: HashMap<String, String>,
    },
    /// Live validation; same shape as submit but must not persist
    Change {
        /// Action name
        name: String,
        /// Flat map of named inputs
        #[serde(default)]
        form: HashMap<String, String>,
    },
    /// Input-level event
    Input {
        /// Action name
        name: String,
        /// Current input value
        #[serde(default)]
        value: Option<String>,
    },
    /// Focus event
    Focus {
        /// Action name
        name: String,
    },
    /// Blur event
    Blur {
        /// Action name
        name: String,
    },
    /// Key press
    Keydown {
        /// Action name
        name: String,
        /// `event.key`
        #[serde(default)]
        key: Option<String>,
    },
    /// Key release
    Keyup {
        /// Action name
        name: String,
        /// `event.key`
        #[serde(default)]
        key: Option<String>,
    },
    /// Automatic field-level state sync
    Bind {
        /// Field name → new value
        fields: HashMap<String, Value>,
    },
    /// Keep-alive
    Ping {
        /// Client timestamp, echoed back
        t: u64,
    },
    /// Keep-alive reply
    Pong {
        /// Echoed timestamp
        t: u64,
    },
}

/// A frame sent to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Full tree, statics included (initial render, reconnect)
    Full {
        /// Encoded root node
        root: Value,
    },
    /// Minimal update
    Patch {
        /// Encoded root patch
        root: Value,
        /// Field-level validation errors, acting connection only
        #[serde(default, skip_serializing_if = "Option::is_none")]
        errors: Option<BTreeMap<String, String>>,
        /// Reserved metadata; carries the dispatch ack
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<Value>,
    },
    /// Keep-alive
    Ping {
        /// Server timestamp, echoed back
        t: u64,
    },
    /// Keep-alive reply
    Pong {
        /// Echoed timestamp
        t: u64,
    },
}

/// What kind of client event produced an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// `lvt-click` or custom
    Action,
    /// `lvt-submit`; success triggers the form auto-reset lifecycle
    Submit,
    /// `lvt-change`: live validation. Contractually non-persisting: the
    /// store must not keep state from a `Change` dispatch; it never counts
    /// toward the auto-reset lifecycle.
    Change,
    /// `lvt-input`
    Input,
    /// `lvt-focus`
    Focus,
    /// `lvt-blur`
    Blur,
    /// `lvt-keydown`
    Keydown,
    /// `lvt-keyup`
    Keyup,
}

/// Field-name → message error bag, plus the `_general` key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Errors {
    errors: BTreeMap<String, String>,
}

impl Errors {
    /// An empty bag.
    pub fn new() -> Self {
        Errors::default()
    }

    /// Record an error for a field; later errors for the same field win.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.insert(field.into(), message.into());
    }

    /// Record a non-field error.
    pub fn add_general(&mut self, message: impl Into<String>) {
        self.add(GENERAL_ERROR, message);
    }

    /// The message for a field, if any.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }

    /// True when no error was recorded.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fold another bag into this one.
    pub fn merge(&mut self, other: Errors) {
        self.errors.extend(other.errors);
    }

    /// The underlying map, for the wire.
    pub fn into_map(self) -> BTreeMap<String, String> {
        self.errors
    }
}

/// The typed context handed to a store's `change` callback.
pub struct ActionContext {
    kind: ActionKind,
    name: String,
    data: Map<String, Value>,
    form: HashMap<String, String>,
    value: Option<String>,
    key: Option<String>,
    errors: Errors,
    deadline: Instant,
}

impl ActionContext {
    pub(crate) fn new(kind: ActionKind, name: String, deadline: Instant) -> Self {
        ActionContext {
            kind,
            name,
            data: Map::new(),
            form: HashMap::new(),
            value: None,
            key: None,
            errors: Errors::new(),
            deadline,
        }
    }

    /// Build a context from an inbound frame; `None` for frames that do not
    /// dispatch to the store (`bind`, `ping`, `pong`).
    pub(crate) fn from_frame(frame: ClientFrame, deadline: Instant) -> Option<Self> {
        let ctx = match frame {
            ClientFrame::Action { name, data } => {
                let mut ctx = Self::new(ActionKind::Action, name, deadline);
                ctx.data = data;
                ctx
            }
            ClientFrame::Submit { name, form } => {
                let mut ctx = Self::new(ActionKind::Submit, name, deadline);
                ctx.form = form;
                ctx
            }
            ClientFrame::Change { name, form } => {
                let mut ctx = Self::new(ActionKind::Change, name, deadline);
                ctx.form = form;
                ctx
            }
            ClientFrame::Input { name, value } => {
                let mut ctx = Self::new(ActionKind::Input, name, deadline);
                ctx.value = value;
                ctx
            }
            ClientFrame::Focus { name } => Self::new(ActionKind::Focus, name, deadline),
            ClientFrame::Blur { name } => Self::new(ActionKind::Blur, name, deadline),
            ClientFrame::Keydown { name, key } => {
                let mut ctx = Self::new(ActionKind::Keydown, name, deadline);
                ctx.key = key;
                ctx
            }
            ClientFrame::Keyup { name, key } => {
                let mut ctx = Self::new(ActionKind::Keyup, name, deadline);
                ctx.key = key;
                ctx
            }
            ClientFrame::Bind { .. } | ClientFrame::Ping { .. } | ClientFrame::Pong { .. } => {
                return None;
            }
        };
        Some(ctx)
    }

    /// What kind of event produced this action.
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// The action name from the `lvt-*` attribute.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Extra payload fields (`lvt-data-*`).
    pub fn data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// The whole submitted form.
    pub fn form(&self) -> &HashMap<String, String> {
        &self.form
    }

    /// One submitted form value.
    pub fn form_value(&self, field: &str) -> Option<&str> {
        self.form.get(field).map(String::as_str)
    }

    /// Bind-and-validate helper: returns the trimmed form value, or records
    /// a `required` error and returns `None`.
    pub fn require(&mut self, field: &str) -> Option<String> {
        match self.form.get(field).map(|v| v.trim()) {
            Some(value) if !value.is_empty() => Some(value.to_string()),
            _ => {
                self.errors.add(field, "required");
                None
            }
        }
    }

    /// The input value for `input` events.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// `event.key` for `keydown`/`keyup` events.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Record a field error to surface in the next patch.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.add(field, message);
    }

    /// True when any error was recorded.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take the accumulated bag.
    pub(crate) fn take_errors(&mut self) -> Errors {
        std::mem::take(&mut self.errors)
    }

    /// The dispatch deadline; work past this point is abandoned.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[test]
    fn test_client_frame_decoding() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"action","name":"inc"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Action { name: "inc".into(), data: Map::new() });

        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"submit","name":"add","form":{"text":""}}"#).unwrap();
        let ClientFrame::Submit { name, form } = frame else {
            panic!("expected submit");
        };
        assert_eq!(name, "add");
        assert_eq!(form.get("text").map(String::as_str), Some(""));

        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"nope"}"#).is_err());
    }

    #[test]
    fn test_server_frame_encoding_omits_empty_blocks() {
        let frame = ServerFrame::Patch {
            root: serde_json::json!({ "0": "1" }),
            errors: None,
            meta: None,
        };
        let encoded = serde_json::to_string(&frame).unwrap();
        assert_eq!(encoded, r#"{"type":"patch","root":{"0":"1"}}"#);
    }

    #[tokio::test]
    async fn test_require_records_errors() {
        let deadline = Instant::now() + Duration::from_secs(10);
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"submit","name":"add","form":{"text":"  "}}"#)
                .unwrap();
        let mut ctx = ActionContext::from_frame(frame, deadline).unwrap();
        assert_eq!(ctx.require("text"), None);
        assert_eq!(ctx.require("missing"), None);
        let errors = ctx.take_errors();
        assert_eq!(errors.get("text"), Some("required"));
        assert_eq!(errors.get("missing"), Some("required"));
    }

    #[test]
    fn test_ping_round_trip() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"ping","t":42}"#).unwrap();
        assert_eq!(frame, ClientFrame::Ping { t: 42 });
        let reply = serde_json::to_string(&ServerFrame::Pong { t: 42 }).unwrap();
        assert_eq!(reply, r#"{"type":"pong","t":42}"#);
    }
}
