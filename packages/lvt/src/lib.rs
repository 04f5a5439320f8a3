//! # LVT: Live HTML templates for Rust
//!
//! Renders HTML templates on the server, tracks the smallest fragments of
//! the rendered tree that depend on application state, and pushes minimal
//! JSON patches to connected browsers. A small client (see `lvt-client`)
//! applies patches with a morph so DOM identity, focus, and form state
//! survive updates; `lvt-axum` mounts the HTTP/WebSocket transport.
//!
//! ## How a render flows
//!
//! 1. A template compiles once into its *shape*: shared statics, one slot
//!    kind per dynamic hole, deterministic fragment IDs.
//! 2. Each render evaluates the shape against the group store's assigns,
//!    producing a concrete tree.
//! 3. The differ compares the new tree with each connection's previous one
//!    and emits only the changed slots, with keyed edit scripts for lists.
//! 4. The connection registry fans the per-connection patches out; slow
//!    consumers are evicted instead of blocking the group.
//!
//! ## Example
//!
//! ```rust
//! use lvt::prelude::*;
//! use serde_json::{json, Value};
//!
//! #[derive(Default)]
//! struct Counter {
//!     n: i64,
//! }
//!
//! impl LiveStore for Counter {
//!     fn change(&mut self, ctx: &mut ActionContext) -> Result<(), ChangeError> {
//!         match ctx.name() {
//!             "inc" => self.n += 1,
//!             "dec" => self.n -= 1,
//!             _ => {}
//!         }
//!         Ok(())
//!     }
//!
//!     fn assigns(&self) -> Value {
//!         json!({ "N": self.n })
//!     }
//! }
//!
//! let template = CompiledTemplate::compile("<p>Count: {{.N}}</p>").unwrap();
//! let handle = LiveHandle::new(
//!     template,
//!     std::sync::Arc::new(|| Box::new(Counter::default()) as Box<dyn LiveStore>),
//!     Config::default(),
//! );
//! # let _ = handle;
//! ```

#![warn(missing_docs)]

pub mod action;
pub mod compile;
pub mod config;
pub mod diff;
pub mod error;
pub mod live;
pub mod registry;
pub mod render;
pub mod store;
pub mod template;
pub mod tree;

pub use action::{ActionContext, ActionKind, ClientFrame, Errors, ServerFrame};
pub use compile::CompiledTemplate;
pub use config::{Config, ConfigBuilder};
pub use diff::{diff, Diff};
pub use error::{
    BindError, ChangeError, DispatchError, JoinError, PatchError, RegistryError, SendError,
    StoreError, TemplateError,
};
pub use live::LiveHandle;
pub use registry::{Connection, ConnectionRegistry};
pub use render::render;
pub use store::{LiveStore, StoreFactory, StoreRegistry};
pub use tree::{apply_patch, encode_full, encode_patch, Node, NodePatch, SlotValue};

/// Prelude - import commonly used items
pub mod prelude {
    pub use crate::action::{ActionContext, ActionKind, ClientFrame, Errors, ServerFrame};
    pub use crate::compile::CompiledTemplate;
    pub use crate::config::{Config, ConfigBuilder};
    pub use crate::error::{ChangeError, DispatchError, JoinError, TemplateError};
    pub use crate::live::LiveHandle;
    pub use crate::store::{LiveStore, StoreFactory};
}
