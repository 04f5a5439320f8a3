//! # LVT Axum Transport
//!
//! Mounts LVT live routes onto axum: the initial-page render, the
//! WebSocket wire, and the HTTP long-poll fallback.
//!
//! ## Endpoints per live route
//!
//! - `GET {route}`: full HTML document with the initial tree serialised
//!   inline, the root container tagged `data-lvt-id="root"`, and a cookie
//!   planting the group identity when absent.
//! - `GET {route}/ws`: WebSocket upgrade; the subprotocol may be omitted
//!   or must equal `lvt.v1`; a full registry answers 503.
//! - `POST {route}/poll`: long-poll fallback; the response hangs up to
//!   the configured poll interval.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use lvt_axum::{init_tracing, LvtApp};
//! # use lvt::prelude::*;
//! # use serde_json::{json, Value};
//! # use std::sync::Arc;
//! # #[derive(Default)]
//! # struct Counter { n: i64 }
//! # impl LiveStore for Counter {
//! #     fn change(&mut self, ctx: &mut ActionContext) -> Result<(), ChangeError> { Ok(()) }
//! #     fn assigns(&self) -> Value { json!({ "N": self.n }) }
//! # }
//!
//! #[tokio::main]
//! async fn main() {
//!     init_tracing();
//!     LvtApp::new()
//!         .live(
//!             "/counter",
//!             "<p>Count: {{.N}}</p>",
//!             Arc::new(|| Box::new(Counter::default()) as Box<dyn LiveStore>),
//!         )
//!         .unwrap()
//!         .run("0.0.0.0:3000")
//!         .await
//!         .unwrap();
//! }
//! ```

#![warn(missing_docs)]

mod app;
pub mod error;
pub mod identity;
mod page;
pub mod poll;
mod websocket;

pub use app::{init_tracing, LvtApp};
pub use error::TransportError;
pub use identity::{
    anonymous_authenticator, cookie_group_identity, Authenticator, GroupIdentity, GROUP_COOKIE,
};
pub use poll::{PollRequest, PollResponse};
pub use websocket::SUBPROTOCOL;

/// Prelude - import commonly used items
pub mod prelude {
    pub use crate::app::{init_tracing, LvtApp};
    pub use crate::error::TransportError;
    pub use crate::identity::{Authenticator, GroupIdentity};
    pub use lvt::prelude::*;
}
