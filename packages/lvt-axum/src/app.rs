//! Application builder
//!
//! Mounts live routes onto an axum `Router`. Every live route gets three
//! endpoints: `GET {route}` (initial page), `GET {route}/ws` (the wire),
//! and `POST {route}/poll` (long-poll fallback).

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use lvt::compile::CompiledTemplate;
use lvt::config::Config;
use lvt::error::TemplateError;
use lvt::live::LiveHandle;
use lvt::store::StoreFactory;
use tower_http::trace::TraceLayer;

use crate::identity::{anonymous_authenticator, cookie_group_identity, Authenticator, GroupIdentity};
use crate::page;
use crate::poll::{self, PollSessions};
use crate::websocket;

/// Per-route shared state for the page, socket, and poll handlers.
#[derive(Clone)]
pub(crate) struct RouteState {
    pub handle: Arc<LiveHandle>,
    pub identity: GroupIdentity,
    pub authenticator: Authenticator,
    pub polls: Arc<PollSessions>,
    pub title: String,
    pub client_src: String,
    pub ws_path: String,
    pub poll_path: String,
}

/// LVT application builder.
///
/// # Example
/// ```rust,no_run
/// use lvt_axum::LvtApp;
/// use lvt::prelude::*;
/// use serde_json::{json, Value};
/// use std::sync::Arc;
///
/// #[derive(Default)]
/// struct Counter { n: i64 }
///
/// impl LiveStore for Counter {
///     fn change(&mut self, ctx: &mut ActionContext) -> Result<(), ChangeError> {
///         if ctx.name() == "inc" { self.n += 1; }
///         Ok(())
///     }
///     fn assigns(&self) -> Value { json!({ "N": self.n }) }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let app = LvtApp::new()
///         .live(
///             "/counter",
///             r#"<p>Count: {{.N}}</p><button lvt-click="inc">+</button>"#,
///             Arc::new(|| Box::new(Counter::default()) as Box<dyn LiveStore>),
///         )
///         .unwrap();
///     app.run("0.0.0.0:3000").await.unwrap();
/// }
/// ```
pub struct LvtApp {
    router: Router,
    config: Config,
    group_identity: GroupIdentity,
    authenticator: Authenticator,
    title: String,
    client_src: String,
}

impl LvtApp {
    /// Create an app with the default config, cookie group identity, and
    /// anonymous authenticator.
    pub fn new() -> Self {
        LvtApp {
            router: Router::new(),
            config: Config::default(),
            group_identity: cookie_group_identity(),
            authenticator: anonymous_authenticator(),
            title: "LVT App".to_string(),
            client_src: "/static/lvt-client.js".to_string(),
        }
    }

    /// Replace the config for routes registered after this call.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Replace the group-identity callback.
    pub fn with_group_identity(mut self, identity: GroupIdentity) -> Self {
        self.group_identity = identity;
        self
    }

    /// Replace the authenticator callback.
    pub fn with_authenticator(mut self, authenticator: Authenticator) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Set the page title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the URL the page loads the client bundle from.
    pub fn with_client_src(mut self, src: impl Into<String>) -> Self {
        self.client_src = src.into();
        self
    }

    /// Register a live route: compile the template, create its handle, and
    /// mount the page/ws/poll endpoints.
    ///
    /// Template errors are fatal here, at registration: a server never
    /// starts with a template that did not compile.
    pub fn live(
        mut self,
        route: &str,
        template_source: &str,
        factory: StoreFactory,
    ) -> Result<Self, TemplateError> {
        let template = CompiledTemplate::compile(template_source)?;
        let handle = LiveHandle::new(template, factory, self.config.clone());

        let base = route.trim_end_matches('/');
        let page_path = if base.is_empty() { "/".to_string() } else { base.to_string() };
        let ws_path = format!("{base}/ws");
        let poll_path = format!("{base}/poll");

        let state = RouteState {
            handle,
            identity: self.group_identity.clone(),
            authenticator: self.authenticator.clone(),
            polls: Arc::new(PollSessions::default()),
            title: self.title.clone(),
            client_src: self.client_src.clone(),
            ws_path: ws_path.clone(),
            poll_path: poll_path.clone(),
        };

        let routes = Router::new()
            .route(&page_path, get(page::page_handler))
            .route(&ws_path, get(websocket::ws_handler))
            .route(&poll_path, post(poll::poll_handler))
            .with_state(state);
        self.router = self.router.merge(routes);
        tracing::info!(route = %page_path, "live route registered");
        Ok(self)
    }

    /// Merge additional application routes.
    pub fn merge(mut self, router: Router) -> Self {
        self.router = self.router.merge(router);
        self
    }

    /// Build the final axum `Router`.
    pub fn build(self) -> Router {
        self.router.layer(TraceLayer::new_for_http())
    }

    /// Build and serve.
    pub async fn run(self, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
        let app = self.build();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("server running at http://{}", addr);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

impl Default for LvtApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a `tracing` subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
