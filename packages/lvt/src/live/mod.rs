//! Orchestration
//!
//! [`LiveHandle`] glues one compiled template to its store registry,
//! connection registry, and config, so transports stay thin: they hand
//! frames in and drain per-connection queues out. Everything ordering-
//! sensitive lives here: a dispatch runs under the group mutex and fans
//! out before the mutex is released, so the observable data sequence is a
//! total order per group and the acting connection always sees its own
//! echo before any later frame.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use uuid::Uuid;

use crate::action::{ActionContext, ActionKind, ClientFrame, Errors, ServerFrame};
use crate::compile::CompiledTemplate;
use crate::config::Config;
use crate::error::{ChangeError, DispatchError, JoinError, StoreError};
use crate::registry::{Connection, ConnectionRegistry};
use crate::render::render;
use crate::store::{LiveStore, StoreFactory, StoreRegistry};
use crate::tree::{encode_full, encode_patch, Node};

/// One registered live template and everything serving it.
pub struct LiveHandle {
    template: CompiledTemplate,
    stores: StoreRegistry,
    connections: ConnectionRegistry,
    config: Config,
}

/// Per-dispatch reply details for the acting connection.
struct Acting {
    id: Uuid,
    kind: ActionKind,
    name: String,
    errors: Errors,
}

impl LiveHandle {
    /// Bundle a compiled template with a store factory and config.
    pub fn new(template: CompiledTemplate, factory: StoreFactory, config: Config) -> Arc<Self> {
        Arc::new(LiveHandle {
            template,
            stores: StoreRegistry::new(factory),
            connections: ConnectionRegistry::new(config.max_connections),
            config,
        })
    }

    /// The compiled template.
    pub fn template(&self) -> &CompiledTemplate {
        &self.template
    }

    /// The live connections.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// The live groups.
    pub fn stores(&self) -> &StoreRegistry {
        &self.stores
    }

    /// The configured tunables.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Render the current tree for a group, creating it on first access.
    /// This is the initial-page render: no connection is involved yet.
    pub async fn initial_tree(&self, group: &str) -> Result<Node, StoreError> {
        let group = self.stores.get_or_create(group)?;
        Ok(render(&self.template, &group.assigns().await))
    }

    /// Register a new connection and queue its initial `full` frame.
    ///
    /// The returned receiver is the wire: the transport forwards every
    /// frame it yields onto the socket.
    pub async fn join(
        &self,
        group: &str,
        user: &str,
    ) -> Result<(Arc<Connection>, mpsc::Receiver<ServerFrame>), JoinError> {
        let store_group = self.stores.get_or_create(group)?;
        let (connection, receiver) = Connection::new(
            group,
            user,
            self.config.write_queue,
            self.config.write_timeout,
        );
        self.connections.register(connection.clone())?;

        let tree = render(&self.template, &store_group.assigns().await);
        let frame = ServerFrame::Full { root: encode_full(&tree) };
        connection
            .with_last_tree(|last| *last = Some(tree))
            .await;
        if connection.send(frame).await.is_err() {
            // A fresh queue only fails if the receiver is already gone.
            self.connections.unregister(&connection);
        }
        Ok((connection, receiver))
    }

    /// Unregister a connection; the group is scheduled for disposal once
    /// its membership is empty.
    pub async fn leave(self: &Arc<Self>, connection: &Connection) {
        self.connections.unregister(connection);
        self.schedule_disposal(connection.group());
    }

    /// Dispatch one inbound frame from `connection`.
    ///
    /// `DeadlineExceeded` and `Decode` errors are fatal: the transport
    /// closes the wire on either.
    pub async fn dispatch(
        self: &Arc<Self>,
        connection: &Arc<Connection>,
        frame: ClientFrame,
    ) -> Result<(), DispatchError> {
        let frame = match frame {
            ClientFrame::Ping { t } => {
                if connection.send(ServerFrame::Pong { t }).await.is_err() {
                    self.drop_connection(connection).await;
                }
                return Ok(());
            }
            ClientFrame::Pong { .. } => return Ok(()),
            ClientFrame::Bind { fields } => {
                return self.dispatch_bind(connection, fields).await;
            }
            other => other,
        };

        let deadline = Instant::now() + self.config.dispatch_deadline;
        let Some(mut ctx) = ActionContext::from_frame(frame, deadline) else {
            return Ok(());
        };
        let group = self
            .stores
            .get(connection.group())
            .ok_or_else(|| DispatchError::GroupGone(connection.group().to_string()))?;

        let dispatched = timeout(self.config.dispatch_deadline, async {
            let mut store = group.store().lock().await;
            let kind = ctx.kind();
            let name = ctx.name().to_string();

            let outcome = run_change(store.as_mut(), &mut ctx);
            let mut errors = ctx.take_errors();
            match outcome {
                Ok(()) => {}
                Err(ChangeError::Validation(bag)) => errors.merge(bag),
                Err(ChangeError::General(message)) => errors.add_general(message),
            }

            let tree = render(&self.template, &store.assigns());
            // Fan out before releasing the group mutex: patches reach the
            // queues in dispatch order, group-wide.
            self.fan_out(
                connection.group(),
                &tree,
                Some(Acting { id: connection.id(), kind, name, errors }),
            )
            .await;
        })
        .await;

        match dispatched {
            Ok(()) => Ok(()),
            Err(_) => Err(DispatchError::DeadlineExceeded),
        }
    }

    /// Apply a `bind` frame: validate every field name against the store's
    /// declared map; any unknown name rejects the whole frame without
    /// mutation.
    async fn dispatch_bind(
        self: &Arc<Self>,
        connection: &Arc<Connection>,
        fields: HashMap<String, Value>,
    ) -> Result<(), DispatchError> {
        let group = self
            .stores
            .get(connection.group())
            .ok_or_else(|| DispatchError::GroupGone(connection.group().to_string()))?;

        let dispatched = timeout(self.config.dispatch_deadline, async {
            let mut store = group.store().lock().await;
            let declared = store.fields();
            let unknown: Vec<&str> = fields
                .keys()
                .map(String::as_str)
                .filter(|name| !declared.contains(name))
                .collect();
            if !unknown.is_empty() {
                tracing::warn!(
                    connection = %connection.id(),
                    fields = ?unknown,
                    "bind rejected: unknown fields"
                );
                let mut errors = Errors::new();
                errors.add_general(format!("unknown bind fields: {}", unknown.join(", ")));
                drop(store);
                self.reply_errors(connection, "bind", errors).await;
                return;
            }

            let mut errors = Errors::new();
            for (name, value) in &fields {
                if let Err(err) = store.set_field(name, value) {
                    errors.add(name.clone(), err.to_string());
                }
            }
            let tree = render(&self.template, &store.assigns());
            self.fan_out(
                connection.group(),
                &tree,
                Some(Acting {
                    id: connection.id(),
                    kind: ActionKind::Change,
                    name: "bind".to_string(),
                    errors,
                }),
            )
            .await;
        })
        .await;

        match dispatched {
            Ok(()) => Ok(()),
            Err(_) => Err(DispatchError::DeadlineExceeded),
        }
    }

    /// Re-render a group and fan the update out to its members. For
    /// server-initiated pushes (timers, pub/sub).
    pub async fn broadcast_group(self: &Arc<Self>, group_id: &str) {
        let Some(group) = self.stores.get(group_id) else {
            return;
        };
        let store = group.store().lock().await;
        let tree = render(&self.template, &store.assigns());
        self.fan_out(group_id, &tree, None).await;
    }

    /// Fan a fresh render out to every connection of one user, across all
    /// of their groups.
    pub async fn broadcast_user(self: &Arc<Self>, user: &str) {
        let mut trees: HashMap<String, Node> = HashMap::new();
        for connection in self.connections.get_by_user(user) {
            let group_id = connection.group().to_string();
            if !trees.contains_key(&group_id) {
                let Some(group) = self.stores.get(&group_id) else {
                    continue;
                };
                let assigns = group.assigns().await;
                trees.insert(group_id.clone(), render(&self.template, &assigns));
            }
            let tree = &trees[&group_id];
            if let Some(frame) = patch_frame_for(&connection, tree, None).await {
                if connection.send(frame).await.is_err() {
                    self.drop_connection(&connection).await;
                }
            }
        }
    }

    /// Compute and queue a per-connection patch for every member of a
    /// group. Patches are never shared: each connection's frame is diffed
    /// against its own `last_tree`. Send failures evict the connection
    /// without disturbing the rest of the group.
    async fn fan_out(self: &Arc<Self>, group: &str, tree: &Node, acting: Option<Acting>) {
        let mut failed: Vec<Arc<Connection>> = Vec::new();
        for target in self.connections.get_by_group(group) {
            let reply = acting
                .as_ref()
                .filter(|a| a.id == target.id());
            if let Some(frame) = patch_frame_for(&target, tree, reply).await {
                if let Err(err) = target.send(frame).await {
                    tracing::warn!(
                        connection = %target.id(),
                        %err,
                        "send failed; evicting connection"
                    );
                    failed.push(target);
                }
            }
        }
        for connection in failed {
            self.drop_connection(&connection).await;
        }
    }

    /// Send an errors-only patch to the acting connection.
    async fn reply_errors(self: &Arc<Self>, connection: &Arc<Connection>, ack: &str, errors: Errors) {
        let frame = ServerFrame::Patch {
            root: json!({}),
            errors: Some(errors.into_map()),
            meta: Some(json!({ "ack": ack })),
        };
        if connection.send(frame).await.is_err() {
            self.drop_connection(connection).await;
        }
    }

    /// Unregister a connection after a wire failure and schedule group
    /// disposal if it was the last member.
    async fn drop_connection(self: &Arc<Self>, connection: &Connection) {
        self.connections.unregister(connection);
        self.schedule_disposal(connection.group());
    }

    /// Once a group's membership hits zero, dispose of it after the grace
    /// period, unless a connection (re)joined in the meantime.
    fn schedule_disposal(self: &Arc<Self>, group: &str) {
        if self.connections.group_count(group) > 0 {
            return;
        }
        let handle = self.clone();
        let group = group.to_string();
        tokio::spawn(async move {
            sleep(handle.config.group_ttl).await;
            if handle.connections.group_count(&group) == 0 {
                handle.stores.remove(&group);
            }
        });
    }
}

/// Diff `tree` against the connection's private `last_tree`, replace it,
/// and build the outgoing frame. Non-acting connections skip empty patches;
/// the acting connection always gets its reply (ack and errors ride along
/// even when nothing changed).
async fn patch_frame_for(
    connection: &Connection,
    tree: &Node,
    acting: Option<&Acting>,
) -> Option<ServerFrame> {
    connection
        .with_last_tree(|last| {
            let frame = match last.as_ref() {
                None => Some(ServerFrame::Full { root: encode_full(tree) }),
                Some(prev) => {
                    let patch = crate::diff::diff(prev, tree).patch;
                    match acting {
                        None if patch.is_empty() => None,
                        None => Some(ServerFrame::Patch {
                            root: encode_patch(&patch),
                            errors: None,
                            meta: None,
                        }),
                        Some(reply) => Some(ServerFrame::Patch {
                            root: encode_patch(&patch),
                            errors: (!reply.errors.is_empty())
                                .then(|| reply.errors.clone().into_map()),
                            meta: ack_meta(reply),
                        }),
                    }
                }
            };
            *last = Some(tree.clone());
            frame
        })
        .await
}

/// The `meta.ack` block driving the client's form/button lifecycle.
/// `change`-kind dispatches never ack: live validation does not count
/// toward the auto-reset lifecycle.
fn ack_meta(reply: &Acting) -> Option<Value> {
    if reply.kind == ActionKind::Change && reply.name != "bind" {
        return None;
    }
    Some(json!({ "ack": reply.name }))
}

/// Invoke the store's `change`, converting a panic into a logged
/// `_general` action error instead of tearing the server down.
fn run_change(store: &mut dyn LiveStore, ctx: &mut ActionContext) -> Result<(), ChangeError> {
    match catch_unwind(AssertUnwindSafe(|| store.change(ctx))) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(
                action = ctx.name(),
                panic = %message,
                "change panicked; surfacing as _general"
            );
            Err(ChangeError::General(message))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
