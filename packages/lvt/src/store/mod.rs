//! Stores and session groups
//!
//! A *store* is the application-supplied state behind one session group:
//! many connections (browser tabs) share it, and all mutations happen in
//! `change` under the group's mutex. The registry creates stores lazily per
//! group ID (first access single-flights through the registry write lock),
//! and a group becomes eligible for disposal once its last connection
//! leaves and the grace period expires.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::action::ActionContext;
use crate::error::{BindError, ChangeError, StoreError};

/// Application state shared by one session group.
///
/// Implementors typically derive `Serialize` and return
/// `serde_json::to_value(self)` from [`assigns`](LiveStore::assigns).
///
/// # Example
/// ```rust
/// use lvt::store::LiveStore;
/// use lvt::action::ActionContext;
/// use lvt::error::ChangeError;
/// use serde::Serialize;
/// use serde_json::{json, Value};
///
/// #[derive(Default, Serialize)]
/// struct Counter {
///     #[serde(rename = "N")]
///     n: i64,
/// }
///
/// impl LiveStore for Counter {
///     fn change(&mut self, ctx: &mut ActionContext) -> Result<(), ChangeError> {
///         if ctx.name() == "inc" {
///             self.n += 1;
///         }
///         Ok(())
///     }
///
///     fn assigns(&self) -> Value {
///         json!({ "N": self.n })
///     }
/// }
/// ```
pub trait LiveStore: Send + 'static {
    /// Called once when the group is created; an error aborts creation.
    fn init(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Handle one action. Runs under the group mutex; must treat itself as
    /// retriable from the caller's perspective (the dispatch may be
    /// abandoned at the deadline).
    fn change(&mut self, ctx: &mut ActionContext) -> Result<(), ChangeError>;

    /// The data the template renders against. Read-only with respect to
    /// the store's state.
    fn assigns(&self) -> Value;

    /// Declared bindable fields for `bind` frames; anything else is
    /// rejected without mutation.
    fn fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Apply one bound field. Only called for names in
    /// [`fields`](LiveStore::fields).
    fn set_field(&mut self, field: &str, _value: &Value) -> Result<(), BindError> {
        Err(BindError::UnknownField(field.to_string()))
    }
}

/// Factory producing a fresh store for a new group.
pub type StoreFactory = Arc<dyn Fn() -> Box<dyn LiveStore> + Send + Sync>;

/// One session group: the store plus the mutex that serialises writes.
pub struct Group {
    id: String,
    store: Mutex<Box<dyn LiveStore>>,
}

impl Group {
    /// The group identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The store mutex. Held for the whole of a dispatch so the observable
    /// data sequence is a total order per group.
    pub fn store(&self) -> &Mutex<Box<dyn LiveStore>> {
        &self.store
    }

    /// Render-ready assigns, read under the group mutex.
    pub async fn assigns(&self) -> Value {
        self.store.lock().await.assigns()
    }
}

/// Process-wide map of group ID → live group.
///
/// Explicit lifecycle: created at start, dropped at shutdown; no implicit
/// global access.
pub struct StoreRegistry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
    factory: StoreFactory,
}

impl StoreRegistry {
    /// Create a registry around a store factory.
    pub fn new(factory: StoreFactory) -> Self {
        StoreRegistry {
            groups: RwLock::new(HashMap::new()),
            factory,
        }
    }

    /// The group for `id`, if it exists.
    pub fn get(&self, id: &str) -> Option<Arc<Group>> {
        self.groups.read().get(id).cloned()
    }

    /// The group for `id`, creating it on first access.
    ///
    /// Creation single-flights through the write lock: concurrent first
    /// accesses observe exactly one instantiation. An `init` error is
    /// returned and the group is not memoised.
    pub fn get_or_create(&self, id: &str) -> Result<Arc<Group>, StoreError> {
        if let Some(group) = self.get(id) {
            return Ok(group);
        }
        let mut groups = self.groups.write();
        if let Some(group) = groups.get(id) {
            return Ok(group.clone());
        }
        let mut store = (self.factory)();
        store.init()?;
        let group = Arc::new(Group {
            id: id.to_string(),
            store: Mutex::new(store),
        });
        groups.insert(id.to_string(), group.clone());
        tracing::debug!(group = id, "group created");
        Ok(group)
    }

    /// Drop the group for `id`, if present.
    pub fn remove(&self, id: &str) -> Option<Arc<Group>> {
        let removed = self.groups.write().remove(id);
        if removed.is_some() {
            tracing::debug!(group = id, "group disposed");
        }
        removed
    }

    /// Number of live groups.
    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    /// True when no group is live.
    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }
}
