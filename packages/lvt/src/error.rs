//! Error types

use thiserror::Error;

/// Errors produced while parsing or compiling a template.
///
/// Parse and compile failures are fatal at registration time: a handle is
/// never created from a template that did not compile.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// Syntax error in the template source
    #[error("parse error at line {line}, column {col}: {message}")]
    Parse {
        /// 1-based line of the offending token
        line: usize,
        /// 1-based column of the offending token
        col: usize,
        /// What went wrong
        message: String,
    },

    /// `{{template "name"}}` referenced a name that was never defined
    #[error("unknown template {0:?}")]
    UnknownTemplate(String),

    /// Template composition recursed into itself
    #[error("recursive template inclusion: {cycle}")]
    RecursiveInclude {
        /// The inclusion chain, e.g. `a -> b -> a`
        cycle: String,
    },
}

impl TemplateError {
    pub(crate) fn parse(line: usize, col: usize, message: impl Into<String>) -> Self {
        TemplateError::Parse {
            line,
            col,
            message: message.into(),
        }
    }
}

/// Errors from applying a patch to a previously rendered tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// A range op carried a child whose slot count disagrees with the range shape
    #[error("shape mismatch: expected {expected} dynamic slots, got {got}")]
    ShapeMismatch {
        /// Slots implied by the range statics
        expected: usize,
        /// Slots carried by the patch
        got: usize,
    },

    /// A patch addressed a slot index the node does not have
    #[error("slot {0} out of range")]
    SlotOutOfRange(usize),

    /// A patch recursed into a slot that holds a different kind of value
    #[error("slot {slot} kind mismatch: {message}")]
    KindMismatch {
        /// Offending slot index
        slot: usize,
        /// What was expected vs found
        message: String,
    },

    /// A range op referenced a child key that is not present
    #[error("range key {0:?} not found")]
    UnknownKey(String),
}

/// Errors from store instantiation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store's `init` rejected the group
    #[error("store init failed: {0}")]
    Init(String),
}

/// Error returned by a store's `change` callback.
///
/// `Validation` carries a field-name → message map that is placed in the
/// `errors` block of the acting connection's next patch; anything else is
/// surfaced under the `_general` key.
#[derive(Error, Debug, Clone)]
pub enum ChangeError {
    /// Field-level validation errors
    #[error("validation failed")]
    Validation(crate::action::Errors),

    /// A general, non-field error message
    #[error("{0}")]
    General(String),
}

impl From<crate::action::Errors> for ChangeError {
    fn from(errors: crate::action::Errors) -> Self {
        ChangeError::Validation(errors)
    }
}

/// Errors from `bind` field synchronisation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// The field name is not in the store's declared field map
    #[error("unknown bind field {0:?}")]
    UnknownField(String),

    /// The value could not be applied to the field
    #[error("invalid value for field {field:?}: {message}")]
    InvalidValue {
        /// Rejected field
        field: String,
        /// Why the value was rejected
        message: String,
    },
}

/// Errors from the connection registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The configured connection cap was reached
    #[error("connection registry is full ({0} connections)")]
    Full(usize),
}

/// Errors accepting a new connection into a group.
#[derive(Error, Debug)]
pub enum JoinError {
    /// The connection cap was reached
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The group's store could not be created
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors queueing a frame onto one connection's wire.
///
/// Either way the connection is marked for unregistration by the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The bounded write queue stayed full past the write timeout
    #[error("write queue full past the write timeout")]
    Timeout,

    /// The wire side of the queue is gone
    #[error("wire closed")]
    Closed,
}

/// Errors from dispatching an inbound frame.
///
/// `DeadlineExceeded` and `Decode` are fatal for the connection: the
/// transport closes the wire on either.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The connection's group no longer exists
    #[error("group {0:?} is gone")]
    GroupGone(String),

    /// Dispatch ran past the configured deadline
    #[error("dispatch deadline exceeded")]
    DeadlineExceeded,

    /// The inbound frame could not be decoded
    #[error("malformed frame: {0}")]
    Decode(String),

    /// Store instantiation failed mid-dispatch
    #[error(transparent)]
    Store(#[from] StoreError),
}
