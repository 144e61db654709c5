//! Error types for hook registration, dispatch and persistence.

use std::path::PathBuf;

use thiserror::Error;

use crate::ids::{HookId, InstanceId};

/// Errors surfaced by the hook engine.
///
/// Only [`HookError::AllocatorExhausted`] and [`HookError::Load`] reach a caller as `Err`.
/// The other variants are logged when a hook fails and show up in the
/// [`DispatchReport`](crate::dispatch::DispatchReport) as a status.
#[derive(Debug, Error)]
pub enum HookError {
    /// No hook with this id is registered.
    #[error("hook {0} is not registered")]
    NotFound(HookId),

    /// The mission or event owning the hook no longer exists.
    #[error("hook {id} targets instance {instance}, which is no longer running")]
    InvalidTarget {
        id: HookId,
        instance: InstanceId,
    },

    /// The hook's target ran but terminated abnormally.
    #[error("hook [{stack}] '{id}' -> '{entry}' failed: {message}")]
    RuntimeFailure {
        id: HookId,
        stack: String,
        entry: String,
        message: String,
    },

    /// The 32-bit hook id space is used up.
    #[error("hook id space exhausted")]
    AllocatorExhausted,

    /// A persisted hook document could not be restored.
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Reasons a hook document is rejected. A rejected load leaves the registry untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// A hook element lacks a field its kind requires.
    #[error("hook element {index} is missing '{field}'")]
    MissingField {
        index: usize,
        field: &'static str,
    },

    /// A hook element carries a `kind` that is neither mission nor event.
    #[error("hook element {index} has unknown kind '{kind}'")]
    UnknownKind {
        index: usize,
        kind: String,
    },

    /// A hook element names instance `0`, which never exists.
    #[error("hook element {index} names an invalid owning instance")]
    InvalidInstance {
        index: usize,
    },


    /// Hooks cannot be replaced while a broadcast is running.
    #[error("cannot load hooks while a broadcast is in progress")]
    DispatchInProgress,

    /// Restoring would need more ids than the id space holds.
    #[error("hook id space exhausted while restoring")]
    Exhausted,

    /// The document text is not a valid hook document.
    #[error("malformed hook document: {0}")]
    Parse(String),

    /// The save file could not be read.
    #[error("I/O error reading {path}: {message}")]
    Io {
        path: PathBuf,
        message: String,
    },
}

impl From<serde_json::Error> for LoadError {
    fn from(err: serde_json::Error) -> Self {
        LoadError::Parse(err.to_string())
    }
}
