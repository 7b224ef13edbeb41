use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Failures talking to the CouchDB HTTP API.
#[derive(Error, Debug)]
pub enum CouchError {
    #[error("document not found: {path}")]
    NotFound { path: String },

    #[error("document update conflict: {path}")]
    Conflict { path: String },

    #[error("CouchDB answered {status} on {path}: {error} ({reason})")]
    Status {
        path: String,
        status: StatusCode,
        error: String,
        reason: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures supervising the CouchDB process.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("CouchDB did not {phase} within {timeout:?}")]
    Timeout { phase: &'static str, timeout: Duration },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// The document collections Beyond stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Network,
    Volume,
}

impl EntityKind {
    /// Name of the CouchDB database holding this kind of document.
    pub fn database(self) -> &'static str {
        match self {
            EntityKind::User => "users",
            EntityKind::Network => "networks",
            EntityKind::Volume => "volumes",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::User => "user",
            EntityKind::Network => "network",
            EntityKind::Volume => "volume",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by [`crate::Datastore`] operations.
#[derive(Error, Debug)]
pub enum DatastoreError {
    #[error("{kind} '{id}' already exists")]
    Duplicate { kind: EntityKind, id: String },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },

    #[error(transparent)]
    Couch(#[from] CouchError),
}

impl DatastoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DatastoreError::Duplicate { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DatastoreError::NotFound { .. })
    }
}
