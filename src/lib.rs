//! CouchDB supervision and document storage for the Beyond directory service.
//!
//! # Intention
//!
//! - Run a private CouchDB instance for a Beyond deployment or test run.
//! - Store users, networks and volumes as CouchDB documents, keyed by their
//!   natural identifiers.
//! - Map CouchDB's conflict and missing-document answers onto Beyond's
//!   duplicate and not-found errors.
//!
//! # Architectural Boundaries
//!
//! - Only CouchDB/persistence code belongs here.
//! - Storage, indexing and conflict detection stay inside CouchDB; incremental
//!   updates run there as design-document update functions.
//! - No validation of relationships between documents.

pub mod client;
pub mod config;
pub mod datastore;
pub mod design;
pub mod error;
pub mod model;
pub mod server;

pub use client::CouchClient;
pub use config::CouchDbConfig;
pub use datastore::{CouchDbDatastore, Datastore};
pub use error::{CouchError, DatastoreError, EntityKind, ServerError};
pub use model::{Network, NetworkUpdate, User, UserUpdate, Volume};
pub use server::CouchDbServer;
