use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::client::CouchClient;
use crate::design::{self, DESIGN, UPDATE_HANDLER, USERS_PER_NAME};
use crate::error::{CouchError, DatastoreError, EntityKind};
use crate::model::{qualified_name, Network, NetworkUpdate, User, UserUpdate, Volume};

/// Persistence contract of the Beyond service.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn user_insert(&self, user: &User) -> Result<(), DatastoreError>;
    async fn user_fetch(&self, name: &str) -> Result<User, DatastoreError>;
    async fn user_update(&self, name: &str, diff: &UserUpdate) -> Result<(), DatastoreError>;
    async fn user_list(&self) -> Result<Vec<User>, DatastoreError>;

    async fn network_insert(&self, network: &Network) -> Result<(), DatastoreError>;
    async fn network_fetch(&self, owner: &str, name: &str) -> Result<Network, DatastoreError>;
    /// `id` is the qualified `owner/name`.
    async fn network_update(&self, id: &str, diff: &NetworkUpdate) -> Result<(), DatastoreError>;

    async fn volume_insert(&self, volume: &Volume) -> Result<(), DatastoreError>;
    async fn volume_fetch(&self, owner: &str, name: &str) -> Result<Volume, DatastoreError>;
}

/// [`Datastore`] backed by a CouchDB server.
#[derive(Debug, Clone)]
pub struct CouchDbDatastore {
    client: CouchClient,
}

impl CouchDbDatastore {
    /// Create the `users`, `networks` and `volumes` databases if needed and
    /// upload their design documents.
    pub async fn new(client: CouchClient) -> Result<Self, CouchError> {
        let kinds = [EntityKind::Network, EntityKind::User, EntityKind::Volume];
        try_join_all(kinds.iter().map(|kind| client.create_database(kind.database()))).await?;

        let store = Self { client };
        store
            .install_design(EntityKind::User, design::users_design())
            .await?;
        store
            .install_design(EntityKind::Network, design::networks_design())
            .await?;
        info!(uri = store.client.uri(), "CouchDB datastore ready");
        Ok(store)
    }

    pub fn client(&self) -> &CouchClient {
        &self.client
    }

    async fn install_design(&self, kind: EntityKind, design: Value) -> Result<(), CouchError> {
        let db = kind.database();
        let id = design::design_id();
        let existing = match self.client.get_document::<Value>(db, &id).await {
            Ok(doc) => Some(doc),
            Err(CouchError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        let merged = design::merge_design(existing, design);
        self.client.save_document(db, &id, &merged).await?;
        debug!(db, "installed design document");
        Ok(())
    }

    async fn insert<T: Serialize>(
        &self,
        kind: EntityKind,
        id: &str,
        doc: &T,
    ) -> Result<(), DatastoreError> {
        let mut json = to_object(doc)?;
        json.insert("_id".to_string(), Value::String(id.to_string()));
        match self.client.save_document(kind.database(), id, &json).await {
            Ok(_) => Ok(()),
            Err(CouchError::Conflict { .. }) => Err(DatastoreError::Duplicate {
                kind,
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch(&self, kind: EntityKind, id: &str) -> Result<Map<String, Value>, DatastoreError> {
        match self.client.get_document(kind.database(), id).await {
            Ok(doc) => Ok(strip_metadata(doc)),
            Err(CouchError::NotFound { .. }) => Err(DatastoreError::NotFound {
                kind,
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update<T: Serialize>(
        &self,
        kind: EntityKind,
        id: &str,
        diff: &T,
    ) -> Result<(), DatastoreError> {
        let args = update_args(diff)?;
        let result = self
            .client
            .update_document(kind.database(), DESIGN, UPDATE_HANDLER, id, &args)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(CouchError::NotFound { .. }) => Err(DatastoreError::NotFound {
                kind,
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Datastore for CouchDbDatastore {
    async fn user_insert(&self, user: &User) -> Result<(), DatastoreError> {
        self.insert(EntityKind::User, &user.name, user).await
    }

    async fn user_fetch(&self, name: &str) -> Result<User, DatastoreError> {
        let mut doc = self.fetch(EntityKind::User, name).await?;
        doc.insert("id".to_string(), Value::String(name.to_string()));
        decode(doc)
    }

    async fn user_update(&self, name: &str, diff: &UserUpdate) -> Result<(), DatastoreError> {
        self.update(EntityKind::User, name, diff).await
    }

    async fn user_list(&self) -> Result<Vec<User>, DatastoreError> {
        let rows = self
            .client
            .query_view(EntityKind::User.database(), DESIGN, USERS_PER_NAME)
            .await?;
        rows.into_iter()
            .map(|row| {
                let mut doc = match row.value {
                    Value::Object(map) => strip_metadata(map),
                    _ => Map::new(),
                };
                doc.insert("id".to_string(), Value::String(row.id));
                decode(doc)
            })
            .collect()
    }

    async fn network_insert(&self, network: &Network) -> Result<(), DatastoreError> {
        self.insert(EntityKind::Network, &network.name, network).await
    }

    async fn network_fetch(&self, owner: &str, name: &str) -> Result<Network, DatastoreError> {
        let doc = self
            .fetch(EntityKind::Network, &qualified_name(owner, name))
            .await?;
        decode(doc)
    }

    async fn network_update(
        &self,
        id: &str,
        diff: &NetworkUpdate,
    ) -> Result<(), DatastoreError> {
        self.update(EntityKind::Network, id, diff).await
    }

    async fn volume_insert(&self, volume: &Volume) -> Result<(), DatastoreError> {
        self.insert(EntityKind::Volume, &volume.name, volume).await
    }

    async fn volume_fetch(&self, owner: &str, name: &str) -> Result<Volume, DatastoreError> {
        let doc = self
            .fetch(EntityKind::Volume, &qualified_name(owner, name))
            .await?;
        decode(doc)
    }
}

fn to_object<T: Serialize>(doc: &T) -> Result<Map<String, Value>, CouchError> {
    match serde_json::to_value(doc)? {
        Value::Object(map) => Ok(map),
        other => Ok(Map::from_iter([("value".to_string(), other)])),
    }
}

fn decode<T: DeserializeOwned>(doc: Map<String, Value>) -> Result<T, DatastoreError> {
    serde_json::from_value(Value::Object(doc))
        .map_err(|e| DatastoreError::Couch(CouchError::Json(e)))
}

/// Drop CouchDB bookkeeping (`_id`, `_rev`, ...) from a fetched document.
fn strip_metadata(mut doc: Map<String, Value>) -> Map<String, Value> {
    doc.retain(|key, _| !key.starts_with('_'));
    doc
}

/// One query argument per present field, each JSON-encoded.
fn update_args<T: Serialize>(diff: &T) -> Result<Vec<(String, String)>, CouchError> {
    to_object(diff)?
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| -> Result<(String, String), CouchError> {
            Ok((name, serde_json::to_string(&value)?))
        })
        .collect()
}
