//! Minimal typed client for the CouchDB HTTP API.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::CouchError;

/// Body of `GET /`.
#[derive(Debug, Clone, Deserialize)]
pub struct Welcome {
    pub couchdb: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl Welcome {
    pub fn is_welcome(&self) -> bool {
        self.couchdb == "Welcome"
    }
}

/// One row of a view result.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewRow {
    pub id: String,
    pub key: Value,
    pub value: Value,
}

#[derive(Debug, Deserialize)]
struct ViewResult {
    rows: Vec<ViewRow>,
}

#[derive(Debug, Deserialize)]
struct SaveResult {
    rev: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    reason: String,
}

/// CouchDB server handle
#[derive(Debug, Clone)]
pub struct CouchClient {
    http: Client,
    base: String,
}

impl CouchClient {
    /// Create a client for the server at `uri`, e.g. `http://127.0.0.1:5984/`
    pub fn new(uri: &str) -> Self {
        Self::with_http(Client::new(), uri)
    }

    pub fn with_http(http: Client, uri: &str) -> Self {
        Self {
            http,
            base: uri.trim_end_matches('/').to_string(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.base
    }

    pub async fn welcome(&self) -> Result<Welcome, CouchError> {
        let path = "/".to_string();
        let response = self.http.get(format!("{}/", self.base)).send().await?;
        let response = check(response, &path).await?;
        Ok(response.json().await?)
    }

    /// Create database `name`; an existing database is not an error.
    pub async fn create_database(&self, name: &str) -> Result<(), CouchError> {
        let path = format!("/{name}");
        let response = self.request(self.http.put(self.url(&path))).await?;
        if response.status() == StatusCode::PRECONDITION_FAILED {
            let body = error_body(response).await;
            if body.error == "file_exists" {
                debug!(database = name, "database already exists");
                return Ok(());
            }
            return Err(CouchError::Status {
                path,
                status: StatusCode::PRECONDITION_FAILED,
                error: body.error,
                reason: body.reason,
            });
        }
        check(response, &path).await?;
        debug!(database = name, "created database");
        Ok(())
    }

    /// Fetch a document, including its `_id` and `_rev`.
    pub async fn get_document<T: DeserializeOwned>(
        &self,
        db: &str,
        id: &str,
    ) -> Result<T, CouchError> {
        let path = document_path(db, id);
        let response = self.request(self.http.get(self.url(&path))).await?;
        let response = check(response, &path).await?;
        Ok(response.json().await?)
    }

    /// Create or overwrite a document, returning its new revision. Writing
    /// without the current `_rev` yields [`CouchError::Conflict`].
    pub async fn save_document<T: Serialize + ?Sized>(
        &self,
        db: &str,
        id: &str,
        doc: &T,
    ) -> Result<String, CouchError> {
        let path = document_path(db, id);
        let response = self
            .request(self.http.put(self.url(&path)).json(doc))
            .await?;
        let response = check(response, &path).await?;
        let saved: SaveResult = response.json().await?;
        debug!(db, id, rev = %saved.rev, "saved document");
        Ok(saved.rev)
    }

    /// Invoke update handler `handler` of design document `design` on `id`,
    /// passing `args` as query parameters.
    pub async fn update_document(
        &self,
        db: &str,
        design: &str,
        handler: &str,
        id: &str,
        args: &[(String, String)],
    ) -> Result<Value, CouchError> {
        let path = format!(
            "/{db}/_design/{design}/_update/{handler}/{}",
            urlencoding::encode(id)
        );
        let response = self
            .request(self.http.put(self.url(&path)).query(args))
            .await?;
        let response = check(response, &path).await?;
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Read every row of view `view` in design document `design`.
    pub async fn query_view(
        &self,
        db: &str,
        design: &str,
        view: &str,
    ) -> Result<Vec<ViewRow>, CouchError> {
        let path = format!("/{db}/_design/{design}/_view/{view}");
        let response = self.request(self.http.get(self.url(&path))).await?;
        let response = check(response, &path).await?;
        let result: ViewResult = response.json().await?;
        Ok(result.rows)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn request(&self, builder: RequestBuilder) -> Result<Response, CouchError> {
        Ok(builder.send().await?)
    }
}

/// Path of a document. Design documents keep their `_design/` prefix as a
/// path segment; other ids are percent-encoded so `owner/name` stays whole.
fn document_path(db: &str, id: &str) -> String {
    match id.strip_prefix("_design/") {
        Some(design) => format!("/{db}/_design/{}", urlencoding::encode(design)),
        None => format!("/{db}/{}", urlencoding::encode(id)),
    }
}

async fn error_body(response: Response) -> ErrorBody {
    response.json().await.unwrap_or_default()
}

async fn check(response: Response, path: &str) -> Result<Response, CouchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let path = path.to_string();
    match status {
        StatusCode::NOT_FOUND => Err(CouchError::NotFound { path }),
        StatusCode::CONFLICT => Err(CouchError::Conflict { path }),
        _ => {
            let body = error_body(response).await;
            Err(CouchError::Status {
                path,
                status,
                error: body.error,
                reason: body.reason,
            })
        }
    }
}
