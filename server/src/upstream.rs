//! REST upstream: entity collections and writes over HTTP.
//!
//! Collections live at `{base}/rest/v1/{entity_type}`. Updates and deletes
//! address one row with an `id=eq.{id}` filter, owner-scoped fetches add a
//! `created_by=eq.{user}` filter, and writes ask the upstream to echo the
//! written row back.

use async_trait::async_trait;
use dashsync_engine::{
    ConnectivityProbe, EntityName, EntityWrite, MutationOp, Reachability, Record, RemoteError, RemoteSource,
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// HTTP client for the upstream's REST interface.
#[derive(Debug, Clone)]
pub struct RestSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RestSource {
    /// Create a source with a default client.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_client(Client::new(), base_url, api_key)
    }

    /// Create a source sharing an existing client.
    pub fn with_client(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn collection_url(&self, entity_type: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, entity_type)
    }

    /// A request addressing one row. The id is percent-encoded as a query
    /// value, so ids with `&`, `#` or spaces stay intact.
    fn row_request(&self, method: Method, entity_type: &str, id: &str) -> RequestBuilder {
        self.client
            .request(method, self.collection_url(entity_type))
            .query(&[("id", format!("eq.{id}"))])
    }

    async fn fetch_rows(
        &self,
        entity_type: &EntityName,
        filters: &[(&str, String)],
    ) -> Result<Vec<Record>, RemoteError> {
        let request = self
            .client
            .get(self.collection_url(entity_type))
            .query(&[("select", "*")])
            .query(filters);
        let response = self.send(request).await?;

        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| RemoteError::Rejected(format!("malformed {entity_type} body: {e}")))?;

        let total = rows.len();
        let records: Vec<Record> = rows
            .into_iter()
            .filter_map(|row| match Record::from_value(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(entity_type = %entity_type, "Skipping row: {}", e);
                    None
                }
            })
            .collect();

        tracing::debug!(
            entity_type = %entity_type,
            rows = total,
            kept = records.len(),
            filtered = !filters.is_empty(),
            "Fetched collection"
        );

        Ok(records)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;
        check_status(response).await
    }
}

#[async_trait]
impl RemoteSource for RestSource {
    async fn fetch(&self, entity_type: &EntityName) -> Result<Vec<Record>, RemoteError> {
        self.fetch_rows(entity_type, &[]).await
    }

    async fn fetch_created_by(
        &self,
        entity_type: &EntityName,
        user_id: &str,
    ) -> Result<Vec<Record>, RemoteError> {
        self.fetch_rows(entity_type, &[("created_by", format!("eq.{user_id}"))])
            .await
    }

    async fn write(&self, write: &EntityWrite) -> Result<Option<Record>, RemoteError> {
        let row = |method: Method| {
            write
                .record_id
                .as_deref()
                .map(|id| self.row_request(method, &write.entity_type, id))
                .ok_or_else(|| RemoteError::Rejected(format!("{} needs a record id", write.operation)))
        };

        let request = match write.operation {
            MutationOp::Create => self
                .client
                .post(self.collection_url(&write.entity_type))
                .json(&write.payload),
            MutationOp::Update => row(Method::PATCH)?.json(&write.payload),
            MutationOp::Delete => row(Method::DELETE)?,
        }
        .header("Prefer", "return=representation");

        let response = self.send(request).await?;

        tracing::debug!(
            entity_type = %write.entity_type,
            operation = %write.operation,
            record_id = ?write.record_id,
            "Write accepted"
        );

        if write.operation == MutationOp::Delete {
            return Ok(None);
        }

        // The echoed representation is optional; an empty body still counts.
        let echoed = response.json::<Value>().await.ok();
        Ok(echoed.and_then(first_row))
    }
}

/// Map an HTTP status onto the engine's failure classes.
async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let reason = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };

    if is_transient(status) {
        Err(RemoteError::Unreachable(reason))
    } else {
        Err(RemoteError::Rejected(reason))
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn first_row(body: Value) -> Option<Record> {
    let row = match body {
        Value::Array(rows) => rows.into_iter().next()?,
        other => other,
    };
    Record::from_value(row).ok()
}

/// Reachability check: any HTTP answer below 500 from the health path.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpProbe {
    /// Probe `{base_url}{path}`.
    pub fn new(base_url: &str, path: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url: format!("{}{}", base_url.trim_end_matches('/'), path),
            api_key,
        }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn check(&self, timeout: Duration) -> Reachability {
        let mut request = self.client.get(&self.url).timeout(timeout);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        match request.send().await {
            Ok(response) => (!response.status().is_server_error()).into(),
            Err(e) => {
                tracing::debug!(url = %self.url, "Probe failed: {}", e);
                Reachability::Unreachable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn urls() {
        let source = RestSource::new("https://db.example.com/", None);
        assert_eq!(
            source.collection_url("agents"),
            "https://db.example.com/rest/v1/agents"
        );

        let request = source
            .row_request(Method::PATCH, "routines", "r1")
            .build()
            .unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://db.example.com/rest/v1/routines?id=eq.r1"
        );
    }

    #[test]
    fn row_ids_are_encoded() {
        let source = RestSource::new("https://db.example.com", None);
        let request = source
            .row_request(Method::DELETE, "routines", "a&b c#d")
            .build()
            .unwrap();

        let pairs: Vec<(String, String)> = request.url().query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("id".to_string(), "eq.a&b c#d".to_string())]);
        assert_eq!(request.url().fragment(), None);
    }

    #[test]
    fn transient_statuses() {
        assert!(is_transient(StatusCode::BAD_GATEWAY));
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient(StatusCode::CONFLICT));
        assert!(!is_transient(StatusCode::NOT_FOUND));
    }

    #[test]
    fn echoed_rows() {
        let record = first_row(json!([{"id": "r1", "is_active": true}])).unwrap();
        assert_eq!(record.id, "r1");

        let record = first_row(json!({"id": 7})).unwrap();
        assert_eq!(record.id, "7");

        assert!(first_row(json!([])).is_none());
    }
}
