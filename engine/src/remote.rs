//! The upstream data source the engine reads from and writes to.

use crate::mutation::EntityWrite;
use crate::{EntityName, Error, Record};
use async_trait::async_trait;
use thiserror::Error;

/// Column naming the user who created a record.
pub const CREATED_BY: &str = "created_by";

/// Why an upstream call failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The upstream could not be reached (network error, timeout, 5xx).
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The upstream answered and refused the request.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether the failure means the upstream is unreachable.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RemoteError::Unreachable(_))
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unreachable(msg) => Error::Unreachable(msg),
            RemoteError::Rejected(msg) => Error::Rejected(msg),
        }
    }
}

/// Per-entity-type fetch and write access to the upstream.
///
/// The engine wraps every call in a timeout; a call that exceeds it is
/// treated as [`RemoteError::Unreachable`].
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch the full collection for one entity type.
    async fn fetch(&self, entity_type: &EntityName) -> Result<Vec<Record>, RemoteError>;

    /// Fetch only the records created by `user_id`.
    ///
    /// The default fetches the whole collection and keeps the rows whose
    /// `created_by` column matches; sources that can filter upstream should
    /// override it.
    async fn fetch_created_by(
        &self,
        entity_type: &EntityName,
        user_id: &str,
    ) -> Result<Vec<Record>, RemoteError> {
        let records = self.fetch(entity_type).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.str_field(CREATED_BY) == Some(user_id))
            .collect())
    }

    /// Apply one write. Returns the written record when the upstream echoes
    /// it back (deletes usually return `None`).
    async fn write(&self, write: &EntityWrite) -> Result<Option<Record>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_to_engine_errors() {
        let err: Error = RemoteError::Unreachable("dns".into()).into();
        assert_eq!(err, Error::Unreachable("dns".into()));

        let err: Error = RemoteError::Rejected("409 conflict".into()).into();
        assert_eq!(err, Error::Rejected("409 conflict".into()));
    }

    struct Fixed;

    #[async_trait]
    impl RemoteSource for Fixed {
        async fn fetch(&self, _entity_type: &EntityName) -> Result<Vec<Record>, RemoteError> {
            Ok(vec![
                Record::from_value(json!({"id": "v1", "created_by": "u1"})).unwrap(),
                Record::from_value(json!({"id": "v2", "created_by": "u2"})).unwrap(),
                Record::from_value(json!({"id": "v3"})).unwrap(),
            ])
        }

        async fn write(&self, _write: &EntityWrite) -> Result<Option<Record>, RemoteError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn default_owner_filter_keeps_matching_rows() {
        let rows = Fixed
            .fetch_created_by(&"visions".to_string(), "u1")
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["v1"]);
    }

    #[test]
    fn unreachable_classification() {
        assert!(RemoteError::Unreachable("timeout".into()).is_unreachable());
        assert!(!RemoteError::Rejected("400".into()).is_unreachable());
    }
}
