pub mod file;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::credential::{CredentialKind, CredentialRecord};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable persistence for credential records, one record per kind.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the persisted record. Missing, unreadable or corrupt records
    /// all come back as `None`.
    async fn load(&self, kind: CredentialKind) -> Option<CredentialRecord>;

    /// Replaces the persisted record. Readers observe either the old or the
    /// new record, never a partial write.
    async fn save(&self, kind: CredentialKind, record: &CredentialRecord) -> Result<(), StorageError>;
}
