//! JSON-file credential store.
//!
//! Each kind lives in its own file under the data directory. Every write goes
//! to a uniquely named sibling `.tmp` file which is fsynced and renamed over
//! the target, so a concurrent `load` sees the old record or the new one, even
//! when another process (the CLI) writes the same kind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{CredentialStore, StorageError};
use crate::models::credential::{CredentialKind, CredentialRecord};

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens the store, creating the directory when missing and probing that
    /// it is writable. Any failure here should abort startup.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        let probe = dir.join(".write_probe");
        tokio::fs::write(&probe, b"ok")
            .await
            .map_err(|e| io_error(&probe, e))?;
        tokio::fs::remove_file(&probe)
            .await
            .map_err(|e| io_error(&probe, e))?;

        tracing::debug!(dir = %dir.display(), "credential store opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: CredentialKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    // `.secret_token.json.<uuid>.tmp`
    fn tmp_path_for(&self, kind: CredentialKind) -> PathBuf {
        self.dir.join(format!(
            ".{}.{}.tmp",
            kind.file_name(),
            uuid::Uuid::new_v4().simple()
        ))
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn load(&self, kind: CredentialKind) -> Option<CredentialRecord> {
        let path = self.path_for(kind);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(kind = %kind, path = %path.display(), "failed to read credential: {}", e);
                return None;
            }
        };

        match serde_json::from_slice::<CredentialRecord>(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(kind = %kind, path = %path.display(), "corrupt credential record: {}", e);
                None
            }
        }
    }

    async fn save(&self, kind: CredentialKind, record: &CredentialRecord) -> Result<(), StorageError> {
        let path = self.path_for(kind);
        let tmp_path = self.tmp_path_for(kind);
        let encoded = serde_json::to_vec(record)?;

        let written = match write_synced(&tmp_path, &encoded).await {
            Ok(()) => tokio::fs::rename(&tmp_path, &path)
                .await
                .map_err(|e| io_error(&path, e)),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    tracing::warn!(path = %tmp_path.display(), "failed to remove temp file: {}", cleanup);
                }
            }
            return Err(e);
        }

        tracing::debug!(kind = %kind, fingerprint = %record.fingerprint(), "credential persisted");
        Ok(())
    }
}

/// Writes `bytes` to a fresh owner-only file and fsyncs it.
async fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await.map_err(|e| io_error(path, e))?;
    file.write_all(bytes).await.map_err(|e| io_error(path, e))?;
    file.sync_all().await.map_err(|e| io_error(path, e))?;
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        assert!(store.load(CredentialKind::GatewayAuth).await.is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        let record = CredentialRecord::new("abc123").with_expiration(1_900_000_000);
        store.save(CredentialKind::UpstreamAccess, &record).await.unwrap();

        let loaded = store.load(CredentialKind::UpstreamAccess).await.unwrap();
        assert_eq!(loaded, record);
        // kinds are independent
        assert!(store.load(CredentialKind::GatewayAuth).await.is_none());
        assert!(leftover_tmp_files(dir.path()).is_empty());
    }

    fn leftover_tmp_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().map_or(false, |ext| ext == "tmp"))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_stores_on_one_dir_write_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let server = FileStore::open(dir.path()).await.unwrap();
        let cli = FileStore::open(dir.path()).await.unwrap();
        let kind = CredentialKind::GatewayAuth;
        server.save(kind, &CredentialRecord::new("initial")).await.unwrap();

        let mut set = tokio::task::JoinSet::new();
        for (name, store) in [("server", server.clone()), ("cli", cli.clone())] {
            set.spawn(async move {
                let mut written = Vec::new();
                for i in 0..50 {
                    let value = format!("{}-{}-{}", name, i, "x".repeat(4096));
                    store.save(kind, &CredentialRecord::new(value.clone())).await.unwrap();
                    written.push(value);
                }
                written
            });
        }

        let reader = {
            let store = server.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    // a partial or interleaved file would load as None
                    assert!(store.load(kind).await.is_some());
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut written = Vec::new();
        while let Some(res) = set.join_next().await {
            written.extend(res.unwrap());
        }
        reader.await.unwrap();

        let persisted = cli.load(kind).await.unwrap();
        assert!(written.contains(&persisted.value));
        assert!(leftover_tmp_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let target = store.path_for(CredentialKind::GatewayAuth);
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("occupied"), b"x").unwrap();

        let res = store
            .save(CredentialKind::GatewayAuth, &CredentialRecord::generate())
            .await;
        assert!(matches!(res, Err(StorageError::Io { .. })));
        assert!(leftover_tmp_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        std::fs::write(store.path_for(CredentialKind::GatewayAuth), b"{\"token\": ").unwrap();
        assert!(store.load(CredentialKind::GatewayAuth).await.is_none());
    }

    #[tokio::test]
    async fn test_reads_legacy_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        std::fs::write(
            store.path_for(CredentialKind::GatewayAuth),
            br#"{"secret_token": "0123abcd"}"#,
        )
        .unwrap();
        let loaded = store.load(CredentialKind::GatewayAuth).await.unwrap();
        assert_eq!(loaded.value, "0123abcd");
    }

    #[tokio::test]
    async fn test_open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FileStore::open(&nested).await.unwrap();
        assert!(store.dir().is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store
            .save(CredentialKind::GatewayAuth, &CredentialRecord::generate())
            .await
            .unwrap();
        let mode = std::fs::metadata(store.path_for(CredentialKind::GatewayAuth))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
