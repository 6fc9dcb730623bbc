use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::models::credential::{CredentialKind, CredentialRecord};
use crate::store::{CredentialStore, StorageError};

/// Per-kind state: `write` serialises every store access for the kind,
/// `current` is what the auth gate reads.
struct Slot {
    write: Mutex<()>,
    current: RwLock<Option<CredentialRecord>>,
}

impl Slot {
    fn new(initial: Option<CredentialRecord>) -> Self {
        Self {
            write: Mutex::new(()),
            current: RwLock::new(initial),
        }
    }
}

/// In-memory copy of every credential, kept consistent with the backing
/// store.
///
/// The cached record is only replaced after the store accepted the new one,
/// and only while the kind's write lock is still held. Cache readers never
/// wait on disk I/O: until a rotation commits they keep seeing the previous
/// value.
#[derive(Clone)]
pub struct CredentialCache {
    store: Arc<dyn CredentialStore>,
    slots: Arc<HashMap<CredentialKind, Slot>>,
}

impl CredentialCache {
    /// Loads every kind from the store as-is.
    pub async fn open(store: Arc<dyn CredentialStore>) -> Self {
        let mut slots = HashMap::new();
        for kind in CredentialKind::ALL {
            slots.insert(kind, Slot::new(store.load(kind).await));
        }
        Self {
            store,
            slots: Arc::new(slots),
        }
    }

    /// Like [`open`](Self::open), but a missing gateway-auth token is
    /// generated and persisted; failing to persist it is a startup error.
    pub async fn init(store: Arc<dyn CredentialStore>) -> Result<Self, StorageError> {
        let cache = Self::open(store).await;

        if cache.current(CredentialKind::GatewayAuth).await.is_none() {
            let record = cache
                .rotate(CredentialKind::GatewayAuth, || async {
                    Ok::<_, StorageError>(CredentialRecord::generate())
                })
                .await?;
            tracing::info!(
                fingerprint = %record.fingerprint(),
                "generated initial gateway token"
            );
        }

        Ok(cache)
    }

    fn slot(&self, kind: CredentialKind) -> &Slot {
        // every kind is inserted by `init`
        &self.slots[&kind]
    }

    /// Cached record for `kind`.
    pub async fn current(&self, kind: CredentialKind) -> Option<CredentialRecord> {
        self.slot(kind).current.read().await.clone()
    }

    /// Runs `check` against the cached record without cloning it.
    pub async fn with_current<R>(
        &self,
        kind: CredentialKind,
        check: impl FnOnce(Option<&CredentialRecord>) -> R,
    ) -> R {
        let guard = self.slot(kind).current.read().await;
        check(guard.as_ref())
    }

    /// Reads the persisted record under the kind's write lock and refreshes
    /// the cached copy from it.
    pub async fn load_persisted(&self, kind: CredentialKind) -> Option<CredentialRecord> {
        let slot = self.slot(kind);
        let _write = slot.write.lock().await;
        let persisted = self.store.load(kind).await;
        let mut current = slot.current.write().await;
        if *current != persisted {
            tracing::debug!(kind = %kind, "cached credential refreshed from store");
            current.clone_from(&persisted);
        }
        persisted
    }

    /// Produces a new record with `make`, persists it and swaps it into the
    /// cache, all under the kind's write lock. On any error the store and the
    /// cache keep the previous record.
    pub async fn rotate<F, Fut, E>(&self, kind: CredentialKind, make: F) -> Result<CredentialRecord, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CredentialRecord, E>>,
        E: From<StorageError>,
    {
        let slot = self.slot(kind);
        let _write = slot.write.lock().await;

        let record = make().await?;
        self.store.save(kind, &record).await?;
        *slot.current.write().await = Some(record.clone());

        tracing::info!(kind = %kind, fingerprint = %record.fingerprint(), "credential rotated");
        Ok(record)
    }
}
