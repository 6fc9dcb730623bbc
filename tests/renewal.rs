//! Renewal scheduler behaviour against a scripted issuer.
//!
//! Covers the expiry policy end to end: single check cycles via `run_once`,
//! failure handling, the spawned loop and its shutdown.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use gateway::cache::CredentialCache;
use gateway::errors::IssuanceError;
use gateway::jobs::renewal::{RenewalOutcome, RenewalScheduler, RenewalSettings};
use gateway::models::credential::{CredentialKind, CredentialRecord, SECONDS_PER_DAY};
use gateway::proxy::upstream::TokenIssuer;
use gateway::store::file::FileStore;
use gateway::store::CredentialStore;

#[derive(Default)]
struct ScriptedIssuer {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl ScriptedIssuer {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenIssuer for ScriptedIssuer {
    async fn issue(&self, _name: &str, duration_days: u32) -> Result<CredentialRecord, IssuanceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) {
            return Err(IssuanceError::Rejected {
                status: 503,
                body: "supervisor unavailable".into(),
            });
        }
        let now = chrono::Utc::now().timestamp();
        Ok(CredentialRecord::new(format!("issued-{}", n))
            .with_expiration(now + i64::from(duration_days) * SECONDS_PER_DAY))
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<FileStore>,
    issuer: Arc<ScriptedIssuer>,
    scheduler: RenewalScheduler,
}

async fn harness(existing: Option<CredentialRecord>, settings: RenewalSettings) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(dir.path()).await.unwrap());
    if let Some(record) = existing {
        store.save(CredentialKind::UpstreamAccess, &record).await.unwrap();
    }
    let cache = CredentialCache::init(store.clone()).await.unwrap();
    let issuer = Arc::new(ScriptedIssuer::default());
    let scheduler = RenewalScheduler::new(cache, issuer.clone(), settings);
    Harness {
        _dir: dir,
        store,
        issuer,
        scheduler,
    }
}

fn expiring_in(days: i64) -> CredentialRecord {
    let now = chrono::Utc::now().timestamp();
    CredentialRecord::new("stored").with_expiration(now + days * SECONDS_PER_DAY)
}

#[tokio::test]
async fn test_token_expiring_in_10_days_is_renewed() {
    let old = expiring_in(10);
    let h = harness(Some(old.clone()), RenewalSettings::default()).await;

    let outcome = h.scheduler.run_once().await;
    assert!(matches!(outcome, RenewalOutcome::Renewed(_)), "got {:?}", outcome);
    assert_eq!(h.issuer.calls(), 1);

    let persisted = h.store.load(CredentialKind::UpstreamAccess).await.unwrap();
    assert_eq!(persisted.value, "issued-1");
    assert!(persisted.expiration.unwrap() > old.expiration.unwrap());
}

#[tokio::test]
async fn test_token_expiring_in_400_days_is_left_alone() {
    let old = expiring_in(400);
    let h = harness(Some(old.clone()), RenewalSettings::default()).await;

    let outcome = h.scheduler.run_once().await;
    match outcome {
        RenewalOutcome::Skipped { days_left } => {
            let days = days_left.unwrap();
            assert!(days > 399.0 && days <= 400.0, "days_left = {}", days);
        }
        other => panic!("expected Skipped, got {:?}", other),
    }
    assert_eq!(h.issuer.calls(), 0);
    assert_eq!(h.store.load(CredentialKind::UpstreamAccess).await, Some(old));
}

#[tokio::test]
async fn test_absent_token_is_issued() {
    let h = harness(None, RenewalSettings::default()).await;

    let outcome = h.scheduler.run_once().await;
    assert!(matches!(outcome, RenewalOutcome::Renewed(_)));
    assert_eq!(h.issuer.calls(), 1);
    assert!(h.store.load(CredentialKind::UpstreamAccess).await.is_some());
}

#[tokio::test]
async fn test_corrupt_record_is_treated_as_absent() {
    let h = harness(None, RenewalSettings::default()).await;
    std::fs::write(
        h.store.path_for(CredentialKind::UpstreamAccess),
        b"not json at all",
    )
    .unwrap();

    let outcome = h.scheduler.run_once().await;
    assert!(matches!(outcome, RenewalOutcome::Renewed(_)));
    assert_eq!(
        h.store.load(CredentialKind::UpstreamAccess).await.unwrap().value,
        "issued-1"
    );
}

#[tokio::test]
async fn test_out_of_range_expiration_is_renewed() {
    let h = harness(None, RenewalSettings::default()).await;
    std::fs::write(
        h.store.path_for(CredentialKind::UpstreamAccess),
        br#"{"token":"x","expiration":"-9223372036854775808"}"#,
    )
    .unwrap();

    let outcome = h.scheduler.run_once().await;
    assert!(matches!(outcome, RenewalOutcome::Renewed(_)), "got {:?}", outcome);
    assert_eq!(h.issuer.calls(), 1);

    let persisted = h.store.load(CredentialKind::UpstreamAccess).await.unwrap();
    assert_eq!(persisted.value, "issued-1");
}

#[tokio::test]
async fn test_loop_keeps_running_after_out_of_range_expiration() {
    let settings = RenewalSettings {
        interval: Duration::from_millis(40),
        min_retry: Duration::from_millis(10),
        ..RenewalSettings::default()
    };
    let h = harness(None, settings).await;
    std::fs::write(
        h.store.path_for(CredentialKind::UpstreamAccess),
        br#"{"token":"x","expiration":-1e300}"#,
    )
    .unwrap();

    let (tx, rx) = watch::channel(false);
    let handle = h.scheduler.clone().spawn(rx);

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.issuer.calls() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("scheduler never renewed");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_record_without_expiration_is_not_renewed() {
    let h = harness(Some(CredentialRecord::new("forever")), RenewalSettings::default()).await;

    let outcome = h.scheduler.run_once().await;
    assert!(matches!(outcome, RenewalOutcome::Skipped { days_left: None }));
    assert_eq!(h.issuer.calls(), 0);
}

#[tokio::test]
async fn test_failed_issuance_keeps_record_and_next_cycle_retries() {
    let old = expiring_in(5);
    let h = harness(Some(old.clone()), RenewalSettings::default()).await;
    h.issuer.fail.store(true, Ordering::SeqCst);

    let outcome = h.scheduler.run_once().await;
    assert!(matches!(outcome, RenewalOutcome::Failed(_)));
    assert_eq!(h.store.load(CredentialKind::UpstreamAccess).await, Some(old));

    h.issuer.fail.store(false, Ordering::SeqCst);
    let outcome = h.scheduler.run_once().await;
    assert!(matches!(outcome, RenewalOutcome::Renewed(_)));
    assert_eq!(h.issuer.calls(), 2);
    assert_eq!(
        h.store.load(CredentialKind::UpstreamAccess).await.unwrap().value,
        "issued-2"
    );
}

#[tokio::test]
async fn test_loop_survives_failures_and_stops_on_shutdown() {
    let settings = RenewalSettings {
        interval: Duration::from_millis(40),
        min_retry: Duration::from_millis(10),
        ..RenewalSettings::default()
    };
    let h = harness(None, settings).await;
    h.issuer.fail.store(true, Ordering::SeqCst);

    let (tx, rx) = watch::channel(false);
    let handle = h.scheduler.clone().spawn(rx);

    // Keeps retrying while the issuer fails.
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.issuer.calls() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("scheduler stopped retrying");
    assert!(!handle.is_finished());
    assert!(h.store.load(CredentialKind::UpstreamAccess).await.is_none());

    // Recovers once the issuer does.
    h.issuer.fail.store(false, Ordering::SeqCst);
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.store.load(CredentialKind::UpstreamAccess).await.is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("scheduler never renewed after recovery");

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_manual_renewals_persist_one_issued_record() {
    let h = harness(None, RenewalSettings::default()).await;

    let mut set = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let scheduler = h.scheduler.clone();
        set.spawn(async move { scheduler.renew_now().await.unwrap().value });
    }
    let mut issued = Vec::new();
    while let Some(res) = set.join_next().await {
        issued.push(res.unwrap());
    }
    assert_eq!(issued.len(), 8);
    assert_eq!(h.issuer.calls(), 8);

    let persisted = h.store.load(CredentialKind::UpstreamAccess).await.unwrap();
    assert!(issued.contains(&persisted.value));
    assert!(persisted.expiration.is_some());
}
