//! Background job: keep the upstream Home Assistant token valid.
//!
//! Checks the persisted upstream record once per interval (daily by default,
//! first check at startup) and re-issues it when fewer than the threshold
//! days remain or when no record exists. Failures never end the loop; the
//! next check is pulled in with exponential backoff until one succeeds.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

use crate::cache::CredentialCache;
use crate::errors::AppError;
use crate::models::credential::{CredentialKind, CredentialRecord};
use crate::proxy::upstream::TokenIssuer;

#[derive(Debug, Clone)]
pub struct RenewalSettings {
    /// Name Home Assistant shows for the issued token.
    pub token_name: String,
    pub duration_days: u32,
    /// Renew when fewer than this many days remain.
    pub threshold_days: u32,
    /// Delay between regular checks.
    pub interval: Duration,
    /// First retry delay after a failed check; doubles up to `interval`.
    pub min_retry: Duration,
}

impl Default for RenewalSettings {
    fn default() -> Self {
        Self {
            token_name: "Auto-Renewed Token".to_string(),
            duration_days: 365,
            threshold_days: 30,
            interval: Duration::from_secs(86_400),
            min_retry: Duration::from_secs(300),
        }
    }
}

impl RenewalSettings {
    /// Delay before the next check after `failures` consecutive failed ones.
    pub fn retry_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.interval;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.min_retry
            .checked_mul(factor)
            .unwrap_or(self.interval)
            .min(self.interval)
    }
}

/// Expiry policy. A missing record must be renewed; a record without an
/// expiration never expires.
pub fn needs_renewal(record: Option<&CredentialRecord>, now: i64, threshold_days: u32) -> bool {
    match record {
        None => true,
        Some(r) => match r.days_left(now) {
            Some(days_left) => days_left < f64::from(threshold_days),
            None => false,
        },
    }
}

#[derive(Debug)]
pub enum RenewalOutcome {
    Renewed(CredentialRecord),
    Skipped { days_left: Option<f64> },
    Failed(AppError),
}

#[derive(Clone)]
pub struct RenewalScheduler {
    cache: CredentialCache,
    issuer: Arc<dyn TokenIssuer>,
    settings: RenewalSettings,
}

impl RenewalScheduler {
    pub fn new(cache: CredentialCache, issuer: Arc<dyn TokenIssuer>, settings: RenewalSettings) -> Self {
        Self {
            cache,
            issuer,
            settings,
        }
    }

    /// Issues a new upstream token and persists it regardless of expiry.
    pub async fn renew_now(&self) -> Result<CredentialRecord, AppError> {
        let issuer = self.issuer.clone();
        let name = self.settings.token_name.clone();
        let days = self.settings.duration_days;

        self.cache
            .rotate(CredentialKind::UpstreamAccess, || async move {
                issuer.issue(&name, days).await.map_err(AppError::from)
            })
            .await
    }

    /// One check cycle.
    pub async fn run_once(&self) -> RenewalOutcome {
        let record = self.cache.load_persisted(CredentialKind::UpstreamAccess).await;
        let now = chrono::Utc::now().timestamp();
        let days_left = record.as_ref().and_then(|r| r.days_left(now));

        if !needs_renewal(record.as_ref(), now, self.settings.threshold_days) {
            tracing::debug!(days_left = ?days_left, "upstream token still valid, skipping renewal");
            return RenewalOutcome::Skipped { days_left };
        }

        match &record {
            None => tracing::info!("no upstream token stored, issuing one"),
            Some(_) => tracing::info!(days_left = ?days_left, "upstream token expiring soon, renewing"),
        }

        match self.renew_now().await {
            Ok(renewed) => RenewalOutcome::Renewed(renewed),
            Err(e) => {
                tracing::warn!("upstream token renewal failed (will retry): {}", e);
                RenewalOutcome::Failed(e)
            }
        }
    }

    /// Spawn the renewal loop. It stops when `shutdown` flips to `true` or
    /// its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut failures = 0u32;
            loop {
                match self.run_once().await {
                    RenewalOutcome::Failed(_) => failures = failures.saturating_add(1),
                    _ => failures = 0,
                }
                let delay = self.settings.retry_delay(failures);
                tracing::debug!(delay_secs = delay.as_secs(), failures, "next upstream token check scheduled");

                tokio::select! {
                    _ = time::sleep(delay) => {}
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            tracing::info!("renewal scheduler stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}
