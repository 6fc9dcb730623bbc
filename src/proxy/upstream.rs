//! HTTP client for the Home Assistant core API behind the supervisor.
//!
//! Reads (entity state) go through reqwest-middleware with transient-error
//! retries. Token issuance is a single attempt with a hard timeout; the
//! renewal scheduler owns the retry cadence for it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde_json::json;
use url::Url;

use crate::errors::{AppError, IssuanceError};
use crate::models::credential::{CredentialRecord, SECONDS_PER_DAY};

const TOKEN_PATH: &str = "auth/long_lived_access_token";
const STATES_PATH: &str = "states";
/// Upstream bodies are truncated to this many bytes in errors and logs.
const MAX_DIAGNOSTIC_BODY: usize = 512;

/// Mints long-lived upstream tokens.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, name: &str, duration_days: u32) -> Result<CredentialRecord, IssuanceError>;
}

pub struct UpstreamClient {
    base_url: String,
    supervisor_token: Option<String>,
    http: reqwest::Client,
    client: ClientWithMiddleware,
}

impl UpstreamClient {
    pub fn new(base_url: &Url, supervisor_token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(http.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            supervisor_token,
            http,
            client,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.supervisor_token.is_some()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// `GET /states` with the supervisor token.
    pub async fn fetch_states(&self) -> Result<reqwest::Response, AppError> {
        let token = self
            .supervisor_token
            .as_deref()
            .ok_or(AppError::Issuance(IssuanceError::NotConfigured))?;

        self.client
            .get(self.endpoint(STATES_PATH))
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Upstream request failed after retries: {}", e);
                AppError::Upstream(e.to_string())
            })
    }
}

#[async_trait]
impl TokenIssuer for UpstreamClient {
    async fn issue(&self, name: &str, duration_days: u32) -> Result<CredentialRecord, IssuanceError> {
        let token = self
            .supervisor_token
            .as_deref()
            .ok_or(IssuanceError::NotConfigured)?;

        let resp = self
            .http
            .post(self.endpoint(TOKEN_PATH))
            .bearer_auth(token)
            .json(&json!({
                "name": name,
                "expiration": format!("{}d", duration_days),
            }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.text().await?;

        if !(200..300).contains(&status) {
            return Err(IssuanceError::Rejected {
                status,
                body: truncate(body),
            });
        }

        let mut record = match serde_json::from_str::<CredentialRecord>(&body) {
            Ok(r) if !r.value.is_empty() => r,
            _ => {
                return Err(IssuanceError::Malformed {
                    status,
                    body: truncate(body),
                })
            }
        };

        if record.expiration.is_none() {
            let now = chrono::Utc::now().timestamp();
            record.expiration = Some(now + i64::from(duration_days) * SECONDS_PER_DAY);
        }

        tracing::info!(
            fingerprint = %record.fingerprint(),
            expiration = ?record.expiration,
            "upstream token issued"
        );
        Ok(record)
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_DIAGNOSTIC_BODY {
        let mut cut = MAX_DIAGNOSTIC_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}
