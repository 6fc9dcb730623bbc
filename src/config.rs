use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use url::Url;

use crate::jobs::renewal::RenewalSettings;

pub const DEFAULT_UPSTREAM_URL: &str = "http://supervisor/core/api";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Directory holding `secret_token.json` and `long_lived_token.json`.
    pub data_dir: PathBuf,
    /// Home Assistant core API as reached through the supervisor.
    pub upstream_url: Url,
    /// Supervisor-provided credential used to mint upstream tokens. Injected
    /// by the host, never persisted.
    pub supervisor_token: Option<String>,
    pub token_name: String,
    pub token_duration_days: u32,
    pub renewal_threshold_days: u32,
    pub renewal_interval: Duration,
    /// Timeout for every call to Home Assistant.
    pub upstream_timeout: Duration,
    /// `HOUSEE_ENV=production`: the supervisor credential is mandatory.
    pub production: bool,
}

impl Config {
    pub fn renewal_settings(&self) -> RenewalSettings {
        RenewalSettings {
            token_name: self.token_name.clone(),
            duration_days: self.token_duration_days,
            threshold_days: self.renewal_threshold_days,
            interval: self.renewal_interval,
            ..RenewalSettings::default()
        }
    }

    /// Checks the settings only the upstream-facing commands (`serve`,
    /// `renew`) depend on. Offline token commands skip this.
    pub fn check_upstream(&self) -> anyhow::Result<()> {
        if self.supervisor_token.is_none() && self.production {
            anyhow::bail!(
                "SUPERVISOR_TOKEN is not set. The supervisor injects it into the add-on; \
                 upstream token renewal cannot run without it."
            );
        }
        if self.token_duration_days <= self.renewal_threshold_days {
            anyhow::bail!(
                "HOUSEE_TOKEN_DURATION_DAYS ({}) must exceed HOUSEE_RENEWAL_THRESHOLD_DAYS ({}), \
                 otherwise every fresh token is immediately due for renewal",
                self.token_duration_days,
                self.renewal_threshold_days
            );
        }
        Ok(())
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let upstream_raw =
        std::env::var("HOUSEE_UPSTREAM_URL").unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.into());
    let upstream_url = Url::parse(&upstream_raw)
        .with_context(|| format!("HOUSEE_UPSTREAM_URL is not a valid URL: {}", upstream_raw))?;

    let supervisor_token = std::env::var("SUPERVISOR_TOKEN")
        .ok()
        .filter(|t| !t.trim().is_empty());

    Ok(Config {
        port: env_parse("HOUSEE_PORT", 5000),
        data_dir: std::env::var("HOUSEE_DATA_DIR")
            .unwrap_or_else(|_| "/data".into())
            .into(),
        upstream_url,
        supervisor_token,
        token_name: std::env::var("HOUSEE_TOKEN_NAME")
            .unwrap_or_else(|_| "Auto-Renewed Token".into()),
        token_duration_days: env_parse("HOUSEE_TOKEN_DURATION_DAYS", 365),
        renewal_threshold_days: env_parse("HOUSEE_RENEWAL_THRESHOLD_DAYS", 30),
        renewal_interval: Duration::from_secs(env_parse("HOUSEE_RENEWAL_INTERVAL_SECS", 86_400).max(1)),
        upstream_timeout: Duration::from_secs(env_parse("HOUSEE_UPSTREAM_TIMEOUT_SECS", 30).max(1)),
        production: std::env::var("HOUSEE_ENV").map_or(false, |v| v == "production"),
    })
}

/// Parses an env var, falling back to `default` when unset or invalid.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
