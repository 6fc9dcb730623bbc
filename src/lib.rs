//! Housee gateway — library crate shared by the binary and integration tests.
//!
//! Guards a Home Assistant instance behind a static gateway token and keeps
//! a long-lived upstream token renewed in the background.

use std::sync::Arc;

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod proxy;
pub mod store;

use cache::CredentialCache;
use jobs::renewal::RenewalScheduler;
use proxy::upstream::UpstreamClient;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub cache: CredentialCache,
    pub renewal: RenewalScheduler,
    pub upstream_client: Arc<UpstreamClient>,
}
