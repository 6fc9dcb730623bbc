use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gateway::cache::CredentialCache;
use gateway::cli;
use gateway::config::{self, Config};
use gateway::jobs::renewal::{RenewalOutcome, RenewalScheduler};
use gateway::models::credential::CredentialKind;
use gateway::proxy::upstream::UpstreamClient;
use gateway::store::file::FileStore;
use gateway::store::CredentialStore;
use gateway::{api, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    init_tracing()?;
    let cfg = config::load()?;

    let result = match args.command {
        Some(cli::Commands::Token { command }) => handle_token_command(command, &cfg).await,
        Some(cli::Commands::Renew { force }) => handle_renew_command(force, &cfg).await,
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Log to stdout; additionally export spans over OTLP when
/// OTEL_EXPORTER_OTLP_ENDPOINT is set.
fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "housee-gateway"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "gateway=debug,housee=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<FileStore>> {
    let store = FileStore::open(&cfg.data_dir)
        .await
        .with_context(|| format!("credential directory {} is not writable", cfg.data_dir.display()))?;
    Ok(Arc::new(store))
}

async fn build_state(cfg: &Config) -> anyhow::Result<Arc<AppState>> {
    tracing::info!("Opening credential store at {}...", cfg.data_dir.display());
    let store = open_store(cfg).await?;
    let cache = CredentialCache::init(store)
        .await
        .context("failed to initialise gateway token")?;

    let upstream_client = Arc::new(UpstreamClient::new(
        &cfg.upstream_url,
        cfg.supervisor_token.clone(),
        cfg.upstream_timeout,
    )?);
    let renewal = RenewalScheduler::new(cache.clone(), upstream_client.clone(), cfg.renewal_settings());

    Ok(Arc::new(AppState {
        cache,
        renewal,
        upstream_client,
    }))
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    cfg.check_upstream()?;
    let state = build_state(&cfg).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let renewal_task = if state.upstream_client.is_configured() {
        let task = state.renewal.clone().spawn(shutdown_rx);
        tracing::info!(
            interval_secs = cfg.renewal_interval.as_secs(),
            threshold_days = cfg.renewal_threshold_days,
            "Background token renewal started"
        );
        Some(task)
    } else {
        tracing::warn!("SUPERVISOR_TOKEN missing, background token renewal disabled");
        None
    };

    let app = api::api_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Housee gateway listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The renewal loop is a daemon; an in-flight issuance is abandoned.
    let _ = shutdown_tx.send(true);
    if let Some(task) = renewal_task {
        task.abort();
    }
    tracing::info!("Housee gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

async fn handle_token_command(cmd: cli::TokenCommands, cfg: &Config) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::Show { kind } => {
            let kind = CredentialKind::from(kind);
            let store = open_store(cfg).await?;
            match store.load(kind).await {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("No {} token stored.", kind),
            }
        }
        cli::TokenCommands::Rotate => {
            let store = open_store(cfg).await?;
            let cache = CredentialCache::open(store).await;
            let record = cache
                .rotate(CredentialKind::GatewayAuth, || async {
                    Ok::<_, gateway::store::StorageError>(
                        gateway::models::credential::CredentialRecord::generate(),
                    )
                })
                .await?;
            println!("Gateway token rotated:\n  Use:   Authorization: Bearer {}", record.value);
            println!("A running gateway keeps the previous token until it is restarted.");
        }
    }
    Ok(())
}

async fn handle_renew_command(force: bool, cfg: &Config) -> anyhow::Result<()> {
    cfg.check_upstream()?;
    let state = build_state(cfg).await?;

    if force {
        let record = state.renewal.renew_now().await?;
        println!("Upstream token issued, expires at {:?}", record.expiration);
        return Ok(());
    }

    match state.renewal.run_once().await {
        RenewalOutcome::Renewed(record) => {
            println!("Upstream token renewed, expires at {:?}", record.expiration);
        }
        RenewalOutcome::Skipped { days_left } => match days_left {
            Some(days) => println!("Upstream token valid for {:.1} more days, nothing to do.", days),
            None => println!("Upstream token has no expiration, nothing to do."),
        },
        RenewalOutcome::Failed(e) => anyhow::bail!("renewal failed: {}", e),
    }
    Ok(())
}
