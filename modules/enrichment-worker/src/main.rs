use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use enrichment_common::EnrichmentConfig;
// Import Restate traits to bring `.serve()` into scope
use enrichment_worker::workflows::{
    EnrichmentSweep, EnrichmentSweepImpl, MemberEnricher, MemberEnricherImpl, MemberSquasher,
    MemberSquasherImpl, SWEEP_KEY,
};
use enrichment_worker::{enrich_member, squash_member, EnrichmentDeps};

#[derive(Parser)]
#[command(name = "enrichment-worker", about = "Member profile enrichment worker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the Restate endpoint (default)
    Serve,
    /// Enrich one member from every enabled source, outside Restate
    EnrichMember { member_id: Uuid },
    /// Reconcile one member's cached sources into the profile, outside Restate
    SquashMember { member_id: Uuid },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("enrichment=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = EnrichmentConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.global_max_concurrency.max(5) as u32 + 5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    enrichment_store::migrate(&pool).await?;

    let deps = Arc::new(EnrichmentDeps::from_config(pool, &config));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(deps, &config).await,
        Command::EnrichMember { member_id } => {
            let result = enrich_member(&deps, member_id).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::SquashMember { member_id } => {
            let updated = squash_member(&deps, member_id, &deps.sources.kinds()).await?;
            info!(%member_id, updated, "Squash finished");
            Ok(())
        }
    }
}

async fn serve(deps: Arc<EnrichmentDeps>, config: &EnrichmentConfig) -> Result<()> {
    let endpoint = restate_sdk::endpoint::Endpoint::builder()
        .bind(MemberEnricherImpl::with_deps(deps.clone()).serve())
        .bind(MemberSquasherImpl::with_deps(deps.clone()).serve())
        .bind(EnrichmentSweepImpl::with_deps(deps.clone()).serve())
        .build();

    let addr = format!("0.0.0.0:{}", config.restate_port);
    let socket: std::net::SocketAddr = addr.parse().context("Invalid Restate listen address")?;
    info!(restate = %addr, sources = ?deps.sources.kinds(), "Starting enrichment worker");

    let server = tokio::spawn(async move {
        restate_sdk::http_server::HttpServer::new(endpoint)
            .listen_and_serve(socket)
            .await;
    });

    let http = reqwest::Client::new();
    register_deployment(&http, config).await;
    start_sweep(&http, config).await;

    server.await.context("Restate server task failed")?;
    Ok(())
}

/// Auto-register with the Restate admin API.
async fn register_deployment(http: &reqwest::Client, config: &EnrichmentConfig) {
    let Some(admin_url) = &config.restate_admin_url else {
        return;
    };
    let self_url = config
        .restate_self_url
        .clone()
        .unwrap_or_else(|| format!("http://localhost:{}", config.restate_port));

    let mut request = http
        .post(format!("{admin_url}/deployments"))
        .json(&serde_json::json!({
            "uri": self_url,
            "force": true,
        }));
    if let Some(token) = &config.restate_auth_token {
        request = request.bearer_auth(token);
    }

    match request.send().await {
        Ok(resp) => info!(status = %resp.status(), "Registered with Restate admin"),
        Err(e) => warn!(error = %e, "Failed to register with Restate admin"),
    }
}

/// Ask the singleton sweep to start its loop; a no-op when one is scheduled.
async fn start_sweep(http: &reqwest::Client, config: &EnrichmentConfig) {
    let Some(ingress_url) = &config.restate_ingress_url else {
        info!("RESTATE_INGRESS_URL not set, sweep must be started externally");
        return;
    };

    let mut request = http
        .post(format!("{ingress_url}/EnrichmentSweep/{SWEEP_KEY}/start/send"))
        .json(&serde_json::json!({}));
    if let Some(token) = &config.restate_auth_token {
        request = request.bearer_auth(token);
    }

    match request.send().await {
        Ok(resp) => info!(status = %resp.status(), "Enrichment sweep started"),
        Err(e) => warn!(error = %e, "Failed to start enrichment sweep"),
    }
}
