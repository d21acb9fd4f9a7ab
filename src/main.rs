// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{error::Error, sync::Arc};

use crowdfund_ledger_server::{
    api::router,
    auth::CredentialIssuer,
    blockchain::{load_signer, LedgerClient},
    config::{AppConfig, LogFormat},
    reconciler::listener::EventListener,
    state::AppState,
    storage::{Database, DATABASE_FILE},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env()?;
    init_tracing(config.log_format);

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.data_dir.join(DATABASE_FILE);
    let db = Arc::new(Database::open(&db_path)?);
    tracing::info!(path = %db_path.display(), "Opened ledger database");

    let signer = config.private_key.as_deref().map(load_signer).transpose()?;
    if signer.is_none() {
        tracing::warn!("BLOCKCHAIN_PRIVATE_KEY not set; campaign creation is disabled");
    }
    let ledger = LedgerClient::new(config.network.clone(), signer, config.confirmation)?;
    if let Some(address) = ledger.signer_address() {
        tracing::info!(signer = %address, network = %config.network.name, "Service key loaded");
    }

    let credentials = CredentialIssuer::new(
        config.jwt_secret.as_bytes(),
        config.jwt_issuer.clone(),
        config.jwt_ttl,
    );
    let shutdown = CancellationToken::new();
    let (state, events) = AppState::new(db.clone(), credentials, ledger, shutdown.clone());

    let reconciler = tokio::spawn(state.reconciler().run(events, shutdown.clone()));

    let listener = if state.ledger.factory().is_some() {
        let listener = EventListener::new(
            state.ledger.clone(),
            db,
            state.events.clone(),
            config.listener_poll,
            config.listener_start_block,
        );
        Some(listener.spawn(&shutdown))
    } else {
        tracing::warn!("CAMPAIGN_FACTORY_ADDRESS not set; event listener disabled");
        None
    };

    state.funding.resume_pending()?;

    let app = router(state);
    let tcp = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "Crowdfund ledger server listening (docs at /docs)");

    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(listener) = listener {
        listener.stop().await;
    }
    if let Err(e) = reconciler.await {
        tracing::error!(error = %e, "Reconciler task failed");
    }
    tracing::info!("Server stopped");
    Ok(())
}
