// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use notary_custody::blockchain::ChainClient;
use notary_custody::config::{CustodyConfig, LOG_FORMAT_ENV};
use notary_custody::custody::CustodyService;
use notary_custody::error::CustodyResult;
use notary_custody::reconciler::PendingReconciler;
use notary_custody::state::CustodyState;
use notary_custody::vault::PrivateKey;
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        error!(error = %e, "Notary custody exited with an error");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().pretty()).init();
    }
}

async fn run() -> CustodyResult<()> {
    let config = CustodyConfig::from_env()?;
    let admin_key = config
        .admin_private_key
        .as_ref()
        .map(|hex| PrivateKey::from_hex(hex.expose_secret()))
        .transpose()?;
    let reconcile_interval = config.reconcile_interval;

    let chain = Arc::new(ChainClient::connect(config.chain_settings())?);
    chain.verify_chain_id().await?;

    let state = CustodyState::open(config, chain)?;
    let service = CustodyService::new(state.clone());
    let admin = service.provision_admin(admin_key).await?;
    let pending = state.db.pending().count_pending()?;

    info!(
        network = %state.chain.network().name,
        registry = %state.registry_address(),
        admin = %admin,
        pending,
        "Notary custody ready"
    );

    let shutdown = CancellationToken::new();
    let reconciler = PendingReconciler::new(state.db.pending(), state.registry.clone())
        .with_interval(reconcile_interval);
    let handle = tokio::spawn(reconciler.run(shutdown.clone()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Could not listen for shutdown signal");
    }
    info!("Shutdown requested");
    shutdown.cancel();
    if let Err(e) = handle.await {
        error!(error = %e, "Reconciler task failed");
    }
    Ok(())
}
