// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor: owns the role variable, starts the component set
//! appropriate to the current role, and drives the standby -> primary
//! transition on promotion.

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::{Config, Role, StateStore};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::publisher::AssignmentQueue;
use crate::{ingest, liveness, negotiator, publisher, replication, request};

pub async fn run(config: Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.state_dir)?;
    let store = Arc::new(StateStore::new(config.state_path(), config.ledger_path(), config.metrics_path(), config.response_time_cap));

    let role = negotiator::negotiate_role(&config).await;
    match role {
        Role::Primary => run_as_primary(&config, store).await,
        Role::Standby => run_as_standby(&config, store).await,
        Role::Unassigned => unreachable!("negotiate_role always returns a concrete role"),
    }
}

/// Starts A, B, D, E, F, G(producer), H(responder), I(responder), plus the
/// periodic snapshotter. Loads any on-disk state first.
async fn run_as_primary(config: &Config, store: Arc<StateStore>) -> anyhow::Result<()> {
    info!("starting as primary");
    store.load_from_disk()?;

    let shutdown = CancellationToken::new();
    let queue = Arc::new(AssignmentQueue::new(config.assign_queue_depth));

    let snapshotter = {
        let store = Arc::clone(&store);
        let interval = Duration::from_secs(config.snapshot_interval_secs);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { run_snapshotter(store, interval, shutdown).await })
    };

    let discovery = {
        let config = config.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { run_guarded(negotiator::run_responder(&config, shutdown)).await })
    };

    let liveness_responder = {
        let config = config.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { run_guarded(liveness::run_responder(&config, shutdown)).await })
    };

    let ingest_worker = {
        let config = config.clone();
        let store = Arc::clone(&store);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { run_guarded(ingest::run(&config, &store, shutdown)).await })
    };

    let replication_worker = {
        let config = config.clone();
        let store = Arc::clone(&store);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { run_guarded(replication::run_producer(&config, &store, shutdown)).await })
    };

    let request_worker = {
        let config = config.clone();
        let store = Arc::clone(&store);
        let queue = Arc::clone(&queue);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { run_guarded(request::run(&config, &store, &queue, shutdown)).await })
    };

    let publisher_worker = {
        let config = config.clone();
        let queue = Arc::clone(&queue);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { run_guarded(publisher::run(&config, &queue, shutdown)).await })
    };

    tokio::signal::ctrl_c().await.ok();
    shutdown.cancel();
    let _ = tokio::join!(
        snapshotter,
        discovery,
        liveness_responder,
        ingest_worker,
        request_worker,
        publisher_worker,
        replication_worker
    );
    Ok(())
}

/// Starts A, B, G(consumer), H(prober). On promotion (signalled by the
/// prober returning), stops the consumer and enters the primary set,
/// reusing the same (just-cleared) store.
async fn run_as_standby(config: &Config, store: Arc<StateStore>) -> anyhow::Result<()> {
    info!("starting as standby");
    let shutdown = CancellationToken::new();

    let consumer = {
        let config = config.clone();
        let store = Arc::clone(&store);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { replication::run_consumer(&config, &store, shutdown).await })
    };

    liveness::run_prober(config, &store, shutdown.clone()).await;

    shutdown.cancel();
    let _ = consumer.await;

    info!("promoting to primary");
    run_as_primary(config, store).await
}

/// Periodically rewrites `state.json`. `ledger.json` and `metrics.json`
/// are rewritten synchronously per request (see `request::handle_one`)
/// since both must reflect each append/counter bump as it happens, not
/// on a 5 s batch.
async fn run_snapshotter(store: Arc<StateStore>, interval: Duration, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        if let Err(e) = store.write_state_file() {
            tracing::warn!(err = %e, "failed to write state.json");
        }
    }
}

async fn run_guarded<F>(fut: F)
where
    F: std::future::Future<Output = Result<(), dispatch_core::DispatchError>>,
{
    if let Err(e) = fut.await {
        if e.is_fatal() {
            tracing::error!(err = %e, "fatal error, worker exiting");
        } else {
            tracing::warn!(err = %e, "worker exited");
        }
    }
}
