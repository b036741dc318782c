// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replication: the primary pushes self-contained snapshots; the
//! standby installs each one wholesale. Fire-and-forget — a missed
//! snapshot is tolerated because the next one is self-contained.

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::{Config, DispatchError, ErrorKind, StateStore};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Accepts standby connections and pushes a fresh snapshot to each one
/// every `replication_interval_secs`, independent of the others.
pub async fn run_producer(config: &Config, store: &Arc<StateStore>, shutdown: CancellationToken) -> Result<(), DispatchError> {
    let addr = config.bind_addr(config.replication_port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        warn!(%addr, err = %e, "failed to bind replication endpoint");
        DispatchError::new(ErrorKind::BindFailure, format!("{addr}: {e}"))
    })?;
    info!(%addr, "replication producer listening");

    let interval = Duration::from_secs(config.replication_interval_secs);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                info!(%peer, "standby connected for replication");
                let store = Arc::clone(store);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { push_loop(stream, store, interval, shutdown).await });
            }
        }
    }
}

async fn push_loop(stream: TcpStream, store: Arc<StateStore>, interval: Duration, shutdown: CancellationToken) {
    let mut framed = Framed::new(stream, LinesCodec::new());
    loop {
        let snapshot = store.snapshot();
        let Ok(frame) = dispatch_core::codec::encode_snapshot(&snapshot) else {
            return;
        };
        if framed.send(frame).await.is_err() {
            return;
        }
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Connects to the primary's replication port and installs every
/// snapshot it pushes, replacing the registry and ledger wholesale
/// (never merged). Retries the connection until cancelled.
pub async fn run_consumer(config: &Config, store: &Arc<StateStore>, shutdown: CancellationToken) {
    let addr = config.peer_addr(config.replication_port);
    loop {
        if shutdown.is_cancelled() {
            return;
        }
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                info!(%addr, "connected to primary for replication");
                consume_until_disconnect(stream, store, &shutdown).await;
            }
            Err(e) => {
                warn!(%addr, err = %e, "replication connection failed, retrying");
            }
        }
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }
    }
}

async fn consume_until_disconnect(stream: TcpStream, store: &Arc<StateStore>, shutdown: &CancellationToken) {
    let mut framed = Framed::new(stream, LinesCodec::new());
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            line = framed.next() => {
                match line {
                    Some(Ok(frame)) => match dispatch_core::codec::decode_snapshot(&frame) {
                        Ok(snapshot) => store.install(snapshot),
                        Err(e) => warn!(err = %e, "dropping malformed replication frame"),
                    },
                    _ => return,
                }
            }
        }
    }
}
