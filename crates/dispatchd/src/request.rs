// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request endpoint and matcher: synchronous request/reply.
//! Replies exactly once per received request, matching the protocol's
//! strict one-request-one-reply alternation per connection.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use dispatch_core::codec::{decode_request, encode_reply, Reply};
use dispatch_core::{Config, DispatchError, ErrorKind, Position, StateStore};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::publisher::AssignmentQueue;

pub async fn run(
    config: &Config,
    store: &Arc<StateStore>,
    queue: &Arc<AssignmentQueue>,
    shutdown: CancellationToken,
) -> Result<(), DispatchError> {
    let addr = config.bind_addr(config.request_port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        warn!(%addr, err = %e, "failed to bind request endpoint");
        DispatchError::new(ErrorKind::BindFailure, format!("{addr}: {e}"))
    })?;
    info!(%addr, "request endpoint listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let store = Arc::clone(store);
                let queue = Arc::clone(queue);
                tokio::spawn(async move { serve_connection(stream, store, queue).await });
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, store: Arc<StateStore>, queue: Arc<AssignmentQueue>) {
    let mut framed = Framed::new(stream, LinesCodec::new());
    while let Some(line) = framed.next().await {
        let Ok(body) = line else { return };
        let reply = handle_one(&body, &store, &queue);
        let Ok(encoded) = encode_reply(&reply) else { return };
        if framed.send(encoded).await.is_err() {
            return;
        }
    }
}

/// Decodes, matches, and builds the reply for a single request body,
/// entering the state-store critical section only for the match and its
/// ledger/metrics bookkeeping — no suspension happens while the lock is held.
/// On a terminal outcome, rewrites `ledger.json` and `metrics.json` so both
/// stay current with the append/counter bump that just happened.
fn handle_one(body: &str, store: &StateStore, queue: &AssignmentQueue) -> Reply {
    let decode_start = Instant::now();
    let request = match decode_request(body) {
        Ok(r) => r,
        Err(e) => return Reply::Error { mensaje: e.to_string() },
    };

    let pickup = Position::new(request.x, request.y);
    let arrived_at_ms = now_ms();
    let result = store.handle_request(request.user_id, pickup, arrived_at_ms, decode_start.elapsed().as_secs_f64());

    if let Err(e) = store.write_ledger_file() {
        warn!(err = %e, "failed to write ledger.json");
    }
    if let Err(e) = store.write_metrics_file() {
        warn!(err = %e, "failed to write metrics.json");
    }

    match result.outcome {
        dispatch_core::Outcome::Assigned { taxi_id } => {
            queue.push(&taxi_id);
            Reply::Assigned { taxi_id }
        }
        dispatch_core::Outcome::Rejected { reason } => Reply::Rejected { mensaje: reason },
        dispatch_core::Outcome::Pending => {
            // Unreachable: `StateStore::handle_request` only ever produces
            // a terminal outcome. If this branch is ever hit it means a
            // taxi was taken from the free pool without being committed to
            // the ledger — roll it back so the taxi isn't lost from both.
            if let Some(taxi_id) = result.assigned_taxi {
                store.put_back(taxi_id, pickup);
            }
            Reply::Error { mensaje: "internal error".to_string() }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
