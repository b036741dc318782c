// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Liveness: the primary replies `"pong"` to anything; the standby
//! probes every interval and promotes itself on a timeout or unexpected
//! reply.

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::codec::{LIVENESS_PING, LIVENESS_PONG};
use dispatch_core::{Config, DispatchError, ErrorKind, StateStore};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Binds the liveness endpoint and answers every request with `"pong"`
/// unconditionally, simplifying the standby's logic.
pub async fn run_responder(config: &Config, shutdown: CancellationToken) -> Result<(), DispatchError> {
    let addr = config.bind_addr(config.health_port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        warn!(%addr, err = %e, "failed to bind liveness endpoint");
        DispatchError::new(ErrorKind::BindFailure, format!("{addr}: {e}"))
    })?;
    info!(%addr, "liveness responder listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                tokio::spawn(serve_one(stream));
            }
        }
    }
}

async fn serve_one(stream: TcpStream) {
    let mut framed = Framed::new(stream, LinesCodec::new());
    while let Some(Ok(_line)) = framed.next().await {
        if framed.send(LIVENESS_PONG.to_string()).await.is_err() {
            break;
        }
    }
}

/// Runs the standby's probe loop. Returns once this instance should
/// promote to primary: a single timeout or unexpected reply is enough
///. After promotion no further health checks run — the caller is
/// responsible for clearing mirrored state and switching roles.
pub async fn run_prober(config: &Config, store: &Arc<StateStore>, shutdown: CancellationToken) {
    let addr = config.peer_addr(config.health_port);
    let interval = Duration::from_secs(config.liveness_interval_secs);
    let timeout = Duration::from_millis(config.liveness_timeout_ms);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        match probe(&addr, timeout).await {
            Ok(true) => continue,
            Ok(false) => {
                warn!(%addr, "liveness probe got an unexpected reply, promoting to primary");
                store.clear();
                return;
            }
            Err(e) => {
                warn!(%addr, err = %e, "liveness probe timed out, promoting to primary");
                store.clear();
                return;
            }
        }
    }
}

async fn probe(addr: &str, timeout: Duration) -> std::io::Result<bool> {
    let attempt = async {
        let stream = TcpStream::connect(addr).await?;
        let mut framed = Framed::new(stream, LinesCodec::new());
        framed.send(LIVENESS_PING.to_string()).await.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        match framed.next().await {
            Some(Ok(line)) => Ok(line.trim() == LIVENESS_PONG),
            Some(Err(e)) => Err(std::io::Error::new(std::io::ErrorKind::Other, e)),
            None => Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "peer closed")),
        }
    };
    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "liveness probe timed out")),
    }
}
