// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Role negotiator: on startup, probes the discovery channel to
//! decide primary vs. standby. Absence of a reply is indistinguishable
//! from absence of a primary, so the design deliberately prefers
//! dual-primary over no-primary.

use std::time::Duration;

use dispatch_core::codec::{DISCOVERY_PROBE, DISCOVERY_YES};
use dispatch_core::{Config, Role};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Opens a client connection to the configured discovery peer, sends the
/// probe, and waits for a reply within the configured deadline.
///
/// - Reply `"yes"` -> `Role::Standby`.
/// - Any send/receive error, timeout, or other reply -> `Role::Primary`.
pub async fn negotiate_role(config: &Config) -> Role {
    let addr = config.peer_addr(config.discovery_port);
    let timeout = Duration::from_millis(config.discovery_timeout_ms);

    match probe(&addr, timeout).await {
        Ok(true) => {
            info!(%addr, "discovery probe answered yes, starting as standby");
            Role::Standby
        }
        Ok(false) => {
            info!(%addr, "discovery probe answered something other than yes, starting as primary");
            Role::Primary
        }
        Err(e) => {
            info!(%addr, err = %e, "discovery probe failed, starting as primary");
            Role::Primary
        }
    }
}

async fn probe(addr: &str, timeout: Duration) -> std::io::Result<bool> {
    let attempt = async {
        let stream = TcpStream::connect(addr).await?;
        let mut framed = Framed::new(stream, LinesCodec::new());
        framed
            .send(DISCOVERY_PROBE.to_string())
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        match framed.next().await {
            Some(Ok(line)) => Ok(line.trim() == DISCOVERY_YES),
            Some(Err(e)) => Err(std::io::Error::new(std::io::ErrorKind::Other, e)),
            None => Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "peer closed")),
        }
    };
    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "discovery probe timed out")),
    }
}

/// Binds the discovery endpoint and answers every request with `"yes"`.
/// Only the primary runs this; its mere presence on the port is the
/// signal a late-joining negotiator relies on.
pub async fn run_responder(config: &Config, shutdown: CancellationToken) -> Result<(), dispatch_core::DispatchError> {
    let addr = config.bind_addr(config.discovery_port);
    let listener = bind(&addr).await?;
    info!(%addr, "discovery responder listening");

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
        if framed.send(DISCOVERY_YES.to_string()).await.is_err() {
            break;
        }
    }
}

async fn bind(addr: &str) -> Result<TcpListener, dispatch_core::DispatchError> {
    TcpListener::bind(addr).await.map_err(|e| {
        warn!(%addr, err = %e, "failed to bind discovery endpoint");
        dispatch_core::DispatchError::new(dispatch_core::ErrorKind::BindFailure, format!("{addr}: {e}"))
    })
}
