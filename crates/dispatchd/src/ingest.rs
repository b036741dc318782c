// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Position ingest: fan-in position reports from taxis. Malformed
//! frames and out-of-bounds coordinates are dropped silently; everything
//! else upserts the free pool, re-inserting a taxi that a prior
//! assignment removed.

use std::sync::Arc;

use dispatch_core::{Config, DispatchError, ErrorKind, StateStore};
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub async fn run(config: &Config, store: &Arc<StateStore>, shutdown: CancellationToken) -> Result<(), DispatchError> {
    let addr = config.bind_addr(config.position_port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        warn!(%addr, err = %e, "failed to bind position endpoint");
        DispatchError::new(ErrorKind::BindFailure, format!("{addr}: {e}"))
    })?;
    info!(%addr, "position ingest listening");

    let grid = config.grid();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let store = Arc::clone(store);
                tokio::spawn(async move { serve_one(stream, store, grid).await });
            }
        }
    }
}

async fn serve_one(stream: TcpStream, store: Arc<StateStore>, grid: dispatch_core::GridBounds) {
    let mut framed = Framed::new(stream, LinesCodec::new());
    while let Some(Ok(frame)) = framed.next().await {
        match dispatch_core::codec::decode_position(&frame) {
            Ok((id, pos)) if grid.contains(pos) => store.upsert_position(id, pos),
            Ok((id, pos)) => debug!(id, x = pos.x, y = pos.y, "dropping out-of-bounds position"),
            Err(e) => debug!(frame, err = %e, "dropping malformed position frame"),
        }
    }
}
