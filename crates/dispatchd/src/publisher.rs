// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Assignment publisher: fan-out of assignment events to taxis.
//! Decoupled from the request endpoint via a bounded queue that drops the
//! oldest entry when full — assignments are advisory, since the
//! authoritative reply already went to the user.

use std::collections::VecDeque;

use dispatch_core::codec::encode_assignment;
use dispatch_core::{Config, DispatchError, ErrorKind};
use futures_util::SinkExt;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Notify};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bounded drop-oldest queue of not-yet-published assignment events.
pub struct AssignmentQueue {
    inner: Mutex<VecDeque<String>>,
    notify: Notify,
    capacity: usize,
}

impl AssignmentQueue {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(VecDeque::with_capacity(capacity)), notify: Notify::new(), capacity: capacity.max(1) }
    }

    /// Stages a taxi's assignment for broadcast. When full, drops the
    /// oldest queued event to make room for this one.
    pub fn push(&self, taxi_id: &str) {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(encode_assignment(taxi_id));
        drop(queue);
        self.notify.notify_one();
    }

    async fn pop(&self) -> String {
        loop {
            if let Some(frame) = self.inner.lock().pop_front() {
                return frame;
            }
            self.notify.notified().await;
        }
    }
}

/// Binds the assignment channel in broadcast mode and drains `queue`,
/// fanning each event out to every connected subscriber. Delivery is
/// at-most-once, best-effort.
pub async fn run(config: &Config, queue: &AssignmentQueue, shutdown: CancellationToken) -> Result<(), DispatchError> {
    let addr = config.bind_addr(config.assign_port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        warn!(%addr, err = %e, "failed to bind assignment endpoint");
        DispatchError::new(ErrorKind::BindFailure, format!("{addr}: {e}"))
    })?;
    info!(%addr, "assignment publisher listening");

    let (tx, _rx) = broadcast::channel::<String>(config.assign_queue_depth.max(1));

    let accept_shutdown = shutdown.clone();
    let accept_tx = tx.clone();
    let accept_loop = async move {
        loop {
            tokio::select! {
                _ = accept_shutdown.cancelled() => return,
                accepted = listener.accept() => {
                    let Ok((stream, _)) = accepted else { return };
                    let mut rx = accept_tx.subscribe();
                    tokio::spawn(async move {
                        let mut framed = Framed::new(stream, LinesCodec::new());
                        while let Ok(frame) = rx.recv().await {
                            if framed.send(frame).await.is_err() {
                                break;
                            }
                        }
                    });
                }
            }
        }
    };

    let drain_loop = async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                frame = queue.pop() => {
                    debug!(%frame, "publishing assignment event");
                    let _ = tx.send(frame);
                }
            }
        }
    };

    tokio::join!(accept_loop, drain_loop);
    Ok(())
}
