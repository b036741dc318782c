// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Component workers for the taxi dispatch cluster: role
//! negotiation, liveness, replication, position ingest, the request
//! endpoint, the assignment publisher, and the supervisor tying them
//! together.

pub mod ingest;
pub mod liveness;
pub mod negotiator;
pub mod publisher;
pub mod replication;
pub mod request;
pub mod supervisor;

use dispatch_core::Config;

/// Runs the node to completion: negotiates a role, then starts the
/// component set appropriate to it. Returns only on an
/// unrecoverable bind failure or process shutdown signal.
pub async fn run(config: Config) -> anyhow::Result<()> {
    supervisor::run(config).await
}
