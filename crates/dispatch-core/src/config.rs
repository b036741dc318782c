// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

use crate::error::{DispatchError, ErrorKind};

/// Dispatch cluster node: serves as primary or standby depending on what
/// the startup role negotiation finds.
#[derive(Debug, Clone, Parser)]
#[command(name = "dispatchd", version, about)]
pub struct Config {
    /// Host address to bind every listening endpoint to.
    #[arg(long, env = "DISPATCH_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Host to probe for an existing primary at startup.
    #[arg(long, env = "DISPATCH_DISCOVERY_PEER", default_value = "127.0.0.1")]
    pub discovery_peer: String,

    /// Position channel port.
    #[arg(long, env = "DISPATCH_POSITION_PORT", default_value = "5555")]
    pub position_port: u16,

    /// Assignment broadcast channel port.
    #[arg(long, env = "DISPATCH_ASSIGN_PORT", default_value = "5556")]
    pub assign_port: u16,

    /// Request/reply channel port.
    #[arg(long, env = "DISPATCH_REQUEST_PORT", default_value = "5557")]
    pub request_port: u16,

    /// Discovery channel port.
    #[arg(long, env = "DISPATCH_DISCOVERY_PORT", default_value = "5560")]
    pub discovery_port: u16,

    /// Replication channel port.
    #[arg(long, env = "DISPATCH_REPLICATION_PORT", default_value = "5561")]
    pub replication_port: u16,

    /// Liveness channel port.
    #[arg(long, env = "DISPATCH_HEALTH_PORT", default_value = "5562")]
    pub health_port: u16,

    /// Grid width `N`; x ranges over `[0, N]`.
    #[arg(long, env = "DISPATCH_GRID_WIDTH", default_value = "100")]
    pub grid_width: i64,

    /// Grid height `M`; y ranges over `[0, M]`.
    #[arg(long, env = "DISPATCH_GRID_HEIGHT", default_value = "100")]
    pub grid_height: i64,

    /// Directory for `state.json` / `ledger.json` / `metrics.json`.
    #[arg(long, env = "DISPATCH_STATE_DIR", default_value = ".")]
    pub state_dir: PathBuf,

    /// How often the primary rewrites `state.json` (seconds).
    #[arg(long, env = "DISPATCH_SNAPSHOT_INTERVAL_SECS", default_value = "5")]
    pub snapshot_interval_secs: u64,

    /// How often the primary pushes a replication snapshot (seconds).
    #[arg(long, env = "DISPATCH_REPLICATION_INTERVAL_SECS", default_value = "2")]
    pub replication_interval_secs: u64,

    /// How often the standby probes liveness (seconds).
    #[arg(long, env = "DISPATCH_LIVENESS_INTERVAL_SECS", default_value = "2")]
    pub liveness_interval_secs: u64,

    /// Deadline for the discovery probe (milliseconds).
    #[arg(long, env = "DISPATCH_DISCOVERY_TIMEOUT_MS", default_value = "2000")]
    pub discovery_timeout_ms: u64,

    /// Deadline for each liveness probe (milliseconds).
    #[arg(long, env = "DISPATCH_LIVENESS_TIMEOUT_MS", default_value = "2000")]
    pub liveness_timeout_ms: u64,

    /// Maximum response-time samples retained for metrics.
    #[arg(long, env = "DISPATCH_RESPONSE_TIME_CAP", default_value = "1000")]
    pub response_time_cap: usize,

    /// Depth of the assignment-event queue feeding the publisher.
    #[arg(long, env = "DISPATCH_ASSIGN_QUEUE_DEPTH", default_value = "256")]
    pub assign_queue_depth: usize,

    /// Log format: `json` or `text`.
    #[arg(long, env = "DISPATCH_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "DISPATCH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validates port collisions and degenerate grid bounds. Called once
    /// in `main` before any endpoint is bound.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.grid_width <= 0 || self.grid_height <= 0 {
            return Err(DispatchError::new(
                ErrorKind::BindFailure,
                "grid_width and grid_height must be positive",
            ));
        }

        let ports = [
            self.position_port,
            self.assign_port,
            self.request_port,
            self.discovery_port,
            self.replication_port,
            self.health_port,
        ];
        for (i, a) in ports.iter().enumerate() {
            for b in &ports[i + 1..] {
                if a == b {
                    return Err(DispatchError::new(
                        ErrorKind::BindFailure,
                        format!("duplicate port {a} across endpoints"),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn grid(&self) -> crate::model::GridBounds {
        crate::model::GridBounds::new(self.grid_width, self.grid_height)
    }

    pub fn bind_addr(&self, port: u16) -> String {
        format!("{}:{port}", self.host)
    }

    pub fn peer_addr(&self, port: u16) -> String {
        format!("{}:{port}", self.discovery_peer)
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join("ledger.json")
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.state_dir.join("metrics.json")
    }
}
