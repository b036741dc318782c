// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end scenarios.
//!
//! Spawns the real `dispatchd` binary as a subprocess, bound to ephemeral
//! ports, and drives it over real `TcpStream` connections.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

/// Resolve the path to the compiled `dispatchd` binary.
pub fn dispatchd_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs -> tests -> workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("dispatchd")
}

/// Find a free TCP port by binding to :0 then releasing it.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Ports a spawned node binds, all ephemeral and distinct.
#[derive(Debug, Clone, Copy)]
pub struct NodePorts {
    pub position: u16,
    pub assign: u16,
    pub request: u16,
    pub discovery: u16,
    pub replication: u16,
    pub health: u16,
}

impl NodePorts {
    pub fn alloc() -> anyhow::Result<Self> {
        Ok(Self {
            position: free_port()?,
            assign: free_port()?,
            request: free_port()?,
            discovery: free_port()?,
            replication: free_port()?,
            health: free_port()?,
        })
    }
}

/// A running `dispatchd` subprocess. Killed on drop.
pub struct Node {
    child: Child,
    pub ports: NodePorts,
}

impl Node {
    /// Spawns `dispatchd` against a shared `NodePorts` set. Every endpoint
    /// in a cluster is bound to the same port numbers on `127.0.0.1` —
    /// only the primary ever actually binds them, so a standby started
    /// against the same port set negotiates against the running primary
    /// and otherwise stays silent on the network until promoted. Each
    /// node still needs its own `state_dir`.
    pub fn spawn(ports: NodePorts, state_dir: &Path) -> anyhow::Result<Self> {
        let child = Command::new(dispatchd_binary())
            .env("DISPATCH_HOST", "127.0.0.1")
            .env("DISPATCH_DISCOVERY_PEER", "127.0.0.1")
            .env("DISPATCH_POSITION_PORT", ports.position.to_string())
            .env("DISPATCH_ASSIGN_PORT", ports.assign.to_string())
            .env("DISPATCH_REQUEST_PORT", ports.request.to_string())
            .env("DISPATCH_DISCOVERY_PORT", ports.discovery.to_string())
            .env("DISPATCH_REPLICATION_PORT", ports.replication.to_string())
            .env("DISPATCH_HEALTH_PORT", ports.health.to_string())
            .env("DISPATCH_STATE_DIR", state_dir)
            .env("DISPATCH_GRID_WIDTH", "100")
            .env("DISPATCH_GRID_HEIGHT", "100")
            .env("DISPATCH_DISCOVERY_TIMEOUT_MS", "500")
            .env("DISPATCH_LIVENESS_TIMEOUT_MS", "500")
            .env("DISPATCH_LIVENESS_INTERVAL_SECS", "1")
            .env("DISPATCH_REPLICATION_INTERVAL_SECS", "1")
            .env("DISPATCH_SNAPSHOT_INTERVAL_SECS", "1")
            .env("DISPATCH_LOG_LEVEL", "warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(Self { child, ports })
    }

    /// Waits for the request endpoint to accept connections. Only
    /// meaningful for a node that is (or will become) primary.
    pub async fn wait_primary_ready(&self) -> anyhow::Result<()> {
        let addr = format!("127.0.0.1:{}", self.ports.request);
        for _ in 0..100 {
            if TcpStream::connect(&addr).await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("dispatchd never bound the request endpoint on {addr}")
    }

    /// A standby binds nothing until promoted, so readiness can only be
    /// approximated by letting the discovery negotiation settle.
    pub async fn wait_standby_settled(&self) {
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    pub fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Sends a single request-channel body and awaits the single-line JSON reply.
pub async fn send_request(port: u16, body: &str) -> anyhow::Result<serde_json::Value> {
    let stream = TcpStream::connect(("127.0.0.1", port)).await?;
    let mut framed = Framed::new(stream, LinesCodec::new());
    framed.send(body.to_string()).await?;
    let line = framed.next().await.ok_or_else(|| anyhow::anyhow!("connection closed without a reply"))??;
    Ok(serde_json::from_str(&line)?)
}

/// Pushes a single position frame (fire-and-forget, no reply expected).
pub async fn send_position(port: u16, taxi_id: &str, x: i64, y: i64) -> anyhow::Result<()> {
    let stream = TcpStream::connect(("127.0.0.1", port)).await?;
    let mut framed = Framed::new(stream, LinesCodec::new());
    framed.send(format!("{taxi_id}:({x},{y})")).await?;
    Ok(())
}

/// Pushes a raw (possibly malformed) frame on the position channel.
pub async fn send_raw_position(port: u16, frame: &str) -> anyhow::Result<()> {
    let stream = TcpStream::connect(("127.0.0.1", port)).await?;
    let mut framed = Framed::new(stream, LinesCodec::new());
    framed.send(frame.to_string()).await?;
    Ok(())
}

/// Sends a raw (possibly truncated) body on the request channel and
/// returns whatever reply (if any) comes back.
pub async fn send_raw_request(port: u16, body: &str) -> anyhow::Result<serde_json::Value> {
    send_request(port, body).await
}
