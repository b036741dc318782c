// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios, run against the real `dispatchd` binary over
//! real TCP connections.

use std::time::Duration;

use dispatch_specs::{send_position, send_raw_position, send_raw_request, send_request, Node, NodePorts};
use tempfile::tempdir;

#[tokio::test]
async fn single_happy_path() -> anyhow::Result<()> {
    let ports = NodePorts::alloc()?;
    let state_dir = tempdir()?;
    let node = Node::spawn(ports, state_dir.path())?;
    node.wait_primary_ready().await?;

    send_position(ports.position, "t1", 2, 3).await?;
    send_position(ports.position, "t2", 8, 8).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let reply = send_request(ports.request, r#"{"id_usuario":"u1","x":3,"y":3}"#).await?;
    assert_eq!(reply["status"], "assigned");
    assert_eq!(reply["taxi_id"], "t1");
    Ok(())
}

#[tokio::test]
async fn exhaustion_rejects_once_pool_is_empty() -> anyhow::Result<()> {
    let ports = NodePorts::alloc()?;
    let state_dir = tempdir()?;
    let node = Node::spawn(ports, state_dir.path())?;
    node.wait_primary_ready().await?;

    send_position(ports.position, "t1", 2, 3).await?;
    send_position(ports.position, "t2", 8, 8).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let r1 = send_request(ports.request, r#"{"id_usuario":"u1","x":3,"y":3}"#).await?;
    assert_eq!(r1["status"], "assigned");
    let r2 = send_request(ports.request, r#"{"id_usuario":"u2","x":0,"y":0}"#).await?;
    assert_eq!(r2["status"], "assigned");

    let r3 = send_request(ports.request, r#"{"id_usuario":"u3","x":5,"y":5}"#).await?;
    assert_eq!(r3["status"], "rejected");
    Ok(())
}

#[tokio::test]
async fn taxi_rejoins_the_pool_after_its_trip() -> anyhow::Result<()> {
    let ports = NodePorts::alloc()?;
    let state_dir = tempdir()?;
    let node = Node::spawn(ports, state_dir.path())?;
    node.wait_primary_ready().await?;

    send_position(ports.position, "t1", 2, 3).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let r1 = send_request(ports.request, r#"{"id_usuario":"u1","x":3,"y":3}"#).await?;
    assert_eq!(r1["status"], "assigned");
    assert_eq!(r1["taxi_id"], "t1");

    // t1 drops the fare and reports a fresh position — it is available again.
    send_position(ports.position, "t1", 4, 4).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let r2 = send_request(ports.request, r#"{"id_usuario":"u4","x":4,"y":5}"#).await?;
    assert_eq!(r2["status"], "assigned");
    assert_eq!(r2["taxi_id"], "t1");
    Ok(())
}

#[tokio::test]
async fn equidistant_taxis_break_ties_lexicographically() -> anyhow::Result<()> {
    let ports = NodePorts::alloc()?;
    let state_dir = tempdir()?;
    let node = Node::spawn(ports, state_dir.path())?;
    node.wait_primary_ready().await?;

    send_position(ports.position, "zeta", 5, 5).await?;
    send_position(ports.position, "alpha", 5, 5).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let reply = send_request(ports.request, r#"{"id_usuario":"u1","x":5,"y":5}"#).await?;
    assert_eq!(reply["status"], "assigned");
    assert_eq!(reply["taxi_id"], "alpha");
    Ok(())
}

#[tokio::test]
async fn malformed_frames_are_dropped_and_the_channels_keep_serving() -> anyhow::Result<()> {
    let ports = NodePorts::alloc()?;
    let state_dir = tempdir()?;
    let node = Node::spawn(ports, state_dir.path())?;
    node.wait_primary_ready().await?;

    // Garbage on the position channel must not take the ingest worker down.
    send_raw_position(ports.position, "not-a-position-frame").await?;
    send_position(ports.position, "t1", 1, 1).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Truncated JSON on the request channel gets an error reply, and the
    // connection it arrived on can still be reused for a well-formed one.
    let reply = send_raw_request(ports.request, r#"{"id_usuario":"u1","x":1"#).await?;
    assert_eq!(reply["status"], "error");

    let reply = send_request(ports.request, r#"{"id_usuario":"u1","x":1,"y":1}"#).await?;
    assert_eq!(reply["status"], "assigned");
    assert_eq!(reply["taxi_id"], "t1");
    Ok(())
}

#[tokio::test]
async fn standby_promotes_and_keeps_serving_after_primary_failure() -> anyhow::Result<()> {
    let ports = NodePorts::alloc()?;
    let primary_dir = tempdir()?;
    let standby_dir = tempdir()?;

    let mut primary = Node::spawn(ports, primary_dir.path())?;
    primary.wait_primary_ready().await?;

    send_position(ports.position, "t1", 2, 3).await?;
    send_position(ports.position, "t2", 8, 8).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let standby = Node::spawn(ports, standby_dir.path())?;
    standby.wait_standby_settled().await;

    // Established before the primary dies, so the standby has mirrored it.
    let r1 = send_request(ports.request, r#"{"id_usuario":"u1","x":3,"y":3}"#).await?;
    assert_eq!(r1["status"], "assigned");
    assert_eq!(r1["taxi_id"], "t1");

    // Give replication a cycle to carry the post-assignment state across.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    primary.kill();

    // Liveness: interval 1s + timeout 500ms => promotion within ~1.5s.
    standby.wait_primary_ready().await?;

    let r2 = send_request(standby.ports.request, r#"{"id_usuario":"u2","x":8,"y":8}"#).await?;
    assert_eq!(r2["status"], "assigned");
    assert_eq!(r2["taxi_id"], "t2");
    Ok(())
}
