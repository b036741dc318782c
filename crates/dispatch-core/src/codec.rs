// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Encode/decode for the four wire message kinds of the messaging fabric.
//!
//! Every channel is framed one-message-per-line over TCP (the Rust
//! equivalent of the original's one-atomic-frame-per-send ZeroMQ
//! sockets), so every function here operates on a single already-framed
//! line of text.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, ErrorKind};
use crate::model::{Position, RequestEntry, TaxiId};

/// `"<taxi-id>:(<x>,<y>)"` — position channel.
pub fn encode_position(id: &str, pos: Position) -> String {
    format!("{id}:({},{})", pos.x, pos.y)
}

/// Parses a position frame. Rejects identifiers containing a colon (the
/// delimiter) and non-integer coordinates; both are `MalformedFrame`.
pub fn decode_position(frame: &str) -> Result<(TaxiId, Position), DispatchError> {
    let malformed = || DispatchError::new(ErrorKind::MalformedFrame, frame.to_string());

    let (id, rest) = frame.split_once(':').ok_or_else(malformed)?;
    if id.is_empty() || id.contains(':') {
        return Err(malformed());
    }
    let rest = rest.trim();
    let inner = rest.strip_prefix('(').and_then(|s| s.strip_suffix(')')).ok_or_else(malformed)?;
    let (x_str, y_str) = inner.split_once(',').ok_or_else(malformed)?;
    let x: i64 = x_str.trim().parse().map_err(|_| malformed())?;
    let y: i64 = y_str.trim().parse().map_err(|_| malformed())?;
    Ok((id.to_string(), Position::new(x, y)))
}

/// `"<taxi-id>:assigned"` — assignment broadcast channel.
pub fn encode_assignment(id: &str) -> String {
    format!("{id}:assigned")
}

pub fn decode_assignment(frame: &str) -> Result<TaxiId, DispatchError> {
    frame
        .strip_suffix(":assigned")
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DispatchError::new(ErrorKind::MalformedFrame, frame.to_string()))
}

/// Discovery probe/reply text.
pub const DISCOVERY_PROBE: &str = "is-primary?";
pub const DISCOVERY_YES: &str = "yes";

/// Liveness probe/reply text.
pub const LIVENESS_PING: &str = "ping";
pub const LIVENESS_PONG: &str = "pong";

/// `id_usuario` may arrive as a JSON string or integer.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum UserIdWire {
    Str(String),
    Int(i64),
}

impl UserIdWire {
    fn into_string(self) -> String {
        match self {
            Self::Str(s) => s,
            Self::Int(i) => i.to_string(),
        }
    }
}

/// Decoded request-channel body.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRequest {
    pub user_id: String,
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Deserialize)]
struct UserRequestWire {
    id_usuario: UserIdWire,
    x: i64,
    y: i64,
}

pub fn decode_request(body: &str) -> Result<UserRequest, DispatchError> {
    let wire: UserRequestWire = serde_json::from_str(body)?;
    Ok(UserRequest { user_id: wire.id_usuario.into_string(), x: wire.x, y: wire.y })
}

/// Reply body for the request channel: one of `assigned`,
/// `rejected`, or `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Reply {
    Assigned {
        taxi_id: TaxiId,
    },
    Rejected {
        mensaje: String,
    },
    Error {
        mensaje: String,
    },
}

pub fn encode_reply(reply: &Reply) -> Result<String, DispatchError> {
    Ok(serde_json::to_string(reply)?)
}

/// Replicated state pushed by the primary and installed wholesale by the
/// standby. Field names match the original wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotWire {
    pub taxis: BTreeMap<TaxiId, (i64, i64)>,
    pub solicitudes: Vec<RequestEntry>,
}

pub fn encode_snapshot(snapshot: &SnapshotWire) -> Result<String, DispatchError> {
    Ok(serde_json::to_string(snapshot)?)
}

pub fn decode_snapshot(frame: &str) -> Result<SnapshotWire, DispatchError> {
    Ok(serde_json::from_str(frame)?)
}
