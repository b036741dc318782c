// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unified error categorization shared by every worker in the cluster:
//! one small enum, a human string, and a predicate the supervisor uses
//! to decide whether to log-and-continue or exit.

use std::fmt;

/// Failure categories from the error handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A frame on any channel did not parse as the expected grammar.
    MalformedFrame,
    /// A request-channel body failed to decode as the expected JSON shape.
    DecodeError,
    /// A position update named coordinates outside the configured grid.
    OutOfBounds,
    /// A liveness or discovery probe timed out or got an unexpected reply.
    PeerTimeout,
    /// A listener failed to bind its configured address. Fatal.
    BindFailure,
    /// A state/ledger/metrics file read or write failed.
    Io,
    /// The free pool was empty at match time. Not an error — a valid
    /// `rejected` outcome — kept here only so callers can log it uniformly.
    NoTaxiAvailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedFrame => "malformed_frame",
            Self::DecodeError => "decode_error",
            Self::OutOfBounds => "out_of_bounds",
            Self::PeerTimeout => "peer_timeout",
            Self::BindFailure => "bind_failure",
            Self::Io => "io",
            Self::NoTaxiAvailable => "no_taxi_available",
        }
    }
}

/// An error tagged with its category, carried across worker boundaries.
#[derive(Debug)]
pub struct DispatchError {
    pub kind: ErrorKind,
    pub message: String,
}

impl DispatchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// Only bind failures stop the process; every other kind is handled by
    /// the owning worker (logged, counted, and the loop continues).
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::BindFailure)
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for DispatchError {}

impl From<std::io::Error> for DispatchError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::DecodeError, e.to_string())
    }
}
