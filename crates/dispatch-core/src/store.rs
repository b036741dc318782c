// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The state store: taxi free pool, request ledger, and metrics
//! behind a single serializing lock, with best-effort snapshot-to-file.

use std::collections::{BTreeMap, VecDeque};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::codec::SnapshotWire;
use crate::error::DispatchError;
use crate::model::{Metrics, Outcome, Position, RequestEntry, TaxiId};

struct Inner {
    free_pool: BTreeMap<TaxiId, Position>,
    ledger: Vec<RequestEntry>,
    metrics: Metrics,
    response_times: VecDeque<f64>,
}

/// Outcome of `StateStore::handle_request`, carrying everything the
/// request endpoint needs to build its reply and, on assignment, stage an
/// event for the publisher — all produced inside one critical section.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub outcome: Outcome,
    /// Set only when a taxi was taken from the free pool.
    pub assigned_taxi: Option<TaxiId>,
}

/// In-memory taxi registry + request ledger + metrics, serialized by a
/// single mutex: every snapshot and mutation shares one critical section,
/// so readers never observe a torn mix of free pool, ledger, and metrics.
pub struct StateStore {
    inner: Mutex<Inner>,
    response_time_cap: usize,
    state_path: PathBuf,
    ledger_path: PathBuf,
    metrics_path: PathBuf,
}

impl StateStore {
    pub fn new(state_path: PathBuf, ledger_path: PathBuf, metrics_path: PathBuf, response_time_cap: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                free_pool: BTreeMap::new(),
                ledger: Vec::new(),
                metrics: Metrics::default(),
                response_times: VecDeque::new(),
            }),
            response_time_cap,
            state_path,
            ledger_path,
            metrics_path,
        }
    }

    /// Loads `state.json`, `ledger.json`, and `metrics.json` if present.
    /// Primary-only: a standby's state comes from replication, never from
    /// a possibly-stale local file.
    pub fn load_from_disk(&self) -> Result<(), DispatchError> {
        if let Some(snapshot) = read_json_if_exists::<SnapshotWire>(&self.state_path)? {
            let mut inner = self.inner.lock();
            inner.free_pool = snapshot.taxis.into_iter().map(|(id, (x, y))| (id, Position::new(x, y))).collect();
        }
        if let Some(ledger) = read_json_if_exists::<Vec<RequestEntry>>(&self.ledger_path)? {
            let mut inner = self.inner.lock();
            let (assigned, rejected) = count_outcomes(&ledger);
            inner.metrics.assigned = assigned;
            inner.metrics.rejected = rejected;
            for entry in &ledger {
                if let Some(secs) = entry.response_time_secs {
                    push_bounded(&mut inner.response_times, secs, self.response_time_cap);
                }
            }
            inner.ledger = ledger;
        }
        if let Some(metrics) = read_json_if_exists::<MetricsFile>(&self.metrics_path)? {
            // The ledger recount above is authoritative; the
            // metrics file only contributes if the ledger was empty/absent.
            let mut inner = self.inner.lock();
            if inner.ledger.is_empty() {
                inner.metrics.assigned = metrics.assigned;
                inner.metrics.rejected = metrics.rejected;
                inner.response_times = metrics.response_times.into_iter().collect();
            }
        }
        Ok(())
    }

    /// Inserts or updates a taxi's position. Re-inserts a taxi that a
    /// prior assignment removed — this is how it rejoins the free pool
    /// after completing a trip.
    pub fn upsert_position(&self, id: TaxiId, pos: Position) {
        self.inner.lock().free_pool.insert(id, pos);
    }

    /// Scans the free pool for the entry minimizing Euclidean distance to
    /// `(x, y)`, removing it atomically with the scan. Ties break on
    /// lexicographically smaller identifier: `free_pool` is a `BTreeMap`
    /// so iteration is already id-ordered, and `scan_nearest`'s `<=`
    /// comparison keeps the first (smallest-id) candidate on a tie.
    pub fn take_nearest(&self, x: i64, y: i64) -> Option<TaxiId> {
        let mut inner = self.inner.lock();
        let (id, _) = scan_nearest(&inner.free_pool, Position::new(x, y))?;
        inner.free_pool.remove(&id);
        Some(id)
    }

    /// Re-inserts a taxi taken by `take_nearest`. The only rollback path
    /// in the design: keeps a known taxi in exactly one of {free pool,
    /// assigned} if a step after the match fails before the assignment is
    /// committed to the ledger.
    pub fn put_back(&self, id: TaxiId, pos: Position) {
        self.inner.lock().free_pool.insert(id, pos);
    }

    /// Runs the full match-and-record protocol under one held lock:
    /// match, ledger append, counter bump, latency sample. Returns the
    /// outcome the request endpoint replies with.
    pub fn handle_request(&self, user_id: String, pickup: Position, arrived_at_ms: u64, response_time_secs: f64) -> MatchResult {
        let mut inner = self.inner.lock();
        let best = scan_nearest(&inner.free_pool, pickup);

        let (outcome, assigned_taxi) = match best {
            Some((id, _)) => {
                inner.free_pool.remove(&id);
                inner.metrics.assigned += 1;
                (Outcome::Assigned { taxi_id: id.clone() }, Some(id))
            }
            None => {
                inner.metrics.rejected += 1;
                (Outcome::Rejected { reason: "no taxis available".to_string() }, None)
            }
        };

        inner.ledger.push(RequestEntry {
            user_id,
            pickup,
            arrived_at_ms,
            outcome: outcome.clone(),
            response_time_secs: Some(response_time_secs),
        });
        push_bounded(&mut inner.response_times, response_time_secs, self.response_time_cap);

        MatchResult { outcome, assigned_taxi }
    }

    pub fn metrics(&self) -> Metrics {
        self.inner.lock().metrics
    }

    pub fn ledger_len(&self) -> usize {
        self.inner.lock().ledger.len()
    }

    pub fn free_pool_len(&self) -> usize {
        self.inner.lock().free_pool.len()
    }

    pub fn free_pool(&self) -> BTreeMap<TaxiId, Position> {
        self.inner.lock().free_pool.clone()
    }

    /// Produces a self-contained snapshot derived from the current
    /// critical section, so it never reflects a torn state.
    pub fn snapshot(&self) -> SnapshotWire {
        let inner = self.inner.lock();
        SnapshotWire {
            taxis: inner.free_pool.iter().map(|(id, pos)| (id.clone(), (pos.x, pos.y))).collect(),
            solicitudes: inner.ledger.clone(),
        }
    }

    /// Replaces the entire registry and ledger with `snapshot` (full
    /// overwrite, no merge) — the standby's only mutation path.
    pub fn install(&self, snapshot: SnapshotWire) {
        let mut inner = self.inner.lock();
        inner.free_pool = snapshot.taxis.into_iter().map(|(id, (x, y))| (id, Position::new(x, y))).collect();
        let (assigned, rejected) = count_outcomes(&snapshot.solicitudes);
        inner.metrics.assigned = assigned;
        inner.metrics.rejected = rejected;
        inner.ledger = snapshot.solicitudes;
    }

    /// Clears the free pool and ledger. Called by a standby on
    /// promotion: mirrored state is possibly stale once the primary is
    /// presumed dead.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.free_pool.clear();
        inner.ledger.clear();
        inner.metrics = Metrics::default();
        inner.response_times.clear();
    }

    /// Rewrites `state.json` with a rename-over-original so readers never
    /// observe a half-written file. The only suspension point permitted
    /// while the mutex is held — it is synchronous and infrequent.
    pub fn write_state_file(&self) -> Result<(), DispatchError> {
        let snapshot = self.snapshot();
        write_json_atomic(&self.state_path, &snapshot)
    }

    pub fn write_ledger_file(&self) -> Result<(), DispatchError> {
        let ledger = self.inner.lock().ledger.clone();
        write_json_atomic(&self.ledger_path, &ledger)
    }

    pub fn write_metrics_file(&self) -> Result<(), DispatchError> {
        let file = {
            let inner = self.inner.lock();
            MetricsFile {
                assigned: inner.metrics.assigned,
                rejected: inner.metrics.rejected,
                response_times: inner.response_times.iter().copied().collect(),
            }
        };
        write_json_atomic(&self.metrics_path, &file)
    }
}

/// On-disk shape of `metrics.json`: counters plus the bounded
/// response-time sample list, field-named to match the original's
/// `metricas_servidor.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetricsFile {
    #[serde(rename = "servicios_exitosos")]
    assigned: u64,
    #[serde(rename = "servicios_rechazados")]
    rejected: u64,
    #[serde(rename = "tiempos_respuesta")]
    response_times: Vec<f64>,
}

/// Scans `free_pool` (id-ordered, since it's a `BTreeMap`) for the entry
/// minimizing squared distance to `target`; a strict `<=` comparison never
/// displaces the current best on a tie, so the lexicographically smaller
/// id wins.
fn scan_nearest(free_pool: &BTreeMap<TaxiId, Position>, target: Position) -> Option<(TaxiId, i64)> {
    free_pool.iter().map(|(id, pos)| (id.clone(), pos.sq_distance(&target))).fold(None, |best, (id, dist)| match best {
        Some((_, best_dist)) if best_dist <= dist => best,
        _ => Some((id, dist)),
    })
}

fn push_bounded(queue: &mut VecDeque<f64>, value: f64, cap: usize) {
    if cap == 0 {
        return;
    }
    if queue.len() >= cap {
        queue.pop_front();
    }
    queue.push_back(value);
}

fn count_outcomes(ledger: &[RequestEntry]) -> (u64, u64) {
    let assigned = ledger.iter().filter(|e| matches!(e.outcome, Outcome::Assigned { .. })).count() as u64;
    let rejected = ledger.iter().filter(|e| matches!(e.outcome, Outcome::Rejected { .. })).count() as u64;
    (assigned, rejected)
}

fn read_json_if_exists<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, DispatchError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), DispatchError> {
    let body = serde_json::to_string_pretty(value)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(body.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| DispatchError::from(e.error))?;
    Ok(())
}
