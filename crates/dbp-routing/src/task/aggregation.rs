//! # Aggregation Coordinator
//!
//! Fan-out/fan-in for queries spanning several shards. One
//! [`AggregatedTask`] is shared (via `Arc`) by the query tasks of every
//! canonical shard. Each successful shard calls
//! [`AggregatedTask::fill_result`]; when the last reference drops, the
//! combined answer is sent, listing shards that never reported as failed.
//!
//! Pending state lives in a fixed pool of mutex-guarded slots picked
//! round-robin, not behind one mutex per task.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::warn;

use super::answer::{Answer, AnswerChannel, AnswerError};
use crate::domain::{ErrorCode, QueryResult, ReformedKeys};

/// Number of lock slots shared by all aggregated tasks.
pub const AGGREGATION_SLOTS: usize = 64;

lazy_static! {
    static ref SLOTS: Vec<Mutex<HashMap<u64, AggregationState>>> = (0..AGGREGATION_SLOTS)
        .map(|_| Mutex::new(HashMap::new()))
        .collect();
}

static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// How the fan-out was addressed; decides what `failedIds` lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateKind {
    /// Integer shard keys.
    IntKeys,
    /// String shard keys, hashed.
    StringKeys,
    /// Every physical shard.
    AllShards,
}

/// Original keys served by one canonical shard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregationUnit {
    /// Canonical shard key.
    pub shard_id: i64,
    /// Original integer keys.
    pub int_keys: BTreeSet<i64>,
    /// Original string keys.
    pub string_keys: BTreeSet<String>,
}

struct AggregationState {
    pending: BTreeMap<i64, AggregationUnit>,
    results: Vec<(i64, QueryResult)>,
}

/// Shared coordinator of one fan-out.
pub struct AggregatedTask {
    id: u64,
    slot: usize,
    kind: AggregateKind,
    invalid: AggregationUnit,
    channel: Arc<AnswerChannel>,
}

impl AggregatedTask {
    fn create(
        kind: AggregateKind,
        units: Vec<AggregationUnit>,
        invalid: AggregationUnit,
        channel: Arc<AnswerChannel>,
    ) -> Arc<Self> {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let slot = NEXT_SLOT.fetch_add(1, Ordering::Relaxed) % AGGREGATION_SLOTS;
        let pending = units.into_iter().map(|u| (u.shard_id, u)).collect();
        SLOTS[slot].lock().insert(
            id,
            AggregationState {
                pending,
                results: Vec::new(),
            },
        );
        Arc::new(Self {
            id,
            slot,
            kind,
            invalid,
            channel,
        })
    }

    /// Fan-out over integer keys grouped by canonical shard.
    pub fn for_int_keys(reformed: &ReformedKeys, channel: Arc<AnswerChannel>) -> Arc<Self> {
        let units = reformed
            .pairs
            .iter()
            .map(|(&shard_id, keys)| AggregationUnit {
                shard_id,
                int_keys: keys.clone(),
                string_keys: BTreeSet::new(),
            })
            .collect();
        let invalid = AggregationUnit {
            shard_id: -1,
            int_keys: reformed.invalid.clone(),
            string_keys: BTreeSet::new(),
        };
        Self::create(AggregateKind::IntKeys, units, invalid, channel)
    }

    /// Fan-out over string keys; `originals` maps each hash back to its
    /// strings.
    pub fn for_string_keys(
        reformed: &ReformedKeys,
        originals: &HashMap<i64, BTreeSet<String>>,
        channel: Arc<AnswerChannel>,
    ) -> Arc<Self> {
        let strings_of = |hashes: &BTreeSet<i64>| -> BTreeSet<String> {
            hashes
                .iter()
                .filter_map(|h| originals.get(h))
                .flatten()
                .cloned()
                .collect()
        };
        let units = reformed
            .pairs
            .iter()
            .map(|(&shard_id, hashes)| AggregationUnit {
                shard_id,
                int_keys: BTreeSet::new(),
                string_keys: strings_of(hashes),
            })
            .collect();
        let invalid = AggregationUnit {
            shard_id: -1,
            int_keys: BTreeSet::new(),
            string_keys: strings_of(&reformed.invalid),
        };
        Self::create(AggregateKind::StringKeys, units, invalid, channel)
    }

    /// Fan-out over every canonical shard key.
    pub fn for_all_shards(shard_ids: &BTreeSet<i64>, channel: Arc<AnswerChannel>) -> Arc<Self> {
        let units = shard_ids
            .iter()
            .map(|&shard_id| AggregationUnit {
                shard_id,
                ..AggregationUnit::default()
            })
            .collect();
        Self::create(AggregateKind::AllShards, units, AggregationUnit::default(), channel)
    }

    /// Addressing mode.
    pub fn kind(&self) -> AggregateKind {
        self.kind
    }

    /// Record the result of one canonical shard. Unknown or repeated shards
    /// are ignored.
    pub fn fill_result(&self, shard_id: i64, result: QueryResult) {
        let mut slot = SLOTS[self.slot].lock();
        if let Some(state) = slot.get_mut(&self.id) {
            if state.pending.remove(&shard_id).is_some() {
                state.results.push((shard_id, result));
            } else {
                warn!("[dbp] Unexpected result for shard {} in aggregated task", shard_id);
            }
        }
    }

    /// Shards that have not reported yet.
    pub fn pending_shards(&self) -> Vec<i64> {
        SLOTS[self.slot]
            .lock()
            .get(&self.id)
            .map(|state| state.pending.keys().copied().collect())
            .unwrap_or_default()
    }

    fn failed_ids(&self, pending: &BTreeMap<i64, AggregationUnit>) -> Value {
        match self.kind {
            AggregateKind::IntKeys => {
                let ids: BTreeSet<i64> = pending.values().flat_map(|u| u.int_keys.iter().copied()).collect();
                json!(ids)
            }
            AggregateKind::StringKeys => {
                let ids: BTreeSet<&String> = pending.values().flat_map(|u| u.string_keys.iter()).collect();
                json!(ids)
            }
            AggregateKind::AllShards => json!(pending.keys().collect::<Vec<_>>()),
        }
    }

    fn invalid_ids(&self) -> Value {
        match self.kind {
            AggregateKind::StringKeys => json!(self.invalid.string_keys),
            _ => json!(self.invalid.int_keys),
        }
    }

    fn combine(&self, mut state: AggregationState) -> Answer {
        if state.results.is_empty() {
            return Err(AnswerError::new(
                ErrorCode::InternalError,
                "Unknown Error. No aggregated task executed.",
            ));
        }
        state.results.sort_by_key(|(shard_id, _)| *shard_id);

        let failed = self.failed_ids(&state.pending);
        let invalid = self.invalid_ids();

        let fields = match &state.results[0].1 {
            QueryResult::Select { fields, .. } => Some(fields.clone()),
            QueryResult::Modify { .. } => None,
        };

        if let Some(fields) = fields {
            let rows: Vec<Vec<String>> = state
                .results
                .into_iter()
                .filter_map(|(_, result)| match result {
                    QueryResult::Select { rows, .. } => Some(rows),
                    QueryResult::Modify { .. } => None,
                })
                .flatten()
                .collect();
            return Ok(json!({
                "fields": fields,
                "rows": rows,
                "failedIds": failed,
                "invalidIds": invalid,
            }));
        }

        let results: Vec<Value> = state
            .results
            .iter()
            .filter_map(|(shard_id, result)| match result {
                QueryResult::Modify {
                    affected_rows,
                    insert_id,
                } => Some(json!([shard_id, affected_rows, insert_id])),
                QueryResult::Select { .. } => None,
            })
            .collect();
        Ok(json!({
            "results": results,
            "failedIds": failed,
            "invalidIds": invalid,
        }))
    }
}

impl Drop for AggregatedTask {
    fn drop(&mut self) {
        let state = SLOTS[self.slot].lock().remove(&self.id);
        if let Some(state) = state {
            let answer = self.combine(state);
            self.channel.send(answer);
        }
    }
}
