//! # Shard Map
//!
//! Immutable routing snapshot built by [`super::ShardMapBuilder`]. It maps
//! `(table, cluster, key)` to a database group, a physical database name and
//! a rewritten statement, and feeds the group's queue.
//!
//! The only mutable state is the read rotation cursor and the per-group
//! "taken over" flags set when a newer map reuses a group.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error, warn};

use super::group::DatabaseGroup;
use crate::algorithms::add_table_suffix;
use crate::domain::{
    hash_shard_index, parity_side, preserve_parity, range_slot_index, secondary_bucket,
    secondary_bucket_count, CategoryInfo, CategoryKey, ErrorCode, GroupIdentity, IndexType,
    NegativeKeyPolicy, QueueLimits, ReformedKeys, RouterError, SplitInfo, SplitType, TableKey,
};
use crate::metrics;
use crate::pool::Lane;
use crate::task::{AnswerChannel, QueryTask, Reply, Task, TaskBox, TransactionTask};

/// Group index plus physical database name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ShardTarget {
    pub(crate) group: usize,
    pub(crate) database: String,
}

/// One range slot.
#[derive(Clone, Debug)]
pub(crate) enum RangeSlot {
    Single(ShardTarget),
    Paired { odd: ShardTarget, even: ShardTarget },
}

impl RangeSlot {
    fn is_paired(&self) -> bool {
        matches!(self, RangeSlot::Paired { .. })
    }

    fn target_for(&self, key: i64) -> &ShardTarget {
        match self {
            RangeSlot::Single(target) => target,
            RangeSlot::Paired { odd, even } => match parity_side(key) {
                IndexType::Odd => odd,
                _ => even,
            },
        }
    }

    pub(crate) fn targets_mut(&mut self) -> Vec<&mut ShardTarget> {
        match self {
            RangeSlot::Single(target) => vec![target],
            RangeSlot::Paired { odd, even } => vec![odd, even],
        }
    }
}

/// Ordered slots of one range category.
#[derive(Clone, Debug)]
pub(crate) struct RangeCategory {
    pub(crate) slots: Vec<RangeSlot>,
}

/// How a logical table spreads over physical tables.
#[derive(Clone, Debug)]
pub(crate) enum TablePolicy {
    Hash {
        count: i64,
        shards: Vec<Option<ShardTarget>>,
    },
    Range {
        category: Option<usize>,
        span: i64,
        secondary_span: Option<i64>,
    },
}

/// One logical table.
#[derive(Clone, Debug)]
pub(crate) struct LogicalTable {
    pub(crate) database_category: String,
    pub(crate) split_hint: String,
    pub(crate) policy: TablePolicy,
}

/// Resolution outcome for one statement.
pub struct Route {
    /// Group owning the physical table.
    pub group: Arc<DatabaseGroup>,
    /// Physical database name.
    pub database: String,
    /// Statement with the physical table name.
    pub sql: String,
}

/// Statement addressed to a logical table.
#[derive(Clone, Copy, Debug)]
pub struct QueryTarget<'a> {
    /// Logical table name.
    pub table: &'a str,
    /// Cluster, empty for the default one.
    pub cluster: &'a str,
    /// Statement, possibly with quoted placeholders.
    pub sql: &'a str,
    /// Values for the remaining placeholders.
    pub params: &'a [String],
}

/// Statements of one atomic transaction, index-aligned.
#[derive(Clone, Copy, Debug)]
pub struct TransactionTarget<'a> {
    /// Shard keys.
    pub keys: &'a [i64],
    /// Logical table names.
    pub tables: &'a [String],
    /// Cluster for every statement.
    pub cluster: &'a str,
    /// Statements, already preassembled.
    pub sqls: &'a [String],
}

/// Immutable routing snapshot.
pub struct ShardMap {
    pub(crate) update_time: i64,
    pub(crate) number_base: i64,
    pub(crate) tables: Vec<LogicalTable>,
    pub(crate) table_index: HashMap<TableKey, usize>,
    pub(crate) categories: Vec<RangeCategory>,
    pub(crate) category_index: HashMap<CategoryKey, usize>,
    pub(crate) groups: Vec<Arc<DatabaseGroup>>,
    pub(crate) taken_over: Vec<AtomicBool>,
    pub(crate) read_cursor: AtomicUsize,
    pub(crate) limits: QueueLimits,
    pub(crate) negative_keys: NegativeKeyPolicy,
}

impl ShardMap {
    /// Update time of the configuration this map was built from.
    pub fn update_time(&self) -> i64 {
        self.update_time
    }

    /// Number of logical tables.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Groups referenced by this map.
    pub fn groups(&self) -> &[Arc<DatabaseGroup>] {
        &self.groups
    }

    fn table(&self, table: &str, cluster: &str) -> Result<&LogicalTable, RouterError> {
        self.table_index
            .get(&TableKey::new(table, cluster))
            .map(|&index| &self.tables[index])
            .ok_or(RouterError::TableNotFound)
    }

    fn category_of(&self, table: &LogicalTable, category: Option<usize>) -> Result<&RangeCategory, RouterError> {
        category
            .map(|index| &self.categories[index])
            .ok_or_else(|| RouterError::UnknownCategory(table.database_category.clone()))
    }

    /// Resolve `(table, cluster, key)` and rewrite `sql` for the physical table.
    pub fn resolve(&self, table: &str, cluster: &str, key: i64, sql: &str) -> Result<Route, RouterError> {
        let logical = self.table(table, cluster)?;
        let (target, suffix) = match &logical.policy {
            TablePolicy::Hash { count, shards } => {
                let index = hash_shard_index(key, *count);
                let target = shards
                    .get(index as usize)
                    .and_then(Option::as_ref)
                    .ok_or_else(|| RouterError::UnassignedShard {
                        table: table.to_string(),
                        number: index,
                    })?;
                let suffix = if *count > 1 {
                    format!("_{index}")
                } else {
                    String::new()
                };
                (target, suffix)
            }
            TablePolicy::Range {
                category,
                span,
                secondary_span,
            } => {
                if key < 0 {
                    return Err(RouterError::InvalidShardKey(key));
                }
                let category = self.category_of(logical, *category)?;
                let slot_index = range_slot_index(key, *span);
                let slot = category.slots.get(slot_index as usize).ok_or(
                    RouterError::ShardIndexOutOfRange {
                        index: slot_index,
                        slots: category.slots.len(),
                    },
                )?;
                let suffix = match secondary_span {
                    Some(secondary) => {
                        (secondary_bucket(key, slot_index, *span, *secondary) + self.number_base)
                            .to_string()
                    }
                    None => String::new(),
                };
                (slot.target_for(key), suffix)
            }
        };

        let sql = add_table_suffix(sql, table, &suffix)?;
        Ok(Route {
            group: Arc::clone(&self.groups[target.group]),
            database: target.database.clone(),
            sql,
        })
    }

    /// Route one statement and enqueue it.
    ///
    /// Reads spread over every member of a replicated group unless `master`
    /// is set. Returns `false` when the task was answered with an error or
    /// no worker accepted the wake-up; the reply is always answered.
    pub fn query(&self, target: &QueryTarget<'_>, key: i64, master: bool, reply: Reply) -> bool {
        let route = match self.resolve(target.table, target.cluster, key, target.sql) {
            Ok(route) => route,
            Err(e) => {
                error!(
                    "[dbp] Cannot route table {} cluster '{}' key {}: {:?} ({})",
                    target.table, target.cluster, key, e, e
                );
                Box::new(QueryTask::new("", target.sql, Vec::new(), reply))
                    .fail(RouterError::TargetNotFound);
                return false;
            }
        };

        debug!(
            "[dbp] Routed key {} to {} on {}",
            key,
            route.database,
            route.group.master().endpoint()
        );
        let group = route.group;
        let task: TaskBox = Box::new(QueryTask::new(
            route.database,
            route.sql,
            target.params.to_vec(),
            reply,
        ));

        let members = group.member_count();
        if !master && members > 1 {
            if let Err(task) = group
                .queue()
                .try_push(task, Lane::Read, self.limits.max_read_queue)
            {
                self.reject_busy(&group, Lane::Read);
                task.fail(RouterError::ServerBusy);
                return false;
            }
            let start = self.read_cursor.fetch_add(1, Ordering::Relaxed);
            (0..members).any(|offset| group.wake_member((start + offset) % members))
        } else {
            if let Err(task) = group
                .queue()
                .try_push(task, Lane::Write, self.limits.max_write_queue)
            {
                self.reject_busy(&group, Lane::Write);
                task.fail(RouterError::ServerBusy);
                return false;
            }
            group.wake_master()
        }
    }

    fn reject_busy(&self, group: &DatabaseGroup, lane: Lane) {
        warn!(
            "[dbp] {:?} queue of {} is full",
            lane,
            group.master().endpoint()
        );
        metrics::record_rejection(ErrorCode::ServerBusy);
    }

    /// Route every statement of a transaction and enqueue it on the master.
    ///
    /// All statements must land on the same group and physical database.
    pub fn transaction(&self, target: &TransactionTarget<'_>, channel: Arc<AnswerChannel>) -> bool {
        let mut routed = Vec::with_capacity(target.sqls.len());
        let mut anchor: Option<(Arc<DatabaseGroup>, String)> = None;

        for (index, sql) in target.sqls.iter().enumerate() {
            let (Some(table), Some(&key)) = (target.tables.get(index), target.keys.get(index)) else {
                channel.send(Err(TransactionTask::rejection(
                    ErrorCode::InvalidParameters,
                    index,
                    sql,
                    "Invalid parameters.",
                )));
                return false;
            };
            let route = match self.resolve(table, target.cluster, key, sql) {
                Ok(route) => route,
                Err(e) => {
                    error!("[dbp] Transaction statement {} not routable: {:?} ({})", index, e, e);
                    channel.send(Err(TransactionTask::rejection(
                        ErrorCode::TableNotFound,
                        index,
                        sql,
                        "Target database or table not found.",
                    )));
                    return false;
                }
            };
            match &anchor {
                Some((group, database))
                    if !Arc::ptr_eq(group, &route.group) || *database != route.database =>
                {
                    channel.send(Err(TransactionTask::rejection(
                        ErrorCode::Disabled,
                        index,
                        sql,
                        "Target database or database instance is different from previous.",
                    )));
                    return false;
                }
                Some(_) => {}
                None => anchor = Some((Arc::clone(&route.group), route.database.clone())),
            }
            routed.push(route.sql);
        }

        let Some((group, database)) = anchor else {
            channel.send(Err(RouterError::InvalidParameters.into()));
            return false;
        };

        let task: TaskBox = Box::new(TransactionTask::new(database, routed, channel));
        if let Err(task) = group
            .queue()
            .try_push(task, Lane::Write, self.limits.max_write_queue)
        {
            self.reject_busy(&group, Lane::Write);
            task.fail(RouterError::ServerBusy);
            return false;
        }
        group.wake_master()
    }

    /// Split type of a logical table.
    pub fn split_type(&self, table: &str, cluster: &str) -> Option<SplitType> {
        self.table(table, cluster).ok().map(|logical| match logical.policy {
            TablePolicy::Hash { .. } => SplitType::Hash,
            TablePolicy::Range { .. } => SplitType::Range,
        })
    }

    /// Split layout of a logical table.
    pub fn split_info(&self, table: &str, cluster: &str) -> Result<SplitInfo, RouterError> {
        let logical = self.table(table, cluster)?;
        Ok(match &logical.policy {
            TablePolicy::Hash { count, .. } => SplitInfo::Hash {
                table_count: *count,
                split_hint: logical.split_hint.clone(),
            },
            TablePolicy::Range {
                category,
                span,
                secondary_span,
            } => SplitInfo::Range {
                span: *span,
                count: category.map_or(0, |index| self.categories[index].slots.len()),
                database_category: logical.database_category.clone(),
                split_hint: logical.split_hint.clone(),
                secondary_split: secondary_span.is_some(),
                secondary_span: secondary_span.unwrap_or(0),
            },
        })
    }

    /// Slot layout of a range category.
    pub fn category_info(&self, category: &str, cluster: &str) -> Result<CategoryInfo, RouterError> {
        let index = self
            .category_index
            .get(&CategoryKey::new(category, cluster))
            .ok_or_else(|| RouterError::UnknownCategory(category.to_string()))?;
        let slots = &self.categories[*index].slots;
        Ok(CategoryInfo {
            split_count: slots.len(),
            odd_even_indexes: slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.is_paired())
                .map(|(i, _)| i as i64)
                .collect(),
        })
    }

    /// Group `keys` by the canonical key of the physical table they hit.
    ///
    /// Resolving a canonical key reaches the same physical table as every
    /// original key recorded under it.
    pub fn reform_shard_keys(&self, table: &str, cluster: &str, keys: &[i64]) -> Result<ReformedKeys, RouterError> {
        let logical = self.table(table, cluster)?;
        let mut reformed = ReformedKeys::default();

        match &logical.policy {
            TablePolicy::Hash { count, .. } => {
                for &key in keys {
                    if key < 0 && self.negative_keys == NegativeKeyPolicy::RejectAll {
                        reformed.invalid.insert(key);
                        continue;
                    }
                    reformed
                        .pairs
                        .entry(hash_shard_index(key, *count))
                        .or_default()
                        .insert(key);
                }
            }
            TablePolicy::Range {
                category,
                span,
                secondary_span,
            } => {
                let category = self.category_of(logical, *category)?;
                for &key in keys {
                    if key < 0 {
                        reformed.invalid.insert(key);
                        continue;
                    }
                    let slot_index = range_slot_index(key, *span);
                    let Some(slot) = category.slots.get(slot_index as usize) else {
                        reformed.invalid.insert(key);
                        continue;
                    };
                    let amend = match secondary_span {
                        Some(secondary) => {
                            secondary_bucket(key, slot_index, *span, *secondary) * secondary
                        }
                        None => 0,
                    };
                    let canonical = preserve_parity(key, slot_index * span + amend, slot.is_paired());
                    reformed.pairs.entry(canonical).or_default().insert(key);
                }
            }
        }
        Ok(reformed)
    }

    /// One canonical key per physical table of a logical table.
    pub fn all_shard_keys(&self, table: &str, cluster: &str) -> Result<BTreeSet<i64>, RouterError> {
        let logical = self.table(table, cluster)?;
        let mut keys = BTreeSet::new();

        match &logical.policy {
            TablePolicy::Hash { count, .. } => keys.extend(0..(*count).max(1)),
            TablePolicy::Range {
                category,
                span,
                secondary_span,
            } => {
                let category = self.category_of(logical, *category)?;
                if *span == 0 {
                    keys.insert(0);
                    if category.slots.first().is_some_and(RangeSlot::is_paired) {
                        keys.insert(1);
                    }
                    return Ok(keys);
                }
                for (index, slot) in category.slots.iter().enumerate() {
                    let base = index as i64 * span;
                    let firsts: Vec<i64> = match secondary_span {
                        Some(secondary) => (0..secondary_bucket_count(*span, *secondary))
                            .map(|bucket| base + bucket * secondary)
                            .collect(),
                        None => vec![base],
                    };
                    for first in firsts {
                        keys.insert(first);
                        if slot.is_paired() {
                            keys.insert(first + 1);
                        }
                    }
                }
            }
        }
        Ok(keys)
    }

    /// Mark every group the newer map reuses; those are never drained here.
    pub fn sign_taken_over(&self, newer: &ShardMap) {
        for (group, flag) in self.groups.iter().zip(&self.taken_over) {
            if newer.groups.iter().any(|g| Arc::ptr_eq(g, group)) {
                flag.store(true, Ordering::Release);
            }
        }
    }

    /// Every group not taken over is idle.
    pub fn deletable(&self) -> bool {
        self.groups
            .iter()
            .zip(&self.taken_over)
            .all(|(group, taken)| taken.load(Ordering::Acquire) || group.is_idle())
    }

    pub(crate) fn reusable_groups(&self) -> HashMap<GroupIdentity, Arc<DatabaseGroup>> {
        self.groups
            .iter()
            .map(|group| (group.identity().clone(), Arc::clone(group)))
            .collect()
    }

    /// Status snapshot.
    pub fn status(&self) -> Value {
        json!({
            "configUpdateTime": self.update_time,
            "tableCount": self.tables.len(),
            "dbGroupInfos": self.groups.iter().map(|g| g.status()).collect::<Vec<_>>(),
        })
    }
}

impl std::fmt::Debug for ShardMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardMap")
            .field("update_time", &self.update_time)
            .field("tables", &self.tables.len())
            .field("categories", &self.categories.len())
            .field("groups", &self.groups.len())
            .finish()
    }
}
