//! # Shard Map Builder
//!
//! Turns configuration rows into a [`ShardMap`]. Validation runs in stages;
//! each stage collects every issue it finds and the build stops at the first
//! stage with issues. Groups whose identity matches one in the previous map
//! are reused, so their queues and pools survive the swap.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Arc;

use tracing::{info, warn};

use super::group::DatabaseGroup;
use super::map::{LogicalTable, RangeCategory, RangeSlot, ShardMap, ShardTarget, TablePolicy};
use crate::domain::{
    BuildError, BuildIssue, BuildStage, CategoryKey, ConfigSnapshot, GlobalSettings,
    GroupIdentity, IndexType, RangeSplitRow, RouterConfig, ServerRow, SplitType, TableKey,
    TableRow, TableSplitRow,
};
use crate::ports::DriverFactory;

fn check(stage: BuildStage, issues: Vec<BuildIssue>) -> Result<(), BuildError> {
    if issues.is_empty() {
        Ok(())
    } else {
        Err(BuildError::Rejected { stage, issues })
    }
}

/// Group before activation; only used groups get pools.
struct PendingGroup {
    master: ServerRow,
    replicas: Vec<ServerRow>,
    used: bool,
}

#[derive(Default)]
struct SlotDraft {
    single: Option<ShardTarget>,
    odd: Option<ShardTarget>,
    even: Option<ShardTarget>,
}

/// Collects configuration rows and builds a [`ShardMap`].
pub struct ShardMapBuilder {
    settings: GlobalSettings,
    config: RouterConfig,
    factory: Arc<dyn DriverFactory>,
    servers: Vec<ServerRow>,
    tables: Vec<TableRow>,
    table_splits: Vec<TableSplitRow>,
    range_splits: Vec<RangeSplitRow>,
}

impl ShardMapBuilder {
    /// Empty builder.
    pub fn new(settings: GlobalSettings, config: &RouterConfig, factory: Arc<dyn DriverFactory>) -> Self {
        Self {
            settings,
            config: config.clone(),
            factory,
            servers: Vec::new(),
            tables: Vec::new(),
            table_splits: Vec::new(),
            range_splits: Vec::new(),
        }
    }

    /// Builder loaded with a whole snapshot.
    pub fn from_snapshot(
        snapshot: ConfigSnapshot,
        config: &RouterConfig,
        factory: Arc<dyn DriverFactory>,
    ) -> Self {
        let mut builder = Self::new(snapshot.settings, config, factory);
        builder.servers = snapshot.servers;
        builder.tables = snapshot.tables;
        builder.table_splits = snapshot.table_splits;
        builder.range_splits = snapshot.range_splits;
        builder
    }

    /// Add a server row.
    pub fn add_server(&mut self, row: ServerRow) -> &mut Self {
        self.servers.push(row);
        self
    }

    /// Add a table row.
    pub fn add_table(&mut self, row: TableRow) -> &mut Self {
        self.tables.push(row);
        self
    }

    /// Add a hash shard assignment.
    pub fn add_table_split(&mut self, row: TableSplitRow) -> &mut Self {
        self.table_splits.push(row);
        self
    }

    /// Add a range slot assignment.
    pub fn add_range_split(&mut self, row: RangeSplitRow) -> &mut Self {
        self.range_splits.push(row);
        self
    }

    /// Validate, form groups, reuse groups of `previous` and start pools.
    pub fn build(self, previous: Option<&ShardMap>) -> Result<ShardMap, BuildError> {
        self.check_inputs()?;
        let (mut pending, group_of_master) = self.form_groups()?;
        let (mut tables, table_index) = self.build_tables()?;
        self.assign_table_splits(&mut tables, &table_index, &group_of_master, &mut pending)?;
        let (mut categories, category_index) =
            self.build_categories(&group_of_master, &mut pending)?;

        for (key, &index) in &table_index {
            let category_key =
                CategoryKey::new(tables[index].database_category.clone(), key.cluster.clone());
            if let TablePolicy::Range { category, .. } = &mut tables[index].policy {
                *category = category_index.get(&category_key).copied();
                if category.is_none() {
                    warn!(
                        "[dbp] Range table {} references unknown category {}",
                        key.name, category_key.name
                    );
                }
            }
        }

        let (groups, remap, reused) = self.activate(pending, previous);
        for table in &mut tables {
            if let TablePolicy::Hash { shards, .. } = &mut table.policy {
                for target in shards.iter_mut().flatten() {
                    target.group = remap[target.group];
                }
            }
        }
        for category in &mut categories {
            for slot in &mut category.slots {
                for target in slot.targets_mut() {
                    target.group = remap[target.group];
                }
            }
        }

        info!(
            "[dbp] Shard map built: update time {}, {} tables, {} categories, {} groups ({} reused)",
            self.settings.update_time,
            tables.len(),
            categories.len(),
            groups.len(),
            reused
        );

        let taken_over = groups.iter().map(|_| AtomicBool::new(false)).collect();
        Ok(ShardMap {
            update_time: self.settings.update_time,
            number_base: self.settings.secondary_number_base,
            tables,
            table_index,
            categories,
            category_index,
            groups,
            taken_over,
            read_cursor: AtomicUsize::new(0),
            limits: self.config.limits.clone(),
            negative_keys: self.config.negative_keys,
        })
    }

    fn check_inputs(&self) -> Result<(), BuildError> {
        let mut issues = Vec::new();
        if self.servers.is_empty() {
            issues.push(BuildIssue::NoServers);
        }
        if self.tables.is_empty() {
            issues.push(BuildIssue::NoTables);
        }
        if self.table_splits.is_empty() && self.range_splits.is_empty() {
            issues.push(BuildIssue::NoSplits);
        }
        if self.settings.secondary_number_base < 0 {
            issues.push(BuildIssue::InvalidSetting {
                name: "secondary_number_base".to_string(),
                value: self.settings.secondary_number_base.to_string(),
            });
        }
        check(BuildStage::Inputs, issues)
    }

    fn form_groups(&self) -> Result<(Vec<PendingGroup>, HashMap<i64, usize>), BuildError> {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.server_id) {
                issues.push(BuildIssue::DuplicateServer(server.server_id));
            }
        }

        let mut pending = Vec::new();
        let mut group_of_master = HashMap::new();
        for server in self.servers.iter().filter(|s| s.is_master()) {
            if group_of_master.contains_key(&server.server_id) {
                continue;
            }
            group_of_master.insert(server.server_id, pending.len());
            pending.push(PendingGroup {
                master: server.clone(),
                replicas: Vec::new(),
                used: false,
            });
        }
        for server in self.servers.iter().filter(|s| !s.is_master()) {
            match group_of_master.get(&server.master_id) {
                Some(&index) => pending[index].replicas.push(server.clone()),
                None => issues.push(BuildIssue::MissingMaster {
                    server_id: server.server_id,
                    master_id: server.master_id,
                }),
            }
        }

        check(BuildStage::Servers, issues)?;
        Ok((pending, group_of_master))
    }

    fn build_tables(&self) -> Result<(Vec<LogicalTable>, HashMap<TableKey, usize>), BuildError> {
        let mut issues = Vec::new();
        let mut tables = Vec::new();
        let mut table_index = HashMap::new();

        for row in &self.tables {
            let key = TableKey::new(row.table_name.clone(), row.cluster.clone());
            if table_index.contains_key(&key) {
                issues.push(BuildIssue::DuplicateTable(row.table_name.clone()));
                continue;
            }
            let policy = match row.split_type {
                SplitType::Hash => {
                    if row.table_count < 0 {
                        issues.push(BuildIssue::InvalidTableCount(row.table_name.clone()));
                        continue;
                    }
                    let count = row.table_count.max(1);
                    TablePolicy::Hash {
                        count,
                        shards: vec![None; count as usize],
                    }
                }
                SplitType::Range => {
                    let span = if row.range_span < 0 {
                        self.settings.default_split_span
                    } else {
                        row.range_span
                    };
                    if span < 0 || (row.range_span < 0 && span == 0) {
                        issues.push(BuildIssue::InvalidSplitSpan(row.table_name.clone()));
                        continue;
                    }
                    let secondary_span = if !row.secondary_split {
                        None
                    } else if row.secondary_span <= 0 {
                        issues.push(BuildIssue::InvalidSecondarySpan(row.table_name.clone()));
                        continue;
                    } else if span == 0 {
                        warn!(
                            "[dbp] Table {} is not range split, secondary split ignored",
                            row.table_name
                        );
                        None
                    } else {
                        Some(row.secondary_span)
                    };
                    TablePolicy::Range {
                        category: None,
                        span,
                        secondary_span,
                    }
                }
            };
            table_index.insert(key, tables.len());
            tables.push(LogicalTable {
                database_category: row.database_category.clone(),
                split_hint: row.hint_field.clone(),
                policy,
            });
        }

        check(BuildStage::Tables, issues)?;
        Ok((tables, table_index))
    }

    fn assign_table_splits(
        &self,
        tables: &mut [LogicalTable],
        table_index: &HashMap<TableKey, usize>,
        group_of_master: &HashMap<i64, usize>,
        pending: &mut [PendingGroup],
    ) -> Result<(), BuildError> {
        let mut issues = Vec::new();

        for row in &self.table_splits {
            let key = TableKey::new(row.table_name.clone(), row.cluster.clone());
            let Some(&index) = table_index.get(&key) else {
                warn!("[dbp] Split row for unknown table {} skipped", row.table_name);
                continue;
            };
            let TablePolicy::Hash { count, shards } = &mut tables[index].policy else {
                warn!("[dbp] Split row for range table {} skipped", row.table_name);
                continue;
            };
            let Some(&group) = group_of_master.get(&row.server_id) else {
                issues.push(BuildIssue::UnknownServer {
                    context: format!("table split {}#{}", row.table_name, row.table_number),
                    server_id: row.server_id,
                });
                continue;
            };
            if row.table_number < 0 || row.table_number >= *count {
                warn!(
                    "[dbp] Split row {}#{} outside table count {} skipped",
                    row.table_name, row.table_number, count
                );
                continue;
            }
            let shard = &mut shards[row.table_number as usize];
            if shard.is_some() {
                issues.push(BuildIssue::DuplicateTableSplit {
                    table: row.table_name.clone(),
                    number: row.table_number,
                });
                continue;
            }
            *shard = Some(ShardTarget {
                group,
                database: row.database_name.clone(),
            });
            pending[group].used = true;
        }

        let mut unassigned: Vec<(&str, i64)> = Vec::new();
        for (key, &index) in table_index {
            if let TablePolicy::Hash { shards, .. } = &tables[index].policy {
                unassigned.extend(
                    shards
                        .iter()
                        .enumerate()
                        .filter(|(_, shard)| shard.is_none())
                        .map(|(number, _)| (key.name.as_str(), number as i64)),
                );
            }
        }
        unassigned.sort_unstable();
        issues.extend(unassigned.into_iter().map(|(table, number)| {
            BuildIssue::UnassignedTableSplit {
                table: table.to_string(),
                number,
            }
        }));

        check(BuildStage::TableSplits, issues)
    }

    fn build_categories(
        &self,
        group_of_master: &HashMap<i64, usize>,
        pending: &mut [PendingGroup],
    ) -> Result<(Vec<RangeCategory>, HashMap<CategoryKey, usize>), BuildError> {
        let mut issues = Vec::new();
        let mut drafts: BTreeMap<CategoryKey, BTreeMap<i64, SlotDraft>> = BTreeMap::new();

        for row in &self.range_splits {
            let category = &row.database_category;
            let index = row.split_index;
            let Some(index_type) = row.parsed_index_type().filter(|_| index >= 0) else {
                issues.push(BuildIssue::InvalidIndexType {
                    category: category.clone(),
                    index,
                    index_type: row.index_type,
                });
                continue;
            };
            let Some(&group) = group_of_master.get(&row.server_id) else {
                issues.push(BuildIssue::UnknownServer {
                    context: format!("range split {category}#{index}"),
                    server_id: row.server_id,
                });
                continue;
            };

            let draft = drafts
                .entry(CategoryKey::new(category.clone(), row.cluster.clone()))
                .or_default()
                .entry(index)
                .or_default();
            let (side, clash) = match index_type {
                IndexType::Single => (&mut draft.single, draft.odd.is_some() || draft.even.is_some()),
                IndexType::Odd => (&mut draft.odd, draft.single.is_some()),
                IndexType::Even => (&mut draft.even, draft.single.is_some()),
            };
            let reason = if clash {
                Some("single and odd/even rows for one slot")
            } else if side.is_some() {
                Some("slot assigned twice")
            } else {
                None
            };
            if let Some(reason) = reason {
                issues.push(BuildIssue::RangeConflict {
                    category: category.clone(),
                    index,
                    reason: reason.to_string(),
                });
                continue;
            }
            *side = Some(ShardTarget {
                group,
                database: row.database_name.clone(),
            });
            pending[group].used = true;
        }

        let mut categories = Vec::new();
        let mut category_index = HashMap::new();
        for (key, mut slots) in drafts {
            let last = slots.keys().next_back().copied().unwrap_or(-1);
            let mut built = Vec::with_capacity((last + 1) as usize);
            let mut has_single = false;
            let mut has_paired = false;
            for index in 0..=last {
                let draft = slots.remove(&index).unwrap_or_default();
                match draft {
                    SlotDraft {
                        single: Some(target),
                        ..
                    } => {
                        has_single = true;
                        built.push(RangeSlot::Single(target));
                    }
                    SlotDraft {
                        odd: Some(odd),
                        even: Some(even),
                        ..
                    } => {
                        has_paired = true;
                        built.push(RangeSlot::Paired { odd, even });
                    }
                    _ => issues.push(BuildIssue::RangeGap {
                        category: key.name.clone(),
                        index,
                    }),
                }
            }
            if has_single && has_paired {
                issues.push(BuildIssue::MixedParity(key.name.clone()));
            }
            category_index.insert(key, categories.len());
            categories.push(RangeCategory { slots: built });
        }

        check(BuildStage::RangeSplits, issues)?;
        Ok((categories, category_index))
    }

    /// Returns the groups, the pending-to-final index map and the reuse count.
    fn activate(
        &self,
        pending: Vec<PendingGroup>,
        previous: Option<&ShardMap>,
    ) -> (Vec<Arc<DatabaseGroup>>, Vec<usize>, usize) {
        let mut reusable = previous.map(ShardMap::reusable_groups).unwrap_or_default();
        let mut groups: Vec<Arc<DatabaseGroup>> = Vec::new();
        let mut by_identity: HashMap<GroupIdentity, usize> = HashMap::new();
        let mut remap = Vec::with_capacity(pending.len());
        let mut reused = 0;

        for group in pending {
            if !group.used {
                remap.push(usize::MAX);
                continue;
            }
            let identity = GroupIdentity::new(
                group.master.identity(),
                group.replicas.iter().map(ServerRow::identity).collect(),
            );
            if let Some(&index) = by_identity.get(&identity) {
                remap.push(index);
                continue;
            }
            let database_group = match reusable.remove(&identity) {
                Some(existing) => {
                    reused += 1;
                    existing
                }
                None => Arc::new(DatabaseGroup::new(
                    group.master,
                    group.replicas,
                    Arc::clone(&self.factory),
                    &self.config.pool,
                )),
            };
            database_group.activate();
            by_identity.insert(identity, groups.len());
            remap.push(groups.len());
            groups.push(database_group);
        }

        (groups, remap, reused)
    }
}
