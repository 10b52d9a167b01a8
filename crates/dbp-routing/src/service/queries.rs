//! Statement routing: single-shard queries and aggregated fan-outs.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::DataRouter;
use crate::algorithms::{extract_sql, hash_string_key, preassemble};
use crate::domain::RouterError;
use crate::ports::{MultiQueryRequest, QueryRequest};
use crate::shard_map::{QueryTarget, ShardMap};
use crate::task::{AggregatedTask, AnswerChannel, Reply};

/// Statement after placeholder pre-assembly and classification.
struct Prepared {
    sql: String,
    params: Vec<String>,
    table: String,
    master: bool,
}

impl Prepared {
    fn target<'a>(&'a self, cluster: &'a str) -> QueryTarget<'a> {
        QueryTarget {
            table: &self.table,
            cluster,
            sql: &self.sql,
            params: &self.params,
        }
    }

    fn send_direct(&self, map: &ShardMap, cluster: &str, key: i64, channel: &Arc<AnswerChannel>) {
        map.query(
            &self.target(cluster),
            key,
            self.master,
            Reply::Direct(Arc::clone(channel)),
        );
    }

    fn fan_out(&self, map: &ShardMap, cluster: &str, keys: impl IntoIterator<Item = i64>, task: Arc<AggregatedTask>) {
        let target = self.target(cluster);
        for key in keys {
            map.query(
                &target,
                key,
                self.master,
                Reply::Aggregated {
                    task: Arc::clone(&task),
                    shard_id: key,
                },
            );
        }
    }
}

impl DataRouter {
    fn prepare(
        &self,
        sql: &str,
        params: &[String],
        table_name: Option<String>,
        master: bool,
        select_only: bool,
    ) -> Result<Prepared, RouterError> {
        let sql = extract_sql(sql);
        let (sql, params) = if params.is_empty() {
            (sql.to_string(), Vec::new())
        } else {
            let preassembled = preassemble(sql, params)?;
            (preassembled.semisql, preassembled.rest_params)
        };
        let classification = if select_only {
            self.classifier.classify_select(&sql)?
        } else {
            self.classifier.classify(&sql)?
        };
        let table = table_name
            .filter(|name| !name.is_empty())
            .or(classification.table)
            .unwrap_or_default();
        Ok(Prepared {
            sql,
            params,
            table,
            master: master || classification.force_master,
        })
    }

    pub(super) fn run_query(&self, request: QueryRequest, channel: &Arc<AnswerChannel>) -> Result<(), RouterError> {
        let prepared = self.prepare(
            &request.sql,
            &request.params,
            request.table_name,
            request.master,
            false,
        )?;
        let map = self.shard_map()?;
        prepared.send_direct(&map, &request.cluster, request.hint_id, channel);
        Ok(())
    }

    fn run_all_shards<K>(&self, request: MultiQueryRequest<K>, channel: &Arc<AnswerChannel>) -> Result<(), RouterError> {
        let prepared = self.prepare(
            &request.sql,
            &request.params,
            request.table_name,
            request.master,
            true,
        )?;
        let map = self.shard_map()?;
        let keys = map
            .all_shard_keys(&prepared.table, &request.cluster)
            .map_err(|_| RouterError::TableNotFound)?;
        let task = AggregatedTask::for_all_shards(&keys, Arc::clone(channel));
        prepared.fan_out(&map, &request.cluster, keys, task);
        Ok(())
    }

    pub(super) fn run_int_query(
        &self,
        request: MultiQueryRequest<i64>,
        channel: &Arc<AnswerChannel>,
    ) -> Result<(), RouterError> {
        match request.hint_ids.as_slice() {
            [] => self.run_all_shards(request, channel),
            [key] => {
                let prepared = self.prepare(
                    &request.sql,
                    &request.params,
                    request.table_name,
                    request.master,
                    false,
                )?;
                let map = self.shard_map()?;
                prepared.send_direct(&map, &request.cluster, *key, channel);
                Ok(())
            }
            keys => {
                let prepared = self.prepare(
                    &request.sql,
                    &request.params,
                    request.table_name.clone(),
                    request.master,
                    true,
                )?;
                let map = self.shard_map()?;
                let reformed = map
                    .reform_shard_keys(&prepared.table, &request.cluster, keys)
                    .map_err(|_| RouterError::TableNotFound)?;
                let task = AggregatedTask::for_int_keys(&reformed, Arc::clone(channel));
                prepared.fan_out(&map, &request.cluster, reformed.pairs.keys().copied(), task);
                Ok(())
            }
        }
    }

    pub(super) fn run_string_query(
        &self,
        request: MultiQueryRequest<String>,
        channel: &Arc<AnswerChannel>,
    ) -> Result<(), RouterError> {
        match request.hint_ids.as_slice() {
            [] => self.run_all_shards(request, channel),
            [key] => {
                let key = hash_string_key(key);
                let prepared = self.prepare(
                    &request.sql,
                    &request.params,
                    request.table_name,
                    request.master,
                    false,
                )?;
                let map = self.shard_map()?;
                Self::ensure_hash_table(&map, &prepared.table, &request.cluster)?;
                prepared.send_direct(&map, &request.cluster, key, channel);
                Ok(())
            }
            strings => {
                let prepared = self.prepare(
                    &request.sql,
                    &request.params,
                    request.table_name.clone(),
                    request.master,
                    true,
                )?;
                let map = self.shard_map()?;
                Self::ensure_hash_table(&map, &prepared.table, &request.cluster)?;

                let mut originals: HashMap<i64, BTreeSet<String>> = HashMap::new();
                let hashes: Vec<i64> = strings
                    .iter()
                    .map(|value| {
                        let hash = hash_string_key(value);
                        originals.entry(hash).or_default().insert(value.clone());
                        hash
                    })
                    .collect();
                let reformed = map
                    .reform_shard_keys(&prepared.table, &request.cluster, &hashes)
                    .map_err(|_| RouterError::TableNotFound)?;
                let task = AggregatedTask::for_string_keys(&reformed, &originals, Arc::clone(channel));
                prepared.fan_out(&map, &request.cluster, reformed.pairs.keys().copied(), task);
                Ok(())
            }
        }
    }
}
