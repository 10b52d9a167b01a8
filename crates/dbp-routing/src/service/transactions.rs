//! Multi-statement transactions pinned to one database.

use std::sync::Arc;

use super::DataRouter;
use crate::algorithms::{extract_sql, hash_string_key};
use crate::domain::{ErrorCode, RouterError};
use crate::metrics;
use crate::ports::TransactionRequest;
use crate::shard_map::TransactionTarget;
use crate::task::{AnswerChannel, TransactionTask};

impl DataRouter {
    pub(super) fn run_transaction(&self, request: TransactionRequest<i64>, channel: Arc<AnswerChannel>) {
        let TransactionRequest {
            hint_ids,
            table_names,
            cluster,
            sqls,
        } = request;

        if sqls.is_empty() || hint_ids.len() != sqls.len() || table_names.len() != sqls.len() {
            return Self::answer_error(
                &channel,
                &RouterError::Disabled("Invalid transaction. Parameters cannot matched.".to_string()),
            );
        }

        let mut statements = Vec::with_capacity(sqls.len());
        for (index, sql) in sqls.iter().enumerate() {
            let statement = extract_sql(sql);
            if self.classifier.classify(statement).is_err() {
                metrics::record_rejection(ErrorCode::Disabled);
                channel.send(Err(TransactionTask::rejection(
                    ErrorCode::Disabled,
                    index,
                    statement,
                    "Invalid statement.",
                )));
                return;
            }
            statements.push(statement.to_string());
        }

        let map = match self.shard_map() {
            Ok(map) => map,
            Err(e) => return Self::answer_error(&channel, &e),
        };
        let target = TransactionTarget {
            keys: &hint_ids,
            tables: &table_names,
            cluster: &cluster,
            sqls: &statements,
        };
        map.transaction(&target, channel);
    }

    /// String keys are hashed; every table must be hash split.
    pub(super) fn run_string_transaction(
        &self,
        request: TransactionRequest<String>,
        channel: Arc<AnswerChannel>,
    ) {
        let TransactionRequest {
            hint_ids,
            table_names,
            cluster,
            sqls,
        } = request;

        if !table_names.is_empty() {
            let map = match self.shard_map() {
                Ok(map) => map,
                Err(e) => return Self::answer_error(&channel, &e),
            };
            for table in &table_names {
                if let Err(e) = Self::ensure_hash_table(&map, table, &cluster) {
                    return Self::answer_error(&channel, &e);
                }
            }
        }

        let hint_ids = hint_ids.iter().map(|key| hash_string_key(key)).collect();
        self.run_transaction(
            TransactionRequest {
                hint_ids,
                table_names,
                cluster,
                sqls,
            },
            channel,
        );
    }
}
