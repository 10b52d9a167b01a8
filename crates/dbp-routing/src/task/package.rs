//! # Task Packages
//!
//! Units of work executed by pool workers. A task answers exactly once:
//! after processing, on explicit failure, or when dropped unprocessed.

use std::borrow::Cow;
use std::sync::Arc;

use serde_json::json;
use tracing::{error, warn};

use super::aggregation::AggregatedTask;
use super::answer::{AnswerChannel, AnswerError};
use crate::algorithms::assemble;
use crate::domain::{ErrorCode, QueryResult, RouterError};
use crate::pool::WorkerConnection;

/// Work item processed by a pool worker.
pub trait Task: Send {
    /// Execute on the worker's connection and answer.
    fn process(self: Box<Self>, connection: &mut WorkerConnection);

    /// Answer with `error` without executing.
    fn fail(self: Box<Self>, error: RouterError);
}

/// Boxed task as stored in queues.
pub type TaskBox = Box<dyn Task>;

/// Where a query result goes.
#[derive(Clone)]
pub enum Reply {
    /// Straight to the client.
    Direct(Arc<AnswerChannel>),
    /// Into a fan-out, as the result of one canonical shard.
    Aggregated {
        /// Shared coordinator.
        task: Arc<AggregatedTask>,
        /// Canonical shard key.
        shard_id: i64,
    },
}

/// One statement on one database.
pub struct QueryTask {
    database: String,
    sql: String,
    params: Vec<String>,
    reply: Reply,
    finished: bool,
}

impl QueryTask {
    /// `params` fill the quoted placeholders left in `sql`, escaped on the
    /// worker.
    pub fn new(database: impl Into<String>, sql: impl Into<String>, params: Vec<String>, reply: Reply) -> Self {
        Self {
            database: database.into(),
            sql: sql.into(),
            params,
            reply,
            finished: false,
        }
    }

    /// Physical database name.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Routed statement.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    fn execute(&self, connection: &mut WorkerConnection) -> Result<QueryResult, RouterError> {
        let outcome = {
            let driver = connection
                .acquire()
                .map_err(|_| RouterError::ConnectionLost)?;
            let sql = if self.params.is_empty() {
                Cow::Borrowed(self.sql.as_str())
            } else {
                let escaped = driver.escape_strings(&self.params);
                Cow::Owned(assemble(&self.sql, &escaped)?)
            };
            driver.query(&self.database, &sql)
        };
        connection.settle(outcome.as_ref().is_err_and(|e| e.connection_lost));
        outcome.map_err(RouterError::from)
    }

    fn finish(&mut self, outcome: Result<QueryResult, RouterError>) {
        if self.finished {
            return;
        }
        self.finished = true;
        match (&self.reply, outcome) {
            (Reply::Direct(channel), Ok(result)) => {
                channel.send_ok(result.to_json());
            }
            (Reply::Direct(channel), Err(e)) => {
                channel.send_error(&e);
            }
            (Reply::Aggregated { task, shard_id }, Ok(result)) => {
                task.fill_result(*shard_id, result);
            }
            (Reply::Aggregated { shard_id, .. }, Err(e)) => {
                error!(
                    "[dbp] Aggregated task: shard {}, database: {}, sql:[{}] failed: {}",
                    shard_id, self.database, self.sql, e
                );
            }
        }
    }
}

impl Task for QueryTask {
    fn process(mut self: Box<Self>, connection: &mut WorkerConnection) {
        let outcome = self.execute(connection);
        self.finish(outcome);
    }

    fn fail(mut self: Box<Self>, error: RouterError) {
        self.finish(Err(error));
    }
}

impl Drop for QueryTask {
    fn drop(&mut self) {
        if !self.finished {
            warn!("[dbp] Query task on {} dropped unprocessed", self.database);
            self.finish(Err(RouterError::exiting()));
        }
    }
}

/// Several statements run atomically on one database.
pub struct TransactionTask {
    database: String,
    sqls: Vec<String>,
    channel: Arc<AnswerChannel>,
    finished: bool,
}

impl TransactionTask {
    /// Transaction over already routed statements.
    pub fn new(database: impl Into<String>, sqls: Vec<String>, channel: Arc<AnswerChannel>) -> Self {
        Self {
            database: database.into(),
            sqls,
            channel,
            finished: false,
        }
    }

    /// Routed statements.
    pub fn sqls(&self) -> &[String] {
        &self.sqls
    }

    /// Error for a statement refused before execution.
    pub fn rejection(code: ErrorCode, index: usize, sql: &str, reason: &str) -> AnswerError {
        AnswerError::new(
            code,
            format!("Excepted index: {index} Excepted SQL: {sql}. Reason: {reason}"),
        )
    }

    fn finish(&mut self, answer: Result<(), AnswerError>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.channel.send(answer.map(|_| json!({})));
    }
}

impl Task for TransactionTask {
    fn process(mut self: Box<Self>, connection: &mut WorkerConnection) {
        let outcome = match connection.acquire() {
            Ok(driver) => driver.transaction(&self.database, &self.sqls),
            Err(_) => {
                self.finish(Err(AnswerError::from(RouterError::ConnectionLost)));
                return;
            }
        };
        connection.settle(outcome.as_ref().is_err_and(|f| f.error.connection_lost));
        let answer = outcome.map_err(|failure| {
            AnswerError::new(ErrorCode::DriverException, failure.to_string())
        });
        self.finish(answer);
    }

    fn fail(mut self: Box<Self>, error: RouterError) {
        self.finish(Err(AnswerError::from(error)));
    }
}

impl Drop for TransactionTask {
    fn drop(&mut self) {
        if !self.finished {
            warn!("[dbp] Transaction on {} dropped unprocessed", self.database);
            self.finish(Err(AnswerError::from(RouterError::exiting())));
        }
    }
}
