//! # Inbound Ports
//!
//! Request-shaped API of the router as seen by a transport shim. Request
//! types deserialize from the camelCase JSON arguments of each method.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::{Answer, AnswerChannel};

/// `query`: one statement on one shard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Shard key.
    pub hint_id: i64,
    /// Logical table; taken from the statement when absent.
    #[serde(default)]
    pub table_name: Option<String>,
    /// Cluster scope.
    #[serde(default)]
    pub cluster: String,
    /// Statement.
    pub sql: String,
    /// Read from the master.
    #[serde(default)]
    pub master: bool,
    /// Placeholder values.
    #[serde(default)]
    pub params: Vec<String>,
}

/// `iQuery` / `sQuery`: one statement over several shards.
///
/// No key fans out to every shard; one key behaves like `query`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiQueryRequest<K> {
    /// Shard keys.
    #[serde(default = "Vec::new")]
    pub hint_ids: Vec<K>,
    /// Logical table; taken from the statement when absent.
    #[serde(default)]
    pub table_name: Option<String>,
    /// Cluster scope.
    #[serde(default)]
    pub cluster: String,
    /// Statement.
    pub sql: String,
    /// Read from the master.
    #[serde(default)]
    pub master: bool,
    /// Placeholder values.
    #[serde(default)]
    pub params: Vec<String>,
}

/// `splitInfo` / `allSplitHintIds`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRequest {
    /// Logical table.
    pub table_name: String,
    /// Cluster scope.
    #[serde(default)]
    pub cluster: String,
}

/// `categoryInfo`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRequest {
    /// Range category.
    pub database_category: String,
    /// Cluster scope.
    #[serde(default)]
    pub cluster: String,
}

/// `reformHintIds`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReformRequest {
    /// Logical table.
    pub table_name: String,
    /// Cluster scope.
    #[serde(default)]
    pub cluster: String,
    /// Keys to group.
    pub hint_ids: Vec<i64>,
}

/// `transaction` / `sTransaction`; the three lists are index-aligned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest<K> {
    /// Shard keys.
    pub hint_ids: Vec<K>,
    /// Logical tables.
    pub table_names: Vec<String>,
    /// Cluster scope.
    #[serde(default)]
    pub cluster: String,
    /// Statements.
    pub sqls: Vec<String>,
}

/// Router API - inbound port.
///
/// Statement methods answer through `channel`, possibly from a worker
/// thread; metadata methods answer directly.
pub trait RouterApi: Send + Sync {
    /// Single-shard statement.
    fn query(&self, request: QueryRequest, channel: Arc<AnswerChannel>);

    /// Statement over integer shard keys.
    fn i_query(&self, request: MultiQueryRequest<i64>, channel: Arc<AnswerChannel>);

    /// Statement over string shard keys, hash tables only.
    fn s_query(&self, request: MultiQueryRequest<String>, channel: Arc<AnswerChannel>);

    /// Split layout of a table.
    fn split_info(&self, request: TableRequest) -> Answer;

    /// Slot layout of a range category.
    fn category_info(&self, request: CategoryRequest) -> Answer;

    /// Group keys by physical table.
    fn reform_hint_ids(&self, request: ReformRequest) -> Answer;

    /// One key per physical table.
    fn all_split_hint_ids(&self, request: TableRequest) -> Answer;

    /// Atomic statements on one physical database.
    fn transaction(&self, request: TransactionRequest<i64>, channel: Arc<AnswerChannel>);

    /// Transaction keyed by strings, hash tables only.
    fn s_transaction(&self, request: TransactionRequest<String>, channel: Arc<AnswerChannel>);

    /// Rebuild the shard map on the next watcher tick.
    fn refresh(&self) -> Answer;

    /// Status snapshot.
    fn infos(&self) -> Value;

    /// Decode `args` for `method` and run it.
    fn dispatch(&self, method: &str, args: Value, channel: Arc<AnswerChannel>);
}
