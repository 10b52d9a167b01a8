//! # Domain Entities
//!
//! Flat configuration rows as read from the configuration store, plus the
//! snapshot that groups them for one shard map build.

use serde::{Deserialize, Serialize};

use super::value_objects::{ConnectionIdentity, IndexType, SplitType};

/// One physical database instance (`server_info`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRow {
    /// Server id.
    pub server_id: i64,
    /// Master server id, `0` for masters.
    pub master_id: i64,
    /// Host name.
    pub host: String,
    /// Port.
    pub port: u16,
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Connect timeout in seconds.
    pub timeout_secs: u64,
    /// Database selected after connect.
    #[serde(default)]
    pub default_database: String,
}

impl ServerRow {
    /// True for group roots.
    pub fn is_master(&self) -> bool {
        self.master_id == 0
    }

    /// `host:port` label.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connection identity used for group reuse.
    pub fn identity(&self) -> ConnectionIdentity {
        ConnectionIdentity {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// One logical table definition (`table_info`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    /// Table name.
    pub table_name: String,
    /// Cluster scope.
    #[serde(default)]
    pub cluster: String,
    /// Hash or range.
    pub split_type: SplitType,
    /// Range span, `-1` inherits the global default.
    #[serde(default)]
    pub range_span: i64,
    /// Range category.
    #[serde(default)]
    pub database_category: String,
    /// Secondary split enabled.
    #[serde(default)]
    pub secondary_split: bool,
    /// Secondary split span.
    #[serde(default)]
    pub secondary_span: i64,
    /// Hash table count, `0` means one.
    #[serde(default)]
    pub table_count: i64,
    /// Column the client uses as shard key (informational).
    #[serde(default)]
    pub hint_field: String,
}

impl TableRow {
    /// Hash split table row.
    pub fn hash(table_name: impl Into<String>, table_count: i64) -> Self {
        Self {
            table_name: table_name.into(),
            cluster: String::new(),
            split_type: SplitType::Hash,
            range_span: 0,
            database_category: String::new(),
            secondary_split: false,
            secondary_span: 0,
            table_count,
            hint_field: String::new(),
        }
    }

    /// Range split table row.
    pub fn range(
        table_name: impl Into<String>,
        database_category: impl Into<String>,
        range_span: i64,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            cluster: String::new(),
            split_type: SplitType::Range,
            range_span,
            database_category: database_category.into(),
            secondary_split: false,
            secondary_span: 0,
            table_count: 0,
            hint_field: String::new(),
        }
    }

    /// Enable secondary splitting.
    pub fn with_secondary(mut self, secondary_span: i64) -> Self {
        self.secondary_split = true;
        self.secondary_span = secondary_span;
        self
    }

    /// Set the cluster scope.
    pub fn in_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = cluster.into();
        self
    }
}

/// Hash shard assignment (`split_table_info`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSplitRow {
    /// Table name.
    pub table_name: String,
    /// Cluster scope.
    #[serde(default)]
    pub cluster: String,
    /// Shard number.
    pub table_number: i64,
    /// Master server id.
    pub server_id: i64,
    /// Physical database name.
    pub database_name: String,
}

/// Range slot assignment (`split_range_info`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSplitRow {
    /// Range category.
    pub database_category: String,
    /// Cluster scope.
    #[serde(default)]
    pub cluster: String,
    /// Slot index.
    pub split_index: i64,
    /// Raw index type (0 single, 1 odd, 2 even).
    pub index_type: i64,
    /// Physical database name.
    pub database_name: String,
    /// Master server id.
    pub server_id: i64,
}

impl RangeSplitRow {
    /// Parsed index type.
    pub fn parsed_index_type(&self) -> Option<IndexType> {
        IndexType::from_raw(self.index_type)
    }
}

/// Scalar settings (`variable_setting`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Config update timestamp (unix seconds).
    pub update_time: i64,
    /// Span used by range tables declared with `-1`.
    pub default_split_span: i64,
    /// Added to secondary bucket indexes to form suffixes.
    pub secondary_number_base: i64,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            update_time: 1,
            default_split_span: 1_000_000,
            secondary_number_base: 0,
        }
    }
}

/// All rows needed for one build.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Scalar settings.
    pub settings: GlobalSettings,
    /// Server rows.
    pub servers: Vec<ServerRow>,
    /// Table rows.
    pub tables: Vec<TableRow>,
    /// Hash assignments.
    pub table_splits: Vec<TableSplitRow>,
    /// Range assignments.
    pub range_splits: Vec<RangeSplitRow>,
}
