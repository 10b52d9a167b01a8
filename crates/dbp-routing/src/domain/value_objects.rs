//! # Value Objects
//!
//! Immutable values shared by the classifier, the shard map and the
//! answer layer.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Table partitioning scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitType {
    /// `key mod N`.
    Hash,
    /// Contiguous key spans.
    Range,
}

impl SplitType {
    /// Parse the stored integer (0 hash, 1 range).
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(SplitType::Hash),
            1 => Some(SplitType::Range),
            _ => None,
        }
    }
}

/// Range slot sub-assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IndexType {
    /// Whole slot.
    Single,
    /// Odd keys of a paired slot.
    Odd,
    /// Even keys of a paired slot.
    Even,
}

impl IndexType {
    /// Parse the stored integer (0 single, 1 odd, 2 even).
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(IndexType::Single),
            1 => Some(IndexType::Odd),
            2 => Some(IndexType::Even),
            _ => None,
        }
    }
}

/// How negative shard keys are treated by `reform_shard_keys`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeKeyPolicy {
    /// Fold to `|k|` for hash tables, invalid for range tables.
    #[default]
    FoldHash,
    /// Every negative key is invalid.
    RejectAll,
}

/// Everything that makes two connections interchangeable.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionIdentity {
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
}

/// Structural identity of a database group: master plus sorted replicas.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupIdentity {
    master: ConnectionIdentity,
    replicas: Vec<ConnectionIdentity>,
}

impl GroupIdentity {
    /// Build from a master and its replicas in any order.
    pub fn new(master: ConnectionIdentity, mut replicas: Vec<ConnectionIdentity>) -> Self {
        replicas.sort();
        Self { master, replicas }
    }

    /// Master identity.
    pub fn master(&self) -> &ConnectionIdentity {
        &self.master
    }

    /// Replica count.
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }
}

/// Logical table lookup key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableKey {
    /// Table name.
    pub name: String,
    /// Cluster scope.
    pub cluster: String,
}

impl TableKey {
    /// Create a key.
    pub fn new(name: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cluster: cluster.into(),
        }
    }
}

/// Range category lookup key.
pub type CategoryKey = TableKey;

/// Statement verb recognised by the classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// `SELECT`
    Select,
    /// `INSERT`
    Insert,
    /// `UPDATE`
    Update,
    /// `DELETE`
    Delete,
    /// `REPLACE`
    Replace,
    /// `DESC`
    Desc,
    /// `DESCRIBE`
    Describe,
    /// `EXPLAIN`
    Explain,
    /// `SHOW CREATE TABLE` (manager mode)
    ShowCreateTable,
    /// `ALTER` (manager mode)
    Alter,
}

impl StatementKind {
    /// Statement must run on the master.
    pub fn force_master(self) -> bool {
        matches!(
            self,
            StatementKind::Insert
                | StatementKind::Update
                | StatementKind::Delete
                | StatementKind::Replace
                | StatementKind::Alter
        )
    }
}

/// Result of classifying one statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    /// Statement verb.
    pub kind: StatementKind,
    /// Must run on the master.
    pub force_master: bool,
    /// Referenced table, when one was found.
    pub table: Option<String>,
}

/// Split layout of one logical table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SplitInfo {
    /// Hash split.
    Hash {
        /// Physical table count.
        table_count: i64,
        /// Shard key column.
        split_hint: String,
    },
    /// Range split.
    Range {
        /// Primary span.
        span: i64,
        /// Slots in the category.
        count: usize,
        /// Category name.
        database_category: String,
        /// Shard key column.
        split_hint: String,
        /// Secondary split enabled.
        secondary_split: bool,
        /// Secondary span.
        secondary_span: i64,
    },
}

impl SplitInfo {
    /// Wire shape.
    pub fn to_json(&self) -> Value {
        match self {
            SplitInfo::Hash {
                table_count,
                split_hint,
            } => json!({
                "splitByRange": false,
                "tableCount": table_count,
                "splitHint": split_hint,
            }),
            SplitInfo::Range {
                span,
                count,
                database_category,
                split_hint,
                secondary_split,
                secondary_span,
            } => json!({
                "splitByRange": true,
                "span": span,
                "count": count,
                "databaseCategory": database_category,
                "splitHint": split_hint,
                "secondarySplit": secondary_split,
                "secondarySplitSpan": secondary_span,
            }),
        }
    }
}

/// Slot layout of one range category.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategoryInfo {
    /// Slot count.
    pub split_count: usize,
    /// Indexes of odd/even paired slots.
    pub odd_even_indexes: Vec<i64>,
}

impl CategoryInfo {
    /// Wire shape; indexes only when non-empty.
    pub fn to_json(&self) -> Value {
        let mut value = json!({
            "splitCount": self.split_count,
            "oddEvenCount": self.odd_even_indexes.len(),
        });
        if !self.odd_even_indexes.is_empty() {
            value["oddEvenIndexes"] = json!(self.odd_even_indexes);
        }
        value
    }
}

/// Keys grouped by the canonical key of their physical shard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReformedKeys {
    /// Canonical key to the original keys that map to it.
    pub pairs: BTreeMap<i64, BTreeSet<i64>>,
    /// Keys that address no shard.
    pub invalid: BTreeSet<i64>,
}

impl ReformedKeys {
    /// Wire shape.
    pub fn to_json(&self) -> Value {
        let pairs: Vec<Value> = self
            .pairs
            .iter()
            .map(|(canonical, originals)| json!([canonical, originals]))
            .collect();
        json!({
            "hintPairs": pairs,
            "invalidIds": self.invalid,
        })
    }
}

/// Outcome of one statement on a database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryResult {
    /// Row set, every cell rendered as text.
    Select {
        /// Column names.
        fields: Vec<String>,
        /// Rows.
        rows: Vec<Vec<String>>,
    },
    /// Write summary.
    Modify {
        /// Rows changed.
        affected_rows: u64,
        /// Last generated id.
        insert_id: i64,
    },
}

impl QueryResult {
    /// Wire shape.
    pub fn to_json(&self) -> Value {
        match self {
            QueryResult::Select { fields, rows } => json!({ "fields": fields, "rows": rows }),
            QueryResult::Modify {
                affected_rows,
                insert_id,
            } => json!({ "affectedRows": affected_rows, "insertId": insert_id }),
        }
    }
}
