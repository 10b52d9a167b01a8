//! # Domain Errors
//!
//! Error types for the routing engine and the numeric error codes
//! reported to clients.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Base added to every client-facing error code.
pub const ERROR_BASE: i64 = 100_000;

/// Raiser reported for errors produced by the proxy itself.
pub const PROXY_RAISER: &str = "DBProxy";

/// Raiser reported for errors returned by a database server.
pub const DATABASE_RAISER: &str = "database";

/// Client-facing error codes (`ERROR_BASE + http-like suffix`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Statement type or request shape rejected.
    Disabled,
    /// Table or target database unknown.
    TableNotFound,
    /// Malformed request arguments.
    InvalidParameters,
    /// Internal failure or a task dropped without an answer.
    InternalError,
    /// Database server reported an error.
    DriverException,
    /// No shard map is installed yet.
    Unconfigured,
    /// Queue admission limit reached.
    ServerBusy,
}

impl ErrorCode {
    /// All codes, in declaration order.
    pub const ALL: [ErrorCode; 7] = [
        ErrorCode::Disabled,
        ErrorCode::TableNotFound,
        ErrorCode::InvalidParameters,
        ErrorCode::InternalError,
        ErrorCode::DriverException,
        ErrorCode::Unconfigured,
        ErrorCode::ServerBusy,
    ];

    /// Numeric code sent on the wire.
    pub const fn code(self) -> i64 {
        ERROR_BASE
            + match self {
                ErrorCode::Disabled => 403,
                ErrorCode::TableNotFound => 404,
                ErrorCode::InvalidParameters => 422,
                ErrorCode::InternalError => 500,
                ErrorCode::DriverException => 502,
                ErrorCode::Unconfigured => 503,
                ErrorCode::ServerBusy => 513,
            }
    }

    /// Reverse of [`ErrorCode::code`].
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Who raised the error.
    pub const fn raiser(self) -> &'static str {
        match self {
            ErrorCode::DriverException => DATABASE_RAISER,
            _ => PROXY_RAISER,
        }
    }

    /// Short label used in logs and metrics.
    pub const fn label(self) -> &'static str {
        match self {
            ErrorCode::Disabled => "disabled",
            ErrorCode::TableNotFound => "not_found",
            ErrorCode::InvalidParameters => "invalid_parameters",
            ErrorCode::InternalError => "internal",
            ErrorCode::DriverException => "driver_exception",
            ErrorCode::Unconfigured => "unconfigured",
            ErrorCode::ServerBusy => "server_busy",
        }
    }
}

/// Error reported by a database driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[Database Exception] errno: {errno}, error: '{message}', sql status: '{sqlstate}'")]
pub struct DriverError {
    /// Server error number.
    pub errno: i32,
    /// Server error message.
    pub message: String,
    /// SQLSTATE reported with the error.
    pub sqlstate: String,
    /// The connection is unusable and must be dropped.
    pub connection_lost: bool,
}

impl DriverError {
    /// Errno used when the link to the server went away.
    pub const LOST_ERRNO: i32 = 2013;

    /// Create a driver error that keeps the connection usable.
    pub fn new(errno: i32, message: impl Into<String>, sqlstate: impl Into<String>) -> Self {
        Self {
            errno,
            message: message.into(),
            sqlstate: sqlstate.into(),
            connection_lost: false,
        }
    }

    /// Create an error that invalidates the connection.
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self {
            errno: Self::LOST_ERRNO,
            message: message.into(),
            sqlstate: "HY000".to_string(),
            connection_lost: true,
        }
    }
}

/// A failed transaction: which statement broke and why.
///
/// `index` is `-1` for the opening `START TRANSACTION` and `sqls.len()`
/// for the final `COMMIT`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Excepted index: {index} Excepted SQL: {sql}. {error}")]
pub struct TransactionFailure {
    /// Statement index.
    pub index: i64,
    /// Statement text.
    pub sql: String,
    /// Driver failure.
    pub error: DriverError,
}

/// Routing engine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// No shard map installed.
    #[error("DB unconfigured.")]
    Unconfigured,

    /// Table not present in the shard map.
    #[error("Table not found.")]
    TableNotFound,

    /// Routing a request to a database failed.
    #[error("Target database or table not found.")]
    TargetNotFound,

    /// Range slot index beyond the category.
    #[error("Shard index {index} out of range ({slots} slots)")]
    ShardIndexOutOfRange {
        /// Computed slot index
        index: i64,
        /// Slots in the category
        slots: usize,
    },

    /// Key that cannot address a range table.
    #[error("Invalid shard key {0} for range split table")]
    InvalidShardKey(i64),

    /// Range category referenced by a table is missing.
    #[error("Unknown database category: {0}")]
    UnknownCategory(String),

    /// Hash shard without a bound group.
    #[error("Shard {number} of table {table} has no database assigned")]
    UnassignedShard {
        /// Table name
        table: String,
        /// Shard number
        number: i64,
    },

    /// Table name not found where the suffix must go.
    #[error("Cannot insert suffix for table {table}")]
    SuffixInsertionFailed {
        /// Table name
        table: String,
    },

    /// Malformed arguments.
    #[error("Invalid parameters.")]
    InvalidParameters,

    /// Negative hint id on a request.
    #[error("HintId cannot be negative value.")]
    NegativeHintId,

    /// Statement class not allowed.
    #[error("Disabled SQL statement type.")]
    DisabledStatement,

    /// Request rejected with a specific reason.
    #[error("{0}")]
    Disabled(String),

    /// String keys on a range table.
    #[error("String hint id cannot be applied with range split type.")]
    RangeStringHint,

    /// Queue admission refused.
    #[error("Corresponding query queue caught limitation.")]
    ServerBusy,

    /// Internal failure.
    #[error("{0}")]
    Internal(String),

    /// Worker could not (re)connect to its server.
    #[error("Database connection lost.")]
    ConnectionLost,

    /// Database server failure.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl RouterError {
    /// Client-facing code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            RouterError::Unconfigured => ErrorCode::Unconfigured,
            RouterError::TableNotFound
            | RouterError::TargetNotFound
            | RouterError::ShardIndexOutOfRange { .. }
            | RouterError::InvalidShardKey(_)
            | RouterError::UnknownCategory(_)
            | RouterError::UnassignedShard { .. }
            | RouterError::SuffixInsertionFailed { .. } => ErrorCode::TableNotFound,
            RouterError::InvalidParameters | RouterError::NegativeHintId => {
                ErrorCode::InvalidParameters
            }
            RouterError::DisabledStatement
            | RouterError::Disabled(_)
            | RouterError::RangeStringHint => ErrorCode::Disabled,
            RouterError::ServerBusy => ErrorCode::ServerBusy,
            RouterError::Internal(_) => ErrorCode::InternalError,
            RouterError::Driver(_) | RouterError::ConnectionLost => ErrorCode::DriverException,
        }
    }

    /// Answer sent for a task dropped before it was processed.
    pub fn exiting() -> Self {
        RouterError::Internal("Please try again. DBProxy is exiting or refreshing.".to_string())
    }
}

/// Shard map build stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// Input presence checks.
    Inputs,
    /// Server rows and group formation.
    Servers,
    /// Logical table rows.
    Tables,
    /// Hash shard assignments.
    TableSplits,
    /// Range slot assignments.
    RangeSplits,
    /// Group reuse and pool start.
    Activation,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::Inputs => "inputs",
            BuildStage::Servers => "servers",
            BuildStage::Tables => "tables",
            BuildStage::TableSplits => "table splits",
            BuildStage::RangeSplits => "range splits",
            BuildStage::Activation => "activation",
        };
        f.write_str(name)
    }
}

/// A single problem found while building a shard map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildIssue {
    /// No server rows.
    #[error("no servers configured")]
    NoServers,
    /// No table rows.
    #[error("no tables configured")]
    NoTables,
    /// Neither hash nor range assignments.
    #[error("no table splits or range splits configured")]
    NoSplits,
    /// Two server rows share an id.
    #[error("duplicate server id {0}")]
    DuplicateServer(i64),
    /// Replica points at a server that is not a master.
    #[error("server {server_id} references missing master {master_id}")]
    MissingMaster {
        /// Replica id
        server_id: i64,
        /// Referenced master id
        master_id: i64,
    },
    /// Two tables share a key.
    #[error("duplicate table {0}")]
    DuplicateTable(String),
    /// Range table with no usable span.
    #[error("table {0} has no usable split span")]
    InvalidSplitSpan(String),
    /// Secondary split enabled with a non-positive span.
    #[error("table {0} has an invalid secondary split span")]
    InvalidSecondarySpan(String),
    /// Negative hash table count.
    #[error("table {0} has a negative table count")]
    InvalidTableCount(String),
    /// Split row references an unknown master server.
    #[error("{context} references unknown server {server_id}")]
    UnknownServer {
        /// Which row referenced it
        context: String,
        /// Server id
        server_id: i64,
    },
    /// Same hash shard assigned twice.
    #[error("table {table} shard {number} assigned twice")]
    DuplicateTableSplit {
        /// Table name
        table: String,
        /// Shard number
        number: i64,
    },
    /// Hash shard with no split row.
    #[error("table {table} shard {number} has no split assigned")]
    UnassignedTableSplit {
        /// Table name
        table: String,
        /// Shard number
        number: i64,
    },
    /// Range row with an unsupported index type.
    #[error("category {category} slot {index} has invalid index type {index_type}")]
    InvalidIndexType {
        /// Category
        category: String,
        /// Slot index
        index: i64,
        /// Raw index type
        index_type: i64,
    },
    /// Conflicting range rows for one slot.
    #[error("category {category} slot {index}: {reason}")]
    RangeConflict {
        /// Category
        category: String,
        /// Slot index
        index: i64,
        /// What conflicted
        reason: String,
    },
    /// Unfilled range slot.
    #[error("category {category} slot {index} is not fully assigned")]
    RangeGap {
        /// Category
        category: String,
        /// Slot index
        index: i64,
    },
    /// Category mixes single and odd/even slots.
    #[error("category {0} mixes single and odd/even slots")]
    MixedParity(String),
    /// Invalid global setting.
    #[error("invalid setting {name}: {value}")]
    InvalidSetting {
        /// Setting name
        name: String,
        /// Offending value
        value: String,
    },
}

fn render_issues(issues: &[BuildIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Shard map build failure with every issue found at the failing stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A stage found one or more issues.
    #[error("shard map rejected at {stage} stage: {}", render_issues(.issues))]
    Rejected {
        /// Failing stage
        stage: BuildStage,
        /// Issues found
        issues: Vec<BuildIssue>,
    },
}

impl BuildError {
    /// Issues carried by this error.
    pub fn issues(&self) -> &[BuildIssue] {
        match self {
            BuildError::Rejected { issues, .. } => issues,
        }
    }
}

/// Config store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigSourceError {
    /// Store cannot be reached.
    #[error("config source unreachable: {0}")]
    Unreachable(String),
    /// Query against the store failed.
    #[error("config query failed: {0}")]
    Query(String),
    /// Required setting missing.
    #[error("missing config setting: {0}")]
    MissingSetting(String),
    /// Setting present but unusable.
    #[error("invalid config setting {name}: {value}")]
    InvalidSetting {
        /// Setting name
        name: String,
        /// Offending value
        value: String,
    },
}

/// Failure of a single watcher refresh attempt.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// Reading the store failed.
    #[error(transparent)]
    Source(#[from] ConfigSourceError),
    /// The new map was rejected.
    #[error(transparent)]
    Build(#[from] BuildError),
}
