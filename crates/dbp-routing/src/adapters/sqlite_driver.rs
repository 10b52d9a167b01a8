//! SQLite-backed database driver.
//!
//! Every physical instance `host:port` is a directory under the data root
//! and every database name a `<name>.sqlite` file inside it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::domain::{DriverError, QueryResult, ServerRow, TransactionFailure};
use crate::ports::{DatabaseDriver, DriverFactory};

/// Database name used when neither the task nor the server names one.
const FALLBACK_DATABASE: &str = "main";

fn driver_error(error: rusqlite::Error) -> DriverError {
    match error {
        rusqlite::Error::SqliteFailure(failure, message) => DriverError::new(
            failure.extended_code,
            message.unwrap_or_else(|| failure.to_string()),
            "HY000",
        ),
        other => DriverError::new(0, other.to_string(), "HY000"),
    }
}

fn cell_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
    }
}

fn run_statement(connection: &Connection, sql: &str) -> Result<QueryResult, DriverError> {
    let mut statement = connection.prepare(sql).map_err(driver_error)?;
    if statement.column_count() > 0 {
        let fields: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let width = fields.len();
        let mut rows = Vec::new();
        let mut cursor = statement.query([]).map_err(driver_error)?;
        while let Some(row) = cursor.next().map_err(driver_error)? {
            let mut cells = Vec::with_capacity(width);
            for index in 0..width {
                cells.push(cell_text(row.get_ref(index).map_err(driver_error)?));
            }
            rows.push(cells);
        }
        Ok(QueryResult::Select { fields, rows })
    } else {
        let affected_rows = statement.execute([]).map_err(driver_error)? as u64;
        Ok(QueryResult::Modify {
            affected_rows,
            insert_id: connection.last_insert_rowid(),
        })
    }
}

/// Opens [`SqliteDriver`] connections below a data root.
#[derive(Clone, Debug)]
pub struct SqliteDriverFactory {
    data_root: PathBuf,
}

impl SqliteDriverFactory {
    /// Factory rooted at `data_root`.
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    /// Directory holding the databases of `server`.
    pub fn instance_dir(&self, server: &ServerRow) -> PathBuf {
        self.data_root
            .join(format!("{}_{}", server.host, server.port))
    }
}

impl DriverFactory for SqliteDriverFactory {
    fn connect(&self, server: &ServerRow) -> Result<Box<dyn DatabaseDriver>, DriverError> {
        let dir = self.instance_dir(server);
        std::fs::create_dir_all(&dir).map_err(|e| {
            DriverError::connection_lost(format!("cannot open {}: {}", dir.display(), e))
        })?;
        debug!("[dbp] SQLite instance {} at {}", server.endpoint(), dir.display());
        Ok(Box::new(SqliteDriver::open(
            dir,
            &server.default_database,
            Duration::from_secs(server.timeout_secs.max(1)),
        )))
    }
}

/// One worker's connection to an instance directory.
///
/// Database files are opened lazily and kept for the life of the driver.
pub struct SqliteDriver {
    dir: PathBuf,
    default_database: String,
    busy_timeout: Duration,
    connections: HashMap<String, Connection>,
}

impl SqliteDriver {
    /// Driver over the database files in `dir`.
    pub fn open(dir: impl Into<PathBuf>, default_database: &str, busy_timeout: Duration) -> Self {
        let default_database = if default_database.is_empty() {
            FALLBACK_DATABASE.to_string()
        } else {
            default_database.to_string()
        };
        Self {
            dir: dir.into(),
            default_database,
            busy_timeout,
            connections: HashMap::new(),
        }
    }

    /// Instance directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn connection(&mut self, database: &str) -> Result<&Connection, DriverError> {
        let name = if database.is_empty() {
            self.default_database.clone()
        } else {
            database.to_string()
        };
        match self.connections.entry(name) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let path = self.dir.join(format!("{}.sqlite", entry.key()));
                let connection = Connection::open(&path).map_err(|e| {
                    warn!("[dbp] Cannot open {}: {}", path.display(), e);
                    DriverError::connection_lost(e.to_string())
                })?;
                connection
                    .busy_timeout(self.busy_timeout)
                    .map_err(driver_error)?;
                Ok(entry.insert(connection))
            }
        }
    }
}

impl DatabaseDriver for SqliteDriver {
    fn ping(&mut self) -> bool {
        self.dir.is_dir()
            && self
                .connections
                .values()
                .all(|c| c.execute_batch("SELECT 1").is_ok())
    }

    fn escape_strings(&self, values: &[String]) -> Vec<String> {
        values.iter().map(|v| v.replace('\'', "''")).collect()
    }

    fn query(&mut self, database: &str, sql: &str) -> Result<QueryResult, DriverError> {
        let connection = self.connection(database)?;
        run_statement(connection, sql)
    }

    fn transaction(&mut self, database: &str, sqls: &[String]) -> Result<(), TransactionFailure> {
        let connection = self.connection(database).map_err(|error| TransactionFailure {
            index: -1,
            sql: "START TRANSACTION".to_string(),
            error,
        })?;
        let transaction = connection
            .unchecked_transaction()
            .map_err(|e| TransactionFailure {
                index: -1,
                sql: "START TRANSACTION".to_string(),
                error: driver_error(e),
            })?;

        for (index, sql) in sqls.iter().enumerate() {
            // Dropping the transaction rolls it back.
            run_statement(&transaction, sql).map_err(|error| TransactionFailure {
                index: index as i64,
                sql: sql.clone(),
                error,
            })?;
        }

        transaction.commit().map_err(|e| TransactionFailure {
            index: sqls.len() as i64,
            sql: "COMMIT".to_string(),
            error: driver_error(e),
        })
    }
}
