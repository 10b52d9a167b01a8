//! SQLite configuration store.
//!
//! Reads `server_info`, `table_info`, `split_table_info`,
//! `split_range_info` and `variable_setting` in pages of
//! [`PAGE_SIZE`] rows ordered by id.

use std::path::{Path, PathBuf};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use tracing::debug;

use crate::domain::{
    ConfigSnapshot, ConfigSourceError, GlobalSettings, RangeSplitRow, ServerRow, SplitType,
    TableRow, TableSplitRow,
};
use crate::ports::ConfigSource;

/// Rows fetched per page.
pub const PAGE_SIZE: i64 = 10_000;

/// Setting holding the configuration update time.
pub const UPDATE_TIME_SETTING: &str = "DBProxy config data update";
/// Setting holding the default range span.
pub const DEFAULT_SPAN_SETTING: &str = "default split range span";
/// Setting holding the secondary split number base.
pub const NUMBER_BASE_SETTING: &str = "secondary split number base";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS server_info (
    server_id INTEGER PRIMARY KEY,
    master_sid INTEGER NOT NULL DEFAULT 0,
    host TEXT NOT NULL,
    port INTEGER NOT NULL,
    user TEXT NOT NULL DEFAULT '',
    passwd TEXT NOT NULL DEFAULT '',
    timeout INTEGER NOT NULL DEFAULT 3,
    default_database_name TEXT
);
CREATE TABLE IF NOT EXISTS table_info (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name TEXT NOT NULL,
    cluster TEXT NOT NULL DEFAULT '',
    split_type INTEGER NOT NULL,
    range_span INTEGER NOT NULL DEFAULT 0,
    database_category TEXT NOT NULL DEFAULT '',
    secondary_split INTEGER NOT NULL DEFAULT 0,
    secondary_split_span INTEGER NOT NULL DEFAULT 0,
    table_count INTEGER NOT NULL DEFAULT 0,
    hint_field TEXT
);
CREATE TABLE IF NOT EXISTS split_table_info (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name TEXT NOT NULL,
    cluster TEXT NOT NULL DEFAULT '',
    table_number INTEGER NOT NULL,
    server_id INTEGER NOT NULL,
    database_name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS split_range_info (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    database_category TEXT NOT NULL,
    cluster TEXT NOT NULL DEFAULT '',
    split_index INTEGER NOT NULL,
    index_type INTEGER NOT NULL DEFAULT 0,
    database_name TEXT NOT NULL,
    server_id INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS variable_setting (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

fn query_error(error: rusqlite::Error) -> ConfigSourceError {
    ConfigSourceError::Query(error.to_string())
}

/// Fetch `table` in id order, `PAGE_SIZE` rows at a time. `map_row` sees
/// `columns` starting at index 1.
fn fetch_paged<T>(
    connection: &Connection,
    table: &str,
    key: &str,
    columns: &str,
    map_row: impl Fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>, ConfigSourceError> {
    let sql = format!("SELECT {key}, {columns} FROM {table} WHERE {key} > ?1 ORDER BY {key} LIMIT ?2");
    let mut statement = connection.prepare(&sql).map_err(query_error)?;
    let mut rows = Vec::new();
    let mut last = i64::MIN;
    loop {
        let page = statement
            .query_map(params![last, PAGE_SIZE], |row| Ok((row.get::<_, i64>(0)?, map_row(row)?)))
            .map_err(query_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(query_error)?;
        let fetched = page.len() as i64;
        if let Some((id, _)) = page.last() {
            last = *id;
        }
        rows.extend(page.into_iter().map(|(_, row)| row));
        if fetched < PAGE_SIZE {
            return Ok(rows);
        }
    }
}

fn read_setting(connection: &Connection, name: &str) -> Result<i64, ConfigSourceError> {
    let value: Option<SqlValue> = connection
        .query_row(
            "SELECT value FROM variable_setting WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()
        .map_err(query_error)?;
    let invalid = |value: String| ConfigSourceError::InvalidSetting {
        name: name.to_string(),
        value,
    };
    match value {
        None => Err(ConfigSourceError::MissingSetting(name.to_string())),
        Some(SqlValue::Integer(v)) => Ok(v),
        Some(SqlValue::Text(text)) => text.trim().parse().map_err(|_| invalid(text)),
        Some(other) => Err(invalid(format!("{other:?}"))),
    }
}

fn read_update_time(connection: &Connection) -> Result<i64, ConfigSourceError> {
    let update_time = read_setting(connection, UPDATE_TIME_SETTING)?;
    if update_time <= 0 {
        return Err(ConfigSourceError::InvalidSetting {
            name: UPDATE_TIME_SETTING.to_string(),
            value: update_time.to_string(),
        });
    }
    Ok(update_time)
}

fn integral_out_of_range(column: usize, raw: i64) -> rusqlite::Error {
    rusqlite::Error::IntegralValueOutOfRange(column, raw)
}

fn server_row(row: &Row<'_>) -> rusqlite::Result<ServerRow> {
    let timeout: i64 = row.get(7)?;
    Ok(ServerRow {
        server_id: row.get(1)?,
        master_id: row.get(2)?,
        host: row.get(3)?,
        port: row.get(4)?,
        username: row.get(5)?,
        password: row.get(6)?,
        timeout_secs: u64::try_from(timeout).map_err(|_| integral_out_of_range(7, timeout))?,
        default_database: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
    })
}

fn table_row(row: &Row<'_>) -> rusqlite::Result<TableRow> {
    let raw_type: i64 = row.get(3)?;
    Ok(TableRow {
        table_name: row.get(1)?,
        cluster: row.get(2)?,
        split_type: SplitType::from_raw(raw_type).ok_or_else(|| integral_out_of_range(3, raw_type))?,
        range_span: row.get(4)?,
        database_category: row.get(5)?,
        secondary_split: row.get(6)?,
        secondary_span: row.get(7)?,
        table_count: row.get(8)?,
        hint_field: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
    })
}

fn table_split_row(row: &Row<'_>) -> rusqlite::Result<TableSplitRow> {
    Ok(TableSplitRow {
        table_name: row.get(1)?,
        cluster: row.get(2)?,
        table_number: row.get(3)?,
        server_id: row.get(4)?,
        database_name: row.get(5)?,
    })
}

fn range_split_row(row: &Row<'_>) -> rusqlite::Result<RangeSplitRow> {
    Ok(RangeSplitRow {
        database_category: row.get(1)?,
        cluster: row.get(2)?,
        split_index: row.get(3)?,
        index_type: row.get(4)?,
        database_name: row.get(5)?,
        server_id: row.get(6)?,
    })
}

/// Configuration store in one SQLite file.
#[derive(Clone, Debug)]
pub struct SqliteConfigSource {
    path: PathBuf,
}

impl SqliteConfigSource {
    /// Source reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection, ConfigSourceError> {
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ConfigSourceError::Unreachable(format!("{}: {}", self.path.display(), e)))
    }

    /// Create the configuration tables in `path` if missing.
    pub fn initialize(path: impl AsRef<Path>) -> Result<(), ConfigSourceError> {
        let connection = Connection::open(path.as_ref())
            .map_err(|e| ConfigSourceError::Unreachable(e.to_string()))?;
        connection.execute_batch(SCHEMA).map_err(query_error)
    }

    /// Replace the stored configuration with `snapshot`.
    pub fn write_snapshot(path: impl AsRef<Path>, snapshot: &ConfigSnapshot) -> Result<(), ConfigSourceError> {
        Self::initialize(path.as_ref())?;
        let mut connection = Connection::open(path.as_ref())
            .map_err(|e| ConfigSourceError::Unreachable(e.to_string()))?;
        let tx = connection.transaction().map_err(query_error)?;
        tx.execute_batch(
            "DELETE FROM server_info; DELETE FROM table_info; DELETE FROM split_table_info;
             DELETE FROM split_range_info; DELETE FROM variable_setting;",
        )
        .map_err(query_error)?;

        let settings = &snapshot.settings;
        for (name, value) in [
            (UPDATE_TIME_SETTING, settings.update_time),
            (DEFAULT_SPAN_SETTING, settings.default_split_span),
            (NUMBER_BASE_SETTING, settings.secondary_number_base),
        ] {
            tx.execute(
                "INSERT INTO variable_setting (name, value) VALUES (?1, ?2)",
                params![name, value.to_string()],
            )
            .map_err(query_error)?;
        }
        for s in &snapshot.servers {
            tx.execute(
                "INSERT INTO server_info (server_id, master_sid, host, port, user, passwd, timeout, default_database_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    s.server_id,
                    s.master_id,
                    s.host,
                    s.port,
                    s.username,
                    s.password,
                    s.timeout_secs as i64,
                    s.default_database
                ],
            )
            .map_err(query_error)?;
        }
        for t in &snapshot.tables {
            let split_type = match t.split_type {
                SplitType::Hash => 0,
                SplitType::Range => 1,
            };
            tx.execute(
                "INSERT INTO table_info (table_name, cluster, split_type, range_span, database_category,
                 secondary_split, secondary_split_span, table_count, hint_field)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    t.table_name,
                    t.cluster,
                    split_type,
                    t.range_span,
                    t.database_category,
                    t.secondary_split,
                    t.secondary_span,
                    t.table_count,
                    t.hint_field
                ],
            )
            .map_err(query_error)?;
        }
        for s in &snapshot.table_splits {
            tx.execute(
                "INSERT INTO split_table_info (table_name, cluster, table_number, server_id, database_name)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![s.table_name, s.cluster, s.table_number, s.server_id, s.database_name],
            )
            .map_err(query_error)?;
        }
        for s in &snapshot.range_splits {
            tx.execute(
                "INSERT INTO split_range_info (database_category, cluster, split_index, index_type, database_name, server_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    s.database_category,
                    s.cluster,
                    s.split_index,
                    s.index_type,
                    s.database_name,
                    s.server_id
                ],
            )
            .map_err(query_error)?;
        }
        tx.commit().map_err(query_error)
    }
}

impl ConfigSource for SqliteConfigSource {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }

    fn fetch_update_time(&mut self) -> Result<i64, ConfigSourceError> {
        read_update_time(&self.open()?)
    }

    fn fetch_snapshot(&mut self) -> Result<ConfigSnapshot, ConfigSourceError> {
        let connection = self.open()?;
        let settings = GlobalSettings {
            update_time: read_update_time(&connection)?,
            default_split_span: read_setting(&connection, DEFAULT_SPAN_SETTING)?,
            secondary_number_base: read_setting(&connection, NUMBER_BASE_SETTING)?,
        };
        let servers = fetch_paged(
            &connection,
            "server_info",
            "server_id",
            "server_id, master_sid, host, port, user, passwd, timeout, default_database_name",
            server_row,
        )?;
        let tables = fetch_paged(
            &connection,
            "table_info",
            "id",
            "table_name, cluster, split_type, range_span, database_category, secondary_split, \
             secondary_split_span, table_count, hint_field",
            table_row,
        )?;
        let table_splits = fetch_paged(
            &connection,
            "split_table_info",
            "id",
            "table_name, cluster, table_number, server_id, database_name",
            table_split_row,
        )?;
        let range_splits = fetch_paged(
            &connection,
            "split_range_info",
            "id",
            "database_category, cluster, split_index, index_type, database_name, server_id",
            range_split_row,
        )?;
        debug!(
            "[dbp] Read {} servers, {} tables, {} table splits, {} range splits from {}",
            servers.len(),
            tables.len(),
            table_splits.len(),
            range_splits.len(),
            self.describe()
        );
        Ok(ConfigSnapshot {
            settings,
            servers,
            tables,
            table_splits,
            range_splits,
        })
    }
}
