//! # Outbound Ports
//!
//! Traits for external dependencies: the database driver and the
//! configuration store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::domain::{
    ConfigSnapshot, ConfigSourceError, DriverError, QueryResult, ServerRow, TransactionFailure,
};

/// One connection to one physical database server.
///
/// Owned by exactly one worker thread.
pub trait DatabaseDriver: Send {
    /// Check the link, `false` if the connection must be rebuilt.
    fn ping(&mut self) -> bool;

    /// Escape values for inclusion inside single quotes.
    fn escape_strings(&self, values: &[String]) -> Vec<String>;

    /// Run one statement against `database`.
    fn query(&mut self, database: &str, sql: &str) -> Result<QueryResult, DriverError>;

    /// Run `sqls` atomically against `database`.
    ///
    /// On failure the transaction is rolled back and the failing statement
    /// index is reported.
    fn transaction(&mut self, database: &str, sqls: &[String]) -> Result<(), TransactionFailure>;
}

/// Opens driver connections.
pub trait DriverFactory: Send + Sync {
    /// Connect to `server`.
    fn connect(&self, server: &ServerRow) -> Result<Box<dyn DatabaseDriver>, DriverError>;
}

/// Configuration store.
pub trait ConfigSource: Send {
    /// Label for logs.
    fn describe(&self) -> String;

    /// Stored configuration update time.
    fn fetch_update_time(&mut self) -> Result<i64, ConfigSourceError>;

    /// Every row needed for a build.
    fn fetch_snapshot(&mut self) -> Result<ConfigSnapshot, ConfigSourceError>;
}

// =============================================================================
// Mock Implementations for Testing
// =============================================================================

/// Handler deciding what a mock statement returns.
pub type MockHandler =
    dyn Fn(&ServerRow, &str, &str) -> Result<QueryResult, DriverError> + Send + Sync;

/// A statement seen by a mock driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutedStatement {
    /// `host:port` of the server.
    pub endpoint: String,
    /// Database name.
    pub database: String,
    /// Statement text.
    pub sql: String,
}

/// Default mock behaviour: selects echo where they ran, writes touch one row.
pub fn default_mock_handler(
    server: &ServerRow,
    database: &str,
    sql: &str,
) -> Result<QueryResult, DriverError> {
    if sql.trim_start().to_ascii_lowercase().starts_with("select") {
        Ok(QueryResult::Select {
            fields: vec!["endpoint".into(), "database".into(), "sql".into()],
            rows: vec![vec![server.endpoint(), database.to_string(), sql.to_string()]],
        })
    } else {
        Ok(QueryResult::Modify {
            affected_rows: 1,
            insert_id: 0,
        })
    }
}

struct MockDriverShared {
    handler: Box<MockHandler>,
    executed: Mutex<Vec<ExecutedStatement>>,
    connects: AtomicUsize,
    refuse_connect: AtomicBool,
    gate_open: Mutex<bool>,
    gate_cond: Condvar,
}

/// In-memory driver factory recording every statement.
#[derive(Clone)]
pub struct MockDriverFactory {
    shared: Arc<MockDriverShared>,
}

impl Default for MockDriverFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriverFactory {
    /// Factory using [`default_mock_handler`].
    pub fn new() -> Self {
        Self::with_handler(default_mock_handler)
    }

    /// Factory with custom statement results.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&ServerRow, &str, &str) -> Result<QueryResult, DriverError> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(MockDriverShared {
                handler: Box::new(handler),
                executed: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
                refuse_connect: AtomicBool::new(false),
                gate_open: Mutex::new(true),
                gate_cond: Condvar::new(),
            }),
        }
    }

    /// Statements executed so far.
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.shared.executed.lock().clone()
    }

    /// Successful connects so far.
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Make `connect` fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Block statements until [`MockDriverFactory::release`].
    pub fn hold(&self) {
        *self.shared.gate_open.lock() = false;
    }

    /// Let held statements run.
    pub fn release(&self) {
        *self.shared.gate_open.lock() = true;
        self.shared.gate_cond.notify_all();
    }
}

impl DriverFactory for MockDriverFactory {
    fn connect(&self, server: &ServerRow) -> Result<Box<dyn DatabaseDriver>, DriverError> {
        if self.shared.refuse_connect.load(Ordering::SeqCst) {
            return Err(DriverError::connection_lost(format!(
                "cannot connect to {}",
                server.endpoint()
            )));
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockDriver {
            server: server.clone(),
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// Connection handed out by [`MockDriverFactory`].
pub struct MockDriver {
    server: ServerRow,
    shared: Arc<MockDriverShared>,
}

impl MockDriver {
    fn wait_gate(&self) {
        let mut open = self.shared.gate_open.lock();
        while !*open {
            self.shared.gate_cond.wait(&mut open);
        }
    }
}

impl DatabaseDriver for MockDriver {
    fn ping(&mut self) -> bool {
        true
    }

    fn escape_strings(&self, values: &[String]) -> Vec<String> {
        values.iter().map(|v| v.replace('\'', "''")).collect()
    }

    fn query(&mut self, database: &str, sql: &str) -> Result<QueryResult, DriverError> {
        self.wait_gate();
        self.shared.executed.lock().push(ExecutedStatement {
            endpoint: self.server.endpoint(),
            database: database.to_string(),
            sql: sql.to_string(),
        });
        (self.shared.handler)(&self.server, database, sql)
    }

    fn transaction(&mut self, database: &str, sqls: &[String]) -> Result<(), TransactionFailure> {
        for (index, sql) in sqls.iter().enumerate() {
            self.query(database, sql).map_err(|error| TransactionFailure {
                index: index as i64,
                sql: sql.clone(),
                error,
            })?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct MockConfigState {
    snapshot: Option<ConfigSnapshot>,
    failing: bool,
    snapshot_fetches: usize,
}

/// In-memory configuration store; clones share state.
#[derive(Clone, Default)]
pub struct MockConfigSource {
    name: String,
    state: Arc<Mutex<MockConfigState>>,
}

impl MockConfigSource {
    /// Store serving `snapshot`.
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        let source = Self {
            name: "mock".to_string(),
            ..Self::default()
        };
        source.set_snapshot(snapshot);
        source
    }

    /// Store that fails every fetch.
    pub fn unreachable(name: &str) -> Self {
        let source = Self {
            name: name.to_string(),
            ..Self::default()
        };
        source.set_failing(true);
        source
    }

    /// Replace the served snapshot.
    pub fn set_snapshot(&self, snapshot: ConfigSnapshot) {
        self.state.lock().snapshot = Some(snapshot);
    }

    /// Toggle failures.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Full snapshot fetches so far.
    pub fn snapshot_fetches(&self) -> usize {
        self.state.lock().snapshot_fetches
    }

    fn served(&self) -> Result<ConfigSnapshot, ConfigSourceError> {
        let state = self.state.lock();
        match (&state.snapshot, state.failing) {
            (Some(snapshot), false) => Ok(snapshot.clone()),
            _ => Err(ConfigSourceError::Unreachable(self.name.clone())),
        }
    }
}

impl ConfigSource for MockConfigSource {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn fetch_update_time(&mut self) -> Result<i64, ConfigSourceError> {
        self.served().map(|s| s.settings.update_time)
    }

    fn fetch_snapshot(&mut self) -> Result<ConfigSnapshot, ConfigSourceError> {
        let snapshot = self.served()?;
        self.state.lock().snapshot_fetches += 1;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_server() -> ServerRow {
        ServerRow {
            server_id: 1,
            master_id: 0,
            host: "127.0.0.1".into(),
            port: 3306,
            username: "root".into(),
            password: String::new(),
            timeout_secs: 1,
            default_database: String::new(),
        }
    }

    #[test]
    fn test_mock_driver_records_statements() {
        let factory = MockDriverFactory::new();
        let mut driver = factory.connect(&create_test_server()).unwrap();
        let result = driver.query("shop", "select 1").unwrap();
        assert!(matches!(result, QueryResult::Select { .. }));
        assert_eq!(factory.executed().len(), 1);
        assert_eq!(factory.executed()[0].database, "shop");
        assert_eq!(factory.connect_count(), 1);
    }

    #[test]
    fn test_mock_driver_refuses() {
        let factory = MockDriverFactory::new();
        factory.refuse_connections(true);
        let err = factory.connect(&create_test_server()).err().unwrap();
        assert!(err.connection_lost);
    }

    #[test]
    fn test_mock_transaction_reports_index() {
        let factory = MockDriverFactory::with_handler(|_, _, sql| {
            if sql.contains("bad") {
                Err(DriverError::new(1064, "syntax", "42000"))
            } else {
                Ok(QueryResult::Modify {
                    affected_rows: 1,
                    insert_id: 0,
                })
            }
        });
        let mut driver = factory.connect(&create_test_server()).unwrap();
        let sqls = vec!["update a".to_string(), "bad".to_string()];
        let failure = driver.transaction("db", &sqls).unwrap_err();
        assert_eq!(failure.index, 1);
        assert_eq!(failure.sql, "bad");
    }

    #[test]
    fn test_mock_escape() {
        let factory = MockDriverFactory::new();
        let driver = factory.connect(&create_test_server()).unwrap();
        assert_eq!(driver.escape_strings(&["it's".to_string()]), vec!["it''s"]);
    }

    #[test]
    fn test_mock_config_source() {
        let mut source = MockConfigSource::new(ConfigSnapshot::default());
        assert_eq!(source.fetch_update_time().unwrap(), 1);
        source.set_failing(true);
        assert!(source.fetch_snapshot().is_err());
        source.set_failing(false);
        assert!(source.fetch_snapshot().is_ok());
        assert_eq!(source.snapshot_fetches(), 1);
    }
}
