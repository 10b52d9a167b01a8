//! Shared fixtures: a deployment laid out in a temporary directory.
//!
//! Instances `inst-a:1` and `inst-b:1` back:
//! - `user`: hash, 2 shards, `user_0` on `inst-a`, `user_1` on `inst-b`
//! - `orders`: range over `shop`, span 100, slot 0 on `inst-a`, slot 1 on `inst-b`

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dbp_routing::{
    Answer, AnswerChannel, ConfigSnapshot, DataRouter, GlobalSettings, PoolConfig,
    RangeSplitRow, RouterApi, RouterConfig, ServerRow, SqliteConfigSource, SqliteDriverFactory,
    TableRow, TableSplitRow, WatcherConfig,
};
use rusqlite::Connection;
use serde_json::Value;
use tempfile::TempDir;

/// Bounded wait for answers and map loads.
pub const WAIT: Duration = Duration::from_secs(10);

/// Config store and instance directories of one test deployment.
pub struct TestDeployment {
    dir: TempDir,
}

fn create_test_server(server_id: i64, host: &str) -> ServerRow {
    ServerRow {
        server_id,
        master_id: 0,
        host: host.to_string(),
        port: 1,
        username: String::new(),
        password: String::new(),
        timeout_secs: 2,
        default_database: String::new(),
    }
}

fn user_split(number: i64, server_id: i64) -> TableSplitRow {
    TableSplitRow {
        table_name: "user".to_string(),
        cluster: String::new(),
        table_number: number,
        server_id,
        database_name: "user_db".to_string(),
    }
}

fn shop_slot(index: i64, server_id: i64) -> RangeSplitRow {
    RangeSplitRow {
        database_category: "shop".to_string(),
        cluster: String::new(),
        split_index: index,
        index_type: 0,
        database_name: format!("shop_{index}"),
        server_id,
    }
}

/// The two-instance layout described at the top of this module.
pub fn create_test_snapshot(update_time: i64) -> ConfigSnapshot {
    ConfigSnapshot {
        settings: GlobalSettings {
            update_time,
            ..GlobalSettings::default()
        },
        servers: vec![create_test_server(1, "inst-a"), create_test_server(2, "inst-b")],
        tables: vec![
            TableRow::hash("user", 2),
            TableRow::range("orders", "shop", 100),
        ],
        table_splits: vec![user_split(0, 1), user_split(1, 2)],
        range_splits: vec![shop_slot(0, 1), shop_slot(1, 2)],
    }
}

impl TestDeployment {
    /// Write the default snapshot and create the physical tables.
    pub fn new() -> Self {
        let deployment = Self::empty();
        deployment.write_config(&create_test_snapshot(100));
        deployment.execute("inst-a", "user_db", "CREATE TABLE user_0 (id INTEGER PRIMARY KEY, name TEXT)");
        deployment.execute("inst-b", "user_db", "CREATE TABLE user_1 (id INTEGER PRIMARY KEY, name TEXT)");
        deployment.execute("inst-a", "shop_0", "CREATE TABLE orders (id INTEGER PRIMARY KEY, item TEXT)");
        deployment.execute("inst-b", "shop_1", "CREATE TABLE orders (id INTEGER PRIMARY KEY, item TEXT)");
        deployment
    }

    /// Deployment without a config store.
    pub fn empty() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        Self { dir }
    }

    /// Path of the config store.
    pub fn config_db(&self) -> PathBuf {
        self.dir.path().join("config.sqlite")
    }

    /// Root of the instance directories.
    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    /// Replace the stored configuration.
    pub fn write_config(&self, snapshot: &ConfigSnapshot) {
        SqliteConfigSource::write_snapshot(self.config_db(), snapshot).unwrap();
    }

    fn database_path(&self, host: &str, database: &str) -> PathBuf {
        let dir = self.data_dir().join(format!("{host}_1"));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("{database}.sqlite"))
    }

    /// Run `sql` directly against one database file.
    pub fn execute(&self, host: &str, database: &str, sql: &str) {
        let connection = Connection::open(self.database_path(host, database)).unwrap();
        connection.execute_batch(sql).unwrap();
    }

    /// Read `(id, text)` rows directly from one database file.
    pub fn rows(&self, host: &str, database: &str, sql: &str) -> Vec<(i64, String)> {
        let connection = Connection::open(self.database_path(host, database)).unwrap();
        let mut statement = connection.prepare(sql).unwrap();
        let rows = statement
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        rows.map(Result::unwrap).collect()
    }

    /// Router reading `config_dbs` (defaults to this deployment's store).
    pub fn start_router_with(&self, config_dbs: Vec<PathBuf>) -> Arc<DataRouter> {
        let config = RouterConfig {
            pool: PoolConfig::for_testing(),
            watcher: WatcherConfig::for_testing(),
            ..RouterConfig::default()
        };
        let sources = config_dbs
            .into_iter()
            .map(|path| Box::new(SqliteConfigSource::new(path)) as Box<dyn dbp_routing::ConfigSource>)
            .collect();
        let factory = Arc::new(SqliteDriverFactory::new(self.data_dir()));
        Arc::new(DataRouter::start(config, sources, factory).unwrap())
    }

    /// Router over this deployment, waiting until its first map is live.
    pub fn start_router(&self) -> Arc<DataRouter> {
        let router = self.start_router_with(vec![self.config_db()]);
        assert!(wait_until(|| router.watcher().current().is_some()), "map never loaded");
        router
    }

    /// Root directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Default for TestDeployment {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `condition` until it holds or [`WAIT`] passes.
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Dispatch `method` and block for its answer.
pub fn ask(router: &dyn RouterApi, method: &str, args: Value) -> Answer {
    let (tx, rx) = mpsc::channel();
    let channel = AnswerChannel::with_callback(move |answer| {
        let _ = tx.send(answer);
    });
    router.dispatch(method, args, channel);
    rx.recv_timeout(WAIT).unwrap()
}
