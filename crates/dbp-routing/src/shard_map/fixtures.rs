//! Shared fixtures for shard map and service tests.

use crate::domain::{
    ConfigSnapshot, GlobalSettings, RangeSplitRow, ServerRow, TableRow, TableSplitRow,
};

pub(crate) fn create_test_server(server_id: i64, master_id: i64, host: &str) -> ServerRow {
    ServerRow {
        server_id,
        master_id,
        host: host.to_string(),
        port: 3306,
        username: "dbp".to_string(),
        password: "secret".to_string(),
        timeout_secs: 3,
        default_database: String::new(),
    }
}

pub(crate) fn table_split(table: &str, number: i64, server_id: i64, database: &str) -> TableSplitRow {
    TableSplitRow {
        table_name: table.to_string(),
        cluster: String::new(),
        table_number: number,
        server_id,
        database_name: database.to_string(),
    }
}

pub(crate) fn range_split(
    category: &str,
    index: i64,
    index_type: i64,
    server_id: i64,
    database: &str,
) -> RangeSplitRow {
    RangeSplitRow {
        database_category: category.to_string(),
        cluster: String::new(),
        split_index: index,
        index_type,
        database_name: database.to_string(),
        server_id,
    }
}

/// Servers: `db-a` (1), `db-b` (2) with replica `db-b-r` (3), `db-c` (4).
///
/// Tables:
/// - `user`: hash, 4 shards, 0-1 on `db-a`, 2-3 on `db-b`
/// - `config`: hash, single table on `db-a`
/// - `orders`: range over `shop` (3 single slots), span 100
/// - `events`: range over `shop`, span 1000, secondary span 100
/// - `logs`: range over `archive` (2 odd/even slots), span 10
pub(crate) fn create_test_snapshot() -> ConfigSnapshot {
    ConfigSnapshot {
        settings: GlobalSettings {
            update_time: 100,
            default_split_span: 1000,
            secondary_number_base: 0,
        },
        servers: vec![
            create_test_server(1, 0, "db-a"),
            create_test_server(2, 0, "db-b"),
            create_test_server(3, 2, "db-b-r"),
            create_test_server(4, 0, "db-c"),
        ],
        tables: vec![
            TableRow::hash("user", 4),
            TableRow::hash("config", 0),
            TableRow::range("orders", "shop", 100),
            TableRow::range("events", "shop", -1).with_secondary(100),
            TableRow::range("logs", "archive", 10),
        ],
        table_splits: vec![
            table_split("user", 0, 1, "user_db"),
            table_split("user", 1, 1, "user_db"),
            table_split("user", 2, 2, "user_db"),
            table_split("user", 3, 2, "user_db"),
            table_split("config", 0, 1, "common"),
        ],
        range_splits: vec![
            range_split("shop", 0, 0, 1, "shop_0"),
            range_split("shop", 1, 0, 2, "shop_1"),
            range_split("shop", 2, 0, 4, "shop_2"),
            range_split("archive", 0, 1, 1, "archive_0_odd"),
            range_split("archive", 0, 2, 4, "archive_0_even"),
            range_split("archive", 1, 2, 4, "archive_1_even"),
            range_split("archive", 1, 1, 2, "archive_1_odd"),
        ],
    }
}
