//! Shard map and builder tests.

use std::collections::BTreeSet;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use serde_json::json;

use super::fixtures::{create_test_server, create_test_snapshot, range_split, table_split};
use super::*;
use crate::domain::{
    BuildError, BuildIssue, BuildStage, ConfigSnapshot, NegativeKeyPolicy, RouterConfig,
    RouterError, SplitInfo, SplitType, TableRow,
};
use crate::ports::{DriverFactory, MockDriverFactory};
use crate::task::{Answer, AnswerChannel, Reply};

// =============================================================================
// Helpers
// =============================================================================

fn create_test_map(snapshot: ConfigSnapshot) -> ShardMap {
    create_test_map_with(snapshot, RouterConfig::for_testing(), None)
}

fn create_test_map_with(
    snapshot: ConfigSnapshot,
    config: RouterConfig,
    previous: Option<&ShardMap>,
) -> ShardMap {
    let factory: Arc<dyn DriverFactory> = Arc::new(MockDriverFactory::new());
    ShardMapBuilder::from_snapshot(snapshot, &config, factory)
        .build(previous)
        .unwrap()
}

fn build_err(snapshot: ConfigSnapshot) -> BuildError {
    let factory: Arc<dyn DriverFactory> = Arc::new(MockDriverFactory::new());
    ShardMapBuilder::from_snapshot(snapshot, &RouterConfig::for_testing(), factory)
        .build(None)
        .unwrap_err()
}

fn create_test_probe() -> (Arc<AnswerChannel>, mpsc::Receiver<Answer>) {
    let (sender, receiver) = mpsc::channel();
    let sender = parking_lot::Mutex::new(sender);
    let channel = AnswerChannel::with_callback(move |answer| {
        let _ = sender.lock().send(answer);
    });
    (channel, receiver)
}

fn target<'a>(table: &'a str, sql: &'a str) -> QueryTarget<'a> {
    QueryTarget {
        table,
        cluster: "",
        sql,
        params: &[],
    }
}

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Resolution
// =============================================================================

#[test]
fn test_hash_resolution_rewrites_table() {
    let map = create_test_map(create_test_snapshot());

    let route = map.resolve("user", "", 5, "select * from user where id = 5").unwrap();
    assert_eq!(route.group.master().host, "db-a");
    assert_eq!(route.database, "user_db");
    assert_eq!(route.sql, "select * from user_1 where id = 5");

    let route = map.resolve("user", "", -6, "delete from user where id = -6").unwrap();
    assert_eq!(route.group.master().host, "db-b");
    assert_eq!(route.sql, "delete from user_2 where id = -6");
}

#[test]
fn test_single_hash_table_keeps_name() {
    let map = create_test_map(create_test_snapshot());
    let route = map.resolve("config", "", 77, "select * from config").unwrap();
    assert_eq!(route.sql, "select * from config");
    assert_eq!(route.database, "common");
}

#[test]
fn test_range_resolution() {
    let map = create_test_map(create_test_snapshot());

    let route = map.resolve("orders", "", 150, "select * from orders").unwrap();
    assert_eq!(route.group.master().host, "db-b");
    assert_eq!(route.database, "shop_1");
    assert_eq!(route.sql, "select * from orders");

    assert_eq!(
        map.resolve("orders", "", 300, "select * from orders").err(),
        Some(RouterError::ShardIndexOutOfRange { index: 3, slots: 3 })
    );
    assert_eq!(
        map.resolve("orders", "", -1, "select * from orders").err(),
        Some(RouterError::InvalidShardKey(-1))
    );
}

#[test]
fn test_secondary_split_suffix() {
    let map = create_test_map(create_test_snapshot());
    let route = map.resolve("events", "", 1250, "select * from events").unwrap();
    assert_eq!(route.database, "shop_1");
    assert_eq!(route.sql, "select * from events2");
}

#[test]
fn test_secondary_suffix_uses_number_base() {
    let mut snapshot = create_test_snapshot();
    snapshot.settings.secondary_number_base = 10;
    let map = create_test_map(snapshot);
    let route = map.resolve("events", "", 1250, "select * from events").unwrap();
    assert_eq!(route.sql, "select * from events12");
}

#[test]
fn test_paired_slot_follows_parity() {
    let map = create_test_map(create_test_snapshot());
    assert_eq!(map.resolve("logs", "", 13, "select * from logs").unwrap().database, "archive_1_odd");
    assert_eq!(map.resolve("logs", "", 14, "select * from logs").unwrap().database, "archive_1_even");
    assert_eq!(map.resolve("logs", "", 3, "select * from logs").unwrap().database, "archive_0_odd");
}

#[test]
fn test_unknown_table() {
    let map = create_test_map(create_test_snapshot());
    assert_eq!(
        map.resolve("missing", "", 1, "select * from missing").err(),
        Some(RouterError::TableNotFound)
    );
    assert_eq!(map.split_type("missing", ""), None);
}

#[test]
fn test_cluster_scopes_tables() {
    let mut snapshot = create_test_snapshot();
    snapshot.tables.push(TableRow::hash("user", 1).in_cluster("eu"));
    let mut split = table_split("user", 0, 4, "user_eu");
    split.cluster = "eu".into();
    snapshot.table_splits.push(split);
    let map = create_test_map(snapshot);

    let route = map.resolve("user", "eu", 5, "select * from user").unwrap();
    assert_eq!(route.database, "user_eu");
    assert_eq!(route.sql, "select * from user");
}

// =============================================================================
// Metadata
// =============================================================================

#[test]
fn test_split_info() {
    let map = create_test_map(create_test_snapshot());
    assert_eq!(map.split_type("user", ""), Some(SplitType::Hash));
    assert_eq!(
        map.split_info("user", "").unwrap(),
        SplitInfo::Hash {
            table_count: 4,
            split_hint: String::new()
        }
    );
    let info = map.split_info("events", "").unwrap().to_json();
    assert_eq!(info["span"], 1000);
    assert_eq!(info["count"], 3);
    assert_eq!(info["databaseCategory"], "shop");
    assert_eq!(info["secondarySplit"], true);
    assert_eq!(info["secondarySplitSpan"], 100);
}

#[test]
fn test_category_info() {
    let map = create_test_map(create_test_snapshot());
    let archive = map.category_info("archive", "").unwrap();
    assert_eq!(archive.split_count, 2);
    assert_eq!(archive.odd_even_indexes, vec![0, 1]);

    let shop = map.category_info("shop", "").unwrap().to_json();
    assert_eq!(shop, json!({"splitCount": 3, "oddEvenCount": 0}));

    assert!(map.category_info("nope", "").is_err());
}

// =============================================================================
// Key reforming
// =============================================================================

#[test]
fn test_reform_hash_keys() {
    let map = create_test_map(create_test_snapshot());
    let reformed = map.reform_shard_keys("user", "", &[5, 9, -6, 2]).unwrap();
    assert_eq!(reformed.pairs[&1], BTreeSet::from([5, 9]));
    assert_eq!(reformed.pairs[&2], BTreeSet::from([-6, 2]));
    assert!(reformed.invalid.is_empty());
}

#[test]
fn test_reform_rejects_negative_when_configured() {
    let mut config = RouterConfig::for_testing();
    config.negative_keys = NegativeKeyPolicy::RejectAll;
    let map = create_test_map_with(create_test_snapshot(), config, None);
    let reformed = map.reform_shard_keys("user", "", &[5, -6]).unwrap();
    assert_eq!(reformed.invalid, BTreeSet::from([-6]));
    assert_eq!(reformed.pairs.len(), 1);
}

#[test]
fn test_reform_range_with_secondary() {
    let map = create_test_map(create_test_snapshot());
    let reformed = map.reform_shard_keys("events", "", &[1250, 1299, 5, 3500, -2]).unwrap();
    assert_eq!(reformed.pairs[&1200], BTreeSet::from([1250, 1299]));
    assert_eq!(reformed.pairs[&0], BTreeSet::from([5]));
    assert_eq!(reformed.invalid, BTreeSet::from([-2, 3500]));
}

#[test]
fn test_reform_paired_keeps_parity() {
    let map = create_test_map(create_test_snapshot());
    let reformed = map.reform_shard_keys("logs", "", &[13, 17, 14, 25]).unwrap();
    assert_eq!(reformed.pairs[&11], BTreeSet::from([13, 17]));
    assert_eq!(reformed.pairs[&10], BTreeSet::from([14]));
    assert_eq!(reformed.invalid, BTreeSet::from([25]));
}

#[test]
fn test_canonical_keys_reach_same_database() {
    let map = create_test_map(create_test_snapshot());
    for table in ["user", "orders", "events", "logs"] {
        let keys: Vec<i64> = (0..300).collect();
        let reformed = map.reform_shard_keys(table, "", &keys).unwrap();
        for (canonical, originals) in &reformed.pairs {
            let expected = map.resolve(table, "", *canonical, &format!("select * from {table}")).unwrap();
            for key in originals {
                let route = map.resolve(table, "", *key, &format!("select * from {table}")).unwrap();
                assert_eq!(route.database, expected.database);
                assert_eq!(route.sql, expected.sql);
                assert!(Arc::ptr_eq(&route.group, &expected.group));
            }
        }
    }
}

#[test]
fn test_all_shard_keys() {
    let map = create_test_map(create_test_snapshot());
    assert_eq!(map.all_shard_keys("user", "").unwrap(), BTreeSet::from([0, 1, 2, 3]));
    assert_eq!(map.all_shard_keys("config", "").unwrap(), BTreeSet::from([0]));
    assert_eq!(map.all_shard_keys("orders", "").unwrap(), BTreeSet::from([0, 100, 200]));
    assert_eq!(map.all_shard_keys("logs", "").unwrap(), BTreeSet::from([0, 1, 10, 11]));

    let events = map.all_shard_keys("events", "").unwrap();
    assert_eq!(events.len(), 30);
    assert!(events.contains(&2900));
}

// =============================================================================
// Enqueueing
// =============================================================================

#[test]
fn test_query_reaches_master() {
    let map = create_test_map(create_test_snapshot());
    let (channel, receiver) = create_test_probe();

    assert!(map.query(&target("user", "select * from user where id = 5"), 5, false, Reply::Direct(channel)));

    let answer = receiver.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(
        answer["rows"][0],
        json!(["db-a:3306", "user_db", "select * from user_1 where id = 5"])
    );
}

#[test]
fn test_forced_master_read_on_replicated_group() {
    let map = create_test_map(create_test_snapshot());
    for _ in 0..4 {
        let (channel, receiver) = create_test_probe();
        map.query(&target("orders", "select * from orders"), 150, true, Reply::Direct(channel));
        let answer = receiver.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(answer["rows"][0][0], "db-b:3306");
    }
}

#[test]
fn test_reads_spread_over_replicas() {
    let map = create_test_map(create_test_snapshot());
    let mut endpoints = BTreeSet::new();
    for _ in 0..20 {
        let (channel, receiver) = create_test_probe();
        map.query(&target("orders", "select * from orders"), 150, false, Reply::Direct(channel));
        let answer = receiver.recv_timeout(WAIT).unwrap().unwrap();
        endpoints.insert(answer["rows"][0][0].as_str().unwrap().to_string());
    }
    assert!(endpoints.iter().all(|e| e == "db-b:3306" || e == "db-b-r:3306"));
}

#[test]
fn test_unroutable_query_answers_not_found() {
    let map = create_test_map(create_test_snapshot());
    let (channel, receiver) = create_test_probe();
    assert!(!map.query(&target("missing", "select * from missing"), 1, false, Reply::Direct(channel)));
    let error = receiver.try_recv().unwrap().unwrap_err();
    assert_eq!(error.code, 100_404);
    assert_eq!(error.ex, "Target database or table not found.");
}

#[test]
fn test_out_of_range_key_answers_not_found() {
    let map = create_test_map(create_test_snapshot());
    let (channel, receiver) = create_test_probe();
    assert!(!map.query(&target("orders", "select * from orders"), 300, false, Reply::Direct(channel)));
    let error = receiver.try_recv().unwrap().unwrap_err();
    assert_eq!(error.code, 100_404);
}

#[test]
fn test_full_queue_answers_busy() {
    let mut config = RouterConfig::for_testing();
    config.limits.max_write_queue = 0;
    let map = create_test_map_with(create_test_snapshot(), config, None);
    let (channel, receiver) = create_test_probe();

    assert!(!map.query(&target("user", "update user set a = 1"), 1, true, Reply::Direct(channel)));
    let error = receiver.try_recv().unwrap().unwrap_err();
    assert_eq!(error.code, 100_513);
}

#[test]
fn test_transaction_on_one_database() {
    let map = create_test_map(create_test_snapshot());
    let (channel, receiver) = create_test_probe();
    let tables = vec!["user".to_string(), "user".to_string()];
    let sqls = vec![
        "update user set a = 1 where id = 1".to_string(),
        "update user set a = 2 where id = 4".to_string(),
    ];
    let request = TransactionTarget {
        keys: &[1, 4],
        tables: &tables,
        cluster: "",
        sqls: &sqls,
    };

    assert!(map.transaction(&request, channel));
    assert_eq!(receiver.recv_timeout(WAIT).unwrap().unwrap(), json!({}));
}

#[test]
fn test_transaction_across_groups_rejected() {
    let map = create_test_map(create_test_snapshot());
    let (channel, receiver) = create_test_probe();
    let tables = vec!["user".to_string(), "user".to_string()];
    let sqls = vec![
        "update user set a = 1".to_string(),
        "update user set a = 2".to_string(),
    ];
    let request = TransactionTarget {
        keys: &[1, 2],
        tables: &tables,
        cluster: "",
        sqls: &sqls,
    };

    assert!(!map.transaction(&request, channel));
    let error = receiver.try_recv().unwrap().unwrap_err();
    assert_eq!(error.code, 100_403);
    assert_eq!(
        error.ex,
        "Excepted index: 1 Excepted SQL: update user set a = 2. Reason: Target database or database instance is different from previous."
    );
}

// =============================================================================
// Builder
// =============================================================================

#[test]
fn test_empty_inputs_rejected() {
    let error = build_err(ConfigSnapshot::default());
    match &error {
        BuildError::Rejected { stage, issues } => {
            assert_eq!(*stage, BuildStage::Inputs);
            assert_eq!(
                issues,
                &vec![BuildIssue::NoServers, BuildIssue::NoTables, BuildIssue::NoSplits]
            );
        }
    }
    assert!(error.to_string().starts_with("shard map rejected at inputs stage"));
}

#[test]
fn test_missing_master_rejected() {
    let mut snapshot = create_test_snapshot();
    snapshot.servers.push(create_test_server(7, 99, "orphan"));
    snapshot.servers.push(create_test_server(1, 0, "dup"));
    let error = build_err(snapshot);
    assert_eq!(
        error.issues(),
        &[
            BuildIssue::DuplicateServer(1),
            BuildIssue::MissingMaster {
                server_id: 7,
                master_id: 99
            }
        ]
    );
}

#[test]
fn test_invalid_tables_rejected() {
    let mut snapshot = create_test_snapshot();
    snapshot.tables.push(TableRow::hash("broken", -1));
    snapshot.tables.push(TableRow::range("bad_secondary", "shop", 100).with_secondary(0));
    snapshot.tables.push(TableRow::hash("user", 2));
    let error = build_err(snapshot);
    assert!(matches!(error, BuildError::Rejected { stage: BuildStage::Tables, .. }));
    assert_eq!(error.issues().len(), 3);
}

#[test]
fn test_default_span_must_be_positive() {
    let mut snapshot = create_test_snapshot();
    snapshot.settings.default_split_span = 0;
    let error = build_err(snapshot);
    assert_eq!(error.issues(), &[BuildIssue::InvalidSplitSpan("events".into())]);
}

#[test]
fn test_duplicate_table_split_rejected() {
    let mut snapshot = create_test_snapshot();
    snapshot.table_splits.push(table_split("user", 3, 1, "other"));
    snapshot.table_splits.push(table_split("user", 2, 42, "other"));
    let error = build_err(snapshot);
    assert!(matches!(error, BuildError::Rejected { stage: BuildStage::TableSplits, .. }));
    assert_eq!(error.issues().len(), 2);
}

#[test]
fn test_unassigned_table_split_rejected() {
    let mut snapshot = create_test_snapshot();
    snapshot.table_splits.retain(|row| !(row.table_name == "user" && row.table_number % 2 == 1));
    let error = build_err(snapshot);
    assert!(matches!(error, BuildError::Rejected { stage: BuildStage::TableSplits, .. }));
    assert_eq!(
        error.issues(),
        &[
            BuildIssue::UnassignedTableSplit {
                table: "user".into(),
                number: 1
            },
            BuildIssue::UnassignedTableSplit {
                table: "user".into(),
                number: 3
            },
        ]
    );
}

#[test]
fn test_stray_split_rows_skipped() {
    let mut snapshot = create_test_snapshot();
    snapshot.table_splits.push(table_split("ghost", 0, 1, "ghost"));
    snapshot.table_splits.push(table_split("user", 9, 1, "user_db"));
    let map = create_test_map(snapshot);
    assert_eq!(map.table_count(), 5);
}

#[test]
fn test_mixed_parity_rejected() {
    let mut snapshot = create_test_snapshot();
    snapshot.range_splits.push(range_split("archive", 2, 0, 1, "archive_2"));
    let error = build_err(snapshot);
    assert_eq!(error.issues(), &[BuildIssue::MixedParity("archive".into())]);
}

#[test]
fn test_range_gaps_and_conflicts_rejected() {
    let mut snapshot = create_test_snapshot();
    snapshot.range_splits.push(range_split("shop", 4, 0, 1, "shop_4"));
    snapshot.range_splits.push(range_split("shop", 0, 0, 2, "shop_0b"));
    snapshot.range_splits.push(range_split("shop", 5, 7, 2, "bad"));
    let error = build_err(snapshot);
    assert!(matches!(error, BuildError::Rejected { stage: BuildStage::RangeSplits, .. }));
    let issues = error.issues();
    assert!(issues.contains(&BuildIssue::RangeGap {
        category: "shop".into(),
        index: 3
    }));
    assert!(issues.iter().any(|i| matches!(i, BuildIssue::RangeConflict { index: 0, .. })));
    assert!(issues.iter().any(|i| matches!(i, BuildIssue::InvalidIndexType { index_type: 7, .. })));
}

#[test]
fn test_half_paired_slot_is_gap() {
    let mut snapshot = create_test_snapshot();
    snapshot.range_splits.push(range_split("archive", 2, 1, 1, "archive_2_odd"));
    let error = build_err(snapshot);
    assert_eq!(
        error.issues(),
        &[BuildIssue::RangeGap {
            category: "archive".into(),
            index: 2
        }]
    );
}

#[test]
fn test_unused_servers_get_no_group() {
    let mut snapshot = create_test_snapshot();
    snapshot.servers.push(create_test_server(9, 0, "idle"));
    let map = create_test_map(snapshot);
    assert_eq!(map.groups().len(), 3);
    assert!(map.groups().iter().all(|g| g.master().host != "idle"));
}

#[test]
fn test_rebuild_reuses_groups() {
    let first = create_test_map(create_test_snapshot());

    let mut snapshot = create_test_snapshot();
    snapshot.settings.update_time = 200;
    snapshot.servers[3].host = "db-c2".into();
    let second = create_test_map_with(snapshot, RouterConfig::for_testing(), Some(&first));

    let old_a = first.resolve("user", "", 0, "select * from user").unwrap().group;
    let new_a = second.resolve("user", "", 0, "select * from user").unwrap().group;
    assert!(Arc::ptr_eq(&old_a, &new_a));

    let old_c = first.resolve("orders", "", 250, "select * from orders").unwrap().group;
    let new_c = second.resolve("orders", "", 250, "select * from orders").unwrap().group;
    assert!(!Arc::ptr_eq(&old_c, &new_c));
    assert_eq!(new_c.master().host, "db-c2");

    first.sign_taken_over(&second);
    assert!(first.deletable());
    assert_eq!(second.update_time(), 200);
}

#[test]
fn test_retired_map_waits_for_busy_group() {
    let factory = MockDriverFactory::new();
    let shared: Arc<dyn DriverFactory> = Arc::new(factory.clone());
    let config = RouterConfig::for_testing();
    let first = ShardMapBuilder::from_snapshot(create_test_snapshot(), &config, Arc::clone(&shared))
        .build(None)
        .unwrap();

    factory.hold();
    let (channel, receiver) = create_test_probe();
    first.query(
        &target("orders", "insert into orders values (250)"),
        250,
        true,
        Reply::Direct(channel),
    );

    let mut snapshot = create_test_snapshot();
    snapshot.settings.update_time = 200;
    snapshot.servers[3].host = "db-c2".into();
    let second = ShardMapBuilder::from_snapshot(snapshot, &config, shared)
        .build(Some(&first))
        .unwrap();
    first.sign_taken_over(&second);

    // db-c is owned by the retired map alone and still has the write.
    assert!(!first.deletable());

    factory.release();
    let answer = receiver.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(answer["affectedRows"], 1);
    assert_eq!(factory.executed()[0].endpoint, "db-c:3306");

    let deadline = std::time::Instant::now() + WAIT;
    while !first.deletable() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(first.deletable());
}

#[test]
fn test_status_lists_groups() {
    let map = create_test_map(create_test_snapshot());
    let status = map.status();
    assert_eq!(status["configUpdateTime"], 100);
    assert_eq!(status["dbGroupInfos"].as_array().unwrap().len(), 3);
}
