//! # SQLite Flows
//!
//! Route, execute and aggregate against real SQLite instance directories:
//!
//! 1. **Single shard**: writes land in the physical table the key hashes to
//! 2. **Fan-out**: per-shard row sets merge into one answer, ordered by shard
//! 3. **Transactions**: commit and rollback on one physical database
//! 4. **Driver errors**: surface with the `database` raiser

#[cfg(test)]
mod tests {
    use dbp_routing::{hash_shard_index, hash_string_key};
    use serde_json::json;

    use crate::fixtures::{ask, TestDeployment};

    #[test]
    fn test_single_shard_write_then_read() {
        let deployment = TestDeployment::new();
        let router = deployment.start_router();

        let written = ask(
            &*router,
            "query",
            json!({"hintId": 3, "sql": "insert into user (id, name) values (3, 'carol')"}),
        )
        .unwrap();
        assert_eq!(written["affectedRows"], json!(1));
        assert_eq!(written["insertId"], json!(3));

        // Key 3 hashes to shard 1 on inst-b.
        assert_eq!(
            deployment.rows("inst-b", "user_db", "SELECT id, name FROM user_1"),
            vec![(3, "carol".to_string())]
        );
        assert!(deployment.rows("inst-a", "user_db", "SELECT id, name FROM user_0").is_empty());

        let read = ask(
            &*router,
            "query",
            json!({"hintId": 3, "sql": "select id, name from user where id = 3"}),
        )
        .unwrap();
        assert_eq!(read, json!({"fields": ["id", "name"], "rows": [["3", "carol"]]}));
        router.shutdown();
    }

    #[test]
    fn test_params_are_escaped_by_the_driver() {
        let deployment = TestDeployment::new();
        let router = deployment.start_router();

        ask(
            &*router,
            "query",
            json!({
                "hintId": 2,
                "sql": "insert into user (id, name) values (?, '?')",
                "params": ["2", "o'neil"],
            }),
        )
        .unwrap();

        assert_eq!(
            deployment.rows("inst-a", "user_db", "SELECT id, name FROM user_0"),
            vec![(2, "o'neil".to_string())]
        );
        router.shutdown();
    }

    #[test]
    fn test_fan_out_merges_rows_by_shard() {
        let deployment = TestDeployment::new();
        deployment.execute("inst-a", "user_db", "INSERT INTO user_0 VALUES (2, 'bob'), (4, 'dave')");
        deployment.execute("inst-b", "user_db", "INSERT INTO user_1 VALUES (1, 'ann'), (3, 'carol')");
        let router = deployment.start_router();

        let answer = ask(
            &*router,
            "iQuery",
            json!({"hintIds": [1, 2, 3, 4], "sql": "select id, name from user order by id"}),
        )
        .unwrap();
        assert_eq!(answer["fields"], json!(["id", "name"]));
        assert_eq!(
            answer["rows"],
            json!([["2", "bob"], ["4", "dave"], ["1", "ann"], ["3", "carol"]])
        );
        assert_eq!(answer["failedIds"], json!([]));
        assert_eq!(answer["invalidIds"], json!([]));

        let everywhere = ask(
            &*router,
            "iQuery",
            json!({"hintIds": [], "sql": "select count(*), 'n' from user"}),
        )
        .unwrap();
        assert_eq!(everywhere["rows"], json!([["2", "n"], ["2", "n"]]));
        router.shutdown();
    }

    #[test]
    fn test_range_table_routes_by_slot() {
        let deployment = TestDeployment::new();
        let router = deployment.start_router();

        for (key, item) in [(50, "pen"), (150, "ink")] {
            ask(
                &*router,
                "query",
                json!({"hintId": key, "sql": format!("insert into orders values ({key}, '{item}')")}),
            )
            .unwrap();
        }

        assert_eq!(
            deployment.rows("inst-a", "shop_0", "SELECT id, item FROM orders"),
            vec![(50, "pen".to_string())]
        );
        assert_eq!(
            deployment.rows("inst-b", "shop_1", "SELECT id, item FROM orders"),
            vec![(150, "ink".to_string())]
        );

        let beyond = ask(
            &*router,
            "iQuery",
            json!({"hintIds": [50, 150, 900], "sql": "select id, item from orders"}),
        )
        .unwrap();
        assert_eq!(beyond["rows"], json!([["50", "pen"], ["150", "ink"]]));
        assert_eq!(beyond["invalidIds"], json!([900]));
        router.shutdown();
    }

    #[test]
    fn test_string_keys_hash_to_shards() {
        let deployment = TestDeployment::new();
        let router = deployment.start_router();

        let key = "alice";
        let shard = hash_shard_index(hash_string_key(key), 2);
        ask(
            &*router,
            "sQuery",
            json!({"hintIds": [key], "sql": "insert into user (id, name) values (10, 'alice')"}),
        )
        .unwrap();

        let (host, table) = if shard == 0 { ("inst-a", "user_0") } else { ("inst-b", "user_1") };
        assert_eq!(
            deployment.rows(host, "user_db", &format!("SELECT id, name FROM {table}")),
            vec![(10, "alice".to_string())]
        );
        router.shutdown();
    }

    #[test]
    fn test_transaction_commits_and_rolls_back() {
        let deployment = TestDeployment::new();
        let router = deployment.start_router();

        let committed = ask(
            &*router,
            "transaction",
            json!({
                "hintIds": [1, 3],
                "tableNames": ["user", "user"],
                "sqls": [
                    "insert into user (id, name) values (1, 'ann')",
                    "insert into user (id, name) values (3, 'carol')",
                ],
            }),
        )
        .unwrap();
        assert_eq!(committed, json!({}));
        assert_eq!(
            deployment.rows("inst-b", "user_db", "SELECT id, name FROM user_1 ORDER BY id").len(),
            2
        );

        let failed = ask(
            &*router,
            "transaction",
            json!({
                "hintIds": [5, 5],
                "tableNames": ["user", "user"],
                "sqls": [
                    "insert into user (id, name) values (5, 'eve')",
                    "insert into user (id, name) values (3, 'dup')",
                ],
            }),
        )
        .unwrap_err();
        assert_eq!(failed.code, 100_502);
        assert_eq!(failed.raiser, "database");
        assert!(failed.ex.starts_with("Excepted index: 1"), "{}", failed.ex);

        // The first statement was rolled back with the second.
        assert_eq!(
            deployment.rows("inst-b", "user_db", "SELECT id, name FROM user_1 ORDER BY id"),
            vec![(1, "ann".to_string()), (3, "carol".to_string())]
        );
        router.shutdown();
    }

    #[test]
    fn test_transaction_across_databases_rejected() {
        let deployment = TestDeployment::new();
        let router = deployment.start_router();

        let error = ask(
            &*router,
            "transaction",
            json!({
                "hintIds": [0, 1],
                "tableNames": ["user", "user"],
                "sqls": ["delete from user", "delete from user"],
            }),
        )
        .unwrap_err();
        assert_eq!(error.code, 100_403);
        router.shutdown();
    }

    #[test]
    fn test_driver_error_surfaces() {
        let deployment = TestDeployment::new();
        let router = deployment.start_router();

        let error = ask(
            &*router,
            "query",
            json!({"hintId": 0, "sql": "select missing_column from user"}),
        )
        .unwrap_err();
        assert_eq!(error.code, 100_502);
        assert_eq!(error.raiser, "database");
        assert!(error.ex.starts_with("[Database Exception]"), "{}", error.ex);
        router.shutdown();
    }
}
