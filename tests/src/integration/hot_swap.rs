//! # Hot Swap Flows
//!
//! Configuration changes picked up by a running router:
//!
//! 1. A bumped update time publishes a new map; unchanged groups are reused
//! 2. A store that appears late ends the `Unconfigured` period
//! 3. Unreachable stores are skipped in favour of the next endpoint
//! 4. Traffic queued before a swap still gets answered

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use dbp_routing::{RouterApi, TableRow, TableSplitRow};
    use serde_json::json;

    use crate::fixtures::{ask, create_test_snapshot, wait_until, TestDeployment};

    #[test]
    fn test_new_table_after_update() {
        let deployment = TestDeployment::new();
        let router = deployment.start_router();

        let missing = ask(&*router, "splitInfo", json!({"tableName": "audit"})).unwrap_err();
        assert_eq!(missing.code, 100_404);
        let before = router.watcher().current().unwrap();

        let mut snapshot = create_test_snapshot(200);
        snapshot.tables.push(TableRow::hash("audit", 0));
        snapshot.table_splits.push(TableSplitRow {
            table_name: "audit".to_string(),
            cluster: String::new(),
            table_number: 0,
            server_id: 1,
            database_name: "audit_db".to_string(),
        });
        deployment.write_config(&snapshot);
        deployment.execute("inst-a", "audit_db", "CREATE TABLE audit (id INTEGER, note TEXT)");

        assert!(wait_until(|| router
            .watcher()
            .current()
            .is_some_and(|map| map.update_time() == 200)));
        let after = router.watcher().current().unwrap();

        // Same servers, same groups.
        assert_eq!(before.groups().len(), after.groups().len());
        for group in after.groups() {
            assert!(before.groups().iter().any(|old| Arc::ptr_eq(old, group)));
        }

        let info = ask(&*router, "splitInfo", json!({"tableName": "audit"})).unwrap();
        assert_eq!(info["splitByRange"], json!(false));
        ask(
            &*router,
            "query",
            json!({"hintId": 7, "sql": "insert into audit values (7, 'swapped')"}),
        )
        .unwrap();
        assert_eq!(
            deployment.rows("inst-a", "audit_db", "SELECT id, note FROM audit"),
            vec![(7, "swapped".to_string())]
        );

        // The retired map drains once nothing references it.
        drop(before);
        assert!(wait_until(|| router.watcher().retiring_count() == 0));
        router.shutdown();
    }

    #[test]
    fn test_refresh_rebuilds_without_update() {
        let deployment = TestDeployment::new();
        let router = deployment.start_router();
        let before = router.watcher().current().unwrap();

        assert_eq!(ask(&*router, "refresh", json!({})).unwrap(), json!({}));
        assert!(wait_until(|| router
            .watcher()
            .current()
            .is_some_and(|map| !Arc::ptr_eq(&map, &before))));
        router.shutdown();
    }

    #[test]
    fn test_late_config_store() {
        let deployment = TestDeployment::empty();
        let router = deployment.start_router_with(vec![deployment.config_db()]);

        let error = ask(&*router, "allSplitHintIds", json!({"tableName": "user"})).unwrap_err();
        assert_eq!(error.code, 100_503);
        assert_eq!(error.ex, "DB unconfigured.");

        deployment.write_config(&create_test_snapshot(100));
        assert!(wait_until(|| router.watcher().current().is_some()));

        let keys = ask(&*router, "allSplitHintIds", json!({"tableName": "user"})).unwrap();
        assert_eq!(keys, json!({"hintIds": [0, 1]}));
        router.shutdown();
    }

    #[test]
    fn test_unreachable_store_skipped() {
        let deployment = TestDeployment::new();
        let router = deployment.start_router_with(vec![
            deployment.path().join("missing.sqlite"),
            deployment.config_db(),
        ]);

        assert!(wait_until(|| router.watcher().current().is_some()));
        let info = ask(&*router, "categoryInfo", json!({"databaseCategory": "shop"})).unwrap();
        assert_eq!(info["splitCount"], json!(2));
        router.shutdown();
    }

    #[test]
    fn test_traffic_during_swap_is_answered() {
        let deployment = TestDeployment::new();
        deployment.execute("inst-a", "user_db", "INSERT INTO user_0 VALUES (2, 'bob')");
        let router = deployment.start_router();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let router = Arc::clone(&router);
                thread::spawn(move || {
                    (0..25)
                        .map(|_| {
                            ask(
                                &*router as &dyn RouterApi,
                                "query",
                                json!({"hintId": 2, "sql": "select id, name from user"}),
                            )
                        })
                        .filter(Result::is_ok)
                        .count()
                })
            })
            .collect();

        for update_time in 101..106 {
            deployment.write_config(&create_test_snapshot(update_time));
            router.watcher().refresh();
        }

        let answered: usize = readers.into_iter().map(|r| r.join().unwrap()).sum();
        // Queued tasks on a retired map still run on the shared groups.
        assert_eq!(answered, 100);
        router.shutdown();
    }
}
