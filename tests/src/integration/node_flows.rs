//! # Node Flows
//!
//! The TCP node in front of a SQLite deployment, driven by the query tool's
//! client.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use dbp_node::{build_router, serve, NodeConfig};
    use dbp_query::{call, render_answer, ClientError, QueryArgs};
    use dbp_routing::{PoolConfig, RouterApi, WatcherConfig};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::sync::watch;

    use crate::fixtures::{wait_until, TestDeployment};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn create_test_config(deployment: &TestDeployment) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.source.config_dbs = vec![deployment.config_db()];
        config.source.data_dir = deployment.data_dir();
        config.router.pool = PoolConfig::for_testing();
        config.router.watcher = WatcherConfig::for_testing();
        config
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_query_tool_against_node() {
        let deployment = TestDeployment::new();
        deployment.execute("inst-b", "user_db", "INSERT INTO user_1 VALUES (1, 'ann')");
        let config = create_test_config(&deployment);
        config.validate().unwrap();

        let router = Arc::new(build_router(&config).unwrap());
        assert!(wait_until(|| router.watcher().current().is_some()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let api: Arc<dyn RouterApi> = router.clone();
        let server = tokio::spawn(serve(listener, api, shutdown_rx));

        let select = QueryArgs {
            hint_id: 1,
            sql: "select id, name from user".into(),
            ..QueryArgs::default()
        };
        let answer = call(&address, "query", select.to_json(), TIMEOUT).await.unwrap();
        assert_eq!(answer, json!({"fields": ["id", "name"], "rows": [["1", "ann"]]}));
        assert!(render_answer(&answer).ends_with("1 row(s)"));

        let insert = QueryArgs {
            hint_id: 1,
            table_name: Some("user".into()),
            sql: "insert into user (id, name) values (?, '?')".into(),
            params: vec!["3".into(), "carol".into()],
            ..QueryArgs::default()
        };
        let answer = call(&address, "query", insert.to_json(), TIMEOUT).await.unwrap();
        assert_eq!(render_answer(&answer), "Affected rows: 1, insert id: 3");

        let fan_out = call(
            &address,
            "iQuery",
            json!({"hintIds": [1, 3], "sql": "select id from user order by id"}),
            TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(fan_out["rows"], json!([["1"], ["3"]]));

        let infos = call(&address, "infos", json!({}), TIMEOUT).await.unwrap();
        assert_eq!(infos["current"]["configUpdateTime"], json!(100));

        let metrics = call(&address, "metrics", json!({}), TIMEOUT).await.unwrap();
        assert!(metrics.as_str().unwrap().contains("dbp_request_duration_seconds"));

        let error = call(&address, "query", json!({"hintId": 1, "sql": "drop table user"}), TIMEOUT)
            .await
            .unwrap_err();
        match error {
            ClientError::Answer { code, raiser, .. } => {
                assert_eq!(code, 100_403);
                assert_eq!(raiser, "DBProxy");
            }
            other => panic!("unexpected error: {other}"),
        }

        shutdown_tx.send(true).unwrap();
        server.await.unwrap().unwrap();
        tokio::task::spawn_blocking(move || router.shutdown()).await.unwrap();
    }
}
