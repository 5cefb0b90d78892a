//! Integration tests for server selection and failover.
//!
//! A scripted driver stands in for real servers so the tests can decide which
//! servers are reachable and observe which ones were connected to.

use async_trait::async_trait;
use querykit::db::{ConnectionManager, Driver, DriverConnection};
use querykit::error::{DbError, DbResult};
use querykit::models::{
    BalanceStrategy, ConnectionConfig, ConnectionMode, DatabaseType, ExecOutcome, QueryParam, Row,
    Server, ServerRole,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Connects to every server except the ones listed as down.
#[derive(Default)]
struct ScriptedDriver {
    down: HashSet<String>,
    connects: Arc<Mutex<Vec<String>>>,
}

impl ScriptedDriver {
    fn with_down(servers: &[&str]) -> Self {
        Self {
            down: servers.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }
}

struct ScriptedConnection {
    server: String,
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn connect(
        &self,
        _config: &ConnectionConfig,
        server: &Server,
    ) -> DbResult<Box<dyn DriverConnection>> {
        if self.down.contains(&server.name) {
            return Err(DbError::connection(
                format!("{} refused the connection", server.name),
                "Check the server",
            ));
        }
        self.connects.lock().unwrap().push(server.name.clone());
        Ok(Box::new(ScriptedConnection {
            server: server.name.clone(),
        }))
    }
}

#[async_trait]
impl DriverConnection for ScriptedConnection {
    async fn fetch_all(&mut self, _sql: &str, _params: &[QueryParam]) -> DbResult<Vec<Row>> {
        let row = json!({ "server": self.server }).as_object().cloned().unwrap();
        Ok(vec![row])
    }

    async fn execute(&mut self, _sql: &str, _params: &[QueryParam]) -> DbResult<ExecOutcome> {
        Ok(ExecOutcome::default())
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        Ok(())
    }
}

fn replicas_config(strategy: BalanceStrategy) -> ConnectionConfig {
    ConnectionConfig::new(
        "app",
        DatabaseType::MySQL,
        "shop",
        vec![
            Server::new("primary", "10.0.0.1", ServerRole::Primary),
            Server::new("replica1", "10.0.0.2", ServerRole::Read),
            Server::new("replica2", "10.0.0.3", ServerRole::Read),
        ],
    )
    .with_strategy(strategy)
}

async fn manager_with(driver: ScriptedDriver, config: ConnectionConfig) -> ConnectionManager {
    let manager = ConnectionManager::with_driver(Arc::new(driver));
    manager.register(config).await.unwrap();
    manager
}

async fn pick(manager: &ConnectionManager, force_write: bool) -> String {
    manager
        .get_connection("app", force_write)
        .await
        .unwrap()
        .server_name()
        .to_string()
}

#[tokio::test]
async fn test_round_robin_cycles_through_read_replicas() {
    let manager = manager_with(
        ScriptedDriver::default(),
        replicas_config(BalanceStrategy::RoundRobin),
    )
    .await;

    let picks = vec![
        pick(&manager, false).await,
        pick(&manager, false).await,
        pick(&manager, false).await,
    ];
    assert_eq!(picks, vec!["replica1", "replica2", "replica1"]);
}

#[tokio::test]
async fn test_write_mode_uses_primary() {
    let manager = manager_with(
        ScriptedDriver::default(),
        replicas_config(BalanceStrategy::RoundRobin),
    )
    .await;

    let handle = manager.get_connection("app", true).await.unwrap();
    assert_eq!(handle.server_name(), "primary");
    assert_eq!(handle.mode(), ConnectionMode::Write);
}

#[tokio::test]
async fn test_write_default_mode() {
    let config = replicas_config(BalanceStrategy::RoundRobin).with_default_mode(ConnectionMode::Write);
    let manager = manager_with(ScriptedDriver::default(), config).await;
    assert_eq!(pick(&manager, false).await, "primary");
}

#[tokio::test]
async fn test_read_falls_back_to_primary_without_replicas() {
    let config = ConnectionConfig::new(
        "app",
        DatabaseType::PostgreSQL,
        "shop",
        vec![Server::new("primary", "10.0.0.1", ServerRole::Primary)],
    );
    let manager = manager_with(ScriptedDriver::default(), config).await;
    assert_eq!(pick(&manager, false).await, "primary");
}

#[tokio::test]
async fn test_least_connections_prefers_idle_servers() {
    let manager = manager_with(
        ScriptedDriver::default(),
        replicas_config(BalanceStrategy::LeastConnections),
    )
    .await;

    // Ties go to registration order; an opened handle raises the count.
    assert_eq!(pick(&manager, false).await, "replica1");
    assert_eq!(pick(&manager, false).await, "replica2");

    manager.close_server("app", "replica1").await.unwrap();
    let counts = manager.open_handles("app").await.unwrap();
    assert_eq!(counts["replica1"], 0);
    assert_eq!(counts["replica2"], 1);

    assert_eq!(pick(&manager, false).await, "replica1");
}

#[tokio::test]
async fn test_random_stays_within_eligible_servers() {
    let manager = manager_with(
        ScriptedDriver::default(),
        replicas_config(BalanceStrategy::Random),
    )
    .await;
    for _ in 0..20 {
        let server = pick(&manager, false).await;
        assert!(server == "replica1" || server == "replica2", "picked {server}");
    }
}

#[tokio::test]
async fn test_failover_skips_unreachable_server() {
    let driver = ScriptedDriver::with_down(&["replica1"]);
    let connects = driver.connects.clone();
    let manager = manager_with(driver, replicas_config(BalanceStrategy::RoundRobin)).await;

    assert_eq!(pick(&manager, false).await, "replica2");
    assert_eq!(*connects.lock().unwrap(), vec!["replica2".to_string()]);
}

#[tokio::test]
async fn test_all_servers_down_is_a_connection_error() {
    let driver = ScriptedDriver::with_down(&["replica1", "replica2"]);
    let manager = manager_with(driver, replicas_config(BalanceStrategy::RoundRobin)).await;

    let err = manager.get_connection("app", false).await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }), "got {err:?}");

    // The primary is not a READ candidate while read replicas are configured.
    let writer = manager.get_connection("app", true).await.unwrap();
    assert_eq!(writer.server_name(), "primary");
}

#[tokio::test]
async fn test_handles_are_reused_and_released_on_disconnect() {
    let driver = ScriptedDriver::default();
    let connects = driver.connects.clone();
    let manager = manager_with(driver, replicas_config(BalanceStrategy::RoundRobin)).await;

    for _ in 0..4 {
        manager.get_connection("app", false).await.unwrap();
    }
    assert_eq!(connects.lock().unwrap().len(), 2);

    let handle = manager.get_connection("app", false).await.unwrap();
    let rows = handle.fetch_all("SELECT 1", &[]).await.unwrap();
    assert_eq!(rows[0]["server"], json!(handle.server_name()));

    manager.disconnect("app").await.unwrap();
    assert!(handle.is_closed());
    assert!(matches!(
        manager.get_connection("app", false).await,
        Err(DbError::ConnectionNotFound { .. })
    ));
}

#[tokio::test]
async fn test_list_connections_hides_credentials() {
    let mut config = replicas_config(BalanceStrategy::RoundRobin);
    config.servers[0] = config.servers[0]
        .clone()
        .with_credentials("admin", "s3cret");
    let manager = manager_with(ScriptedDriver::default(), config).await;

    let listed = manager.list_connections().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].servers, vec!["primary", "replica1", "replica2"]);
    let text = serde_json::to_string(&listed).unwrap();
    assert!(!text.contains("s3cret"));
}
