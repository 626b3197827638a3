//! SurrealDB connection management.
//!
//! [`DbManager`] owns the storage connection and publishes its
//! [`ConnectionState`]. A supervisor task connects with retry, bootstraps
//! the collection schema, then health-checks the connection and
//! reconnects when it is lost. Callers never block on it: they ask
//! [`DbManager::is_ready`] or take the current client, if any.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use surrealdb::Surreal;
use surrealdb::engine::any::{self, Any};
use surrealdb::opt::auth::Root;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::DbError;
use crate::repository::SurrealEntityRepository;
use crate::schema::{self, DEFAULT_TABLE, TableName};

/// Configuration for connecting to SurrealDB.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Engine endpoint (e.g., `ws://127.0.0.1:8000`, or `mem://` for an
    /// embedded in-memory store).
    pub endpoint: String,
    /// SurrealDB namespace.
    pub namespace: String,
    /// SurrealDB database name.
    pub database: String,
    /// Collection table name.
    pub table: String,
    /// Root username; sign-in is skipped unless both credentials are set.
    pub username: Option<String>,
    /// Root password.
    pub password: Option<String>,
    /// Delay between connection attempts (default: 5 seconds).
    pub retry_delay: Duration,
    /// Consecutive failed attempts before giving up (default: never).
    pub max_attempts: Option<u32>,
    /// Interval between health checks once connected (default: 5 seconds).
    pub health_interval: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8000".into(),
            namespace: "entistore".into(),
            database: "main".into(),
            table: DEFAULT_TABLE.into(),
            username: Some("root".into()),
            password: Some("root".into()),
            retry_delay: Duration::from_secs(5),
            max_attempts: None,
            health_interval: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    /// An embedded, non-persistent store. Each connection starts empty.
    pub fn in_memory() -> Self {
        Self {
            endpoint: "mem://".into(),
            username: None,
            password: None,
            retry_delay: Duration::from_millis(100),
            ..Self::default()
        }
    }
}

/// Lifecycle of the storage connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// Manages the connection to SurrealDB.
#[derive(Clone)]
pub struct DbManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: DbConfig,
    table: TableName,
    state: watch::Sender<ConnectionState>,
    client: RwLock<Option<Surreal<Any>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl DbManager {
    /// Creates a disconnected manager. Fails only on an invalid table name.
    pub fn new(config: DbConfig) -> Result<Self, DbError> {
        let table = TableName::parse(config.table.clone())?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                table,
                state,
                client: RwLock::new(None),
                supervisor: Mutex::new(None),
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Whether storage is currently usable.
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receives every state transition.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// The current client, while connected.
    pub fn client(&self) -> Option<Surreal<Any>> {
        if !self.is_ready() {
            return None;
        }
        self.inner
            .client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// An entity store over the current client, while connected.
    pub fn repository(&self) -> Option<SurrealEntityRepository<Any>> {
        self.client()
            .map(|db| SurrealEntityRepository::new(db, self.inner.table.clone()))
    }

    /// Starts the connection supervisor.
    ///
    /// A no-op while a supervisor is already connecting or connected.
    /// Must be called from within a Tokio runtime.
    pub fn connect_with_retry(&self) {
        let mut supervisor = lock(&self.inner.supervisor);
        if supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Connection supervisor already running");
            return;
        }
        self.inner.publish(ConnectionState::Connecting);
        *supervisor = Some(tokio::spawn(supervise(Arc::clone(&self.inner))));
    }

    /// Waits until the manager reports [`ConnectionState::Connected`].
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), DbError> {
        let mut states = self.subscribe();
        let connected = tokio::time::timeout(
            timeout,
            states.wait_for(|state| *state == ConnectionState::Connected),
        )
        .await;

        match connected {
            Ok(Ok(_)) => Ok(()),
            _ => Err(DbError::NotReady(timeout)),
        }
    }

    /// Stops the supervisor and drops the client.
    pub async fn disconnect(&self) {
        let supervisor = lock(&self.inner.supervisor).take();
        if let Some(task) = supervisor {
            task.abort();
            let _ = task.await;
        }

        let client = self
            .inner
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if client.is_some() {
            info!(endpoint = %self.inner.config.endpoint, "Disconnecting");
        }
        drop(client);

        self.inner.publish(ConnectionState::Disconnected);
        info!("Disconnected");
    }
}

impl Inner {
    fn publish(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    fn set_client(&self, client: Option<Surreal<Any>>) {
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = client;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// -----------------------------------------------------------------------
// Supervisor
// -----------------------------------------------------------------------

async fn supervise(inner: Arc<Inner>) {
    loop {
        let Some(db) = establish(&inner).await else {
            inner.publish(ConnectionState::Disconnected);
            return;
        };
        inner.set_client(Some(db.clone()));
        inner.publish(ConnectionState::Connected);

        monitor(&inner, &db).await;

        error!(endpoint = %inner.config.endpoint, "Connection to SurrealDB lost");
        inner.set_client(None);
        inner.publish(ConnectionState::Connecting);
    }
}

/// Connects with retry. Returns `None` once `max_attempts` is exhausted.
async fn establish(inner: &Inner) -> Option<Surreal<Any>> {
    let config = &inner.config;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        info!(attempt, endpoint = %config.endpoint, "Starting connection");

        match open(config, &inner.table).await {
            Ok(db) => {
                info!(attempt, "Connection established");
                return Some(db);
            }
            Err(err) if config.max_attempts.is_some_and(|max| attempt >= max) => {
                error!(attempt, error = %err, "Connection unsuccessful, giving up");
                return None;
            }
            Err(err) => {
                warn!(
                    attempt,
                    error = %err,
                    retry_in_ms = config.retry_delay.as_millis() as u64,
                    "Connection unsuccessful, retrying"
                );
                tokio::time::sleep(config.retry_delay).await;
            }
        }
    }
}

/// Opens a client, selects namespace and database, and bootstraps the
/// collection.
async fn open(config: &DbConfig, table: &TableName) -> Result<Surreal<Any>, DbError> {
    let db = any::connect(config.endpoint.as_str()).await?;

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        db.signin(Root {
            username: username.clone(),
            password: password.clone(),
        })
        .await?;
    }

    db.use_ns(&config.namespace)
        .use_db(&config.database)
        .await?;

    schema::bootstrap(&db, table).await?;
    Ok(db)
}

/// Returns when a health check fails.
async fn monitor(inner: &Inner, db: &Surreal<Any>) {
    let mut ticker = tokio::time::interval(inner.config.health_interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(err) = ping(db).await {
            warn!(error = %err, "Health check failed");
            return;
        }
    }
}

async fn ping(db: &Surreal<Any>) -> Result<(), DbError> {
    db.query("RETURN true").await?.check()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_retries_forever_every_five_seconds() {
        let config = DbConfig::default();
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert!(config.max_attempts.is_none());
        assert_eq!(config.table, DEFAULT_TABLE);
    }

    #[test]
    fn in_memory_config_skips_sign_in() {
        let config = DbConfig::in_memory();
        assert_eq!(config.endpoint, "mem://");
        assert!(config.username.is_none());
        assert!(config.password.is_none());
    }

    #[test]
    fn new_manager_is_disconnected() {
        let manager = DbManager::new(DbConfig::in_memory()).unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_ready());
        assert!(manager.client().is_none());
        assert!(manager.repository().is_none());
    }

    #[test]
    fn invalid_table_is_rejected() {
        let config = DbConfig {
            table: "Bad Table".into(),
            ..DbConfig::in_memory()
        };
        assert!(matches!(
            DbManager::new(config),
            Err(DbError::InvalidTable(_))
        ));
    }
}
