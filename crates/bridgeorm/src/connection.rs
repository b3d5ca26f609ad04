//! Opening backends by URL and naming them.
//!
//! [`Connection`] wraps one open backend and forwards the executor traits to
//! it, so builders run against it without knowing which backend is behind it.
//! [`ConnectionRegistry`] maps logical names to shared connections.

use crate::builder::Builder;
use crate::compile::{BackendKind, Capabilities, CompiledCommand};
use crate::config::OrmConfig;
use crate::error::{OrmError, OrmResult};
use crate::executor::{CommandExecutor, FindOutput, MemoryExecutor, PgExecutor};
#[cfg(feature = "mongodb")]
use crate::executor::MongoExecutor;
use crate::logging::{CommandLog, redact_url};
use crate::transaction::SupportsTransactions;
use crate::value::{Record, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// One open backend.
pub enum Connection {
    Postgres(PgExecutor<tokio_postgres::Client>),
    #[cfg(feature = "mongodb")]
    Mongo(MongoExecutor),
    Memory(MemoryExecutor),
}

/// Forward a call to whichever executor the connection holds.
macro_rules! dispatch {
    ($conn:expr, $exec:ident => $call:expr) => {
        match $conn {
            Connection::Postgres($exec) => $call,
            #[cfg(feature = "mongodb")]
            Connection::Mongo($exec) => $call,
            Connection::Memory($exec) => $call,
        }
    };
}

impl Connection {
    /// Open a backend chosen by the URL scheme.
    ///
    /// - `postgres://` / `postgresql://`: a `tokio-postgres` client without TLS.
    ///   The connection task is spawned on the current tokio runtime.
    /// - `mongodb://` / `mongodb+srv://`: the database comes from the URL path.
    /// - `memory://`: a fresh in-memory store.
    pub async fn open(url: &str, log: CommandLog) -> OrmResult<Self> {
        let parsed = url::Url::parse(url).map_err(|e| {
            OrmError::Connection(format!("invalid connection url '{}': {e}", redact_url(url)))
        })?;

        match parsed.scheme() {
            "postgres" | "postgresql" => {
                let (client, connection) = tokio_postgres::connect(url, tokio_postgres::NoTls)
                    .await
                    .map_err(OrmError::from_db_error)?;
                let target = redact_url(url);
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        tracing::error!(url = %target, error = %e, "postgres connection task failed");
                    }
                });
                Ok(Connection::Postgres(PgExecutor::new(client).with_log(log)))
            }
            #[cfg(feature = "mongodb")]
            "mongodb" | "mongodb+srv" => {
                let executor = MongoExecutor::connect(url, None).await?;
                Ok(Connection::Mongo(executor.with_log(log)))
            }
            "memory" => Ok(Connection::Memory(MemoryExecutor::new().with_log(log))),
            other => Err(OrmError::Connection(format!(
                "unsupported connection scheme '{other}'"
            ))),
        }
    }

    /// A fresh in-memory connection.
    pub fn memory() -> Self {
        Connection::Memory(MemoryExecutor::new())
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.capabilities().backend
    }

    /// Start a builder; run it with `builder.execute(&connection)`.
    pub fn builder(&self, table: &str) -> Builder {
        Builder::new(table)
    }
}

impl CommandExecutor for Connection {
    fn capabilities(&self) -> Capabilities {
        dispatch!(self, exec => exec.capabilities())
    }

    async fn execute_find(&self, command: &CompiledCommand) -> OrmResult<FindOutput> {
        dispatch!(self, exec => exec.execute_find(command).await)
    }

    async fn execute_insert(
        &self,
        command: &CompiledCommand,
        values: Option<&Record>,
    ) -> OrmResult<Option<Value>> {
        dispatch!(self, exec => exec.execute_insert(command, values).await)
    }

    async fn execute_update(&self, command: &CompiledCommand) -> OrmResult<u64> {
        dispatch!(self, exec => exec.execute_update(command).await)
    }

    async fn execute_delete(&self, command: &CompiledCommand) -> OrmResult<u64> {
        dispatch!(self, exec => exec.execute_delete(command).await)
    }

    fn last_insert_identifier(&self) -> Option<Value> {
        dispatch!(self, exec => exec.last_insert_identifier())
    }
}

impl SupportsTransactions for Connection {
    async fn begin(&self) -> OrmResult<()> {
        dispatch!(self, exec => exec.begin().await)
    }

    async fn commit(&self) -> OrmResult<()> {
        dispatch!(self, exec => exec.commit().await)
    }

    async fn rollback(&self) -> OrmResult<()> {
        dispatch!(self, exec => exec.rollback().await)
    }

    fn in_transaction(&self) -> bool {
        dispatch!(self, exec => exec.in_transaction())
    }
}

// ==================== Registry ====================

/// Logical name → open connection.
///
/// Connections are handed out as `Arc<Connection>`; [`close`](Self::close)
/// removes the registry's handle and the backend shuts down once the last
/// clone is dropped.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<String, Arc<Connection>>,
    default: Option<String>,
    log: CommandLog,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log settings applied to connections opened through the registry.
    pub fn with_log(mut self, log: CommandLog) -> Self {
        self.log = log;
        self
    }

    /// Open every configured connection.
    pub async fn from_config(config: &OrmConfig) -> OrmResult<Self> {
        let mut registry = Self::new().with_log(config.command_log());
        for (name, url) in &config.connections {
            registry.open(name, url).await?;
        }
        registry.default = config.default_name().map(str::to_string);
        Ok(registry)
    }

    /// Open `url` and register it as `name`, replacing any previous entry.
    pub async fn open(&mut self, name: &str, url: &str) -> OrmResult<Arc<Connection>> {
        let connection = Arc::new(Connection::open(url, self.log.clone()).await?);
        tracing::debug!(name, url = %redact_url(url), "opened connection");
        self.connections
            .insert(name.to_string(), Arc::clone(&connection));
        Ok(connection)
    }

    /// Register an already open connection. Returns the one it replaced.
    pub fn insert(&mut self, name: &str, connection: Connection) -> Option<Arc<Connection>> {
        self.connections
            .insert(name.to_string(), Arc::new(connection))
    }

    pub fn get(&self, name: &str) -> OrmResult<Arc<Connection>> {
        self.connections
            .get(name)
            .cloned()
            .ok_or_else(|| OrmError::Connection(format!("no connection named '{name}'")))
    }

    pub fn set_default(&mut self, name: &str) -> OrmResult<()> {
        if !self.connections.contains_key(name) {
            return Err(OrmError::Connection(format!("no connection named '{name}'")));
        }
        self.default = Some(name.to_string());
        Ok(())
    }

    /// The default connection: the one set explicitly, or the only one.
    pub fn default_connection(&self) -> OrmResult<Arc<Connection>> {
        if let Some(name) = &self.default {
            return self.get(name);
        }
        let mut all = self.connections.values();
        match (all.next(), all.next()) {
            (Some(only), None) => Ok(Arc::clone(only)),
            (None, _) => Err(OrmError::Connection("no connections are open".into())),
            _ => Err(OrmError::Connection(
                "several connections are open and none is the default".into(),
            )),
        }
    }

    /// Drop the registry's handle for `name`. Returns whether it existed.
    pub fn close(&mut self, name: &str) -> bool {
        if self.default.as_deref() == Some(name) {
            self.default = None;
        }
        self.connections.remove(name).is_some()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.connections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    #[tokio::test]
    async fn memory_url_opens_a_document_backend() {
        let conn = Connection::open("memory://", CommandLog::disabled())
            .await
            .unwrap();
        assert_eq!(conn.backend_kind(), BackendKind::Document);
        assert_eq!(conn.quote_identifier("users"), "users");
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let err = Connection::open("redis://localhost", CommandLog::disabled())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OrmError::Connection(_)));

        let err = Connection::open("not a url", CommandLog::disabled())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OrmError::Connection(_)));
    }

    #[tokio::test]
    async fn builders_run_through_a_connection() {
        let conn = Connection::memory();
        let outcome = conn
            .builder("users")
            .insert(record! { "name" => "ann" })
            .execute(&conn)
            .await
            .unwrap();
        assert_eq!(outcome.inserted_id(), Some(&Value::from(1)));
        assert_eq!(conn.last_insert_identifier(), Some(Value::from(1)));

        let rows = conn
            .builder("users")
            .execute(&conn)
            .await
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "ann");
    }

    #[tokio::test]
    async fn registry_resolves_names_and_default() {
        let mut registry = ConnectionRegistry::new().with_log(CommandLog::disabled());
        assert!(registry.default_connection().is_err());

        registry.open("a", "memory://").await.unwrap();
        assert!(registry.default_connection().is_ok());

        registry.insert("b", Connection::memory());
        assert!(registry.default_connection().is_err());
        registry.set_default("b").unwrap();
        assert!(registry.default_connection().is_ok());
        assert!(registry.set_default("zzz").is_err());

        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.get("missing").is_err());

        assert!(registry.close("b"));
        assert!(!registry.close("b"));
        assert_eq!(registry.names(), vec!["a"]);
        assert!(registry.default_connection().is_ok());
    }

    #[tokio::test]
    async fn registry_from_config() {
        let config = OrmConfig::from_toml_str(
            r#"
            default_connection = "scratch"

            [connections]
            scratch = "memory://"
            other = "memory://"

            [logging]
            enabled = false
            "#,
        )
        .unwrap();
        let registry = ConnectionRegistry::from_config(&config).await.unwrap();
        assert_eq!(registry.names(), vec!["other", "scratch"]);

        let default = registry.default_connection().unwrap();
        let scratch = registry.get("scratch").unwrap();
        assert!(Arc::ptr_eq(&default, &scratch));
    }
}
