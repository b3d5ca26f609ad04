//! # bridgeorm
//!
//! One query builder for PostgreSQL, MongoDB and an in-memory document store.
//!
//! ## Layers
//!
//! - **Builder**: [`Builder`] accumulates clauses (selection, where, order,
//!   group, having, limit, offset, joins) and exactly one operation tag
//!   (FIND, INSERT, UPDATE, DELETE).
//! - **Compiler**: [`Builder::compile`] turns the clauses into a
//!   [`CompiledCommand`]: parameterized SQL for relational backends, or a
//!   structured document command for document backends.
//! - **Executor**: a [`CommandExecutor`] runs compiled commands against a
//!   driver and returns an [`Outcome`].
//!
//! ## Example
//!
//! ```ignore
//! use bridgeorm::{Builder, Connection, CommandLog, record};
//!
//! let conn = Connection::open("postgres://localhost/app", CommandLog::default()).await?;
//!
//! // FIND
//! let users = Builder::new("users")
//!     .filter(record! { "status" => "active" })
//!     .order("created_at DESC")
//!     .limit(10)
//!     .execute(&conn)
//!     .await?
//!     .into_rows()?;
//!
//! // INSERT
//! Builder::new("users")
//!     .insert(record! { "name" => "alice", "email" => "alice@example.com" })
//!     .execute(&conn)
//!     .await?;
//!
//! // UPDATE: a where clause is required
//! Builder::new("users")
//!     .update(record! { "status" => "inactive" })
//!     .eq("id", 7)
//!     .execute(&conn)
//!     .await?;
//!
//! // DELETE
//! Builder::new("users").delete_where(record! { "id" => 7 }).execute(&conn).await?;
//! ```
//!
//! Dynamic finders take an underscored field list:
//!
//! ```ignore
//! let cond = bridgeorm::conditions_from_underscored(
//!     bridgeorm::BackendKind::Document,
//!     "id_and_name",
//!     &[5.into(), "bob".into()],
//!     None,
//! )?;
//! ```

pub mod builder;
pub mod client;
pub mod compile;
pub mod condition;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod logging;
pub mod order;
pub mod row;
pub mod transaction;
pub mod value;

#[cfg(feature = "pool")]
pub mod pool;

pub use builder::{Builder, InsertSequence, Operation, Selection, UpdateSpec, WhereClause};
pub use client::GenericClient;
pub use compile::{
    BackendKind, Capabilities, CompiledCommand, DocumentCommand, Slice, SqlCommand,
};
pub use condition::{Condition, conditions_from_underscored, hash_from_underscored};
pub use config::{LogLevel, LoggingConfig, OrmConfig};
pub use connection::{Connection, ConnectionRegistry};
pub use error::{OrmError, OrmResult};
#[cfg(feature = "mongodb")]
pub use executor::MongoExecutor;
pub use executor::{CommandExecutor, FindOutput, MemoryExecutor, Outcome, PgExecutor};
pub use logging::CommandLog;
pub use order::{SortDirection, reverse_order};
pub use row::{PgColumn, PgParam, record_from_row};
pub use transaction::{SupportsTransactions, TransactionState};
pub use value::{Record, Value, decode_record, to_record};

#[cfg(feature = "pool")]
pub use pool::{
    DEFAULT_POOL_SIZE, create_pool, create_pool_with_config, create_pool_with_manager_config,
    pooled_executor, pooled_executor_with_log,
};

// Re-export drivers so callers can name their types without extra deps.
#[cfg(feature = "pool")]
pub use deadpool_postgres;
#[cfg(feature = "mongodb")]
pub use mongodb;
pub use tokio_postgres;

#[doc(hidden)]
pub use serde_json as __serde_json;
