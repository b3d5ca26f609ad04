//! Executor adapters: compiled commands → driver calls.
//!
//! Each backend implements [`CommandExecutor`]. The dispatching
//! [`CommandExecutor::execute`] routes a command to the matching operation by
//! its [`Operation`] tag and wraps the result in an [`Outcome`].

pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;
pub mod postgres;

pub use memory::MemoryExecutor;
#[cfg(feature = "mongodb")]
pub use mongo::MongoExecutor;
pub use postgres::PgExecutor;

use crate::builder::Operation;
use crate::compile::{Capabilities, CompiledCommand, DocumentCommand, SqlCommand};
use crate::error::{OrmError, OrmResult};
use crate::value::{Record, Value, decode_record};
use serde::de::DeserializeOwned;
use std::future::Future;

/// Result of a FIND.
#[derive(Debug, Clone, PartialEq)]
pub enum FindOutput {
    Rows(Vec<Record>),
    Count(u64),
}

/// Result of any executed command.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// FIND rows, in cursor order.
    Rows(Vec<Record>),
    /// FIND with the `COUNT(*)` selection.
    Count(u64),
    /// INSERT, with the issued identifier when the backend reports one.
    Inserted(Option<Value>),
    /// UPDATE / DELETE affected row count.
    Affected(u64),
}

impl Outcome {
    /// The rows of a FIND, or `Unsupported` for any other outcome.
    pub fn into_rows(self) -> OrmResult<Vec<Record>> {
        match self {
            Outcome::Rows(rows) => Ok(rows),
            other => Err(OrmError::Unsupported(format!(
                "expected rows, got {other:?}"
            ))),
        }
    }

    /// Deserialize FIND rows into `T`.
    pub fn rows_as<T: DeserializeOwned>(self) -> OrmResult<Vec<T>> {
        self.into_rows()?.into_iter().map(decode_record).collect()
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            Outcome::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn affected(&self) -> Option<u64> {
        match self {
            Outcome::Affected(n) => Some(*n),
            _ => None,
        }
    }

    pub fn inserted_id(&self) -> Option<&Value> {
        match self {
            Outcome::Inserted(id) => id.as_ref(),
            _ => None,
        }
    }
}

/// A backend that runs compiled commands.
pub trait CommandExecutor: Send + Sync {
    /// What this backend can express.
    fn capabilities(&self) -> Capabilities;

    /// Quote an identifier the way this backend expects.
    fn quote_identifier(&self, name: &str) -> String {
        self.capabilities().quote_name(name)
    }

    fn execute_find(
        &self,
        command: &CompiledCommand,
    ) -> impl Future<Output = OrmResult<FindOutput>> + Send;

    /// Run an INSERT. Document backends take the payload from `values`.
    fn execute_insert(
        &self,
        command: &CompiledCommand,
        values: Option<&Record>,
    ) -> impl Future<Output = OrmResult<Option<Value>>> + Send;

    /// Run an UPDATE and return the number of affected rows.
    fn execute_update(
        &self,
        command: &CompiledCommand,
    ) -> impl Future<Output = OrmResult<u64>> + Send;

    /// Run a DELETE and return the number of affected rows.
    fn execute_delete(
        &self,
        command: &CompiledCommand,
    ) -> impl Future<Output = OrmResult<u64>> + Send;

    /// Identifier issued by the most recent successful INSERT.
    fn last_insert_identifier(&self) -> Option<Value>;

    /// Dispatch by operation tag.
    fn execute(
        &self,
        command: &CompiledCommand,
        values: Option<&Record>,
    ) -> impl Future<Output = OrmResult<Outcome>> + Send {
        async move {
            match command.operation() {
                Operation::Find => Ok(match self.execute_find(command).await? {
                    FindOutput::Rows(rows) => Outcome::Rows(rows),
                    FindOutput::Count(n) => Outcome::Count(n),
                }),
                Operation::Insert => self
                    .execute_insert(command, values)
                    .await
                    .map(Outcome::Inserted),
                Operation::Update => self.execute_update(command).await.map(Outcome::Affected),
                Operation::Delete => self.execute_delete(command).await.map(Outcome::Affected),
            }
        }
    }
}

pub(crate) fn expect_sql(command: &CompiledCommand) -> OrmResult<&SqlCommand> {
    command
        .as_sql()
        .ok_or_else(|| OrmError::Unsupported("expected a SQL command".into()))
}

pub(crate) fn expect_document(command: &CompiledCommand) -> OrmResult<&DocumentCommand> {
    command
        .as_document()
        .ok_or_else(|| OrmError::Unsupported("expected a document command".into()))
}

/// Guard shared by document executors for UPDATE / DELETE.
pub(crate) fn require_predicate(cmd: &DocumentCommand) -> OrmResult<&Value> {
    cmd.filter.as_ref().ok_or_else(|| {
        OrmError::MissingPredicate(format!(
            "{} on '{}' requires a where clause",
            cmd.operation, cmd.table
        ))
    })
}

/// `$set` wrapper for plain field mappings; operator documents pass through.
pub(crate) fn update_operators(update: &Value) -> OrmResult<Record> {
    let Value::Object(fields) = update else {
        return Err(OrmError::invalid_argument("update payload must be a mapping"));
    };
    if fields.is_empty() {
        return Err(OrmError::MissingValues("update payload is empty".into()));
    }
    if fields.keys().all(|k| k.starts_with('$')) {
        return Ok(fields.clone());
    }
    if fields.keys().any(|k| k.starts_with('$')) {
        return Err(OrmError::invalid_argument(
            "update payload mixes operators and plain fields",
        ));
    }
    let mut ops = Record::new();
    ops.insert("$set".to_string(), Value::Object(fields.clone()));
    Ok(ops)
}
