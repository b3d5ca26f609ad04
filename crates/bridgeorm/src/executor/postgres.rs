//! PostgreSQL executor.

use super::{CommandExecutor, FindOutput, expect_sql};
use crate::client::GenericClient;
use crate::compile::{Capabilities, CompiledCommand};
use crate::error::{OrmError, OrmResult};
use crate::logging::CommandLog;
use crate::row::{PgColumn, PgParam, record_from_row};
use crate::transaction::{SupportsTransactions, TransactionState};
use crate::value::{Record, Value};
use std::sync::{Mutex, PoisonError};
use tokio_postgres::types::ToSql;

const BACKEND: &str = "postgres";

/// Runs SQL commands on any [`GenericClient`].
///
/// Transactions are plain `BEGIN` / `COMMIT` / `ROLLBACK` statements on the
/// wrapped client, so give each logical session its own executor.
pub struct PgExecutor<C: GenericClient> {
    client: C,
    log: CommandLog,
    tx: TransactionState,
    last_id: Mutex<Option<Value>>,
}

impl<C: GenericClient> PgExecutor<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            log: CommandLog::default(),
            tx: TransactionState::new(),
            last_id: Mutex::new(None),
        }
    }

    /// Replace the command log settings.
    pub fn with_log(mut self, log: CommandLog) -> Self {
        self.log = log;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn into_inner(self) -> C {
        self.client
    }

    fn set_last_id(&self, id: Option<Value>) {
        *self.last_id.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }
}

fn params(values: &[Value]) -> Vec<PgParam<'_>> {
    values.iter().map(PgParam).collect()
}

fn param_refs<'a>(params: &'a [PgParam<'a>]) -> Vec<&'a (dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

impl<C: GenericClient> CommandExecutor for PgExecutor<C> {
    fn capabilities(&self) -> Capabilities {
        Capabilities::relational()
    }

    async fn execute_find(&self, command: &CompiledCommand) -> OrmResult<FindOutput> {
        let cmd = expect_sql(command)?;
        self.log.command(BACKEND, command);

        let params = params(&cmd.values);
        let rows = self.client.query(&cmd.sql, &param_refs(&params)).await?;

        if cmd.returns_count {
            let count = match rows.first() {
                Some(row) => row
                    .try_get::<_, i64>(0)
                    .map_err(|e| OrmError::decode("count", e.to_string()))?,
                None => 0,
            };
            return Ok(FindOutput::Count(u64::try_from(count).unwrap_or(0)));
        }

        rows.iter()
            .map(record_from_row)
            .collect::<OrmResult<Vec<Record>>>()
            .map(FindOutput::Rows)
    }

    async fn execute_insert(
        &self,
        command: &CompiledCommand,
        _values: Option<&Record>,
    ) -> OrmResult<Option<Value>> {
        let cmd = expect_sql(command)?;
        if cmd.values.is_empty() {
            return Err(OrmError::MissingValues("insert requires a payload".into()));
        }
        self.log.command(BACKEND, command);

        let params = params(&cmd.values);
        let refs = param_refs(&params);
        let id = match &cmd.returning {
            Some(column) => {
                let row = self.client.query_opt(&cmd.sql, &refs).await?;
                match row {
                    Some(row) => {
                        let PgColumn(id) = row
                            .try_get::<_, PgColumn>(0)
                            .map_err(|e| OrmError::decode(column.as_str(), e.to_string()))?;
                        Some(id)
                    }
                    None => None,
                }
            }
            None => {
                self.client.execute(&cmd.sql, &refs).await?;
                None
            }
        };

        self.set_last_id(id.clone());
        Ok(id)
    }

    async fn execute_update(&self, command: &CompiledCommand) -> OrmResult<u64> {
        let cmd = expect_sql(command)?;
        if !cmd.has_predicate {
            return Err(OrmError::MissingPredicate(
                "UPDATE requires a where clause".into(),
            ));
        }
        self.log.command(BACKEND, command);

        let params = params(&cmd.values);
        self.client.execute(&cmd.sql, &param_refs(&params)).await
    }

    async fn execute_delete(&self, command: &CompiledCommand) -> OrmResult<u64> {
        let cmd = expect_sql(command)?;
        if !cmd.has_predicate {
            return Err(OrmError::MissingPredicate(
                "DELETE requires a where clause".into(),
            ));
        }
        self.log.command(BACKEND, command);

        let params = params(&cmd.values);
        self.client.execute(&cmd.sql, &param_refs(&params)).await
    }

    fn last_insert_identifier(&self) -> Option<Value> {
        self.last_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<C: GenericClient> SupportsTransactions for PgExecutor<C> {
    async fn begin(&self) -> OrmResult<()> {
        self.tx.enter()?;
        self.log.statement(BACKEND, "BEGIN", "BEGIN");
        if let Err(err) = self.client.batch_execute("BEGIN").await {
            self.tx.leave()?;
            return Err(err);
        }
        Ok(())
    }

    async fn commit(&self) -> OrmResult<()> {
        if !self.tx.is_active() {
            return Err(OrmError::Transaction("no transaction in progress".into()));
        }
        self.log.statement(BACKEND, "COMMIT", "COMMIT");
        let result = self.client.batch_execute("COMMIT").await;
        self.tx.leave()?;
        result
    }

    async fn rollback(&self) -> OrmResult<()> {
        if !self.tx.is_active() {
            return Err(OrmError::Transaction("no transaction in progress".into()));
        }
        self.log.statement(BACKEND, "ROLLBACK", "ROLLBACK");
        let result = self.client.batch_execute("ROLLBACK").await;
        self.tx.leave()?;
        result
    }

    fn in_transaction(&self) -> bool {
        self.tx.is_active()
    }
}
