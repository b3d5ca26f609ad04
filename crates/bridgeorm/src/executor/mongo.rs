//! MongoDB executor.
//!
//! Document commands map onto driver calls:
//!
//! | operation | driver call |
//! |-----------|-------------|
//! | FIND      | `find` (or `count_documents` for `COUNT(*)`) |
//! | INSERT    | `insert_one`, with a synthetic `_id` when absent |
//! | UPDATE    | `update_many` with `$set` or the given operators |
//! | DELETE    | `delete_many` |
//!
//! Order is natural order only (`$natural: 1 / -1`). Synthetic identifiers
//! come from a counters collection advanced with `findOneAndUpdate($inc)`.

use super::{
    CommandExecutor, FindOutput, expect_document, require_predicate, update_operators,
};
use crate::compile::{Capabilities, CompiledCommand, DocumentCommand};
use crate::error::{OrmError, OrmResult};
use crate::logging::{CommandLog, redact_url};
use crate::order::SortDirection;
use crate::transaction::{SupportsTransactions, TransactionState};
use crate::value::{Record, Value};
use futures_util::TryStreamExt;
use mongodb::bson::{self, Bson, Document, doc};
use mongodb::options::{
    CountOptions, FindOneAndUpdateOptions, FindOneOptions, FindOptions, ReturnDocument,
    UpdateOptions,
};
use mongodb::{Client, ClientSession, Collection, Database};
use std::sync::{Mutex, PoisonError};

const BACKEND: &str = "mongodb";

/// Collection holding one `{_id: <collection>, seq: <n>}` counter per collection.
pub const SEQUENCES_COLLECTION: &str = "__bridgeorm_sequences";

/// Run a driver action inside the session when one is open.
macro_rules! in_session {
    ($action:expr, $session:expr) => {
        match $session {
            Some(session) => $action.session(session).await,
            None => $action.await,
        }
    };
}

/// Runs document commands against one MongoDB database.
pub struct MongoExecutor {
    client: Client,
    db: Database,
    session: tokio::sync::Mutex<Option<ClientSession>>,
    tx: TransactionState,
    log: CommandLog,
    last_id: Mutex<Option<Value>>,
}

impl MongoExecutor {
    pub fn new(client: Client, database: &str) -> Self {
        let db = client.database(database);
        Self {
            client,
            db,
            session: tokio::sync::Mutex::new(None),
            tx: TransactionState::new(),
            log: CommandLog::default(),
            last_id: Mutex::new(None),
        }
    }

    /// Connect with a `mongodb://` URL.
    ///
    /// `database` overrides the database named in the URL path; one of the
    /// two is required.
    pub async fn connect(url: &str, database: Option<&str>) -> OrmResult<Self> {
        let client = Client::with_uri_str(url).await?;
        let name = match database {
            Some(name) => name.to_string(),
            None => client
                .default_database()
                .map(|db| db.name().to_string())
                .ok_or_else(|| {
                    OrmError::Connection(format!("no database named in '{}'", redact_url(url)))
                })?,
        };
        Ok(Self::new(client, &name))
    }

    pub fn with_log(mut self, log: CommandLog) -> Self {
        self.log = log;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }

    async fn find_now(&self, cmd: &DocumentCommand) -> OrmResult<FindOutput> {
        if cmd.group.is_some() || cmd.having.is_some() {
            return Err(OrmError::Unsupported(
                "GROUP BY / HAVING are not supported by document backends".into(),
            ));
        }

        let filter = filter_document(cmd.filter.as_ref())?;
        let coll = self.collection(&cmd.table);
        let mut session = self.session.lock().await;

        if cmd.is_count() {
            let mut options = CountOptions::default();
            if let Some(slice) = cmd.slice {
                options.skip = slice.skip;
                options.limit = slice.limit;
            }
            let count = in_session!(
                coll.count_documents(filter).with_options(options),
                session.as_mut()
            )?;
            return Ok(FindOutput::Count(count));
        }

        let mut options = FindOptions::default();
        options.sort = natural_sort(cmd.order.as_deref());
        if let Some(slice) = cmd.slice {
            options.skip = slice.skip;
            options.limit = slice.limit.map(clamp_i64);
        }
        if let Some(fields) = cmd.select.as_ref().and_then(|s| s.projected_fields()) {
            options.projection = Some(
                fields
                    .into_iter()
                    .map(|f| (f, Bson::Int32(1)))
                    .collect::<Document>(),
            );
        }

        let docs = find_documents(&coll, filter, options, session.as_mut()).await?;
        docs.into_iter()
            .map(document_to_record)
            .collect::<OrmResult<Vec<Record>>>()
            .map(FindOutput::Rows)
    }

    async fn insert_now(&self, cmd: &DocumentCommand, values: Option<&Record>) -> OrmResult<Value> {
        let payload = values
            .filter(|v| !v.is_empty())
            .ok_or_else(|| OrmError::MissingValues("insert requires a payload".into()))?;

        let mut doc = to_document(&Value::Object(payload.clone()))?;
        let mut session = self.session.lock().await;

        let id = match doc.get("_id") {
            Some(id) => id.clone(),
            None => {
                let next = self.next_id(&cmd.table, session.as_mut()).await?;
                doc.insert("_id", next);
                Bson::Int64(next)
            }
        };

        let coll = self.collection(&cmd.table);
        in_session!(coll.insert_one(doc), session.as_mut())?;
        Ok(bson_to_value(id))
    }

    /// Issue the next synthetic `_id` for `table`.
    ///
    /// The counter is advanced with `$inc`. On first use it is seeded with the
    /// collection's current maximum numeric `_id` via `$max`, then advanced.
    async fn next_id(&self, table: &str, mut session: Option<&mut ClientSession>) -> OrmResult<i64> {
        let counters = self.collection(SEQUENCES_COLLECTION);

        let mut bump = FindOneAndUpdateOptions::default();
        bump.return_document = Some(ReturnDocument::After);

        self.log.statement(BACKEND, "SEQUENCE", table);
        let counter = in_session!(
            counters
                .find_one_and_update(doc! { "_id": table }, doc! { "$inc": { "seq": 1_i64 } })
                .with_options(bump.clone()),
            session.as_deref_mut()
        )?;
        if let Some(seq) = counter.as_ref().and_then(|d| numeric(d.get("seq"))) {
            return Ok(seq);
        }

        let mut latest_first = FindOneOptions::default();
        latest_first.sort = Some(doc! { "_id": -1 });
        let latest = in_session!(
            self.collection(table)
                .find_one(doc! { "_id": { "$type": "number" } })
                .with_options(latest_first),
            session.as_deref_mut()
        )?;
        let max = latest.as_ref().and_then(|d| numeric(d.get("_id"))).unwrap_or(0);

        let mut upsert = UpdateOptions::default();
        upsert.upsert = Some(true);
        in_session!(
            counters
                .update_one(doc! { "_id": table }, doc! { "$max": { "seq": max } })
                .with_options(upsert),
            session.as_deref_mut()
        )?;

        let counter = in_session!(
            counters
                .find_one_and_update(doc! { "_id": table }, doc! { "$inc": { "seq": 1_i64 } })
                .with_options(bump),
            session.as_deref_mut()
        )?;
        counter
            .as_ref()
            .and_then(|d| numeric(d.get("seq")))
            .ok_or_else(|| OrmError::Backend(format!("sequence counter for '{table}' is missing")))
    }

    async fn update_now(&self, cmd: &DocumentCommand) -> OrmResult<u64> {
        let filter = require_predicate(cmd)?;
        let update = cmd
            .update
            .as_ref()
            .ok_or_else(|| OrmError::MissingValues("update requires a payload".into()))?;
        let update = to_document(&Value::Object(update_operators(update)?))?;

        let coll = self.collection(&cmd.table);
        let mut session = self.session.lock().await;
        let filter = self.scoped_filter(&coll, cmd, filter, session.as_mut()).await?;
        let result = in_session!(coll.update_many(filter, update), session.as_mut())?;
        Ok(result.matched_count)
    }

    async fn delete_now(&self, cmd: &DocumentCommand) -> OrmResult<u64> {
        let filter = require_predicate(cmd)?;

        let coll = self.collection(&cmd.table);
        let mut session = self.session.lock().await;
        let filter = self.scoped_filter(&coll, cmd, filter, session.as_mut()).await?;
        let result = in_session!(coll.delete_many(filter), session.as_mut())?;
        Ok(result.deleted_count)
    }

    /// With order or limit, resolve the target `_id`s first and scope the
    /// mutation to them.
    async fn scoped_filter(
        &self,
        coll: &Collection<Document>,
        cmd: &DocumentCommand,
        filter: &Value,
        session: Option<&mut ClientSession>,
    ) -> OrmResult<Document> {
        let filter = to_document(filter)?;
        if cmd.order.is_none() && cmd.slice.is_none() {
            return Ok(filter);
        }

        let mut options = FindOptions::default();
        options.projection = Some(doc! { "_id": 1 });
        options.sort = natural_sort(cmd.order.as_deref());
        options.limit = cmd.slice.and_then(|s| s.limit).map(clamp_i64);

        let ids: Vec<Bson> = find_documents(coll, filter, options, session)
            .await?
            .into_iter()
            .filter_map(|d| d.get("_id").cloned())
            .collect();
        Ok(doc! { "_id": { "$in": ids } })
    }
}

async fn find_documents(
    coll: &Collection<Document>,
    filter: Document,
    options: FindOptions,
    session: Option<&mut ClientSession>,
) -> OrmResult<Vec<Document>> {
    let action = coll.find(filter).with_options(options);
    match session {
        Some(session) => {
            let mut cursor = action.session(&mut *session).await?;
            let mut docs = Vec::new();
            while let Some(doc) = cursor.next(&mut *session).await {
                docs.push(doc?);
            }
            Ok(docs)
        }
        None => Ok(action.await?.try_collect().await?),
    }
}

fn natural_sort(order: Option<&str>) -> Option<Document> {
    order.map(|o| doc! { "$natural": SortDirection::from_order(o).as_i32() })
}

fn clamp_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn filter_document(filter: Option<&Value>) -> OrmResult<Document> {
    filter.map(to_document).transpose().map(Option::unwrap_or_default)
}

fn to_document(value: &Value) -> OrmResult<Document> {
    bson::to_document(value).map_err(|e| OrmError::invalid_argument(e.to_string()))
}

fn document_to_record(doc: Document) -> OrmResult<Record> {
    match Bson::Document(doc).into_relaxed_extjson() {
        Value::Object(record) => Ok(record),
        other => Err(OrmError::decode("<document>", format!("unexpected {other}"))),
    }
}

fn bson_to_value(value: Bson) -> Value {
    value.into_relaxed_extjson()
}

fn numeric(value: Option<&Bson>) -> Option<i64> {
    match value? {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(f) if f.fract() == 0.0 => Some(*f as i64),
        _ => None,
    }
}

impl CommandExecutor for MongoExecutor {
    fn capabilities(&self) -> Capabilities {
        Capabilities::document()
    }

    async fn execute_find(&self, command: &CompiledCommand) -> OrmResult<FindOutput> {
        let cmd = expect_document(command)?;
        self.log.command(BACKEND, command);
        self.find_now(cmd).await
    }

    async fn execute_insert(
        &self,
        command: &CompiledCommand,
        values: Option<&Record>,
    ) -> OrmResult<Option<Value>> {
        let cmd = expect_document(command)?;
        self.log.command(BACKEND, command);
        let id = self.insert_now(cmd, values).await?;
        *self.last_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.clone());
        Ok(Some(id))
    }

    async fn execute_update(&self, command: &CompiledCommand) -> OrmResult<u64> {
        let cmd = expect_document(command)?;
        self.log.command(BACKEND, command);
        self.update_now(cmd).await
    }

    async fn execute_delete(&self, command: &CompiledCommand) -> OrmResult<u64> {
        let cmd = expect_document(command)?;
        self.log.command(BACKEND, command);
        self.delete_now(cmd).await
    }

    fn last_insert_identifier(&self) -> Option<Value> {
        self.last_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SupportsTransactions for MongoExecutor {
    async fn begin(&self) -> OrmResult<()> {
        self.tx.enter()?;
        self.log.statement(BACKEND, "BEGIN", "startTransaction");
        let started = async {
            let mut session = self.client.start_session().await?;
            session.start_transaction().await?;
            Ok::<_, OrmError>(session)
        }
        .await;
        match started {
            Ok(session) => {
                *self.session.lock().await = Some(session);
                Ok(())
            }
            Err(err) => {
                self.tx.leave()?;
                Err(err)
            }
        }
    }

    async fn commit(&self) -> OrmResult<()> {
        let session = self.session.lock().await.take();
        let Some(mut session) = session else {
            return Err(OrmError::Transaction("no transaction in progress".into()));
        };
        self.tx.leave()?;
        self.log.statement(BACKEND, "COMMIT", "commitTransaction");
        session.commit_transaction().await?;
        Ok(())
    }

    async fn rollback(&self) -> OrmResult<()> {
        let session = self.session.lock().await.take();
        let Some(mut session) = session else {
            return Err(OrmError::Transaction("no transaction in progress".into()));
        };
        self.tx.leave()?;
        self.log.statement(BACKEND, "ROLLBACK", "abortTransaction");
        session.abort_transaction().await?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.tx.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_sort_follows_desc_marker() {
        assert_eq!(natural_sort(Some("id DESC")), Some(doc! { "$natural": -1 }));
        assert_eq!(natural_sort(Some("id")), Some(doc! { "$natural": 1 }));
        assert_eq!(natural_sort(None), None);
    }

    #[test]
    fn json_filters_convert_to_bson() {
        let filter = serde_json::json!({"$and": [{"_id": 5}, {"name": "bob"}]});
        let doc = to_document(&filter).unwrap();
        assert_eq!(doc, doc! { "$and": [{ "_id": 5_i64 }, { "name": "bob" }] });
    }

    #[test]
    fn documents_normalize_to_plain_json() {
        let record = document_to_record(doc! { "_id": 3_i64, "n": 1.5, "tags": ["a"] }).unwrap();
        assert_eq!(
            Value::Object(record),
            serde_json::json!({"_id": 3, "n": 1.5, "tags": ["a"]})
        );
    }

    #[test]
    fn numeric_ids() {
        assert_eq!(numeric(Some(&Bson::Int32(4))), Some(4));
        assert_eq!(numeric(Some(&Bson::Double(7.0))), Some(7));
        assert_eq!(numeric(Some(&Bson::String("x".into()))), None);
        assert_eq!(numeric(None), None);
    }
}
