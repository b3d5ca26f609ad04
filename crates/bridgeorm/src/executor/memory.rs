//! In-process document store.
//!
//! `MemoryExecutor` runs document commands against tables held in memory. It
//! understands the same filter and update operators the builder emits
//! (`$and`, `$or`, `$in`, `$set`, ...) plus the common comparison operators,
//! which makes it a drop-in backend for tests and embedded use.

use super::{
    CommandExecutor, FindOutput, expect_document, require_predicate, update_operators,
};
use crate::compile::{Capabilities, CompiledCommand, DocumentCommand};
use crate::error::{OrmError, OrmResult};
use crate::logging::CommandLog;
use crate::order::SortDirection;
use crate::transaction::{SupportsTransactions, TransactionState};
use crate::value::{Record, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

const BACKEND: &str = "memory";

#[derive(Debug, Clone, Default)]
struct Store {
    tables: HashMap<String, Vec<Record>>,
    /// Highest numeric `_id` issued or seen per table.
    counters: HashMap<String, u64>,
}

/// Document executor over in-memory tables.
#[derive(Debug, Default)]
pub struct MemoryExecutor {
    store: RwLock<Store>,
    snapshot: Mutex<Option<Store>>,
    tx: TransactionState,
    log: CommandLog,
    last_id: Mutex<Option<Value>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(mut self, log: CommandLog) -> Self {
        self.log = log;
        self
    }

    /// A copy of every document in `table`, in insertion order.
    pub fn documents(&self, table: &str) -> Vec<Record> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn find_now(&self, cmd: &DocumentCommand) -> OrmResult<FindOutput> {
        if cmd.group.is_some() || cmd.having.is_some() {
            return Err(OrmError::Unsupported(
                "GROUP BY / HAVING are not supported by document backends".into(),
            ));
        }

        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        let docs = store.tables.get(&cmd.table).map(Vec::as_slice).unwrap_or(&[]);
        let indices = select_indices(docs, cmd, true)?;

        if cmd.is_count() {
            return Ok(FindOutput::Count(indices.len() as u64));
        }

        let fields = cmd.select.as_ref().and_then(|s| s.projected_fields());
        let rows = indices
            .into_iter()
            .map(|idx| project(&docs[idx], fields.as_deref()))
            .collect();
        Ok(FindOutput::Rows(rows))
    }

    fn insert_now(&self, cmd: &DocumentCommand, values: Option<&Record>) -> OrmResult<Value> {
        let payload = values
            .filter(|v| !v.is_empty())
            .ok_or_else(|| OrmError::MissingValues("insert requires a payload".into()))?;

        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        let Store { tables, counters } = &mut *store;
        let docs = tables.entry(cmd.table.clone()).or_default();
        let counter = counters.entry(cmd.table.clone()).or_insert(0);

        let mut doc = payload.clone();
        let id = match doc.get("_id") {
            Some(id) => {
                if docs.iter().any(|d| d.get("_id") == Some(id)) {
                    return Err(OrmError::Backend(format!(
                        "duplicate key _id {} in '{}'",
                        id, cmd.table
                    )));
                }
                if let Some(n) = id.as_u64() {
                    *counter = (*counter).max(n);
                }
                id.clone()
            }
            None => {
                *counter += 1;
                let id = Value::from(*counter);
                doc.insert("_id".to_string(), id.clone());
                id
            }
        };
        docs.push(doc);
        Ok(id)
    }

    fn update_now(&self, cmd: &DocumentCommand) -> OrmResult<u64> {
        require_predicate(cmd)?;
        let update = cmd
            .update
            .as_ref()
            .ok_or_else(|| OrmError::MissingValues("update requires a payload".into()))?;
        let ops = update_operators(update)?;

        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        let Some(docs) = store.tables.get_mut(&cmd.table) else {
            return Ok(0);
        };
        let indices = select_indices(docs, cmd, false)?;
        for &idx in &indices {
            apply_update(&mut docs[idx], &ops)?;
        }
        Ok(indices.len() as u64)
    }

    fn delete_now(&self, cmd: &DocumentCommand) -> OrmResult<u64> {
        require_predicate(cmd)?;

        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        let Some(docs) = store.tables.get_mut(&cmd.table) else {
            return Ok(0);
        };
        let mut indices = select_indices(docs, cmd, false)?;
        indices.sort_unstable_by(|a, b| b.cmp(a));
        for &idx in &indices {
            docs.remove(idx);
        }
        Ok(indices.len() as u64)
    }
}

/// Indices of matching documents after order and slice.
fn select_indices(docs: &[Record], cmd: &DocumentCommand, with_skip: bool) -> OrmResult<Vec<usize>> {
    let mut indices = Vec::new();
    for (idx, doc) in docs.iter().enumerate() {
        let hit = match &cmd.filter {
            Some(filter) => matches_filter(doc, filter)?,
            None => true,
        };
        if hit {
            indices.push(idx);
        }
    }

    if let Some(order) = &cmd.order {
        if SortDirection::from_order(order) == SortDirection::Descending {
            indices.reverse();
        }
    }

    let (skip, limit) = cmd
        .slice
        .map(|s| (s.skip.unwrap_or(0), s.limit))
        .unwrap_or((0, None));
    let skip = if with_skip { skip as usize } else { 0 };
    let iter = indices.into_iter().skip(skip);
    Ok(match limit {
        Some(limit) => iter.take(limit as usize).collect(),
        None => iter.collect(),
    })
}

fn project(doc: &Record, fields: Option<&[String]>) -> Record {
    match fields {
        None => doc.clone(),
        Some(fields) => doc
            .iter()
            .filter(|(k, _)| k.as_str() == "_id" || fields.iter().any(|f| f == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

// ==================== Filter evaluation ====================

fn matches_filter(doc: &Record, filter: &Value) -> OrmResult<bool> {
    let Value::Object(clauses) = filter else {
        return Err(OrmError::invalid_argument("filter must be a mapping"));
    };
    for (key, cond) in clauses {
        let hit = match key.as_str() {
            "$and" => all_of(doc, cond)?.iter().all(|b| *b),
            "$or" => all_of(doc, cond)?.iter().any(|b| *b),
            "$nor" => !all_of(doc, cond)?.iter().any(|b| *b),
            op if op.starts_with('$') => {
                return Err(OrmError::Unsupported(format!("filter operator {op}")));
            }
            field => matches_field(doc.get(field), cond)?,
        };
        if !hit {
            return Ok(false);
        }
    }
    Ok(true)
}

fn all_of(doc: &Record, cond: &Value) -> OrmResult<Vec<bool>> {
    let Value::Array(children) = cond else {
        return Err(OrmError::invalid_argument("$and / $or / $nor take an array"));
    };
    children.iter().map(|c| matches_filter(doc, c)).collect()
}

fn is_operator_doc(cond: &Value) -> bool {
    matches!(cond, Value::Object(m) if !m.is_empty() && m.keys().all(|k| k.starts_with('$')))
}

fn matches_field(field: Option<&Value>, cond: &Value) -> OrmResult<bool> {
    if !is_operator_doc(cond) {
        return Ok(equals(field, cond));
    }
    let Value::Object(ops) = cond else {
        return Ok(false);
    };
    for (op, arg) in ops {
        let hit = match op.as_str() {
            "$eq" => equals(field, arg),
            "$ne" => !equals(field, arg),
            "$in" => in_list(field, arg)?,
            "$nin" => !in_list(field, arg)?,
            "$gt" => compare(field, arg) == Some(Ordering::Greater),
            "$gte" => matches!(compare(field, arg), Some(Ordering::Greater | Ordering::Equal)),
            "$lt" => compare(field, arg) == Some(Ordering::Less),
            "$lte" => matches!(compare(field, arg), Some(Ordering::Less | Ordering::Equal)),
            "$exists" => field.is_some() == arg.as_bool().unwrap_or(true),
            other => return Err(OrmError::Unsupported(format!("filter operator {other}"))),
        };
        if !hit {
            return Ok(false);
        }
    }
    Ok(true)
}

fn in_list(field: Option<&Value>, arg: &Value) -> OrmResult<bool> {
    let Value::Array(candidates) = arg else {
        return Err(OrmError::invalid_argument("$in / $nin take an array"));
    };
    Ok(candidates.iter().any(|c| equals(field, c)))
}

/// Equality with document semantics: null matches a missing field, numbers
/// compare by value, and an array field matches any of its elements.
fn equals(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        None => expected.is_null(),
        Some(actual) => {
            if same_value(actual, expected) {
                return true;
            }
            match (actual, expected) {
                (Value::Array(items), e) if !e.is_array() => items.iter().any(|i| same_value(i, e)),
                _ => false,
            }
        }
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(field: Option<&Value>, arg: &Value) -> Option<Ordering> {
    match (field?, arg) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

// ==================== Update operators ====================

fn apply_update(doc: &mut Record, ops: &Record) -> OrmResult<()> {
    for (op, arg) in ops {
        let Value::Object(fields) = arg else {
            return Err(OrmError::invalid_argument(format!("{op} takes a mapping")));
        };
        match op.as_str() {
            "$set" => {
                for (k, v) in fields {
                    doc.insert(k.clone(), v.clone());
                }
            }
            "$unset" => {
                for k in fields.keys() {
                    doc.shift_remove(k);
                }
            }
            "$inc" => {
                for (k, delta) in fields {
                    let next = add_numbers(doc.get(k), delta)?;
                    doc.insert(k.clone(), next);
                }
            }
            other => return Err(OrmError::Unsupported(format!("update operator {other}"))),
        }
    }
    Ok(())
}

fn add_numbers(current: Option<&Value>, delta: &Value) -> OrmResult<Value> {
    let not_numeric = || OrmError::invalid_argument("$inc needs numeric values");
    let delta = delta.as_number().ok_or_else(not_numeric)?;
    let current = match current {
        None | Some(Value::Null) => return Ok(Value::Number(delta.clone())),
        Some(v) => v.as_number().ok_or_else(not_numeric)?,
    };
    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(Value::from(sum));
        }
    }
    let sum = current.as_f64().unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0);
    serde_json::Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(not_numeric)
}

// ==================== Trait impls ====================

impl CommandExecutor for MemoryExecutor {
    fn capabilities(&self) -> Capabilities {
        Capabilities::document()
    }

    async fn execute_find(&self, command: &CompiledCommand) -> OrmResult<FindOutput> {
        let cmd = expect_document(command)?;
        self.log.command(BACKEND, command);
        self.find_now(cmd)
    }

    async fn execute_insert(
        &self,
        command: &CompiledCommand,
        values: Option<&Record>,
    ) -> OrmResult<Option<Value>> {
        let cmd = expect_document(command)?;
        self.log.command(BACKEND, command);
        let id = self.insert_now(cmd, values)?;
        *self.last_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.clone());
        Ok(Some(id))
    }

    async fn execute_update(&self, command: &CompiledCommand) -> OrmResult<u64> {
        let cmd = expect_document(command)?;
        self.log.command(BACKEND, command);
        self.update_now(cmd)
    }

    async fn execute_delete(&self, command: &CompiledCommand) -> OrmResult<u64> {
        let cmd = expect_document(command)?;
        self.log.command(BACKEND, command);
        self.delete_now(cmd)
    }

    fn last_insert_identifier(&self) -> Option<Value> {
        self.last_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SupportsTransactions for MemoryExecutor {
    async fn begin(&self) -> OrmResult<()> {
        self.tx.enter()?;
        self.log.statement(BACKEND, "BEGIN", "snapshot");
        let copy = self.store.read().unwrap_or_else(PoisonError::into_inner).clone();
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Some(copy);
        Ok(())
    }

    async fn commit(&self) -> OrmResult<()> {
        self.tx.leave()?;
        self.log.statement(BACKEND, "COMMIT", "discard snapshot");
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }

    async fn rollback(&self) -> OrmResult<()> {
        self.tx.leave()?;
        self.log.statement(BACKEND, "ROLLBACK", "restore snapshot");
        let snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(store) = snapshot {
            *self.store.write().unwrap_or_else(PoisonError::into_inner) = store;
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.tx.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::condition::Condition;
    use crate::record;
    use serde_json::json;

    async fn seeded(n: i64) -> MemoryExecutor {
        let mem = MemoryExecutor::new().with_log(CommandLog::disabled());
        for i in 1..=n {
            Builder::new("items")
                .insert(record! { "n" => i, "even" => i % 2 == 0 })
                .execute(&mem)
                .await
                .unwrap();
        }
        mem
    }

    fn ns(rows: &[Record]) -> Vec<i64> {
        rows.iter().map(|r| r["n"].as_i64().unwrap()).collect()
    }

    #[tokio::test]
    async fn insert_issues_sequential_ids() {
        let mem = seeded(3).await;
        let ids: Vec<Value> = mem.documents("items").iter().map(|d| d["_id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(mem.last_insert_identifier(), Some(json!(3)));
    }

    #[tokio::test]
    async fn user_supplied_id_is_kept_and_advances_counter() {
        let mem = MemoryExecutor::new();
        Builder::new("t")
            .insert(record! { "_id" => 10 })
            .execute(&mem)
            .await
            .unwrap();
        let out = Builder::new("t")
            .insert(record! { "a" => 1 })
            .execute(&mem)
            .await
            .unwrap();
        assert_eq!(out.inserted_id(), Some(&json!(11)));

        let err = Builder::new("t")
            .insert(record! { "_id" => 10 })
            .execute(&mem)
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::Backend(_)));
    }

    #[tokio::test]
    async fn insert_without_payload_is_missing_values() {
        let mem = MemoryExecutor::new();
        let cmd = Builder::new("t")
            .insert(record! { "a" => 1 })
            .compile(&mem.capabilities())
            .unwrap();
        let err = mem.execute(&cmd, None).await.unwrap_err();
        assert!(matches!(err, OrmError::MissingValues(_)));
    }

    #[tokio::test]
    async fn find_filters_orders_and_slices() {
        let mem = seeded(10).await;
        let rows = Builder::new("items")
            .filter(record! { "even" => true })
            .order("n DESC")
            .limit(2)
            .offset(1)
            .execute(&mem)
            .await
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(ns(&rows), vec![8, 6]);
    }

    #[tokio::test]
    async fn lowercase_desc_sorts_ascending() {
        let mem = seeded(3).await;
        let rows = Builder::new("items")
            .order("n desc")
            .execute(&mem)
            .await
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(ns(&rows), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn count_and_projection() {
        let mem = seeded(5).await;
        let out = Builder::new("items")
            .filter(record! { "n" => [1, 2, 3] })
            .count()
            .execute(&mem)
            .await
            .unwrap();
        assert_eq!(out.count(), Some(3));

        let rows = Builder::new("items")
            .select("n")
            .limit(1)
            .execute(&mem)
            .await
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(serde_json::Value::Object(rows[0].clone()), json!({"n": 1, "_id": 1}));
    }

    #[tokio::test]
    async fn condition_trees_and_operators() {
        let mem = seeded(6).await;
        let cond = Condition::or(vec![
            Condition::term("n", 1),
            Condition::and(vec![Condition::term("even", true), Condition::term("n", 6)]),
        ]);
        let rows = Builder::new("items")
            .filter(cond)
            .execute(&mem)
            .await
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(ns(&rows), vec![1, 6]);

        let rows = Builder::new("items")
            .where_raw(r#"{"n": {"$gte": ?, "$lt": ?}}"#, vec![json!(2), json!(4)])
            .execute(&mem)
            .await
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(ns(&rows), vec![2, 3]);
    }

    #[tokio::test]
    async fn update_requires_predicate_and_sets_fields() {
        let mem = seeded(3).await;
        let err = Builder::new("items")
            .update(record! { "flag" => true })
            .execute(&mem)
            .await
            .unwrap_err();
        assert!(err.is_missing_predicate());

        let out = Builder::new("items")
            .update(record! { "flag" => true })
            .filter(record! { "n" => 2 })
            .execute(&mem)
            .await
            .unwrap();
        assert_eq!(out.affected(), Some(1));
        let docs = mem.documents("items");
        assert_eq!(docs[1]["flag"], json!(true));
        assert!(docs[0].get("flag").is_none());
    }

    #[tokio::test]
    async fn operator_updates_and_limited_scope() {
        let mem = seeded(4).await;
        let out = Builder::new("items")
            .update(r#"{"$inc": {"n": 100}}"#)
            .where_raw(r#"{"n": {"$gt": ?}}"#, vec![json!(0)])
            .order("n DESC")
            .limit(2)
            .execute(&mem)
            .await
            .unwrap();
        assert_eq!(out.affected(), Some(2));
        assert_eq!(ns(&mem.documents("items")), vec![1, 2, 103, 104]);
    }

    #[tokio::test]
    async fn delete_requires_predicate() {
        let mem = seeded(4).await;
        let err = Builder::new("items").delete().execute(&mem).await.unwrap_err();
        assert!(err.is_missing_predicate());

        let out = Builder::new("items")
            .delete_where(record! { "even" => true })
            .execute(&mem)
            .await
            .unwrap();
        assert_eq!(out.affected(), Some(2));
        assert_eq!(ns(&mem.documents("items")), vec![1, 3]);
    }

    #[tokio::test]
    async fn group_by_is_unsupported() {
        let mem = seeded(1).await;
        let err = Builder::new("items").group("even").execute(&mem).await.unwrap_err();
        assert!(matches!(err, OrmError::Unsupported(_)));
    }

    #[tokio::test]
    async fn rollback_restores_snapshot() {
        let mem = seeded(2).await;
        mem.begin().await.unwrap();
        assert!(mem.in_transaction());
        assert!(mem.begin().await.is_err());
        Builder::new("items")
            .delete_where(record! { "n" => 1 })
            .execute(&mem)
            .await
            .unwrap();
        assert_eq!(mem.documents("items").len(), 1);
        mem.rollback().await.unwrap();
        assert_eq!(mem.documents("items").len(), 2);
        assert!(mem.commit().await.is_err());
    }
}
