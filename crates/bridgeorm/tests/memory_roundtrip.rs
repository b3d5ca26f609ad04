//! End-to-end runs against the in-memory document backend.

use bridgeorm::{
    BackendKind, Builder, CommandExecutor, CommandLog, Connection, ConnectionRegistry,
    MemoryExecutor, OrmConfig, OrmError, OrmResult, SupportsTransactions, Value,
    conditions_from_underscored, record,
};
use std::collections::HashSet;
use std::sync::Arc;

async fn seeded(rows: i64) -> MemoryExecutor {
    let exec = MemoryExecutor::new().with_log(CommandLog::disabled());
    for i in 1..=rows {
        Builder::new("items")
            .insert(record! { "name" => format!("row-{i}"), "n" => i })
            .execute(&exec)
            .await
            .unwrap();
    }
    exec
}

fn ids(rows: &[bridgeorm::Record]) -> Vec<i64> {
    rows.iter().map(|r| r["_id"].as_i64().unwrap()).collect()
}

#[tokio::test]
async fn limit_and_offset_slice_in_insertion_order() {
    let exec = seeded(20).await;

    let rows = Builder::new("items")
        .limit(10)
        .offset(5)
        .execute(&exec)
        .await
        .unwrap()
        .into_rows()
        .unwrap();

    assert_eq!(ids(&rows), (6..=15).collect::<Vec<_>>());
    assert_eq!(rows[0]["name"], "row-6");
}

#[tokio::test]
async fn zero_limit_means_unlimited() {
    let exec = seeded(20).await;

    let rows = Builder::new("items")
        .limit(0)
        .offset(0)
        .execute(&exec)
        .await
        .unwrap()
        .into_rows()
        .unwrap();
    assert_eq!(rows.len(), 20);
}

#[tokio::test]
async fn descending_order_reverses_natural_order() {
    let exec = seeded(5).await;

    let rows = Builder::new("items")
        .order("_id DESC")
        .limit(2)
        .execute(&exec)
        .await
        .unwrap()
        .into_rows()
        .unwrap();
    assert_eq!(ids(&rows), vec![5, 4]);
}

#[tokio::test]
async fn dynamic_finder_conditions_filter_rows() {
    let exec = seeded(10).await;

    let cond = conditions_from_underscored(
        BackendKind::Document,
        "id_or_name",
        &[Value::from(3), Value::from("row-7")],
        None,
    )
    .unwrap()
    .unwrap();

    let rows = Builder::new("items")
        .filter(cond)
        .execute(&exec)
        .await
        .unwrap()
        .into_rows()
        .unwrap();
    assert_eq!(ids(&rows), vec![3, 7]);

    let count = Builder::new("items")
        .count()
        .filter(record! { "name" => "row-2" })
        .execute(&exec)
        .await
        .unwrap()
        .count();
    assert_eq!(count, Some(1));
}

#[tokio::test]
async fn update_and_delete_need_a_predicate() {
    let exec = seeded(3).await;

    let err = Builder::new("items")
        .update(record! { "name" => "x" })
        .execute(&exec)
        .await
        .unwrap_err();
    assert!(err.is_missing_predicate());

    let err = Builder::new("items").delete().execute(&exec).await.unwrap_err();
    assert!(err.is_missing_predicate());

    let updated = Builder::new("items")
        .update(record! { "name" => "renamed" })
        .eq("_id", 2)
        .execute(&exec)
        .await
        .unwrap();
    assert_eq!(updated.affected(), Some(1));

    let docs = exec.documents("items");
    assert_eq!(docs[1]["name"], "renamed");
    // Fields outside the update are untouched.
    assert_eq!(docs[1]["n"], 2);
    assert_eq!(docs[0]["name"], "row-1");

    let deleted = Builder::new("items")
        .delete_where(record! { "_id" => [1, 3] })
        .execute(&exec)
        .await
        .unwrap();
    assert_eq!(deleted.affected(), Some(2));
    assert_eq!(ids(&exec.documents("items")), vec![2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_get_unique_identifiers() {
    let exec = Arc::new(MemoryExecutor::new().with_log(CommandLog::disabled()));

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let exec = Arc::clone(&exec);
            tokio::spawn(async move {
                Builder::new("events")
                    .insert(record! { "seq" => i })
                    .execute(exec.as_ref())
                    .await
            })
        })
        .collect();

    let mut issued = HashSet::new();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        issued.insert(outcome.inserted_id().and_then(Value::as_i64).unwrap());
    }
    assert_eq!(issued.len(), 50);
    assert_eq!(exec.documents("events").len(), 50);
    assert_eq!(issued, (1..=50).collect::<HashSet<i64>>());
}

#[tokio::test]
async fn explicit_identifier_is_kept_and_advances_the_counter() {
    let exec = MemoryExecutor::new().with_log(CommandLog::disabled());

    let outcome = Builder::new("items")
        .insert(record! { "_id" => 10, "name" => "ten" })
        .execute(&exec)
        .await
        .unwrap();
    assert_eq!(outcome.inserted_id(), Some(&Value::from(10)));

    let next = Builder::new("items")
        .insert(record! { "name" => "next" })
        .execute(&exec)
        .await
        .unwrap();
    assert_eq!(next.inserted_id(), Some(&Value::from(11)));
    assert_eq!(exec.last_insert_identifier(), Some(Value::from(11)));

    let err = Builder::new("items")
        .insert(record! { "_id" => 10 })
        .execute(&exec)
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Backend(_)));
}

#[tokio::test]
async fn nested_begin_fails() {
    let exec = MemoryExecutor::new();

    exec.begin().await.unwrap();
    let err = exec.begin().await.unwrap_err();
    assert!(matches!(err, OrmError::Transaction(_)));
    exec.rollback().await.unwrap();

    assert!(!exec.in_transaction());
    assert!(exec.commit().await.is_err());
}

async fn insert_then_fail(exec: &MemoryExecutor) -> OrmResult<()> {
    bridgeorm::transaction!(exec, {
        Builder::new("accounts")
            .insert(record! { "name" => "temp" })
            .execute(exec)
            .await?;
        Err::<(), OrmError>(OrmError::invalid_argument("abort"))
    })
}

async fn insert_and_commit(exec: &MemoryExecutor) -> OrmResult<u64> {
    bridgeorm::transaction!(exec, {
        Builder::new("accounts")
            .insert(record! { "name" => "kept" })
            .execute(exec)
            .await?;
        Ok::<u64, OrmError>(1)
    })
}

#[tokio::test]
async fn transaction_macro_rolls_back_on_error() {
    let exec = MemoryExecutor::new().with_log(CommandLog::disabled());

    let err = insert_then_fail(&exec).await.unwrap_err();
    assert!(err.is_invalid_argument());
    assert!(exec.documents("accounts").is_empty());
    assert!(!exec.in_transaction());

    assert_eq!(insert_and_commit(&exec).await.unwrap(), 1);
    let docs = exec.documents("accounts");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["name"], "kept");
}

#[tokio::test]
async fn registry_serves_configured_memory_connections() {
    let config = OrmConfig::from_toml_str(
        r#"
        [connections]
        scratch = "memory://"

        [logging]
        enabled = false
        "#,
    )
    .unwrap();
    let registry = ConnectionRegistry::from_config(&config).await.unwrap();
    let conn = registry.default_connection().unwrap();
    let conn: &Connection = &conn;
    assert_eq!(conn.backend_kind(), BackendKind::Document);

    conn.builder("notes")
        .insert(record! { "body" => "hello" })
        .execute(conn)
        .await
        .unwrap();

    let same = registry.get("scratch").unwrap();
    let rows = Builder::new("notes")
        .execute(same.as_ref())
        .await
        .unwrap()
        .into_rows()
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["body"], "hello");
}
