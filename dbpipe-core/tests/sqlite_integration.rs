#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::time::Duration;

use dbpipe_core::{
    BatchStream, Condition, DataSource, ErrorKind, Pipeline, Query, RetryPolicy, SqliteSource,
    Value,
};
use futures::TryStreamExt;
use tempfile::TempDir;

struct TestDb {
    _dir: TempDir,
    pipeline: Pipeline<SqliteSource>,
}

async fn setup(retry: RetryPolicy) -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("users.db").display());
    let source = Arc::new(SqliteSource::new(&url).unwrap());
    let pipeline = Pipeline::builder(source)
        .retry(retry)
        .batch_size(100)
        .build()
        .unwrap();

    pipeline
        .execute_all(&[Query::new(
            "CREATE TABLE user_data (
                user_id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT,
                age REAL NOT NULL
            )",
        )])
        .await
        .unwrap();

    TestDb {
        _dir: dir,
        pipeline,
    }
}

async fn count(pipeline: &Pipeline<SqliteSource>) -> i64 {
    let rows = pipeline
        .execute_query(&Query::new("SELECT COUNT(*) AS n FROM user_data"))
        .await
        .unwrap();
    match rows[0].get("n") {
        Some(Value::Int(n)) => *n,
        other => panic!("unexpected count {other:?}"),
    }
}

fn insert(id: i64, name: &str, age: f64) -> Query {
    Query::with_params(
        "INSERT INTO user_data (user_id, name, email, age) VALUES (?, ?, ?, ?)",
        [
            Value::from(id),
            Value::from(name),
            Value::from(format!("{name}@example.com")),
            Value::from(age),
        ],
    )
}

#[tokio::test]
async fn failed_write_rolls_back_earlier_writes() {
    let db = setup(RetryPolicy::none()).await;

    let err = db
        .pipeline
        .execute_all(&[insert(1, "ada", 36.0), insert(1, "grace", 45.0), insert(3, "alan", 41.0)])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Query);
    assert_eq!(count(&db.pipeline).await, 0);
}

#[tokio::test]
async fn committed_writes_are_visible() {
    let db = setup(RetryPolicy::none()).await;

    let executed = db
        .pipeline
        .execute_all(&[insert(1, "ada", 36.0), insert(2, "grace", 45.0)])
        .await
        .unwrap();

    assert_eq!(executed, 2);
    assert_eq!(count(&db.pipeline).await, 2);
}

#[tokio::test]
async fn values_decode_by_storage_class() {
    let db = setup(RetryPolicy::none()).await;
    db.pipeline
        .execute_all(&[Query::new(
            "INSERT INTO user_data (user_id, name, email, age) VALUES (7, 'ada', NULL, 36.5)",
        )])
        .await
        .unwrap();

    let rows = db
        .pipeline
        .fetch_all(&Query::new("SELECT * FROM user_data WHERE user_id = ?").bind(7))
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.columns(), ["user_id", "name", "email", "age"]);
    assert_eq!(row.get("user_id"), Some(&Value::Int(7)));
    assert_eq!(row.get("name"), Some(&Value::Text("ada".into())));
    assert_eq!(row.get("email"), Some(&Value::Null));
    assert_eq!(row.get("age"), Some(&Value::Float(36.5)));
}

#[tokio::test]
async fn streams_in_batches_and_averages() {
    let db = setup(RetryPolicy::none()).await;
    let inserts: Vec<Query> = (0..250)
        .map(|i| insert(i, &format!("user{i}"), (i % 50) as f64))
        .collect();
    db.pipeline.execute_all(&inserts).await.unwrap();

    let query = Query::new("SELECT * FROM user_data ORDER BY user_id");
    let sizes = db
        .pipeline
        .stream(&query, async |batches: BatchStream<'_>| {
            batches.map_ok(|batch| batch.len()).try_collect::<Vec<_>>().await
        })
        .await
        .unwrap();
    assert_eq!(sizes, vec![100, 100, 50]);

    let older: Condition = "age > 25".parse().unwrap();
    let matching = db
        .pipeline
        .collect_filtered(&query, move |row| older.matches(row))
        .await
        .unwrap();
    assert_eq!(matching.len(), 5 * 24);

    let mean = db.pipeline.mean(&query, "age", |_| true).await.unwrap();
    assert_eq!(mean, Some(24.5));
}

#[tokio::test]
async fn named_parameters_are_rejected() {
    let db = setup(RetryPolicy::none()).await;
    let err = db
        .pipeline
        .query(&Query::new("SELECT * FROM user_data WHERE user_id = :id").bind_named("id", 1))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Query);
}

#[tokio::test]
async fn missing_directory_is_a_connection_error() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("missing").join("users.db").display());
    let source = SqliteSource::new(&url).unwrap();

    let err = source.acquire().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn syntax_errors_are_retried_then_reported() {
    let db = setup(RetryPolicy::new(2, Duration::from_millis(1))).await;

    let err = db
        .pipeline
        .query(&Query::new("SELEKT * FROM user_data"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Query);
    assert!(db.pipeline.cache().is_empty());
}
