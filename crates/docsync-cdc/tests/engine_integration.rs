//! Engine integration tests against the in-memory source and sink.

mod harness;

use docsync_cdc::common::{ColumnValue, FieldDescriptor};
use docsync_cdc::memory::{MemorySink, MemorySource, SinkCall};
use docsync_cdc::{CdcError, CheckpointBackend, LogEntry, MemoryCheckpointStore, Timestamp};
use harness::{config, config_with_retry, init_test_logging, wait_until, TestContext};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn users_table(sink: &MemorySink) {
    sink.create_table(
        "users",
        vec![
            FieldDescriptor::new("_id", "INT"),
            FieldDescriptor::new("name", "VARCHAR(255)"),
            FieldDescriptor::new("age", "INT"),
        ],
    );
}

#[tokio::test]
async fn test_new_dataset_is_imported_then_tailed() {
    init_test_logging();

    let mut ctx = TestContext::new(config(""));
    ctx.source.put_documents(
        "users",
        vec![
            json!({"_id": 1, "name": "ann", "age": 30}),
            json!({"_id": 2, "name": "bob", "age": 31}),
            json!({"_id": 3, "name": "cy", "age": 32}),
        ],
    );
    ctx.start();

    // import, then one restart onto a cursor covering users
    ctx.wait_streaming(1).await;
    let stats = ctx.engine.stats();
    assert_eq!(stats.restarts, 1);
    assert_eq!(stats.imports_completed, 1);
    assert_eq!(stats.records_imported, 3);
    assert_eq!(ctx.sink.row_count("users"), 3);
    assert_eq!(ctx.engine.checkpoint().current(), Timestamp::ZERO);

    let insert_ts = Timestamp::new(1_700_000_000, 1);
    ctx.source.append(LogEntry::insert(
        "app.users",
        insert_ts,
        json!({"_id": 4, "name": "dee", "age": 40}),
    ));
    let sink = ctx.sink.clone();
    wait_until("fourth row", move || sink.row_count("users") == 4).await;
    assert_eq!(ctx.engine.checkpoint().current(), insert_ts);

    let update_ts = Timestamp::new(1_700_000_000, 2);
    ctx.source.append(LogEntry::update(
        "app.users",
        update_ts,
        json!({"_id": 2}),
        json!({"$set": {"age": 33}}),
    ));
    let sink = ctx.sink.clone();
    wait_until("update applied", move || {
        matches!(sink.calls().last(), Some(SinkCall::Update { .. }))
    })
    .await;

    let calls = ctx.sink.calls();
    assert_eq!(
        calls.last(),
        Some(&SinkCall::Update {
            table: "users".to_string(),
            id: ColumnValue::Int(2),
            columns: vec!["age".to_string()],
        })
    );
    let inserts = calls
        .iter()
        .filter(|c| matches!(c, SinkCall::Insert { .. }))
        .count();
    assert_eq!(inserts, 4);

    let row = ctx.sink.row("users", &ColumnValue::Int(2)).unwrap();
    assert_eq!(row["age"], ColumnValue::Int(33));
    assert_eq!(row["name"], ColumnValue::Text("bob".to_string()));
    assert_eq!(
        ctx.checkpoints.load("mirror").await.unwrap(),
        Some(update_ts)
    );

    ctx.stop().await.unwrap();
}

#[tokio::test]
async fn test_unchanged_dataset_tails_while_others_import() {
    init_test_logging();

    let yaml = "  orders:\n    _id: INT\n    total: INT";
    let mut ctx = TestContext::new(config(yaml));
    users_table(&ctx.sink);
    ctx.source
        .put_documents("orders", vec![json!({"_id": 10, "total": 5})]);
    ctx.start();

    // users is tailed by the first session, orders joins after the restart
    ctx.wait_streaming(2).await;
    assert_eq!(ctx.engine.stats().restarts, 1);
    assert_eq!(ctx.sink.row_count("orders"), 1);

    let calls = ctx.sink.calls();
    assert_eq!(
        calls[0],
        SinkCall::ReplaceTables {
            tables: vec!["orders".to_string()]
        }
    );

    ctx.source.append(LogEntry::insert(
        "app.users",
        Timestamp::new(10, 0),
        json!({"_id": 1, "name": "ann"}),
    ));
    ctx.source.append(LogEntry::insert(
        "app.orders",
        Timestamp::new(10, 1),
        json!({"_id": 11, "total": 9}),
    ));
    let sink = ctx.sink.clone();
    wait_until("both datasets tailed", move || {
        sink.row_count("users") == 1 && sink.row_count("orders") == 2
    })
    .await;

    ctx.stop().await.unwrap();
}

#[tokio::test]
async fn test_drifted_dataset_is_rebuilt() {
    init_test_logging();

    let mut ctx = TestContext::new(config(""));
    ctx.sink.create_table(
        "users",
        vec![
            FieldDescriptor::new("_id", "INT"),
            FieldDescriptor::new("name", "VARCHAR(255)"),
            FieldDescriptor::new("legacy", "TEXT"),
        ],
    );
    ctx.source
        .put_documents("users", vec![json!({"_id": 1, "name": "ann", "age": 3})]);
    ctx.start();

    ctx.wait_streaming(1).await;
    assert_eq!(ctx.engine.stats().imports_completed, 1);
    assert_eq!(ctx.sink.row_count("users"), 1);

    ctx.stop().await.unwrap();
}

#[tokio::test]
async fn test_resumes_strictly_after_stored_checkpoint() {
    init_test_logging();

    let source = Arc::new(MemorySource::new());
    let sink = Arc::new(MemorySink::new());
    users_table(&sink);
    let checkpoints = Arc::new(MemoryCheckpointStore::with_checkpoint(
        "mirror",
        Timestamp::from_u64(5),
    ));
    for ts in [3u64, 5, 7] {
        source.append(LogEntry::insert(
            "app.users",
            Timestamp::from_u64(ts),
            json!({"_id": ts}),
        ));
    }

    let mut ctx = TestContext::with_parts(config(""), source, sink, checkpoints);
    ctx.start();

    let sink = ctx.sink.clone();
    wait_until("entry after checkpoint", move || sink.row_count("users") == 1).await;
    assert!(ctx.sink.row("users", &ColumnValue::Int(7)).is_some());
    assert_eq!(ctx.engine.checkpoint().current(), Timestamp::from_u64(7));
    assert_eq!(ctx.engine.stats().restarts, 0);

    ctx.stop().await.unwrap();
}

#[tokio::test]
async fn test_initial_position_latest_skips_history() {
    init_test_logging();

    let mut ctx = TestContext::new(config("initial_position: latest"));
    users_table(&ctx.sink);
    ctx.source.append(LogEntry::insert(
        "app.users",
        Timestamp::from_u64(1),
        json!({"_id": 1}),
    ));
    ctx.source.append(LogEntry::insert(
        "app.users",
        Timestamp::from_u64(2),
        json!({"_id": 2}),
    ));
    ctx.start();

    ctx.wait_streaming(1).await;
    ctx.source.append(LogEntry::insert(
        "app.users",
        Timestamp::from_u64(3),
        json!({"_id": 3}),
    ));
    let sink = ctx.sink.clone();
    wait_until("live entry", move || sink.row_count("users") == 1).await;
    assert!(ctx.sink.row("users", &ColumnValue::Int(3)).is_some());

    ctx.stop().await.unwrap();
}

#[tokio::test]
async fn test_reconnects_after_cursor_close_and_error() {
    init_test_logging();

    let mut ctx = TestContext::new(config(""));
    users_table(&ctx.sink);
    ctx.start();

    ctx.wait_streaming(1).await;
    ctx.source.close_cursors();
    ctx.wait_streaming(2).await;
    ctx.source.break_cursors("cursor killed");
    ctx.wait_streaming(3).await;

    assert_eq!(ctx.engine.stats().reconnects, 2);

    ctx.source.append(LogEntry::insert(
        "app.users",
        Timestamp::from_u64(1),
        json!({"_id": 1}),
    ));
    let sink = ctx.sink.clone();
    wait_until("entry after reconnect", move || sink.row_count("users") == 1).await;

    ctx.stop().await.unwrap();
}

#[tokio::test]
async fn test_connect_failure_is_retried() {
    init_test_logging();

    let mut ctx = TestContext::new(config(""));
    users_table(&ctx.sink);
    ctx.source.fail_next_tail();
    ctx.start();

    ctx.wait_streaming(1).await;
    assert_eq!(ctx.engine.stats().connect_failures, 1);

    ctx.stop().await.unwrap();
}

#[tokio::test]
async fn test_rejected_write_stops_engine() {
    init_test_logging();

    let mut ctx = TestContext::new(config(""));
    users_table(&ctx.sink);
    ctx.sink.fail_writes_to("users");
    ctx.start();

    ctx.wait_streaming(1).await;
    ctx.source.append(LogEntry::insert(
        "app.users",
        Timestamp::from_u64(1),
        json!({"_id": 1}),
    ));

    let err = ctx.join().await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, CdcError::Write { ref dataset, .. } if dataset == "users"));
}

#[tokio::test]
async fn test_failed_import_is_not_tailed() {
    init_test_logging();

    let yaml = "  orders:\n    _id: INT\n    total: INT";
    let mut ctx = TestContext::new(config(yaml));
    users_table(&ctx.sink);
    ctx.sink.fail_writes_to("orders");
    ctx.source
        .put_documents("orders", vec![json!({"_id": 10, "total": 5})]);
    ctx.start();

    let engine = ctx.engine.clone();
    wait_until("import failure", move || engine.stats().imports_failed == 1).await;

    // no restart: users keeps its original session
    assert_eq!(ctx.engine.stats().restarts, 0);
    assert_eq!(ctx.source.tail_count(), 1);

    ctx.source.append(LogEntry::insert(
        "app.users",
        Timestamp::from_u64(1),
        json!({"_id": 1}),
    ));
    let sink = ctx.sink.clone();
    wait_until("users still tailed", move || sink.row_count("users") == 1).await;

    ctx.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_with_no_cursor_open() {
    init_test_logging();

    // the only dataset fails its import, so no session ever opens a cursor
    let mut ctx = TestContext::new(config(""));
    ctx.sink.fail_writes_to("users");
    ctx.source.put_documents("users", vec![json!({"_id": 1})]);
    ctx.start();

    let engine = ctx.engine.clone();
    wait_until("import failure", move || engine.stats().imports_failed == 1).await;
    assert_eq!(ctx.source.tail_count(), 0);

    ctx.stop().await.unwrap();
}

#[tokio::test]
async fn test_import_batch_restarts_once() {
    init_test_logging();

    let yaml = "  orders:\n    _id: INT\n    total: INT\n  items:\n    _id: INT\n    sku: VARCHAR(32)\n  events:\n    _id: INT\n    kind: VARCHAR(32)";
    let mut ctx = TestContext::new(config(yaml));
    users_table(&ctx.sink);
    ctx.source.put_documents(
        "orders",
        (0..50).map(|i| json!({"_id": i, "total": i * 2})).collect(),
    );
    ctx.source
        .put_documents("items", vec![json!({"_id": 1, "sku": "a"}), json!({"_id": 2, "sku": "b"})]);
    ctx.start();

    ctx.wait_streaming(2).await;
    let stats = ctx.engine.stats();
    assert_eq!(stats.restarts, 1);
    assert_eq!(stats.imports_completed, 3);
    assert_eq!(stats.records_imported, 52);

    // the only restart came after every load and covers the whole batch
    assert_eq!(ctx.sink.row_count("orders"), 50);
    assert_eq!(ctx.sink.row_count("items"), 2);
    let cursors = ctx.source.cursor_namespaces();
    assert_eq!(cursors[0], vec!["app.users".to_string()]);
    let second: BTreeSet<String> = cursors[1].iter().cloned().collect();
    let expected: BTreeSet<String> = ["app.users", "app.orders", "app.items", "app.events"]
        .into_iter()
        .map(str::to_string)
        .collect();
    assert_eq!(second, expected);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ctx.source.tail_count(), 2);
    assert_eq!(ctx.engine.stats().restarts, 1);

    ctx.stop().await.unwrap();
}

#[tokio::test]
async fn test_tables_rebuilt_only_after_first_session_streams() {
    init_test_logging();

    let yaml = "  orders:\n    _id: INT\n    total: INT";
    let mut ctx = TestContext::new(config_with_retry(500, yaml));
    users_table(&ctx.sink);
    ctx.source
        .put_documents("orders", vec![json!({"_id": 10, "total": 5})]);
    ctx.source.fail_next_tail();
    ctx.start();

    let engine = ctx.engine.clone();
    wait_until("cursor open failure", move || engine.stats().connect_failures == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // still backing off: no session has streamed, so no DDL yet
    assert_eq!(ctx.source.tail_count(), 0);
    assert!(ctx.sink.calls().is_empty());

    ctx.wait_streaming(2).await;
    let calls = ctx.sink.calls();
    assert_eq!(
        calls[0],
        SinkCall::ReplaceTables {
            tables: vec!["orders".to_string()]
        }
    );
    assert_eq!(ctx.source.cursor_namespaces()[0], vec!["app.users".to_string()]);

    ctx.stop().await.unwrap();
}

#[tokio::test]
async fn test_undecodable_stream_waits_before_reconnect() {
    init_test_logging();

    let mut ctx = TestContext::new(config_with_retry(200, ""));
    users_table(&ctx.sink);
    ctx.start();

    ctx.wait_streaming(1).await;
    let failed_at = Instant::now();
    ctx.source.corrupt_cursors("truncated entry");
    ctx.wait_streaming(2).await;

    assert!(failed_at.elapsed() >= Duration::from_millis(200));
    let stats = ctx.engine.stats();
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.connect_failures, 0);

    ctx.stop().await.unwrap();
}

#[tokio::test]
async fn test_unhealthy_sink_stops_startup() {
    init_test_logging();

    let mut ctx = TestContext::new(config(""));
    ctx.sink.set_healthy(false);
    ctx.start();

    let err = ctx.join().await.unwrap_err();
    assert!(matches!(err, CdcError::Unavailable(_)));
    assert!(ctx.sink.calls().is_empty());
    assert_eq!(ctx.source.tail_count(), 0);
}
