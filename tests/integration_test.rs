//! End-to-end tests against the embedded façade: durability across
//! simulated crashes, snapshot isolation under concurrency, and the
//! relational/document/vector/graph models working over one store.

use anyhow::Result;
use polydb::access::value::Value;
use polydb::{Config, Database, DbError};
use serde_json::json;
use std::path::Path;
use tempfile::tempdir;

fn create(path: &Path) -> Database {
    Database::create(path, Config::default()).unwrap()
}

/// Simulates a crash: the process "dies" without flushing or closing.
fn kill(db: Database) {
    std::mem::forget(db);
}

#[test]
fn test_full_sql_lifecycle_across_restart() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");
    {
        let db = create(&path);
        db.execute("CREATE TABLE users(id INT PRIMARY KEY, name STRING)")?;
        db.execute("INSERT INTO users VALUES (1, 'Alice'), (2, 'Bob')")?;
        let rs = db.execute("SELECT * FROM users WHERE id = 1")?;
        assert_eq!(
            rs.rows,
            vec![vec![Value::Int32(1), Value::Text("Alice".into())]]
        );
        db.close()?;
    }
    {
        let db = Database::open(&path)?;
        let rs = db.execute("SELECT name FROM users ORDER BY id")?;
        assert_eq!(rs.rows.len(), 2);
        assert_eq!(rs.rows[0][0], Value::Text("Alice".into()));

        // The primary key index survived the restart.
        let rs = db.execute("SELECT name FROM users WHERE id = 2")?;
        assert_eq!(rs.rows, vec![vec![Value::Text("Bob".into())]]);
        db.close()?;
    }
    Ok(())
}

#[test]
fn test_committed_rows_survive_crash() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");
    {
        let db = create(&path);
        db.execute("CREATE TABLE t(id INT PRIMARY KEY, v STRING)")?;
        db.execute("INSERT INTO t VALUES (1, 'durable')")?;
        // No close, no checkpoint: only the WAL has this commit.
        kill(db);
    }
    {
        let db = Database::open(&path)?;
        let rs = db.execute("SELECT v FROM t WHERE id = 1")?;
        assert_eq!(rs.rows, vec![vec![Value::Text("durable".into())]]);
        db.close()?;
    }
    Ok(())
}

#[test]
fn test_uncommitted_work_discarded_by_recovery() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");
    {
        let db = create(&path);
        db.execute("CREATE TABLE t(id INT PRIMARY KEY)")?;
        db.execute("INSERT INTO t VALUES (1)")?;
        db.execute("BEGIN")?;
        db.execute("INSERT INTO t VALUES (2)")?;
        // The open transaction never commits before the crash.
        kill(db);
    }
    {
        let db = Database::open(&path)?;
        let rs = db.execute("SELECT * FROM t")?;
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(rs.rows[0][0], Value::Int32(1));
        db.close()?;
    }
    Ok(())
}

#[test]
fn test_multi_model_state_survives_crash() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");
    {
        let db = create(&path);
        db.store_vector("emb", "doc1", vec![0.1, 0.2, 0.3])?;
        db.store_vector("emb", "doc2", vec![0.9, 0.8, 0.7])?;
        db.store_node("g", "alice", json!({"label": "Person"}))?;
        db.store_node("g", "bob", json!({}))?;
        db.store_edge("g", "alice", "bob", json!({"type": "FRIENDS"}))?;
        kill(db);
    }
    {
        let db = Database::open(&path)?;
        // In-memory vector and adjacency indexes were rebuilt from pages.
        let hits = db.vector_search("emb", vec![0.1, 0.2, 0.31], 1)?;
        assert_eq!(hits[0].0, "doc1");
        assert_eq!(db.neighbors("g", "alice", "FRIENDS")?, vec!["bob"]);
        assert_eq!(
            db.get_node("g", "alice")?,
            Some(json!({"label": "Person"}))
        );
        // The dimension constraint was restored too.
        assert!(db.store_vector("emb", "bad", vec![1.0]).is_err());
        db.close()?;
    }
    Ok(())
}

#[test]
fn test_first_committer_wins_scenario() -> Result<()> {
    let dir = tempdir()?;
    let db = create(&dir.path().join("db"));
    db.execute("CREATE TABLE accounts(id INT PRIMARY KEY, age INT)")?;
    let row_id = db.insert(
        "accounts",
        vec![
            ("id".to_string(), Value::Int32(1)),
            ("age".to_string(), Value::Int32(25)),
        ],
    )?;

    // Both transactions snapshot age=25, then race to update it.
    let ta = db.transaction();
    let tb = db.transaction();
    ta.update("accounts", row_id, vec![("age".to_string(), Value::Int32(30))])?;
    tb.update("accounts", row_id, vec![("age".to_string(), Value::Int32(40))])?;

    ta.commit()?;
    let err = tb.commit().unwrap_err();
    assert!(matches!(err, DbError::TransactionConflict(_)));
    assert!(err.is_retryable());

    // The first committer's value survives; the loser can retry.
    let rs = db.execute("SELECT age FROM accounts WHERE id = 1")?;
    assert_eq!(rs.rows[0][0], Value::Int32(30));

    let retry = db.transaction();
    retry.update("accounts", row_id, vec![("age".to_string(), Value::Int32(40))])?;
    retry.commit()?;
    let rs = db.execute("SELECT age FROM accounts WHERE id = 1")?;
    assert_eq!(rs.rows[0][0], Value::Int32(40));
    Ok(())
}

#[test]
fn test_transaction_handle_isolation() -> Result<()> {
    let dir = tempdir()?;
    let db = create(&dir.path().join("db"));
    db.execute("CREATE TABLE t(id INT PRIMARY KEY, v INT)")?;

    let writer = db.transaction();
    let id = writer.insert(
        "t",
        vec![
            ("id".to_string(), Value::Int32(1)),
            ("v".to_string(), Value::Int32(5)),
        ],
    )?;
    // The writer sees its own staged row; a concurrent reader does not.
    assert!(writer.get("t", id)?.is_some());
    let reader = db.transaction();
    assert!(reader.get("t", id)?.is_none());
    writer.commit()?;

    // The reader's snapshot predates the commit.
    assert!(reader.get("t", id)?.is_none());
    reader.rollback()?;
    assert!(db.get("t", id)?.is_some());
    Ok(())
}

#[test]
fn test_snapshot_isolation_across_threads() -> Result<()> {
    let dir = tempdir()?;
    let db = std::sync::Arc::new(create(&dir.path().join("db")));
    db.execute("CREATE TABLE counters(id INT PRIMARY KEY, n INT)")?;
    db.execute("INSERT INTO counters VALUES (1, 0)")?;

    // Writers bump disjoint rows concurrently; a reader scans throughout.
    let mut handles = Vec::new();
    for t in 0..4 {
        let db = db.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..10 {
                let id = 100 + t * 10 + i;
                db.execute(&format!("INSERT INTO counters VALUES ({}, {})", id, i))
                    .unwrap();
            }
        }));
    }
    let reader = {
        let db = db.clone();
        std::thread::spawn(move || {
            for _ in 0..20 {
                let rs = db.execute("SELECT COUNT(*) FROM counters").unwrap();
                // Every scan sees a consistent snapshot: at least the seed row.
                let Value::Int64(n) = rs.rows[0][0] else {
                    panic!("count() returned a non-integer")
                };
                assert!(n >= 1);
            }
        })
    };
    for handle in handles {
        handle.join().unwrap();
    }
    reader.join().unwrap();

    let rs = db.execute("SELECT COUNT(*) FROM counters")?;
    assert_eq!(rs.rows[0][0], Value::Int64(41));
    Ok(())
}

#[test]
fn test_checkpoint_truncates_wal_and_preserves_data() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");
    let db = create(&path);
    db.execute("CREATE TABLE t(id INT PRIMARY KEY, pad STRING)")?;
    let pad = "p".repeat(200);
    for i in 0..100 {
        db.execute(&format!("INSERT INTO t VALUES ({}, '{}')", i, pad))?;
    }
    db.checkpoint()?;

    // After the checkpoint, reopening must not need the pruned segments.
    db.close()?;
    let db = Database::open(&path)?;
    assert_eq!(db.row_count("t")?, 100);
    let rs = db.execute("SELECT pad FROM t WHERE id = 42")?;
    assert_eq!(rs.rows.len(), 1);
    db.close()?;
    Ok(())
}

#[test]
fn test_secondary_index_used_and_correct_after_restart() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");
    {
        let db = create(&path);
        db.execute("CREATE TABLE words(id INT PRIMARY KEY, w STRING)")?;
        for (i, w) in ["delta", "alpha", "charlie", "bravo"].iter().enumerate() {
            db.execute(&format!("INSERT INTO words VALUES ({}, '{}')", i, w))?;
        }
        db.execute("CREATE INDEX words_w ON words(w)")?;
        db.close()?;
    }
    {
        let db = Database::open(&path)?;
        let rs = db.execute("SELECT id FROM words WHERE w = 'charlie'")?;
        assert_eq!(rs.rows, vec![vec![Value::Int32(2)]]);

        // Range over the indexed column stays sorted.
        let rs = db.execute("SELECT w FROM words WHERE w >= 'b' AND w <= 'd' ORDER BY w")?;
        let words: Vec<&Value> = rs.rows.iter().map(|r| &r[0]).collect();
        assert_eq!(
            words,
            vec![
                &Value::Text("bravo".into()),
                &Value::Text("charlie".into())
            ]
        );
        db.close()?;
    }
    Ok(())
}

#[test]
fn test_json_document_queries() -> Result<()> {
    let dir = tempdir()?;
    let db = create(&dir.path().join("db"));
    db.execute("CREATE TABLE docs(id INT PRIMARY KEY, body JSON)")?;
    db.execute(r#"INSERT INTO docs VALUES (1, '{"kind": "note", "tags": ["a", "b"]}')"#)?;

    let rs = db.execute("SELECT body FROM docs WHERE id = 1")?;
    assert_eq!(
        rs.rows[0][0],
        Value::Json(json!({"kind": "note", "tags": ["a", "b"]}))
    );
    Ok(())
}

#[test]
fn test_vector_search_ordering_and_ties() -> Result<()> {
    let dir = tempdir()?;
    let db = create(&dir.path().join("db"));
    db.store_vector("v", "first", vec![1.0, 0.0])?;
    db.store_vector("v", "second", vec![0.0, 1.0])?;
    db.store_vector("v", "far", vec![5.0, 5.0])?;

    let hits = db.vector_search("v", vec![0.0, 0.0], 3)?;
    assert_eq!(hits.len(), 3);
    // Equidistant vectors come back in insertion order.
    assert_eq!(hits[0].0, "first");
    assert_eq!(hits[1].0, "second");
    assert_eq!(hits[2].0, "far");
    assert!(hits[0].1 <= hits[1].1 && hits[1].1 <= hits[2].1);

    // k bounds the result length.
    assert_eq!(db.vector_search("v", vec![0.0, 0.0], 2)?.len(), 2);
    Ok(())
}

#[test]
fn test_rollback_leaves_no_trace() -> Result<()> {
    let dir = tempdir()?;
    let db = create(&dir.path().join("db"));
    db.execute("CREATE TABLE t(id INT PRIMARY KEY, v INT)")?;
    db.execute("INSERT INTO t VALUES (1, 10)")?;

    db.execute("BEGIN")?;
    db.execute("UPDATE t SET v = 99 WHERE id = 1")?;
    db.execute("INSERT INTO t VALUES (2, 20)")?;
    db.execute("ROLLBACK")?;

    let rs = db.execute("SELECT id, v FROM t")?;
    assert_eq!(rs.rows, vec![vec![Value::Int32(1), Value::Int32(10)]]);
    Ok(())
}

#[test]
fn test_constraint_violation_aborts_statement() -> Result<()> {
    let dir = tempdir()?;
    let db = create(&dir.path().join("db"));
    db.execute("CREATE TABLE t(id INT PRIMARY KEY, v INT)")?;
    db.execute("INSERT INTO t VALUES (1, 10)")?;

    assert!(matches!(
        db.execute("INSERT INTO t VALUES (1, 20)"),
        Err(DbError::ConstraintViolation(_))
    ));
    // The failed statement staged nothing.
    assert_eq!(db.execute("SELECT * FROM t")?.rows.len(), 1);
    Ok(())
}
