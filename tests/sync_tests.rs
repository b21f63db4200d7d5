//! Schema synchronizer behavior against a scripted Postgres-style catalog

mod common;

use common::FakeDatabase;
use gird_orm::core::schema::{int, text, Schema, Table};
use gird_orm::{DatabaseError, Migrator};

fn users() -> Table {
    Table::new("users")
        .column("id", int().primary_key())
        .column("name", text())
}

fn posts() -> Table {
    Table::new("posts")
        .column("id", int().primary_key())
        .column("title", text())
        .column("author_id", int().references("users", "id"))
}

fn position(created: &[String], table: &str) -> usize {
    created
        .iter()
        .position(|t| t == table)
        .unwrap_or_else(|| panic!("{} was not created", table))
}

#[tokio::test]
async fn test_empty_registry_issues_nothing() {
    let db = FakeDatabase::new();
    let schema = Schema::new();

    let report = Migrator::new(&db, &schema).sync().await.unwrap();

    assert_eq!(report.passes, 0);
    assert!(report.is_noop());
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn test_referencing_table_registered_first_is_postponed() {
    let db = FakeDatabase::new();
    let schema = Schema::new().table(posts()).table(users());

    let report = Migrator::new(&db, &schema).sync().await.unwrap();

    assert_eq!(report.passes, 2);
    assert_eq!(report.created, vec!["users", "posts"]);
    assert_eq!(db.created(), vec!["users", "posts"]);
    // posts is held back by the catalog check, not by a failed CREATE
    assert_eq!(db.count("CREATE TABLE"), 2);
}

#[tokio::test]
async fn test_referenced_table_registered_first_needs_one_pass() {
    let db = FakeDatabase::new();
    let schema = Schema::new().table(users()).table(posts());

    let report = Migrator::new(&db, &schema).sync().await.unwrap();

    assert_eq!(report.passes, 1);
    assert_eq!(db.count("CREATE TABLE"), 2);
    let created = db.created();
    assert!(position(&created, "users") < position(&created, "posts"));
}

#[tokio::test]
async fn test_reverse_chain_converges() {
    let db = FakeDatabase::new();
    let schema = Schema::new()
        .table(
            Table::new("comments")
                .column("id", int().primary_key())
                .column("post_id", int().references("posts", "id")),
        )
        .table(posts())
        .table(users());

    let report = Migrator::new(&db, &schema).sync().await.unwrap();

    assert_eq!(report.passes, 3);
    assert_eq!(db.created(), vec!["users", "posts", "comments"]);
}

#[tokio::test]
async fn test_mutual_references_deadlock() {
    let db = FakeDatabase::new();
    let schema = Schema::new()
        .table(
            Table::new("a")
                .column("id", int().primary_key())
                .column("b_id", int().references("b", "id")),
        )
        .table(
            Table::new("b")
                .column("id", int().primary_key())
                .column("a_id", int().references("a", "id")),
        );

    let err = Migrator::new(&db, &schema).sync().await.unwrap_err();

    match err {
        DatabaseError::Deadlock { tables } => assert_eq!(tables, vec!["a", "b"]),
        other => panic!("expected deadlock, got {:?}", other),
    }
    assert!(db.created().is_empty());
}

#[tokio::test]
async fn test_reference_to_unregistered_table_deadlocks() {
    let db = FakeDatabase::new();
    let schema = Schema::new().table(posts());

    let err = Migrator::new(&db, &schema).sync().await.unwrap_err();

    assert!(err.is_convergence_error());
    assert!(err.to_string().contains("posts"));
    // The missing target is caught from the catalog, no DDL is sent
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn test_driver_message_is_recognized_as_missing_relation() {
    let db = FakeDatabase::new();
    // A plain query error carrying the Postgres message is still retryable
    db.fail_on("posts", "relation \"users\" does not exist");
    let schema = Schema::new().table(users()).table(posts());

    let err = Migrator::new(&db, &schema).sync().await.unwrap_err();

    match err {
        DatabaseError::Deadlock { tables } => assert_eq!(tables, vec!["posts"]),
        other => panic!("expected deadlock, got {:?}", other),
    }
    assert_eq!(db.created(), vec!["users"]);
    assert_eq!(db.count("CREATE TABLE IF NOT EXISTS \"posts\""), 2);
}

#[tokio::test]
async fn test_extra_declared_column_is_added() {
    let db = FakeDatabase::new();
    let schema = Schema::new().table(users());
    Migrator::new(&db, &schema).sync().await.unwrap();
    db.clear_log();

    let schema = Schema::new().table(users().column("email", text()));
    let report = Migrator::new(&db, &schema).sync().await.unwrap();

    assert!(report.created.is_empty());
    assert_eq!(
        report.altered,
        vec![("users".to_string(), "email".to_string())]
    );
    assert_eq!(db.count("CREATE TABLE"), 0);
    assert_eq!(db.count("ALTER TABLE"), 1);
    assert_eq!(
        db.statements(),
        vec!["ALTER TABLE \"users\" ADD COLUMN \"email\" TEXT"]
    );
}

#[tokio::test]
async fn test_column_comparison_ignores_case() {
    let db = FakeDatabase::new().with_table("users", &["ID", "Name"]);
    let schema = Schema::new().table(users());

    let report = Migrator::new(&db, &schema).sync().await.unwrap();

    assert!(report.is_noop());
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn test_second_run_is_noop() {
    let db = FakeDatabase::new();
    let schema = Schema::new().table(posts()).table(users());

    Migrator::new(&db, &schema).sync().await.unwrap();
    db.clear_log();
    let report = Migrator::new(&db, &schema).sync().await.unwrap();

    assert!(report.is_noop());
    assert_eq!(report.passes, 1);
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn test_unrelated_failure_aborts_run() {
    let db = FakeDatabase::new();
    db.fail_on("users", "permission denied for schema public");
    let schema = Schema::new().table(users()).table(posts());

    let err = Migrator::new(&db, &schema).sync().await.unwrap_err();

    assert!(matches!(err, DatabaseError::QueryError(_)));
    assert!(err.to_string().contains("permission denied"));
    assert!(!err.is_convergence_error());
    assert_eq!(db.statements().len(), 1);
    assert!(db.created().is_empty());
}

#[tokio::test]
async fn test_new_referencing_column_on_existing_table() {
    let db = FakeDatabase::new()
        .with_table("users", &["id", "name"])
        .with_table("posts", &["id", "title"]);
    let schema = Schema::new().table(posts()).table(users());

    let report = Migrator::new(&db, &schema).sync().await.unwrap();

    assert_eq!(report.passes, 1);
    assert_eq!(
        report.altered,
        vec![("posts".to_string(), "author_id".to_string())]
    );
    assert_eq!(
        db.columns("posts"),
        Some(vec![
            "id".to_string(),
            "title".to_string(),
            "author_id".to_string()
        ])
    );
}
