//! Blog example
//!
//! Declares a small blog schema, synchronizes it, then creates and queries
//! rows with nested relation projections.
//!
//! The connection comes from `DATABASE_URL` / `GIRD_DATABASE_URL` and falls
//! back to `sqlite://:memory:` here. Log output is controlled with `RUST_LOG`.
//!
//! Run with: RUST_LOG=gird_orm=debug cargo run --example blog

use gird_orm::core::query_builder::Filter;
use gird_orm::prelude::*;
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn blog_schema() -> Schema {
    // Registered referencing-table first; sync sorts out the order
    Schema::new()
        .table(
            Table::new("comments")
                .column("id", int().primary_key())
                .column("body", text())
                .column("post_id", int().references("posts", "id"))
                .relation("post", Relation::belongs_to("posts", "post_id")),
        )
        .table(
            Table::new("posts")
                .column("id", int().primary_key())
                .column("title", text())
                .column("views", int())
                .column("author_id", int().references("users", "id"))
                .relation("author", Relation::belongs_to("users", "author_id"))
                .relation("comments", Relation::has_many("comments", "post_id")),
        )
        .table(
            Table::new("users")
                .column("id", int().primary_key())
                .column("name", text())
                .column("email", text())
                .relation("posts", Relation::has_many("posts", "author_id")),
        )
}

fn table<'a>(schema: &'a Schema, name: &str) -> Result<&'a Table> {
    schema
        .get(name)
        .ok_or_else(|| DatabaseError::TableNotFound(name.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gird_orm=info")),
        )
        .init();

    println!("=== gird_orm - Blog Example ===\n");

    let mut config = DatabaseConfig::from_env()?;
    if config == DatabaseConfig::default() {
        config.database_url = "sqlite://:memory:".to_string();
    }
    if config.dialect()? != DatabaseType::Sqlite {
        return Err(DatabaseError::UnsupportedOperation(
            "this example is built with the sqlite backend only".to_string(),
        ));
    }

    let db = SqliteDatabase::new();
    db.connect(&config.connection_string()?).await?;
    println!("1. Connected to {}\n", config.database_url);

    println!("2. Synchronizing schema...");
    let schema = blog_schema();
    let report = Migrator::new(&db, &schema).sync().await?;
    println!(
        "   ✓ {} pass(es), created: {:?}\n",
        report.passes, report.created
    );

    println!("3. Creating rows...");
    let users = Model::new(&db, table(&schema, "users")?).schema(&schema);
    let posts = Model::new(&db, table(&schema, "posts")?).schema(&schema);
    let comments = Model::new(&db, table(&schema, "comments")?).schema(&schema);

    let ada = users
        .create([("name", "Ada"), ("email", "ada@example.com")])
        .await?;
    let grace = users
        .create([("name", "Grace"), ("email", "grace@example.com")])
        .await?;

    for (title, views, author) in [
        ("Notes on the Analytical Engine", 1843, &ada),
        ("Bernoulli numbers", 312, &ada),
        ("On compilers", 1952, &grace),
    ] {
        let post = posts
            .create([
                ("title", DatabaseValue::from(title)),
                ("views", views.into()),
                ("author_id", author["id"].clone()),
            ])
            .await?;
        comments
            .create([
                ("body", DatabaseValue::from(format!("Re: {}", title))),
                ("post_id", post["id"].clone()),
            ])
            .await?;
    }
    println!("   ✓ 2 users, 3 posts, 3 comments\n");

    println!("4. Users with their posts (has-many):");
    let rows = users
        .find_json(
            &json!({}),
            &FindOptions::new()
                .with("posts")
                .order_by("name", OrderDirection::Asc),
        )
        .await?;
    for row in &rows {
        let count = row
            .get("posts")
            .and_then(DatabaseValue::as_json)
            .and_then(|v| v.as_array())
            .map_or(0, Vec::len);
        println!("   - {}: {} post(s)", row["name"].as_string(), count);
    }

    println!("\n5. Popular posts with author and comments:");
    let popular = posts
        .find(
            [("views", Filter::new().gte(1000))],
            &FindOptions::new()
                .with("author")
                .with("comments")
                .order_by("views", OrderDirection::Desc),
        )
        .await?;
    for row in &popular {
        let author = row
            .get("author")
            .and_then(DatabaseValue::as_json)
            .and_then(|a| a["name"].as_str().map(str::to_string))
            .unwrap_or_default();
        println!(
            "   - {} by {} ({} views), comments: {}",
            row["title"].as_string(),
            author,
            row["views"].as_string(),
            row.get("comments").map(DatabaseValue::as_string).unwrap_or_default()
        );
    }

    println!("\n6. The compiled statement behind step 5 (Postgres dialect):");
    let preview = QueryBuilder::new(table(&schema, "posts")?, DatabaseType::Postgres)
        .schema(&schema)
        .where_all([("views", Filter::new().gte(1000))])
        .with("author")?
        .to_sql()?;
    println!("   {}", preview.sql);
    println!("   params: {:?}", preview.params);

    println!("\n7. Re-running sync...");
    let report = Migrator::new(&db, &schema).sync().await?;
    println!("   ✓ no-op: {}", report.is_noop());

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
