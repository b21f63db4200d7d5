//! Transaction example
//!
//! This example demonstrates transaction management including:
//! - The closure-based `Database::transaction` helper
//! - Rolling back when the closure fails
//! - `TransactionGuard` with compiled statements
//! - Automatic rollback when a guard is dropped
//!
//! Run with: cargo run --example transactions

use gird_orm::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn accounts_table() -> Table {
    Table::new("accounts")
        .column("id", int().primary_key())
        .column("name", text())
        .column("balance", real())
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== gird_orm - Transaction Example ===\n");

    let db = Arc::new(SqliteDatabase::new());
    db.connect(":memory:").await?;

    println!("1. Setting up accounts table...");
    let schema = Schema::new().table(accounts_table());
    Migrator::new(&*db, &schema).sync().await?;

    let accounts = accounts_table();
    let model = Model::new(&*db, &accounts);
    for (name, balance) in [("Alice", 1000.0), ("Bob", 500.0), ("Charlie", 750.0)] {
        model
            .create([("name", DatabaseValue::from(name)), ("balance", balance.into())])
            .await?;
    }
    println!("   ✓ Accounts created\n");

    print_balances(&*db, &accounts).await?;

    // Example 1: successful transfer
    println!("\n2. Example 1: Successful transaction (Alice -> Bob: $100)");
    let table = accounts.clone();
    let outcome = db
        .transaction(move |tx| Box::pin(async move { transfer(tx, &table, 1, 2, 100.0).await }))
        .await;
    report(outcome);
    print_balances(&*db, &accounts).await?;

    // Example 2: the closure fails, nothing is applied
    println!("\n3. Example 2: Failed transaction (Bob -> Alice: $1000 - insufficient funds)");
    let table = accounts.clone();
    let outcome = db
        .transaction(move |tx| Box::pin(async move { transfer(tx, &table, 2, 1, 1000.0).await }))
        .await;
    report(outcome);
    print_balances(&*db, &accounts).await?;

    // Example 3: several builder statements under one guard
    println!("\n4. Example 3: Multiple statements under a TransactionGuard");
    let tx = TransactionGuard::begin(Arc::clone(&db)).await?;
    let bonus = QueryBuilder::for_database(&accounts, &*db)
        .update([("balance", 800.0)])
        .where_eq("name", "Charlie")
        .to_sql()?;
    let rows = tx.fetch(&bonus).await?;
    println!("   - Updated {} row(s)", rows.len());

    let audit = QueryBuilder::for_database(&accounts, &*db)
        .insert([("name", DatabaseValue::from("Audit")), ("balance", 0.0.into())])
        .to_sql()?;
    tx.fetch(&audit).await?;
    tx.commit().await?;
    println!("   ✓ All statements committed");
    print_balances(&*db, &accounts).await?;

    // Example 4: a dropped guard rolls back
    println!("\n5. Example 4: Dropping a guard without commit");
    {
        let tx = TransactionGuard::begin(Arc::clone(&db)).await?;
        let wipe = QueryBuilder::for_database(&accounts, &*db)
            .delete()
            .to_sql()?;
        let removed = tx.run(&wipe).await?;
        println!("   - Deleted {} row(s) inside the transaction", removed);
    }
    while db.in_transaction() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    println!("   ✓ Guard dropped, rollback issued");
    print_balances(&*db, &accounts).await?;

    println!("\n=== Example completed successfully! ===");

    Ok(())
}

/// Move `amount` between two accounts, failing on insufficient funds
async fn transfer<D: Database>(
    db: &D,
    accounts: &Table,
    from_id: i64,
    to_id: i64,
    amount: f64,
) -> Result<()> {
    let model = Model::new(db, accounts);
    let source = balance_of(&model, from_id).await?;
    if source < amount {
        return Err(DatabaseError::query(format!(
            "insufficient funds: balance {:.2}, requested {:.2}",
            source, amount
        )));
    }
    let target = balance_of(&model, to_id).await?;

    model.update(from_id, [("balance", source - amount)]).await?;
    model.update(to_id, [("balance", target + amount)]).await?;
    Ok(())
}

async fn balance_of<D: Database>(model: &Model<'_, D>, id: i64) -> Result<f64> {
    model
        .get(id, &FindOptions::new())
        .await?
        .and_then(|row| row.get("balance").and_then(DatabaseValue::as_double))
        .ok_or_else(|| DatabaseError::query(format!("account {} not found", id)))
}

fn report(outcome: Result<()>) {
    match outcome {
        Ok(()) => println!("   ✓ Transaction committed"),
        Err(e) => println!("   ✗ Transaction rolled back: {}", e),
    }
}

/// Print all account balances
async fn print_balances<D: Database>(db: &D, accounts: &Table) -> Result<()> {
    let statement = QueryBuilder::for_database(accounts, db)
        .order_by_asc("id")
        .to_sql()?;
    let rows = db.fetch(&statement).await?;

    println!("   Current balances:");
    for row in rows {
        let name = row
            .get("name")
            .ok_or_else(|| DatabaseError::ColumnNotFound("name".to_string()))?
            .as_string();
        let balance = row
            .get("balance")
            .and_then(|v| v.as_double())
            .ok_or_else(|| DatabaseError::ColumnNotFound("balance".to_string()))?;
        println!("   - {}: ${:.2}", name, balance);
    }

    Ok(())
}
