//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{} is newer than supported v{}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, till_core::now_millis()],
            )?;
            tracing::debug!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Mutation log: locally originated changes awaiting acknowledgment
        CREATE TABLE mutations (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,  -- local insertion order
            id BLOB NOT NULL UNIQUE,                -- 16 bytes, idempotency key
            kind TEXT NOT NULL,                     -- sale | return | inventoryAdjustment
            payload BLOB NOT NULL,                  -- CBOR MutationPayload
            created_at INTEGER NOT NULL,            -- Unix ms
            status TEXT NOT NULL DEFAULT 'pending', -- pending | syncing | synced | error
            last_error TEXT,
            failure TEXT,                           -- transient | rejected
            attempt INTEGER NOT NULL DEFAULT 0,
            next_retry_at INTEGER
        );

        -- Replica tables
        CREATE TABLE products (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            sku TEXT NOT NULL,
            price_cents INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_synced_at INTEGER
        );

        CREATE TABLE customers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            updated_at INTEGER NOT NULL,
            last_synced_at INTEGER
        );

        CREATE TABLE inventory (
            product_id TEXT PRIMARY KEY,
            quantity INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_synced_at INTEGER
        );

        CREATE TABLE sales (
            id TEXT PRIMARY KEY,
            customer_id TEXT,
            items BLOB NOT NULL,                    -- CBOR array of SaleItem
            total_cents INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_synced_at INTEGER
        );

        -- Sync cursor and other single-value state
        CREATE TABLE sync_state (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );

        CREATE INDEX idx_mutations_order ON mutations(created_at, seq);
        CREATE INDEX idx_mutations_status ON mutations(status);
        CREATE INDEX idx_products_sku ON products(sku);
        CREATE INDEX idx_sales_created ON sales(created_at);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "mutations",
            "products",
            "customers",
            "inventory",
            "sales",
            "sync_state",
            "schema_migrations",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_newer_schema_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (99, 0)",
            [],
        )
        .unwrap();
        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }
}
