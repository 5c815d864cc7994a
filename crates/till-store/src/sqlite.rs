//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for Till. It uses rusqlite with
//! bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use till_core::{
    decode_items, decode_payload, encode_items, encode_payload, lww_should_apply, ChangeOp,
    Customer, Entity, EntityChange, EntityId, EntityKind, EntityRef, FailureClass,
    InventoryLine, MutationFailure, MutationId, MutationKind, MutationPayload, MutationRecord,
    MutationStatus, Product, Sale, SaleItem,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{ApplyReport, LogCounts, Store};

const CURSOR_KEY: &str = "last_pulled_at";

const MUTATION_COLUMNS: &str =
    "seq, id, kind, payload, created_at, status, last_error, failure, attempt, next_retry_at";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime, and the single connection makes
/// this the only writer to the database file.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist. The
    /// database runs in WAL mode with `synchronous=FULL`, so a write that
    /// returned survives a crash or power loss.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        migration::migrate(&mut conn)?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened sqlite store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

// Helper to convert a row to MutationRecord
fn row_to_mutation(row: &Row<'_>) -> rusqlite::Result<MutationRecord> {
    let seq: i64 = row.get(0)?;
    let id_bytes: Vec<u8> = row.get(1)?;
    let kind: String = row.get(2)?;
    let payload: Vec<u8> = row.get(3)?;
    let status: String = row.get(5)?;
    let failure: Option<String> = row.get(7)?;
    let attempt: i64 = row.get(8)?;

    let id = MutationId::from_bytes(
        id_bytes
            .try_into()
            .map_err(|_| rusqlite::Error::InvalidColumnType(1, "id".into(), Type::Blob))?,
    );
    let kind = MutationKind::parse(&kind)
        .ok_or_else(|| conversion_error(2, format!("unknown mutation kind: {kind}")))?;
    let payload = decode_payload(&payload).map_err(|e| conversion_error(3, e))?;
    let status = MutationStatus::parse(&status)
        .ok_or_else(|| conversion_error(5, format!("unknown status: {status}")))?;
    let failure = match failure {
        Some(f) => Some(
            FailureClass::parse(&f)
                .ok_or_else(|| conversion_error(7, format!("unknown failure class: {f}")))?,
        ),
        None => None,
    };

    Ok(MutationRecord {
        id,
        seq: seq as u64,
        kind,
        payload,
        created_at: row.get(4)?,
        status,
        last_error: row.get(6)?,
        failure,
        attempt: u32::try_from(attempt).unwrap_or(u32::MAX),
        next_retry_at: row.get(9)?,
    })
}

fn load_mutation(conn: &Connection, id: &MutationId) -> Result<Option<MutationRecord>> {
    let sql = format!("SELECT {MUTATION_COLUMNS} FROM mutations WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.as_bytes().as_slice()], row_to_mutation)
        .optional()?)
}

/// Load a record that must currently be in `error`.
fn load_errored(conn: &Connection, id: &MutationId) -> Result<MutationRecord> {
    let record = load_mutation(conn, id)?.ok_or(StoreError::MutationNotFound(*id))?;
    if record.status != MutationStatus::Error {
        return Err(StoreError::WrongStatus {
            id: *id,
            expected: MutationStatus::Error,
            actual: record.status,
        });
    }
    Ok(record)
}

/// Table and key column backing each entity kind.
fn table_for(kind: EntityKind) -> (&'static str, &'static str) {
    match kind {
        EntityKind::Product => ("products", "id"),
        EntityKind::Customer => ("customers", "id"),
        EntityKind::Inventory => ("inventory", "product_id"),
        EntityKind::Sale => ("sales", "id"),
    }
}

fn select_sql(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Product => {
            "SELECT id, name, sku, price_cents, updated_at, last_synced_at FROM products"
        }
        EntityKind::Customer => {
            "SELECT id, name, email, phone, updated_at, last_synced_at FROM customers"
        }
        EntityKind::Inventory => {
            "SELECT product_id, quantity, updated_at, last_synced_at FROM inventory"
        }
        EntityKind::Sale => {
            "SELECT id, customer_id, items, total_cents, created_at, updated_at, last_synced_at \
             FROM sales"
        }
    }
}

fn row_to_entity(kind: EntityKind, row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(match kind {
        EntityKind::Product => Entity::Product(Product {
            id: EntityId(row.get(0)?),
            name: row.get(1)?,
            sku: row.get(2)?,
            price_cents: row.get(3)?,
            updated_at: row.get(4)?,
            last_synced_at: row.get(5)?,
        }),
        EntityKind::Customer => Entity::Customer(Customer {
            id: EntityId(row.get(0)?),
            name: row.get(1)?,
            email: row.get(2)?,
            phone: row.get(3)?,
            updated_at: row.get(4)?,
            last_synced_at: row.get(5)?,
        }),
        EntityKind::Inventory => Entity::Inventory(InventoryLine {
            product_id: EntityId(row.get(0)?),
            quantity: row.get(1)?,
            updated_at: row.get(2)?,
            last_synced_at: row.get(3)?,
        }),
        EntityKind::Sale => {
            let items: Vec<u8> = row.get(2)?;
            Entity::Sale(Sale {
                id: EntityId(row.get(0)?),
                customer_id: row.get::<_, Option<String>>(1)?.map(EntityId),
                items: decode_items(&items).map_err(|e| conversion_error(2, e))?,
                total_cents: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
                last_synced_at: row.get(6)?,
            })
        }
    })
}

fn read_entity(conn: &Connection, target: &EntityRef) -> Result<Option<Entity>> {
    let (_, key) = table_for(target.kind);
    let sql = format!("{} WHERE {key} = ?1", select_sql(target.kind));
    let kind = target.kind;
    Ok(conn
        .query_row(&sql, params![target.id.as_str()], |row| {
            row_to_entity(kind, row)
        })
        .optional()?)
}

/// `last_synced_at` of a local row: `None` if there is no row.
fn local_marker(conn: &Connection, target: &EntityRef) -> Result<Option<Option<i64>>> {
    let (table, key) = table_for(target.kind);
    let sql = format!("SELECT last_synced_at FROM {table} WHERE {key} = ?1");
    Ok(conn
        .query_row(&sql, params![target.id.as_str()], |row| row.get(0))
        .optional()?)
}

fn write_entity(conn: &Connection, entity: &Entity) -> Result<()> {
    match entity {
        Entity::Product(p) => {
            conn.execute(
                "INSERT OR REPLACE INTO products
                    (id, name, sku, price_cents, updated_at, last_synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    p.id.as_str(),
                    p.name,
                    p.sku,
                    p.price_cents,
                    p.updated_at,
                    p.last_synced_at
                ],
            )?;
        }
        Entity::Customer(c) => {
            conn.execute(
                "INSERT OR REPLACE INTO customers
                    (id, name, email, phone, updated_at, last_synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    c.id.as_str(),
                    c.name,
                    c.email,
                    c.phone,
                    c.updated_at,
                    c.last_synced_at
                ],
            )?;
        }
        Entity::Inventory(i) => {
            conn.execute(
                "INSERT OR REPLACE INTO inventory
                    (product_id, quantity, updated_at, last_synced_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![i.product_id.as_str(), i.quantity, i.updated_at, i.last_synced_at],
            )?;
        }
        Entity::Sale(s) => {
            let items = encode_items(&s.items)?;
            conn.execute(
                "INSERT OR REPLACE INTO sales
                    (id, customer_id, items, total_cents, created_at, updated_at, last_synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    s.id.as_str(),
                    s.customer_id.as_ref().map(EntityId::as_str),
                    items,
                    s.total_cents,
                    s.created_at,
                    s.updated_at,
                    s.last_synced_at
                ],
            )?;
        }
    }
    Ok(())
}

fn delete_entity(conn: &Connection, target: &EntityRef) -> Result<()> {
    let (table, key) = table_for(target.kind);
    conn.execute(
        &format!("DELETE FROM {table} WHERE {key} = ?1"),
        params![target.id.as_str()],
    )?;
    Ok(())
}

/// Add `delta` to an inventory line, failing if the line does not exist.
fn bump_inventory(conn: &Connection, product_id: &EntityId, delta: i64, now: i64) -> Result<i64> {
    conn.query_row(
        "UPDATE inventory SET quantity = quantity + ?1, updated_at = ?2
         WHERE product_id = ?3 RETURNING quantity",
        params![delta, now, product_id.as_str()],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::EntityNotFound {
        kind: EntityKind::Inventory,
        id: product_id.clone(),
    })
}

fn read_cursor(conn: &Connection) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT value FROM sync_state WHERE key = ?1",
            params![CURSOR_KEY],
            |row| row.get(0),
        )
        .optional()?)
}

#[async_trait]
impl Store for SqliteStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Mutation Log
    // ─────────────────────────────────────────────────────────────────────────

    async fn enqueue(&self, payload: &MutationPayload, now: i64) -> Result<MutationId> {
        let bytes = encode_payload(payload)?;
        let kind = payload.kind();
        let id = MutationId::generate();

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO mutations (id, kind, payload, created_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.as_bytes().as_slice(),
                    kind.as_str(),
                    bytes,
                    now,
                    MutationStatus::Pending.as_str()
                ],
            )?;
            tracing::debug!(mutation_id = %id, kind = %kind, "enqueued mutation");
            Ok(id)
        })
        .await
    }

    async fn list_pending(&self) -> Result<Vec<MutationRecord>> {
        self.run(|conn| {
            let sql = format!(
                "SELECT {MUTATION_COLUMNS} FROM mutations
                 WHERE status != ?1 ORDER BY created_at, seq"
            );
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map(params![MutationStatus::Synced.as_str()], row_to_mutation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    async fn get_mutation(&self, id: &MutationId) -> Result<Option<MutationRecord>> {
        let id = *id;
        self.run(move |conn| load_mutation(conn, &id)).await
    }

    async fn mark_status(
        &self,
        id: &MutationId,
        status: MutationStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let id = *id;
        let error = error.map(str::to_string);

        self.run(move |conn| {
            let tx = conn.transaction()?;
            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM mutations WHERE id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(current) = current else {
                return Ok(());
            };
            let current = MutationStatus::parse(&current)
                .ok_or_else(|| StoreError::InvalidData(format!("unknown status: {current}")))?;
            if !current.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    id,
                    from: current,
                    to: status,
                });
            }

            tx.execute(
                "UPDATE mutations SET status = ?1, last_error = COALESCE(?2, last_error)
                 WHERE id = ?3",
                params![status.as_str(), error, id.as_bytes().as_slice()],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn record_failure(&self, id: &MutationId, failure: &MutationFailure) -> Result<()> {
        let id = *id;
        let failure = failure.clone();

        self.run(move |conn| {
            conn.execute(
                "UPDATE mutations
                 SET status = ?1, last_error = ?2, failure = ?3,
                     attempt = attempt + 1, next_retry_at = ?4
                 WHERE id = ?5",
                params![
                    MutationStatus::Error.as_str(),
                    failure.message,
                    failure.class.as_str(),
                    failure.next_retry_at,
                    id.as_bytes().as_slice()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, id: &MutationId) -> Result<bool> {
        let id = *id;
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let Some(record) = load_mutation(&tx, &id)? else {
                return Ok(false);
            };
            if record.status != MutationStatus::Synced {
                return Err(StoreError::WrongStatus {
                    id,
                    expected: MutationStatus::Synced,
                    actual: record.status,
                });
            }
            tx.execute(
                "DELETE FROM mutations WHERE id = ?1",
                params![id.as_bytes().as_slice()],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn acknowledge(&self, id: &MutationId) -> Result<bool> {
        let id = *id;
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let Some(record) = load_mutation(&tx, &id)? else {
                return Ok(false);
            };
            if !record.status.can_transition_to(MutationStatus::Synced) {
                return Err(StoreError::InvalidTransition {
                    id,
                    from: record.status,
                    to: MutationStatus::Synced,
                });
            }
            tx.execute(
                "DELETE FROM mutations WHERE id = ?1",
                params![id.as_bytes().as_slice()],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn discard(&self, id: &MutationId) -> Result<MutationRecord> {
        let id = *id;
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let record = load_errored(&tx, &id)?;
            tx.execute(
                "DELETE FROM mutations WHERE id = ?1",
                params![id.as_bytes().as_slice()],
            )?;
            tx.commit()?;
            tracing::info!(mutation_id = %id, kind = %record.kind, "discarded mutation");
            Ok(record)
        })
        .await
    }

    async fn amend(&self, id: &MutationId, payload: &MutationPayload) -> Result<()> {
        let id = *id;
        let bytes = encode_payload(payload)?;
        let kind = payload.kind();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            load_errored(&tx, &id)?;
            tx.execute(
                "UPDATE mutations
                 SET kind = ?1, payload = ?2, status = ?3, last_error = NULL,
                     failure = NULL, attempt = 0, next_retry_at = NULL
                 WHERE id = ?4",
                params![
                    kind.as_str(),
                    bytes,
                    MutationStatus::Pending.as_str(),
                    id.as_bytes().as_slice()
                ],
            )?;
            tx.commit()?;
            tracing::info!(mutation_id = %id, "amended mutation");
            Ok(())
        })
        .await
    }

    async fn requeue(&self, id: &MutationId) -> Result<()> {
        let id = *id;
        self.run(move |conn| {
            let tx = conn.transaction()?;
            load_errored(&tx, &id)?;
            tx.execute(
                "UPDATE mutations
                 SET status = ?1, last_error = NULL, failure = NULL,
                     attempt = 0, next_retry_at = NULL
                 WHERE id = ?2",
                params![MutationStatus::Pending.as_str(), id.as_bytes().as_slice()],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn recover_in_flight(&self) -> Result<usize> {
        self.run(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM mutations WHERE status = ?1",
                params![MutationStatus::Synced.as_str()],
            )?;
            let recovered = tx.execute(
                "UPDATE mutations SET status = ?1 WHERE status = ?2",
                params![
                    MutationStatus::Pending.as_str(),
                    MutationStatus::Syncing.as_str()
                ],
            )?;
            tx.commit()?;
            if removed + recovered > 0 {
                tracing::info!(recovered, removed, "recovered in-flight mutations");
            }
            Ok(removed + recovered)
        })
        .await
    }

    async fn log_counts(&self) -> Result<LogCounts> {
        self.run(|conn| {
            let (pending, errors, rejected): (i64, i64, i64) = conn.query_row(
                "SELECT
                    COALESCE(SUM(status IN ('pending', 'syncing')), 0),
                    COALESCE(SUM(status = 'error'), 0),
                    COALESCE(SUM(status = 'error' AND failure = 'rejected'), 0)
                 FROM mutations",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            Ok(LogCounts {
                pending: pending as usize,
                errors: errors as usize,
                rejected: rejected as usize,
            })
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Replica Store
    // ─────────────────────────────────────────────────────────────────────────

    async fn create_sale_atomic(&self, sale: &Sale) -> Result<()> {
        let sale = sale.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            write_entity(&tx, &Entity::Sale(sale.clone()))?;
            for item in &sale.items {
                // Dropping `tx` on error rolls the sale back with it.
                bump_inventory(&tx, &item.product_id, -item.quantity, sale.updated_at)?;
            }
            tx.commit()?;
            tracing::debug!(sale_id = %sale.id, items = sale.items.len(), "recorded sale");
            Ok(())
        })
        .await
    }

    async fn apply_return_atomic(
        &self,
        sale_id: &EntityId,
        items: &[SaleItem],
        now: i64,
    ) -> Result<()> {
        let sale_id = sale_id.clone();
        let items = items.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            if local_marker(&tx, &EntityRef::sale(sale_id.clone()))?.is_none() {
                return Err(StoreError::EntityNotFound {
                    kind: EntityKind::Sale,
                    id: sale_id,
                });
            }
            for item in &items {
                bump_inventory(&tx, &item.product_id, item.quantity, now)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn adjust_inventory_atomic(
        &self,
        product_id: &EntityId,
        delta: i64,
        now: i64,
    ) -> Result<i64> {
        let product_id = product_id.clone();
        self.run(move |conn| bump_inventory(conn, &product_id, delta, now))
            .await
    }

    async fn get_entity(&self, target: &EntityRef) -> Result<Option<Entity>> {
        let target = target.clone();
        self.run(move |conn| read_entity(conn, &target)).await
    }

    async fn list_entities(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        self.run(move |conn| {
            let (_, key) = table_for(kind);
            let sql = format!("{} ORDER BY {key}", select_sql(kind));
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| row_to_entity(kind, row))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        let entity = entity.clone();
        self.run(move |conn| write_entity(conn, &entity)).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pull / Cursor
    // ─────────────────────────────────────────────────────────────────────────

    async fn apply_pull(
        &self,
        changes: &[EntityChange],
        server_timestamp: i64,
    ) -> Result<ApplyReport> {
        let changes = changes.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let mut report = ApplyReport::default();

            for change in changes {
                let target = change.target();
                let local = local_marker(&tx, &target)?;
                if !lww_should_apply(local, change.version) {
                    report.skipped += 1;
                    continue;
                }
                match change.op {
                    ChangeOp::Upsert(mut entity) => {
                        entity.mark_synced(change.version);
                        write_entity(&tx, &entity)?;
                    }
                    ChangeOp::Delete(target) => delete_entity(&tx, &target)?,
                }
                report.applied += 1;
            }

            tx.execute(
                "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = MAX(value, excluded.value)",
                params![CURSOR_KEY, server_timestamp],
            )?;
            report.cursor = read_cursor(&tx)?.unwrap_or(server_timestamp);
            tx.commit()?;
            Ok(report)
        })
        .await
    }

    async fn last_pulled_at(&self) -> Result<Option<i64>> {
        self.run(|conn| read_cursor(conn)).await
    }
}
