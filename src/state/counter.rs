use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::data::SkuAllocation;
use crate::error::StoreError;

/// How long a second process waits for the write lock before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// The CounterStore owns the monotonic SKU counter.
///
/// State is an append-only SQLite table of allocation rows. The last SKU is
/// derived from the rows (`MAX(starting_sku + folder_count)`) rather than
/// stored separately, so a committed row is the only thing that can move it.
pub struct CounterStore {
    conn: Connection,
    db_path: PathBuf,
}

impl CounterStore {
    /// Open (or create) the counter database at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&db_path).map_err(|source| StoreError::Open {
            path: db_path.clone(),
            source,
        })?;

        let store = CounterStore { conn, db_path };
        store.init_schema().map_err(|source| StoreError::Open {
            path: store.db_path.clone(),
            source,
        })?;

        tracing::debug!(path = %store.db_path.display(), "Counter store opened");
        Ok(store)
    }

    /// Default location: `<data_dir>/catalog-intake/catalog.db`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        path.push("catalog-intake");
        path.push("catalog.db");
        path
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.busy_timeout(BUSY_TIMEOUT)?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS sku_allocations (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                starting_sku    INTEGER NOT NULL CHECK (starting_sku >= 0),
                folder_count    INTEGER NOT NULL CHECK (folder_count >= 0),
                image_count     INTEGER NOT NULL CHECK (image_count >= 0),
                timestamp       TEXT NOT NULL,
                generated_label TEXT NOT NULL DEFAULT ''
            )",
            [],
        )?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// The last reserved SKU, or 0 when nothing has been allocated yet
    pub fn last_sku(&self) -> Result<i64, StoreError> {
        Ok(Self::query_last_sku(&self.conn)?)
    }

    fn query_last_sku(conn: &Connection) -> rusqlite::Result<i64> {
        let last: Option<i64> = conn.query_row(
            "SELECT MAX(starting_sku + folder_count) FROM sku_allocations",
            [],
            |row| row.get(0),
        )?;
        Ok(last.unwrap_or(0))
    }

    /// Reserve `count` SKUs and return the starting value (the previous last SKU).
    ///
    /// The batch owns `start + 1 ..= start + count`. `next_range(0)` returns the
    /// current last SKU and records a no-op row.
    pub fn next_range(&mut self, count: i64) -> Result<i64, StoreError> {
        let row = self.reserve(count, 0, |_| String::new())?;
        Ok(row.starting_sku)
    }

    /// Reserve `folder_count` SKUs for a batch, recording its image count and label.
    ///
    /// `label_for` receives the starting SKU, since batch labels carry the range.
    /// Read and insert run in one IMMEDIATE transaction, so two processes can
    /// never read the same last SKU. The row is either committed or absent.
    pub fn reserve<F>(
        &mut self,
        folder_count: i64,
        image_count: i64,
        label_for: F,
    ) -> Result<SkuAllocation, StoreError>
    where
        F: FnOnce(i64) -> String,
    {
        if folder_count < 0 {
            return Err(StoreError::InvalidValue(folder_count));
        }
        if image_count < 0 {
            return Err(StoreError::InvalidValue(image_count));
        }

        let timestamp = chrono::Local::now().to_rfc3339();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let starting_sku = Self::query_last_sku(&tx)?;
        let label = label_for(starting_sku);

        tx.execute(
            "INSERT INTO sku_allocations (starting_sku, folder_count, image_count, timestamp, generated_label)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![starting_sku, folder_count, image_count, timestamp, label],
        )?;
        tx.commit()?;

        tracing::info!(
            starting_sku,
            folder_count,
            image_count,
            "Reserved SKU range"
        );

        Ok(SkuAllocation {
            starting_sku,
            folder_count,
            image_count,
            timestamp,
            generated_label: label,
        })
    }

    /// Clear all history and rewind the counter so that `last_sku() == value`.
    ///
    /// Destructive. Only the explicit `reset` command calls this.
    pub fn reset(&mut self, value: i64) -> Result<(), StoreError> {
        if value < 0 {
            return Err(StoreError::InvalidValue(value));
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM sku_allocations", [])?;
        tx.execute(
            "INSERT INTO sku_allocations (starting_sku, folder_count, image_count, timestamp, generated_label)
             VALUES (?1, 0, 0, '1970-01-01', 'reset')",
            params![value],
        )?;
        tx.commit()?;

        tracing::warn!(value, "SKU counter reset, allocation history cleared");
        Ok(())
    }

    /// All allocation rows in insertion order
    pub fn history(&self) -> Result<Vec<SkuAllocation>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT starting_sku, folder_count, image_count, timestamp, generated_label
             FROM sku_allocations ORDER BY id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(SkuAllocation {
                starting_sku: row.get(0)?,
                folder_count: row.get(1)?,
                image_count: row.get(2)?,
                timestamp: row.get(3)?,
                generated_label: row.get(4)?,
            })
        })?;

        let mut history = Vec::new();
        for row in rows {
            history.push(row?);
        }

        Ok(history)
    }

    /// The most recent allocation row, if any
    pub fn latest(&self) -> Result<Option<SkuAllocation>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT starting_sku, folder_count, image_count, timestamp, generated_label
                 FROM sku_allocations ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok(SkuAllocation {
                        starting_sku: row.get(0)?,
                        folder_count: row.get(1)?,
                        image_count: row.get(2)?,
                        timestamp: row.get(3)?,
                        generated_label: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

impl std::fmt::Debug for CounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}
