//! Relational persistence of cleaned events

use std::path::Path;

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::event::{CleanedDataset, DATE_FORMAT, TIME_FORMAT};

/// Table receiving cleaned rows
pub const CLEANED_TABLE: &str = "cleaned_data";

/// Append-only sink for cleaned events
pub trait PersistenceSink {
    /// Bulk-load every row, returning the number inserted
    fn bulk_load(&mut self, dataset: &CleanedDataset) -> Result<usize>;
}

/// SQLite-backed sink
pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    /// Open or create the database file and ensure the schema exists
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let sink = Self { conn };
        sink.initialize()?;
        Ok(sink)
    }

    /// Private in-memory database with the same schema
    pub fn open_in_memory() -> Result<Self> {
        let sink = Self {
            conn: Connection::open_in_memory()?,
        };
        sink.initialize()?;
        Ok(sink)
    }

    fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cleaned_data (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id             INTEGER NOT NULL,
                product_id          INTEGER NOT NULL,
                product_category_id INTEGER NOT NULL,
                behavior_type       TEXT NOT NULL,
                time                TEXT NOT NULL,
                date                TEXT NOT NULL,
                hour                INTEGER NOT NULL,
                weekday             INTEGER NOT NULL,
                behavior            TEXT NOT NULL,
                ingested_at         TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_cleaned_user ON cleaned_data(user_id);
            CREATE INDEX IF NOT EXISTS idx_cleaned_time ON cleaned_data(time);
            CREATE INDEX IF NOT EXISTS idx_cleaned_behavior ON cleaned_data(behavior_type);
            ",
        )?;
        Ok(())
    }

    /// Rows currently stored in the cleaned table
    pub fn row_count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM cleaned_data", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Underlying connection, for ad-hoc queries
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl PersistenceSink for SqliteSink {
    fn bulk_load(&mut self, dataset: &CleanedDataset) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO cleaned_data
                    (user_id, product_id, product_category_id, behavior_type,
                     time, date, hour, weekday, behavior)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for event in dataset {
                stmt.execute(params![
                    event.user_id,
                    event.product_id,
                    event.category_id,
                    event.behavior.code(),
                    event.time.format(TIME_FORMAT).to_string(),
                    event.date().format(DATE_FORMAT).to_string(),
                    event.hour(),
                    event.weekday(),
                    event.behavior.label(),
                ])?;
            }
        }
        tx.commit()?;

        tracing::info!(table = CLEANED_TABLE, rows = dataset.len(), "bulk load committed");
        Ok(dataset.len())
    }
}
