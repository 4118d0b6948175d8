use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use rusqlite::{Connection, Transaction};
use tracing::{debug, info};

/// Process-wide handle to the embedded SQLite store. It is opened once by an
/// explicit initialization step and handed to every caller that needs the
/// database; nothing opens a connection lazily behind its back.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database file, run the schema migration, and
    /// switch the journal to WAL.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("failed to create data directory")?;
            }
        }

        let conn = Connection::open(path).context("failed to open SQLite database")?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .context("failed to enable WAL journal")?;
        ensure_schema(&conn)?;
        info!(path = %path.display(), "opened library database");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Fresh private database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a read or a single-statement write against the shared connection.
    pub fn with_conn<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Connection) -> std::result::Result<T, E>,
        E: From<anyhow::Error>,
    {
        let guard = self.lock()?;
        f(&guard)
    }

    /// Run `f` inside one transaction. The transaction commits only when `f`
    /// succeeds; any error rolls back every statement it issued.
    pub fn with_transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> std::result::Result<T, E>,
        E: From<anyhow::Error>,
    {
        let mut guard = self.lock()?;
        let tx = guard
            .transaction()
            .context("failed to begin transaction")?;
        let value = f(&tx)?;
        tx.commit().context("failed to commit transaction")?;
        Ok(value)
    }

    /// Flush and close the connection. Dropping the store does the same but
    /// swallows any error.
    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| anyhow!("database connection lock poisoned"))?;
        conn.close()
            .map_err(|(_, err)| err)
            .context("failed to close database")?;
        debug!("closed library database");
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }
}

/// Create the three tables if they are missing. The category column on books
/// is a plain text reference; the library keeps it consistent inside
/// transactions.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories (
            name TEXT PRIMARY KEY NOT NULL,
            isPinned INTEGER NOT NULL DEFAULT 0,
            position INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )
    .context("failed to create categories table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS userBooks (
            id TEXT PRIMARY KEY NOT NULL,
            title TEXT NOT NULL,
            author TEXT NOT NULL DEFAULT '',
            excerpt TEXT NOT NULL DEFAULT '',
            summary TEXT NOT NULL DEFAULT '',
            image TEXT NOT NULL DEFAULT '',
            rating INTEGER,
            genres TEXT NOT NULL DEFAULT '',
            category TEXT,
            isFavorite INTEGER NOT NULL DEFAULT 0,
            publisher TEXT,
            publishedDate TEXT,
            pageCount INTEGER,
            isCustomBook INTEGER NOT NULL DEFAULT 0,
            isbn TEXT,
            notes TEXT NOT NULL DEFAULT '',
            workId TEXT
        )",
        [],
    )
    .context("failed to create userBooks table")?;
    migrate_user_books(conn)?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_user_books_category ON userBooks(category)",
        [],
    )
    .context("failed to create userBooks category index")?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_user_books_work ON userBooks(workId)",
        [],
    )
    .context("failed to create userBooks work index")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS recommendedBooks (
            id TEXT PRIMARY KEY NOT NULL,
            title TEXT NOT NULL,
            author TEXT NOT NULL DEFAULT '',
            excerpt TEXT NOT NULL DEFAULT '',
            summary TEXT NOT NULL DEFAULT '',
            image TEXT NOT NULL DEFAULT '',
            rating INTEGER,
            genres TEXT NOT NULL DEFAULT '',
            addToLibrary INTEGER NOT NULL DEFAULT 0,
            publisher TEXT,
            publishedDate TEXT,
            pageCount INTEGER,
            isbn TEXT,
            notes TEXT NOT NULL DEFAULT ''
        )",
        [],
    )
    .context("failed to create recommendedBooks table")?;

    Ok(())
}

/// Bring databases written before work ids existed up to date. Each old row
/// becomes its own work, and padded or blank ISBNs are normalized.
fn migrate_user_books(conn: &Connection) -> Result<()> {
    let has_work_id: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM pragma_table_info('userBooks') WHERE name = 'workId')",
            [],
            |row| row.get(0),
        )
        .context("failed to inspect userBooks columns")?;
    if !has_work_id {
        conn.execute("ALTER TABLE userBooks ADD COLUMN workId TEXT", [])
            .context("failed to add userBooks.workId")?;
        info!("added work ids to userBooks");
    }

    conn.execute("UPDATE userBooks SET workId = id WHERE workId IS NULL", [])
        .context("failed to backfill userBooks.workId")?;
    let trimmed = conn
        .execute(
            "UPDATE userBooks SET isbn = NULLIF(TRIM(isbn), '')
             WHERE isbn IS NOT NULL AND (isbn <> TRIM(isbn) OR TRIM(isbn) = '')",
            [],
        )
        .context("failed to normalize userBooks.isbn")?;
    if trimmed > 0 {
        debug!(rows = trimmed, "normalized stored isbns");
    }
    Ok(())
}
