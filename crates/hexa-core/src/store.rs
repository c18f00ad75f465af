// SQLite persistence for generated notebooks.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// Key under which the id of the most recently saved notebook is kept.
const LATEST_KEY: &str = "latest_notebook";

/// A notebook body as persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredNotebook {
    pub id: String,
    pub filename: String,
    pub content: String,
    pub created_at: String,
}

/// SQLite-backed store for notebook bodies plus a small JSON key-value table.
pub struct NotebookStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for NotebookStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotebookStore").finish_non_exhaustive()
    }
}

impl NotebookStore {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS notebooks (
                id         TEXT PRIMARY KEY,
                filename   TEXT NOT NULL,
                content    TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS store_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock).
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("notebook store mutex poisoned")
    }

    /// Persist a notebook body under `id` and mark it as the latest one.
    /// Saving an existing id replaces its body.
    pub fn save_notebook(&self, id: &str, filename: &str, content: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute(
            "INSERT INTO notebooks (id, filename, content) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                filename   = excluded.filename,
                content    = excluded.content,
                created_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
            params![id, filename, content],
        )
        .context("failed to save notebook")?;
        tx.execute(
            "INSERT OR REPLACE INTO store_state (key, value) VALUES (?1, ?2)",
            params![LATEST_KEY, serde_json::Value::from(id).to_string()],
        )
        .context("failed to update latest notebook pointer")?;
        tx.commit().context("failed to commit notebook save")?;
        Ok(())
    }

    /// Load a notebook by id.
    pub fn notebook(&self, id: &str) -> Result<Option<StoredNotebook>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, filename, content, created_at FROM notebooks WHERE id = ?1",
            params![id],
            |row| {
                Ok(StoredNotebook {
                    id: row.get(0)?,
                    filename: row.get(1)?,
                    content: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()
        .context("failed to query notebook")
    }

    /// Load the most recently saved notebook, if any.
    pub fn latest(&self) -> Result<Option<StoredNotebook>> {
        let latest_id = match self.load_state(LATEST_KEY)? {
            Some(serde_json::Value::String(id)) => id,
            _ => return Ok(None),
        };
        self.notebook(&latest_id)
    }

    /// Number of stored notebooks.
    pub fn notebook_count(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM notebooks", [], |row| row.get(0))
            .context("failed to count notebooks")?;
        Ok(count as usize)
    }

    /// Persist an arbitrary JSON value under `key`. Uses INSERT OR REPLACE so
    /// repeated saves overwrite the previous value.
    pub fn save_state(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.conn();
        let json_str =
            serde_json::to_string(value).context("failed to serialize state value")?;
        conn.execute(
            "INSERT OR REPLACE INTO store_state (key, value) VALUES (?1, ?2)",
            params![key, json_str],
        )
        .context("failed to save state")?;
        Ok(())
    }

    /// Load a previously saved JSON value by `key`. Returns `None` if the key
    /// does not exist.
    pub fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn();
        let json_str: Option<String> = conn
            .query_row(
                "SELECT value FROM store_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query store state")?;

        json_str
            .map(|s| serde_json::from_str(&s).context("failed to deserialize state value"))
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> NotebookStore {
        NotebookStore::open(":memory:").expect("in-memory store should open")
    }

    #[test]
    fn empty_store_has_no_latest() {
        let store = memory_store();
        assert!(store.latest().unwrap().is_none());
        assert_eq!(store.notebook_count().unwrap(), 0);
    }

    #[test]
    fn save_and_load_notebook() {
        let store = memory_store();
        store
            .save_notebook("abc", "abc.py", "import marimo as mo\n")
            .unwrap();

        let nb = store.notebook("abc").unwrap().expect("notebook should exist");
        assert_eq!(nb.id, "abc");
        assert_eq!(nb.filename, "abc.py");
        assert_eq!(nb.content, "import marimo as mo\n");
        assert!(!nb.created_at.is_empty());
        assert!(store.notebook("missing").unwrap().is_none());
    }

    #[test]
    fn latest_tracks_most_recent_save() {
        let store = memory_store();
        store.save_notebook("first", "first.py", "one").unwrap();
        store.save_notebook("second", "second.py", "two").unwrap();

        let latest = store.latest().unwrap().unwrap();
        assert_eq!(latest.id, "second");
        assert_eq!(latest.content, "two");

        store.save_notebook("first", "first.py", "one again").unwrap();
        let latest = store.latest().unwrap().unwrap();
        assert_eq!(latest.id, "first");
        assert_eq!(latest.content, "one again");
        assert_eq!(store.notebook_count().unwrap(), 2);
    }

    #[test]
    fn state_round_trips_json() {
        let store = memory_store();
        let value = serde_json::json!({"session": "s-1", "count": 3});
        store.save_state("meta", &value).unwrap();
        assert_eq!(store.load_state("meta").unwrap(), Some(value));
        assert_eq!(store.load_state("nope").unwrap(), None);
    }

    #[test]
    fn state_overwrites_previous_value() {
        let store = memory_store();
        store.save_state("k", &serde_json::json!(1)).unwrap();
        store.save_state("k", &serde_json::json!(2)).unwrap();
        assert_eq!(store.load_state("k").unwrap(), Some(serde_json::json!(2)));
    }

    #[test]
    fn opens_file_database_in_nested_directory() {
        let dir = std::env::temp_dir().join("hexa_store_nested");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("deeper").join("hexa.db");

        {
            let store = NotebookStore::open(&path).unwrap();
            store.save_notebook("persisted", "p.py", "body").unwrap();
        }

        let reopened = NotebookStore::open(&path).unwrap();
        assert_eq!(reopened.latest().unwrap().unwrap().id, "persisted");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
