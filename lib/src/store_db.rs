//! Embedded SQL store (§4.10, §6): per-repo registry, tombstones,
//! properties, and merge-in-progress flags, persisted in a single sqlite
//! database. Grounded in `original_source/daemon/repo-mgr.c`'s property
//! and passphrase tables — the natural Rust analogue of its direct
//! sqlite3 usage — with all writes serialized behind one mutex (§5
//! `Manager.store_lock`) since `rusqlite::Connection` is `!Sync`.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreDbError {
    #[error("sql store error: {0}")]
    Sql(#[from] rusqlite::Error),
}

pub type StoreDbResult<T> = Result<T, StoreDbError>;

/// One row of the registry table (§4.10): the persisted half of a
/// `Repository` value, keyed by repo id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub enc_version: Option<u32>,
    pub magic: Option<String>,
    pub kdf_iterations: u32,
    pub worktree: Option<String>,
}

pub struct StoreDb {
    conn: Mutex<Connection>,
}

impl StoreDb {
    pub fn open(path: &Path) -> StoreDbResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(StoreDb {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> StoreDbResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(StoreDb {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> StoreDbResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS registry (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                enc_version INTEGER,
                magic TEXT,
                kdf_iterations INTEGER NOT NULL,
                worktree TEXT
            );
            CREATE TABLE IF NOT EXISTS tombstones (
                id TEXT PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS properties (
                repo_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (repo_id, key)
            );
            CREATE TABLE IF NOT EXISTS merge_info (
                repo_id TEXT PRIMARY KEY,
                in_merge INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    pub fn insert_repo(&self, row: &RegistryRow) -> StoreDbResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO registry
                (id, name, description, enc_version, magic, kdf_iterations, worktree)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.id,
                row.name,
                row.description,
                row.enc_version,
                row.magic,
                row.kdf_iterations,
                row.worktree,
            ],
        )?;
        Ok(())
    }

    pub fn get_repo(&self, id: &str) -> StoreDbResult<Option<RegistryRow>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            "SELECT id, name, description, enc_version, magic, kdf_iterations, worktree
             FROM registry WHERE id = ?1",
            params![id],
            |r| {
                Ok(RegistryRow {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    description: r.get(2)?,
                    enc_version: r.get(3)?,
                    magic: r.get(4)?,
                    kdf_iterations: r.get(5)?,
                    worktree: r.get(6)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_repos(&self) -> StoreDbResult<Vec<RegistryRow>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT id, name, description, enc_version, magic, kdf_iterations, worktree
             FROM registry ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(RegistryRow {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    description: r.get(2)?,
                    enc_version: r.get(3)?,
                    magic: r.get(4)?,
                    kdf_iterations: r.get(5)?,
                    worktree: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Records a tombstone without removing the registry row yet; the
    /// registry row removal is the commit point, done last by `purge`.
    pub fn mark_deleted(&self, id: &str) -> StoreDbResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO tombstones (id) VALUES (?1)",
            params![id],
        )?;
        Ok(())
    }

    pub fn list_tombstones(&self) -> StoreDbResult<Vec<String>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare("SELECT id FROM tombstones")?;
        let rows = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Deletes all per-repo rows (properties, merge flag) and finally the
    /// registry row and tombstone — in that order, so the registry row
    /// removal is the last, commit-point write (§7).
    pub fn purge(&self, id: &str) -> StoreDbResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute("DELETE FROM properties WHERE repo_id = ?1", params![id])?;
        conn.execute("DELETE FROM merge_info WHERE repo_id = ?1", params![id])?;
        conn.execute("DELETE FROM registry WHERE id = ?1", params![id])?;
        conn.execute("DELETE FROM tombstones WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn set_property(&self, repo_id: &str, key: &str, value: &str) -> StoreDbResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO properties (repo_id, key, value) VALUES (?1, ?2, ?3)",
            params![repo_id, key, value],
        )?;
        Ok(())
    }

    pub fn get_property(&self, repo_id: &str, key: &str) -> StoreDbResult<Option<String>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            "SELECT value FROM properties WHERE repo_id = ?1 AND key = ?2",
            params![repo_id, key],
            |r| r.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn set_in_merge(&self, repo_id: &str, in_merge: bool) -> StoreDbResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO merge_info (repo_id, in_merge) VALUES (?1, ?2)",
            params![repo_id, in_merge as i64],
        )?;
        Ok(())
    }

    pub fn repos_in_merge(&self) -> StoreDbResult<Vec<String>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt =
            conn.prepare("SELECT repo_id FROM merge_info WHERE in_merge = 1")?;
        let rows = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str) -> RegistryRow {
        RegistryRow {
            id: id.to_string(),
            name: "repo".to_string(),
            description: None,
            enc_version: None,
            magic: None,
            kdf_iterations: 100_000,
            worktree: Some("/tmp/worktree".to_string()),
        }
    }

    #[test]
    fn insert_and_get_repo_round_trips() {
        let db = StoreDb::open_in_memory().unwrap();
        db.insert_repo(&row("r1")).unwrap();
        let loaded = db.get_repo("r1").unwrap().unwrap();
        assert_eq!(loaded.name, "repo");
        assert_eq!(loaded.worktree.as_deref(), Some("/tmp/worktree"));
    }

    #[test]
    fn mark_deleted_then_purge_removes_registry_row_last() {
        let db = StoreDb::open_in_memory().unwrap();
        db.insert_repo(&row("r1")).unwrap();
        db.set_property("r1", "auto-sync", "true").unwrap();
        db.mark_deleted("r1").unwrap();
        assert_eq!(db.list_tombstones().unwrap(), vec!["r1".to_string()]);

        db.purge("r1").unwrap();
        assert!(db.get_repo("r1").unwrap().is_none());
        assert!(db.get_property("r1", "auto-sync").unwrap().is_none());
        assert!(db.list_tombstones().unwrap().is_empty());
    }

    #[test]
    fn properties_round_trip() {
        let db = StoreDb::open_in_memory().unwrap();
        db.insert_repo(&row("r1")).unwrap();
        db.set_property("r1", "auto-sync", "true").unwrap();
        assert_eq!(
            db.get_property("r1", "auto-sync").unwrap(),
            Some("true".to_string())
        );
        assert_eq!(db.get_property("r1", "relay-id").unwrap(), None);
    }

    #[test]
    fn merge_flag_tracks_repos_in_merge() {
        let db = StoreDb::open_in_memory().unwrap();
        db.insert_repo(&row("r1")).unwrap();
        db.insert_repo(&row("r2")).unwrap();
        db.set_in_merge("r1", true).unwrap();
        assert_eq!(db.repos_in_merge().unwrap(), vec!["r1".to_string()]);
        db.set_in_merge("r1", false).unwrap();
        assert!(db.repos_in_merge().unwrap().is_empty());
    }
}
