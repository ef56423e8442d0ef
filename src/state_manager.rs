// State Manager for policy modules
// SQLite-based persistence with JSON backup
//
// Stores module-status checkpoints so optimizer/risk/liquidity modules can be
// restored with set_module_status after a restart.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{OmsError, Result};
use crate::handler::ModuleKind;

// =============================================================================
// Data Models
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleCheckpoint {
    pub module_name: String,
    pub kind: ModuleKind,
    pub status: serde_json::Value,
    pub saved_at: String,
}

// =============================================================================
// State Manager Implementation
// =============================================================================

pub struct SqliteStateManager {
    conn: Arc<Mutex<Connection>>,
    json_backup_path: PathBuf,
    auto_backup: bool,
}

impl SqliteStateManager {
    pub fn new<P: AsRef<Path>>(db_path: P, json_backup_path: P, auto_backup: bool) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Create parent directories
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = json_backup_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let manager = Self {
            conn: Arc::new(Mutex::new(conn)),
            json_backup_path: json_backup_path.as_ref().to_path_buf(),
            auto_backup,
        };

        manager.create_tables()?;
        info!("SQLite state manager initialized at {}", db_path.display());

        Ok(manager)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS module_status (
                module_name TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                saved_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS module_status_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                module_name TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                saved_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_history_module ON module_status_history(module_name)",
            [],
        )?;

        debug!("Database schema created/verified");
        Ok(())
    }

    pub fn save_module_status(
        &self,
        module_name: &str,
        kind: ModuleKind,
        status: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.conn();
        let status_json = serde_json::to_string(status)?;
        let saved_at = Utc::now().to_rfc3339();
        let kind = kind.to_string();

        conn.execute(
            "INSERT OR REPLACE INTO module_status (module_name, kind, status, saved_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![module_name, kind, status_json, saved_at],
        )?;
        conn.execute(
            "INSERT INTO module_status_history (module_name, kind, status, saved_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![module_name, kind, status_json, saved_at],
        )?;

        debug!("Module status saved: {} [{}]", module_name, kind);

        if self.auto_backup {
            drop(conn);
            self.export_json()?;
        }

        Ok(())
    }

    pub fn load_module_status(&self, module_name: &str) -> Result<Option<ModuleCheckpoint>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT module_name, kind, status, saved_at FROM module_status WHERE module_name = ?1",
        )?;

        let row = stmt.query_row(params![module_name], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        });

        match row {
            Ok(raw) => Ok(Some(checkpoint_from_row(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                debug!("No checkpoint for module {}", module_name);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn load_all(&self) -> Result<Vec<ModuleCheckpoint>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT module_name, kind, status, saved_at FROM module_status ORDER BY module_name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(checkpoint_from_row).collect()
    }

    /// Number of checkpoints ever saved for a module
    pub fn history_len(&self, module_name: &str) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM module_status_history WHERE module_name = ?1",
            params![module_name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn export_json(&self) -> Result<()> {
        let modules = self.load_all()?;

        let state = serde_json::json!({
            "exported_at": Utc::now().to_rfc3339(),
            "modules": modules,
        });

        std::fs::write(&self.json_backup_path, serde_json::to_string_pretty(&state)?)?;
        debug!("State exported to: {}", self.json_backup_path.display());
        Ok(())
    }
}

fn checkpoint_from_row(
    (module_name, kind, status, saved_at): (String, String, String, String),
) -> Result<ModuleCheckpoint> {
    let kind: ModuleKind = serde_json::from_value(serde_json::Value::String(kind.clone()))
        .map_err(|_| OmsError::ModuleStatus(format!("unknown module kind {}", kind)))?;
    Ok(ModuleCheckpoint {
        module_name,
        kind,
        status: serde_json::from_str(&status)?,
        saved_at,
    })
}

// =============================================================================
// Factory Function
// =============================================================================

pub fn create_state_manager<P: AsRef<Path>>(state_dir: P) -> Result<SqliteStateManager> {
    let state_dir = state_dir.as_ref();
    std::fs::create_dir_all(state_dir)?;

    let db_path = state_dir.join("module_state.db");
    let json_path = state_dir.join("module_state.json");

    SqliteStateManager::new(db_path, json_path, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_save_and_load_module_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = create_state_manager(dir.path()).unwrap();

        let status = json!({"consecutive_losses": {"s1": 2}, "throttled": []});
        store
            .save_module_status("loss_streak", ModuleKind::Risk, &status)
            .unwrap();

        let loaded = store.load_module_status("loss_streak").unwrap().unwrap();
        assert_eq!(loaded.kind, ModuleKind::Risk);
        assert_eq!(loaded.status, status);
        assert!(store.load_module_status("missing").unwrap().is_none());
    }

    #[test]
    fn test_latest_status_wins_and_history_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = create_state_manager(dir.path()).unwrap();

        store
            .save_module_status("exposure", ModuleKind::Liquidity, &json!({"v": 1}))
            .unwrap();
        store
            .save_module_status("exposure", ModuleKind::Liquidity, &json!({"v": 2}))
            .unwrap();

        let loaded = store.load_module_status("exposure").unwrap().unwrap();
        assert_eq!(loaded.status, json!({"v": 2}));
        assert_eq!(store.history_len("exposure").unwrap(), 2);
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_json_backup_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = create_state_manager(dir.path()).unwrap();
        store
            .save_module_status("pass_rate", ModuleKind::Optimizer, &json!({"n": 3}))
            .unwrap();

        let backup = std::fs::read_to_string(dir.path().join("module_state.json")).unwrap();
        let backup: serde_json::Value = serde_json::from_str(&backup).unwrap();
        assert_eq!(backup["modules"][0]["module_name"], "pass_rate");
        assert_eq!(backup["modules"][0]["status"]["n"], 3);
    }
}
