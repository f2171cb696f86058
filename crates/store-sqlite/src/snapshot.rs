use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use tracing::info;

use crate::{SqliteStore, StoreError, StoreResult};

pub fn snapshot_file_name(date: NaiveDate) -> String {
    format!("app-{}.db", date.format("%Y%m%d"))
}

impl SqliteStore {
    /// Copies the database file verbatim into `backup_dir`, named after
    /// today's UTC date. A snapshot taken earlier the same day is replaced.
    pub fn snapshot_to(&self, backup_dir: &Path) -> StoreResult<PathBuf> {
        self.snapshot_on(backup_dir, Utc::now().date_naive())
    }

    pub(crate) fn snapshot_on(&self, backup_dir: &Path, date: NaiveDate) -> StoreResult<PathBuf> {
        let source = self.path().ok_or(StoreError::NotFileBacked)?.to_path_buf();
        fs::create_dir_all(backup_dir)?;
        let dest = backup_dir.join(snapshot_file_name(date));

        // Writers are blocked for the duration of the copy.
        let conn = self.conn();
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        let bytes = fs::copy(&source, &dest)?;
        drop(conn);

        info!(
            source = %source.display(),
            dest = %dest.display(),
            bytes,
            "snapshot written"
        );
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_name_uses_compact_date() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(snapshot_file_name(date), "app-20260307.db");
    }

    #[test]
    fn in_memory_store_cannot_snapshot() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            store.snapshot_to(dir.path()),
            Err(StoreError::NotFileBacked)
        ));
    }

    #[test]
    fn snapshot_is_a_usable_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("data").join("app.db")).unwrap();
        store.init_schema().unwrap();
        let run = store.create_run().unwrap();
        store.upsert_card(run.id, "links", &json!({"n": 3})).unwrap();

        let date = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let backups = dir.path().join("backups");
        let path = store.snapshot_on(&backups, date).unwrap();
        assert_eq!(path, backups.join("app-20261017.db"));

        let copy = SqliteStore::open(&path).unwrap();
        assert_eq!(copy.get_run(run.id).unwrap(), Some(run.clone()));
        assert_eq!(copy.list_cards(run.id).unwrap().len(), 1);
        drop(copy);

        // Same-day snapshot overwrites.
        store.create_run().unwrap();
        store.snapshot_on(&backups, date).unwrap();
        let copy = SqliteStore::open(&path).unwrap();
        assert_eq!(copy.counts().unwrap().runs, 2);
    }
}
