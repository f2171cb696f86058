use rusqlite::params;
use tracing::{info, warn};

use crate::{SqliteStore, StoreError, StoreResult};

impl SqliteStore {
    /// Deletes the oldest runs (by creation time, then id) until at most
    /// `limit` remain, returning the evicted ids.
    ///
    /// Counting and deleting are separate steps, so concurrent creations may
    /// briefly leave the store a little above or below `limit`. A failed
    /// delete is logged and skipped; eviction is best-effort.
    pub fn enforce_retention(&self, limit: usize) -> StoreResult<Vec<i64>> {
        let candidates = {
            let conn = self.conn();
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |r| r.get(0))?;
            let excess = total - i64::try_from(limit).unwrap_or(i64::MAX);
            if excess <= 0 {
                return Ok(Vec::new());
            }
            let mut stmt = conn
                .prepare_cached("SELECT id FROM runs ORDER BY created_at ASC, id ASC LIMIT ?1")?;
            let ids = stmt.query_map(params![excess], |r| r.get::<_, i64>(0))?;
            ids.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut evicted = Vec::with_capacity(candidates.len());
        for run_id in candidates {
            match self.delete_run(run_id) {
                Ok(_) => evicted.push(run_id),
                // Already removed by someone else.
                Err(StoreError::NotFound { .. }) => {}
                Err(err) => warn!(run_id, error = %err, "failed to evict run"),
            }
        }
        if !evicted.is_empty() {
            info!(evicted = evicted.len(), limit, "retention evicted runs");
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use core_model::{ChatRole, now_micros};
    use serde_json::json;

    use crate::SqliteStore;

    fn store(limit: usize) -> SqliteStore {
        let store = SqliteStore::open_in_memory()
            .expect("open")
            .with_retention_limit(limit);
        store.init_schema().expect("schema");
        store
    }

    #[test]
    fn under_limit_is_noop() {
        let store = store(3);
        for _ in 0..3 {
            store.create_run().unwrap();
        }
        assert!(store.enforce_retention(3).unwrap().is_empty());
        assert_eq!(store.counts().unwrap().runs, 3);
    }

    #[test]
    fn evicts_oldest_run_with_dependents() {
        let store = store(500);
        let oldest = store.create_run().unwrap();
        let card = store.upsert_card(oldest.id, "title_meta", &json!({})).unwrap();
        store.append_evidence(card.id, "<p>e</p>").unwrap();
        let thread = store.create_thread(oldest.id, "t").unwrap();
        store.append_message(thread.id, ChatRole::User, "hi").unwrap();

        for _ in 1..500 {
            store.create_run().unwrap();
        }
        assert_eq!(store.counts().unwrap().runs, 500);
        assert!(store.get_run(oldest.id).unwrap().is_some());

        let newest = store.create_run().unwrap();
        let counts = store.counts().unwrap();
        assert_eq!(counts.runs, 500);
        assert!(store.get_run(oldest.id).unwrap().is_none());
        assert!(store.get_run(newest.id).unwrap().is_some());
        assert_eq!(counts.cards, 0);
        assert_eq!(counts.evidence, 0);
        assert_eq!(counts.threads, 0);
        assert_eq!(counts.messages, 0);
    }

    #[test]
    fn orders_by_creation_time_then_id() {
        let store = store(10);
        let now = now_micros();
        let late = store.insert_run(now).unwrap();
        let tie_a = store.insert_run(now - Duration::hours(1)).unwrap();
        let tie_b = store.insert_run(now - Duration::hours(1)).unwrap();
        let early = store.insert_run(now - Duration::days(1)).unwrap();

        let evicted = store.enforce_retention(1).unwrap();
        assert_eq!(evicted, vec![early.id, tie_a.id, tie_b.id]);
        assert!(store.get_run(late.id).unwrap().is_some());
    }

    #[test]
    fn creation_limit_is_at_least_one() {
        let store = store(0);
        assert_eq!(store.retention_limit(), 1);
        store.create_run().unwrap();
        let last = store.create_run().unwrap();
        let runs = store.list_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, last.id);
        assert!(runs[0].created_at <= Utc::now());
    }
}
