//! Persisted layer versions and version-scoped cache cleanup.

use chrono::Utc;
use tokio_rusqlite::{params, rusqlite};

use super::connection::CacheDb;
use crate::Error;
use crate::lifecycle::LifecycleState;

impl CacheDb {
    /// Record the lifecycle state of `version`.
    pub async fn record_version(&self, version: &str, state: LifecycleState) -> Result<(), Error> {
        let version = version.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO layer_versions (version, state, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(version) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
                    params![version, state.as_str(), Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Mark `version` active and every other active version redundant.
    pub async fn record_activation(&self, version: &str) -> Result<(), Error> {
        let version = version.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let now = Utc::now().to_rfc3339();
                let tx = conn.unchecked_transaction()?;
                tx.execute(
                    "UPDATE layer_versions SET state = ?1, updated_at = ?2 WHERE state = ?3 AND version != ?4",
                    params![LifecycleState::Redundant.as_str(), now, LifecycleState::Active.as_str(), version],
                )?;
                tx.execute(
                    "INSERT INTO layer_versions (version, state, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(version) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
                    params![version, LifecycleState::Active.as_str(), now],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// The version that controlled pages when the store was last written.
    pub async fn active_version(&self) -> Result<Option<String>, Error> {
        self.conn
            .call(|conn| -> Result<Option<String>, Error> {
                let result = conn.query_row(
                    "SELECT version FROM layer_versions WHERE state = ?1 ORDER BY updated_at DESC LIMIT 1",
                    params![LifecycleState::Active.as_str()],
                    |row| row.get(0),
                );
                match result {
                    Ok(v) => Ok(Some(v)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Stored lifecycle state of `version`, if it was ever recorded.
    pub async fn version_state(&self, version: &str) -> Result<Option<LifecycleState>, Error> {
        let version = version.to_string();
        self.conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let result = conn.query_row(
                    "SELECT state FROM layer_versions WHERE version = ?1",
                    params![version],
                    |row| row.get(0),
                );
                match result {
                    Ok(v) => Ok(Some(v)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?
            .map(|s| s.parse())
            .transpose()
    }

    /// Delete every cache not owned by one of `keep_versions`, entries included.
    ///
    /// Returns the number of caches deleted; 0 when there is nothing to do.
    pub async fn delete_stale_caches(&self, keep_versions: &[String]) -> Result<u64, Error> {
        let keep = keep_versions.to_vec();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let placeholders = (1..=keep.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
                let tx = conn.unchecked_transaction()?;
                tx.execute(
                    &format!(
                        "DELETE FROM cache_entries
                         WHERE cache_name IN (SELECT name FROM caches WHERE version NOT IN ({placeholders}))"
                    ),
                    rusqlite::params_from_iter(keep.iter()),
                )?;
                let deleted = tx.execute(
                    &format!("DELETE FROM caches WHERE version NOT IN ({placeholders})"),
                    rusqlite::params_from_iter(keep.iter()),
                )?;
                tx.commit()?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entries::CachedEntry;
    use crate::policy::ResponseSnapshot;

    #[tokio::test]
    async fn test_activation_tracking() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert_eq!(db.active_version().await.unwrap(), None);

        db.record_activation("v1").await.unwrap();
        db.record_version("v2", LifecycleState::Waiting).await.unwrap();
        assert_eq!(db.active_version().await.unwrap().as_deref(), Some("v1"));

        db.record_activation("v2").await.unwrap();
        assert_eq!(db.active_version().await.unwrap().as_deref(), Some("v2"));
        assert_eq!(db.version_state("v1").await.unwrap(), Some(LifecycleState::Redundant));
        assert_eq!(db.version_state("v3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_stale_caches_idempotent() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let now = Utc::now();
        for (version, cache) in [("v1", "pages-v1"), ("v1", "precache-v1"), ("v2", "pages-v2")] {
            let entry = CachedEntry::new(cache, "GET", "https://app.test/", ResponseSnapshot::new(200, "x"), now);
            db.put_entry(version, &entry).await.unwrap();
        }

        let keep = vec!["v2".to_string()];
        assert_eq!(db.delete_stale_caches(&keep).await.unwrap(), 2);
        assert_eq!(db.delete_stale_caches(&keep).await.unwrap(), 0);

        let names: Vec<String> = db.list_caches().await.unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["pages-v2".to_string()]);
        assert_eq!(db.count_entries("pages-v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_stale_caches_keeps_pending_versions() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let now = Utc::now();
        for (version, cache) in [("v1", "precache-v1"), ("v2", "precache-v2"), ("v3", "precache-v3")] {
            let entry = CachedEntry::new(cache, "GET", "https://app.test/", ResponseSnapshot::new(200, "x"), now);
            db.put_entry(version, &entry).await.unwrap();
        }

        let keep = vec!["v2".to_string(), "v3".to_string()];
        assert_eq!(db.delete_stale_caches(&keep).await.unwrap(), 1);
        assert_eq!(db.count_entries("precache-v3").await.unwrap(), 1);
        assert!(!db.cache_exists("precache-v1").await.unwrap());
    }
}
