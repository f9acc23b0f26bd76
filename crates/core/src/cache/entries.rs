//! Cache entry reads and writes.
//!
//! Nothing here checks cacheability; callers must run a response through
//! the cacheable-response filter before storing it.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio_rusqlite::{params, rusqlite};

use super::connection::CacheDb;
use super::hash::compute_cache_key;
use crate::Error;
use crate::policy::ResponseSnapshot;

/// A stored response together with its identity and storage metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub cache_name: String,
    pub key_hash: String,
    pub method: String,
    pub url: String,
    pub response: ResponseSnapshot,
    /// Manifest revision, set for precache entries only.
    pub revision: Option<String>,
    pub stored_at: DateTime<Utc>,
}

impl CachedEntry {
    pub fn new(
        cache_name: impl Into<String>, method: &str, url: &str, response: ResponseSnapshot, stored_at: DateTime<Utc>,
    ) -> Self {
        Self {
            cache_name: cache_name.into(),
            key_hash: compute_cache_key(method, url),
            method: method.to_string(),
            url: url.to_string(),
            response,
            revision: None,
            stored_at,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Whether the entry is older than `max_age` at `now`. A `max_age`
    /// too large to represent never expires anything.
    pub fn is_expired(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        match TimeDelta::from_std(max_age) {
            Ok(max_age) => now.signed_duration_since(self.stored_at) >= max_age,
            Err(_) => false,
        }
    }
}

/// Per-cache summary for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct CacheSummary {
    pub name: String,
    pub version: String,
    pub entries: u64,
}

struct EntryRow {
    cache_name: String,
    key_hash: String,
    method: String,
    url: String,
    status: i64,
    headers_json: String,
    body: Vec<u8>,
    revision: Option<String>,
    stored_at_ms: i64,
}

const SELECT_COLUMNS: &str =
    "cache_name, key_hash, method, url, status, headers_json, body, revision, stored_at_ms FROM cache_entries";

impl EntryRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            cache_name: row.get(0)?,
            key_hash: row.get(1)?,
            method: row.get(2)?,
            url: row.get(3)?,
            status: row.get(4)?,
            headers_json: row.get(5)?,
            body: row.get(6)?,
            revision: row.get(7)?,
            stored_at_ms: row.get(8)?,
        })
    }

    fn into_entry(self) -> Result<CachedEntry, Error> {
        let status = u16::try_from(self.status)
            .map_err(|_| Error::CorruptEntry(format!("status {} out of range", self.status)))?;
        let stored_at = DateTime::from_timestamp_millis(self.stored_at_ms)
            .ok_or_else(|| Error::CorruptEntry(format!("timestamp {} out of range", self.stored_at_ms)))?;
        Ok(CachedEntry {
            cache_name: self.cache_name,
            key_hash: self.key_hash,
            method: self.method,
            url: self.url,
            response: ResponseSnapshot { status, headers: serde_json::from_str(&self.headers_json)?, body: self.body },
            revision: self.revision,
            stored_at,
        })
    }
}

fn ensure_cache(conn: &rusqlite::Connection, name: &str, version: &str) -> Result<(), Error> {
    let created = conn.execute(
        "INSERT INTO caches (name, version, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO NOTHING",
        params![name, version, Utc::now().to_rfc3339()],
    )?;
    if created > 0 {
        tracing::debug!(cache = name, version, "created cache");
    }
    Ok(())
}

fn upsert(conn: &rusqlite::Connection, entry: &CachedEntry, headers_json: &str) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO cache_entries (
            cache_name, key_hash, method, url, status, headers_json, body, revision, stored_at_ms, last_used
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9,
                  (SELECT COALESCE(MAX(last_used), 0) + 1 FROM cache_entries))
        ON CONFLICT(cache_name, key_hash) DO UPDATE SET
            method = excluded.method,
            url = excluded.url,
            status = excluded.status,
            headers_json = excluded.headers_json,
            body = excluded.body,
            revision = excluded.revision,
            stored_at_ms = excluded.stored_at_ms,
            last_used = excluded.last_used",
        params![
            &entry.cache_name,
            &entry.key_hash,
            &entry.method,
            &entry.url,
            entry.response.status as i64,
            headers_json,
            &entry.response.body,
            &entry.revision,
            entry.stored_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

impl CacheDb {
    /// Write an entry, creating its cache (owned by `version`) on first use.
    ///
    /// Last write wins for a key that is already present.
    pub async fn put_entry(&self, version: &str, entry: &CachedEntry) -> Result<(), Error> {
        let entry = entry.clone();
        let version = version.to_string();
        let headers_json = serde_json::to_string(&entry.response.headers)?;
        self.conn
            .call(move |conn| -> Result<(), Error> {
                ensure_cache(conn, &entry.cache_name, &version)?;
                upsert(conn, &entry, &headers_json)
            })
            .await
            .map_err(Error::from)
    }

    /// Write several entries in one transaction: either all land or none.
    pub async fn put_entries(&self, version: &str, entries: Vec<CachedEntry>) -> Result<(), Error> {
        let version = version.to_string();
        let encoded = entries
            .into_iter()
            .map(|e| serde_json::to_string(&e.response.headers).map(|h| (e, h)))
            .collect::<Result<Vec<_>, _>>()?;
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.unchecked_transaction()?;
                for (entry, headers_json) in &encoded {
                    ensure_cache(&tx, &entry.cache_name, &version)?;
                    upsert(&tx, entry, headers_json)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Look up an entry.
    ///
    /// An entry older than `max_age` counts as absent even if eviction has
    /// not removed it yet. A hit marks the entry as recently used.
    pub async fn get_entry(
        &self, cache_name: &str, key_hash: &str, max_age: Option<Duration>, now: DateTime<Utc>,
    ) -> Result<Option<CachedEntry>, Error> {
        let cache_name = cache_name.to_string();
        let key_hash = key_hash.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CachedEntry>, Error> {
                let mut stmt =
                    conn.prepare(&format!("SELECT {SELECT_COLUMNS} WHERE cache_name = ?1 AND key_hash = ?2"))?;
                let row = match stmt.query_row(params![cache_name, key_hash], EntryRow::read) {
                    Ok(row) => row,
                    Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                    Err(e) => return Err(e.into()),
                };

                let entry = row.into_entry()?;
                if let Some(max_age) = max_age
                    && entry.is_expired(max_age, now)
                {
                    return Ok(None);
                }

                conn.execute(
                    "UPDATE cache_entries
                     SET last_used = (SELECT COALESCE(MAX(last_used), 0) + 1 FROM cache_entries)
                     WHERE cache_name = ?1 AND key_hash = ?2",
                    params![cache_name, key_hash],
                )?;
                Ok(Some(entry))
            })
            .await
            .map_err(Error::from)
    }

    /// Find an entry for `key_hash` carrying `revision` in any cache whose
    /// name starts with `cache_prefix`.
    pub async fn find_revision(
        &self, cache_prefix: &str, key_hash: &str, revision: &str,
    ) -> Result<Option<CachedEntry>, Error> {
        let pattern = format!("{cache_prefix}%");
        let key_hash = key_hash.to_string();
        let revision = revision.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CachedEntry>, Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} WHERE cache_name LIKE ?1 AND key_hash = ?2 AND revision = ?3 LIMIT 1"
                ))?;
                match stmt.query_row(params![pattern, key_hash, revision], EntryRow::read) {
                    Ok(row) => Ok(Some(row.into_entry()?)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Number of entries in a cache (0 if it does not exist).
    pub async fn count_entries(&self, cache_name: &str) -> Result<u64, Error> {
        let cache_name = cache_name.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM cache_entries WHERE cache_name = ?1",
                    params![cache_name],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Whether a cache has ever been created.
    pub async fn cache_exists(&self, cache_name: &str) -> Result<bool, Error> {
        let cache_name = cache_name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM caches WHERE name = ?1)",
                    params![cache_name],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// All caches with their owning version and entry count.
    pub async fn list_caches(&self) -> Result<Vec<CacheSummary>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<CacheSummary>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT c.name, c.version, COUNT(e.key_hash)
                     FROM caches c LEFT JOIN cache_entries e ON e.cache_name = c.name
                     GROUP BY c.name, c.version
                     ORDER BY c.name",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(CacheSummary { name: row.get(0)?, version: row.get(1)?, entries: row.get::<_, i64>(2)? as u64 })
                })?;
                rows.collect::<Result<Vec<_>, _>>().map_err(Error::from)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(cache: &str, url: &str, body: &str, at: DateTime<Utc>) -> CachedEntry {
        CachedEntry::new(cache, "GET", url, ResponseSnapshot::new(200, body).with_header("content-type", "text/plain"), at)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let now = Utc::now();
        let e = entry("api-v1", "https://app.test/rest/v1/artists", "[]", now);
        db.put_entry("v1", &e).await.unwrap();

        let got = db.get_entry("api-v1", &e.key_hash, None, now).await.unwrap().unwrap();
        assert_eq!(got.response, e.response);
        assert_eq!(got.url, e.url);
        assert_eq!(got.stored_at.timestamp_millis(), now.timestamp_millis());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let got = db.get_entry("api-v1", "nope", None, Utc::now()).await.unwrap();
        assert!(got.is_none());
        assert!(!db.cache_exists("api-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let now = Utc::now();
        db.put_entry("v1", &entry("pages-v1", "https://app.test/", "old", now)).await.unwrap();
        db.put_entry("v1", &entry("pages-v1", "https://app.test/", "new", now)).await.unwrap();

        let key = compute_cache_key("GET", "https://app.test/");
        let got = db.get_entry("pages-v1", &key, None, now).await.unwrap().unwrap();
        assert_eq!(got.response.body, b"new");
        assert_eq!(db.count_entries("pages-v1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_absent() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let t = Utc::now();
        let e = entry("api-v1", "https://app.test/rest/v1/shows", "[]", t);
        db.put_entry("v1", &e).await.unwrap();

        let max_age = Duration::from_secs(300);
        let before = t + TimeDelta::seconds(299);
        let at = t + TimeDelta::seconds(300);
        assert!(db.get_entry("api-v1", &e.key_hash, Some(max_age), before).await.unwrap().is_some());
        assert!(db.get_entry("api-v1", &e.key_hash, Some(max_age), at).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_huge_max_age_never_expires() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let t = Utc::now();
        let e = entry("images-v1", "https://app.test/logo.png", "png", t);
        db.put_entry("v1", &e).await.unwrap();

        let later = t + TimeDelta::days(3650);
        for max_age in [Duration::from_secs(u64::MAX), Duration::MAX] {
            assert!(!e.is_expired(max_age, later));
            assert!(db.get_entry("images-v1", &e.key_hash, Some(max_age), later).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_put_entries_and_find_revision() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let now = Utc::now();
        db.put_entries(
            "v1",
            vec![
                entry("precache-v1", "https://app.test/index.html", "<html>", now).with_revision("r1"),
                entry("precache-v1", "https://app.test/app.js", "js", now).with_revision("r2"),
            ],
        )
        .await
        .unwrap();

        assert_eq!(db.count_entries("precache-v1").await.unwrap(), 2);
        let key = compute_cache_key("GET", "https://app.test/app.js");
        assert!(db.find_revision("precache-", &key, "r2").await.unwrap().is_some());
        assert!(db.find_revision("precache-", &key, "r3").await.unwrap().is_none());
        assert!(db.find_revision("pages-", &key, "r2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_caches() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let now = Utc::now();
        db.put_entry("v1", &entry("images-v1", "https://cdn.test/a.png", "a", now)).await.unwrap();
        db.put_entry("v1", &entry("images-v1", "https://cdn.test/b.png", "b", now)).await.unwrap();
        db.put_entry("v1", &entry("pages-v1", "https://app.test/", "p", now)).await.unwrap();

        let caches = db.list_caches().await.unwrap();
        assert_eq!(
            caches,
            vec![
                CacheSummary { name: "images-v1".into(), version: "v1".into(), entries: 2 },
                CacheSummary { name: "pages-v1".into(), version: "v1".into(), entries: 1 },
            ]
        );
    }
}
