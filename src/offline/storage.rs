//! Cache bucket storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::request::{CacheKey, Response};
use crate::error::CacheError;

/// A stored response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the response was stored
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache bucket backends.
///
/// Buckets are named, independent sets of responses keyed by request.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the bucket if it does not exist yet.
  fn open_bucket(&self, bucket: &str) -> Result<(), CacheError>;

  /// Names of all existing buckets.
  fn bucket_names(&self) -> Result<Vec<String>, CacheError>;

  /// Remove a bucket with all its entries. Returns whether it existed.
  fn delete_bucket(&self, bucket: &str) -> Result<bool, CacheError>;

  /// Store one response, replacing any previous entry for the key.
  fn put(&self, bucket: &str, key: &CacheKey, response: &Response) -> Result<(), CacheError>;

  /// Create the bucket and store several responses in it; either all are
  /// written or nothing is, bucket included.
  fn put_all(&self, bucket: &str, entries: &[(CacheKey, Response)]) -> Result<(), CacheError>;

  /// Look a key up in one bucket.
  fn lookup(&self, bucket: &str, key: &CacheKey) -> Result<Option<CachedResponse>, CacheError>;

  /// Record that `bucket` finished activation.
  fn mark_activated(&self, bucket: &str) -> Result<(), CacheError>;

  /// Whether `bucket` exists and was activated.
  fn is_activated(&self, bucket: &str) -> Result<bool, CacheError>;
}

/// SQLite-based bucket storage.
pub struct SqliteCacheStorage {
  conn: Mutex<Connection>,
}

impl SqliteCacheStorage {
  /// Open (creating if needed) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self, CacheError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent).map_err(|e| {
          CacheError::Unavailable(format!("failed to create cache directory: {}", e))
        })?;
      }
    }

    let conn = Connection::open(path).map_err(|e| {
      CacheError::Unavailable(format!("failed to open cache at {}: {}", path.display(), e))
    })?;
    Self::with_connection(conn)
  }

  /// Private in-memory cache.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self, CacheError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, CacheError> {
    conn.execute_batch(CACHE_SCHEMA)?;

    // Caches written before activation tracking lack the column
    let has_marker: bool = conn.query_row(
      "SELECT COUNT(*) > 0 FROM pragma_table_info('cache_buckets') WHERE name = 'activated_at'",
      [],
      |row| row.get(0),
    )?;
    if !has_marker {
      conn.execute("ALTER TABLE cache_buckets ADD COLUMN activated_at TEXT", [])?;
    }

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CacheError> {
    self
      .conn
      .lock()
      .map_err(|e| CacheError::Unavailable(format!("lock poisoned: {}", e)))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_buckets (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    activated_at TEXT
);

CREATE TABLE IF NOT EXISTS cache_entries (
    bucket TEXT NOT NULL,
    key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (bucket, key)
);
"#;

fn insert_entry(
  conn: &Connection,
  bucket: &str,
  key: &CacheKey,
  response: &Response,
) -> Result<(), CacheError> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| CacheError::Unavailable(format!("failed to encode headers: {}", e)))?;

  conn.execute(
    "INSERT OR IGNORE INTO cache_buckets (name) VALUES (?)",
    params![bucket],
  )?;
  conn.execute(
    "INSERT OR REPLACE INTO cache_entries (bucket, key, url, status, headers, body, cached_at)
     VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
    params![bucket, key.hash, key.url, response.status, headers, response.body],
  )?;
  Ok(())
}

impl CacheStorage for SqliteCacheStorage {
  fn open_bucket(&self, bucket: &str) -> Result<(), CacheError> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR IGNORE INTO cache_buckets (name) VALUES (?)",
      params![bucket],
    )?;
    Ok(())
  }

  fn bucket_names(&self) -> Result<Vec<String>, CacheError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM cache_buckets ORDER BY name")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
  }

  fn delete_bucket(&self, bucket: &str) -> Result<bool, CacheError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM cache_entries WHERE bucket = ?", params![bucket])?;
    let removed = tx.execute("DELETE FROM cache_buckets WHERE name = ?", params![bucket])?;
    tx.commit()?;
    Ok(removed > 0)
  }

  fn put(&self, bucket: &str, key: &CacheKey, response: &Response) -> Result<(), CacheError> {
    let conn = self.lock()?;
    insert_entry(&conn, bucket, key, response)
  }

  fn put_all(&self, bucket: &str, entries: &[(CacheKey, Response)]) -> Result<(), CacheError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
      "INSERT OR IGNORE INTO cache_buckets (name) VALUES (?)",
      params![bucket],
    )?;
    for (key, response) in entries {
      insert_entry(&tx, bucket, key, response)?;
    }
    tx.commit()?;
    Ok(())
  }

  fn lookup(&self, bucket: &str, key: &CacheKey) -> Result<Option<CachedResponse>, CacheError> {
    let conn = self.lock()?;
    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE bucket = ? AND key = ?",
        params![bucket, key.hash],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()?;

    match row {
      Some((status, headers, body, cached_at)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| CacheError::Unavailable(format!("corrupt cached headers: {}", e)))?;
        Ok(Some(CachedResponse {
          response: Response {
            status,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn mark_activated(&self, bucket: &str) -> Result<(), CacheError> {
    let conn = self.lock()?;
    let updated = conn.execute(
      "UPDATE cache_buckets SET activated_at = datetime('now') WHERE name = ?",
      params![bucket],
    )?;
    if updated == 0 {
      return Err(CacheError::Unavailable(format!("no bucket named {}", bucket)));
    }
    Ok(())
  }

  fn is_activated(&self, bucket: &str) -> Result<bool, CacheError> {
    let conn = self.lock()?;
    let activated: Option<bool> = conn
      .query_row(
        "SELECT activated_at IS NOT NULL FROM cache_buckets WHERE name = ?",
        params![bucket],
        |row| row.get(0),
      )
      .optional()?;
    Ok(activated.unwrap_or(false))
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| CacheError::Unavailable(format!("failed to parse datetime '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;
  use url::Url;

  fn key(path: &str) -> CacheKey {
    let url = Url::parse("https://shop.example/").unwrap().join(path).unwrap();
    CacheKey::new(&Method::GET, &url)
  }

  #[test]
  fn test_put_and_lookup() {
    let storage = SqliteCacheStorage::open_in_memory().unwrap();
    let mut response = Response::new(200, "body{}");
    response
      .headers
      .push(("content-type".to_string(), "text/css".to_string()));

    storage.put("b1", &key("styles.css"), &response).unwrap();

    let hit = storage.lookup("b1", &key("styles.css")).unwrap().unwrap();
    assert_eq!(hit.response, response);
    assert!(storage.lookup("b2", &key("styles.css")).unwrap().is_none());
    assert!(storage.lookup("b1", &key("app.js")).unwrap().is_none());
    assert_eq!(storage.bucket_names().unwrap(), vec!["b1".to_string()]);
  }

  #[test]
  fn test_delete_bucket_drops_entries() {
    let storage = SqliteCacheStorage::open_in_memory().unwrap();
    storage.open_bucket("old").unwrap();
    storage.open_bucket("new").unwrap();
    storage
      .put("old", &key("app.js"), &Response::new(200, "old"))
      .unwrap();

    assert!(storage.delete_bucket("old").unwrap());
    assert!(!storage.delete_bucket("old").unwrap());
    assert_eq!(storage.bucket_names().unwrap(), vec!["new".to_string()]);
    assert!(storage.lookup("old", &key("app.js")).unwrap().is_none());
  }

  #[test]
  fn test_put_all_writes_every_entry() {
    let storage = SqliteCacheStorage::open_in_memory().unwrap();
    let entries = vec![
      (key("a"), Response::new(200, "a")),
      (key("b"), Response::new(200, "b")),
    ];
    storage.put_all("v1", &entries).unwrap();

    assert_eq!(
      storage.lookup("v1", &key("b")).unwrap().unwrap().response.body,
      b"b".to_vec()
    );
  }

  #[test]
  fn test_put_all_creates_bucket_even_when_empty() {
    let storage = SqliteCacheStorage::open_in_memory().unwrap();
    storage.put_all("v1", &[]).unwrap();
    assert_eq!(storage.bucket_names().unwrap(), vec!["v1".to_string()]);
  }

  #[test]
  fn test_activation_marker() {
    let storage = SqliteCacheStorage::open_in_memory().unwrap();
    assert!(!storage.is_activated("v1").unwrap());
    assert!(storage.mark_activated("v1").is_err());

    storage.open_bucket("v1").unwrap();
    assert!(!storage.is_activated("v1").unwrap());
    storage.mark_activated("v1").unwrap();
    assert!(storage.is_activated("v1").unwrap());

    storage.delete_bucket("v1").unwrap();
    assert!(!storage.is_activated("v1").unwrap());
  }

  #[test]
  fn test_adds_marker_column_to_older_caches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.sqlite");
    {
      let conn = Connection::open(&path).unwrap();
      conn
        .execute_batch(
          "CREATE TABLE cache_buckets (
             name TEXT PRIMARY KEY,
             created_at TEXT NOT NULL DEFAULT (datetime('now'))
           );
           INSERT INTO cache_buckets (name) VALUES ('v1');",
        )
        .unwrap();
    }

    let storage = SqliteCacheStorage::open(&path).unwrap();
    assert_eq!(storage.bucket_names().unwrap(), vec!["v1".to_string()]);
    assert!(!storage.is_activated("v1").unwrap());
    storage.mark_activated("v1").unwrap();
    assert!(storage.is_activated("v1").unwrap());
  }

  #[test]
  fn test_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.sqlite");
    {
      let storage = SqliteCacheStorage::open(&path).unwrap();
      storage
        .put("v1", &key("index.html"), &Response::new(200, "<html>"))
        .unwrap();
    }

    let storage = SqliteCacheStorage::open(&path).unwrap();
    assert!(storage.lookup("v1", &key("index.html")).unwrap().is_some());
  }
}
