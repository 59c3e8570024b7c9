pub mod schema;

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;

/// A keyed collection of JSON documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
  /// Shopping list groups
  Lists,
  /// Shopping list items
  Todos,
}

impl Collection {
  pub fn table(self) -> &'static str {
    match self {
      Collection::Lists => "lists",
      Collection::Todos => "todos",
    }
  }
}

/// SQLite connection holding the record collections.
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database at `path`, upgrading it to the current schema.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    Self::open_at(path, schema::SCHEMA_VERSION)
  }

  /// Open a private in-memory database at the current schema.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self, StoreError> {
    let conn = Connection::open_in_memory().map_err(|e| StoreError::Connection {
      path: ":memory:".to_string(),
      reason: e.to_string(),
    })?;
    Self::from_connection(conn, ":memory:", schema::SCHEMA_VERSION)
  }

  /// Open the database and upgrade it to `target`, never past it.
  pub(crate) fn open_at(path: &Path, target: u32) -> Result<Self, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Connection {
          path: path.display().to_string(),
          reason: format!("failed to create directory: {}", e),
        })?;
      }
    }

    let conn = Connection::open(path).map_err(|e| StoreError::Connection {
      path: path.display().to_string(),
      reason: e.to_string(),
    })?;

    Self::from_connection(conn, &path.display().to_string(), target)
  }

  fn from_connection(mut conn: Connection, label: &str, target: u32) -> Result<Self, StoreError> {
    upgrade(&mut conn, target).map_err(|e| match e {
      StoreError::Transaction(e) => StoreError::Connection {
        path: label.to_string(),
        reason: e.to_string(),
      },
      StoreError::Connection { reason, .. } => StoreError::Connection {
        path: label.to_string(),
        reason,
      },
      other => other,
    })?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
    self
      .conn
      .lock()
      .map_err(|e| StoreError::Worker(format!("lock poisoned: {}", e)))
  }

  /// Current on-disk schema version.
  pub fn schema_version(&self) -> Result<u32, StoreError> {
    let conn = self.lock()?;
    Ok(user_version(&conn)?)
  }

  /// Names of the collections present on disk.
  pub fn collections(&self) -> Result<Vec<String>, StoreError> {
    let conn = self.lock()?;
    let mut stmt =
      conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
  }

  /// All documents of a collection, in key order.
  pub fn get_all(&self, collection: Collection) -> Result<Vec<String>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(&format!("SELECT data FROM {} ORDER BY id", collection.table()))?;
    let docs = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(docs)
  }

  /// A single document by key.
  pub fn get(&self, collection: Collection, key: &str) -> Result<Option<String>, StoreError> {
    let conn = self.lock()?;
    let doc = conn
      .query_row(
        &format!("SELECT data FROM {} WHERE id = ?", collection.table()),
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(doc)
  }

  /// Insert or fully replace the document stored under `key`.
  pub fn put(&self, collection: Collection, key: &str, data: &str) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn.execute(
      &format!(
        "INSERT OR REPLACE INTO {} (id, data) VALUES (?, ?)",
        collection.table()
      ),
      params![key, data],
    )?;
    Ok(())
  }

  /// Remove the document stored under `key`, if any.
  pub fn delete(&self, collection: Collection, key: &str) -> Result<(), StoreError> {
    let conn = self.lock()?;
    let removed = conn.execute(
      &format!("DELETE FROM {} WHERE id = ?", collection.table()),
      params![key],
    )?;
    debug!(collection = collection.table(), key, removed, "delete");
    Ok(())
  }

  /// Delete a list and every item pointing at it in one transaction.
  ///
  /// Items are found by scanning `todos`; returns how many were removed.
  pub fn delete_list_cascade(&self, list_id: &str) -> Result<usize, StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    let owned: Vec<String> = {
      let mut stmt = tx.prepare("SELECT id, data FROM todos")?;
      let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
      let mut owned = Vec::new();
      for (id, data) in rows {
        let doc: serde_json::Value = serde_json::from_str(&data)?;
        if doc.get("listId").and_then(|v| v.as_str()) == Some(list_id) {
          owned.push(id);
        }
      }
      owned
    };

    for id in &owned {
      tx.execute("DELETE FROM todos WHERE id = ?", params![id])?;
    }
    tx.execute("DELETE FROM lists WHERE id = ?", params![list_id])?;
    tx.commit()?;

    Ok(owned.len())
  }
}

fn user_version(conn: &Connection) -> rusqlite::Result<u32> {
  conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

/// Bring the schema up to `target`, one additive step at a time.
fn upgrade(conn: &mut Connection, target: u32) -> Result<(), StoreError> {
  let current = user_version(conn)?;

  if current > schema::SCHEMA_VERSION {
    return Err(StoreError::Connection {
      path: String::new(),
      reason: format!(
        "database schema v{} is newer than supported v{}",
        current,
        schema::SCHEMA_VERSION
      ),
    });
  }

  if current >= target {
    return Ok(());
  }

  let tx = conn.transaction()?;
  for version in current..target {
    tx.execute_batch(schema::MIGRATIONS[version as usize])?;
  }
  // PRAGMA does not take bound parameters
  tx.execute_batch(&format!("PRAGMA user_version = {}", target))?;
  tx.commit()?;

  info!(from = current, to = target, "upgraded store schema");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fresh_database_has_both_collections() {
    let db = Database::open_in_memory().unwrap();
    assert_eq!(db.schema_version().unwrap(), schema::SCHEMA_VERSION);
    let names = db.collections().unwrap();
    assert!(names.contains(&"lists".to_string()));
    assert!(names.contains(&"todos".to_string()));
  }

  #[test]
  fn test_put_replaces_existing_document() {
    let db = Database::open_in_memory().unwrap();
    db.put(Collection::Todos, "a", r#"{"id":"a","text":"Milk"}"#)
      .unwrap();
    db.put(Collection::Todos, "a", r#"{"id":"a","text":"Bread"}"#)
      .unwrap();

    let all = db.get_all(Collection::Todos).unwrap();
    assert_eq!(all, vec![r#"{"id":"a","text":"Bread"}"#.to_string()]);
  }

  #[test]
  fn test_delete_missing_key_is_ok() {
    let db = Database::open_in_memory().unwrap();
    assert!(db.delete(Collection::Lists, "nope").is_ok());
  }

  #[test]
  fn test_upgrade_from_v1_keeps_items() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.sqlite");

    {
      let old = Database::open_at(&path, 1).unwrap();
      assert_eq!(old.schema_version().unwrap(), 1);
      assert!(!old.collections().unwrap().contains(&"lists".to_string()));
      old
        .put(Collection::Todos, "x", r#"{"id":"x","text":"Eggs","done":true}"#)
        .unwrap();
    }

    let db = Database::open(&path).unwrap();
    assert_eq!(db.schema_version().unwrap(), 2);
    assert!(db.collections().unwrap().contains(&"lists".to_string()));
    assert_eq!(
      db.get(Collection::Todos, "x").unwrap().as_deref(),
      Some(r#"{"id":"x","text":"Eggs","done":true}"#)
    );
  }

  #[test]
  fn test_newer_schema_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.sqlite");
    {
      let conn = Connection::open(&path).unwrap();
      conn.execute_batch("PRAGMA user_version = 99").unwrap();
    }

    let err = Database::open(&path).err().unwrap();
    assert!(matches!(err, StoreError::Connection { .. }));
  }

  #[test]
  fn test_cascade_removes_only_owned_items() {
    let db = Database::open_in_memory().unwrap();
    db.put(Collection::Lists, "g", r#"{"id":"g","name":"G","createdAt":1}"#)
      .unwrap();
    db.put(Collection::Todos, "1", r#"{"id":"1","listId":"g","text":"a"}"#)
      .unwrap();
    db.put(Collection::Todos, "2", r#"{"id":"2","listId":"g","text":"b"}"#)
      .unwrap();
    db.put(Collection::Todos, "3", r#"{"id":"3","listId":"h","text":"c"}"#)
      .unwrap();

    assert_eq!(db.delete_list_cascade("g").unwrap(), 2);
    assert!(db.get(Collection::Lists, "g").unwrap().is_none());
    assert_eq!(db.get_all(Collection::Todos).unwrap().len(), 1);
  }
}
