//! Asynchronous record store over the versioned SQLite database.
//!
//! A `Store` owns one lazily opened connection. The first operation opens
//! (and if needed upgrades) the database; every later call reuses it.
//! Blocking SQLite work runs on tokio's blocking pool.

mod record;

pub use record::Record;

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::StoreError;
use crate::shopping::ListItem;

pub struct Store {
  path: PathBuf,
  db: OnceCell<Arc<Database>>,
}

impl Store {
  /// Create a store backed by the database file at `path`.
  ///
  /// Nothing is opened until the first operation.
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      db: OnceCell::new(),
    }
  }

  /// Open the database, creating or upgrading it on first use.
  ///
  /// Safe to call repeatedly; only the first call touches the disk.
  pub async fn open(&self) -> Result<Arc<Database>, StoreError> {
    let db = self
      .db
      .get_or_try_init(|| async {
        let path = self.path.clone();
        let db = tokio::task::spawn_blocking(move || Database::open(&path))
          .await
          .map_err(|e| StoreError::Worker(e.to_string()))??;
        info!(path = %self.path.display(), "opened store");
        Ok::<_, StoreError>(Arc::new(db))
      })
      .await?;
    Ok(Arc::clone(db))
  }

  /// Run a blocking operation against the shared connection.
  async fn run<R, F>(&self, op: F) -> Result<R, StoreError>
  where
    R: Send + 'static,
    F: FnOnce(&Database) -> Result<R, StoreError> + Send + 'static,
  {
    let db = self.open().await?;
    tokio::task::spawn_blocking(move || op(db.as_ref()))
      .await
      .map_err(|e| StoreError::Worker(e.to_string()))?
  }

  /// On-disk schema version.
  pub async fn schema_version(&self) -> Result<u32, StoreError> {
    self.run(|db| db.schema_version()).await
  }

  /// Every record of `T`'s collection. Order is unspecified; callers sort.
  pub async fn get_all<T: Record>(&self) -> Result<Vec<T>, StoreError> {
    let docs = self.run(|db| db.get_all(T::COLLECTION)).await?;
    docs
      .iter()
      .map(|doc| serde_json::from_str(doc).map_err(StoreError::from))
      .collect()
  }

  /// The record stored under `key`, if any.
  pub async fn get<T: Record>(&self, key: &str) -> Result<Option<T>, StoreError> {
    let key = key.to_string();
    let doc = self.run(move |db| db.get(T::COLLECTION, &key)).await?;
    doc
      .map(|doc| serde_json::from_str(&doc).map_err(StoreError::from))
      .transpose()
  }

  /// Insert `record`, replacing whatever was stored under its key.
  pub async fn put<T: Record>(&self, record: &T) -> Result<(), StoreError> {
    let key = record.key().to_string();
    let data = serde_json::to_string(record)?;
    debug!(collection = T::COLLECTION.table(), key = %key, "put");
    self
      .run(move |db| db.put(T::COLLECTION, &key, &data))
      .await
  }

  /// Remove the record stored under `key`. Missing keys are not an error.
  pub async fn delete<T: Record>(&self, key: &str) -> Result<(), StoreError> {
    let key = key.to_string();
    self.run(move |db| db.delete(T::COLLECTION, &key)).await
  }

  /// Number of items belonging to `list_id`, found by scanning every item.
  pub async fn count_by_foreign_key(&self, list_id: &str) -> Result<usize, StoreError> {
    let items = self.get_all::<ListItem>().await?;
    Ok(
      items
        .iter()
        .filter(|item| item.list_id.as_deref() == Some(list_id))
        .count(),
    )
  }

  /// Delete a list together with its items, atomically.
  pub async fn delete_list_cascade(&self, list_id: &str) -> Result<usize, StoreError> {
    let list_id = list_id.to_string();
    self
      .run(move |db| db.delete_list_cascade(&list_id))
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Collection;
  use crate::shopping::{ListGroup, Quantity};

  fn item(id: &str, list_id: &str, text: &str) -> ListItem {
    ListItem {
      id: id.to_string(),
      list_id: Some(list_id.to_string()),
      text: text.to_string(),
      done: false,
      qty: None,
      unit: None,
    }
  }

  fn temp_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path().join("spesa.sqlite"));
    (dir, store)
  }

  #[tokio::test]
  async fn test_open_is_idempotent() {
    let (_dir, store) = temp_store();
    let first = store.open().await.unwrap();
    let second = store.open().await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(store.schema_version().await.unwrap(), 2);
  }

  #[tokio::test]
  async fn test_put_then_get_all_round_trips() {
    let (_dir, store) = temp_store();
    let mut milk = item("m", "g", "Milk");
    milk.qty = Some(Quantity::parse("1,5").unwrap());
    milk.unit = Some("L".to_string());
    store.put(&milk).await.unwrap();

    let all = store.get_all::<ListItem>().await.unwrap();
    assert_eq!(all, vec![milk.clone()]);
    assert_eq!(store.get::<ListItem>("m").await.unwrap(), Some(milk));
  }

  #[tokio::test]
  async fn test_put_is_upsert() {
    let (_dir, store) = temp_store();
    let mut milk = item("m", "g", "Milk");
    store.put(&milk).await.unwrap();
    milk.done = true;
    store.put(&milk).await.unwrap();

    let all = store.get_all::<ListItem>().await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].done);
  }

  #[tokio::test]
  async fn test_get_all_on_empty_collection() {
    let (_dir, store) = temp_store();
    assert!(store.get_all::<ListGroup>().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_delete_absent_key_does_not_fail() {
    let (_dir, store) = temp_store();
    store.delete::<ListItem>("missing").await.unwrap();
    store.delete::<ListGroup>("missing").await.unwrap();
  }

  #[tokio::test]
  async fn test_count_by_foreign_key() {
    let (_dir, store) = temp_store();
    store.put(&item("1", "a", "x")).await.unwrap();
    store.put(&item("2", "a", "y")).await.unwrap();
    store.put(&item("3", "b", "z")).await.unwrap();

    assert_eq!(store.count_by_foreign_key("a").await.unwrap(), 2);
    assert_eq!(store.count_by_foreign_key("b").await.unwrap(), 1);
    assert_eq!(store.count_by_foreign_key("c").await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_upgrade_preserves_v1_items() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spesa.sqlite");
    let legacy = r#"{"id":"old","text":"Pane","done":true,"qty":"2"}"#;
    {
      let v1 = Database::open_at(&path, 1).unwrap();
      v1.put(Collection::Todos, "old", legacy).unwrap();
    }

    let store = Store::new(&path);
    assert_eq!(store.schema_version().await.unwrap(), 2);
    assert!(store.get_all::<ListGroup>().await.unwrap().is_empty());

    let db = store.open().await.unwrap();
    assert_eq!(
      db.get(Collection::Todos, "old").unwrap().as_deref(),
      Some(legacy)
    );
    let items = store.get_all::<ListItem>().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].list_id, None);
    assert_eq!(items[0].text, "Pane");
  }

  #[tokio::test]
  async fn test_open_failure_is_connection_error() {
    let dir = tempfile::tempdir().unwrap();
    // A directory cannot be opened as a database file
    let store = Store::new(dir.path());
    let err = store.get_all::<ListItem>().await.err().unwrap();
    assert!(matches!(err, StoreError::Connection { .. }));
  }
}
