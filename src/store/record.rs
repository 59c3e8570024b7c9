//! Core trait for values kept in the record store.

use serde::{de::DeserializeOwned, Serialize};

use crate::db::Collection;

/// A value stored as a JSON document in one of the store's collections.
///
/// Implementors provide the primary key and name the collection they live in.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Collection holding records of this type
  const COLLECTION: Collection;

  /// Primary key, unique within the collection
  fn key(&self) -> &str;
}
