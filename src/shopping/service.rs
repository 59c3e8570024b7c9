//! Queries and updates over lists and items.
//!
//! UI state is the explicit [`ShoppingState`] value: every function that can
//! change persisted data re-reads the store and hands back a fresh state, so
//! callers never keep a stale copy around.

use tracing::{debug, info};

use super::model::{ListGroup, ListItem, NewItem, DEFAULT_LIST_NAME};
use crate::error::ShoppingError;
use crate::store::Store;

/// Selected list plus the lists known at the last read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShoppingState {
  pub current_list_id: String,
  /// Ordered by creation time
  pub lists: Vec<ListGroup>,
}

impl ShoppingState {
  pub fn current_list(&self) -> Option<&ListGroup> {
    self.find_list(&self.current_list_id)
  }

  pub fn find_list(&self, id: &str) -> Option<&ListGroup> {
    self.lists.iter().find(|l| l.id == id)
  }

  /// The oldest list, which adopts items written before lists existed.
  fn oldest_list_id(&self) -> Option<&str> {
    self.lists.first().map(|l| l.id.as_str())
  }
}

/// A list together with how many items it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSummary {
  pub list: ListGroup,
  pub item_count: usize,
}

/// Load lists, creating the default one if the store has none.
///
/// `preferred` selects the current list when it still exists; otherwise the
/// oldest list is selected. Items stored without a list are moved onto the
/// oldest list, so every item belongs to exactly one list afterwards.
pub async fn init(store: &Store, preferred: Option<&str>) -> Result<ShoppingState, ShoppingError> {
  let mut lists = load_lists(store).await?;

  if lists.is_empty() {
    let main = ListGroup::new(DEFAULT_LIST_NAME)?;
    store.put(&main).await?;
    info!(id = %main.id, "created default list");
    lists.push(main);
  }

  let current_list_id = preferred
    .filter(|id| lists.iter().any(|l| l.id == *id))
    .map(String::from)
    .unwrap_or_else(|| lists[0].id.clone());

  let state = ShoppingState {
    current_list_id,
    lists,
  };
  if let Some(oldest) = state.oldest_list_id() {
    adopt_orphans(store, oldest).await?;
  }
  Ok(state)
}

/// Assign items that have no `listId` to `list_id`.
async fn adopt_orphans(store: &Store, list_id: &str) -> Result<(), ShoppingError> {
  let orphans: Vec<ListItem> = store
    .get_all::<ListItem>()
    .await?
    .into_iter()
    .filter(|item| item.list_id.is_none())
    .collect();
  if orphans.is_empty() {
    return Ok(());
  }

  for mut item in orphans.iter().cloned() {
    item.list_id = Some(list_id.to_string());
    store.put(&item).await?;
  }
  info!(list = list_id, items = orphans.len(), "adopted items without a list");
  Ok(())
}

/// Re-read the store, keeping the current selection when possible.
pub async fn refresh(store: &Store, state: ShoppingState) -> Result<ShoppingState, ShoppingError> {
  init(store, Some(state.current_list_id.as_str())).await
}

/// Make `list_id` the current list.
pub async fn select_list(
  store: &Store,
  state: ShoppingState,
  list_id: &str,
) -> Result<ShoppingState, ShoppingError> {
  let state = refresh(store, state).await?;
  if state.find_list(list_id).is_none() {
    return Err(ShoppingError::UnknownList(list_id.to_string()));
  }
  Ok(ShoppingState {
    current_list_id: list_id.to_string(),
    ..state
  })
}

/// Every list with its item count.
pub async fn summaries(store: &Store, state: &ShoppingState) -> Result<Vec<ListSummary>, ShoppingError> {
  let mut out = Vec::with_capacity(state.lists.len());
  for list in &state.lists {
    let item_count = store.count_by_foreign_key(&list.id).await?;
    out.push(ListSummary {
      list: list.clone(),
      item_count,
    });
  }
  Ok(out)
}

/// Items of `list_id`, open ones first.
pub async fn items(store: &Store, list_id: &str) -> Result<Vec<ListItem>, ShoppingError> {
  let mut items: Vec<ListItem> = store
    .get_all::<ListItem>()
    .await?
    .into_iter()
    .filter(|item| item.list_id.as_deref() == Some(list_id))
    .collect();

  // Stable sort keeps store order inside each group
  items.sort_by_key(|item| item.done);
  Ok(items)
}

/// Validate and store a new item on `list_id`.
pub async fn add_item(store: &Store, list_id: &str, new: NewItem) -> Result<ListItem, ShoppingError> {
  if store.get::<ListGroup>(list_id).await?.is_none() {
    return Err(ShoppingError::UnknownList(list_id.to_string()));
  }

  let item = new.into_item(list_id)?;
  store.put(&item).await?;
  debug!(id = %item.id, list = list_id, "added item");
  Ok(item)
}

/// Flip the done flag of an item.
pub async fn toggle_item(store: &Store, item_id: &str) -> Result<ListItem, ShoppingError> {
  let mut item = store
    .get::<ListItem>(item_id)
    .await?
    .ok_or_else(|| ShoppingError::UnknownItem(item_id.to_string()))?;

  item.done = !item.done;
  store.put(&item).await?;
  Ok(item)
}

/// Remove one item. Unknown ids are ignored.
pub async fn delete_item(store: &Store, item_id: &str) -> Result<(), ShoppingError> {
  store.delete::<ListItem>(item_id).await?;
  Ok(())
}

/// Create a list and select it.
pub async fn create_list(
  store: &Store,
  state: ShoppingState,
  name: &str,
) -> Result<ShoppingState, ShoppingError> {
  let state = refresh(store, state).await?;
  let mut list = ListGroup::new(name)?;
  list.created_at = next_created_at(&state, list.created_at);
  store.put(&list).await?;
  info!(id = %list.id, name = %list.name, "created list");

  let state = refresh(store, state).await?;
  Ok(ShoppingState {
    current_list_id: list.id,
    ..state
  })
}

/// Give a list a new name. Names need not be unique.
pub async fn rename_list(
  store: &Store,
  state: ShoppingState,
  list_id: &str,
  name: &str,
) -> Result<ShoppingState, ShoppingError> {
  let mut list = store
    .get::<ListGroup>(list_id)
    .await?
    .ok_or_else(|| ShoppingError::UnknownList(list_id.to_string()))?;

  list.rename(name)?;
  store.put(&list).await?;

  refresh(store, state).await
}

/// Delete a list and all of its items.
///
/// If it was the last list a fresh default list takes its place.
pub async fn delete_list(
  store: &Store,
  state: ShoppingState,
  list_id: &str,
) -> Result<ShoppingState, ShoppingError> {
  if store.get::<ListGroup>(list_id).await?.is_none() {
    return Err(ShoppingError::UnknownList(list_id.to_string()));
  }

  let removed = store.delete_list_cascade(list_id).await?;
  info!(id = list_id, items = removed, "deleted list");

  refresh(store, state).await
}

/// Copy a list and its items into a new list, which becomes current.
///
/// Copied items get new ids and start out not done.
pub async fn duplicate_list(
  store: &Store,
  state: ShoppingState,
  list_id: &str,
) -> Result<ShoppingState, ShoppingError> {
  let state = refresh(store, state).await?;
  let source = state
    .find_list(list_id)
    .cloned()
    .ok_or_else(|| ShoppingError::UnknownList(list_id.to_string()))?;

  let mut copy = ListGroup::new(&format!("{} (copy)", source.name))?;
  copy.created_at = next_created_at(&state, copy.created_at);
  store.put(&copy).await?;

  let originals = items(store, &source.id).await?;
  for item in &originals {
    store.put(&item.duplicate_into(&copy.id)).await?;
  }
  info!(from = %source.id, to = %copy.id, items = originals.len(), "duplicated list");

  let state = refresh(store, state).await?;
  Ok(ShoppingState {
    current_list_id: copy.id,
    ..state
  })
}

/// Creation stamp that sorts after every known list.
fn next_created_at(state: &ShoppingState, now: i64) -> i64 {
  state
    .lists
    .last()
    .map_or(now, |newest| now.max(newest.created_at + 1))
}

async fn load_lists(store: &Store) -> Result<Vec<ListGroup>, ShoppingError> {
  let mut lists = store.get_all::<ListGroup>().await?;
  lists.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
  Ok(lists)
}
