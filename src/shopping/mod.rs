//! Shopping lists and their items, on top of the record store.

mod model;
mod service;

pub use model::{ListGroup, ListItem, NewItem, Quantity, DEFAULT_LIST_NAME};
pub use service::{
  add_item, create_list, delete_item, delete_list, duplicate_list, init, items, refresh,
  rename_list, select_list, summaries, toggle_item, ListSummary, ShoppingState,
};
