use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::Collection;
use crate::error::ShoppingError;
use crate::store::Record;

/// Name given to the list created when none exists.
pub const DEFAULT_LIST_NAME: &str = "Main list";

/// Most digits a quantity may carry.
const MAX_QTY_DIGITS: usize = 10;

/// A named shopping list grouping items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListGroup {
  pub id: String,
  pub name: String,
  /// Epoch milliseconds, used only for stable ordering
  pub created_at: i64,
}

impl ListGroup {
  pub fn new(name: &str) -> Result<Self, ShoppingError> {
    Ok(Self {
      id: new_id(),
      name: non_empty(name, "list name")?,
      created_at: Utc::now().timestamp_millis(),
    })
  }

  pub fn rename(&mut self, name: &str) -> Result<(), ShoppingError> {
    self.name = non_empty(name, "list name")?;
    Ok(())
  }
}

/// One entry on a shopping list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItem {
  pub id: String,
  /// Owning list. Absent only on records from before lists existed.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub list_id: Option<String>,
  pub text: String,
  #[serde(default)]
  pub done: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub qty: Option<Quantity>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub unit: Option<String>,
}

impl ListItem {
  /// Copy of this item under `list_id`, with a fresh id and not done.
  pub fn duplicate_into(&self, list_id: &str) -> Self {
    Self {
      id: new_id(),
      list_id: Some(list_id.to_string()),
      text: self.text.clone(),
      done: false,
      qty: self.qty.clone(),
      unit: self.unit.clone(),
    }
  }
}

impl Record for ListGroup {
  const COLLECTION: Collection = Collection::Lists;

  fn key(&self) -> &str {
    &self.id
  }
}

impl Record for ListItem {
  const COLLECTION: Collection = Collection::Todos;

  fn key(&self) -> &str {
    &self.id
  }
}

/// User input for a new item, before validation.
#[derive(Debug, Clone, Default)]
pub struct NewItem {
  pub text: String,
  pub qty: Option<String>,
  pub unit: Option<String>,
}

impl NewItem {
  pub fn new(text: impl Into<String>) -> Self {
    Self {
      text: text.into(),
      ..Self::default()
    }
  }

  pub fn with_qty(mut self, qty: impl Into<String>) -> Self {
    self.qty = Some(qty.into());
    self
  }

  pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
    self.unit = Some(unit.into());
    self
  }

  /// Validate into an item owned by `list_id`.
  pub fn into_item(self, list_id: &str) -> Result<ListItem, ShoppingError> {
    let qty = match self.qty.as_deref().map(str::trim) {
      Some(q) if !q.is_empty() => Some(Quantity::parse(q)?),
      _ => None,
    };
    let unit = self
      .unit
      .map(|u| u.trim().to_string())
      .filter(|u| !u.is_empty());

    Ok(ListItem {
      id: new_id(),
      list_id: Some(list_id.to_string()),
      text: non_empty(&self.text, "item text")?,
      done: false,
      qty,
      unit,
    })
  }
}

/// Numeric quantity kept as text, with `.` as decimal separator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(String);

impl Quantity {
  /// Parse user input such as `2`, `1,5` or `0.25`.
  pub fn parse(input: &str) -> Result<Self, ShoppingError> {
    let normalized = input.trim().replace(',', ".");
    let invalid = || ShoppingError::InvalidQuantity(input.to_string());

    let (int_part, frac_part) = match normalized.split_once('.') {
      Some((i, f)) => (i, Some(f)),
      None => (normalized.as_str(), None),
    };

    let digits = int_part.len() + frac_part.map_or(0, str::len);
    let all_digits = int_part.chars().all(|c| c.is_ascii_digit())
      && frac_part.map_or(true, |f| f.chars().all(|c| c.is_ascii_digit()));

    if digits == 0 || digits > MAX_QTY_DIGITS || !all_digits || frac_part == Some("") {
      return Err(invalid());
    }

    Ok(Self(normalized))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for Quantity {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

fn new_id() -> String {
  uuid::Uuid::new_v4().to_string()
}

fn non_empty(value: &str, what: &'static str) -> Result<String, ShoppingError> {
  let trimmed = value.trim();
  if trimmed.is_empty() {
    return Err(ShoppingError::Empty(what));
  }
  Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_quantity_normalizes_comma() {
    assert_eq!(Quantity::parse("1,5").unwrap().as_str(), "1.5");
    assert_eq!(Quantity::parse(" 2 ").unwrap().as_str(), "2");
    assert_eq!(Quantity::parse(".5").unwrap().as_str(), ".5");
  }

  #[test]
  fn test_quantity_rejects_garbage() {
    assert!(Quantity::parse("").is_err());
    assert!(Quantity::parse("abc").is_err());
    assert!(Quantity::parse("1.2.3").is_err());
    assert!(Quantity::parse("3.").is_err());
    assert!(Quantity::parse("-1").is_err());
  }

  #[test]
  fn test_quantity_digit_limit() {
    assert!(Quantity::parse("1234567890").is_ok());
    assert!(Quantity::parse("12345.67890").is_ok());
    assert!(Quantity::parse("12345678901").is_err());
  }

  #[test]
  fn test_new_item_trims_and_drops_blanks() {
    let item = NewItem::new("  Milk ")
      .with_qty(" ")
      .with_unit("")
      .into_item("g")
      .unwrap();
    assert_eq!(item.text, "Milk");
    assert_eq!(item.qty, None);
    assert_eq!(item.unit, None);
    assert!(!item.done);
  }

  #[test]
  fn test_new_item_requires_text() {
    let err = NewItem::new("   ").into_item("g").err().unwrap();
    assert!(matches!(err, ShoppingError::Empty(_)));
  }

  #[test]
  fn test_item_json_uses_camel_case_and_omits_empty_fields() {
    let item = NewItem::new("Eggs").into_item("g").unwrap();
    let json = serde_json::to_value(&item).unwrap();
    assert_eq!(json["listId"], "g");
    assert!(json.get("qty").is_none());
    assert!(json.get("unit").is_none());

    let group = ListGroup::new("Weekly").unwrap();
    let json = serde_json::to_value(&group).unwrap();
    assert!(json["createdAt"].is_i64());
  }

  #[test]
  fn test_duplicate_resets_done_and_id() {
    let mut original = NewItem::new("Flour")
      .with_qty("1")
      .with_unit("kg")
      .into_item("a")
      .unwrap();
    original.done = true;

    let copy = original.duplicate_into("b");
    assert_ne!(copy.id, original.id);
    assert_eq!(copy.list_id.as_deref(), Some("b"));
    assert_eq!(copy.text, original.text);
    assert_eq!(copy.qty, original.qty);
    assert_eq!(copy.unit, original.unit);
    assert!(!copy.done);
  }
}
