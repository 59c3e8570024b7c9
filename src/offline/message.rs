//! Control messages pages post to the offline controller.

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Messages a page can post to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Activate a waiting worker right away
  SkipWaiting,
}

impl ControlMessage {
  /// Parse a JSON message such as `{"type":"SKIP_WAITING"}`.
  pub fn parse(raw: &str) -> Result<Self, CacheError> {
    Ok(serde_json::from_str(raw)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_skip_waiting() {
    assert_eq!(
      ControlMessage::parse(r#"{"type":"SKIP_WAITING"}"#).unwrap(),
      ControlMessage::SkipWaiting
    );
  }

  #[test]
  fn test_unknown_message_rejected() {
    assert!(matches!(
      ControlMessage::parse(r#"{"type":"RELOAD"}"#),
      Err(CacheError::Message(_))
    ));
    assert!(ControlMessage::parse("SKIP_WAITING").is_err());
  }
}
