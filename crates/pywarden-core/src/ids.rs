use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RuntimeError;

const MAX_CONSUMER_ID_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a logical consumer with its own isolated dependency directory.
///
/// The value is used verbatim as a directory name, so anything that could
/// escape the isolated root is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConsumerId(String);

impl ConsumerId {
    pub fn new(value: impl Into<String>) -> Result<Self, RuntimeError> {
        let value = value.into();
        if value.is_empty() {
            return Err(RuntimeError::InvalidConsumer("empty id".to_string()));
        }
        if value.len() > MAX_CONSUMER_ID_LEN {
            return Err(RuntimeError::InvalidConsumer(format!(
                "id longer than {MAX_CONSUMER_ID_LEN} bytes"
            )));
        }
        if value == "." || value == ".." {
            return Err(RuntimeError::InvalidConsumer(value));
        }
        if let Some(bad) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@')))
        {
            return Err(RuntimeError::InvalidConsumer(format!(
                "{value} (unexpected character {bad:?})"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConsumerId {
    type Err = RuntimeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl TryFrom<String> for ConsumerId {
    type Error = RuntimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ConsumerId> for String {
    fn from(value: ConsumerId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plugin_style_ids() {
        for id in ["com.example.tool", "image_resizer", "tool-1", "dev@local"] {
            assert_eq!(ConsumerId::new(id).unwrap().as_str(), id);
        }
    }

    #[test]
    fn rejects_ids_that_escape_the_root() {
        for id in ["", ".", "..", "../etc", "a/b", "a\\b", "name with space"] {
            assert!(ConsumerId::new(id).is_err(), "{id:?} should be rejected");
        }
    }

    #[test]
    fn rejects_overlong_ids() {
        assert!(ConsumerId::new("a".repeat(MAX_CONSUMER_ID_LEN + 1)).is_err());
    }

    #[test]
    fn deserialization_validates() {
        let ok: ConsumerId = serde_json::from_str("\"tool-a\"").unwrap();
        assert_eq!(ok.as_str(), "tool-a");
        assert!(serde_json::from_str::<ConsumerId>("\"../x\"").is_err());
    }
}
