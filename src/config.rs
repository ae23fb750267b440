//! Client configuration.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How tag lists merge when both writers changed them concurrently.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagMergePolicy {
    /// Server tags, plus the caller's additions, minus the caller's removals.
    /// Tags never count as an overlapping field.
    #[default]
    ThreeWay,
    /// Tags behave like any scalar field: whole-list last-write-wins.
    Replace,
}

/// Sync client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Bound for every remote call, in milliseconds.
    /// Default: 10_000
    pub request_timeout_ms: u64,

    /// Show local edits through the store before the server confirms them.
    /// Default: true
    pub provisional_edits: bool,

    /// Merge behaviour for tag lists during field-level merge.
    pub tag_merge: TagMergePolicy,

    /// Page size used when a view does not pick one.
    /// Default: 20
    pub default_page_size: u32,

    /// Largest page a view may request.
    /// Default: 100
    pub max_page_size: u32,

    /// Max buffered feed events per subscription before the server drops it.
    /// Default: 1000
    pub feed_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            provisional_edits: true,
            tag_merge: TagMergePolicy::default(),
            default_page_size: 20,
            max_page_size: 100,
            feed_buffer_size: 1000,
        }
    }
}

impl ClientConfig {
    /// Parse from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(SyncError::Validation(
                "request_timeout_ms must be positive".into(),
            ));
        }
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(SyncError::Validation("page sizes must be positive".into()));
        }
        if self.default_page_size > self.max_page_size {
            return Err(SyncError::Validation(format!(
                "default_page_size {} exceeds max_page_size {}",
                self.default_page_size, self.max_page_size
            )));
        }
        if self.feed_buffer_size == 0 {
            return Err(SyncError::Validation(
                "feed_buffer_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ClientConfig::from_json(r#"{"request_timeout_ms": 250, "tag_merge": "replace"}"#)
            .unwrap();
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.tag_merge, TagMergePolicy::Replace);
        assert_eq!(config.default_page_size, 20);
        assert!(config.provisional_edits);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(ClientConfig::from_json(r#"{"request_timeout_ms": 0}"#).is_err());
        assert!(ClientConfig::from_json(r#"{"default_page_size": 500}"#).is_err());
        assert!(ClientConfig::from_json("not json").is_err());
    }
}
