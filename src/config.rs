use crate::core::{DbError, Result};
use std::str::FromStr;

pub const ENV_TRANSFORM_CONCURRENCY: &str = "LINKMEMODB_TRANSFORM_CONCURRENCY";
pub const ENV_MAX_BATCH_SIZE: &str = "LINKMEMODB_MAX_BATCH_SIZE";
pub const ENV_EMIT_CHANGES: &str = "LINKMEMODB_EMIT_CHANGES";

/// Update engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Per-record futures in flight during one fan-out stage
    pub transform_concurrency: usize,

    /// Largest accepted batch; `None` is unbounded
    pub max_batch_size: Option<usize>,

    /// Broadcast a change event after each commit
    pub emit_changes: bool,

    /// Buffer of the change broadcast channel
    pub change_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transform_concurrency: 16,
            max_batch_size: None,
            emit_changes: true,
            change_channel_capacity: 64,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set fan-out concurrency (at least 1)
    pub fn transform_concurrency(mut self, concurrency: usize) -> Self {
        self.transform_concurrency = concurrency.max(1);
        self
    }

    /// Set maximum batch size
    pub fn max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = Some(max);
        self
    }

    /// Enable or disable change events
    pub fn emit_changes(mut self, emit: bool) -> Self {
        self.emit_changes = emit;
        self
    }

    /// Set change channel capacity
    pub fn change_channel_capacity(mut self, capacity: usize) -> Self {
        self.change_channel_capacity = capacity.max(1);
        self
    }

    /// Defaults overridden by `LINKMEMODB_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_TRANSFORM_CONCURRENCY) {
            config = config.transform_concurrency(parse(ENV_TRANSFORM_CONCURRENCY, &raw)?);
        }
        if let Some(raw) = lookup(ENV_MAX_BATCH_SIZE) {
            config = config.max_batch_size(parse(ENV_MAX_BATCH_SIZE, &raw)?);
        }
        if let Some(raw) = lookup(ENV_EMIT_CHANGES) {
            config = config.emit_changes(parse(ENV_EMIT_CHANGES, &raw)?);
        }
        Ok(config)
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| DbError::BadRequest(format!("invalid value '{}' for {}", raw, key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .transform_concurrency(0)
            .max_batch_size(10)
            .emit_changes(false);
        assert_eq!(config.transform_concurrency, 1);
        assert_eq!(config.max_batch_size, Some(10));
        assert!(!config.emit_changes);
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_TRANSFORM_CONCURRENCY, "4"),
            (ENV_EMIT_CHANGES, "false"),
        ]);
        let config = EngineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.transform_concurrency, 4);
        assert_eq!(config.max_batch_size, None);
        assert!(!config.emit_changes);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = EngineConfig::from_lookup(|key| {
            (key == ENV_MAX_BATCH_SIZE).then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, DbError::BadRequest(_)));
    }
}
