//! Typed table configuration, parsed out of
//! `Metadata.configuration`. Unknown `delta.*` keys are rejected rather than silently ignored --
//! a typo in a property name should surface immediately, not change behavior silently.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{DeltaResult, Error};

const KEY_LOG_RETENTION: &str = "delta.logRetentionDuration";
const KEY_CHECKPOINT_INTERVAL: &str = "delta.checkpointInterval";
const KEY_APPEND_ONLY: &str = "delta.appendOnly";
const KEY_RANDOM_PREFIX_LENGTH: &str = "delta.randomPrefixLength";
const KEY_STATS_SKIPPING: &str = "delta.stats.skipping";
const KEY_MERGE_REPARTITION: &str = "merge.repartitionBeforeWrite.enabled";
const KEY_MERGE_INSERT_ONLY: &str = "merge.insertOnly.enabled";
const KEY_MERGE_MATCHED_ONLY: &str = "merge.matchedOnly.enabled";
const KEY_AUTO_MERGE_SCHEMA: &str = "autoMerge.schema";

const KNOWN_KEYS: &[&str] = &[
    KEY_LOG_RETENTION,
    KEY_CHECKPOINT_INTERVAL,
    KEY_APPEND_ONLY,
    KEY_RANDOM_PREFIX_LENGTH,
    KEY_STATS_SKIPPING,
    KEY_MERGE_REPARTITION,
    KEY_MERGE_INSERT_ONLY,
    KEY_MERGE_MATCHED_ONLY,
    KEY_AUTO_MERGE_SCHEMA,
];

#[derive(Debug, Clone, PartialEq)]
pub struct TableConfig {
    pub log_retention: Duration,
    pub checkpoint_interval: u64,
    pub append_only: bool,
    pub random_prefix_length: Option<u32>,
    pub stats_skipping: bool,
    pub merge_repartition_before_write: bool,
    pub merge_insert_only: bool,
    pub merge_matched_only: bool,
    pub auto_merge_schema: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            log_retention: Duration::from_secs(7 * 24 * 3600),
            checkpoint_interval: crate::checkpoint::DEFAULT_CHECKPOINT_INTERVAL,
            append_only: false,
            random_prefix_length: None,
            stats_skipping: true,
            merge_repartition_before_write: true,
            merge_insert_only: true,
            merge_matched_only: true,
            auto_merge_schema: false,
        }
    }
}

impl TableConfig {
    pub fn parse(configuration: &HashMap<String, String>) -> DeltaResult<Self> {
        for key in configuration.keys() {
            if key.starts_with("delta.") && !KNOWN_KEYS.contains(&key.as_str()) {
                return Err(Error::UnknownTableProperty(key.clone()));
            }
        }

        let mut config = TableConfig::default();

        if let Some(v) = configuration.get(KEY_LOG_RETENTION) {
            config.log_retention = parse_interval(KEY_LOG_RETENTION, v)?;
        }
        if let Some(v) = configuration.get(KEY_CHECKPOINT_INTERVAL) {
            config.checkpoint_interval = parse_u64(KEY_CHECKPOINT_INTERVAL, v)?;
        }
        if let Some(v) = configuration.get(KEY_APPEND_ONLY) {
            config.append_only = parse_bool(KEY_APPEND_ONLY, v)?;
        }
        if let Some(v) = configuration.get(KEY_RANDOM_PREFIX_LENGTH) {
            config.random_prefix_length = Some(parse_u32(KEY_RANDOM_PREFIX_LENGTH, v)?);
        }
        if let Some(v) = configuration.get(KEY_STATS_SKIPPING) {
            config.stats_skipping = parse_bool(KEY_STATS_SKIPPING, v)?;
        }
        if let Some(v) = configuration.get(KEY_MERGE_REPARTITION) {
            config.merge_repartition_before_write = parse_bool(KEY_MERGE_REPARTITION, v)?;
        }
        if let Some(v) = configuration.get(KEY_MERGE_INSERT_ONLY) {
            config.merge_insert_only = parse_bool(KEY_MERGE_INSERT_ONLY, v)?;
        }
        if let Some(v) = configuration.get(KEY_MERGE_MATCHED_ONLY) {
            config.merge_matched_only = parse_bool(KEY_MERGE_MATCHED_ONLY, v)?;
        }
        if let Some(v) = configuration.get(KEY_AUTO_MERGE_SCHEMA) {
            config.auto_merge_schema = parse_bool(KEY_AUTO_MERGE_SCHEMA, v)?;
        }

        Ok(config)
    }
}

fn parse_bool(key: &str, value: &str) -> DeltaResult<bool> {
    value.parse().map_err(|_| invalid(key, value))
}

fn parse_u64(key: &str, value: &str) -> DeltaResult<u64> {
    value.parse().map_err(|_| invalid(key, value))
}

fn parse_u32(key: &str, value: &str) -> DeltaResult<u32> {
    value.parse().map_err(|_| invalid(key, value))
}

/// `delta.logRetentionDuration` uses an `interval <n> days|hours` shape in real Delta tables; we
/// accept that plus a bare integer number of seconds for convenience in tests.
fn parse_interval(key: &str, value: &str) -> DeltaResult<Duration> {
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let parts: Vec<&str> = value.trim().split_whitespace().collect();
    let [prefix, amount, unit] = parts[..] else {
        return Err(invalid(key, value));
    };
    if prefix != "interval" {
        return Err(invalid(key, value));
    }
    let amount: u64 = amount.parse().map_err(|_| invalid(key, value))?;
    let secs = match unit {
        "second" | "seconds" => amount,
        "minute" | "minutes" => amount * 60,
        "hour" | "hours" => amount * 3600,
        "day" | "days" => amount * 86400,
        _ => return Err(invalid(key, value)),
    };
    Ok(Duration::from_secs(secs))
}

fn invalid(key: &str, value: &str) -> Error {
    Error::InvalidPropertyValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_configuration_empty() {
        let config = TableConfig::parse(&HashMap::new()).unwrap();
        assert_eq!(config, TableConfig::default());
    }

    #[test]
    fn unknown_delta_key_is_rejected() {
        let mut configuration = HashMap::new();
        configuration.insert("delta.bogusProperty".to_string(), "true".to_string());
        assert!(matches!(
            TableConfig::parse(&configuration),
            Err(Error::UnknownTableProperty(_))
        ));
    }

    #[test]
    fn parses_interval_and_bool_properties() {
        let mut configuration = HashMap::new();
        configuration.insert(KEY_LOG_RETENTION.to_string(), "interval 30 days".to_string());
        configuration.insert(KEY_APPEND_ONLY.to_string(), "true".to_string());
        let config = TableConfig::parse(&configuration).unwrap();
        assert_eq!(config.log_retention, Duration::from_secs(30 * 86400));
        assert!(config.append_only);
    }

    #[test]
    fn invalid_bool_value_is_rejected() {
        let mut configuration = HashMap::new();
        configuration.insert(KEY_APPEND_ONLY.to_string(), "yes please".to_string());
        assert!(matches!(
            TableConfig::parse(&configuration),
            Err(Error::InvalidPropertyValue { .. })
        ));
    }
}
