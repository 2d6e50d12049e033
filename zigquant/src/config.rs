//! Deserialisable configuration surface (spec §6 "configuration"), a
//! narrowed version of `SystemConfig` in spirit: `deny_unknown_fields`
//! makes an unrecognised option a hard error at start rather than a
//! silently ignored typo.

use serde::{Deserialize, Serialize};
use zigquant_execution::ExecutionConfig;
use zigquant_engine::live::LiveRunnerConfig;

/// Every tunable the core components read at startup, collected into one
/// deserialisable document so a host can load it from a single TOML/JSON
/// file instead of wiring each component's config by hand.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    /// How often `LiveRunner` logs a heartbeat.
    pub heartbeat_interval_ms: u64,
    /// Clock-driven `system.tick` cadence; omit to run purely reactively.
    pub tick_interval_ms: Option<u64>,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub submission_timeout_ms: u64,
    pub query_retry_max: u32,
    /// Directory `FileStateStore` writes checkpoints and the pending-order
    /// event log into.
    pub checkpoint_dir: String,
    /// How often `LiveRunner` checkpoints the cache; omit to checkpoint
    /// only on a graceful `stop()`.
    pub checkpoint_interval_ms: Option<u64>,
    /// How many checkpoint generations `FileStateStore` keeps on disk.
    pub max_checkpoints: usize,
    pub auto_recover: bool,
    pub sync_with_exchange_on_recover: bool,
    pub cancel_orphan_orders: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            tick_interval_ms: None,
            reconnect_base_ms: 200,
            reconnect_max_ms: 5_000,
            submission_timeout_ms: 5_000,
            query_retry_max: 3,
            checkpoint_dir: "./zigquant-state".into(),
            checkpoint_interval_ms: None,
            max_checkpoints: 5,
            auto_recover: true,
            sync_with_exchange_on_recover: true,
            cancel_orphan_orders: true,
        }
    }
}

impl CoreConfig {
    /// Parses a `CoreConfig` from a JSON document, rejecting unknown keys.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            submission_timeout_ms: self.submission_timeout_ms,
            query_retry_max: self.query_retry_max,
            reconnect_base_ms: self.reconnect_base_ms,
            reconnect_max_ms: self.reconnect_max_ms,
            cancel_orphan_orders: self.cancel_orphan_orders,
        }
    }

    pub fn live_runner_config(&self) -> LiveRunnerConfig {
        LiveRunnerConfig {
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            tick_interval_ms: self.tick_interval_ms,
            checkpoint_interval_ms: self.checkpoint_interval_ms,
            cancel_open_orders_on_stop: self.cancel_orphan_orders,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let config = CoreConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed = CoreConfig::from_json(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn unknown_field_is_a_hard_error() {
        let raw = r#"{
            "heartbeat_interval_ms": 1000,
            "tick_interval_ms": null,
            "reconnect_base_ms": 100,
            "reconnect_max_ms": 1000,
            "submission_timeout_ms": 1000,
            "query_retry_max": 1,
            "checkpoint_dir": "/tmp",
            "checkpoint_interval_ms": null,
            "max_checkpoints": 1,
            "auto_recover": true,
            "sync_with_exchange_on_recover": true,
            "cancel_orphan_orders": true,
            "totally_unknown_field": 1
        }"#;
        assert!(CoreConfig::from_json(raw).is_err());
    }
}
