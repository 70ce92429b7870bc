//! Engine tuning knobs. Per-chain protocol constants live in the registry.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::{ChainFamily, ChainSpec};
use crate::types::Chain;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub broadcast: BroadcastConfig,
    pub fees: FeeConfig,
    pub tracker: TrackerConfig,
    pub reservation: ReservationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Per-call timeout for every provider request.
    pub timeout_ms: u64,
    pub max_attempts_per_provider: u32,
    /// First retry delay; doubled per attempt up to `max_backoff_ms`.
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            max_attempts_per_provider: 3,
            backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl BroadcastConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retry number `attempt` (1-based) against the same provider.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor).min(self.max_backoff_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Estimates are capped at `cap_multiplier` times the recent median.
    pub cap_multiplier: u64,
    /// Overrides for the registry's static fallback fee, in the chain's fee unit.
    pub static_fallbacks: HashMap<Chain, u64>,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            cap_multiplier: 10,
            static_fallbacks: HashMap::new(),
        }
    }
}

impl FeeConfig {
    pub fn fallback_for(&self, spec: &ChainSpec) -> u64 {
        self.static_fallbacks
            .get(&spec.chain)
            .copied()
            .filter(|fee| *fee > 0)
            .unwrap_or(spec.fallback_fee)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub utxo_drop_grace_ms: u64,
    pub account_drop_grace_ms: u64,
    pub drop_grace_overrides: HashMap<Chain, u64>,
    /// Poll interval is the chain's block time divided by this, never under one second.
    pub poll_divisor: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            utxo_drop_grace_ms: 30 * 60 * 1_000,
            account_drop_grace_ms: 5 * 60 * 1_000,
            drop_grace_overrides: HashMap::new(),
            poll_divisor: 2,
        }
    }
}

impl TrackerConfig {
    pub fn drop_grace_ms(&self, spec: &ChainSpec) -> u64 {
        if let Some(ms) = self.drop_grace_overrides.get(&spec.chain) {
            return *ms;
        }
        match spec.family {
            ChainFamily::Utxo => self.utxo_drop_grace_ms,
            ChainFamily::Account => self.account_drop_grace_ms,
        }
    }

    pub fn poll_interval(&self, spec: &ChainSpec) -> Duration {
        let ms = spec.block_time_ms / self.poll_divisor.max(1);
        Duration::from_millis(ms.max(1_000))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationConfig {
    /// Automatic re-selections after losing a reservation race.
    pub conflict_retries: u32,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self { conflict_retries: 1 }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broadcast.max_attempts_per_provider == 0 {
            return Err(ConfigError::Invalid(
                "broadcast.max_attempts_per_provider must be at least 1".into(),
            ));
        }
        if self.broadcast.timeout_ms == 0 {
            return Err(ConfigError::Invalid("broadcast.timeout_ms must be non-zero".into()));
        }
        if self.fees.cap_multiplier == 0 {
            return Err(ConfigError::Invalid("fees.cap_multiplier must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    #[test]
    fn empty_json_gives_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.broadcast.timeout_ms, 15_000);
        assert_eq!(config.reservation.conflict_retries, 1);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = EngineConfig::from_json(
            r#"{"broadcast":{"timeout_ms":500},"fees":{"static_fallbacks":{"Bitcoin":25}}}"#,
        )
        .unwrap();
        assert_eq!(config.broadcast.timeout_ms, 500);
        assert_eq!(config.broadcast.max_attempts_per_provider, 3);
        assert_eq!(config.fees.cap_multiplier, 10);

        let registry = Registry::standard();
        let btc = registry.get(Chain::Bitcoin).unwrap();
        assert_eq!(config.fees.fallback_for(btc), 25);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = EngineConfig::from_json(r#"{"broadcast":{"max_attempts_per_provider":0}}"#);
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = BroadcastConfig::default();
        assert_eq!(config.backoff(1), Duration::from_millis(500));
        assert_eq!(config.backoff(2), Duration::from_millis(1_000));
        assert_eq!(config.backoff(5), Duration::from_millis(8_000));
        assert_eq!(config.backoff(70), Duration::from_millis(8_000));
    }

    #[test]
    fn drop_grace_by_family() {
        let config = TrackerConfig::default();
        let registry = Registry::standard();
        assert_eq!(
            config.drop_grace_ms(registry.get(Chain::Bitcoin).unwrap()),
            30 * 60 * 1_000
        );
        assert_eq!(
            config.drop_grace_ms(registry.get(Chain::Ethereum).unwrap()),
            5 * 60 * 1_000
        );
    }

    #[test]
    fn poll_interval_has_one_second_floor() {
        let config = TrackerConfig::default();
        let registry = Registry::standard();
        assert_eq!(
            config.poll_interval(registry.get(Chain::Solana).unwrap()),
            Duration::from_secs(1)
        );
        assert_eq!(
            config.poll_interval(registry.get(Chain::Bitcoin).unwrap()),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"tracker":{"poll_divisor":4}}"#).unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.tracker.poll_divisor, 4);
    }
}
