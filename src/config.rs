//! Configuration management for SlateChain

use crate::mempool::SelectionPolicy;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub mempool: MempoolConfig,
    #[serde(default)]
    pub vm: VmConfig,
    #[serde(default)]
    pub miner: MinerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Refuse to start on an index digest mismatch instead of warning.
    #[serde(default)]
    pub strict_integrity: bool,
    #[serde(default = "default_block_cache")]
    pub block_cache: usize,
    #[serde(default = "default_account_cache")]
    pub account_cache: usize,
    #[serde(default = "default_min_txs")]
    pub min_txs_per_block: usize,
    #[serde(default = "default_max_txs")]
    pub max_txs_per_block: usize,
}

#[derive(Debug, Deserialize)]
pub struct MempoolConfig {
    #[serde(default = "default_mempool_capacity")]
    pub capacity: usize,
    #[serde(default = "default_policy")]
    pub policy: SelectionPolicy,
}

#[derive(Debug, Deserialize)]
pub struct VmConfig {
    #[serde(default = "default_max_calls")]
    pub max_calls: u32,
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
    /// Watchdog per script invocation; 0 disables it (debugging only).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MinerConfig {
    #[serde(default)]
    pub enabled: bool,
    pub beneficiary: String,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Produce as soon as this many transactions are pending.
    #[serde(default = "default_batch_txs")]
    pub batch_txs: usize,
    /// Produce anything pending once this much time has passed.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_network_id")]
    pub network_id: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            data_dir: default_data_dir(),
            strict_integrity: false,
            block_cache: default_block_cache(),
            account_cache: default_account_cache(),
            min_txs_per_block: default_min_txs(),
            max_txs_per_block: default_max_txs(),
        }
    }
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            capacity: default_mempool_capacity(),
            policy: default_policy(),
        }
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_calls: default_max_calls(),
            max_steps: default_max_steps(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        MinerConfig {
            enabled: false,
            beneficiary: String::new(),
            tick_secs: default_tick_secs(),
            batch_txs: default_batch_txs(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            network_id: default_network_id(),
        }
    }
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_block_cache() -> usize {
    100
}

fn default_account_cache() -> usize {
    1000
}

fn default_min_txs() -> usize {
    1
}

fn default_max_txs() -> usize {
    100
}

fn default_mempool_capacity() -> usize {
    10_000
}

fn default_policy() -> SelectionPolicy {
    SelectionPolicy::Arrival
}

fn default_max_calls() -> u32 {
    1000
}

fn default_max_steps() -> u64 {
    100_000
}

fn default_timeout_ms() -> u64 {
    250
}

fn default_tick_secs() -> u64 {
    2
}

fn default_batch_txs() -> usize {
    10
}

fn default_max_wait_secs() -> u64 {
    30
}

fn default_network_id() -> String {
    "devnet".to_string()
}

/// Load configuration from a TOML file, falling back to built-in defaults
/// when the file is absent.
pub fn load_config(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    let config_str = fs::read_to_string(path).unwrap_or_default();
    let config: Config = if config_str.is_empty() {
        toml::from_str("")?
    } else {
        toml::from_str(&config_str)?
    };

    // Validate critical values
    if config.chain.data_dir.is_empty() {
        return Err("chain.data_dir must be set".into());
    }
    if config.chain.min_txs_per_block > config.chain.max_txs_per_block {
        return Err("chain.min_txs_per_block exceeds chain.max_txs_per_block".into());
    }
    if config.miner.enabled && config.miner.beneficiary.is_empty() {
        return Err("miner.beneficiary must be set when mining is enabled".into());
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_absent() {
        let config = load_config(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.chain.data_dir, "./data");
        assert!(!config.chain.strict_integrity);
        assert_eq!(config.vm.max_calls, 1000);
        assert!(!config.miner.enabled);
        assert_eq!(config.sync.network_id, "devnet");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let toml_str = r#"
            [chain]
            data_dir = "/tmp/slate"
            strict_integrity = true

            [mempool]
            policy = "fee_priority"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.chain.data_dir, "/tmp/slate");
        assert!(config.chain.strict_integrity);
        assert_eq!(config.mempool.policy, SelectionPolicy::FeePriority);
        assert_eq!(config.vm.timeout_ms, 250);
    }
}
