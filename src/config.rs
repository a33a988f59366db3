//! Wallet configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::crypto::{CryptoProvider, SoftwareCrypto};

/// The permitted mixin range at and above an activation height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixinLimit {
    /// Height this limit activates at.
    pub activation_height: u64,
    /// Minimum number of decoys per input.
    pub min_mixin: u64,
    /// Maximum number of decoys per input.
    pub max_mixin: u64,
    /// Default used when the caller does not specify one.
    pub default_mixin: u64,
}

/// Mixin limits across the chain's history, ordered by activation height.
#[derive(Debug, Clone, Default)]
pub struct MixinLimits {
    limits: Vec<MixinLimit>,
}

impl MixinLimits {
    /// Constructs limits from entries, sorting by activation height.
    #[must_use]
    pub fn new(mut limits: Vec<MixinLimit>) -> Self {
        limits.sort_by_key(|limit| limit.activation_height);
        Self { limits }
    }

    /// The limit active at `height`, or `None` below the first activation.
    #[must_use]
    pub fn at_height(&self, height: u64) -> Option<MixinLimit> {
        self.limits
            .iter()
            .rev()
            .find(|limit| height >= limit.activation_height)
            .copied()
    }
}

/// Complete wallet configuration.
///
/// Defaults target a chain with a 30 second block time and 100-block daemon
/// batches; embedders override what differs.
#[derive(Clone)]
pub struct WalletConfig {
    /// Number of decimal places in the human readable amount.
    pub decimal_places: u32,
    /// Address prefix byte sequence value of the chain.
    pub address_prefix: u64,
    /// Currency ticker symbol.
    pub ticker_symbol: String,
    /// Timeout applied to every daemon request.
    pub request_timeout: Duration,
    /// Target seconds between blocks.
    pub block_target_time: Duration,
    /// Period of the sync ticker.
    pub sync_thread_interval: Duration,
    /// Period of the daemon info ticker.
    pub daemon_update_interval: Duration,
    /// Period of the locked transaction cancellation ticker.
    pub locked_transactions_check_interval: Duration,
    /// Maximum blocks processed per sync tick before yielding.
    pub blocks_per_tick: usize,
    /// Whether coinbase transactions are scanned for owned outputs.
    pub scan_coinbase_transactions: bool,
    /// Network minimum fee.
    pub minimum_fee: u64,
    /// Minimum fee per byte chunk.
    pub minimum_fee_per_byte: f64,
    /// Size in bytes of one fee-per-byte chunk.
    pub fee_per_byte_chunk_size: u64,
    /// Mixin limits by activation height.
    pub mixin_limits: MixinLimits,
    /// Length of a standard address.
    pub standard_address_length: usize,
    /// Length of an integrated address.
    pub integrated_address_length: usize,
    /// Memory cap on the unprocessed block prefetch buffer, in bytes.
    pub block_store_memory_limit: usize,
    /// Blocks requested per daemon sync call, and the adaptive batch cap.
    /// Must not exceed 100.
    pub blocks_per_daemon_request: u64,
    /// Fetch staleness beyond which the node is considered dead.
    pub max_last_fetched_block_interval: Duration,
    /// Network-height staleness beyond which the node is considered dead.
    pub max_last_updated_network_height_interval: Duration,
    /// Local-height staleness beyond which the node is considered dead.
    pub max_last_updated_local_height_interval: Duration,
    /// Optional user agent for daemon requests.
    pub custom_user_agent: Option<String>,
    /// Whether reaching the synced state triggers background fusion
    /// optimization.
    pub auto_optimize: bool,
    /// The crypto capability. Replace for hardware-backed wallets.
    pub crypto: Arc<dyn CryptoProvider>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            decimal_places: 2,
            address_prefix: 3_914_525,
            ticker_symbol: "SFRN".to_string(),
            request_timeout: Duration::from_secs(10),
            block_target_time: Duration::from_secs(30),
            sync_thread_interval: Duration::from_millis(10),
            daemon_update_interval: Duration::from_secs(10),
            locked_transactions_check_interval: Duration::from_secs(30),
            blocks_per_tick: 1,
            scan_coinbase_transactions: false,
            minimum_fee: 10,
            minimum_fee_per_byte: 1.953_125,
            fee_per_byte_chunk_size: 256,
            mixin_limits: MixinLimits::new(vec![MixinLimit {
                activation_height: 0,
                min_mixin: 3,
                max_mixin: 7,
                default_mixin: 3,
            }]),
            standard_address_length: 99,
            integrated_address_length: 187,
            block_store_memory_limit: 50 * 1024 * 1024,
            blocks_per_daemon_request: 100,
            max_last_fetched_block_interval: Duration::from_secs(60),
            max_last_updated_network_height_interval: Duration::from_secs(90),
            max_last_updated_local_height_interval: Duration::from_secs(90),
            custom_user_agent: None,
            auto_optimize: false,
            crypto: Arc::new(SoftwareCrypto),
        }
    }
}

impl std::fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletConfig")
            .field("ticker_symbol", &self.ticker_symbol)
            .field("decimal_places", &self.decimal_places)
            .field("sync_thread_interval", &self.sync_thread_interval)
            .field("daemon_update_interval", &self.daemon_update_interval)
            .field("blocks_per_tick", &self.blocks_per_tick)
            .field(
                "blocks_per_daemon_request",
                &self.blocks_per_daemon_request,
            )
            .field("block_store_memory_limit", &self.block_store_memory_limit)
            .field(
                "scan_coinbase_transactions",
                &self.scan_coinbase_transactions,
            )
            .field("auto_optimize", &self.auto_optimize)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixin_limits_select_by_height() {
        let limits = MixinLimits::new(vec![
            MixinLimit {
                activation_height: 1_000_000,
                min_mixin: 1,
                max_mixin: 3,
                default_mixin: 1,
            },
            MixinLimit {
                activation_height: 0,
                min_mixin: 3,
                max_mixin: 7,
                default_mixin: 3,
            },
        ]);
        assert_eq!(limits.at_height(10).unwrap().max_mixin, 7);
        assert_eq!(limits.at_height(1_000_000).unwrap().max_mixin, 3);
        assert_eq!(limits.at_height(2_000_000).unwrap().min_mixin, 1);
    }

    #[test]
    fn batch_cap_defaults_within_protocol_limit() {
        assert!(WalletConfig::default().blocks_per_daemon_request <= 100);
    }
}
