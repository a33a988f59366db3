//! The daemon seam: everything the engine asks of a remote node.
//!
//! The engine only ever talks to a [`Daemon`] trait object, so tests swap in
//! [`crate::testutils::MockDaemon`] and hardware deployments can interpose a
//! proxy. The production implementation is [`HttpDaemon`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::data::{Block, TopBlock};
use crate::error::NodeError;
use crate::events::WalletEvent;
use crate::primitives::{Hash256, PublicKey};

mod http;

pub use http::HttpDaemon;

/// Daemon status summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonInfo {
    /// The daemon's own chain height.
    pub height: u64,
    /// The consensus network height the daemon observes.
    pub network_height: u64,
    /// Number of incoming peer connections.
    #[serde(default)]
    pub incoming_connections: u64,
    /// Number of outgoing peer connections.
    #[serde(default)]
    pub outgoing_connections: u64,
    /// Estimated network hashrate.
    #[serde(default)]
    pub hashrate: u64,
}

/// Node operator fee, charged per submitted transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeInfo {
    /// Fee destination address; empty when the node charges no fee.
    pub address: String,
    /// Fee amount in atomic units.
    pub amount: u64,
}

impl FeeInfo {
    /// `true` when the node charges a fee.
    #[must_use]
    pub fn is_charging(&self) -> bool {
        !self.address.is_empty() && self.amount > 0
    }
}

/// Response to a wallet sync data request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncData {
    /// Blocks following the most recent common checkpoint.
    #[serde(default)]
    pub blocks: Vec<Block>,
    /// Set when the wallet already has everything; identifies the chain tip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_block: Option<TopBlock>,
    /// Whether the daemon considers the wallet synced.
    #[serde(default)]
    pub synced: bool,
}

/// Decoy outputs for one amount, sorted ascending by global index so the real
/// input's position is masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomOutputs {
    /// Amount these outputs carry.
    pub amount: u64,
    /// The candidate decoys.
    pub outputs: Vec<RandomOutput>,
}

/// One candidate decoy output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomOutput {
    /// Global index of the output.
    pub index: u64,
    /// The output key.
    pub key: PublicKey,
}

/// Operations the wallet requires from a remote node.
#[async_trait]
pub trait Daemon: Send + Sync {
    /// Establishes the connection: resolves the transport scheme and primes
    /// height and fee data. Called once from wallet start.
    async fn init(&self) -> Result<(), NodeError>;

    /// Fetches the daemon status summary.
    async fn get_info(&self) -> Result<DaemonInfo, NodeError>;

    /// Fetches the node operator fee.
    async fn get_fee_info(&self) -> Result<FeeInfo, NodeError>;

    /// Streams blocks following the most recent common ancestor of
    /// `checkpoints`, newest checkpoint first. `start_timestamp` is used by
    /// the daemon in place of `start_height` until the wallet has converted
    /// its scan timestamp to a height.
    async fn get_wallet_sync_data(
        &self,
        checkpoints: Vec<Hash256>,
        start_height: u64,
        start_timestamp: u64,
        block_count: u64,
        skip_coinbase: bool,
    ) -> Result<SyncData, NodeError>;

    /// Fetches the global output indexes of every transaction in the height
    /// range `[start_height, end_height]`.
    async fn get_global_indexes_for_range(
        &self,
        start_height: u64,
        end_height: u64,
    ) -> Result<HashMap<Hash256, Vec<u64>>, NodeError>;

    /// Returns the subset of `transaction_hashes` the daemon knows nothing
    /// about: not in the mempool and not in any block.
    async fn get_cancelled_transactions(
        &self,
        transaction_hashes: Vec<Hash256>,
    ) -> Result<Vec<Hash256>, NodeError>;

    /// Fetches `count` candidate decoy outputs for each amount.
    async fn get_random_outputs_by_amount(
        &self,
        amounts: Vec<u64>,
        count: u64,
    ) -> Result<Vec<RandomOutputs>, NodeError>;

    /// Submits a hex encoded raw transaction.
    async fn submit_transaction(&self, raw_transaction: &str) -> Result<(), NodeError>;

    /// Installs the event channel used for `Connect`/`Disconnect` edges.
    /// Implementations without connection state may ignore it.
    fn register_events(&self, _events: broadcast::Sender<WalletEvent>) {}
}
