//! Typed wallet events.
//!
//! Events are delivered on a [`tokio::sync::broadcast`] channel obtained from
//! [`crate::lightwallet::LightWallet::subscribe`]. Events for a block are
//! emitted after the store mutation for that block completes and before the
//! next block is processed.

use crate::data::{Block, RawTransaction, Transaction};
use crate::primitives::Hash256;

/// Everything the wallet reports to its consumer.
#[derive(Debug, Clone)]
pub enum WalletEvent {
    /// A connection to the daemon was established after being lost.
    Connect,
    /// The connection to the daemon was lost.
    Disconnect,
    /// The daemon has made no verifiable progress for longer than the
    /// configured thresholds. Emitted once per outage.
    DeadNode,
    /// The wallet height reached the network height.
    Sync {
        /// Wallet height at the transition.
        wallet_height: u64,
        /// Network height at the transition.
        network_height: u64,
    },
    /// The wallet height fell behind the network height.
    Desync {
        /// Wallet height at the transition.
        wallet_height: u64,
        /// Network height at the transition.
        network_height: u64,
    },
    /// A block was processed or the top of the chain was recorded.
    HeightChange {
        /// Height the wallet has synced to.
        wallet_height: u64,
        /// The daemon's own height.
        local_height: u64,
        /// The network height the daemon reports.
        network_height: u64,
    },
    /// A transaction touching the wallet was attributed.
    Transaction(Transaction),
    /// A transaction with positive net change was attributed.
    IncomingTransaction(Transaction),
    /// A transaction with negative net change was attributed.
    OutgoingTransaction(Transaction),
    /// A self-to-self transaction with zero net change was attributed.
    FusionTransaction(Transaction),
    /// A prepared transaction was accepted by the daemon.
    CreatedTransaction(Hash256),
    /// A background fusion transaction was created.
    CreatedFusionTransaction(Hash256),
    /// A block arrived from the daemon, before attribution.
    RawBlock(Block),
    /// A transaction arrived from the daemon, before attribution.
    RawTransaction(RawTransaction),
}
