#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![doc = r#"
# Saffron Sync

## Overview
Saffron-sync is a rust-based light wallet sync engine for CryptoNote-family
networks. It maintains a client-side view of a user's funds by streaming
blocks from a remote daemon and provides the following features:
- Stealth output detection, attributing one-time outputs to subwallets via
  ECDH derivation against the shared private view key.
- Spend tracking, matching each block's key inputs against the wallet's
  key-image index.
- Bounded prefetching, with a moving checkpoint window, adaptive batch sizing
  and a memory cap on the unprocessed block buffer.
- Fork handling, rolling forked transactions and inputs back before the
  replacement chain is attributed.
- Locked transaction cancellation, reversing submitted transactions the
  network has demonstrably dropped.
- Liveness detection, signalling a dead node when fetches or reported heights
  stop making progress.
- Pluggable crypto, so hardware devices can supply the same capability set.

## Terminology
- Subwallet - one of many (public, private) spend key pairs sharing a common
  view key under one wallet.
- Derivation - the ECDH shared secret between a transaction key and the
  private view key, enabling receipt detection.
- Key image - the unique spend nullifier of a one-time output; seeing it in a
  key input means the output was spent.
- Global output index - the network-wide ordinal of an output of a given
  amount, needed to build ring signatures.
- Checkpoint - a block hash submitted to the daemon so streaming resumes from
  the most recent common ancestor.
- Top block - the daemon's highest known block, returned when the wallet has
  nothing newer to receive.
- Fusion - a zero-fee self transfer consolidating many small outputs.

## Architecture
Blocks flow from the [`daemon::Daemon`] through the bounded pipeline into the
scan engine, which reads the [`subwallets::SubWallets`] key sets and writes
back attributed inputs and transactions, one atomic commit per block. The
[`lightwallet::LightWallet`] facade owns all of it and drives three periodic
tasks (block sync, daemon info polling and locked-transaction checks),
emitting [`events::WalletEvent`]s as state changes.
"#]

pub mod config;
pub mod crypto;
pub mod daemon;
pub mod data;
pub mod error;
pub mod events;
pub mod lightwallet;
pub mod primitives;
pub(crate) mod scan;
pub mod subwallets;
pub mod sync;
pub mod testutils;

pub use config::{MixinLimit, MixinLimits, WalletConfig};
pub use crypto::{CryptoProvider, SoftwareCrypto};
pub use daemon::{Daemon, DaemonInfo, FeeInfo, HttpDaemon, SyncData};
pub use data::{
    Block, KeyInput, KeyOutput, RawTransaction, TopBlock, Transaction, TransactionData,
    TransactionInput,
};
pub use error::{CryptoError, NodeError, ScanError, SyncError, WalletError};
pub use events::WalletEvent;
pub use lightwallet::{LightWallet, OptimizerHook, WalletSource};
pub use primitives::{Hash256, KeyDerivation, KeyImage, PublicKey, SecretKey, Signature};
pub use subwallets::{is_input_unlocked, SubWallet, SubWallets};
pub use sync::status::SyncStatus;
