//! Block, transaction and input data types.
//!
//! [`Block`] and [`RawTransaction`] mirror the daemon wire format. A
//! [`TransactionInput`] is an output the wallet owns; a [`Transaction`] is the
//! wallet's attributed view of a chain transaction. [`TransactionData`] is the
//! complete result of scanning one block, built in full before any of it is
//! committed to the store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::primitives::{Hash256, KeyImage, PublicKey, SecretKey};

/// Unlock times at or above this value are wall-clock timestamps rather than
/// block heights.
pub const MAX_BLOCK_NUMBER: u64 = 1 << 32;

/// One key output of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyOutput {
    /// The one-time output key.
    pub key: PublicKey,
    /// Amount in atomic units.
    pub amount: u64,
    /// Network-wide ordinal of this output among outputs of the same amount.
    /// Daemons that do not index globally omit it; the wallet back-fills it
    /// with a range query before the input becomes spendable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_index: Option<u64>,
}

/// One key input of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInput {
    /// Amount in atomic units.
    pub amount: u64,
    /// The spend nullifier of the consumed output.
    pub key_image: KeyImage,
}

/// A transaction as streamed from the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    /// Transaction hash.
    pub hash: Hash256,
    /// The transaction public key `r * G`.
    pub public_key: PublicKey,
    /// Height or timestamp before which outputs cannot be spent.
    pub unlock_time: u64,
    /// Hex encoded payment id, empty when absent.
    #[serde(default)]
    pub payment_id: String,
    /// Outputs.
    pub key_outputs: Vec<KeyOutput>,
    /// Inputs. Empty for coinbase transactions.
    #[serde(default)]
    pub key_inputs: Vec<KeyInput>,
}

impl RawTransaction {
    /// Total fee paid: inputs minus outputs, zero for coinbase.
    #[must_use]
    pub fn fee(&self) -> u64 {
        if self.key_inputs.is_empty() {
            return 0;
        }
        let inputs: u64 = self.key_inputs.iter().map(|input| input.amount).sum();
        let outputs: u64 = self.key_outputs.iter().map(|output| output.amount).sum();
        inputs.saturating_sub(outputs)
    }
}

/// A block as streamed from the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Height of this block.
    pub height: u64,
    /// Hash of this block.
    pub hash: Hash256,
    /// Block timestamp, seconds since the epoch.
    pub timestamp: u64,
    /// The miner reward transaction, when the daemon was asked for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<RawTransaction>,
    /// Remaining transactions in block order.
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
}

impl Block {
    /// A rough in-memory footprint, used for prefetch buffer backpressure.
    #[must_use]
    pub fn approximate_size(&self) -> usize {
        fn transaction_size(tx: &RawTransaction) -> usize {
            128 + tx.key_outputs.len() * 80 + tx.key_inputs.len() * 48 + tx.payment_id.len()
        }
        let coinbase = self.coinbase.as_ref().map_or(0, transaction_size);
        96 + coinbase
            + self
                .transactions
                .iter()
                .map(transaction_size)
                .sum::<usize>()
    }

    /// The coinbase (when present) followed by the remaining transactions, in
    /// the order the block lists them.
    pub fn raw_transactions(&self) -> impl Iterator<Item = &RawTransaction> {
        self.coinbase.iter().chain(self.transactions.iter())
    }
}

/// The daemon's highest known block, returned when the wallet has nothing
/// newer to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopBlock {
    /// Height of the top block.
    pub height: u64,
    /// Hash of the top block.
    pub hash: Hash256,
}

/// An output owned by one of the wallet's subwallets.
///
/// Immutable once created, except for `spend_height` (set when the key image
/// is seen spent, reset to zero on fork rollback or cancellation) and
/// `global_output_index` (back-filled when the daemon omits it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInput {
    /// Spend nullifier; [`KeyImage::NULL`] for view-only wallets.
    pub key_image: KeyImage,
    /// Amount in atomic units.
    pub amount: u64,
    /// Height of the block that created this input.
    pub block_height: u64,
    /// Public key of the creating transaction.
    pub transaction_public_key: PublicKey,
    /// Index of this output within the creating transaction.
    pub transaction_index: u64,
    /// Network-wide output ordinal, needed to build ring signatures.
    pub global_output_index: Option<u64>,
    /// The one-time output key.
    pub key: PublicKey,
    /// Height this input was spent at; zero while unspent.
    pub spend_height: u64,
    /// Unlock height or timestamp of the creating transaction.
    pub unlock_time: u64,
    /// Hash of the creating transaction.
    pub parent_transaction_hash: Hash256,
    /// One-time secret key; [`SecretKey::NULL`] for view-only wallets.
    pub private_ephemeral: SecretKey,
}

impl TransactionInput {
    /// `true` while the input has not been seen spent.
    #[must_use]
    pub fn is_unspent(&self) -> bool {
        self.spend_height == 0
    }
}

/// The wallet's view of a chain transaction: the net amount change it caused
/// per subwallet, plus metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Net change per subwallet public spend key. Positive entries are
    /// received outputs, negative entries are spent inputs.
    pub transfers: HashMap<PublicKey, i64>,
    /// Transaction hash.
    pub hash: Hash256,
    /// Fee paid, zero for coinbase.
    pub fee: u64,
    /// Height of the containing block, zero while unconfirmed.
    pub block_height: u64,
    /// Timestamp of the containing block, zero while unconfirmed.
    pub timestamp: u64,
    /// Hex encoded payment id, empty when absent.
    pub payment_id: String,
    /// Unlock height or timestamp.
    pub unlock_time: u64,
    /// Whether this is a miner reward transaction.
    pub is_coinbase: bool,
}

impl Transaction {
    /// The net change this transaction caused across all subwallets.
    ///
    /// Positive for incoming, negative for outgoing, zero for fusions.
    #[must_use]
    pub fn total_amount(&self) -> i64 {
        self.transfers.values().sum()
    }

    /// `true` for a self-to-self transaction with zero net change.
    #[must_use]
    pub fn is_fusion(&self) -> bool {
        !self.is_coinbase && self.total_amount() == 0
    }

    /// `true` if any transfer touches the given subwallet.
    #[must_use]
    pub fn involves(&self, public_spend_key: &PublicKey) -> bool {
        self.transfers.contains_key(public_spend_key)
    }
}

/// The full result of scanning one block. Built completely before any store
/// mutation so a failed scan commits nothing.
#[derive(Debug, Clone, Default)]
pub struct TransactionData {
    /// Attributed transactions to add.
    pub transactions_to_add: Vec<Transaction>,
    /// Newly discovered owned inputs, with their owning subwallet.
    pub inputs_to_add: Vec<(PublicKey, TransactionInput)>,
    /// Key images observed spent in this block, with their owner.
    pub key_images_to_mark_spent: Vec<(PublicKey, KeyImage)>,
}

impl TransactionData {
    /// `true` when the block touched nothing the wallet owns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions_to_add.is_empty()
            && self.inputs_to_add.is_empty()
            && self.key_images_to_mark_spent.is_empty()
    }
}
