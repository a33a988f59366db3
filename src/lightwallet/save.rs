//! The persisted wallet document.
//!
//! One JSON document holds the subwallet store and the synchronizer's
//! checkpoint state. Encryption of the document is the embedder's concern.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::crypto::CryptoProvider;
use crate::data::Transaction;
use crate::primitives::{Hash256, KeyImage, PublicKey, SecretKey};
use crate::subwallets::{SubWallet, SubWallets};
use crate::sync::status::{SyncStatus, SyncStatusDocument};

/// Version written into new wallet documents.
pub const WALLET_FILE_FORMAT_VERSION: u32 = 0;

/// The top level persisted wallet shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletDocument {
    /// Document format version.
    pub wallet_file_format_version: u32,
    /// The subwallet store.
    pub sub_wallets: SubWalletsDocument,
    /// The synchronizer state.
    pub wallet_synchronizer: SynchronizerDocument,
}

/// Persisted subwallet store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubWalletsDocument {
    /// Public spend keys of every subwallet.
    pub public_spend_keys: Vec<PublicKey>,
    /// The subwallet records.
    pub sub_wallet: Vec<SubWallet>,
    /// Confirmed transactions.
    pub transactions: Vec<Transaction>,
    /// Outgoing transactions awaiting confirmation.
    pub locked_transactions: Vec<Transaction>,
    /// Which inputs each unconfirmed transaction consumed.
    #[serde(default)]
    pub locked_input_spends: HashMap<Hash256, Vec<(PublicKey, KeyImage)>>,
    /// The shared private view key.
    pub private_view_key: SecretKey,
    /// Whether this is a view-only wallet.
    pub is_view_wallet: bool,
    /// Private keys of transactions this wallet created.
    pub tx_private_keys: Vec<TransactionPrivateKeyEntry>,
}

/// One persisted transaction private key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPrivateKeyEntry {
    /// Hash of the created transaction.
    pub transaction_hash: Hash256,
    /// Its private key.
    pub tx_private_key: SecretKey,
}

/// Persisted synchronizer state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizerDocument {
    /// Scan start height.
    pub start_height: u64,
    /// Scan start timestamp, zero once converted to a height.
    pub start_timestamp: u64,
    /// The shared private view key.
    pub private_view_key: SecretKey,
    /// The processed-block checkpoint log.
    pub transaction_synchronizer_status: SyncStatusDocument,
}

pub(crate) fn build_document(
    subwallets: &SubWallets,
    start_height: u64,
    start_timestamp: u64,
    status: &SyncStatus,
) -> WalletDocument {
    WalletDocument {
        wallet_file_format_version: WALLET_FILE_FORMAT_VERSION,
        sub_wallets: SubWalletsDocument {
            public_spend_keys: subwallets.get_public_spend_keys(),
            sub_wallet: subwallets.subwallets.values().cloned().collect(),
            transactions: subwallets.transactions.clone(),
            locked_transactions: subwallets.unconfirmed_transactions.clone(),
            locked_input_spends: subwallets.locked_input_spends.clone(),
            private_view_key: subwallets.private_view_key,
            is_view_wallet: subwallets.is_view_wallet,
            tx_private_keys: subwallets
                .transaction_private_keys
                .iter()
                .map(|(hash, key)| TransactionPrivateKeyEntry {
                    transaction_hash: *hash,
                    tx_private_key: *key,
                })
                .collect(),
        },
        wallet_synchronizer: SynchronizerDocument {
            start_height,
            start_timestamp,
            private_view_key: subwallets.private_view_key,
            transaction_synchronizer_status: status.to_document(),
        },
    }
}

/// Rebuilds the store and synchronizer state from a document.
pub(crate) fn restore_store(
    document: WalletDocument,
    crypto: Arc<dyn CryptoProvider>,
) -> io::Result<(SubWallets, SyncStatus, u64, u64)> {
    let sub_wallets = document.sub_wallets;
    if sub_wallets.sub_wallet.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "wallet document contains no subwallets",
        ));
    }

    let mut subwallet_map = HashMap::new();
    let mut key_image_owners = HashMap::new();
    let mut primary_spend_key = None;
    for subwallet in sub_wallets.sub_wallet {
        for key_image in subwallet.key_images() {
            if !key_image.is_null() {
                key_image_owners.insert(key_image, subwallet.public_spend_key);
            }
        }
        if subwallet.is_primary {
            primary_spend_key = Some(subwallet.public_spend_key);
        }
        subwallet_map.insert(subwallet.public_spend_key, subwallet);
    }
    let primary_spend_key = primary_spend_key
        .or_else(|| sub_wallets.public_spend_keys.first().copied())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "wallet document names no primary subwallet",
            )
        })?;

    let locked_transaction_hashes: HashSet<Hash256> = sub_wallets
        .locked_transactions
        .iter()
        .map(|transaction| transaction.hash)
        .collect();

    let store = SubWallets {
        crypto,
        private_view_key: sub_wallets.private_view_key,
        is_view_wallet: sub_wallets.is_view_wallet,
        primary_spend_key,
        subwallets: subwallet_map,
        transactions: sub_wallets.transactions,
        unconfirmed_transactions: sub_wallets.locked_transactions,
        locked_transaction_hashes,
        locked_input_spends: sub_wallets.locked_input_spends,
        transaction_private_keys: sub_wallets
            .tx_private_keys
            .into_iter()
            .map(|entry| (entry.transaction_hash, entry.tx_private_key))
            .collect(),
        key_image_owners,
    };

    let synchronizer = document.wallet_synchronizer;
    Ok((
        store,
        SyncStatus::from_document(synchronizer.transaction_synchronizer_status),
        synchronizer.start_height,
        synchronizer.start_timestamp,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::crypto::SoftwareCrypto;
    use crate::data::TransactionInput;

    #[test]
    fn document_round_trips_the_store() {
        let crypto = SoftwareCrypto;
        let (_, view) = crypto.generate_key_pair();
        let (_, spend) = crypto.generate_key_pair();
        let mut store =
            SubWallets::new(Arc::new(SoftwareCrypto), view, spend, 40, 0).unwrap();
        let owner = store.primary_public_spend_key();
        store
            .store_transaction_input(
                &owner,
                TransactionInput {
                    key_image: KeyImage::from_bytes([1; 32]),
                    amount: 1_000,
                    block_height: 50,
                    transaction_public_key: PublicKey::NULL,
                    transaction_index: 0,
                    global_output_index: Some(17),
                    key: PublicKey::from_bytes([2; 32]),
                    spend_height: 0,
                    unlock_time: 0,
                    parent_transaction_hash: Hash256::from_bytes([3; 32]),
                    private_ephemeral: SecretKey::NULL,
                },
            )
            .unwrap();
        store.add_transaction_private_key(
            Hash256::from_bytes([4; 32]),
            SecretKey::from_bytes([5; 32]),
        );

        let mut status = SyncStatus::starting_at(39);
        status.store_block_hash(40, Hash256::from_bytes([6; 32]));

        let document = build_document(&store, 40, 0, &status);
        let encoded = serde_json::to_string_pretty(&document).unwrap();
        assert!(encoded.contains("\"walletFileFormatVersion\""));
        assert!(encoded.contains("\"subWallets\""));
        assert!(encoded.contains("\"publicSpendKeys\""));
        assert!(encoded.contains("\"lastKnownBlockHeight\""));
        assert!(encoded.contains("\"txPrivateKeys\""));

        let decoded: WalletDocument = serde_json::from_str(&encoded).unwrap();
        let (restored, restored_status, start_height, start_timestamp) =
            restore_store(decoded, Arc::new(SoftwareCrypto)).unwrap();

        assert_eq!(start_height, 40);
        assert_eq!(start_timestamp, 0);
        assert_eq!(restored_status, status);
        assert_eq!(restored.primary_public_spend_key(), owner);
        assert_eq!(
            restored.get_key_image_owner(&KeyImage::from_bytes([1; 32])),
            Some(owner)
        );
        assert_eq!(restored.get_balance(100, None).unwrap(), (1_000, 0));
        assert_eq!(
            restored
                .get_transaction_private_key(&Hash256::from_bytes([4; 32]))
                .unwrap(),
            SecretKey::from_bytes([5; 32])
        );
    }
}
