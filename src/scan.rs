//! Output scanning and transaction attribution.
//!
//! [`process_block_outputs`] finds the one-time outputs a block addressed to
//! the wallet's subwallets; [`process_block`] turns those, plus the spends the
//! block performed, into attributed transactions. Both are pure over their
//! inputs: they return fresh records and never mutate the store.

use std::collections::HashMap;

use crate::crypto::CryptoProvider;
use crate::data::{Block, RawTransaction, Transaction, TransactionData, TransactionInput};
use crate::error::ScanError;
use crate::primitives::{Hash256, KeyImage, PublicKey, SecretKey};
use crate::subwallets::SubWallets;

/// Scans a block's outputs against the wallet's spend keys.
///
/// `scanning_keys` maps each subwallet public spend key to its private spend
/// key, `None` for watch-only subwallets. For view-only wallets the key image
/// and private ephemeral of produced inputs are null sentinels; spend
/// detection is impossible and only receipts are visible.
pub(crate) fn process_block_outputs(
    block: &Block,
    private_view_key: &SecretKey,
    scanning_keys: &HashMap<PublicKey, Option<SecretKey>>,
    is_view_wallet: bool,
    process_coinbase: bool,
    crypto: &dyn CryptoProvider,
) -> Result<Vec<(PublicKey, TransactionInput)>, ScanError> {
    let mut inputs = Vec::new();

    let coinbase = if process_coinbase {
        block.coinbase.as_ref()
    } else {
        None
    };
    for transaction in coinbase.into_iter().chain(block.transactions.iter()) {
        scan_transaction_outputs(
            block,
            transaction,
            private_view_key,
            scanning_keys,
            is_view_wallet,
            crypto,
            &mut inputs,
        )?;
    }

    Ok(inputs)
}

fn scan_transaction_outputs(
    block: &Block,
    transaction: &RawTransaction,
    private_view_key: &SecretKey,
    scanning_keys: &HashMap<PublicKey, Option<SecretKey>>,
    is_view_wallet: bool,
    crypto: &dyn CryptoProvider,
    inputs: &mut Vec<(PublicKey, TransactionInput)>,
) -> Result<(), ScanError> {
    let derivation = crypto.generate_key_derivation(&transaction.public_key, private_view_key)?;

    for (index, output) in transaction.key_outputs.iter().enumerate() {
        let output_index = index as u64;
        let derived_spend_key = crypto.underive_public_key(&derivation, output_index, &output.key)?;
        let Some(private_spend_key) = scanning_keys.get(&derived_spend_key) else {
            continue;
        };

        let (key_image, private_ephemeral) = match private_spend_key {
            Some(secret) if !is_view_wallet => {
                let private_ephemeral = crypto.derive_secret_key(&derivation, output_index, secret)?;
                let key_image = crypto.generate_key_image(&output.key, &private_ephemeral)?;
                (key_image, private_ephemeral)
            }
            _ => (KeyImage::NULL, SecretKey::NULL),
        };

        inputs.push((
            derived_spend_key,
            TransactionInput {
                key_image,
                amount: output.amount,
                block_height: block.height,
                transaction_public_key: transaction.public_key,
                transaction_index: output_index,
                global_output_index: output.global_index,
                key: output.key,
                spend_height: 0,
                unlock_time: transaction.unlock_time,
                parent_transaction_hash: transaction.hash,
                private_ephemeral,
            },
        ));
    }

    Ok(())
}

/// Attributes a block's transactions against the wallet.
///
/// `owned_inputs` is the output of [`process_block_outputs`] for the same
/// block. Transactions are attributed in block order, coinbase first; a
/// [`Transaction`] is emitted only when it changed some subwallet's funds.
pub(crate) fn process_block(
    block: &Block,
    owned_inputs: &[(PublicKey, TransactionInput)],
    subwallets: &SubWallets,
) -> TransactionData {
    let mut data = TransactionData {
        inputs_to_add: owned_inputs.to_vec(),
        ..TransactionData::default()
    };

    let mut inputs_by_transaction: HashMap<Hash256, Vec<&(PublicKey, TransactionInput)>> =
        HashMap::new();
    for owned in owned_inputs {
        inputs_by_transaction
            .entry(owned.1.parent_transaction_hash)
            .or_default()
            .push(owned);
    }

    for raw_transaction in block.raw_transactions() {
        let is_coinbase = block
            .coinbase
            .as_ref()
            .is_some_and(|coinbase| coinbase.hash == raw_transaction.hash);

        let mut transfers: HashMap<PublicKey, i64> = HashMap::new();

        if let Some(owned) = inputs_by_transaction.get(&raw_transaction.hash) {
            for (owner, input) in owned {
                *transfers.entry(*owner).or_insert(0) += input.amount as i64;
            }
        }

        for key_input in &raw_transaction.key_inputs {
            if let Some(owner) = subwallets.get_key_image_owner(&key_input.key_image) {
                *transfers.entry(owner).or_insert(0) -= key_input.amount as i64;
                data.key_images_to_mark_spent
                    .push((owner, key_input.key_image));
            }
        }

        if !transfers.is_empty() {
            data.transactions_to_add.push(Transaction {
                transfers,
                hash: raw_transaction.hash,
                fee: raw_transaction.fee(),
                block_height: block.height,
                timestamp: block.timestamp,
                payment_id: if is_coinbase {
                    String::new()
                } else {
                    raw_transaction.payment_id.clone()
                },
                unlock_time: raw_transaction.unlock_time,
                is_coinbase,
            });
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::crypto::SoftwareCrypto;
    use crate::data::{KeyInput, KeyOutput};
    use crate::subwallets::SubWallets;
    use crate::testutils::{mock_block, transaction_to};

    struct Fixture {
        crypto: SoftwareCrypto,
        view_secret: SecretKey,
        view_public: PublicKey,
        spend_public: PublicKey,
        subwallets: SubWallets,
    }

    fn fixture() -> Fixture {
        let crypto = SoftwareCrypto;
        let (view_public, view_secret) = crypto.generate_key_pair();
        let (_, spend_secret) = crypto.generate_key_pair();
        let subwallets = SubWallets::new(
            Arc::new(SoftwareCrypto),
            view_secret,
            spend_secret,
            0,
            0,
        )
        .unwrap();
        let spend_public = subwallets.primary_public_spend_key();
        Fixture {
            crypto,
            view_secret,
            view_public,
            spend_public,
            subwallets,
        }
    }

    #[test]
    fn finds_owned_outputs() {
        let fx = fixture();
        let tx = transaction_to(
            &fx.crypto,
            &fx.view_public,
            &fx.spend_public,
            1_000_000,
        );
        let block = mock_block(50, vec![tx.clone()]);

        let owned = process_block_outputs(
            &block,
            &fx.view_secret,
            &fx.subwallets.scanning_keys(),
            false,
            false,
            &fx.crypto,
        )
        .unwrap();

        assert_eq!(owned.len(), 1);
        let (owner, input) = &owned[0];
        assert_eq!(*owner, fx.spend_public);
        assert_eq!(input.amount, 1_000_000);
        assert_eq!(input.block_height, 50);
        assert_eq!(input.parent_transaction_hash, tx.hash);
        assert_eq!(input.spend_height, 0);
        assert!(!input.key_image.is_null());
        assert!(!input.private_ephemeral.is_null());
        // The derived ephemeral key pair must be consistent.
        assert_eq!(
            fx.crypto
                .secret_key_to_public_key(&input.private_ephemeral)
                .unwrap(),
            input.key
        );
    }

    #[test]
    fn foreign_outputs_are_ignored() {
        let fx = fixture();
        let crypto = SoftwareCrypto;
        let (other_view, _) = crypto.generate_key_pair();
        let (other_spend, _) = crypto.generate_key_pair();
        let tx = transaction_to(&crypto, &other_view, &other_spend, 500);
        let block = mock_block(10, vec![tx]);

        let owned = process_block_outputs(
            &block,
            &fx.view_secret,
            &fx.subwallets.scanning_keys(),
            false,
            false,
            &fx.crypto,
        )
        .unwrap();
        assert!(owned.is_empty());
    }

    #[test]
    fn view_wallet_inputs_use_null_sentinels() {
        let crypto = SoftwareCrypto;
        let (view_public, view_secret) = crypto.generate_key_pair();
        let (spend_public, _) = crypto.generate_key_pair();
        let subwallets = SubWallets::new_view(
            Arc::new(SoftwareCrypto),
            view_secret,
            spend_public,
            0,
            0,
        );
        let tx = transaction_to(&crypto, &view_public, &spend_public, 42);
        let block = mock_block(1, vec![tx]);

        let owned = process_block_outputs(
            &block,
            &view_secret,
            &subwallets.scanning_keys(),
            true,
            false,
            &crypto,
        )
        .unwrap();
        assert_eq!(owned.len(), 1);
        assert!(owned[0].1.key_image.is_null());
        assert!(owned[0].1.private_ephemeral.is_null());
    }

    #[test]
    fn attributes_incoming_transaction() {
        let fx = fixture();
        let tx = transaction_to(&fx.crypto, &fx.view_public, &fx.spend_public, 1_000_000);
        let block = mock_block(50, vec![tx]);
        let owned = process_block_outputs(
            &block,
            &fx.view_secret,
            &fx.subwallets.scanning_keys(),
            false,
            false,
            &fx.crypto,
        )
        .unwrap();

        let data = process_block(&block, &owned, &fx.subwallets);
        assert_eq!(data.transactions_to_add.len(), 1);
        let transaction = &data.transactions_to_add[0];
        assert_eq!(transaction.transfers[&fx.spend_public], 1_000_000);
        assert_eq!(transaction.total_amount(), 1_000_000);
        assert!(data.key_images_to_mark_spent.is_empty());
        assert_eq!(data.inputs_to_add.len(), 1);
    }

    #[test]
    fn attributes_outgoing_spend_with_fee() {
        let mut fx = fixture();
        // Seed the store with an owned input so its key image is known.
        let tx = transaction_to(&fx.crypto, &fx.view_public, &fx.spend_public, 1_000);
        let seed_block = mock_block(5, vec![tx]);
        let owned = process_block_outputs(
            &seed_block,
            &fx.view_secret,
            &fx.subwallets.scanning_keys(),
            false,
            false,
            &fx.crypto,
        )
        .unwrap();
        let key_image = owned[0].1.key_image;
        let data = process_block(&seed_block, &owned, &fx.subwallets);
        fx.subwallets.apply_transaction_data(data, 5);

        // A later block spends it, paying a 10 unit fee.
        let spend = RawTransaction {
            hash: Hash256::from_bytes([0xee; 32]),
            public_key: fx.crypto.generate_key_pair().0,
            unlock_time: 0,
            payment_id: String::new(),
            key_outputs: vec![KeyOutput {
                key: fx.crypto.generate_key_pair().0,
                amount: 990,
                global_index: Some(1),
            }],
            key_inputs: vec![KeyInput {
                amount: 1_000,
                key_image,
            }],
        };
        let spend_block = mock_block(6, vec![spend]);

        let data = process_block(&spend_block, &[], &fx.subwallets);
        assert_eq!(data.transactions_to_add.len(), 1);
        let transaction = &data.transactions_to_add[0];
        assert_eq!(transaction.transfers[&fx.spend_public], -1_000);
        assert_eq!(transaction.fee, 10);
        assert_eq!(
            data.key_images_to_mark_spent,
            vec![(fx.spend_public, key_image)]
        );
    }

    #[test]
    fn fusion_nets_to_zero() {
        let mut fx = fixture();
        let tx = transaction_to(&fx.crypto, &fx.view_public, &fx.spend_public, 800);
        let seed_block = mock_block(5, vec![tx]);
        let owned = process_block_outputs(
            &seed_block,
            &fx.view_secret,
            &fx.subwallets.scanning_keys(),
            false,
            false,
            &fx.crypto,
        )
        .unwrap();
        let key_image = owned[0].1.key_image;
        let data = process_block(&seed_block, &owned, &fx.subwallets);
        fx.subwallets.apply_transaction_data(data, 5);

        // A zero-fee self transfer: spends 800, receives 800 back.
        let mut fusion = transaction_to(&fx.crypto, &fx.view_public, &fx.spend_public, 800);
        fusion.key_inputs.push(KeyInput {
            amount: 800,
            key_image,
        });
        let fusion_block = mock_block(6, vec![fusion]);
        let owned = process_block_outputs(
            &fusion_block,
            &fx.view_secret,
            &fx.subwallets.scanning_keys(),
            false,
            false,
            &fx.crypto,
        )
        .unwrap();
        let data = process_block(&fusion_block, &owned, &fx.subwallets);
        assert_eq!(data.transactions_to_add.len(), 1);
        assert!(data.transactions_to_add[0].is_fusion());
    }

    #[test]
    fn untouched_transactions_emit_nothing() {
        let fx = fixture();
        let crypto = SoftwareCrypto;
        let (other_view, _) = crypto.generate_key_pair();
        let (other_spend, _) = crypto.generate_key_pair();
        let block = mock_block(
            3,
            vec![transaction_to(&crypto, &other_view, &other_spend, 77)],
        );
        let data = process_block(&block, &[], &fx.subwallets);
        assert!(data.is_empty());
    }
}
