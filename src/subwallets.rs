//! The authoritative wallet store.
//!
//! [`SubWallets`] owns every input and transaction record, the key-image →
//! owner index, and the locked/unconfirmed bookkeeping. All mutation goes
//! through its API behind a single writer; readers receive cloned snapshots
//! so event handlers never observe mid-mutation state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::crypto::CryptoProvider;
use crate::data::{Transaction, TransactionData, TransactionInput};
use crate::error::WalletError;
use crate::primitives::{Hash256, KeyDerivation, KeyImage, PublicKey, SecretKey};

mod subwallet;

pub use subwallet::{is_input_unlocked, SubWallet};

/// All subwallet state: inputs, transactions, and spend bookkeeping.
pub struct SubWallets {
    pub(crate) crypto: Arc<dyn CryptoProvider>,
    pub(crate) private_view_key: SecretKey,
    pub(crate) is_view_wallet: bool,
    pub(crate) primary_spend_key: PublicKey,
    pub(crate) subwallets: HashMap<PublicKey, SubWallet>,
    /// Confirmed transactions, in block order of discovery.
    pub(crate) transactions: Vec<Transaction>,
    /// Outgoing transactions submitted but not yet seen in a block.
    pub(crate) unconfirmed_transactions: Vec<Transaction>,
    /// Hashes of unconfirmed outgoing transactions, checked for cancellation.
    pub(crate) locked_transaction_hashes: HashSet<Hash256>,
    /// Which inputs each unconfirmed outgoing transaction consumed, so a
    /// cancellation can revert exactly those.
    pub(crate) locked_input_spends: HashMap<Hash256, Vec<(PublicKey, KeyImage)>>,
    /// Private keys of transactions this wallet created.
    pub(crate) transaction_private_keys: HashMap<Hash256, SecretKey>,
    pub(crate) key_image_owners: HashMap<KeyImage, PublicKey>,
}

impl SubWallets {
    /// Creates a store with one spend-capable primary subwallet.
    pub fn new(
        crypto: Arc<dyn CryptoProvider>,
        private_view_key: SecretKey,
        private_spend_key: SecretKey,
        scan_height: u64,
        scan_timestamp: u64,
    ) -> Result<Self, WalletError> {
        let public_spend_key = crypto.secret_key_to_public_key(&private_spend_key)?;
        let primary = SubWallet::new(
            public_spend_key,
            Some(private_spend_key),
            scan_height,
            scan_timestamp,
            true,
        );
        let mut subwallets = HashMap::new();
        subwallets.insert(public_spend_key, primary);
        Ok(Self {
            crypto,
            private_view_key,
            is_view_wallet: false,
            primary_spend_key: public_spend_key,
            subwallets,
            transactions: Vec::new(),
            unconfirmed_transactions: Vec::new(),
            locked_transaction_hashes: HashSet::new(),
            locked_input_spends: HashMap::new(),
            transaction_private_keys: HashMap::new(),
            key_image_owners: HashMap::new(),
        })
    }

    /// Creates a view-only store: receipts are visible, spends are not.
    pub fn new_view(
        crypto: Arc<dyn CryptoProvider>,
        private_view_key: SecretKey,
        public_spend_key: PublicKey,
        scan_height: u64,
        scan_timestamp: u64,
    ) -> Self {
        let primary = SubWallet::new(public_spend_key, None, scan_height, scan_timestamp, true);
        let mut subwallets = HashMap::new();
        subwallets.insert(public_spend_key, primary);
        Self {
            crypto,
            private_view_key,
            is_view_wallet: true,
            primary_spend_key: public_spend_key,
            subwallets,
            transactions: Vec::new(),
            unconfirmed_transactions: Vec::new(),
            locked_transaction_hashes: HashSet::new(),
            locked_input_spends: HashMap::new(),
            transaction_private_keys: HashMap::new(),
            key_image_owners: HashMap::new(),
        }
    }

    /// `true` when the wallet holds no private spend keys.
    #[must_use]
    pub fn is_view_wallet(&self) -> bool {
        self.is_view_wallet
    }

    /// The shared private view key.
    #[must_use]
    pub fn private_view_key(&self) -> &SecretKey {
        &self.private_view_key
    }

    /// Public spend key of the primary subwallet.
    #[must_use]
    pub fn primary_public_spend_key(&self) -> PublicKey {
        self.primary_spend_key
    }

    /// Public spend keys of every subwallet.
    #[must_use]
    pub fn get_public_spend_keys(&self) -> Vec<PublicKey> {
        self.subwallets.keys().copied().collect()
    }

    /// The scanning key set: public spend key → private spend key (when
    /// available) for every subwallet.
    #[must_use]
    pub fn scanning_keys(&self) -> HashMap<PublicKey, Option<SecretKey>> {
        self.subwallets
            .iter()
            .map(|(public, subwallet)| (*public, subwallet.private_spend_key))
            .collect()
    }

    /// Adds a spend-capable subwallet.
    pub fn add_subwallet(
        &mut self,
        private_spend_key: SecretKey,
        scan_height: u64,
        scan_timestamp: u64,
    ) -> Result<PublicKey, WalletError> {
        if self.is_view_wallet {
            return Err(WalletError::IllegalViewWalletOperation);
        }
        let public_spend_key = self.crypto.secret_key_to_public_key(&private_spend_key)?;
        if self.subwallets.contains_key(&public_spend_key) {
            return Err(WalletError::SubwalletAlreadyExists(public_spend_key));
        }
        self.subwallets.insert(
            public_spend_key,
            SubWallet::new(
                public_spend_key,
                Some(private_spend_key),
                scan_height,
                scan_timestamp,
                false,
            ),
        );
        Ok(public_spend_key)
    }

    /// Imports a watch-only subwallet by public spend key.
    pub fn import_view_subwallet(
        &mut self,
        public_spend_key: PublicKey,
        scan_height: u64,
        scan_timestamp: u64,
    ) -> Result<(), WalletError> {
        if self.subwallets.contains_key(&public_spend_key) {
            return Err(WalletError::SubwalletAlreadyExists(public_spend_key));
        }
        self.subwallets.insert(
            public_spend_key,
            SubWallet::new(public_spend_key, None, scan_height, scan_timestamp, false),
        );
        Ok(())
    }

    /// Deletes a subwallet and every record it owns.
    pub fn delete_subwallet(&mut self, public_spend_key: &PublicKey) -> Result<(), WalletError> {
        let subwallet = self
            .subwallets
            .get(public_spend_key)
            .ok_or(WalletError::SubwalletNotFound(*public_spend_key))?;
        if subwallet.is_primary {
            return Err(WalletError::CannotDeletePrimary);
        }
        for key_image in subwallet.key_images() {
            self.key_image_owners.remove(&key_image);
        }
        self.subwallets.remove(public_spend_key);
        for spends in self.locked_input_spends.values_mut() {
            spends.retain(|(owner, _)| owner != public_spend_key);
        }
        Ok(())
    }

    /// Looks up which subwallet owns a key image.
    #[must_use]
    pub fn get_key_image_owner(&self, key_image: &KeyImage) -> Option<PublicKey> {
        if key_image.is_null() {
            return None;
        }
        self.key_image_owners.get(key_image).copied()
    }

    /// Derives the key image and one-time secret key for an output addressed
    /// to `owner`. Returns null sentinels when no private spend key is held.
    pub fn get_tx_input_key_image(
        &self,
        owner: &PublicKey,
        derivation: &KeyDerivation,
        output_index: u64,
    ) -> Result<(KeyImage, SecretKey), WalletError> {
        let subwallet = self
            .subwallets
            .get(owner)
            .ok_or(WalletError::SubwalletNotFound(*owner))?;
        let Some(private_spend_key) = subwallet.private_spend_key else {
            return Ok((KeyImage::NULL, SecretKey::NULL));
        };
        let private_ephemeral =
            self.crypto
                .derive_secret_key(derivation, output_index, &private_spend_key)?;
        let public_ephemeral = self.crypto.secret_key_to_public_key(&private_ephemeral)?;
        let key_image = self
            .crypto
            .generate_key_image(&public_ephemeral, &private_ephemeral)?;
        Ok((key_image, private_ephemeral))
    }

    /// Stores a scanned input under its owner.
    pub fn store_transaction_input(
        &mut self,
        owner: &PublicKey,
        input: TransactionInput,
    ) -> Result<(), WalletError> {
        let subwallet = self
            .subwallets
            .get_mut(owner)
            .ok_or(WalletError::SubwalletNotFound(*owner))?;
        let key_image = input.key_image;
        if subwallet.store_input(input) && !key_image.is_null() {
            self.key_image_owners.insert(key_image, *owner);
        }
        Ok(())
    }

    /// Records that `key_image` was spent at `block_height`.
    pub fn mark_input_as_spent(
        &mut self,
        owner: &PublicKey,
        key_image: &KeyImage,
        block_height: u64,
    ) {
        let Some(subwallet) = self.subwallets.get_mut(owner) else {
            tracing::warn!(%owner, "asked to mark a spend for an unknown subwallet");
            return;
        };
        if !subwallet.mark_spent(key_image, block_height) {
            tracing::warn!(%key_image, "asked to mark an unknown input as spent");
        }
    }

    /// Moves an unspent input to the locked set, recording which outgoing
    /// transaction consumed it.
    pub fn mark_input_as_locked(
        &mut self,
        owner: &PublicKey,
        key_image: &KeyImage,
        spending_transaction: Hash256,
    ) -> Result<(), WalletError> {
        let subwallet = self
            .subwallets
            .get_mut(owner)
            .ok_or(WalletError::SubwalletNotFound(*owner))?;
        if subwallet.lock_input(key_image) {
            self.locked_input_spends
                .entry(spending_transaction)
                .or_default()
                .push((*owner, *key_image));
        }
        Ok(())
    }

    /// Adds a confirmed transaction, promoting it out of the unconfirmed set
    /// when it was created by this wallet.
    pub fn add_transaction(&mut self, transaction: Transaction) {
        if self
            .transactions
            .iter()
            .any(|existing| existing.hash == transaction.hash)
        {
            return;
        }
        if self.locked_transaction_hashes.remove(&transaction.hash) {
            tracing::info!(hash = %transaction.hash, "unconfirmed transaction confirmed");
        }
        self.unconfirmed_transactions
            .retain(|unconfirmed| unconfirmed.hash != transaction.hash);
        self.locked_input_spends.remove(&transaction.hash);
        self.transactions.push(transaction);
    }

    /// Records an outgoing transaction awaiting confirmation.
    pub fn add_unconfirmed_transaction(&mut self, transaction: Transaction) {
        self.locked_transaction_hashes.insert(transaction.hash);
        self.unconfirmed_transactions.push(transaction);
    }

    /// Hashes of outgoing transactions not yet seen in a block.
    #[must_use]
    pub fn get_locked_transaction_hashes(&self) -> Vec<Hash256> {
        self.locked_transaction_hashes.iter().copied().collect()
    }

    /// Reverses a cancelled outgoing transaction: removes it from the
    /// unconfirmed set and returns its locked inputs to the unspent set.
    pub fn remove_cancelled_transaction(&mut self, transaction_hash: &Hash256) {
        self.locked_transaction_hashes.remove(transaction_hash);
        self.unconfirmed_transactions
            .retain(|transaction| transaction.hash != *transaction_hash);
        if let Some(spends) = self.locked_input_spends.remove(transaction_hash) {
            for (owner, key_image) in spends {
                if let Some(subwallet) = self.subwallets.get_mut(&owner) {
                    subwallet.unlock_input(&key_image);
                }
            }
        }
        tracing::info!(hash = %transaction_hash, "cancelled transaction removed");
    }

    /// Commits one block's scan results. Built data is applied in order:
    /// inputs, then spends, then transactions, so a same-block spend of a
    /// same-block output resolves. Returns the transactions added.
    pub fn apply_transaction_data(
        &mut self,
        data: TransactionData,
        block_height: u64,
    ) -> Vec<Transaction> {
        for (owner, input) in data.inputs_to_add {
            if let Err(e) = self.store_transaction_input(&owner, input) {
                tracing::warn!("discarding input for missing subwallet. {e}");
            }
        }
        for (owner, key_image) in data.key_images_to_mark_spent {
            self.mark_input_as_spent(&owner, &key_image, block_height);
        }
        for transaction in &data.transactions_to_add {
            self.add_transaction(transaction.clone());
        }
        data.transactions_to_add
    }

    /// A snapshot of confirmed transactions.
    #[must_use]
    pub fn get_transactions(&self) -> Vec<Transaction> {
        self.transactions.clone()
    }

    /// A snapshot of unconfirmed outgoing transactions, optionally filtered
    /// to one subwallet, optionally including fusions.
    #[must_use]
    pub fn get_unconfirmed_transactions(
        &self,
        subwallet: Option<&PublicKey>,
        include_fusions: bool,
    ) -> Vec<Transaction> {
        self.unconfirmed_transactions
            .iter()
            .filter(|transaction| include_fusions || !transaction.is_fusion())
            .filter(|transaction| {
                subwallet.map_or(true, |public_spend_key| transaction.involves(public_spend_key))
            })
            .cloned()
            .collect()
    }

    /// Unspent inputs spendable at `current_height`, with their owners; the
    /// raw material for external transfer construction.
    pub fn get_spendable_inputs(
        &self,
        current_height: u64,
        filter: Option<&[PublicKey]>,
    ) -> Result<Vec<(PublicKey, TransactionInput)>, WalletError> {
        let mut spendable = Vec::new();
        let keys = match filter {
            Some(keys) => keys.to_vec(),
            None => self.get_public_spend_keys(),
        };
        for key in keys {
            let subwallet = self
                .subwallets
                .get(&key)
                .ok_or(WalletError::SubwalletNotFound(key))?;
            for input in &subwallet.unspent_inputs {
                if is_input_unlocked(input.unlock_time, current_height) {
                    spendable.push((key, input.clone()));
                }
            }
        }
        Ok(spendable)
    }

    /// Sums (unlocked, locked) balance over `filter` (all subwallets when
    /// `None`) at the given chain height.
    pub fn get_balance(
        &self,
        network_height: u64,
        filter: Option<&[PublicKey]>,
    ) -> Result<(u64, u64), WalletError> {
        let mut unlocked_total = 0;
        let mut locked_total = 0;
        match filter {
            Some(keys) => {
                for key in keys {
                    let subwallet = self
                        .subwallets
                        .get(key)
                        .ok_or(WalletError::SubwalletNotFound(*key))?;
                    let (unlocked, locked) = subwallet.balance(network_height);
                    unlocked_total += unlocked;
                    locked_total += locked;
                }
            }
            None => {
                for subwallet in self.subwallets.values() {
                    let (unlocked, locked) = subwallet.balance(network_height);
                    unlocked_total += unlocked;
                    locked_total += locked;
                }
            }
        }
        Ok((unlocked_total, locked_total))
    }

    /// Discards transactions and inputs from a forked-off chain segment:
    /// everything recorded at or above `height`.
    pub fn remove_forked_transactions(&mut self, height: u64) {
        self.transactions
            .retain(|transaction| transaction.block_height < height);
        for subwallet in self.subwallets.values_mut() {
            for key_image in subwallet.remove_forked_inputs(height) {
                self.key_image_owners.remove(&key_image);
            }
        }
    }

    /// Garbage-collects spent inputs whose spend is older than
    /// `minimum_spend_height`; reorgs deeper than that are impossible by
    /// policy.
    pub fn prune_spent_inputs(&mut self, minimum_spend_height: u64) {
        let mut pruned = 0;
        for subwallet in self.subwallets.values_mut() {
            for key_image in subwallet.prune_spent_inputs(minimum_spend_height) {
                self.key_image_owners.remove(&key_image);
                pruned += 1;
            }
        }
        if pruned > 0 {
            tracing::debug!(pruned, minimum_spend_height, "pruned spent inputs");
        }
    }

    /// Replaces subwallet scan-start timestamps with the height the daemon
    /// resolved them to.
    pub fn convert_sync_timestamp_to_height(&mut self, timestamp: u64, height: u64) {
        for subwallet in self.subwallets.values_mut() {
            if subwallet.sync_start_timestamp == timestamp && timestamp != 0 {
                subwallet.sync_start_timestamp = 0;
                subwallet.sync_start_height = height;
            }
        }
    }

    /// Remembers the private key of a transaction this wallet created.
    pub fn add_transaction_private_key(&mut self, transaction_hash: Hash256, key: SecretKey) {
        self.transaction_private_keys.insert(transaction_hash, key);
    }

    /// The private key of a transaction this wallet created.
    pub fn get_transaction_private_key(
        &self,
        transaction_hash: &Hash256,
    ) -> Result<SecretKey, WalletError> {
        self.transaction_private_keys
            .get(transaction_hash)
            .copied()
            .ok_or(WalletError::PreparedTransactionNotFound(*transaction_hash))
    }

    /// Wipes all scanned state (inputs, transactions, indexes) ahead of a
    /// rescan, keeping keys, and points every subwallet at the new scan
    /// start.
    pub fn clear_scan_data(&mut self, scan_height: u64, scan_timestamp: u64) {
        self.transactions.clear();
        self.unconfirmed_transactions.clear();
        self.locked_transaction_hashes.clear();
        self.locked_input_spends.clear();
        self.key_image_owners.clear();
        for subwallet in self.subwallets.values_mut() {
            subwallet.unspent_inputs.clear();
            subwallet.locked_inputs.clear();
            subwallet.spent_inputs.clear();
            subwallet.sync_start_height = scan_height;
            subwallet.sync_start_timestamp = scan_timestamp;
        }
    }
}

impl std::fmt::Debug for SubWallets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubWallets")
            .field("is_view_wallet", &self.is_view_wallet)
            .field("subwallets", &self.subwallets.len())
            .field("transactions", &self.transactions.len())
            .field(
                "unconfirmed_transactions",
                &self.unconfirmed_transactions.len(),
            )
            .field("key_images", &self.key_image_owners.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::crypto::SoftwareCrypto;

    fn store() -> SubWallets {
        let crypto = SoftwareCrypto;
        let (_, view) = crypto.generate_key_pair();
        let (_, spend) = crypto.generate_key_pair();
        SubWallets::new(Arc::new(SoftwareCrypto), view, spend, 0, 0).unwrap()
    }

    fn input_for(owner: &PublicKey, key_image: u8, amount: u64, height: u64) -> TransactionInput {
        let _ = owner;
        TransactionInput {
            key_image: KeyImage::from_bytes([key_image; 32]),
            amount,
            block_height: height,
            transaction_public_key: PublicKey::NULL,
            transaction_index: u64::from(key_image),
            global_output_index: Some(0),
            key: PublicKey::from_bytes([key_image; 32]),
            spend_height: 0,
            unlock_time: 0,
            parent_transaction_hash: Hash256::from_bytes([key_image; 32]),
            private_ephemeral: SecretKey::NULL,
        }
    }

    #[test]
    fn key_image_appears_exactly_once() {
        let mut store = store();
        let owner = store.primary_public_spend_key();
        let key_image = KeyImage::from_bytes([1; 32]);
        store
            .store_transaction_input(&owner, input_for(&owner, 1, 100, 10))
            .unwrap();
        assert_eq!(store.get_key_image_owner(&key_image), Some(owner));

        // Re-storing the same output does not duplicate it.
        store
            .store_transaction_input(&owner, input_for(&owner, 1, 100, 10))
            .unwrap();
        assert_eq!(store.subwallets[&owner].unspent_inputs.len(), 1);

        store.mark_input_as_spent(&owner, &key_image, 20);
        let subwallet = &store.subwallets[&owner];
        assert_eq!(subwallet.unspent_inputs.len(), 0);
        assert_eq!(subwallet.spent_inputs.len(), 1);
        assert_eq!(subwallet.spent_inputs[0].spend_height, 20);
    }

    #[test]
    fn balance_law_holds() {
        let mut store = store();
        let owner = store.primary_public_spend_key();
        store
            .store_transaction_input(&owner, input_for(&owner, 1, 100, 10))
            .unwrap();
        let mut locked_input = input_for(&owner, 2, 200, 10);
        locked_input.unlock_time = 1_000;
        store.store_transaction_input(&owner, locked_input).unwrap();

        let (unlocked, locked) = store.get_balance(50, None).unwrap();
        assert_eq!(unlocked, 100);
        assert_eq!(locked, 200);
        assert_eq!(unlocked + locked, 300);
    }

    #[test]
    fn balance_filter_rejects_unknown_subwallet() {
        let store = store();
        let unknown = PublicKey::from_bytes([9; 32]);
        assert!(matches!(
            store.get_balance(10, Some(&[unknown])),
            Err(WalletError::SubwalletNotFound(_))
        ));
    }

    #[test]
    fn fork_rollback_reverts_spends_and_removes_inputs() {
        let mut store = store();
        let owner = store.primary_public_spend_key();
        store
            .store_transaction_input(&owner, input_for(&owner, 1, 100, 10))
            .unwrap();
        store
            .store_transaction_input(&owner, input_for(&owner, 2, 200, 45))
            .unwrap();
        store.mark_input_as_spent(&owner, &KeyImage::from_bytes([1; 32]), 44);
        store.add_transaction(Transaction {
            transfers: HashMap::from([(owner, 200)]),
            hash: Hash256::from_bytes([7; 32]),
            fee: 0,
            block_height: 45,
            timestamp: 0,
            payment_id: String::new(),
            unlock_time: 0,
            is_coinbase: false,
        });

        store.remove_forked_transactions(42);

        assert!(store.get_transactions().is_empty());
        let subwallet = &store.subwallets[&owner];
        assert!(subwallet
            .unspent_inputs
            .iter()
            .all(|input| input.block_height < 42 && input.is_unspent()));
        assert_eq!(subwallet.unspent_inputs.len(), 1);
        assert!(subwallet.spent_inputs.is_empty());
        assert_eq!(
            store.get_key_image_owner(&KeyImage::from_bytes([2; 32])),
            None
        );
    }

    #[test]
    fn cancellation_unlocks_inputs() {
        let mut store = store();
        let owner = store.primary_public_spend_key();
        let key_image = KeyImage::from_bytes([1; 32]);
        store
            .store_transaction_input(&owner, input_for(&owner, 1, 100, 10))
            .unwrap();

        let hash = Hash256::from_bytes([0xaa; 32]);
        store.add_unconfirmed_transaction(Transaction {
            transfers: HashMap::from([(owner, -100)]),
            hash,
            fee: 10,
            block_height: 0,
            timestamp: 0,
            payment_id: String::new(),
            unlock_time: 0,
            is_coinbase: false,
        });
        store.mark_input_as_locked(&owner, &key_image, hash).unwrap();
        assert_eq!(store.get_balance(50, None).unwrap(), (0, 0));
        assert_eq!(store.get_locked_transaction_hashes(), vec![hash]);
        assert_eq!(store.get_unconfirmed_transactions(None, true).len(), 1);

        store.remove_cancelled_transaction(&hash);
        assert_eq!(store.get_balance(50, None).unwrap(), (100, 0));
        assert!(store.get_locked_transaction_hashes().is_empty());
        assert!(store.get_unconfirmed_transactions(None, true).is_empty());
    }

    #[test]
    fn confirmation_promotes_unconfirmed() {
        let mut store = store();
        let owner = store.primary_public_spend_key();
        let hash = Hash256::from_bytes([0xaa; 32]);
        store.add_unconfirmed_transaction(Transaction {
            transfers: HashMap::from([(owner, -100)]),
            hash,
            fee: 10,
            block_height: 0,
            timestamp: 0,
            payment_id: String::new(),
            unlock_time: 0,
            is_coinbase: false,
        });

        store.add_transaction(Transaction {
            transfers: HashMap::from([(owner, -100)]),
            hash,
            fee: 10,
            block_height: 60,
            timestamp: 0,
            payment_id: String::new(),
            unlock_time: 0,
            is_coinbase: false,
        });

        assert!(store.get_locked_transaction_hashes().is_empty());
        assert!(store.get_unconfirmed_transactions(None, true).is_empty());
        assert_eq!(store.get_transactions().len(), 1);
        assert_eq!(store.get_transactions()[0].block_height, 60);
    }

    #[test]
    fn subwallet_management() {
        let mut store = store();
        let crypto = SoftwareCrypto;
        let (_, extra_spend) = crypto.generate_key_pair();
        let extra = store.add_subwallet(extra_spend, 0, 0).unwrap();
        assert_eq!(store.get_public_spend_keys().len(), 2);
        assert!(matches!(
            store.add_subwallet(extra_spend, 0, 0),
            Err(WalletError::SubwalletAlreadyExists(_))
        ));

        assert!(matches!(
            store.delete_subwallet(&store.primary_public_spend_key()),
            Err(WalletError::CannotDeletePrimary)
        ));
        store.delete_subwallet(&extra).unwrap();
        assert_eq!(store.get_public_spend_keys().len(), 1);
    }

    #[test]
    fn view_wallet_rejects_spend_subwallets() {
        let crypto = SoftwareCrypto;
        let (_, view) = crypto.generate_key_pair();
        let (spend_public, spend_secret) = crypto.generate_key_pair();
        let mut store =
            SubWallets::new_view(Arc::new(SoftwareCrypto), view, spend_public, 0, 0);
        assert!(matches!(
            store.add_subwallet(spend_secret, 0, 0),
            Err(WalletError::IllegalViewWalletOperation)
        ));
    }

    #[test]
    fn timestamp_conversion_updates_matching_subwallets() {
        let crypto = SoftwareCrypto;
        let (_, view) = crypto.generate_key_pair();
        let (_, spend) = crypto.generate_key_pair();
        let mut store =
            SubWallets::new(Arc::new(SoftwareCrypto), view, spend, 0, 1_600_000_000).unwrap();
        store.convert_sync_timestamp_to_height(1_600_000_000, 123);
        let subwallet = &store.subwallets[&store.primary_public_spend_key()];
        assert_eq!(subwallet.sync_start_height, 123);
        assert_eq!(subwallet.sync_start_timestamp, 0);
    }
}
