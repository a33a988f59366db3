//! A single subwallet and its input sets.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::data::{TransactionInput, MAX_BLOCK_NUMBER};
use crate::primitives::{KeyImage, PublicKey, SecretKey};

/// Evaluates the unlock rule for an input.
///
/// Unlock times at or above [`MAX_BLOCK_NUMBER`] are wall-clock timestamps;
/// below, they are block heights, satisfied once `current_height + 1` reaches
/// them.
#[must_use]
pub fn is_input_unlocked(unlock_time: u64, current_height: u64) -> bool {
    if unlock_time == 0 {
        return true;
    }
    if unlock_time >= MAX_BLOCK_NUMBER {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        now >= unlock_time
    } else {
        current_height + 1 >= unlock_time
    }
}

/// One (public, optionally private) spend key pair and the inputs it owns.
///
/// A key image appears in exactly one of the three input sets. `unspent`
/// holds spendable funds, `locked` holds inputs consumed by a not yet
/// confirmed outgoing transaction, `spent` holds inputs seen spent on chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubWallet {
    /// The public spend key identifying this subwallet.
    pub public_spend_key: PublicKey,
    /// The private spend key; `None` for watch-only subwallets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_spend_key: Option<SecretKey>,
    /// Inputs available to spend.
    pub unspent_inputs: Vec<TransactionInput>,
    /// Inputs consumed by an unconfirmed outgoing transaction.
    pub locked_inputs: Vec<TransactionInput>,
    /// Inputs spent on chain.
    pub spent_inputs: Vec<TransactionInput>,
    /// Height scanning starts from for this subwallet.
    pub sync_start_height: u64,
    /// Timestamp scanning starts from, until converted to a height.
    pub sync_start_timestamp: u64,
    /// Whether this is the wallet's primary subwallet.
    #[serde(default)]
    pub is_primary: bool,
}

impl SubWallet {
    pub(crate) fn new(
        public_spend_key: PublicKey,
        private_spend_key: Option<SecretKey>,
        sync_start_height: u64,
        sync_start_timestamp: u64,
        is_primary: bool,
    ) -> Self {
        Self {
            public_spend_key,
            private_spend_key,
            unspent_inputs: Vec::new(),
            locked_inputs: Vec::new(),
            spent_inputs: Vec::new(),
            sync_start_height,
            sync_start_timestamp,
            is_primary,
        }
    }

    fn all_inputs(&self) -> impl Iterator<Item = &TransactionInput> {
        self.unspent_inputs
            .iter()
            .chain(self.locked_inputs.iter())
            .chain(self.spent_inputs.iter())
    }

    /// `true` if an input from the same transaction output already exists.
    pub(crate) fn contains_input(&self, input: &TransactionInput) -> bool {
        self.all_inputs().any(|existing| {
            existing.parent_transaction_hash == input.parent_transaction_hash
                && existing.transaction_index == input.transaction_index
        })
    }

    /// Stores a freshly scanned input, in block order of discovery.
    /// Duplicates (fork re-scans) are ignored.
    pub(crate) fn store_input(&mut self, input: TransactionInput) -> bool {
        if self.contains_input(&input) {
            return false;
        }
        self.unspent_inputs.push(input);
        true
    }

    /// Moves the input with `key_image` to the spent set.
    pub(crate) fn mark_spent(&mut self, key_image: &KeyImage, spend_height: u64) -> bool {
        let from_unspent = take_input(&mut self.unspent_inputs, key_image);
        let from_locked = from_unspent
            .is_none()
            .then(|| take_input(&mut self.locked_inputs, key_image))
            .flatten();
        match from_unspent.or(from_locked) {
            Some(mut input) => {
                input.spend_height = spend_height;
                self.spent_inputs.push(input);
                true
            }
            None => false,
        }
    }

    /// Moves an unspent input to the locked set, pending confirmation of the
    /// outgoing transaction consuming it.
    pub(crate) fn lock_input(&mut self, key_image: &KeyImage) -> bool {
        match take_input(&mut self.unspent_inputs, key_image) {
            Some(input) => {
                self.locked_inputs.push(input);
                true
            }
            None => false,
        }
    }

    /// Returns a locked input to the unspent set after its consuming
    /// transaction was cancelled.
    pub(crate) fn unlock_input(&mut self, key_image: &KeyImage) -> bool {
        match take_input(&mut self.locked_inputs, key_image) {
            Some(mut input) => {
                input.spend_height = 0;
                self.unspent_inputs.push(input);
                true
            }
            None => false,
        }
    }

    /// Sums unspent inputs into (unlocked, locked) by the unlock rule.
    #[must_use]
    pub fn balance(&self, current_height: u64) -> (u64, u64) {
        let mut unlocked = 0;
        let mut locked = 0;
        for input in &self.unspent_inputs {
            if is_input_unlocked(input.unlock_time, current_height) {
                unlocked += input.amount;
            } else {
                locked += input.amount;
            }
        }
        (unlocked, locked)
    }

    /// Discards inputs created at or above `height` and reverts spends
    /// recorded at or above it. Returns the key images of discarded inputs.
    pub(crate) fn remove_forked_inputs(&mut self, height: u64) -> Vec<KeyImage> {
        let mut removed = Vec::new();
        for inputs in [
            &mut self.unspent_inputs,
            &mut self.locked_inputs,
            &mut self.spent_inputs,
        ] {
            inputs.retain(|input| {
                if input.block_height >= height {
                    removed.push(input.key_image);
                    false
                } else {
                    true
                }
            });
        }
        let mut reverted: Vec<TransactionInput> = Vec::new();
        self.spent_inputs.retain(|input| {
            if input.spend_height >= height {
                reverted.push(input.clone());
                false
            } else {
                true
            }
        });
        for mut input in reverted {
            input.spend_height = 0;
            self.unspent_inputs.push(input);
        }
        removed
    }

    /// Garbage-collects spent inputs older than `minimum_spend_height`.
    /// Returns the key images of pruned inputs.
    pub(crate) fn prune_spent_inputs(&mut self, minimum_spend_height: u64) -> Vec<KeyImage> {
        let mut pruned = Vec::new();
        self.spent_inputs.retain(|input| {
            if input.spend_height < minimum_spend_height {
                pruned.push(input.key_image);
                false
            } else {
                true
            }
        });
        pruned
    }

    /// Key images across all input sets.
    pub(crate) fn key_images(&self) -> Vec<KeyImage> {
        self.all_inputs().map(|input| input.key_image).collect()
    }
}

fn take_input(inputs: &mut Vec<TransactionInput>, key_image: &KeyImage) -> Option<TransactionInput> {
    let position = inputs.iter().position(|input| input.key_image == *key_image)?;
    Some(inputs.remove(position))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::primitives::Hash256;

    fn input(key_image: u8, amount: u64, block_height: u64, unlock_time: u64) -> TransactionInput {
        TransactionInput {
            key_image: KeyImage::from_bytes([key_image; 32]),
            amount,
            block_height,
            transaction_public_key: PublicKey::NULL,
            transaction_index: u64::from(key_image),
            global_output_index: Some(0),
            key: PublicKey::from_bytes([key_image; 32]),
            spend_height: 0,
            unlock_time,
            parent_transaction_hash: Hash256::from_bytes([key_image; 32]),
            private_ephemeral: SecretKey::NULL,
        }
    }

    fn subwallet() -> SubWallet {
        SubWallet::new(PublicKey::from_bytes([1; 32]), None, 0, 0, true)
    }

    #[test]
    fn unlock_rule() {
        assert!(is_input_unlocked(0, 0));
        // Height rule: unlocked once current + 1 reaches the target.
        assert!(!is_input_unlocked(100, 98));
        assert!(is_input_unlocked(100, 99));
        // Timestamp rule: far future stays locked, past unlocks.
        assert!(!is_input_unlocked(u64::MAX, 0));
        assert!(is_input_unlocked(MAX_BLOCK_NUMBER + 1, 0));
    }

    #[test]
    fn spend_and_fork_revert() {
        let mut wallet = subwallet();
        wallet.store_input(input(1, 100, 10, 0));
        wallet.store_input(input(2, 200, 11, 0));

        assert!(wallet.mark_spent(&KeyImage::from_bytes([1; 32]), 20));
        assert_eq!(wallet.balance(30), (200, 0));
        assert_eq!(wallet.spent_inputs.len(), 1);

        // Fork below the spend height reverts the spend but keeps the input.
        let removed = wallet.remove_forked_inputs(15);
        assert!(removed.is_empty());
        assert_eq!(wallet.balance(30), (300, 0));
        assert!(wallet.unspent_inputs.iter().all(TransactionInput::is_unspent));

        // Fork below the creation heights removes the inputs entirely.
        let removed = wallet.remove_forked_inputs(10);
        assert_eq!(removed.len(), 2);
        assert_eq!(wallet.balance(30), (0, 0));
    }

    #[test]
    fn duplicate_inputs_are_ignored() {
        let mut wallet = subwallet();
        assert!(wallet.store_input(input(1, 100, 10, 0)));
        assert!(!wallet.store_input(input(1, 100, 10, 0)));
        assert_eq!(wallet.unspent_inputs.len(), 1);
    }

    #[test]
    fn lock_unlock_round_trip() {
        let mut wallet = subwallet();
        wallet.store_input(input(1, 100, 10, 0));
        let key_image = KeyImage::from_bytes([1; 32]);

        assert!(wallet.lock_input(&key_image));
        assert_eq!(wallet.balance(20), (0, 0));
        assert!(wallet.unlock_input(&key_image));
        assert_eq!(wallet.balance(20), (100, 0));
    }

    #[test]
    fn locked_by_unlock_time() {
        let mut wallet = subwallet();
        wallet.store_input(input(1, 100, 10, 500));
        assert_eq!(wallet.balance(100), (0, 100));
        assert_eq!(wallet.balance(499), (100, 0));
    }

    #[test]
    fn prune_discards_old_spends_only() {
        let mut wallet = subwallet();
        wallet.store_input(input(1, 100, 10, 0));
        wallet.store_input(input(2, 200, 11, 0));
        wallet.mark_spent(&KeyImage::from_bytes([1; 32]), 100);
        wallet.mark_spent(&KeyImage::from_bytes([2; 32]), 6000);

        let pruned = wallet.prune_spent_inputs(5000);
        assert_eq!(pruned, vec![KeyImage::from_bytes([1; 32])]);
        assert_eq!(wallet.spent_inputs.len(), 1);
    }
}
