//! Test utilities: a scriptable in-memory daemon and fixture builders.
//!
//! [`MockDaemon`] serves a configurable chain through the [`Daemon`] seam,
//! resuming from checkpoints the way a real node does, with switches for
//! failure injection, held (in-flight) requests, stripped global indexes and
//! scripted mempool answers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::crypto::CryptoProvider;
use crate::daemon::{Daemon, DaemonInfo, FeeInfo, RandomOutput, RandomOutputs, SyncData};
use crate::data::{Block, KeyOutput, RawTransaction, TopBlock};
use crate::error::NodeError;
use crate::primitives::{Hash256, PublicKey};

#[derive(Default)]
struct MockState {
    chain: Vec<Block>,
    info: DaemonInfo,
    fee: FeeInfo,
    fail_sync_data: bool,
    fail_info: bool,
    hold_sync_data: Option<Arc<Notify>>,
    strip_global_indexes: bool,
    global_indexes: HashMap<Hash256, Vec<u64>>,
    global_index_requests: u32,
    sync_data_requests: u32,
    not_found: Vec<Hash256>,
    reject_submit: Option<(i64, String)>,
    submitted: Vec<String>,
}

/// A daemon backed by an in-memory chain.
#[derive(Default)]
pub struct MockDaemon {
    state: Mutex<MockState>,
}

impl MockDaemon {
    /// An empty daemon; script it with the setters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the served chain. Replacing a suffix with different blocks
    /// simulates a reorg.
    pub fn set_chain(&self, chain: Vec<Block>) {
        self.state.lock().expect("lock poisoned").chain = chain;
    }

    /// Sets the `/info` response.
    pub fn set_info(&self, info: DaemonInfo) {
        self.state.lock().expect("lock poisoned").info = info;
    }

    /// Sets the `/fee` response.
    pub fn set_fee(&self, fee: FeeInfo) {
        self.state.lock().expect("lock poisoned").fee = fee;
    }

    /// Makes every sync data request fail until switched back off.
    pub fn fail_sync_data(&self, fail: bool) {
        self.state.lock().expect("lock poisoned").fail_sync_data = fail;
    }

    /// Makes every info request fail until switched back off.
    pub fn fail_info(&self, fail: bool) {
        self.state.lock().expect("lock poisoned").fail_info = fail;
    }

    /// Holds every sync data request until the returned handle is notified.
    pub fn hold_sync_data(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().expect("lock poisoned").hold_sync_data = Some(gate.clone());
        gate
    }

    /// Stops holding sync data requests.
    pub fn clear_hold(&self) {
        self.state.lock().expect("lock poisoned").hold_sync_data = None;
    }

    /// Serves blocks with their output global indexes removed, forcing the
    /// wallet to back-fill them.
    pub fn strip_global_indexes(&self, strip: bool) {
        self.state.lock().expect("lock poisoned").strip_global_indexes = strip;
    }

    /// Sets the `/indexes` response map.
    pub fn set_global_indexes(&self, indexes: HashMap<Hash256, Vec<u64>>) {
        self.state.lock().expect("lock poisoned").global_indexes = indexes;
    }

    /// Sets which hashes `/transaction/status` reports unknown.
    pub fn set_not_found(&self, hashes: Vec<Hash256>) {
        self.state.lock().expect("lock poisoned").not_found = hashes;
    }

    /// Makes transaction submission fail with the given daemon error.
    pub fn reject_submit(&self, code: i64, message: impl Into<String>) {
        self.state.lock().expect("lock poisoned").reject_submit = Some((code, message.into()));
    }

    /// Raw payloads submitted so far.
    #[must_use]
    pub fn submitted(&self) -> Vec<String> {
        self.state.lock().expect("lock poisoned").submitted.clone()
    }

    /// Number of sync data requests served or failed.
    #[must_use]
    pub fn sync_data_requests(&self) -> u32 {
        self.state.lock().expect("lock poisoned").sync_data_requests
    }

    /// Number of global index range requests served.
    #[must_use]
    pub fn global_index_requests(&self) -> u32 {
        self.state.lock().expect("lock poisoned").global_index_requests
    }
}

#[async_trait]
impl Daemon for MockDaemon {
    async fn init(&self) -> Result<(), NodeError> {
        Ok(())
    }

    async fn get_info(&self) -> Result<DaemonInfo, NodeError> {
        let state = self.state.lock().expect("lock poisoned");
        if state.fail_info {
            return Err(NodeError::MalformedResponse(
                "scripted info failure".to_string(),
            ));
        }
        Ok(state.info)
    }

    async fn get_fee_info(&self) -> Result<FeeInfo, NodeError> {
        Ok(self.state.lock().expect("lock poisoned").fee.clone())
    }

    async fn get_wallet_sync_data(
        &self,
        checkpoints: Vec<Hash256>,
        start_height: u64,
        start_timestamp: u64,
        block_count: u64,
        skip_coinbase: bool,
    ) -> Result<SyncData, NodeError> {
        let gate = self
            .state
            .lock()
            .expect("lock poisoned")
            .hold_sync_data
            .clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock().expect("lock poisoned");
        state.sync_data_requests += 1;
        if state.fail_sync_data {
            return Err(NodeError::MalformedResponse(
                "scripted sync failure".to_string(),
            ));
        }

        // Resume from the newest checkpoint on our chain, like a real node
        // finding the most recent common ancestor.
        let mut start_index = None;
        for checkpoint in &checkpoints {
            if let Some(position) = state
                .chain
                .iter()
                .position(|block| block.hash == *checkpoint)
            {
                start_index = Some(position + 1);
                break;
            }
        }
        let start_index = start_index.unwrap_or_else(|| {
            if start_timestamp != 0 {
                0
            } else {
                state
                    .chain
                    .iter()
                    .position(|block| block.height >= start_height)
                    .unwrap_or(state.chain.len())
            }
        });

        let mut blocks: Vec<Block> = state
            .chain
            .iter()
            .skip(start_index)
            .take(block_count as usize)
            .cloned()
            .collect();
        if state.strip_global_indexes {
            for block in &mut blocks {
                for transaction in block
                    .coinbase
                    .iter_mut()
                    .chain(block.transactions.iter_mut())
                {
                    for output in &mut transaction.key_outputs {
                        output.global_index = None;
                    }
                }
            }
        }
        if skip_coinbase {
            for block in &mut blocks {
                block.coinbase = None;
            }
        }

        if blocks.is_empty() {
            Ok(SyncData {
                blocks,
                top_block: state.chain.last().map(|block| TopBlock {
                    height: block.height,
                    hash: block.hash,
                }),
                synced: true,
            })
        } else {
            Ok(SyncData {
                blocks,
                top_block: None,
                synced: false,
            })
        }
    }

    async fn get_global_indexes_for_range(
        &self,
        start_height: u64,
        end_height: u64,
    ) -> Result<HashMap<Hash256, Vec<u64>>, NodeError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.global_index_requests += 1;
        let _ = (start_height, end_height);
        Ok(state.global_indexes.clone())
    }

    async fn get_cancelled_transactions(
        &self,
        transaction_hashes: Vec<Hash256>,
    ) -> Result<Vec<Hash256>, NodeError> {
        let state = self.state.lock().expect("lock poisoned");
        Ok(transaction_hashes
            .into_iter()
            .filter(|hash| state.not_found.contains(hash))
            .collect())
    }

    async fn get_random_outputs_by_amount(
        &self,
        amounts: Vec<u64>,
        count: u64,
    ) -> Result<Vec<RandomOutputs>, NodeError> {
        Ok(amounts
            .into_iter()
            .map(|amount| RandomOutputs {
                amount,
                outputs: (0..count)
                    .map(|index| RandomOutput {
                        index,
                        key: PublicKey::from_bytes([index as u8; 32]),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn submit_transaction(&self, raw_transaction: &str) -> Result<(), NodeError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some((code, message)) = state.reject_submit.clone() {
            return Err(NodeError::Rejected { code, message });
        }
        state.submitted.push(raw_transaction.to_string());
        Ok(())
    }
}

/// A block with a deterministic, height-derived hash.
#[must_use]
pub fn mock_block(height: u64, transactions: Vec<RawTransaction>) -> Block {
    mock_block_with_tag(height, 0, transactions)
}

/// A block whose hash also depends on `tag`, so two candidate blocks at the
/// same height differ, as in a fork.
#[must_use]
pub fn mock_block_with_tag(height: u64, tag: u8, transactions: Vec<RawTransaction>) -> Block {
    let crypto = crate::crypto::SoftwareCrypto;
    let mut seed = Vec::with_capacity(13);
    seed.extend_from_slice(b"block");
    seed.extend_from_slice(&height.to_le_bytes());
    seed.push(tag);
    Block {
        height,
        hash: crypto.cn_fast_hash(&seed),
        timestamp: 1_600_000_000 + height * 30,
        coinbase: None,
        transactions,
    }
}

/// A transaction paying `amount` to the subwallet identified by
/// `(view_public, spend_public)`, as a sender would construct it.
#[must_use]
pub fn transaction_to(
    crypto: &dyn CryptoProvider,
    view_public: &PublicKey,
    spend_public: &PublicKey,
    amount: u64,
) -> RawTransaction {
    let (tx_public, tx_secret) = crypto.generate_key_pair();
    let derivation = crypto
        .generate_key_derivation(view_public, &tx_secret)
        .expect("valid view key");
    let output_key = crypto
        .derive_public_key(&derivation, 0, spend_public)
        .expect("valid spend key");
    RawTransaction {
        hash: crypto.cn_fast_hash(output_key.as_bytes()),
        public_key: tx_public,
        unlock_time: 0,
        payment_id: String::new(),
        key_outputs: vec![KeyOutput {
            key: output_key,
            amount,
            global_index: Some(0),
        }],
        key_inputs: Vec::new(),
    }
}
