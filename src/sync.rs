//! Per-block synchronization.
//!
//! [`WalletSynchronizer`] drives one sync tick: pull buffered blocks from the
//! pipeline, roll back forks, scan outputs, back-fill global indexes, commit
//! the attributed results atomically, record the block processed, then emit
//! events, yielding between blocks so consumers stay responsive. It also
//! runs the locked-transaction cancellation protocol.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::config::WalletConfig;
use crate::daemon::Daemon;
use crate::data::Block;
use crate::error::{ScanError, SyncError};
use crate::events::WalletEvent;
use crate::primitives::{Hash256, PublicKey};
use crate::scan;
use crate::subwallets::SubWallets;
use crate::sync::pipeline::BlockDownloader;
use crate::sync::status::CHECKPOINT_INTERVAL;

pub(crate) mod pipeline;
pub mod status;

/// Reorgs deeper than this are impossible by policy; spent inputs older than
/// this many blocks are garbage-collected.
const PRUNE_DEPTH: u64 = 5000;

/// Global indexes are requested for a height window rounded to this multiple,
/// obscuring which block the wallet cares about.
const GLOBAL_INDEXES_OBSCURITY: u64 = 10;

/// Consecutive "missing" responses before a locked transaction is presumed
/// dropped from the network.
const CANCELLED_FAILURE_THRESHOLD: u32 = 10;

/// The wallet, daemon-local and network heights, shared across tasks.
#[derive(Debug, Default)]
pub(crate) struct Heights {
    /// Height the wallet has processed to.
    pub wallet: AtomicU64,
    /// The daemon's own chain height.
    pub local: AtomicU64,
    /// The network height the daemon reports.
    pub network: AtomicU64,
}

impl Heights {
    pub(crate) fn wallet_height(&self) -> u64 {
        self.wallet.load(Ordering::SeqCst)
    }

    pub(crate) fn local_height(&self) -> u64 {
        self.local.load(Ordering::SeqCst)
    }

    pub(crate) fn network_height(&self) -> u64 {
        self.network.load(Ordering::SeqCst)
    }
}

/// Sequences pipeline, scan engine and store for each processed block.
pub(crate) struct WalletSynchronizer {
    config: Arc<WalletConfig>,
    daemon: Arc<dyn Daemon>,
    subwallets: Arc<RwLock<SubWallets>>,
    downloader: Arc<BlockDownloader>,
    heights: Arc<Heights>,
    events: broadcast::Sender<WalletEvent>,
}

impl WalletSynchronizer {
    pub(crate) fn new(
        config: Arc<WalletConfig>,
        daemon: Arc<dyn Daemon>,
        subwallets: Arc<RwLock<SubWallets>>,
        downloader: Arc<BlockDownloader>,
        heights: Arc<Heights>,
        events: broadcast::Sender<WalletEvent>,
    ) -> Self {
        Self {
            config,
            daemon,
            subwallets,
            downloader,
            heights,
            events,
        }
    }

    /// One sync tick: fetch up to `blocks_per_tick` blocks and process each,
    /// yielding cooperatively between blocks.
    pub(crate) async fn tick(&self) {
        let outcome = self
            .downloader
            .fetch_blocks(self.config.blocks_per_tick)
            .await;

        if let Some((timestamp, height)) = self.downloader.take_timestamp_conversion().await {
            self.subwallets
                .write()
                .await
                .convert_sync_timestamp_to_height(timestamp, height);
        }

        for block in outcome.blocks {
            let height = block.height;
            if let Err(e) = self.process_block(block).await {
                // The block stays buffered; the next tick retries it.
                tracing::error!("failed to process block {height}. {e}");
                break;
            }
            tokio::task::yield_now().await;
        }
    }

    async fn process_block(&self, block: Block) -> Result<(), SyncError> {
        let _ = self.events.send(WalletEvent::RawBlock(block.clone()));
        for transaction in block.raw_transactions() {
            let _ = self
                .events
                .send(WalletEvent::RawTransaction(transaction.clone()));
        }

        let fork = self.downloader.have_processed_blocks().await
            && block.height <= self.downloader.last_known_block_height().await;

        let (private_view_key, scanning_keys, is_view_wallet) = {
            let mut wallet = self.subwallets.write().await;
            if fork {
                tracing::info!(
                    height = block.height,
                    hash = %block.hash,
                    "chain fork observed, rolling back"
                );
                wallet.remove_forked_transactions(block.height);
            }
            (
                *wallet.private_view_key(),
                wallet.scanning_keys(),
                wallet.is_view_wallet(),
            )
        };

        let mut owned_inputs = scan::process_block_outputs(
            &block,
            &private_view_key,
            &scanning_keys,
            is_view_wallet,
            self.config.scan_coinbase_transactions,
            self.config.crypto.as_ref(),
        )?;

        if !is_view_wallet
            && owned_inputs
                .iter()
                .any(|(_, input)| input.global_output_index.is_none())
        {
            self.fill_global_indexes(block.height, &mut owned_inputs)
                .await?;
        }

        let added = {
            let mut wallet = self.subwallets.write().await;
            let data = scan::process_block(&block, &owned_inputs, &wallet);
            let added = wallet.apply_transaction_data(data, block.height);
            if block.height != 0 && block.height % CHECKPOINT_INTERVAL == 0 {
                wallet.prune_spent_inputs(block.height.saturating_sub(PRUNE_DEPTH));
            }
            added
        };

        if self.downloader.drop_block(block.height, block.hash).await {
            let downloader = self.downloader.clone();
            tokio::spawn(async move {
                downloader.download_blocks().await;
            });
        }

        for transaction in added {
            let _ = self
                .events
                .send(WalletEvent::Transaction(transaction.clone()));
            let direction = match transaction.total_amount() {
                amount if amount > 0 => WalletEvent::IncomingTransaction(transaction),
                amount if amount < 0 => WalletEvent::OutgoingTransaction(transaction),
                _ => WalletEvent::FusionTransaction(transaction),
            };
            let _ = self.events.send(direction);
        }
        let _ = self.events.send(WalletEvent::HeightChange {
            wallet_height: block.height,
            local_height: self.heights.local_height(),
            network_height: self.heights.network_height(),
        });

        Ok(())
    }

    /// Fetches global indexes for an obscured window around `block_height`
    /// and fills the scanned inputs. A missing entry aborts the scan.
    async fn fill_global_indexes(
        &self,
        block_height: u64,
        owned_inputs: &mut [(PublicKey, crate::data::TransactionInput)],
    ) -> Result<(), SyncError> {
        let lower = block_height - (block_height % GLOBAL_INDEXES_OBSCURITY);
        let upper = lower + GLOBAL_INDEXES_OBSCURITY;
        let indexes = self
            .daemon
            .get_global_indexes_for_range(lower, upper)
            .await?;

        for (_, input) in owned_inputs.iter_mut() {
            if input.global_output_index.is_some() {
                continue;
            }
            let found = indexes
                .get(&input.parent_transaction_hash)
                .and_then(|transaction_indexes| {
                    transaction_indexes.get(input.transaction_index as usize)
                })
                .copied();
            match found {
                Some(global_index) => input.global_output_index = Some(global_index),
                None => {
                    return Err(ScanError::MissingGlobalIndexes {
                        transaction: input.parent_transaction_hash,
                        output_index: input.transaction_index,
                    }
                    .into())
                }
            }
        }
        Ok(())
    }

    /// One round of the locked-transaction cancellation protocol.
    ///
    /// Every locked hash the daemon reports missing gains a strike; at
    /// [`CANCELLED_FAILURE_THRESHOLD`] consecutive strikes the transaction is
    /// presumed dropped and reversed. A hash that reappears resets its
    /// counter.
    pub(crate) async fn check_locked_transactions(
        &self,
        failure_counts: &mut HashMap<Hash256, u32>,
    ) {
        let locked = self
            .subwallets
            .read()
            .await
            .get_locked_transaction_hashes();
        if locked.is_empty() {
            failure_counts.clear();
            return;
        }

        let cancelled = match self.daemon.get_cancelled_transactions(locked.clone()).await {
            Ok(cancelled) => cancelled,
            Err(e) => {
                tracing::warn!("failed to check locked transaction status. {e}");
                return;
            }
        };

        failure_counts.retain(|hash, _| locked.contains(hash));

        let mut presumed_dropped = Vec::new();
        for hash in locked {
            if cancelled.contains(&hash) {
                let strikes = failure_counts.entry(hash).or_insert(0);
                *strikes += 1;
                if *strikes >= CANCELLED_FAILURE_THRESHOLD {
                    presumed_dropped.push(hash);
                }
            } else {
                failure_counts.remove(&hash);
            }
        }

        if !presumed_dropped.is_empty() {
            let mut wallet = self.subwallets.write().await;
            for hash in presumed_dropped {
                tracing::warn!(%hash, "locked transaction presumed dropped, reversing");
                wallet.remove_cancelled_transaction(&hash);
                failure_counts.remove(&hash);
            }
        }
    }
}
