//! Bounded block prefetch pipeline.
//!
//! One download is in flight at a time, guarded by the `fetching` flag. A
//! `reset`/`rewind` issued while a download is in flight is queued and applied
//! exactly once, just after the in-flight request resolves, so late blocks can
//! never land in a freshly cleared store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::time::Instant;

use crate::config::WalletConfig;
use crate::daemon::Daemon;
use crate::data::Block;
use crate::events::WalletEvent;
use crate::primitives::Hash256;
use crate::sync::status::{SyncStatus, RECENT_HASHES_SIZE};
use crate::sync::Heights;

/// The memory-limit check is amortized to once per this many dropped blocks.
const SIZE_CHECK_INTERVAL: u64 = 10;

/// Outcome of one download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DownloadStatus {
    /// New blocks were appended to the buffer.
    Downloaded,
    /// Another download was already in flight.
    Busy,
    /// The request failed; batch size was backed off.
    Failed,
    /// The daemon had nothing newer; the wallet is at the chain tip.
    Synced,
    /// The daemon's response trailed the known network height; ignored.
    Stale,
}

/// What a sync tick receives from the pipeline.
#[derive(Debug, Default)]
pub(crate) struct FetchOutcome {
    /// Up to the requested number of buffered blocks, oldest first. The
    /// blocks stay buffered until [`BlockDownloader::drop_block`].
    pub blocks: Vec<Block>,
    /// `true` when the tick should idle: synced, failed or busy.
    pub should_sleep: bool,
}

#[derive(Debug, Clone, Copy)]
enum ResetAction {
    Reset { height: u64, timestamp: u64 },
    Rewind { height: u64 },
}

struct PendingReset {
    action: ResetAction,
    waiters: Vec<oneshot::Sender<()>>,
}

struct DownloaderState {
    stored_blocks: VecDeque<Block>,
    stored_size: usize,
    status: SyncStatus,
    start_height: u64,
    start_timestamp: u64,
    fetching: bool,
    pending_reset: Option<PendingReset>,
    batch_size: u64,
    last_successful_fetch: Instant,
    drop_counter: u64,
    /// Set once when the daemon resolves a scan-start timestamp to a height,
    /// for the store to re-point its subwallet scan heights.
    timestamp_conversion: Option<(u64, u64)>,
}

/// Prefetches blocks from the daemon into a bounded buffer and owns the
/// processed-block checkpoint log.
pub(crate) struct BlockDownloader {
    daemon: Arc<dyn Daemon>,
    config: Arc<WalletConfig>,
    heights: Arc<Heights>,
    dead_node: Arc<AtomicBool>,
    events: broadcast::Sender<WalletEvent>,
    state: Mutex<DownloaderState>,
}

impl BlockDownloader {
    pub(crate) fn new(
        daemon: Arc<dyn Daemon>,
        config: Arc<WalletConfig>,
        heights: Arc<Heights>,
        dead_node: Arc<AtomicBool>,
        events: broadcast::Sender<WalletEvent>,
        start_height: u64,
        start_timestamp: u64,
    ) -> Self {
        Self::from_status(
            daemon,
            config,
            heights,
            dead_node,
            events,
            SyncStatus::starting_at(start_height.saturating_sub(1)),
            start_height,
            start_timestamp,
        )
    }

    /// Resumes from persisted sync status.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_status(
        daemon: Arc<dyn Daemon>,
        config: Arc<WalletConfig>,
        heights: Arc<Heights>,
        dead_node: Arc<AtomicBool>,
        events: broadcast::Sender<WalletEvent>,
        status: SyncStatus,
        start_height: u64,
        start_timestamp: u64,
    ) -> Self {
        heights
            .wallet
            .store(status.last_known_block_height(), Ordering::SeqCst);
        let batch_size = config.blocks_per_daemon_request.max(1);
        Self {
            daemon,
            config,
            heights,
            dead_node,
            events,
            state: Mutex::new(DownloaderState {
                stored_blocks: VecDeque::new(),
                stored_size: 0,
                status,
                start_height,
                start_timestamp,
                fetching: false,
                pending_reset: None,
                batch_size,
                last_successful_fetch: Instant::now(),
                drop_counter: 0,
                timestamp_conversion: None,
            }),
        }
    }

    /// Height of the newest processed block.
    pub(crate) async fn last_known_block_height(&self) -> u64 {
        self.state.lock().await.status.last_known_block_height()
    }

    /// `true` once at least one block has been processed since the last
    /// reset.
    pub(crate) async fn have_processed_blocks(&self) -> bool {
        self.state.lock().await.status.have_processed_blocks()
    }

    /// Hash of the newest processed block.
    pub(crate) async fn top_hash(&self) -> Option<Hash256> {
        self.state.lock().await.status.top_hash()
    }

    /// Current adaptive batch size.
    pub(crate) async fn batch_size(&self) -> u64 {
        self.state.lock().await.batch_size
    }

    /// Takes the pending timestamp→height conversion, if one occurred.
    pub(crate) async fn take_timestamp_conversion(&self) -> Option<(u64, u64)> {
        self.state.lock().await.timestamp_conversion.take()
    }

    /// State needed to persist the synchronizer: scan start height, scan
    /// start timestamp, and the checkpoint log.
    pub(crate) async fn snapshot(&self) -> (u64, u64, SyncStatus) {
        let state = self.state.lock().await;
        (
            state.start_height,
            state.start_timestamp,
            state.status.clone(),
        )
    }

    /// Returns up to `count` buffered blocks without removing them,
    /// downloading first when the buffer is empty.
    pub(crate) async fn fetch_blocks(&self, count: usize) -> FetchOutcome {
        {
            let state = self.state.lock().await;
            if !state.stored_blocks.is_empty() {
                return FetchOutcome {
                    blocks: state.stored_blocks.iter().take(count).cloned().collect(),
                    should_sleep: false,
                };
            }
        }

        match self.download_blocks().await {
            DownloadStatus::Downloaded => {
                let state = self.state.lock().await;
                FetchOutcome {
                    blocks: state.stored_blocks.iter().take(count).cloned().collect(),
                    should_sleep: false,
                }
            }
            DownloadStatus::Busy => FetchOutcome {
                blocks: Vec::new(),
                should_sleep: false,
            },
            DownloadStatus::Failed => {
                self.check_fetch_liveness().await;
                FetchOutcome {
                    blocks: Vec::new(),
                    should_sleep: true,
                }
            }
            DownloadStatus::Synced | DownloadStatus::Stale => FetchOutcome {
                blocks: Vec::new(),
                should_sleep: true,
            },
        }
    }

    /// Runs one download attempt against the daemon.
    pub(crate) async fn download_blocks(&self) -> DownloadStatus {
        let (checkpoints, start_height, start_timestamp, batch_size) = {
            let mut state = self.state.lock().await;
            if state.fetching {
                return DownloadStatus::Busy;
            }
            state.fetching = true;
            (
                compose_checkpoints(&state),
                state.start_height,
                state.start_timestamp,
                state.batch_size,
            )
        };

        let result = self
            .daemon
            .get_wallet_sync_data(
                checkpoints,
                start_height,
                start_timestamp,
                batch_size,
                !self.config.scan_coinbase_transactions,
            )
            .await;

        let mut state = self.state.lock().await;
        let status = match result {
            Err(e) => {
                state.batch_size = (state.batch_size.div_ceil(4)).max(1);
                tracing::warn!(
                    batch_size = state.batch_size,
                    "failed to fetch sync data from daemon. {e}"
                );
                DownloadStatus::Failed
            }
            Ok(data) => {
                state.last_successful_fetch = Instant::now();
                self.dead_node.store(false, Ordering::SeqCst);
                if data.blocks.is_empty() {
                    if let Some(top) = data.top_block {
                        if state.stored_blocks.is_empty()
                            && top.height > state.status.last_known_block_height()
                        {
                            state.status.store_block_hash(top.height, top.hash);
                            self.heights.wallet.store(top.height, Ordering::SeqCst);
                            let _ = self.events.send(WalletEvent::HeightChange {
                                wallet_height: top.height,
                                local_height: self.heights.local.load(Ordering::SeqCst),
                                network_height: self.heights.network.load(Ordering::SeqCst),
                            });
                        }
                    }
                    DownloadStatus::Synced
                } else {
                    let network_height = self.heights.network.load(Ordering::SeqCst);
                    if network_height != 0
                        && network_height < state.status.last_known_block_height()
                    {
                        // The daemon trails what we have already processed;
                        // do not take its blocks.
                        DownloadStatus::Stale
                    } else {
                        if state.start_timestamp != 0 {
                            // The daemon converted the timestamp to a height
                            // for us; subsequent requests resume by checkpoint.
                            state.timestamp_conversion =
                                Some((state.start_timestamp, data.blocks[0].height));
                            state.start_timestamp = 0;
                        }
                        tracing::debug!(
                            count = data.blocks.len(),
                            first_height = data.blocks[0].height,
                            "downloaded blocks"
                        );
                        for block in data.blocks {
                            state.stored_size += block.approximate_size();
                            state.stored_blocks.push_back(block);
                        }
                        state.batch_size = (state.batch_size * 2)
                            .min(self.config.blocks_per_daemon_request.max(1));
                        DownloadStatus::Downloaded
                    }
                }
            }
        };

        // Apply a reset queued while the request was in flight, discarding
        // anything this download produced. Runs at most once per resolution.
        if let Some(pending) = state.pending_reset.take() {
            apply_reset(&mut state, pending.action, &self.heights);
            for waiter in pending.waiters {
                let _ = waiter.send(());
            }
        }
        state.fetching = false;
        status
    }

    /// Pops the front buffered block, if and only if it matches both `height`
    /// and `hash`, and records it processed. Calling twice with the same
    /// arguments mutates state only once.
    ///
    /// Returns `true` when the buffer has room and a background refill should
    /// be started. The memory estimate is only consulted every
    /// [`SIZE_CHECK_INTERVAL`] drops.
    pub(crate) async fn drop_block(&self, height: u64, hash: Hash256) -> bool {
        let mut state = self.state.lock().await;
        let matches = state
            .stored_blocks
            .front()
            .is_some_and(|front| front.height == height && front.hash == hash);
        if matches {
            let block = state.stored_blocks.pop_front().expect("front exists");
            state.stored_size = state.stored_size.saturating_sub(block.approximate_size());
            state.status.store_block_hash(height, hash);
            self.heights.wallet.store(height, Ordering::SeqCst);
        }
        state.drop_counter += 1;
        state.drop_counter % SIZE_CHECK_INTERVAL == 0
            && !state.fetching
            && state.stored_size < self.config.block_store_memory_limit
    }

    /// Replaces the sync state to rescan from `scan_height`, clearing all
    /// history. Safe against an in-flight download: the mutation is deferred
    /// until it resolves, and that download's blocks are discarded.
    pub(crate) async fn reset(&self, scan_height: u64, scan_timestamp: u64) {
        self.queue_reset(ResetAction::Reset {
            height: scan_height,
            timestamp: scan_timestamp,
        })
        .await;
    }

    /// Rewinds to `scan_height`, preserving history below it. Safe against an
    /// in-flight download, like [`BlockDownloader::reset`].
    pub(crate) async fn rewind(&self, scan_height: u64) {
        self.queue_reset(ResetAction::Rewind {
            height: scan_height,
        })
        .await;
    }

    async fn queue_reset(&self, action: ResetAction) {
        let receiver = {
            let mut state = self.state.lock().await;
            if state.fetching {
                let (sender, receiver) = oneshot::channel();
                match &mut state.pending_reset {
                    Some(pending) => {
                        pending.action = action;
                        pending.waiters.push(sender);
                    }
                    None => {
                        state.pending_reset = Some(PendingReset {
                            action,
                            waiters: vec![sender],
                        });
                    }
                }
                Some(receiver)
            } else {
                apply_reset(&mut state, action, &self.heights);
                None
            }
        };

        if let Some(receiver) = receiver {
            let _ = receiver.await;
        }
    }

    async fn check_fetch_liveness(&self) {
        let stale = {
            let state = self.state.lock().await;
            state.last_successful_fetch.elapsed() > self.config.max_last_fetched_block_interval
        };
        if stale && !self.dead_node.swap(true, Ordering::SeqCst) {
            tracing::warn!("no block has been fetched successfully within the configured interval");
            let _ = self.events.send(WalletEvent::DeadNode);
        }
    }
}

fn compose_checkpoints(state: &DownloaderState) -> Vec<Hash256> {
    // Unprocessed buffered blocks newest first, then the processed recent
    // tail, truncated to the recent window; sparse checkpoints always follow
    // in full so deep forks can still find a common ancestor.
    let mut checkpoints: Vec<Hash256> = state
        .stored_blocks
        .iter()
        .rev()
        .map(|block| block.hash)
        .chain(state.status.recent_hashes())
        .take(RECENT_HASHES_SIZE)
        .collect();
    checkpoints.extend(state.status.sparse_checkpoints());
    checkpoints
}

fn apply_reset(state: &mut DownloaderState, action: ResetAction, heights: &Heights) {
    state.stored_blocks.clear();
    state.stored_size = 0;
    match action {
        ResetAction::Reset { height, timestamp } => {
            state.status = SyncStatus::starting_at(height.saturating_sub(1));
            state.start_height = height;
            state.start_timestamp = timestamp;
        }
        ResetAction::Rewind { height } => {
            state.status.rewind(height);
            state.start_height = height;
            state.start_timestamp = 0;
        }
    }
    heights.wallet.store(
        state.status.last_known_block_height(),
        Ordering::SeqCst,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::testutils::{mock_block, MockDaemon};

    fn downloader_with(
        daemon: Arc<MockDaemon>,
        config: WalletConfig,
        start_height: u64,
    ) -> Arc<BlockDownloader> {
        let (events, _) = broadcast::channel(64);
        Arc::new(BlockDownloader::new(
            daemon,
            Arc::new(config),
            Arc::new(Heights::default()),
            Arc::new(AtomicBool::new(false)),
            events,
            start_height,
            0,
        ))
    }

    #[tokio::test]
    async fn batch_size_backs_off_and_recovers() {
        let daemon = Arc::new(MockDaemon::new());
        daemon.set_chain((0..20).map(|h| mock_block(h, vec![])).collect());
        let downloader = downloader_with(daemon.clone(), WalletConfig::default(), 0);
        assert_eq!(downloader.batch_size().await, 100);

        daemon.fail_sync_data(true);
        assert_eq!(downloader.download_blocks().await, DownloadStatus::Failed);
        assert_eq!(downloader.batch_size().await, 25);
        assert_eq!(downloader.download_blocks().await, DownloadStatus::Failed);
        assert_eq!(downloader.batch_size().await, 7);
        for _ in 0..4 {
            downloader.download_blocks().await;
        }
        // ceil(7/4)=2, ceil(2/4)=1, then floored at 1.
        assert_eq!(downloader.batch_size().await, 1);

        daemon.fail_sync_data(false);
        assert_eq!(
            downloader.download_blocks().await,
            DownloadStatus::Downloaded
        );
        assert_eq!(downloader.batch_size().await, 2);
        assert_eq!(
            downloader.download_blocks().await,
            DownloadStatus::Downloaded
        );
        assert_eq!(downloader.batch_size().await, 4);
    }

    #[tokio::test]
    async fn drop_block_is_idempotent() {
        let daemon = Arc::new(MockDaemon::new());
        let chain: Vec<Block> = (0..3).map(|h| mock_block(h, vec![])).collect();
        daemon.set_chain(chain.clone());
        let downloader = downloader_with(daemon, WalletConfig::default(), 0);

        let outcome = downloader.fetch_blocks(10).await;
        assert_eq!(outcome.blocks.len(), 3);

        downloader.drop_block(0, chain[0].hash).await;
        assert_eq!(downloader.last_known_block_height().await, 0);
        let remaining = downloader.fetch_blocks(10).await.blocks;
        assert_eq!(remaining.len(), 2);

        // A second drop with the same arguments must not pop block 1.
        downloader.drop_block(0, chain[0].hash).await;
        let remaining = downloader.fetch_blocks(10).await.blocks;
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].height, 1);
    }

    #[tokio::test]
    async fn top_block_is_recorded_when_synced() {
        let daemon = Arc::new(MockDaemon::new());
        let chain: Vec<Block> = (0..5).map(|h| mock_block(h, vec![])).collect();
        let top = chain.last().unwrap().clone();
        daemon.set_chain(chain);
        // Start beyond the chain tip so the daemon serves nothing.
        let downloader = downloader_with(daemon, WalletConfig::default(), 10);

        assert_eq!(downloader.download_blocks().await, DownloadStatus::Synced);
        // Wallet started at 10; the daemon's tip of 4 is not newer.
        assert_eq!(downloader.last_known_block_height().await, 9);

        let downloader2 = {
            let daemon = Arc::new(MockDaemon::new());
            daemon.set_chain((0..5).map(|h| mock_block(h, vec![])).collect());
            // Serve everything, drop it all, then ask again: synced.
            let d = downloader_with(daemon, WalletConfig::default(), 0);
            for block in d.fetch_blocks(10).await.blocks {
                d.drop_block(block.height, block.hash).await;
            }
            d
        };
        assert_eq!(
            downloader2.download_blocks().await,
            DownloadStatus::Synced
        );
        assert_eq!(downloader2.last_known_block_height().await, 4);
        assert_eq!(downloader2.top_hash().await, Some(top.hash));
    }

    #[tokio::test]
    async fn reset_is_deferred_past_inflight_download() {
        let daemon = Arc::new(MockDaemon::new());
        daemon.set_chain((0..50).map(|h| mock_block(h, vec![])).collect());
        let gate = daemon.hold_sync_data();
        let downloader = downloader_with(daemon, WalletConfig::default(), 0);

        let in_flight = {
            let downloader = Arc::clone(&downloader);
            tokio::spawn(async move { downloader.download_blocks().await })
        };
        // Give the download time to take the fetching guard.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let reset_task = {
            let downloader = Arc::clone(&downloader);
            tokio::spawn(async move { downloader.reset(1000, 0).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reset_task.is_finished());

        gate.notify_one();
        in_flight.await.unwrap();
        reset_task.await.unwrap();

        // The in-flight download's blocks were discarded by the reset.
        assert_eq!(downloader.last_known_block_height().await, 999);
        assert!(!downloader.have_processed_blocks().await);
        let outcome = {
            let state = downloader.state.lock().await;
            state.stored_blocks.len()
        };
        assert_eq!(outcome, 0);
    }

    #[tokio::test]
    async fn failed_fetch_past_interval_flags_dead_node() {
        let daemon = Arc::new(MockDaemon::new());
        daemon.fail_sync_data(true);
        let config = WalletConfig {
            max_last_fetched_block_interval: Duration::from_millis(0),
            ..WalletConfig::default()
        };
        let (events, mut receiver) = broadcast::channel(16);
        let downloader = Arc::new(BlockDownloader::new(
            daemon,
            Arc::new(config),
            Arc::new(Heights::default()),
            Arc::new(AtomicBool::new(false)),
            events,
            0,
            0,
        ));

        let outcome = downloader.fetch_blocks(1).await;
        assert!(outcome.should_sleep);
        assert!(matches!(
            receiver.try_recv().unwrap(),
            WalletEvent::DeadNode
        ));
        // A second failure in the same outage does not re-emit.
        downloader.fetch_blocks(1).await;
        assert!(receiver.try_recv().is_err());
    }
}
