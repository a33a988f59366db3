//! The wallet facade.
//!
//! [`LightWallet`] owns the store, the daemon handle and the block pipeline,
//! and sequences the three periodic tasks: syncing blocks, polling daemon
//! info, and checking locked transactions for cancellation. Consumers observe
//! it through [`LightWallet::subscribe`] and the query API.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::WalletConfig;
use crate::daemon::{Daemon, FeeInfo};
use crate::data::Transaction;
use crate::error::WalletError;
use crate::events::WalletEvent;
use crate::primitives::{Hash256, KeyImage, PublicKey, SecretKey};
use crate::subwallets::SubWallets;
use crate::sync::pipeline::BlockDownloader;
use crate::sync::status::SyncStatus;
use crate::sync::{Heights, WalletSynchronizer};

pub mod save;

/// A background fusion builder, invoked when the wallet reaches the synced
/// state with auto-optimization enabled. Returns the hash of the created
/// fusion transaction, if one was built.
pub type OptimizerHook = Arc<dyn Fn() -> BoxFuture<'static, Option<Hash256>> + Send + Sync>;

/// How to derive the wallet's keys.
pub enum WalletSource {
    /// Fresh random keys, scanning from `scan_height`.
    NewRandom {
        /// Height scanning starts from.
        scan_height: u64,
    },
    /// An existing key pair.
    Keys {
        /// The shared private view key.
        private_view_key: SecretKey,
        /// The primary private spend key.
        private_spend_key: SecretKey,
        /// Height scanning starts from.
        scan_height: u64,
        /// Timestamp scanning starts from, `0` to use the height.
        scan_timestamp: u64,
    },
    /// View-only: receipts are visible, spending is not possible.
    ViewOnly {
        /// The shared private view key.
        private_view_key: SecretKey,
        /// The primary public spend key.
        public_spend_key: PublicKey,
        /// Height scanning starts from.
        scan_height: u64,
        /// Timestamp scanning starts from, `0` to use the height.
        scan_timestamp: u64,
    },
}

/// Owns and sequences everything: store, pipeline, daemon and tickers.
pub struct LightWallet {
    config: Arc<WalletConfig>,
    daemon: Arc<dyn Daemon>,
    subwallets: Arc<RwLock<SubWallets>>,
    downloader: Arc<BlockDownloader>,
    heights: Arc<Heights>,
    events: broadcast::Sender<WalletEvent>,
    dead_node: Arc<AtomicBool>,
    synced: Arc<AtomicBool>,
    currently_optimizing: Arc<AtomicBool>,
    currently_transacting: Arc<AtomicBool>,
    optimizer: Arc<StdRwLock<Option<OptimizerHook>>>,
    fee_info: Arc<StdRwLock<FeeInfo>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl LightWallet {
    /// Creates a wallet against `daemon` from the given key source.
    pub fn new(
        config: WalletConfig,
        daemon: Arc<dyn Daemon>,
        source: WalletSource,
    ) -> Result<Self, WalletError> {
        let crypto = config.crypto.clone();
        let (store, scan_height, scan_timestamp) = match source {
            WalletSource::NewRandom { scan_height } => {
                let (_, private_view_key) = crypto.generate_key_pair();
                let (_, private_spend_key) = crypto.generate_key_pair();
                (
                    SubWallets::new(
                        crypto,
                        private_view_key,
                        private_spend_key,
                        scan_height,
                        0,
                    )?,
                    scan_height,
                    0,
                )
            }
            WalletSource::Keys {
                private_view_key,
                private_spend_key,
                scan_height,
                scan_timestamp,
            } => (
                SubWallets::new(
                    crypto,
                    private_view_key,
                    private_spend_key,
                    scan_height,
                    scan_timestamp,
                )?,
                scan_height,
                scan_timestamp,
            ),
            WalletSource::ViewOnly {
                private_view_key,
                public_spend_key,
                scan_height,
                scan_timestamp,
            } => (
                SubWallets::new_view(
                    crypto,
                    private_view_key,
                    public_spend_key,
                    scan_height,
                    scan_timestamp,
                ),
                scan_height,
                scan_timestamp,
            ),
        };
        let status = SyncStatus::starting_at(scan_height.saturating_sub(1));
        Ok(Self::assemble(
            config,
            daemon,
            store,
            status,
            scan_height,
            scan_timestamp,
        ))
    }

    /// Restores a wallet from a persisted document string.
    pub fn from_json_str(
        config: WalletConfig,
        daemon: Arc<dyn Daemon>,
        encoded: &str,
    ) -> io::Result<Self> {
        let document: save::WalletDocument = serde_json::from_str(encoded)?;
        let (store, status, start_height, start_timestamp) =
            save::restore_store(document, config.crypto.clone())?;
        Ok(Self::assemble(
            config,
            daemon,
            store,
            status,
            start_height,
            start_timestamp,
        ))
    }

    /// Restores a wallet from a document on disk.
    pub fn load_from_file(
        config: WalletConfig,
        daemon: Arc<dyn Daemon>,
        path: impl AsRef<Path>,
    ) -> io::Result<Self> {
        let encoded = std::fs::read_to_string(path)?;
        Self::from_json_str(config, daemon, &encoded)
    }

    fn assemble(
        config: WalletConfig,
        daemon: Arc<dyn Daemon>,
        store: SubWallets,
        status: SyncStatus,
        start_height: u64,
        start_timestamp: u64,
    ) -> Self {
        let config = Arc::new(config);
        let (events, _) = broadcast::channel(1024);
        daemon.register_events(events.clone());
        let heights = Arc::new(Heights::default());
        let dead_node = Arc::new(AtomicBool::new(false));
        let downloader = Arc::new(BlockDownloader::from_status(
            daemon.clone(),
            config.clone(),
            heights.clone(),
            dead_node.clone(),
            events.clone(),
            status,
            start_height,
            start_timestamp,
        ));
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            daemon,
            subwallets: Arc::new(RwLock::new(store)),
            downloader,
            heights,
            events,
            dead_node,
            synced: Arc::new(AtomicBool::new(false)),
            currently_optimizing: Arc::new(AtomicBool::new(false)),
            currently_transacting: Arc::new(AtomicBool::new(false)),
            optimizer: Arc::new(StdRwLock::new(None)),
            fee_info: Arc::new(StdRwLock::new(FeeInfo::default())),
            shutdown,
            tasks: Vec::new(),
        }
    }

    fn synchronizer(&self) -> WalletSynchronizer {
        WalletSynchronizer::new(
            self.config.clone(),
            self.daemon.clone(),
            self.subwallets.clone(),
            self.downloader.clone(),
            self.heights.clone(),
            self.events.clone(),
        )
    }

    /// Initialises the daemon connection, then starts the three periodic
    /// tasks. Idempotent: a started wallet stays started.
    pub async fn start(&mut self) -> Result<(), WalletError> {
        if !self.tasks.is_empty() {
            return Ok(());
        }
        self.daemon.init().await?;
        match self.daemon.get_fee_info().await {
            Ok(fee) => *self.fee_info.write().expect("lock poisoned") = fee,
            Err(e) => tracing::warn!("failed to fetch node fee info. {e}"),
        }
        tracing::info!("starting wallet tasks");

        self.tasks.push(tokio::spawn(run_sync_ticker(
            self.synchronizer(),
            self.config.sync_thread_interval,
            self.shutdown.subscribe(),
        )));
        self.tasks.push(tokio::spawn(
            DaemonTicker {
                daemon: self.daemon.clone(),
                config: self.config.clone(),
                heights: self.heights.clone(),
                events: self.events.clone(),
                synced: self.synced.clone(),
                dead_node: self.dead_node.clone(),
                currently_optimizing: self.currently_optimizing.clone(),
                currently_transacting: self.currently_transacting.clone(),
                optimizer: self.optimizer.clone(),
                last_local_height: 0,
                last_network_height: 0,
                local_advanced: Instant::now(),
                network_advanced: Instant::now(),
            }
            .run(self.config.daemon_update_interval, self.shutdown.subscribe()),
        ));
        self.tasks.push(tokio::spawn(run_locked_ticker(
            self.synchronizer(),
            self.config.locked_transactions_check_interval,
            self.shutdown.subscribe(),
        )));
        Ok(())
    }

    /// Stops the periodic tasks, awaiting their current iterations.
    /// Idempotent: a stopped wallet stays stopped.
    pub async fn stop(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        let _ = self.shutdown.send_replace(false);
        tracing::info!("wallet tasks stopped");
    }

    /// A receiver of every [`WalletEvent`] from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }

    /// Height the wallet has processed to.
    #[must_use]
    pub fn wallet_height(&self) -> u64 {
        self.heights.wallet_height()
    }

    /// The daemon's own chain height.
    #[must_use]
    pub fn local_height(&self) -> u64 {
        self.heights.local_height()
    }

    /// The network height the daemon reports.
    #[must_use]
    pub fn network_height(&self) -> u64 {
        self.heights.network_height()
    }

    /// `true` while the wallet height has caught the network height.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    /// The node operator fee fetched at start.
    #[must_use]
    pub fn fee_info(&self) -> FeeInfo {
        self.fee_info.read().expect("lock poisoned").clone()
    }

    /// Public spend key of the primary subwallet.
    pub async fn primary_public_spend_key(&self) -> PublicKey {
        self.subwallets.read().await.primary_public_spend_key()
    }

    /// (unlocked, locked) balance over `filter`, all subwallets when `None`.
    pub async fn get_balance(
        &self,
        filter: Option<&[PublicKey]>,
    ) -> Result<(u64, u64), WalletError> {
        let height = self.network_height().max(self.wallet_height());
        self.subwallets.read().await.get_balance(height, filter)
    }

    /// Hash of the newest processed block.
    pub async fn top_block_hash(&self) -> Option<Hash256> {
        self.downloader.top_hash().await
    }

    /// A snapshot of confirmed transactions.
    pub async fn get_transactions(&self) -> Vec<Transaction> {
        self.subwallets.read().await.get_transactions()
    }

    /// Unspent inputs currently spendable, with their owning subwallets.
    pub async fn get_spendable_inputs(
        &self,
        filter: Option<&[PublicKey]>,
    ) -> Result<Vec<(PublicKey, crate::data::TransactionInput)>, WalletError> {
        let height = self.network_height().max(self.wallet_height());
        self.subwallets
            .read()
            .await
            .get_spendable_inputs(height, filter)
    }

    /// A snapshot of unconfirmed outgoing transactions.
    pub async fn get_unconfirmed_transactions(
        &self,
        subwallet: Option<&PublicKey>,
        include_fusions: bool,
    ) -> Vec<Transaction> {
        self.subwallets
            .read()
            .await
            .get_unconfirmed_transactions(subwallet, include_fusions)
    }

    /// The private key of a transaction this wallet created.
    pub async fn get_transaction_private_key(
        &self,
        transaction_hash: &Hash256,
    ) -> Result<SecretKey, WalletError> {
        self.subwallets
            .read()
            .await
            .get_transaction_private_key(transaction_hash)
    }

    /// Adds a spend-capable subwallet scanning from `scan_height`.
    pub async fn add_subwallet(
        &self,
        private_spend_key: SecretKey,
        scan_height: u64,
    ) -> Result<PublicKey, WalletError> {
        self.subwallets
            .write()
            .await
            .add_subwallet(private_spend_key, scan_height, 0)
    }

    /// Imports a watch-only subwallet scanning from `scan_height`.
    pub async fn import_view_subwallet(
        &self,
        public_spend_key: PublicKey,
        scan_height: u64,
    ) -> Result<(), WalletError> {
        self.subwallets
            .write()
            .await
            .import_view_subwallet(public_spend_key, scan_height, 0)
    }

    /// Deletes a subwallet and everything it owns.
    pub async fn delete_subwallet(
        &self,
        public_spend_key: &PublicKey,
    ) -> Result<(), WalletError> {
        self.subwallets
            .write()
            .await
            .delete_subwallet(public_spend_key)
    }

    /// Discards all scanned data and rescans from `scan_height`. Safe to call
    /// while syncing; an in-flight download resolves first and its blocks are
    /// discarded.
    pub async fn reset(&self, scan_height: u64, scan_timestamp: u64) {
        self.downloader.reset(scan_height, scan_timestamp).await;
        self.subwallets
            .write()
            .await
            .clear_scan_data(scan_height, scan_timestamp);
        tracing::info!(scan_height, scan_timestamp, "wallet reset");
    }

    /// Rolls back to `scan_height`, keeping data below it, and rescans from
    /// there. Safe to call while syncing, like [`LightWallet::reset`].
    pub async fn rewind(&self, scan_height: u64) {
        self.downloader.rewind(scan_height).await;
        self.subwallets
            .write()
            .await
            .remove_forked_transactions(scan_height);
        tracing::info!(scan_height, "wallet rewound");
    }

    /// Submits an externally prepared transaction payload and records its
    /// effects: the unconfirmed transaction, the inputs it locked, and its
    /// private key. Emits [`WalletEvent::CreatedTransaction`] on acceptance.
    pub async fn submit_prepared_transaction(
        &self,
        raw_transaction: &str,
        transaction: Transaction,
        consumed_inputs: Vec<(PublicKey, KeyImage)>,
        transaction_private_key: Option<SecretKey>,
    ) -> Result<Hash256, WalletError> {
        self.currently_transacting.store(true, Ordering::SeqCst);
        let result = self
            .submit_prepared_inner(
                raw_transaction,
                transaction,
                consumed_inputs,
                transaction_private_key,
            )
            .await;
        self.currently_transacting.store(false, Ordering::SeqCst);
        result
    }

    async fn submit_prepared_inner(
        &self,
        raw_transaction: &str,
        transaction: Transaction,
        consumed_inputs: Vec<(PublicKey, KeyImage)>,
        transaction_private_key: Option<SecretKey>,
    ) -> Result<Hash256, WalletError> {
        self.daemon.submit_transaction(raw_transaction).await?;
        let hash = transaction.hash;
        {
            let mut wallet = self.subwallets.write().await;
            wallet.add_unconfirmed_transaction(transaction);
            for (owner, key_image) in consumed_inputs {
                wallet.mark_input_as_locked(&owner, &key_image, hash)?;
            }
            if let Some(key) = transaction_private_key {
                wallet.add_transaction_private_key(hash, key);
            }
        }
        let _ = self.events.send(WalletEvent::CreatedTransaction(hash));
        tracing::info!(%hash, "transaction submitted");
        Ok(hash)
    }

    /// Installs the background fusion builder used by auto-optimization.
    pub fn register_optimizer(&self, hook: OptimizerHook) {
        *self.optimizer.write().expect("lock poisoned") = Some(hook);
    }

    /// Serializes the wallet document.
    pub async fn save_to_string(&self) -> io::Result<String> {
        let (start_height, start_timestamp, status) = self.downloader.snapshot().await;
        let wallet = self.subwallets.read().await;
        let document = save::build_document(&wallet, start_height, start_timestamp, &status);
        serde_json::to_string_pretty(&document).map_err(io::Error::from)
    }

    /// Writes the wallet document to disk.
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let encoded = self.save_to_string().await?;
        std::fs::write(path, encoded)
    }
}

impl std::fmt::Debug for LightWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightWallet")
            .field("config", &self.config)
            .field("wallet_height", &self.wallet_height())
            .field("network_height", &self.network_height())
            .field("synced", &self.is_synced())
            .field("running", &!self.tasks.is_empty())
            .finish_non_exhaustive()
    }
}

async fn run_sync_ticker(
    synchronizer: WalletSynchronizer,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if *shutdown.borrow() {
                    break;
                }
                synchronizer.tick().await;
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn run_locked_ticker(
    synchronizer: WalletSynchronizer,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failure_counts = HashMap::new();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if *shutdown.borrow() {
                    break;
                }
                synchronizer.check_locked_transactions(&mut failure_counts).await;
            }
            _ = shutdown.changed() => break,
        }
    }
}

struct DaemonTicker {
    daemon: Arc<dyn Daemon>,
    config: Arc<WalletConfig>,
    heights: Arc<Heights>,
    events: broadcast::Sender<WalletEvent>,
    synced: Arc<AtomicBool>,
    dead_node: Arc<AtomicBool>,
    currently_optimizing: Arc<AtomicBool>,
    currently_transacting: Arc<AtomicBool>,
    optimizer: Arc<StdRwLock<Option<OptimizerHook>>>,
    last_local_height: u64,
    last_network_height: u64,
    local_advanced: Instant,
    network_advanced: Instant,
}

impl DaemonTicker {
    async fn run(mut self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    self.poll().await;
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn poll(&mut self) {
        let info = match self.daemon.get_info().await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("failed to update daemon info. {e}");
                return;
            }
        };

        self.heights.local.store(info.height, Ordering::SeqCst);
        self.heights
            .network
            .store(info.network_height, Ordering::SeqCst);

        let now = Instant::now();
        let mut advanced = false;
        if info.height != self.last_local_height {
            self.last_local_height = info.height;
            self.local_advanced = now;
            advanced = true;
        }
        if info.network_height != self.last_network_height {
            self.last_network_height = info.network_height;
            self.network_advanced = now;
            advanced = true;
        }
        if advanced {
            self.dead_node.store(false, Ordering::SeqCst);
        } else {
            let local_stale = self.local_advanced.elapsed()
                > self.config.max_last_updated_local_height_interval;
            let network_stale = self.network_advanced.elapsed()
                > self.config.max_last_updated_network_height_interval;
            if (local_stale || network_stale) && !self.dead_node.swap(true, Ordering::SeqCst) {
                tracing::warn!(
                    local_stale,
                    network_stale,
                    "daemon height has not advanced within the configured interval"
                );
                let _ = self.events.send(WalletEvent::DeadNode);
            }
        }

        let wallet_height = self.heights.wallet_height();
        let is_synced = info.network_height != 0 && wallet_height >= info.network_height;
        let was_synced = self.synced.swap(is_synced, Ordering::SeqCst);
        if is_synced && !was_synced {
            let _ = self.events.send(WalletEvent::Sync {
                wallet_height,
                network_height: info.network_height,
            });
            self.maybe_auto_optimize();
        } else if !is_synced && was_synced {
            let _ = self.events.send(WalletEvent::Desync {
                wallet_height,
                network_height: info.network_height,
            });
        }
    }

    /// Kicks off background fusion construction, guarded by the two mutually
    /// exclusive activity flags.
    fn maybe_auto_optimize(&self) {
        if !self.config.auto_optimize {
            return;
        }
        if self.currently_transacting.load(Ordering::SeqCst) {
            return;
        }
        let Some(hook) = self.optimizer.read().expect("lock poisoned").clone() else {
            return;
        };
        if self
            .currently_optimizing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let events = self.events.clone();
        let currently_optimizing = self.currently_optimizing.clone();
        tokio::spawn(async move {
            if let Some(hash) = hook().await {
                let _ = events.send(WalletEvent::CreatedFusionTransaction(hash));
            }
            currently_optimizing.store(false, Ordering::SeqCst);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::crypto::CryptoProvider as _;
    use crate::testutils::MockDaemon;

    #[tokio::test]
    async fn start_and_stop_are_idempotent_and_restartable() {
        let daemon = Arc::new(MockDaemon::new());
        let mut wallet = LightWallet::new(
            WalletConfig::default(),
            daemon,
            WalletSource::NewRandom { scan_height: 0 },
        )
        .unwrap();

        wallet.start().await.unwrap();
        wallet.start().await.unwrap();
        assert_eq!(wallet.tasks.len(), 3);

        wallet.stop().await;
        wallet.stop().await;
        assert!(wallet.tasks.is_empty());

        wallet.start().await.unwrap();
        assert_eq!(wallet.tasks.len(), 3);
        wallet.stop().await;
    }

    #[tokio::test]
    async fn view_only_wallet_reports_no_spend_capability() {
        let crypto = crate::crypto::SoftwareCrypto;
        let (_, view_secret) = crypto.generate_key_pair();
        let (spend_public, _) = crypto.generate_key_pair();
        let wallet = LightWallet::new(
            WalletConfig::default(),
            Arc::new(MockDaemon::new()),
            WalletSource::ViewOnly {
                private_view_key: view_secret,
                public_spend_key: spend_public,
                scan_height: 0,
                scan_timestamp: 0,
            },
        )
        .unwrap();
        assert_eq!(wallet.primary_public_spend_key().await, spend_public);
        assert!(wallet.subwallets.read().await.is_view_wallet());
    }
}
