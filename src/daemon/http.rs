//! JSON-over-HTTP daemon client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::WalletConfig;
use crate::daemon::{Daemon, DaemonInfo, FeeInfo, RandomOutputs, SyncData};
use crate::error::NodeError;
use crate::events::WalletEvent;
use crate::primitives::Hash256;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct WalletSyncRequest {
    count: u64,
    checkpoints: Vec<Hash256>,
    skip_coinbase_transactions: bool,
    height: u64,
    timestamp: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GlobalIndexEntry {
    hash: Hash256,
    indexes: Vec<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionStatusResponse {
    #[serde(default)]
    not_found: Vec<Hash256>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RandomOutputsRequest {
    amounts: Vec<u64>,
    count: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct SubmitErrorBody {
    error: SubmitError,
}

#[derive(Debug, Clone, Deserialize)]
struct SubmitError {
    code: i64,
    message: String,
}

/// A daemon reached over persistent keep-alive HTTP connections.
///
/// When the scheme is unspecified it is resolved on `init` by probing HTTPS
/// first, then HTTP. `Connect`/`Disconnect` events fire exactly at edge
/// transitions of reachability. The connection state intentionally starts
/// `true`, so a node that is down from the very first request produces a
/// `Disconnect` without a preceding `Connect`.
pub struct HttpDaemon {
    client: reqwest::Client,
    host: String,
    port: u16,
    ssl: RwLock<Option<bool>>,
    connected: AtomicBool,
    events: RwLock<Option<broadcast::Sender<WalletEvent>>>,
}

impl HttpDaemon {
    /// Creates a client for `host:port`. `use_ssl` of `None` autodetects the
    /// scheme on [`Daemon::init`].
    pub fn new(
        host: impl Into<String>,
        port: u16,
        use_ssl: Option<bool>,
        config: &WalletConfig,
    ) -> Result<Self, NodeError> {
        let mut builder = reqwest::Client::builder().timeout(config.request_timeout);
        if let Some(agent) = &config.custom_user_agent {
            builder = builder.user_agent(agent.clone());
        }
        Ok(Self {
            client: builder.build()?,
            host: host.into(),
            port,
            ssl: RwLock::new(use_ssl),
            connected: AtomicBool::new(true),
            events: RwLock::new(None),
        })
    }

    fn url(&self, ssl: bool, path: &str) -> String {
        let scheme = if ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}{path}", self.host, self.port)
    }

    fn resolved_ssl(&self) -> bool {
        self.ssl.read().expect("lock poisoned").unwrap_or(false)
    }

    fn emit(&self, event: WalletEvent) {
        if let Some(sender) = self.events.read().expect("lock poisoned").as_ref() {
            let _ = sender.send(event);
        }
    }

    fn mark_success(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.emit(WalletEvent::Connect);
        }
    }

    fn mark_failure(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.emit(WalletEvent::Disconnect);
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, NodeError> {
        let request = self.client.get(self.url(self.resolved_ssl(), path));
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.mark_failure();
                return Err(e.into());
            }
        };
        self.mark_success();
        if !response.status().is_success() {
            return Err(NodeError::MalformedResponse(format!(
                "unexpected status {} from {path}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| NodeError::MalformedResponse(e.to_string()))
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, NodeError> {
        let request = self.client.post(self.url(self.resolved_ssl(), path)).json(body);
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.mark_failure();
                return Err(e.into());
            }
        };
        self.mark_success();
        if !response.status().is_success() {
            return Err(NodeError::MalformedResponse(format!(
                "unexpected status {} from {path}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| NodeError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl Daemon for HttpDaemon {
    async fn init(&self) -> Result<(), NodeError> {
        let resolved = *self.ssl.read().expect("lock poisoned");
        if resolved.is_none() {
            // Probe without edge events so autodetection of a plain HTTP node
            // does not surface a spurious disconnect.
            let mut last_error = None;
            for candidate in [true, false] {
                let probe = self
                    .client
                    .get(self.url(candidate, "/info"))
                    .send()
                    .await;
                match probe {
                    Ok(_) => {
                        *self.ssl.write().expect("lock poisoned") = Some(candidate);
                        last_error = None;
                        break;
                    }
                    Err(e) => last_error = Some(e),
                }
            }
            if let Some(e) = last_error {
                self.mark_failure();
                return Err(e.into());
            }
        }
        tracing::info!(
            host = %self.host,
            port = self.port,
            ssl = self.resolved_ssl(),
            "daemon connection initialised"
        );
        self.mark_success();
        Ok(())
    }

    async fn get_info(&self) -> Result<DaemonInfo, NodeError> {
        self.get_json("/info").await
    }

    async fn get_fee_info(&self) -> Result<FeeInfo, NodeError> {
        self.get_json("/fee").await
    }

    async fn get_wallet_sync_data(
        &self,
        checkpoints: Vec<Hash256>,
        start_height: u64,
        start_timestamp: u64,
        block_count: u64,
        skip_coinbase: bool,
    ) -> Result<SyncData, NodeError> {
        let request = WalletSyncRequest {
            count: block_count,
            checkpoints,
            skip_coinbase_transactions: skip_coinbase,
            height: start_height,
            timestamp: start_timestamp,
        };
        self.post_json("/sync", &request).await
    }

    async fn get_global_indexes_for_range(
        &self,
        start_height: u64,
        end_height: u64,
    ) -> Result<HashMap<Hash256, Vec<u64>>, NodeError> {
        let entries: Vec<GlobalIndexEntry> = self
            .get_json(&format!("/indexes/{start_height}/{end_height}"))
            .await?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.hash, entry.indexes))
            .collect())
    }

    async fn get_cancelled_transactions(
        &self,
        transaction_hashes: Vec<Hash256>,
    ) -> Result<Vec<Hash256>, NodeError> {
        let response: TransactionStatusResponse = self
            .post_json("/transaction/status", &transaction_hashes)
            .await?;
        Ok(response.not_found)
    }

    async fn get_random_outputs_by_amount(
        &self,
        amounts: Vec<u64>,
        count: u64,
    ) -> Result<Vec<RandomOutputs>, NodeError> {
        let request = RandomOutputsRequest { amounts, count };
        let mut outputs: Vec<RandomOutputs> = self.post_json("/indexes/random", &request).await?;
        // Ascending index order masks the real input's position in the ring.
        for entry in &mut outputs {
            entry.outputs.sort_by_key(|output| output.index);
        }
        Ok(outputs)
    }

    async fn submit_transaction(&self, raw_transaction: &str) -> Result<(), NodeError> {
        let request = self
            .client
            .post(self.url(self.resolved_ssl(), "/transaction"))
            .body(raw_transaction.to_string());
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.mark_failure();
                return Err(e.into());
            }
        };
        self.mark_success();
        if response.status() == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }
        let body: SubmitErrorBody = response
            .json()
            .await
            .map_err(|e| NodeError::MalformedResponse(e.to_string()))?;
        Err(NodeError::Rejected {
            code: body.error.code,
            message: body.error.message,
        })
    }

    fn register_events(&self, events: broadcast::Sender<WalletEvent>) {
        *self.events.write().expect("lock poisoned") = Some(events);
    }
}
