// SPDX-License-Identifier: AGPL-3.0
// Lanwire - HTTP client for sending transfers
//
// The client explicitly resolves hostnames and never discovers peers.
// Files are streamed sequentially, one upload per file, in fixed-size
// chunks read straight off disk.

use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::orchestrator::Orchestrator;
use crate::progress::SpeedTracker;
use crate::store::SettingsStore;
use crate::types::{
    NetworkInterface, PeerInfo, ResolveResult, TransferFile, TransferProgress, TransferRequest,
    TransferResponse, TransferStatus, TransferStatusResponse,
};
use futures_util::StreamExt;
use reqwest::{Body, Client};
use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs::File;
use tokio::time::{sleep, Instant};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Interval between approval-status polls
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Progress events are throttled to one per this many bytes
const PROGRESS_EMIT_INTERVAL: u64 = 32 * 1024;

/// Client for sending files to a peer
pub struct TransferClient {
    http: Client,
    orchestrator: Arc<Orchestrator>,
    settings: Arc<SettingsStore>,
    events: EventBus,
}

impl TransferClient {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        settings: Arc<SettingsStore>,
        events: EventBus,
    ) -> EngineResult<Self> {
        // No global timeout; large transfers can run for hours. The
        // read timeout catches stalled connections instead.
        let http = Client::builder()
            .read_timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::InvalidConfig(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            orchestrator,
            settings,
            events,
        })
    }

    /// Resolve a hostname or IP to all available addresses
    pub fn resolve_address(address: &str) -> ResolveResult {
        if let Ok(ip) = address.parse::<std::net::IpAddr>() {
            return ResolveResult {
                hostname: address.to_string(),
                ips: vec![ip.to_string()],
                success: true,
                error: None,
            };
        }

        let addr_with_port = format!("{}:0", address);
        match addr_with_port.to_socket_addrs() {
            Ok(addrs) => {
                let ips: Vec<String> = addrs.map(|a| a.ip().to_string()).collect();
                if ips.is_empty() {
                    ResolveResult {
                        hostname: address.to_string(),
                        ips: Vec::new(),
                        success: false,
                        error: Some("No IP addresses found".to_string()),
                    }
                } else {
                    tracing::info!("Resolved {} to {:?}", address, ips);
                    ResolveResult {
                        hostname: address.to_string(),
                        ips,
                        success: true,
                        error: None,
                    }
                }
            }
            Err(e) => ResolveResult {
                hostname: address.to_string(),
                ips: Vec::new(),
                success: false,
                error: Some(format!("DNS resolution failed: {}", e)),
            },
        }
    }

    /// Check if a peer is reachable via its /health endpoint
    pub async fn check_peer(&self, address: &str, port: u16) -> EngineResult<bool> {
        let url = format!("http://{}:{}/health", address, port);
        let response = self.http.get(&url).send().await.map_err(map_request_error)?;
        if response.status().is_success() {
            Ok(true)
        } else {
            Err(EngineError::Network(format!(
                "Peer returned status {}",
                response.status()
            )))
        }
    }

    /// Fetch the peer's device name and version
    pub async fn peer_info(&self, address: &str, port: u16) -> EngineResult<PeerInfo> {
        let url = format!("http://{}:{}/info", address, port);
        let response = self.http.get(&url).send().await.map_err(map_request_error)?;
        response
            .json()
            .await
            .map_err(|e| EngineError::Serialization(format!("Failed to parse peer info: {}", e)))
    }

    /// Send a set of local files to a peer. Blocks until the transfer
    /// reaches a terminal state; failures are also observable as
    /// events. Returns the transfer id.
    pub async fn send_files(
        &self,
        address: &str,
        port: u16,
        file_paths: Vec<PathBuf>,
        sender_name: Option<String>,
    ) -> EngineResult<String> {
        let mut entries = Vec::with_capacity(file_paths.len());
        for path in file_paths {
            let name = path
                .file_name()
                .ok_or_else(|| EngineError::FileIo(format!("Invalid file path: {:?}", path)))?
                .to_string_lossy()
                .to_string();
            entries.push((path, name));
        }
        self.send_entries(address, port, entries, sender_name).await
    }

    /// Send a directory, flattened into an ordered file list whose
    /// names preserve relative paths so the receiver can reconstruct
    /// the structure
    pub async fn send_directory(
        &self,
        address: &str,
        port: u16,
        dir: &Path,
        sender_name: Option<String>,
    ) -> EngineResult<String> {
        let entries = collect_dir_entries(dir).await?;
        if entries.is_empty() {
            return Err(EngineError::Validation(format!(
                "Directory contains no files: {:?}",
                dir
            )));
        }
        self.send_entries(address, port, entries, sender_name).await
    }

    async fn send_entries(
        &self,
        address: &str,
        port: u16,
        entries: Vec<(PathBuf, String)>,
        sender_name: Option<String>,
    ) -> EngineResult<String> {
        let mut files = Vec::with_capacity(entries.len());
        for (path, name) in &entries {
            let metadata = tokio::fs::metadata(path)
                .await
                .map_err(|e| EngineError::FileIo(format!("Failed to stat {:?}: {}", path, e)))?;
            let mime_type = mime_guess::from_path(path).first().map(|m| m.to_string());
            files.push(TransferFile {
                id: Uuid::new_v4().to_string(),
                name: name.clone(),
                size: metadata.len(),
                mime_type,
            });
        }

        let transfer_id = Uuid::new_v4().to_string();
        let cancel = self
            .orchestrator
            .register_outgoing(&transfer_id, address, files.clone())
            .await?;

        match self
            .drive_transfer(address, port, &transfer_id, files, entries, sender_name, &cancel)
            .await
        {
            Ok(()) => Ok(transfer_id),
            Err(EngineError::Cancelled) => {
                self.orchestrator.cancel(&transfer_id).await?;
                Err(EngineError::Cancelled)
            }
            Err(EngineError::Rejected) => {
                self.orchestrator.reject_outgoing(&transfer_id).await?;
                Err(EngineError::Rejected)
            }
            Err(e) => {
                let _ = self.orchestrator.fail(&transfer_id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn drive_transfer(
        &self,
        address: &str,
        port: u16,
        transfer_id: &str,
        files: Vec<TransferFile>,
        entries: Vec<(PathBuf, String)>,
        sender_name: Option<String>,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        let total_size: u64 = files.iter().map(|f| f.size).sum();

        let request = TransferRequest {
            id: transfer_id.to_string(),
            sender_name,
            files: files.clone(),
            total_size,
        };

        let response = self
            .with_retry(transfer_id, cancel, || self.announce(address, port, &request))
            .await?;

        let token = if response.accepted {
            response
                .token
                .ok_or_else(|| EngineError::Network("Peer accepted without a token".to_string()))?
        } else {
            tracing::info!("Transfer {} awaiting approval by {}", transfer_id, address);
            self.wait_for_approval(address, port, transfer_id, cancel)
                .await?
        };

        self.orchestrator.mark_accepted(transfer_id, &token).await?;

        let sent_total = Arc::new(AtomicU64::new(0));
        let speed = Arc::new(Mutex::new(SpeedTracker::new()));

        for (index, (file, (path, _))) in files.iter().zip(entries.iter()).enumerate() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let base = sent_total.load(Ordering::SeqCst);
            self.with_retry(transfer_id, cancel, || {
                let sent_total = sent_total.clone();
                let speed = speed.clone();
                let token = token.clone();
                async move {
                    // A retried file restarts from zero; roll the
                    // counters back so nothing double-counts
                    sent_total.store(base, Ordering::SeqCst);
                    self.orchestrator.set_outgoing_bytes(transfer_id, base).await?;
                    self.upload_file(
                        address,
                        port,
                        transfer_id,
                        &token,
                        index,
                        path,
                        file,
                        total_size,
                        sent_total,
                        speed,
                        cancel,
                    )
                    .await
                }
            })
            .await?;

            self.orchestrator
                .set_outgoing_bytes(transfer_id, sent_total.load(Ordering::SeqCst))
                .await?;
            self.orchestrator.mark_file_sent(transfer_id, index).await?;
            tracing::info!("Sent file: {}", file.name);
        }

        Ok(())
    }

    async fn announce(
        &self,
        address: &str,
        port: u16,
        request: &TransferRequest,
    ) -> EngineResult<TransferResponse> {
        let url = format!("http://{}:{}/transfer", address, port);
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(map_request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(status, text));
        }

        response
            .json()
            .await
            .map_err(|e| EngineError::Serialization(format!("Failed to parse response: {}", e)))
    }

    /// Poll the peer until it decides. Unbounded unless
    /// `approval_timeout_secs` is set; cancellable between polls.
    async fn wait_for_approval(
        &self,
        address: &str,
        port: u16,
        transfer_id: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<String> {
        let url = format!("http://{}:{}/transfer/status?id={}", address, port, transfer_id);
        let timeout = self
            .settings
            .get()
            .approval_timeout_secs
            .map(Duration::from_secs);
        let started = Instant::now();

        loop {
            let response = self.http.get(&url).send().await.map_err(map_request_error)?;
            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(map_status_error(status, text));
            }

            let status: TransferStatusResponse = response
                .json()
                .await
                .map_err(|e| EngineError::Serialization(format!("Failed to parse status: {}", e)))?;

            match status.status {
                TransferStatus::Accepted | TransferStatus::InProgress => {
                    return status.token.ok_or_else(|| {
                        EngineError::Network("Peer accepted without a token".to_string())
                    });
                }
                TransferStatus::Rejected => return Err(EngineError::Rejected),
                TransferStatus::Cancelled => return Err(EngineError::Cancelled),
                _ => {
                    if let Some(limit) = timeout {
                        if started.elapsed() > limit {
                            return Err(EngineError::Network(
                                "Transfer approval timed out".to_string(),
                            ));
                        }
                    }
                    tokio::select! {
                        _ = sleep(POLL_INTERVAL) => {}
                        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_file(
        &self,
        address: &str,
        port: u16,
        transfer_id: &str,
        token: &str,
        file_index: usize,
        path: &Path,
        file_info: &TransferFile,
        total_size: u64,
        sent_total: Arc<AtomicU64>,
        speed: Arc<Mutex<SpeedTracker>>,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        let url = format!(
            "http://{}:{}/chunk?id={}&file={}&token={}",
            address, port, transfer_id, file_index, token
        );

        let file = File::open(path)
            .await
            .map_err(|e| EngineError::FileIo(format!("Failed to open {:?}: {}", path, e)))?;
        let file_size = file
            .metadata()
            .await
            .map_err(|e| EngineError::FileIo(format!("Failed to stat {:?}: {}", path, e)))?
            .len();

        let events = self.events.clone();
        let progress_id = transfer_id.to_string();
        let file_name = file_info.name.clone();
        let last_emit = Arc::new(AtomicU64::new(0));
        let stream_cancel = cancel.clone();

        // Ending the stream early is how within-file cancellation
        // works; the receiver sees a short body and discards the
        // partial file.
        let stream = ReaderStream::new(file)
            .take_while(move |_| futures_util::future::ready(!stream_cancel.is_cancelled()))
            .inspect(move |chunk| {
                if let Ok(chunk) = chunk {
                    let new_total =
                        sent_total.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
                    let speed_bps = {
                        let mut tracker = speed.lock().unwrap();
                        tracker.record(chunk.len() as u64);
                        tracker.bytes_per_sec()
                    };

                    let last = last_emit.load(Ordering::SeqCst);
                    if new_total - last >= PROGRESS_EMIT_INTERVAL || new_total == total_size {
                        last_emit.store(new_total, Ordering::SeqCst);
                        events.emit(EngineEvent::TransferProgress {
                            progress: TransferProgress {
                                transfer_id: progress_id.clone(),
                                current_file: Some(file_name.clone()),
                                bytes_transferred: new_total,
                                total_bytes: total_size,
                                speed_bps,
                            },
                        });
                    }
                }
            });

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/octet-stream")
            .header("Content-Length", file_size)
            .body(Body::wrap_stream(stream))
            .send()
            .await
            .map_err(map_request_error)?;

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(status, text));
        }

        Ok(())
    }

    /// Run `op`, retrying transient network failures with exponential
    /// backoff. Each retry is announced as an event; status never
    /// changes.
    async fn with_retry<T, F, Fut>(
        &self,
        transfer_id: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = EngineResult<T>>,
    {
        let settings = self.settings.get();
        let max_attempts = settings.max_retries;
        let mut delay = Duration::from_millis(settings.retry_delay_ms);
        let mut attempt: u32 = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    attempt += 1;
                    tracing::warn!(
                        "Transfer {} attempt {}/{} failed: {}",
                        transfer_id,
                        attempt,
                        max_attempts,
                        e
                    );
                    self.events.emit(EngineEvent::TransferRetry {
                        transfer_id: transfer_id.to_string(),
                        attempt,
                        max_attempts,
                        error: e.to_string(),
                    });
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    }
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn map_request_error(e: reqwest::Error) -> EngineError {
    if e.is_connect() {
        EngineError::ConnectionRefused(format!("Cannot connect: {}", e))
    } else if e.is_timeout() {
        EngineError::Network(format!("Connection timed out: {}", e))
    } else {
        EngineError::Network(format!("Request failed: {}", e))
    }
}

fn map_status_error(status: reqwest::StatusCode, body: String) -> EngineError {
    match status.as_u16() {
        401 => EngineError::Unauthorized,
        404 => EngineError::NotFound(body),
        409 => EngineError::Validation(format!("Peer refused the request: {}", body)),
        code if status.is_server_error() => {
            EngineError::Network(format!("Peer returned {}: {}", code, body))
        }
        code => EngineError::Validation(format!("Peer returned {}: {}", code, body)),
    }
}

/// Flatten a directory into (absolute path, relative name) pairs,
/// depth-first, deterministically ordered. Names use '/' separators
/// regardless of platform.
pub async fn collect_dir_entries(dir: &Path) -> EngineResult<Vec<(PathBuf, String)>> {
    let root = dir.to_path_buf();
    let mut pending = vec![root.clone()];
    let mut entries = Vec::new();

    while let Some(current) = pending.pop() {
        let mut read_dir = tokio::fs::read_dir(&current)
            .await
            .map_err(|e| EngineError::FileIo(format!("Failed to read {:?}: {}", current, e)))?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| EngineError::FileIo(format!("Failed to read {:?}: {}", current, e)))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| EngineError::FileIo(format!("Failed to stat {:?}: {}", path, e)))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let relative = path
                    .strip_prefix(&root)
                    .map_err(|e| EngineError::FileIo(format!("Path outside root: {}", e)))?;
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                entries.push((path, name));
            }
        }
    }

    entries.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(entries)
}

/// All network interfaces with their addresses
pub fn get_network_interfaces() -> Vec<NetworkInterface> {
    let mut interfaces = Vec::new();

    if let Ok(addrs) = get_if_addrs::get_if_addrs() {
        for iface in addrs {
            let is_loopback = iface.is_loopback();
            let ip = iface.ip().to_string();
            interfaces.push(NetworkInterface {
                name: iface.name,
                ip,
                is_loopback,
            });
        }
    }

    interfaces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HistoryStore, SettingsStore};
    use std::sync::atomic::AtomicU32;

    fn client_fixture() -> (tempfile::TempDir, TransferClient, EventBus) {
        let dir = tempfile::tempdir().unwrap();
        let settings =
            Arc::new(SettingsStore::with_path(dir.path().join("settings.json")).unwrap());
        let mut app_settings = settings.get();
        app_settings.retry_delay_ms = 1;
        settings.update(app_settings).unwrap();

        let history =
            Arc::new(HistoryStore::with_path(dir.path().join("history.json")).unwrap());
        let events = EventBus::new();
        let orchestrator = Arc::new(Orchestrator::new(
            settings.clone(),
            history,
            events.clone(),
        ));
        let client = TransferClient::new(orchestrator, settings, events.clone()).unwrap();
        (dir, client, events)
    }

    #[tokio::test]
    async fn transient_failures_retry_and_announce_each_attempt() {
        let (_dir, client, events) = client_fixture();
        let mut rx = events.subscribe();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let result = client
            .with_retry("t1", &cancel, || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(EngineError::Network("connection reset".into()))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        for expected_attempt in 1..=2 {
            match rx.try_recv().unwrap() {
                EngineEvent::TransferRetry {
                    transfer_id,
                    attempt,
                    max_attempts,
                    ..
                } => {
                    assert_eq!(transfer_id, "t1");
                    assert_eq!(attempt, expected_attempt);
                    assert_eq!(max_attempts, 3);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn retries_stop_at_the_configured_bound() {
        let (_dir, client, _events) = client_fixture();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let result: EngineResult<()> = client
            .with_retry("t1", &cancel, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(EngineError::ConnectionRefused("no route to host".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(EngineError::ConnectionRefused(_))));
        // Initial attempt plus max_retries retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let (_dir, client, _events) = client_fixture();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let result: EngineResult<()> = client
            .with_retry("t1", &cancel, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(EngineError::Unauthorized)
                }
            })
            .await;

        assert!(matches!(result, Err(EngineError::Unauthorized)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolve_passes_plain_ips_through() {
        let result = TransferClient::resolve_address("192.168.1.50");
        assert!(result.success);
        assert_eq!(result.ips, vec!["192.168.1.50".to_string()]);

        let result = TransferClient::resolve_address("::1");
        assert!(result.success);
    }

    #[test]
    fn resolve_reports_failure_for_garbage() {
        let result = TransferClient::resolve_address("definitely-not-a-real-host.invalid");
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn directory_flattening_preserves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        std::fs::write(dir.path().join("top.txt"), b"1").unwrap();
        std::fs::write(dir.path().join("sub/mid.txt"), b"2").unwrap();
        std::fs::write(dir.path().join("sub/deeper/leaf.txt"), b"3").unwrap();

        let entries = collect_dir_entries(dir.path()).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(names, vec!["sub/deeper/leaf.txt", "sub/mid.txt", "top.txt"]);
    }

    #[test]
    fn status_errors_map_to_the_taxonomy() {
        assert!(matches!(
            map_status_error(reqwest::StatusCode::UNAUTHORIZED, String::new()),
            EngineError::Unauthorized
        ));
        assert!(matches!(
            map_status_error(reqwest::StatusCode::NOT_FOUND, String::new()),
            EngineError::NotFound(_)
        ));
        assert!(matches!(
            map_status_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, String::new()),
            EngineError::Network(_)
        ));
        assert!(matches!(
            map_status_error(reqwest::StatusCode::BAD_REQUEST, String::new()),
            EngineError::Validation(_)
        ));
    }
}
