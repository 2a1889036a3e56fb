// SPDX-License-Identifier: AGPL-3.0
// Lanwire - Transfer orchestrator
//
// Owns the table of live transfers and drives the protocol state
// machine. The table lock is held only for lookup/insert; each transfer
// carries its own state lock, so operations on different transfers
// never block each other while operations on one transfer serialize.

use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::progress::SpeedTracker;
use crate::store::{HistoryStore, SettingsStore};
use crate::trust;
use crate::types::{
    PendingTransfer, TransferDirection, TransferProgress, TransferRecord, TransferRequest,
    TransferResponse, TransferStatus, TransferStatusResponse,
};
use bytes::Bytes;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Progress events are throttled to one per this many bytes
const PROGRESS_EMIT_INTERVAL: u64 = 32 * 1024;

/// Mutable per-transfer state, guarded by the handle's lock
struct TransferState {
    record: TransferRecord,
    /// Chunk-upload credential, minted on acceptance
    token: Option<String>,
    /// Receiver-side view while undecided
    pending: Option<PendingTransfer>,
    /// Which files have been fully received/sent
    files_done: Vec<bool>,
    /// Index of the file currently streaming, if any
    in_flight: Option<usize>,
    speed: SpeedTracker,
    last_progress_emit: u64,
}

/// One live transfer: its state lock plus the cooperative cancellation
/// signal, which is intentionally outside the lock so cancel() can fire
/// while a chunk stream holds nothing
pub(crate) struct TransferHandle {
    state: Mutex<TransferState>,
    cancel: CancellationToken,
}

/// The protocol state machine
pub struct Orchestrator {
    transfers: RwLock<HashMap<String, Arc<TransferHandle>>>,
    settings: Arc<SettingsStore>,
    history: Arc<HistoryStore>,
    events: EventBus,
}

impl Orchestrator {
    pub fn new(settings: Arc<SettingsStore>, history: Arc<HistoryStore>, events: EventBus) -> Self {
        Self {
            transfers: RwLock::new(HashMap::new()),
            settings,
            history,
            events,
        }
    }

    async fn handle(&self, id: &str) -> EngineResult<Arc<TransferHandle>> {
        self.transfers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("Transfer not found: {}", id)))
    }

    /// Move a transfer to a terminal status, record the timestamp and
    /// error text, and hand a snapshot to history. Completed and failed
    /// outcomes are broadcast after the history write so a lagging
    /// subscriber can never lose them.
    fn finalize(
        &self,
        state: &mut TransferState,
        status: TransferStatus,
        error: Option<String>,
    ) -> EngineResult<()> {
        state.record.status = status;
        state.record.completed_at = Some(Utc::now());
        state.record.error = error;
        state.pending = None;
        state.token = None;

        let result = self.history.add(state.record.clone());
        if let Err(ref e) = result {
            tracing::error!("Failed to record transfer {} in history: {}", state.record.id, e);
        }

        match status {
            TransferStatus::Completed => self.events.emit(EngineEvent::TransferComplete {
                transfer_id: state.record.id.clone(),
            }),
            TransferStatus::Failed => self.events.emit(EngineEvent::TransferFailed {
                transfer_id: state.record.id.clone(),
                error: state.record.error.clone().unwrap_or_default(),
            }),
            _ => {}
        }

        result
    }

    fn emit_progress(&self, state: &mut TransferState, current_file: Option<String>, force: bool) {
        let transferred = state.record.bytes_transferred;
        if !force && transferred.saturating_sub(state.last_progress_emit) < PROGRESS_EMIT_INTERVAL {
            return;
        }
        state.last_progress_emit = transferred;
        self.events.emit(EngineEvent::TransferProgress {
            progress: TransferProgress {
                transfer_id: state.record.id.clone(),
                current_file,
                bytes_transferred: transferred,
                total_bytes: state.record.total_size,
                speed_bps: state.speed.bytes_per_sec(),
            },
        });
    }

    // ------------------------------------------------------------------
    // Receiver-side operations
    // ------------------------------------------------------------------

    /// Handle a transfer announcement from `source_ip`.
    ///
    /// Trusted senders get a token immediately; everyone else enters
    /// `pending` and waits for a decision. Validation failures leave no
    /// state behind.
    pub async fn announce(
        &self,
        source_ip: &str,
        request: TransferRequest,
    ) -> EngineResult<TransferResponse> {
        if request.files.is_empty() {
            return Err(EngineError::Validation(
                "Transfer must contain at least one file".to_string(),
            ));
        }
        if request.id.trim().is_empty() {
            return Err(EngineError::Validation(
                "Transfer id must not be empty".to_string(),
            ));
        }

        let computed_total: u64 = request.files.iter().map(|f| f.size).sum();
        if computed_total != request.total_size {
            tracing::warn!(
                "Transfer total mismatch for {}: declared {}, computed {}",
                request.id,
                request.total_size,
                computed_total
            );
        }

        let mut transfers = self.transfers.write().await;
        if let Some(existing) = transfers.get(&request.id) {
            // A sender whose announce response was lost retries the
            // same announcement; answer with the current state instead
            // of erroring so the retry converges.
            let state = existing.state.lock().await;
            if state.record.peer_address == source_ip && !state.record.status.is_terminal() {
                tracing::info!(
                    "Transfer {} re-announced by {}, returning current state",
                    request.id,
                    source_ip
                );
                return Ok(match state.record.status {
                    TransferStatus::Pending => TransferResponse {
                        accepted: false,
                        token: None,
                        pending: Some(true),
                    },
                    _ => TransferResponse {
                        accepted: true,
                        token: state.token.clone(),
                        pending: None,
                    },
                });
            }
            return Err(EngineError::Validation(format!(
                "Transfer id already in use: {}",
                request.id
            )));
        }

        let trusted = trust::is_trusted(source_ip, &self.settings.get().trusted_hosts);
        tracing::info!(
            "Transfer {} announced by {} ({} files, {} bytes, trusted: {})",
            request.id,
            source_ip,
            request.files.len(),
            computed_total,
            trusted
        );

        let file_count = request.files.len();
        let mut record = TransferRecord::new(
            request.id.clone(),
            TransferDirection::Received,
            TransferStatus::Pending,
            source_ip.to_string(),
            request.files.clone(),
        );

        let pending = PendingTransfer {
            id: request.id.clone(),
            source_ip: source_ip.to_string(),
            sender_name: request.sender_name.clone(),
            files: request.files,
            total_size: computed_total,
            received_at: Utc::now(),
        };

        let response = if trusted {
            let token = Uuid::new_v4().to_string();
            record.status = TransferStatus::Accepted;
            transfers.insert(
                request.id.clone(),
                Arc::new(TransferHandle {
                    state: Mutex::new(TransferState {
                        record,
                        token: Some(token.clone()),
                        pending: None,
                        files_done: vec![false; file_count],
                        in_flight: None,
                        speed: SpeedTracker::new(),
                        last_progress_emit: 0,
                    }),
                    cancel: CancellationToken::new(),
                }),
            );
            TransferResponse {
                accepted: true,
                token: Some(token),
                pending: None,
            }
        } else {
            transfers.insert(
                request.id.clone(),
                Arc::new(TransferHandle {
                    state: Mutex::new(TransferState {
                        record,
                        token: None,
                        pending: Some(pending.clone()),
                        files_done: vec![false; file_count],
                        in_flight: None,
                        speed: SpeedTracker::new(),
                        last_progress_emit: 0,
                    }),
                    cancel: CancellationToken::new(),
                }),
            );
            drop(transfers);
            self.events
                .emit(EngineEvent::TransferRequest { transfer: pending });
            TransferResponse {
                accepted: false,
                token: None,
                pending: Some(true),
            }
        };

        Ok(response)
    }

    /// Current status of a transfer, with the token once accepted.
    /// Idempotent; unknown ids are NotFound.
    pub async fn poll_status(&self, id: &str) -> EngineResult<TransferStatusResponse> {
        let handle = self.handle(id).await?;
        let state = handle.state.lock().await;
        Ok(TransferStatusResponse {
            status: state.record.status,
            token: state.token.clone(),
        })
    }

    /// User decision on a pending transfer. Mints the token on accept.
    pub async fn decide(&self, id: &str, accept: bool) -> EngineResult<Option<String>> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;

        if state.record.status != TransferStatus::Pending {
            return Err(EngineError::InvalidState {
                status: state.record.status,
                reason: "only pending transfers can be decided".to_string(),
            });
        }

        if accept {
            let token = Uuid::new_v4().to_string();
            state.record.status = TransferStatus::Accepted;
            state.token = Some(token.clone());
            state.pending = None;
            tracing::info!("Transfer {} accepted", id);
            Ok(Some(token))
        } else {
            tracing::info!("Transfer {} rejected", id);
            self.finalize(
                &mut state,
                TransferStatus::Rejected,
                Some("Rejected by user".to_string()),
            )?;
            Ok(None)
        }
    }

    /// Apply `decide` to every currently pending transfer. Decisions
    /// are independent; one failure does not block the rest. Returns
    /// the ids that were decided.
    pub async fn decide_all(&self, accept: bool) -> Vec<String> {
        let pending_ids: Vec<String> = {
            let transfers = self.transfers.read().await;
            let mut ids = Vec::new();
            for (id, handle) in transfers.iter() {
                if handle.state.lock().await.record.status == TransferStatus::Pending {
                    ids.push(id.clone());
                }
            }
            ids
        };

        let mut decided = Vec::new();
        for id in pending_ids {
            match self.decide(&id, accept).await {
                Ok(_) => decided.push(id),
                Err(e) => tracing::warn!("Failed to decide transfer {}: {}", id, e),
            }
        }
        decided
    }

    /// All transfers currently awaiting a decision
    pub async fn pending_transfers(&self) -> Vec<PendingTransfer> {
        let transfers = self.transfers.read().await;
        let mut pending = Vec::new();
        for handle in transfers.values() {
            if let Some(p) = &handle.state.lock().await.pending {
                pending.push(p.clone());
            }
        }
        pending
    }

    /// Snapshot of a live transfer record
    pub async fn get_record(&self, id: &str) -> Option<TransferRecord> {
        let handle = self.transfers.read().await.get(id).cloned()?;
        let state = handle.state.lock().await;
        Some(state.record.clone())
    }

    /// Stream one file's bytes to disk.
    ///
    /// Validates the token and state, resolves a conflict-free
    /// destination path, then writes the body chunk by chunk without
    /// ever buffering the file. The first chunk moves the transfer to
    /// `inProgress`. Returns the bytes written.
    pub async fn accept_chunk<S, E>(
        &self,
        id: &str,
        file_index: usize,
        token: &str,
        mut body: S,
    ) -> EngineResult<u64>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let handle = self.handle(id).await?;

        // Validate and claim the upload slot, and resolve the
        // destination while holding the state lock so two same-named
        // uploads cannot race to one path.
        let (path, mut file, expected, file_name) = {
            let mut state = handle.state.lock().await;

            if state.token.as_deref() != Some(token) {
                return Err(EngineError::Unauthorized);
            }
            match state.record.status {
                TransferStatus::Accepted | TransferStatus::InProgress => {}
                status => {
                    return Err(EngineError::InvalidState {
                        status,
                        reason: "chunk uploads require an accepted transfer".to_string(),
                    })
                }
            }
            let info = state
                .record
                .files
                .get(file_index)
                .ok_or_else(|| {
                    EngineError::NotFound(format!("No file at index {} in transfer", file_index))
                })?
                .clone();
            if state.files_done[file_index] {
                return Err(EngineError::InvalidState {
                    status: state.record.status,
                    reason: format!("file {} already received", file_index),
                });
            }
            if state.in_flight.is_some() {
                return Err(EngineError::InvalidState {
                    status: state.record.status,
                    reason: "another file upload is in flight".to_string(),
                });
            }

            let download_dir = self.settings.get().download_dir;
            tokio::fs::create_dir_all(&download_dir)
                .await
                .map_err(|e| {
                    EngineError::FileIo(format!("Failed to create download directory: {}", e))
                })?;

            let relative = sanitize_relative_path(&info.name, &info.id);
            let (path, file) = open_unique_file(&download_dir, &relative).await?;

            state.in_flight = Some(file_index);
            state.record.status = TransferStatus::InProgress;

            (path, file, info.size, info.name)
        };

        let mut written: u64 = 0;
        loop {
            let chunk = tokio::select! {
                chunk = body.next() => chunk,
                _ = handle.cancel.cancelled() => {
                    self.abort_file(&handle, &path, written, Some(file_index)).await;
                    return Err(EngineError::Cancelled);
                }
            };

            let Some(chunk) = chunk else { break };

            let data = match chunk {
                Ok(data) => data,
                Err(e) => {
                    self.abort_file(&handle, &path, written, Some(file_index)).await;
                    return Err(EngineError::Network(format!("Stream error: {}", e)));
                }
            };

            if written + data.len() as u64 > expected {
                self.abort_file(&handle, &path, written, Some(file_index)).await;
                return Err(EngineError::Validation(format!(
                    "Received more data than declared for {}",
                    file_name
                )));
            }

            if let Err(e) = file.write_all(&data).await {
                // Disk failure is fatal for the whole transfer
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                {
                    let mut state = handle.state.lock().await;
                    state.record.bytes_transferred =
                        state.record.bytes_transferred.saturating_sub(written);
                    state.in_flight = None;
                }
                let _ = self.fail(id, &format!("Failed to write {}: {}", file_name, e)).await;
                return Err(EngineError::FileIo(format!("Failed to write chunk: {}", e)));
            }

            written += data.len() as u64;

            let mut state = handle.state.lock().await;
            state.record.bytes_transferred += data.len() as u64;
            state.speed.record(data.len() as u64);
            self.emit_progress(&mut state, Some(file_name.clone()), false);
        }

        if let Err(e) = file.flush().await {
            tracing::error!("Failed to flush {}: {}", path.display(), e);
        }

        if written != expected {
            tracing::warn!(
                "Size mismatch for {}: expected {}, received {}",
                file_name,
                expected,
                written
            );
            self.abort_file(&handle, &path, written, Some(file_index)).await;
            return Err(EngineError::Validation("Incomplete file received".to_string()));
        }

        tracing::info!("File received: {} ({} bytes)", path.display(), written);

        {
            let mut state = handle.state.lock().await;
            state.files_done[file_index] = true;
            state.in_flight = None;
            self.emit_progress(&mut state, Some(file_name), true);
        }

        self.complete_if_done(id).await?;
        Ok(written)
    }

    /// Remove a partial destination file and roll back its byte count
    /// so a retried upload does not double-count
    async fn abort_file(
        &self,
        handle: &TransferHandle,
        path: &Path,
        written: u64,
        clear_in_flight: Option<usize>,
    ) {
        let _ = tokio::fs::remove_file(path).await;
        let mut state = handle.state.lock().await;
        state.record.bytes_transferred = state.record.bytes_transferred.saturating_sub(written);
        if state.in_flight == clear_in_flight {
            state.in_flight = None;
        }
    }

    /// Transition to `completed` once every file has landed. Returns
    /// whether the transfer completed.
    pub async fn complete_if_done(&self, id: &str) -> EngineResult<bool> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;

        if state.record.status.is_terminal() {
            return Ok(state.record.status == TransferStatus::Completed);
        }
        if !state.files_done.iter().all(|done| *done) {
            return Ok(false);
        }

        tracing::info!(
            "Transfer {} complete: all {} files transferred",
            id,
            state.files_done.len()
        );
        self.finalize(&mut state, TransferStatus::Completed, None)?;
        Ok(true)
    }

    /// Cancel a transfer from any non-terminal state. Idempotent:
    /// unknown or already-terminal transfers are a no-op. The in-flight
    /// chunk stream observes the signal at its next chunk boundary and
    /// removes its partial file.
    pub async fn cancel(&self, id: &str) -> EngineResult<()> {
        let Some(handle) = self.transfers.read().await.get(id).cloned() else {
            return Ok(());
        };

        handle.cancel.cancel();

        let mut state = handle.state.lock().await;
        if state.record.status.is_terminal() {
            return Ok(());
        }
        tracing::info!("Transfer {} cancelled", id);
        self.finalize(&mut state, TransferStatus::Cancelled, None)
    }

    /// Internal transition on I/O or unrecoverable network error
    pub async fn fail(&self, id: &str, reason: &str) -> EngineResult<()> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;
        if state.record.status.is_terminal() {
            return Ok(());
        }
        tracing::warn!("Transfer {} failed: {}", id, reason);
        self.finalize(&mut state, TransferStatus::Failed, Some(reason.to_string()))
    }

    // ------------------------------------------------------------------
    // Sender-side bookkeeping
    // ------------------------------------------------------------------

    /// Track an outgoing transfer. Starts `pending` until the peer's
    /// decision is observed.
    pub async fn register_outgoing(
        &self,
        id: &str,
        peer_address: &str,
        files: Vec<crate::types::TransferFile>,
    ) -> EngineResult<CancellationToken> {
        let file_count = files.len();
        let record = TransferRecord::new(
            id.to_string(),
            TransferDirection::Sent,
            TransferStatus::Pending,
            peer_address.to_string(),
            files,
        );

        let handle = Arc::new(TransferHandle {
            state: Mutex::new(TransferState {
                record,
                token: None,
                pending: None,
                files_done: vec![false; file_count],
                in_flight: None,
                speed: SpeedTracker::new(),
                last_progress_emit: 0,
            }),
            cancel: CancellationToken::new(),
        });
        let cancel = handle.cancel.clone();
        self.transfers.write().await.insert(id.to_string(), handle);
        Ok(cancel)
    }

    /// The peer accepted; record the token for status polls
    pub async fn mark_accepted(&self, id: &str, token: &str) -> EngineResult<()> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;
        if state.record.status == TransferStatus::Pending {
            state.record.status = TransferStatus::Accepted;
            state.token = Some(token.to_string());
        }
        Ok(())
    }

    /// The peer declined the transfer
    pub async fn reject_outgoing(&self, id: &str) -> EngineResult<()> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;
        if state.record.status.is_terminal() {
            return Ok(());
        }
        self.finalize(
            &mut state,
            TransferStatus::Rejected,
            Some("Rejected by peer".to_string()),
        )
    }

    /// Set the outgoing byte counter to an absolute value. The client
    /// emits its own fine-grained progress events; this keeps the
    /// record consistent at file boundaries and after a retry rollback.
    pub async fn set_outgoing_bytes(&self, id: &str, bytes: u64) -> EngineResult<()> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.lock().await;
        if !state.record.status.is_terminal() {
            state.record.status = TransferStatus::InProgress;
            state.record.bytes_transferred = bytes;
        }
        Ok(())
    }

    /// One outgoing file fully sent; on the last file the transfer
    /// completes
    pub async fn mark_file_sent(&self, id: &str, file_index: usize) -> EngineResult<bool> {
        {
            let handle = self.handle(id).await?;
            let mut state = handle.state.lock().await;
            if let Some(done) = state.files_done.get_mut(file_index) {
                *done = true;
            }
            let file_name = state
                .record
                .files
                .get(file_index)
                .map(|f| f.name.clone());
            self.emit_progress(&mut state, file_name, true);
        }
        self.complete_if_done(id).await
    }

}

// ----------------------------------------------------------------------
// Destination path resolution
// ----------------------------------------------------------------------

/// Reduce a sender-supplied name to a safe relative path. Empty, `.`,
/// `..`, and rooted segments are dropped, so directory structure
/// survives but traversal outside the download dir cannot. Falls back
/// to `fallback` when nothing survives.
fn sanitize_relative_path(name: &str, fallback: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for segment in name.split(['/', '\\']) {
        let segment = segment.trim();
        if segment.is_empty() || segment == "." || segment == ".." {
            continue;
        }
        // A segment like "C:" would re-root the path on Windows
        let segment = segment.replace(':', "_");
        out.push(segment);
    }
    if out.as_os_str().is_empty() {
        out.push(fallback);
    }
    out
}

fn split_file_name(name: &str) -> (&str, &str) {
    if let Some((stem, ext)) = name.rsplit_once('.') {
        if !stem.is_empty() {
            return (stem, ext);
        }
    }
    (name, "")
}

/// Open the destination for writing, appending " (1)", " (2)", … to the
/// final segment until an unused name is found. `create_new` makes the
/// existence check and the creation one atomic step.
async fn open_unique_file(
    download_dir: &Path,
    relative: &Path,
) -> EngineResult<(PathBuf, File)> {
    let base_name = relative
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
        .to_string();
    let parent = download_dir.join(relative.parent().unwrap_or_else(|| Path::new("")));
    tokio::fs::create_dir_all(&parent)
        .await
        .map_err(|e| EngineError::FileIo(format!("Failed to create directory: {}", e)))?;

    let (stem, ext) = split_file_name(&base_name);

    for index in 0..1000 {
        let candidate = if index == 0 {
            base_name.clone()
        } else if ext.is_empty() {
            format!("{} ({})", stem, index)
        } else {
            format!("{} ({}).{}", stem, index, ext)
        };

        let path = parent.join(&candidate);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(EngineError::FileIo(format!("Failed to create file: {}", e))),
        }
    }

    Err(EngineError::FileIo("Too many filename conflicts".to_string()))
}
