// SPDX-License-Identifier: AGPL-3.0
// Lanwire - Shared types for the transfer engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// A saved peer for quick access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    /// Unique identifier
    pub id: String,
    /// User-friendly label (e.g., "Living Room PC")
    pub name: String,
    /// Hostname or IP address
    pub address: String,
    /// Last successfully resolved IP, cached for display only
    pub last_resolved_ip: Option<String>,
    /// When this favorite was last used
    pub last_used: Option<DateTime<Utc>>,
}

impl Favorite {
    pub fn new(name: String, address: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            address,
            last_resolved_ip: None,
            last_used: None,
        }
    }
}

/// Direction of a transfer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Sent,
    Received,
}

/// Status of a transfer.
///
/// Transitions are one-directional:
/// `Pending -> Accepted -> InProgress -> {Completed | Failed | Cancelled}`,
/// with `Rejected` reachable only from `Pending` and `Cancelled` reachable
/// from any non-terminal state. Trusted senders enter at `Accepted`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferStatus {
    Pending,
    Accepted,
    InProgress,
    Completed,
    Failed,
    Rejected,
    Cancelled,
}

impl TransferStatus {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Rejected | Self::Cancelled
        )
    }
}

/// A single file in a transfer. Created at announce time, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFile {
    /// Unique identifier for this file within the transfer
    pub id: String,
    /// File name; may contain forward-slash separated relative path
    /// segments for directory sends
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// MIME type, if detected
    pub mime_type: Option<String>,
}

/// Metadata announcing a transfer, sent before any data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Unique transfer session ID
    pub id: String,
    /// Optional friendly name of the sender
    pub sender_name: Option<String>,
    /// Files to be transferred, in upload order
    pub files: Vec<TransferFile>,
    /// Total size of all files
    pub total_size: u64,
}

/// Response to a transfer announcement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    /// Whether the transfer was accepted immediately (trusted sender)
    pub accepted: bool,
    /// Token for subsequent chunk uploads, present iff accepted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Whether the transfer awaits a manual decision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<bool>,
}

/// Reply to a status poll
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatusResponse {
    pub status: TransferStatus,
    /// Present once the transfer has been accepted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// A completed, failed, or in-flight transfer record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    /// Unique identifier
    pub id: String,
    /// Direction of transfer
    pub direction: TransferDirection,
    /// Current status
    pub status: TransferStatus,
    /// Peer address (IP or hostname)
    pub peer_address: String,
    /// Files in upload order
    pub files: Vec<TransferFile>,
    /// Total size of all files
    pub total_size: u64,
    /// Bytes actually transferred so far
    pub bytes_transferred: u64,
    /// When the transfer started
    pub started_at: DateTime<Utc>,
    /// When the transfer reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    /// Error message if failed
    pub error: Option<String>,
}

impl TransferRecord {
    pub fn new(
        id: String,
        direction: TransferDirection,
        status: TransferStatus,
        peer_address: String,
        files: Vec<TransferFile>,
    ) -> Self {
        let total_size = files.iter().map(|f| f.size).sum();
        Self {
            id,
            direction,
            status,
            peer_address,
            files,
            total_size,
            bytes_transferred: 0,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }
}

/// Progress update for an ongoing transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    /// Transfer ID
    pub transfer_id: String,
    /// File currently being transferred
    pub current_file: Option<String>,
    /// Bytes transferred so far across the whole transfer
    pub bytes_transferred: u64,
    /// Total bytes to transfer
    pub total_bytes: u64,
    /// Throughput over the rolling window, bytes/sec
    pub speed_bps: u64,
}

/// An incoming transfer awaiting a user decision
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransfer {
    /// Transfer ID
    pub id: String,
    /// Source IP address of the announcing peer
    pub source_ip: String,
    /// Optional sender-declared name
    pub sender_name: Option<String>,
    /// Files to be received
    pub files: Vec<TransferFile>,
    /// Total size
    pub total_size: u64,
    /// When the announcement was received
    pub received_at: DateTime<Utc>,
}

/// Peer identity returned by the /info endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub device_name: String,
    pub version: String,
}

/// Network interface information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Interface name
    pub name: String,
    /// IP address
    pub ip: String,
    /// Whether this is a loopback interface
    pub is_loopback: bool,
}

/// DNS resolution result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResult {
    /// Original hostname/address as entered
    pub hostname: String,
    /// Resolved IP addresses
    pub ips: Vec<String>,
    /// Whether resolution succeeded
    pub success: bool,
    /// Error message if it did not
    pub error: Option<String>,
}

/// Live server status for the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub running: bool,
    pub port: Option<u16>,
    pub device_name: String,
    pub interfaces: Vec<NetworkInterface>,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Port for the HTTP server (default: 53317)
    pub port: u16,
    /// Device name shown to peers
    pub device_name: String,
    /// Directory received files are written under
    pub download_dir: PathBuf,
    /// Source IPs accepted without a manual decision (exact match)
    pub trusted_hosts: Vec<String>,
    /// Receive-only mode (disable sending)
    pub receive_only: bool,
    /// Show system notifications
    pub notifications_enabled: bool,
    /// Theme preference: "dark", "light", or "system"
    #[serde(default = "default_theme")]
    pub theme: String,
    /// Maximum retry attempts for transient network failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial delay between retry attempts in milliseconds (doubles
    /// per attempt)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// How long a sender waits for the peer's decision. None waits
    /// indefinitely.
    #[serde(default)]
    pub approval_timeout_secs: Option<u64>,
}

fn default_theme() -> String {
    "system".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for AppSettings {
    fn default() -> Self {
        let download_dir = directories::UserDirs::new()
            .and_then(|d| d.download_dir().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            port: 53317,
            device_name: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "Lanwire Device".to_string()),
            download_dir,
            trusted_hosts: Vec::new(),
            receive_only: false,
            notifications_enabled: true,
            theme: default_theme(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            approval_timeout_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings() {
        let settings = AppSettings::default();
        assert_eq!(settings.port, 53317);
        assert_eq!(settings.theme, "system");
        assert!(!settings.receive_only);
        assert!(settings.trusted_hosts.is_empty());
        assert_eq!(settings.approval_timeout_secs, None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(TransferStatus::Rejected.is_terminal());
        assert!(TransferStatus::Cancelled.is_terminal());
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(!TransferStatus::Accepted.is_terminal());
        assert!(!TransferStatus::InProgress.is_terminal());
    }

    #[test]
    fn record_totals_from_files() {
        let files = vec![
            TransferFile {
                id: "f1".into(),
                name: "a.txt".into(),
                size: 10,
                mime_type: None,
            },
            TransferFile {
                id: "f2".into(),
                name: "b.txt".into(),
                size: 32,
                mime_type: None,
            },
        ];
        let record = TransferRecord::new(
            "t1".into(),
            TransferDirection::Received,
            TransferStatus::Pending,
            "192.168.1.10".into(),
            files,
        );
        assert_eq!(record.total_size, 42);
        assert_eq!(record.bytes_transferred, 0);
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn status_serializes_camel_case() {
        let s = serde_json::to_string(&TransferStatus::InProgress).unwrap();
        assert_eq!(s, "\"inProgress\"");
    }
}
