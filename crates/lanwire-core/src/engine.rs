// SPDX-License-Identifier: AGPL-3.0
// Lanwire - Control-plane facade
//
// The single object a frontend holds. Every operation is a synchronous
// request/response call; state changes are additionally observable
// through the event subscription.

use crate::client::{self, TransferClient};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::orchestrator::Orchestrator;
use crate::server::{self, ServerContext, ServerHandle};
use crate::store::{FavoritesStore, HistoryStore, SettingsStore};
use crate::types::{
    AppSettings, Favorite, NetworkInterface, PeerInfo, PendingTransfer, ResolveResult,
    ServerStatus, TransferRecord,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::Mutex;

/// The transfer engine: orchestrator, protocol server/client, stores,
/// and event bus, wired together at startup
pub struct TransferEngine {
    settings: Arc<SettingsStore>,
    favorites: Arc<FavoritesStore>,
    history: Arc<HistoryStore>,
    orchestrator: Arc<Orchestrator>,
    client: TransferClient,
    events: EventBus,
    server_ctx: Arc<ServerContext>,
    server: Mutex<Option<ServerHandle>>,
}

impl TransferEngine {
    /// Build an engine with stores at the default config location
    pub fn new() -> EngineResult<Self> {
        let settings = Arc::new(SettingsStore::new()?);
        let favorites = Arc::new(FavoritesStore::new()?);
        let history = Arc::new(HistoryStore::new()?);
        Self::with_stores(settings, favorites, history)
    }

    /// Build an engine with stores rooted in an explicit directory
    pub fn with_config_dir(dir: &Path) -> EngineResult<Self> {
        let settings = Arc::new(SettingsStore::with_path(dir.join("settings.json"))?);
        let favorites = Arc::new(FavoritesStore::with_path(dir.join("favorites.json"))?);
        let history = Arc::new(HistoryStore::with_path(dir.join("history.json"))?);
        Self::with_stores(settings, favorites, history)
    }

    /// Build an engine from an explicit runtime configuration,
    /// overriding whatever the settings file in `dir` holds. For
    /// embedders that configure programmatically instead of through
    /// the persisted settings.
    pub fn with_config(dir: &Path, config: EngineConfig) -> EngineResult<Self> {
        let engine = Self::with_config_dir(dir)?;
        let mut settings = engine.settings.get();
        settings.port = config.port;
        settings.device_name = config.device_name;
        settings.download_dir = config.download_dir;
        settings.trusted_hosts = config.trusted_hosts;
        settings.receive_only = config.receive_only;
        settings.max_retries = config.max_retries;
        settings.retry_delay_ms = config.retry_delay_ms;
        settings.approval_timeout_secs = config.approval_timeout_secs;
        engine.settings.update(settings)?;
        Ok(engine)
    }

    pub fn with_stores(
        settings: Arc<SettingsStore>,
        favorites: Arc<FavoritesStore>,
        history: Arc<HistoryStore>,
    ) -> EngineResult<Self> {
        let events = EventBus::new();
        let orchestrator = Arc::new(Orchestrator::new(
            settings.clone(),
            history.clone(),
            events.clone(),
        ));
        let client = TransferClient::new(orchestrator.clone(), settings.clone(), events.clone())?;
        let server_ctx = Arc::new(ServerContext {
            orchestrator: orchestrator.clone(),
            settings: settings.clone(),
            events: events.clone(),
        });

        Ok(Self {
            settings,
            favorites,
            history,
            orchestrator,
            client,
            events,
            server_ctx,
            server: Mutex::new(None),
        })
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Server lifecycle
    // ------------------------------------------------------------------

    /// Start the protocol server on the configured port. Returns the
    /// bound port; a no-op if already running.
    pub async fn start_server(&self) -> EngineResult<u16> {
        let mut server = self.server.lock().await;
        if let Some(handle) = server.as_ref() {
            return Ok(handle.port());
        }
        let port = self.settings.get().port;
        let handle = server::start_server(self.server_ctx.clone(), port).await?;
        let bound = handle.port();
        *server = Some(handle);
        Ok(bound)
    }

    /// Stop accepting new connections; in-flight transfers on
    /// established connections drain to completion
    pub async fn stop_server(&self) -> EngineResult<()> {
        let handle = self
            .server
            .lock()
            .await
            .take()
            .ok_or(EngineError::ServerNotRunning)?;
        handle.stop().await;
        Ok(())
    }

    pub async fn server_status(&self) -> ServerStatus {
        let server = self.server.lock().await;
        ServerStatus {
            running: server.is_some(),
            port: server.as_ref().map(|h| h.port()),
            device_name: self.settings.get().device_name,
            interfaces: client::get_network_interfaces(),
        }
    }

    /// Swap the listening socket for a new port. Transfers already
    /// accepted or in progress continue on their established
    /// connections.
    async fn rebind(&self, new_port: u16) -> EngineResult<()> {
        let mut server = self.server.lock().await;
        let Some(handle) = server.take() else {
            return Ok(());
        };
        let old_port = handle.port();
        if old_port == new_port {
            *server = Some(handle);
            return Ok(());
        }

        handle.stop().await;
        let new_handle = server::start_server(self.server_ctx.clone(), new_port).await?;
        let bound = new_handle.port();
        *server = Some(new_handle);
        self.events.emit(EngineEvent::PortChanged {
            old_port,
            new_port: bound,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub fn get_settings(&self) -> AppSettings {
        self.settings.get()
    }

    /// Update settings, rebinding the server if the port changed
    pub async fn update_settings(&self, new_settings: AppSettings) -> EngineResult<()> {
        let old = self.settings.get();
        let new_port = new_settings.port;
        self.settings.update(new_settings)?;
        if old.port != new_port {
            self.rebind(new_port).await?;
        }
        Ok(())
    }

    pub fn add_trusted_host(&self, host: String) -> EngineResult<()> {
        self.settings.add_trusted_host(host)
    }

    pub fn remove_trusted_host(&self, host: &str) -> EngineResult<()> {
        self.settings.remove_trusted_host(host)
    }

    // ------------------------------------------------------------------
    // Favorites
    // ------------------------------------------------------------------

    pub fn list_favorites(&self) -> Vec<Favorite> {
        self.favorites.list()
    }

    pub fn add_favorite(&self, name: String, address: String) -> EngineResult<Favorite> {
        self.favorites.add(name, address)
    }

    pub fn update_favorite(
        &self,
        id: &str,
        name: Option<String>,
        address: Option<String>,
    ) -> EngineResult<Favorite> {
        self.favorites.update(id, name, address)
    }

    pub fn delete_favorite(&self, id: &str) -> EngineResult<()> {
        self.favorites.delete(id)
    }

    // ------------------------------------------------------------------
    // Network
    // ------------------------------------------------------------------

    /// Resolve a hostname; a successful resolution refreshes the cached
    /// IP of any favorite with that address
    pub fn resolve_hostname(&self, address: &str) -> ResolveResult {
        let result = TransferClient::resolve_address(address);
        if result.success {
            if let Some(ip) = result.ips.first() {
                let has_match = self.favorites.list().iter().any(|f| f.address == address);
                if has_match {
                    if let Err(e) = self.favorites.update_resolved_ip(address, ip) {
                        tracing::warn!("Failed to cache resolved IP: {}", e);
                    }
                }
            }
        }
        result
    }

    pub fn list_interfaces(&self) -> Vec<NetworkInterface> {
        client::get_network_interfaces()
    }

    pub async fn check_peer(&self, address: &str, port: u16) -> EngineResult<bool> {
        self.client.check_peer(address, port).await
    }

    pub async fn peer_info(&self, address: &str, port: u16) -> EngineResult<PeerInfo> {
        self.client.peer_info(address, port).await
    }

    // ------------------------------------------------------------------
    // Transfers
    // ------------------------------------------------------------------

    /// Send files to a peer. Returns the transfer id once the transfer
    /// reaches a terminal state.
    pub async fn send_files(
        &self,
        address: &str,
        port: u16,
        paths: Vec<PathBuf>,
    ) -> EngineResult<String> {
        let settings = self.settings.get();
        if settings.receive_only {
            return Err(EngineError::InvalidConfig(
                "Sending is disabled in receive-only mode".to_string(),
            ));
        }
        self.client
            .send_files(address, port, paths, Some(settings.device_name))
            .await
    }

    /// Send a directory, preserving its structure on the receiver
    pub async fn send_directory(
        &self,
        address: &str,
        port: u16,
        dir: &Path,
    ) -> EngineResult<String> {
        let settings = self.settings.get();
        if settings.receive_only {
            return Err(EngineError::InvalidConfig(
                "Sending is disabled in receive-only mode".to_string(),
            ));
        }
        self.client
            .send_directory(address, port, dir, Some(settings.device_name))
            .await
    }

    /// Accept a pending incoming transfer; returns the minted token
    pub async fn accept_transfer(&self, transfer_id: &str) -> EngineResult<String> {
        self.orchestrator
            .decide(transfer_id, true)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Transfer not found: {}", transfer_id)))
    }

    /// Reject a pending incoming transfer
    pub async fn reject_transfer(&self, transfer_id: &str) -> EngineResult<()> {
        self.orchestrator.decide(transfer_id, false).await?;
        Ok(())
    }

    /// Cancel a transfer in any non-terminal state; idempotent
    pub async fn cancel_transfer(&self, transfer_id: &str) -> EngineResult<()> {
        self.orchestrator.cancel(transfer_id).await
    }

    /// Accept every pending transfer; returns the affected ids
    pub async fn accept_all_transfers(&self) -> Vec<String> {
        self.orchestrator.decide_all(true).await
    }

    /// Reject every pending transfer; returns the affected ids
    pub async fn reject_all_transfers(&self) -> Vec<String> {
        self.orchestrator.decide_all(false).await
    }

    pub async fn pending_transfers(&self) -> Vec<PendingTransfer> {
        self.orchestrator.pending_transfers().await
    }

    /// Snapshot of a live transfer, if the engine still tracks it
    pub async fn transfer_record(&self, transfer_id: &str) -> Option<TransferRecord> {
        self.orchestrator.get_record(transfer_id).await
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    pub fn transfer_history(&self) -> Vec<TransferRecord> {
        self.history.list()
    }

    pub fn clear_history(&self) -> EngineResult<()> {
        self.history.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (tempfile::TempDir, TransferEngine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = TransferEngine::with_config_dir(dir.path()).unwrap();
        (dir, engine)
    }

    #[tokio::test]
    async fn server_starts_on_ephemeral_port_and_stops() {
        let (_dir, engine) = engine();
        let mut settings = engine.get_settings();
        settings.port = 0;
        engine.update_settings(settings).await.unwrap();

        let port = engine.start_server().await.unwrap();
        assert_ne!(port, 0);

        let status = engine.server_status().await;
        assert!(status.running);
        assert_eq!(status.port, Some(port));

        engine.stop_server().await.unwrap();
        assert!(!engine.server_status().await.running);
    }

    #[tokio::test]
    async fn stop_without_start_reports_not_running() {
        let (_dir, engine) = engine();
        assert!(matches!(
            engine.stop_server().await,
            Err(EngineError::ServerNotRunning)
        ));
    }

    #[tokio::test]
    async fn receive_only_blocks_sending() {
        let (_dir, engine) = engine();
        let mut settings = engine.get_settings();
        settings.receive_only = true;
        engine.update_settings(settings).await.unwrap();

        let err = engine
            .send_files("127.0.0.1", 1, vec![PathBuf::from("/tmp/x")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn favorites_round_trip_through_engine() {
        let (_dir, engine) = engine();
        let fav = engine
            .add_favorite("NAS".into(), "192.168.1.9".into())
            .unwrap();
        assert_eq!(engine.list_favorites().len(), 1);

        engine
            .update_favorite(&fav.id, Some("Attic NAS".into()), None)
            .unwrap();
        assert_eq!(engine.list_favorites()[0].name, "Attic NAS");

        engine.delete_favorite(&fav.id).unwrap();
        assert!(engine.list_favorites().is_empty());
    }

    #[tokio::test]
    async fn explicit_config_overrides_persisted_settings() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::builder()
            .port(0)
            .device_name("embedded")
            .trusted_hosts(vec!["10.0.0.7".into()])
            .receive_only(true)
            .build();
        let engine = TransferEngine::with_config(dir.path(), config).unwrap();

        let settings = engine.get_settings();
        assert_eq!(settings.port, 0);
        assert_eq!(settings.device_name, "embedded");
        assert_eq!(settings.trusted_hosts, vec!["10.0.0.7".to_string()]);
        assert!(settings.receive_only);
    }

    #[tokio::test]
    async fn resolve_hostname_caches_ip_for_matching_favorite() {
        let (_dir, engine) = engine();
        engine
            .add_favorite("Local".into(), "127.0.0.1".into())
            .unwrap();

        let result = engine.resolve_hostname("127.0.0.1");
        assert!(result.success);
        assert_eq!(
            engine.list_favorites()[0].last_resolved_ip.as_deref(),
            Some("127.0.0.1")
        );
    }
}
