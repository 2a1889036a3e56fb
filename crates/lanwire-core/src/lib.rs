// SPDX-License-Identifier: AGPL-3.0
// Lanwire Core - Transfer engine for explicit, consent-based file
// transfer over LAN, VPN, and overlay networks
//
// This crate provides:
// - The transfer orchestrator (protocol state machine)
// - The HTTP protocol server (receiver) and client (sender)
// - Persistent settings, favorites, and history stores
// - The TransferEngine control-plane facade frontends call into
//
// There is no peer discovery, relay, or encryption here; the engine
// assumes a reachable address on a configurable port and leaves
// confidentiality to the surrounding network.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod progress;
pub mod server;
pub mod store;
pub mod trust;
pub mod types;

pub use client::TransferClient;
pub use config::EngineConfig;
pub use engine::TransferEngine;
pub use error::{EngineError, EngineResult};
pub use events::{EngineEvent, EventBus};
pub use orchestrator::Orchestrator;
pub use store::{FavoritesStore, HistoryStore, SettingsStore};
pub use types::{
    AppSettings, Favorite, NetworkInterface, PeerInfo, PendingTransfer, ResolveResult,
    ServerStatus, TransferDirection, TransferFile, TransferProgress, TransferRecord,
    TransferRequest, TransferResponse, TransferStatus, TransferStatusResponse,
};
