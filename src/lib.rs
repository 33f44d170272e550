//! AWG Admin - Peer Lifecycle Manager for AmneziaWG
//!
//! Manages the peers of a single obfuscated WireGuard-family (AmneziaWG)
//! interface: allocating tunnel addresses, generating key material, keeping
//! a durable peer roster in sync with the live interface, and rendering
//! per-peer client configuration.
//!
//! # Architecture
//!
//! The [`orchestrator::PeerOrchestrator`] composes a [`store::PeerRepository`]
//! with an [`interface::InterfaceController`]. Two controllers exist: one that
//! drives the `awg`/`wg` command line tools, and an in-memory simulation for
//! development and tests. Both produce identically shaped data, so callers
//! never branch on which one is active.
//!
//! # Features
//!
//! - Lowest-free address allocation inside the server's /24
//! - Idempotent peer add/remove against the live interface
//! - Online detection from handshake recency
//! - Deterministic client configuration rendering
//! - Persisted obfuscation/network overrides with validation
//! - Startup reconciliation and expiry sweeps
//! - HTTP API and command line front-ends

pub mod config;
pub mod error;
pub mod keys;
pub mod interface;
pub mod store;
pub mod orchestrator;
pub mod render;
pub mod settings;
pub mod api;

pub use config::AwgAdminConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::AwgAdminConfig;
    pub use crate::error::{Error, Result};
    pub use crate::interface::{
        InterfaceController, ObfuscationParameters, PeerDump, ProcessInterfaceController,
        ServerIdentity, SimulatedInterfaceController,
    };
    pub use crate::orchestrator::{PeerOrchestrator, PeerRuntimeStatus};
    pub use crate::settings::SettingsService;
    pub use crate::store::{Database, Peer, PeerRepository, SettingsStore, SqlitePeerRepository};
}
