//! trdl Runtime - Repository Engine and Agent Client
//!
//! This crate implements the TUF client, the per-repository engine
//! (channel updates, release lookup, garbage collection, activation
//! scripts) and the top-level client with self-update.

pub mod client;
pub mod repo;
pub mod script;
pub mod self_update;
pub mod tuf;

// Re-export common types
pub use client::{http_tuf_connector, Client, SelfUpdateSettings, TufConnector};
pub use repo::{current_platform, RepoClient, RepoLayout, RELEASE_RETENTION};
pub use script::{ActivationScript, Shell, UseOptions};
pub use self_update::SELF_UPDATE_DELAY;
pub use tuf::{MemoryRemote, MemoryTufClient, TargetMeta, TufClient, TufRepository};
