// SPDX-License-Identifier: MIT OR Apache-2.0
//! loom-config
//!
//! Hierarchical, context-aware configuration.
//!
//! Responsibilities:
//! - validate key paths and derive their storage partition
//! - generate ordered fallback paths from a key and a [`ConfigContext`]
//! - resolve keys through a read-through TTL cache over a persist store
//! - notify in-process listeners on every successful write
//! - load the read-only bootstrap file (infrastructure connection
//!   parameters only, env-vars-first)

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Read-only bootstrap configuration for infrastructure connections.
pub mod bootstrap;
/// Resolution context and fallback-path generation.
pub mod context;
/// Key-path validation and partition derivation.
pub mod keypath;
/// Layered resolver: TTL cache over a persist store, change listeners.
pub mod resolver;
/// Config store port and the memory / file-document implementations.
pub mod store;

pub use bootstrap::{load_bootstrap, BootstrapConfig, ConnectionSettings, InfraBackend};
pub use context::ConfigContext;
pub use keypath::{partition_of, validate_key_path};
pub use resolver::{ChangeListenerHandle, ConfigChange, ConfigChangeKind, ConfigResolver};
pub use store::{ConfigRecord, ConfigStore, FileConfigStore, MemoryConfigStore};

use thiserror::Error;

/// Errors from configuration stores and the resolver.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The key path failed syntactic validation.
    #[error("invalid key path '{path}': {reason}")]
    InvalidKeyPath {
        /// The rejected path.
        path: String,
        /// Which rule it broke.
        reason: String,
    },
    /// The backing store failed.
    #[error("config store failed: {0}")]
    Store(#[source] anyhow::Error),
    /// The bootstrap file could not be read or parsed.
    #[error("bootstrap config error: {reason}")]
    Bootstrap {
        /// Human-readable detail.
        reason: String,
    },
    /// Required infrastructure keys are missing at startup.
    #[error("missing required bootstrap keys: {missing:?}")]
    MissingBootstrapKeys {
        /// Every unresolved key, collected before failing.
        missing: Vec<String>,
    },
}
