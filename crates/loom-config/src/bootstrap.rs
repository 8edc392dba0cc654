// SPDX-License-Identifier: MIT OR Apache-2.0
//! Read-only bootstrap configuration.
//!
//! The bootstrap file carries infrastructure connection parameters only —
//! application configuration must never be sourced from it.  Resolution is
//! env-vars-first, then the file named by `LOOM_CONFIG_PATH`, then an
//! ordered list of default candidate paths.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable selecting the bootstrap file.
pub const CONFIG_PATH_ENV: &str = "LOOM_CONFIG_PATH";

/// Candidate bootstrap file paths, tried in order when
/// [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "loom.config.yaml",
    "loom.config.yml",
    ".loom.yaml",
    ".loom.yml",
    "config/loom.yaml",
    "config/loom.yml",
];

/// Connection parameters for one infrastructure backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Connection URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Backend-specific options (namespace, container, pool size, …).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

/// Infrastructure backends a deployment may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfraBackend {
    /// The durable queue.
    Queue,
    /// The actor state store.
    StateStore,
    /// The config document store.
    DocumentStore,
    /// The memory vector store.
    VectorStore,
    /// The embedding provider.
    Embedding,
}

impl InfraBackend {
    /// The bootstrap section and env-var suffix for this backend.
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::StateStore => "state_store",
            Self::DocumentStore => "document_store",
            Self::VectorStore => "vector_store",
            Self::Embedding => "embedding",
        }
    }

    fn env_var(&self) -> String {
        format!("LOOM_{}_URL", self.key().to_ascii_uppercase())
    }
}

const ALL_BACKENDS: &[InfraBackend] = &[
    InfraBackend::Queue,
    InfraBackend::StateStore,
    InfraBackend::DocumentStore,
    InfraBackend::VectorStore,
    InfraBackend::Embedding,
];

/// Whitelisted infrastructure connection parameters.
///
/// The struct is deliberately closed: unknown top-level sections in the
/// bootstrap file are rejected so application configuration cannot leak in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapConfig {
    /// Durable queue connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<ConnectionSettings>,
    /// Actor state store connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_store: Option<ConnectionSettings>,
    /// Config document store connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_store: Option<ConnectionSettings>,
    /// Memory vector store connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_store: Option<ConnectionSettings>,
    /// Embedding provider connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<ConnectionSettings>,
}

impl BootstrapConfig {
    /// Settings for the given backend, if configured.
    #[must_use]
    pub fn backend(&self, backend: InfraBackend) -> Option<&ConnectionSettings> {
        match backend {
            InfraBackend::Queue => self.queue.as_ref(),
            InfraBackend::StateStore => self.state_store.as_ref(),
            InfraBackend::DocumentStore => self.document_store.as_ref(),
            InfraBackend::VectorStore => self.vector_store.as_ref(),
            InfraBackend::Embedding => self.embedding.as_ref(),
        }
    }

    /// Validate that every listed backend resolves connection info.
    ///
    /// Collects every missing key before failing: startup either succeeds or
    /// reports the complete list.  No silent defaults for production
    /// resources.
    pub fn validate_required(&self, required: &[InfraBackend]) -> Result<(), ConfigError> {
        let missing: Vec<String> = required
            .iter()
            .filter(|b| {
                self.backend(**b)
                    .and_then(|s| s.url.as_deref())
                    .is_none_or(str::is_empty)
            })
            .map(|b| format!("{}.url (or {})", b.key(), b.env_var()))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingBootstrapKeys { missing })
        }
    }

    fn backend_mut(&mut self, backend: InfraBackend) -> &mut Option<ConnectionSettings> {
        match backend {
            InfraBackend::Queue => &mut self.queue,
            InfraBackend::StateStore => &mut self.state_store,
            InfraBackend::DocumentStore => &mut self.document_store,
            InfraBackend::VectorStore => &mut self.vector_store,
            InfraBackend::Embedding => &mut self.embedding,
        }
    }
}

/// Apply `LOOM_<BACKEND>_URL` environment overrides on top of `config`.
///
/// Environment variables win over file values for the whitelisted keys.
pub fn apply_env_overrides(config: &mut BootstrapConfig) {
    for backend in ALL_BACKENDS {
        if let Ok(url) = std::env::var(backend.env_var()) {
            let slot = config.backend_mut(*backend);
            let settings = slot.get_or_insert_with(ConnectionSettings::default);
            settings.url = Some(url);
        }
    }
}

/// Parse a YAML bootstrap document.
pub fn parse_bootstrap(content: &str) -> Result<BootstrapConfig, ConfigError> {
    serde_yaml::from_str(content).map_err(|e| ConfigError::Bootstrap {
        reason: e.to_string(),
    })
}

/// Load the bootstrap configuration.
///
/// The file is selected by `LOOM_CONFIG_PATH` when set (missing file is then
/// an error); otherwise the first existing [`DEFAULT_CONFIG_PATHS`] candidate
/// is used, and an absent file yields an empty config.  Environment
/// overrides are applied in both cases.
pub fn load_bootstrap() -> Result<BootstrapConfig, ConfigError> {
    let mut config = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) => {
            let path = PathBuf::from(path);
            info!(target: "loom.config", path = %path.display(), "loading bootstrap config");
            read_bootstrap_file(&path)?
        }
        Err(_) => match DEFAULT_CONFIG_PATHS.iter().find(|p| Path::new(p).exists()) {
            Some(path) => {
                info!(target: "loom.config", %path, "loading bootstrap config");
                read_bootstrap_file(Path::new(path))?
            }
            None => {
                debug!(target: "loom.config", "no bootstrap file found, using env only");
                BootstrapConfig::default()
            }
        },
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

fn read_bootstrap_file(path: &Path) -> Result<BootstrapConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Bootstrap {
        reason: format!("read {}: {e}", path.display()),
    })?;
    parse_bootstrap(&content)
}
