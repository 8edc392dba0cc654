// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for Loom.
//!
//! Every Loom error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context.  The dispatcher and queue layers use
//! [`ErrorCode::is_retryable`] to decide whether a failed invocation goes
//! back on the queue or is dead-lettered.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration resolution and validation errors.
    Config,
    /// Authorization decisions.
    Auth,
    /// External-dependency failures (activities, embeddings, stores).
    Dependency,
    /// Resilience-layer rejections (timeouts, open breakers, rate limits).
    Resilience,
    /// Queue and delivery errors.
    Queue,
    /// Actor state, journal, and lease errors.
    State,
    /// Semantic memory errors.
    Memory,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Auth => "auth",
            Self::Dependency => "dependency",
            Self::Resilience => "resilience",
            Self::Queue => "queue",
            Self::State => "state",
            Self::Memory => "memory",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Config --
    /// A required key has no value at any fallback path.
    ConfigMissing,
    /// A value exists but fails validation.
    ConfigInvalid,

    // -- Auth --
    /// The authorization plugin denied the action.
    Unauthorized,

    // -- Resilience --
    /// An operation did not complete by its deadline.
    Timeout,
    /// The circuit breaker rejected the call without attempting it.
    CircuitOpen,
    /// A rate limit would be exceeded and waiting is not permitted.
    RateLimited,

    // -- Dependency --
    /// An external dependency returned a retryable error.
    Transient,
    /// An external dependency returned a non-retryable error.
    Permanent,

    // -- Queue --
    /// A job exhausted its retry budget and was dead-lettered.
    DeadLettered,
    /// The named queue does not exist or is not bound.
    QueueNotFound,

    // -- State --
    /// The actor's lease could not be acquired.
    LeaseUnavailable,
    /// The state port failed to load or save an actor record.
    StateStoreFailed,
    /// The journal could not be replayed into a consistent state.
    JournalCorrupt,

    // -- Memory --
    /// The memory index or embedding provider failed.
    MemoryUnavailable,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigMissing | Self::ConfigInvalid => ErrorCategory::Config,

            Self::Unauthorized => ErrorCategory::Auth,

            Self::Timeout | Self::CircuitOpen | Self::RateLimited => ErrorCategory::Resilience,

            Self::Transient | Self::Permanent => ErrorCategory::Dependency,

            Self::DeadLettered | Self::QueueNotFound => ErrorCategory::Queue,

            Self::LeaseUnavailable | Self::StateStoreFailed | Self::JournalCorrupt => {
                ErrorCategory::State
            }

            Self::MemoryUnavailable => ErrorCategory::Memory,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"CONFIG_MISSING"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigMissing => "CONFIG_MISSING",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Timeout => "TIMEOUT",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::RateLimited => "RATE_LIMITED",
            Self::Transient => "TRANSIENT",
            Self::Permanent => "PERMANENT",
            Self::DeadLettered => "DEAD_LETTERED",
            Self::QueueNotFound => "QUEUE_NOT_FOUND",
            Self::LeaseUnavailable => "LEASE_UNAVAILABLE",
            Self::StateStoreFailed => "STATE_STORE_FAILED",
            Self::JournalCorrupt => "JOURNAL_CORRUPT",
            Self::MemoryUnavailable => "MEMORY_UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether a failure with this code should be retried by the delivery
    /// layer.
    ///
    /// `Timeout` and `CircuitOpen` count as retryable: a later attempt may
    /// find the dependency healthy or the breaker half-open.  `Unauthorized`,
    /// `Permanent`, and config errors are terminal for the message.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::CircuitOpen
                | Self::RateLimited
                | Self::Transient
                | Self::LeaseUnavailable
                | Self::StateStoreFailed
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// LoomError
// ---------------------------------------------------------------------------

/// Unified Loom error.
///
/// Pairs a stable [`ErrorCode`] with a human-readable message, structured
/// key-value context for diagnostics, and an optional wrapped cause.
///
/// ```
/// use loom_error::{ErrorCode, LoomError};
///
/// let err = LoomError::new(ErrorCode::Timeout, "activity did not finish in 30 s")
///     .with_context("activity", "score-lead")
///     .with_context("timeout_ms", 30_000);
/// ```
pub struct LoomError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Structured diagnostic context.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl LoomError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Shorthand for a `ConfigMissing` error carrying every searched path.
    pub fn config_missing(key: &str, searched_paths: &[String]) -> Self {
        Self::new(
            ErrorCode::ConfigMissing,
            format!(
                "no value for '{key}' at any fallback path (searched: {})",
                searched_paths.join(", ")
            ),
        )
        .with_context("searched_paths", searched_paths)
    }

    /// Attach one context entry.
    ///
    /// Anything serialisable works as a value; one that fails to serialise
    /// is dropped rather than failing the error path it documents.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Wrap the error that caused this one.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The broad [`ErrorCategory`] of this error's code.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Whether the delivery layer should retry after this error.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// The wire shape of this error: code, message, and context, with the
    /// opaque source flattened to its display form.
    pub fn to_dto(&self) -> LoomErrorDto {
        LoomErrorDto {
            code: self.code,
            message: self.message.clone(),
            context: self.context.clone(),
            source_message: self.source.as_deref().map(ToString::to_string),
        }
    }
}

impl fmt::Debug for LoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LoomError[{}/{}] {:?}",
            self.category(),
            self.code,
            self.message
        )?;
        if !self.context.is_empty() {
            write!(f, " {:?}", self.context)?;
        }
        if let Some(source) = &self.source {
            write!(f, " <- {source}")?;
        }
        Ok(())
    }
}

impl fmt::Display for LoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        let mut separator = " (";
        for (key, value) in &self.context {
            write!(f, "{separator}{key}={value}")?;
            separator = ", ";
        }
        if separator == ", " {
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl std::error::Error for LoomError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Wire shape
// ---------------------------------------------------------------------------

/// What observers receive in failure events: the code, a redacted message,
/// and the structured context.  The cause chain survives only as text, so a
/// DTO round-trip deliberately loses the boxed source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoomErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// Display form of the source error, if one was attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&LoomError> for LoomErrorDto {
    fn from(err: &LoomError) -> Self {
        err.to_dto()
    }
}

impl From<LoomErrorDto> for LoomError {
    fn from(dto: LoomErrorDto) -> Self {
        let mut err = LoomError::new(dto.code, dto.message);
        err.context = dto.context;
        err
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
