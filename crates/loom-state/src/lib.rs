// SPDX-License-Identifier: MIT OR Apache-2.0
//! loom-state
//!
//! Durable, replayable actor state.
//!
//! Responsibilities:
//! - a minimal path-based patch language (`set` / `insert` / `delete`) over a
//!   JSON value tree, where every forward patch carries an exact inverse
//! - a structural differ that turns a draft mutation into patch lists
//! - an append-only journal of invocations, state patches, and markers
//! - the state manager: draft-style updates, compensation, replay, compaction

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Append-only journal of invocations, patches, and markers.
pub mod journal;
/// State manager: draft updates, compensation, replay.
pub mod manager;
/// Patch language and structural differ.
pub mod patch;

pub use journal::{Journal, JournalEntry, MarkerKind};
pub use manager::{StateError, StateManager};
pub use patch::{diff, Path, PatchError, PatchOp, PatchSet, PathSegment};
