// SPDX-License-Identifier: MIT OR Apache-2.0
//! Copy-on-write state updates producing forward and inverse patches.
//!
//! The state manager owns the materialized state and its journal.  Handlers
//! mutate a draft through [`StateManager::update_state`]; the structural
//! differ records the change as a `StatePatches` entry.  Failed invocations
//! are rolled back by compensation: the inverse patches are applied and a
//! compensating entry is appended, keeping the history append-only.

use crate::journal::{Journal, JournalEntry, MarkerKind};
use crate::patch::{apply_all, diff, PatchError, PatchSet};
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

/// Errors from the state manager.
#[derive(Debug, Error)]
pub enum StateError {
    /// There is no uncompensated state change to undo.
    #[error("nothing to compensate")]
    NothingToCompensate,
    /// A stored patch failed to apply; the journal is inconsistent.
    #[error("journal patch failed to apply")]
    PatchFailed(#[from] PatchError),
}

/// Materialized state plus its authoritative journal.
#[derive(Debug, Clone)]
pub struct StateManager {
    state: Value,
    journal: Journal,
    default_state: Value,
    /// Journal positions (within the retained entries) of `StatePatches`
    /// entries that have not been compensated, newest last.
    uncompensated: Vec<usize>,
}

impl StateManager {
    /// Create a manager with no history, starting at `default_state`.
    #[must_use]
    pub fn new(default_state: Value) -> Self {
        Self {
            state: default_state.clone(),
            journal: Journal::new(),
            default_state,
            uncompensated: Vec::new(),
        }
    }

    /// Rebuild a manager from a persisted record.
    ///
    /// The journal is authoritative: the stored projection is compared with
    /// a full replay, and on mismatch the replayed state wins.  Returns the
    /// manager and whether a repair happened.
    #[must_use]
    pub fn hydrate(stored_state: Value, journal: Journal, default_state: Value) -> (Self, bool) {
        let replayed = journal.replay(&default_state);
        let repaired = replayed != stored_state;
        let uncompensated = rebuild_compensation_stack(&journal);
        (
            Self {
                state: replayed,
                journal,
                default_state,
                uncompensated,
            },
            repaired,
        )
    }

    /// Current materialized state.
    #[must_use]
    pub fn state(&self) -> &Value {
        &self.state
    }

    /// The journal.
    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// The initial default state replay starts from.
    #[must_use]
    pub fn default_state(&self) -> &Value {
        &self.default_state
    }

    /// Snapshot the message payload into an `Invocation` entry.
    pub fn record_invocation(&mut self, message_id: impl Into<String>, payload: Value) -> u64 {
        self.journal.append(JournalEntry::Invocation {
            message_id: message_id.into(),
            payload,
            received_at: Utc::now(),
        })
    }

    /// Record a side-effect or suspension-point marker.
    pub fn record_marker(&mut self, kind: MarkerKind, payload: Value) -> u64 {
        self.journal.append(JournalEntry::Marker {
            kind,
            payload,
            recorded_at: Utc::now(),
        })
    }

    /// Run `recipe` against a draft of the current state and journal the
    /// structural difference.
    ///
    /// Returns the recorded patch set; a recipe that changes nothing records
    /// no entry and returns an empty set.  The entire patch is appended
    /// atomically with respect to the journal.
    pub fn update_state(&mut self, recipe: impl FnOnce(&mut Value)) -> PatchSet {
        let mut draft = self.state.clone();
        recipe(&mut draft);
        let set = diff(&self.state, &draft);
        if set.is_empty() {
            return set;
        }
        let pos = self.journal.len();
        self.journal.append(JournalEntry::StatePatches {
            patches: set.forward.clone(),
            inverse_patches: set.inverse.clone(),
            applied_at: Utc::now(),
            compensation: false,
        });
        self.uncompensated.push(pos);
        self.state = draft;
        set
    }

    /// Undo the most recent uncompensated state change.
    ///
    /// Applies the entry's inverse patches to the current state and appends a
    /// compensating `StatePatches` entry, so the history remains append-only.
    pub fn compensate_last_state_change(&mut self) -> Result<(), StateError> {
        let pos = self
            .uncompensated
            .pop()
            .ok_or(StateError::NothingToCompensate)?;
        let (inverse, forward) = match &self.journal.entries()[pos] {
            JournalEntry::StatePatches {
                patches,
                inverse_patches,
                ..
            } => (inverse_patches.clone(), patches.clone()),
            // The stack only ever indexes StatePatches entries.
            _ => return Err(StateError::NothingToCompensate),
        };
        apply_all(&mut self.state, &inverse)?;
        self.journal.append(JournalEntry::StatePatches {
            patches: inverse,
            inverse_patches: forward,
            applied_at: Utc::now(),
            compensation: true,
        });
        Ok(())
    }

    /// Number of uncompensated state changes recorded so far.
    ///
    /// The dispatcher snapshots this before an invocation and rolls back to
    /// it on failure.
    #[must_use]
    pub fn update_mark(&self) -> usize {
        self.uncompensated.len()
    }

    /// Compensate every state change recorded after `mark`, newest first.
    pub fn rollback_to(&mut self, mark: usize) -> Result<(), StateError> {
        while self.uncompensated.len() > mark {
            self.compensate_last_state_change()?;
        }
        Ok(())
    }

    /// Replay the journal from the default state.
    ///
    /// The result is byte-equivalent to [`state`](Self::state) whenever the
    /// journal and projection are consistent.
    #[must_use]
    pub fn replay(&self) -> Value {
        self.journal.replay(&self.default_state)
    }

    /// Compact the journal: the current state becomes the snapshot covering
    /// every entry recorded so far.
    pub fn compact(&mut self) {
        self.journal.compact(self.state.clone());
        self.uncompensated.clear();
    }
}

/// Rebuild the uncompensated-entry stack from a journal.
///
/// Non-compensation `StatePatches` entries push; compensation entries pop
/// their target.
fn rebuild_compensation_stack(journal: &Journal) -> Vec<usize> {
    let mut stack = Vec::new();
    for (pos, entry) in journal.entries().iter().enumerate() {
        if let JournalEntry::StatePatches { compensation, .. } = entry {
            if *compensation {
                stack.pop();
            } else {
                stack.push(pos);
            }
        }
    }
    stack
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_state_materializes_and_journals() {
        let mut mgr = StateManager::new(json!({}));
        let set = mgr.update_state(|s| {
            s["count"] = json!(1);
        });
        assert_eq!(set.forward.len(), 1);
        assert_eq!(mgr.state(), &json!({"count": 1}));
        assert_eq!(mgr.journal().len(), 1);
    }

    #[test]
    fn noop_recipe_records_nothing() {
        let mut mgr = StateManager::new(json!({"a": 1}));
        let set = mgr.update_state(|_| {});
        assert!(set.is_empty());
        assert!(mgr.journal().is_empty());
    }

    #[test]
    fn replay_reproduces_materialized_state() {
        let mut mgr = StateManager::new(json!({"balance": 1000}));
        mgr.update_state(|s| {
            s["reserved"] = json!(100);
            s["available"] = json!(900);
        });
        mgr.update_state(|s| {
            s["available"] = json!(850);
            s["orders"] = json!(["o-1"]);
        });
        assert_eq!(&mgr.replay(), mgr.state());
    }

    #[test]
    fn compensation_restores_prior_state_and_appends() {
        let mut mgr = StateManager::new(json!({"balance": 1000}));
        mgr.record_invocation("m-1", json!({"amount": 100}));
        mgr.update_state(|s| {
            s["reserved"] = json!(100);
            s["available"] = json!(900);
        });
        mgr.compensate_last_state_change().unwrap();

        assert_eq!(mgr.state(), &json!({"balance": 1000}));
        // Invocation + StatePatches + compensating StatePatches.
        assert_eq!(mgr.journal().len(), 3);
        match &mgr.journal().entries()[2] {
            JournalEntry::StatePatches { compensation, .. } => assert!(compensation),
            other => panic!("expected StatePatches, got {other:?}"),
        }
        // Replay over the full history still matches.
        assert_eq!(&mgr.replay(), mgr.state());
    }

    #[test]
    fn compensate_with_no_changes_errors() {
        let mut mgr = StateManager::new(json!({}));
        assert!(matches!(
            mgr.compensate_last_state_change(),
            Err(StateError::NothingToCompensate)
        ));
    }

    #[test]
    fn compensate_twice_walks_backwards() {
        let mut mgr = StateManager::new(json!({}));
        mgr.update_state(|s| s["a"] = json!(1));
        mgr.update_state(|s| s["b"] = json!(2));
        mgr.compensate_last_state_change().unwrap();
        assert_eq!(mgr.state(), &json!({"a": 1}));
        mgr.compensate_last_state_change().unwrap();
        assert_eq!(mgr.state(), &json!({}));
        // A third compensation has nothing left to target.
        assert!(mgr.compensate_last_state_change().is_err());
    }

    #[test]
    fn rollback_to_mark_compensates_only_newer_changes() {
        let mut mgr = StateManager::new(json!({}));
        mgr.update_state(|s| s["kept"] = json!(true));
        let mark = mgr.update_mark();
        mgr.update_state(|s| s["a"] = json!(1));
        mgr.update_state(|s| s["b"] = json!(2));
        mgr.rollback_to(mark).unwrap();
        assert_eq!(mgr.state(), &json!({"kept": true}));
        assert_eq!(&mgr.replay(), mgr.state());
    }

    #[test]
    fn hydrate_prefers_journal_over_stale_projection() {
        let mut source = StateManager::new(json!({}));
        source.update_state(|s| s["a"] = json!(1));
        let journal = source.journal().clone();

        let (mgr, repaired) =
            StateManager::hydrate(json!({"a": 999}), journal, json!({}));
        assert!(repaired);
        assert_eq!(mgr.state(), &json!({"a": 1}));
    }

    #[test]
    fn hydrate_rebuilds_compensation_stack() {
        let mut source = StateManager::new(json!({}));
        source.update_state(|s| s["a"] = json!(1));
        source.update_state(|s| s["b"] = json!(2));
        source.compensate_last_state_change().unwrap();
        let stored = source.state().clone();
        let journal = source.journal().clone();

        let (mut mgr, repaired) = StateManager::hydrate(stored, journal, json!({}));
        assert!(!repaired);
        // Only the first update remains uncompensated.
        mgr.compensate_last_state_change().unwrap();
        assert_eq!(mgr.state(), &json!({}));
        assert!(mgr.compensate_last_state_change().is_err());
    }

    #[test]
    fn compact_covers_history_with_snapshot() {
        let mut mgr = StateManager::new(json!({}));
        mgr.update_state(|s| s["a"] = json!(1));
        mgr.compact();
        assert!(mgr.journal().is_empty());
        assert_eq!(&mgr.replay(), mgr.state());

        mgr.update_state(|s| s["b"] = json!(2));
        assert_eq!(mgr.replay(), json!({"a": 1, "b": 2}));
    }
}
