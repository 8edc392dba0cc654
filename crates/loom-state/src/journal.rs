// SPDX-License-Identifier: MIT OR Apache-2.0
//! Append-only journal of everything that observably changed an actor.
//!
//! Entries are totally ordered by insertion index.  Replaying the journal
//! from the initial default state (or from the compaction snapshot, when one
//! exists) reproduces the current observable state exactly.

use crate::patch::PatchOp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Marker kinds recorded for side effects and suspension points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    /// A child actor spawn was requested.
    SpawnChild,
    /// An activity request was published.
    ActivityScheduled,
    /// An activity result was received.
    ActivityCompleted,
    /// The handler began waiting for an external event.
    EventAwaited,
    /// A matching external event was routed to the handler.
    EventReceived,
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum JournalEntry {
    /// A message began processing; `payload` is snapshotted at receipt.
    Invocation {
        /// Message id of the invocation.
        message_id: String,
        /// Payload snapshot taken when processing began.
        payload: Value,
        /// When processing began.
        received_at: DateTime<Utc>,
    },
    /// One accepted state update.
    StatePatches {
        /// Forward patches applied to the state.
        patches: Vec<PatchOp>,
        /// Patches that undo `patches` exactly, applied in order.
        inverse_patches: Vec<PatchOp>,
        /// When the update was applied.
        applied_at: DateTime<Utc>,
        /// Whether this entry compensates an earlier `StatePatches` entry.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        compensation: bool,
    },
    /// A side-effect or suspension-point marker.
    Marker {
        /// What kind of marker this is.
        kind: MarkerKind,
        /// Marker payload (correlation ids, request bodies, …).
        payload: Value,
        /// When the marker was recorded.
        recorded_at: DateTime<Utc>,
    },
}

/// The append-only journal.
///
/// `base_index` is the absolute index of the first retained entry; entries
/// before it have been compacted away and are covered by `snapshot`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Journal {
    /// Absolute index of the first retained entry.
    #[serde(default)]
    base_index: u64,
    /// State covering every compacted entry, if compaction has happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    snapshot: Option<Value>,
    /// Retained entries, oldest first.
    entries: Vec<JournalEntry>,
}

impl Journal {
    /// Create an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, returning its absolute index.
    pub fn append(&mut self, entry: JournalEntry) -> u64 {
        self.entries.push(entry);
        self.base_index + self.entries.len() as u64 - 1
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the journal retains no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Absolute index of the next entry to be appended.
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.base_index + self.entries.len() as u64
    }

    /// Absolute index of the first retained entry.
    #[must_use]
    pub fn base_index(&self) -> u64 {
        self.base_index
    }

    /// The compaction snapshot, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<&Value> {
        self.snapshot.as_ref()
    }

    /// Iterate over retained entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &JournalEntry> {
        self.entries.iter()
    }

    /// Retained entries as a slice.
    #[must_use]
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Drop every retained entry, recording `snapshot` as the state that
    /// covers them.  Replay after compaction starts from the snapshot.
    pub fn compact(&mut self, snapshot: Value) {
        self.base_index += self.entries.len() as u64;
        self.entries.clear();
        self.snapshot = Some(snapshot);
    }

    /// Fold the retained entries over `default_state`, applying forward
    /// patches in order.  Markers and invocations do not change state.
    #[must_use]
    pub fn replay(&self, default_state: &Value) -> Value {
        let mut state = self
            .snapshot
            .clone()
            .unwrap_or_else(|| default_state.clone());
        for entry in &self.entries {
            if let JournalEntry::StatePatches { patches, .. } = entry {
                // A stored patch always applied once; a failure here means
                // the journal itself is corrupt, which replay surfaces by
                // keeping the pre-entry state.
                let _ = crate::patch::apply_all(&mut state, patches);
            }
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::diff;
    use serde_json::json;

    fn patch_entry(old: &Value, new: &Value) -> JournalEntry {
        let set = diff(old, new);
        JournalEntry::StatePatches {
            patches: set.forward,
            inverse_patches: set.inverse,
            applied_at: Utc::now(),
            compensation: false,
        }
    }

    #[test]
    fn append_returns_increasing_absolute_indices() {
        let mut j = Journal::new();
        let a = j.append(JournalEntry::Marker {
            kind: MarkerKind::EventAwaited,
            payload: json!({}),
            recorded_at: Utc::now(),
        });
        let b = j.append(JournalEntry::Marker {
            kind: MarkerKind::EventReceived,
            payload: json!({}),
            recorded_at: Utc::now(),
        });
        assert_eq!((a, b), (0, 1));
        assert_eq!(j.next_index(), 2);
    }

    #[test]
    fn replay_folds_patches_in_order() {
        let s0 = json!({});
        let s1 = json!({"a": 1});
        let s2 = json!({"a": 1, "b": [true]});
        let mut j = Journal::new();
        j.append(patch_entry(&s0, &s1));
        j.append(patch_entry(&s1, &s2));
        assert_eq!(j.replay(&s0), s2);
    }

    #[test]
    fn compaction_preserves_replay() {
        let s0 = json!({});
        let s1 = json!({"a": 1});
        let s2 = json!({"a": 2});
        let mut j = Journal::new();
        j.append(patch_entry(&s0, &s1));
        j.compact(s1.clone());
        assert!(j.is_empty());
        assert_eq!(j.base_index(), 1);
        assert_eq!(j.replay(&s0), s1);

        j.append(patch_entry(&s1, &s2));
        assert_eq!(j.replay(&s0), s2);
        assert_eq!(j.next_index(), 2);
    }

    #[test]
    fn compensation_flag_is_omitted_when_false() {
        let entry = patch_entry(&json!({}), &json!({"a": 1}));
        let v = serde_json::to_value(&entry).unwrap();
        assert!(v.get("compensation").is_none());
    }

    #[test]
    fn journal_roundtrips_through_json() {
        let mut j = Journal::new();
        j.append(JournalEntry::Invocation {
            message_id: "m-1".into(),
            payload: json!({"k": "v"}),
            received_at: Utc::now(),
        });
        j.append(patch_entry(&json!({}), &json!({"a": 1})));
        let json = serde_json::to_string(&j).unwrap();
        let back: Journal = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.replay(&json!({})), json!({"a": 1}));
    }
}
