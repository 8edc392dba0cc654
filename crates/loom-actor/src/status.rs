// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lifecycle states of a hydrated actor.

use serde::{Deserialize, Serialize};

/// Where an actor is in its lifecycle.
///
/// `Created → Hydrating → Executing → Persisting → Idle`, looping back to
/// `Executing` for subsequent messages; `Evicted` on idle timeout, LRU
/// pressure, or explicit teardown.  Only explicit destruction is terminal —
/// an evicted actor re-enters at `Hydrating` on its next message.  A
/// hydration that never executes (an idempotency short-circuit) settles at
/// `Idle` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorStatus {
    /// Known to the runtime, never hydrated.
    Created,
    /// Loading its record and replaying the journal.
    Hydrating,
    /// Running a handler invocation.
    Executing,
    /// Writing the invocation delta back to the state port.
    Persisting,
    /// Hydrated, waiting for the next message.
    Idle,
    /// Dropped from memory; the persisted record remains.
    Evicted,
}

impl ActorStatus {
    /// Whether a transition from `self` to `next` is part of the lifecycle.
    #[must_use]
    pub fn can_transition_to(&self, next: ActorStatus) -> bool {
        use ActorStatus::{Created, Evicted, Executing, Hydrating, Idle, Persisting};
        matches!(
            (self, next),
            (Created, Hydrating)
                | (Hydrating, Executing)
                | (Hydrating, Idle)
                | (Executing, Persisting)
                | (Persisting, Idle)
                | (Idle, Executing)
                | (Idle, Evicted)
                | (Evicted, Hydrating)
        )
    }
}

impl std::fmt::Display for ActorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Hydrating => "hydrating",
            Self::Executing => "executing",
            Self::Persisting => "persisting",
            Self::Idle => "idle",
            Self::Evicted => "evicted",
        };
        f.write_str(s)
    }
}
