//! Freshness of wrap-around sequence numbers.
//!
//! Sequence numbers live in `[0, max_seqnum)`. A number is fresher than the
//! last accepted one when it lies strictly ahead of it within `window` on the
//! circle. A key that stays silent longer than the silence timeout is
//! forgotten, so a restarted originator counting again from zero is accepted.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use xroute_wire::NodeId;

/// Outcome of a freshness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Strictly newer than the stored value (or nothing usable is stored)
    Fresh,
    /// Equal to the stored value
    Duplicate,
    /// Behind the stored value or too far ahead of it
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct SequenceState {
    last_accepted: u32,
    accepted_at: Instant,
}

/// Per-originator last-accepted sequence numbers
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    max_seqnum: u32,
    window: u32,
    silence_timeout: Duration,
    states: HashMap<NodeId, SequenceState>,
}

impl SequenceTracker {
    /// Create a tracker for the sequence space `[0, max_seqnum)`
    pub fn new(max_seqnum: u32, window: u32, silence_timeout: Duration) -> Self {
        debug_assert!(window < max_seqnum);
        Self {
            max_seqnum,
            window,
            silence_timeout,
            states: HashMap::new(),
        }
    }

    /// Size of the sequence space
    pub fn max_seqnum(&self) -> u32 {
        self.max_seqnum
    }

    /// Classify `seq` from `key` without recording it
    pub fn freshness(&self, key: &NodeId, seq: u32, now: Instant) -> Freshness {
        let Some(state) = self.states.get(key) else {
            return Freshness::Fresh;
        };

        if now.saturating_duration_since(state.accepted_at) > self.silence_timeout {
            // Restarted originator; whatever it sends now is its current view
            return Freshness::Fresh;
        }

        if seq == state.last_accepted {
            return Freshness::Duplicate;
        }

        if is_ahead(seq, state.last_accepted, self.max_seqnum, self.window) {
            Freshness::Fresh
        } else {
            Freshness::Stale
        }
    }

    /// Classify `seq` and record it when fresh
    pub fn accept(&mut self, key: &NodeId, seq: u32, now: Instant) -> Freshness {
        let freshness = self.freshness(key, seq, now);
        if freshness == Freshness::Fresh {
            self.states.insert(
                key.clone(),
                SequenceState {
                    last_accepted: seq,
                    accepted_at: now,
                },
            );
        }
        freshness
    }

    /// Last accepted sequence number for `key`
    pub fn last_accepted(&self, key: &NodeId) -> Option<u32> {
        self.states.get(key).map(|state| state.last_accepted)
    }

    /// Forget keys silent for longer than the timeout
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.states.len();
        let timeout = self.silence_timeout;
        self.states
            .retain(|_, state| now.saturating_duration_since(state.accepted_at) <= timeout);
        before - self.states.len()
    }

    /// Drop the state of one key
    pub fn forget(&mut self, key: &NodeId) {
        self.states.remove(key);
    }

    /// Successor of `seq` in the sequence space
    pub fn next_after(&self, seq: u32) -> u32 {
        (seq + 1) % self.max_seqnum
    }

    /// Whether `seq` lies ahead of `last` within the window
    pub fn is_ahead(&self, seq: u32, last: u32) -> bool {
        is_ahead(seq, last, self.max_seqnum, self.window)
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no key is tracked
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

fn is_ahead(seq: u32, last: u32, max: u32, window: u32) -> bool {
    let diff = (u64::from(seq) + u64::from(max) - u64::from(last) % u64::from(max)) % u64::from(max);
    diff != 0 && diff < u64::from(window)
}
