//! # Timer Registry
//!
//! State machines in Herald never own real timers. They ask their host to
//! arm or cancel a timer by kind, and the host feeds a fired `TimerToken`
//! back in. Each arm bumps a generation counter, so a token that fires after
//! its timer was cancelled or re-armed is recognised as stale and ignored.
//! A cancelled timer can therefore never resurrect a torn-down state.

use std::collections::BTreeMap;
use std::time::Duration;

/// Identifies one arming of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken<K> {
    pub kind: K,
    pub generation: u64,
}

impl<K> TimerToken<K> {
    /// Re-key the token, e.g. to wrap a component's kind in a coordinator's.
    pub fn map<J>(self, f: impl FnOnce(K) -> J) -> TimerToken<J> {
        TimerToken {
            kind: f(self.kind),
            generation: self.generation,
        }
    }
}

/// Instruction to the host's scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand<K> {
    /// Schedule `token` to fire after `delay`, replacing any pending timer
    /// of the same kind.
    Arm { token: TimerToken<K>, delay: Duration },
    /// Drop any pending timer of this kind.
    Cancel { kind: K },
}

impl<K> TimerCommand<K> {
    pub fn map<J>(self, f: impl FnOnce(K) -> J) -> TimerCommand<J> {
        match self {
            TimerCommand::Arm { token, delay } => TimerCommand::Arm {
                token: token.map(f),
                delay,
            },
            TimerCommand::Cancel { kind } => TimerCommand::Cancel { kind: f(kind) },
        }
    }
}

/// Tracks which timer kinds are armed and at which generation.
#[derive(Debug, Clone)]
pub struct TimerRegistry<K: Copy + Ord> {
    armed: BTreeMap<K, u64>,
    next_generation: u64,
}

impl<K: Copy + Ord> Default for TimerRegistry<K> {
    fn default() -> Self {
        Self {
            armed: BTreeMap::new(),
            next_generation: 1,
        }
    }
}

impl<K: Copy + Ord> TimerRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) `kind`. Any earlier token for it becomes stale.
    pub fn arm(&mut self, kind: K, delay: Duration) -> TimerCommand<K> {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.armed.insert(kind, generation);
        TimerCommand::Arm {
            token: TimerToken { kind, generation },
            delay,
        }
    }

    /// Disarm `kind`. Returns a cancel command only if it was armed.
    pub fn cancel(&mut self, kind: K) -> Option<TimerCommand<K>> {
        self.armed
            .remove(&kind)
            .map(|_| TimerCommand::Cancel { kind })
    }

    pub fn cancel_all(&mut self) -> Vec<TimerCommand<K>> {
        std::mem::take(&mut self.armed)
            .into_keys()
            .map(|kind| TimerCommand::Cancel { kind })
            .collect()
    }

    /// Consume a fired token. Returns `true` only if it is the current arming
    /// of its kind; the kind is then disarmed.
    pub fn fire(&mut self, token: TimerToken<K>) -> bool {
        match self.armed.get(&token.kind) {
            Some(&generation) if generation == token.generation => {
                self.armed.remove(&token.kind);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, kind: K) -> bool {
        self.armed.contains_key(&kind)
    }

    pub fn armed_kinds(&self) -> Vec<K> {
        self.armed.keys().copied().collect()
    }
}
