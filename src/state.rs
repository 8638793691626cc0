//! Cache of the most recently reported register values.
//!
//! The session worker commits decoded values here and consumers read them
//! back or subscribe to refresh notifications. Analog channels are throttled
//! so a chatty device does not turn every report into a state change.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::registers::RegisterIndex;
use crate::values::RegisterValue;

/// Outcome of committing a freshly decoded value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Commit {
    /// The stored value differs from what was there before.
    Changed,
    /// The same value was already stored.
    Unchanged,
    /// A rate-limited channel reported again before its throttle window
    /// elapsed; the update was dropped.
    Throttled,
}

/// Broadcast when a batch of updates has been applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Refresh {
    /// Number of registers whose value changed in the batch.
    pub changed: usize,
}

pub struct DeviceState {
    inner: Mutex<Inner>,
    throttle: Duration,
    refreshes: broadcast::Sender<Refresh>,
}

#[derive(Default)]
struct Inner {
    values: HashMap<u16, RegisterValue>,
    committed_at: HashMap<u16, Instant>,
}

impl DeviceState {
    pub fn new(throttle: Duration) -> Self {
        let (refreshes, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(Inner::default()),
            throttle,
            refreshes,
        }
    }

    /// Stores a decoded value.
    ///
    /// Rate-limited channels only commit when their throttle window has
    /// elapsed since the previous commit; a commit refreshes the window even
    /// when the value itself did not change.
    pub fn commit(&self, register: RegisterIndex, value: RegisterValue, now: Instant) -> Commit {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let address = register.address();
        if register.kind().is_rate_limited() {
            if let Some(committed) = inner.committed_at.get(&address) {
                if now.saturating_duration_since(*committed) < self.throttle {
                    return Commit::Throttled;
                }
            }
            inner.committed_at.insert(address, now);
        }
        if inner.values.get(&address) == Some(&value) {
            return Commit::Unchanged;
        }
        inner.values.insert(address, value);
        Commit::Changed
    }

    pub fn get(&self, register: RegisterIndex) -> Option<RegisterValue> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.values.get(&register.address()).cloned()
    }

    /// All cached values, ordered by register address.
    pub fn snapshot(&self) -> Vec<(RegisterIndex, RegisterValue)> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<_> = inner
            .values
            .iter()
            .filter_map(|(address, value)| {
                Some((RegisterIndex::from_address(*address)?, value.clone()))
            })
            .collect();
        entries.sort_by_key(|(register, _)| register.address());
        entries
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Refresh> {
        self.refreshes.subscribe()
    }

    /// Announces that a batch of commits has been applied. A lost
    /// notification is fine when nobody is listening.
    pub fn notify_refreshed(&self, changed: usize) {
        let _ = self.refreshes.send(Refresh { changed });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(name: &str) -> RegisterIndex {
        RegisterIndex::from_name(name).unwrap()
    }

    #[test]
    fn analog_updates_are_throttled() {
        let state = DeviceState::new(Duration::from_secs(100));
        let out_temp = register("out_temp");
        let start = Instant::now();

        assert_eq!(
            state.commit(out_temp, RegisterValue::Number(20.0), start),
            Commit::Changed
        );
        assert_eq!(
            state.commit(
                out_temp,
                RegisterValue::Number(21.0),
                start + Duration::from_secs(10)
            ),
            Commit::Throttled
        );
        assert_eq!(state.get(out_temp), Some(RegisterValue::Number(20.0)));
        assert_eq!(
            state.commit(
                out_temp,
                RegisterValue::Number(21.0),
                start + Duration::from_secs(110)
            ),
            Commit::Changed
        );
        assert_eq!(state.get(out_temp), Some(RegisterValue::Number(21.0)));
    }

    #[test]
    fn digital_updates_always_commit() {
        let state = DeviceState::new(Duration::from_secs(100));
        let party = register("party_mode");
        let start = Instant::now();

        assert_eq!(state.commit(party, RegisterValue::Bool(true), start), Commit::Changed);
        assert_eq!(
            state.commit(party, RegisterValue::Bool(false), start + Duration::from_secs(1)),
            Commit::Changed
        );
        assert_eq!(state.get(party), Some(RegisterValue::Bool(false)));
    }

    #[test]
    fn repeated_values_report_unchanged() {
        let state = DeviceState::new(Duration::from_secs(0));
        let party = register("party_mode");
        let start = Instant::now();

        assert_eq!(state.commit(party, RegisterValue::Bool(true), start), Commit::Changed);
        assert_eq!(state.commit(party, RegisterValue::Bool(true), start), Commit::Unchanged);
    }

    #[test]
    fn snapshot_is_sorted_by_address() {
        let state = DeviceState::new(Duration::from_secs(0));
        let now = Instant::now();
        state.commit(register("out_temp"), RegisterValue::Number(20.0), now);
        state.commit(register("dhw_opmode"), RegisterValue::Text("Off".into()), now);

        let names: Vec<_> = state
            .snapshot()
            .into_iter()
            .map(|(register, _)| register.name())
            .collect();
        assert_eq!(names, vec!["dhw_opmode", "out_temp"]);
    }

    #[test]
    fn refresh_notifications_reach_subscribers() {
        let state = DeviceState::new(Duration::from_secs(0));
        let mut refreshes = state.subscribe();
        state.notify_refreshed(3);
        assert_eq!(refreshes.try_recv(), Ok(Refresh { changed: 3 }));
    }
}
