//! Notification de-duplication.
//!
//! A dose fires at most one reminder. The due timestamp of the last reminder
//! per (profile, medication) is kept as a watermark in a [`WatermarkStore`];
//! the gate only fires for due doses strictly newer than the watermark and
//! claims them with a compare-and-set, so concurrent pollers agree on one winner.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Identifies one watermark
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatermarkKey {
    pub profile_id: String,
    pub medication_id: String,
}

impl WatermarkKey {
    pub fn new(profile_id: impl Into<String>, medication_id: impl Into<String>) -> Self {
        Self {
            profile_id: profile_id.into(),
            medication_id: medication_id.into(),
        }
    }
}

/// Persisted per-key "last notified" timestamps
pub trait WatermarkStore: Send + Sync {
    /// Current watermark; `None` if never notified
    fn get(&self, key: &WatermarkKey) -> Result<Option<DateTime<Utc>>>;

    /// Store `new` only if the watermark still equals `expected`
    ///
    /// Returns `false` when another writer changed it first.
    fn compare_and_set(
        &self,
        key: &WatermarkKey,
        expected: Option<DateTime<Utc>>,
        new: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Outcome of [`should_notify`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NotifyDecision {
    pub fire: bool,
    pub watermark: Option<DateTime<Utc>>,
}

/// Decide whether a dose due at `due` needs a reminder
///
/// Fires only once the dose is actually due and newer than the watermark. On
/// fire the returned watermark is `due`; otherwise it is unchanged.
pub fn should_notify(
    due: DateTime<Utc>,
    now: DateTime<Utc>,
    watermark: Option<DateTime<Utc>>,
) -> NotifyDecision {
    let fire = due <= now && watermark.map_or(true, |w| w < due);
    NotifyDecision {
        fire,
        watermark: if fire { Some(due) } else { watermark },
    }
}

/// Stateful gate over a watermark store
pub struct NotificationGate<S> {
    store: S,
}

impl<S: WatermarkStore> NotificationGate<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Claim the reminder for `due` if it should fire
    ///
    /// Returns `true` for exactly one caller per due timestamp.
    pub fn check(
        &self,
        profile_id: &str,
        medication_id: &str,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let key = WatermarkKey::new(profile_id, medication_id);
        let current = self.store.get(&key)?;

        let decision = should_notify(due, now, current);
        if !decision.fire {
            return Ok(false);
        }

        let claimed = self.store.compare_and_set(&key, current, due)?;
        if claimed {
            tracing::debug!("Claimed reminder for {:?} due {}", key, due);
        } else {
            tracing::debug!("Reminder for {:?} due {} already claimed", key, due);
        }
        Ok(claimed)
    }
}

/// In-memory watermark store
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    marks: Mutex<HashMap<WatermarkKey, DateTime<Utc>>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn get(&self, key: &WatermarkKey) -> Result<Option<DateTime<Utc>>> {
        let marks = self
            .marks
            .lock()
            .map_err(|e| Error::storage("watermark lock poisoned", e))?;
        Ok(marks.get(key).copied())
    }

    fn compare_and_set(
        &self,
        key: &WatermarkKey,
        expected: Option<DateTime<Utc>>,
        new: DateTime<Utc>,
    ) -> Result<bool> {
        let mut marks = self
            .marks
            .lock()
            .map_err(|e| Error::storage("watermark lock poisoned", e))?;
        if marks.get(key).copied() != expected {
            return Ok(false);
        }
        marks.insert(key.clone(), new);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, min, 0).unwrap()
    }

    #[test]
    fn test_fires_without_watermark() {
        let due = at(8, 0);
        let decision = should_notify(due, at(8, 1), None);
        assert_eq!(
            decision,
            NotifyDecision {
                fire: true,
                watermark: Some(due)
            }
        );
    }

    #[test]
    fn test_second_call_with_updated_watermark_is_silent() {
        let due = at(8, 0);
        let now = at(8, 1);

        let first = should_notify(due, now, None);
        let second = should_notify(due, now, first.watermark);

        assert!(first.fire);
        assert!(!second.fire);
        assert_eq!(second.watermark, Some(due));
    }

    #[test]
    fn test_upcoming_dose_does_not_fire() {
        let decision = should_notify(at(13, 0), at(12, 59), None);
        assert!(!decision.fire);
        assert_eq!(decision.watermark, None);
    }

    #[test]
    fn test_newer_due_dose_fires_again() {
        let decision = should_notify(at(20, 0), at(20, 0), Some(at(8, 0)));
        assert!(decision.fire);

        let stale = should_notify(at(8, 0), at(20, 0), Some(at(20, 0)));
        assert!(!stale.fire);
        assert_eq!(stale.watermark, Some(at(20, 0)));
    }

    #[test]
    fn test_gate_persists_watermark() {
        let gate = NotificationGate::new(MemoryWatermarkStore::new());

        assert!(gate.check("p1", "m1", at(8, 0), at(8, 2)).unwrap());
        assert!(!gate.check("p1", "m1", at(8, 0), at(8, 3)).unwrap());
        // Independent per profile and medication
        assert!(gate.check("p2", "m1", at(8, 0), at(8, 3)).unwrap());
        assert!(gate.check("p1", "m2", at(8, 0), at(8, 3)).unwrap());

        let key = WatermarkKey::new("p1", "m1");
        assert_eq!(gate.store().get(&key).unwrap(), Some(at(8, 0)));
    }

    #[test]
    fn test_compare_and_set_rejects_stale_expectation() {
        let store = MemoryWatermarkStore::new();
        let key = WatermarkKey::new("p", "m");

        assert!(store.compare_and_set(&key, None, at(8, 0)).unwrap());
        assert!(!store.compare_and_set(&key, None, at(8, 0)).unwrap());
        assert!(store
            .compare_and_set(&key, Some(at(8, 0)), at(20, 0))
            .unwrap());
    }

    #[test]
    fn test_concurrent_checks_have_single_winner() {
        let gate = NotificationGate::new(MemoryWatermarkStore::new());
        let winners = AtomicUsize::new(0);
        let due = at(8, 0);

        std::thread::scope(|scope| {
            for i in 0..16 {
                let gate = &gate;
                let winners = &winners;
                scope.spawn(move || {
                    let now = due + Duration::seconds(i);
                    if gate.check("p", "m", due, now).unwrap() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
