//! Periodic reminder polling.
//!
//! Each tick reloads the active profile, works out which doses are pending,
//! and runs them through the [`NotificationGate`]. Ticks are
//! cheap and stateless apart from the watermarks, so a delayed or skipped tick
//! just catches up on the next one.

use crate::clock::Clock;
use crate::gate::{NotificationGate, WatermarkStore};
use crate::schedule::pending_dose;
use crate::{Error, Profile, ProfileBook, Reminder, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default seconds between ticks
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Supplies the profile whose medications are polled
pub trait ProfileSource: Send + Sync {
    fn active_profile(&self) -> Result<Option<Profile>>;
}

impl ProfileSource for Mutex<ProfileBook> {
    fn active_profile(&self) -> Result<Option<Profile>> {
        let book = self
            .lock()
            .map_err(|e| Error::storage("profile lock poisoned", e))?;
        Ok(book.active_profile().cloned())
    }
}

impl<T: ProfileSource + ?Sized> ProfileSource for Arc<T> {
    fn active_profile(&self) -> Result<Option<Profile>> {
        (**self).active_profile()
    }
}

/// Delivers a reminder to the user
pub trait Notifier: Send + Sync {
    fn deliver(&self, reminder: &Reminder) -> Result<()>;
}

/// Notifier that only logs
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, reminder: &Reminder) -> Result<()> {
        tracing::info!("{}: {}", reminder.title, reminder.body);
        Ok(())
    }
}

/// Drives the notification gate for one profile source
pub struct Poller<P, S, N, C> {
    source: P,
    gate: NotificationGate<S>,
    notifier: N,
    clock: C,
    interval: std::time::Duration,
    last_tick: Mutex<Option<DateTime<Utc>>>,
}

impl<P, S, N, C> Poller<P, S, N, C>
where
    P: ProfileSource,
    S: WatermarkStore,
    N: Notifier,
    C: Clock,
{
    pub fn new(source: P, store: S, notifier: N, clock: C) -> Self {
        Self {
            source,
            gate: NotificationGate::new(store),
            notifier,
            clock,
            interval: std::time::Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            last_tick: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: std::time::Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> std::time::Duration {
        self.interval
    }

    /// Run one poll and return the reminders that fired
    ///
    /// Time-of-day slots are looked up from the previous successful tick (or
    /// one interval back on the first tick) so that slots falling between two
    /// ticks are still seen as due. Interval doses that came due and were never
    /// taken stay pending across restarts; the watermark keeps them to one
    /// reminder each.
    pub fn tick(&self) -> Result<Vec<Reminder>> {
        let now = self.clock.now();
        let now_utc = now.with_timezone(&Utc);

        let Some(profile) = self.source.active_profile()? else {
            tracing::debug!("No active profile, nothing to poll");
            self.mark_tick(now_utc)?;
            return Ok(Vec::new());
        };

        let lookback = Duration::from_std(self.interval)
            .unwrap_or_else(|_| Duration::seconds(DEFAULT_POLL_INTERVAL_SECS as i64));
        let since = self
            .last_tick
            .lock()
            .map_err(|e| Error::Other(format!("poller state poisoned: {}", e)))?
            .unwrap_or(now_utc - lookback)
            .min(now_utc);
        let reference = since.with_timezone(&now.timezone());

        let mut fired = Vec::new();
        for med in &profile.medications {
            let due = match pending_dose(&med.schedule, &med.taken_history, &reference, &now) {
                Ok(Some(due)) => due,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Skipping reminders for {}: {}", med.name, e);
                    continue;
                }
            };

            if !self.gate.check(&profile.id, &med.id, due, now_utc)? {
                continue;
            }

            let reminder = Reminder::for_dose(&profile, med, due);
            if let Err(e) = self.notifier.deliver(&reminder) {
                tracing::error!("Failed to deliver reminder for {}: {}", med.name, e);
            }
            fired.push(reminder);
        }

        self.mark_tick(now_utc)?;
        tracing::debug!(
            "Poll for profile {} fired {} reminders",
            profile.name,
            fired.len()
        );
        Ok(fired)
    }

    fn mark_tick(&self, at: DateTime<Utc>) -> Result<()> {
        let mut last = self
            .last_tick
            .lock()
            .map_err(|e| Error::Other(format!("poller state poisoned: {}", e)))?;
        *last = Some(at);
        Ok(())
    }
}

impl<P, S, N, C> Poller<P, S, N, C>
where
    P: ProfileSource + 'static,
    S: WatermarkStore + 'static,
    N: Notifier + 'static,
    C: Clock + 'static,
{
    /// Run ticks on the current tokio runtime until the handle is shut down or dropped
    pub fn spawn(self) -> PollerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!("Reminder poller started, every {:?}", self.interval);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        tracing::info!("Reminder poller stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.tick() {
                            Ok(_) => {}
                            Err(e) if e.is_transient() => {
                                tracing::warn!("Reminder poll failed, retrying next tick: {}", e);
                            }
                            Err(e) => tracing::error!("Reminder poll failed: {}", e),
                        }
                    }
                }
            }
        });

        PollerHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Owner of a running poll loop; dropping it aborts the loop
pub struct PollerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Stop after the current tick and wait for the loop to exit
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Reminder poller ended abnormally: {}", e);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::gate::MemoryWatermarkStore;
    use crate::{Medication, Schedule};
    use chrono::TimeZone;

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        delivered: Arc<Mutex<Vec<Reminder>>>,
    }

    impl RecordingNotifier {
        fn count(&self) -> usize {
            self.delivered.lock().unwrap().len()
        }
    }

    impl Notifier for RecordingNotifier {
        fn deliver(&self, reminder: &Reminder) -> Result<()> {
            self.delivered.lock().unwrap().push(reminder.clone());
            Ok(())
        }
    }

    type TestPoller =
        Poller<Arc<Mutex<ProfileBook>>, MemoryWatermarkStore, RecordingNotifier, Arc<ManualClock>>;

    fn at(day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, min, sec).unwrap()
    }

    fn setup(
        schedule: Schedule,
        start: DateTime<Utc>,
    ) -> (TestPoller, Arc<Mutex<ProfileBook>>, Arc<ManualClock>, RecordingNotifier, String) {
        crate::logging::init_test();
        let mut book = ProfileBook::default();
        let med = Medication::new("Metformin", 1.0, "tablet", schedule).unwrap();
        let med_id = book.add_medication(med).unwrap();

        let book = Arc::new(Mutex::new(book));
        let clock = Arc::new(ManualClock::new(start));
        let notifier = RecordingNotifier::default();
        let poller = Poller::new(
            book.clone(),
            MemoryWatermarkStore::new(),
            notifier.clone(),
            clock.clone(),
        );
        (poller, book, clock, notifier, med_id)
    }

    fn morning() -> Schedule {
        Schedule::TimeOfDay {
            morning: true,
            noon: false,
            evening: false,
        }
    }

    #[test]
    fn test_due_slot_fires_once() {
        let (poller, _book, clock, notifier, med_id) = setup(morning(), at(10, 8, 2, 0));

        let fired = poller.tick().unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].medication_id, med_id);
        assert_eq!(fired[0].due, at(10, 8, 0, 0));
        assert_eq!(fired[0].body, "Please take 'Metformin'. Dose: 1 tablet");

        clock.advance(Duration::seconds(30));
        assert!(poller.tick().unwrap().is_empty());
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn test_upcoming_slot_does_not_fire() {
        let (poller, _book, _clock, notifier, _) = setup(morning(), at(10, 7, 59, 0));

        assert!(poller.tick().unwrap().is_empty());
        assert_eq!(notifier.count(), 0);
    }

    #[test]
    fn test_interval_dose_fires_between_ticks() {
        let schedule = Schedule::Interval {
            hours: 12,
            start_hour: 8,
        };
        let (poller, book, clock, notifier, med_id) = setup(schedule, at(10, 19, 59, 50));
        book.lock()
            .unwrap()
            .take_dose(&med_id, at(10, 8, 0, 0))
            .unwrap();

        assert!(poller.tick().unwrap().is_empty());

        clock.advance(Duration::seconds(30));
        let fired = poller.tick().unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].due, at(10, 20, 0, 0));

        clock.advance(Duration::seconds(30));
        assert!(poller.tick().unwrap().is_empty());
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn test_missed_ticks_catch_up_on_next_tick() {
        let schedule = Schedule::Interval {
            hours: 12,
            start_hour: 8,
        };
        let (poller, book, clock, _notifier, med_id) = setup(schedule, at(10, 10, 0, 0));
        book.lock()
            .unwrap()
            .take_dose(&med_id, at(10, 8, 0, 0))
            .unwrap();

        assert!(poller.tick().unwrap().is_empty());

        // Hours of ticks never ran
        clock.set(at(10, 21, 30, 0));
        let fired = poller.tick().unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].due, at(10, 20, 0, 0));
    }

    #[test]
    fn test_interval_dose_overdue_before_first_tick_fires() {
        let schedule = Schedule::Interval {
            hours: 12,
            start_hour: 8,
        };
        // Came due a minute before the poller started, well past one interval
        let (poller, _book, clock, notifier, _) = setup(schedule, at(10, 20, 1, 0));

        let fired = poller.tick().unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].due, at(10, 20, 0, 0));

        clock.advance(Duration::seconds(30));
        assert!(poller.tick().unwrap().is_empty());
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn test_restarted_poller_does_not_repeat_fired_dose() {
        let temp_dir = tempfile::tempdir().unwrap();
        let watermarks = temp_dir.path().join("watermarks.json");
        let schedule = Schedule::Interval {
            hours: 12,
            start_hour: 8,
        };
        let mut book = ProfileBook::default();
        book.add_medication(Medication::new("Metformin", 1.0, "tablet", schedule).unwrap())
            .unwrap();
        let book = Arc::new(Mutex::new(book));
        let clock = Arc::new(ManualClock::new(at(10, 20, 1, 0)));

        let first = Poller::new(
            book.clone(),
            crate::FileWatermarkStore::new(&watermarks),
            LogNotifier,
            clock.clone(),
        );
        assert_eq!(first.tick().unwrap().len(), 1);
        drop(first);

        // A fresh poller over the same watermark file stays quiet
        clock.advance(Duration::minutes(10));
        let restarted = Poller::new(
            book,
            crate::FileWatermarkStore::new(&watermarks),
            LogNotifier,
            clock,
        );
        assert!(restarted.tick().unwrap().is_empty());
    }

    #[test]
    fn test_taken_dose_suppresses_reminder() {
        let (poller, book, clock, _notifier, med_id) = setup(morning(), at(10, 7, 0, 0));
        book.lock()
            .unwrap()
            .take_dose(&med_id, at(10, 7, 58, 0))
            .unwrap();

        // Taken before the slot: today's slot is still owed
        clock.set(at(10, 8, 1, 0));
        assert_eq!(poller.tick().unwrap().len(), 1);

        // Taken after the slot: nothing more today
        book.lock()
            .unwrap()
            .take_dose(&med_id, at(10, 8, 2, 0))
            .unwrap();
        clock.set(at(10, 8, 3, 0));
        assert!(poller.tick().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_medication_does_not_block_others() {
        let (poller, book, _clock, _notifier, _) = setup(morning(), at(10, 8, 1, 0));
        {
            let mut book = book.lock().unwrap();
            let mut bad = Medication::new("Broken", 1.0, "tablet", morning()).unwrap();
            bad.schedule = Schedule::Interval {
                hours: 0,
                start_hour: 8,
            };
            book.profiles[0].medications.insert(0, bad);
        }

        let fired = poller.tick().unwrap();
        assert_eq!(fired.len(), 1);
        assert!(fired[0].body.contains("Metformin"));
    }

    #[test]
    fn test_no_active_profile_is_quiet() {
        let book = Arc::new(Mutex::new(ProfileBook {
            profiles: Vec::new(),
            active_profile_id: None,
        }));
        let poller = Poller::new(
            book,
            MemoryWatermarkStore::new(),
            LogNotifier,
            ManualClock::new(at(10, 8, 1, 0)),
        );

        assert!(poller.tick().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spawned_poller_fires_once_and_stops() {
        let (poller, _book, _clock, notifier, _) = setup(morning(), at(10, 8, 2, 0));
        let handle = poller
            .with_interval(std::time::Duration::from_millis(10))
            .spawn();

        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        handle.shutdown().await;

        assert_eq!(notifier.count(), 1);
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_polling() {
        let (poller, _book, clock, notifier, _) = setup(morning(), at(10, 7, 0, 0));
        let handle = poller
            .with_interval(std::time::Duration::from_millis(10))
            .spawn();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        drop(handle);

        // Would fire if anything were still polling
        clock.set(at(10, 8, 1, 0));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(notifier.count(), 0);
    }
}
