//! Time sources for the poller.

use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use std::sync::Mutex;

/// Source of "now", including the zone used for calendar arithmetic
pub trait Clock: Send + Sync {
    type Tz: TimeZone;

    fn now(&self) -> DateTime<Self::Tz>;
}

/// Wall clock in the system's local time zone
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    type Tz = Local;

    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    type Tz = Utc;

    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    type Tz = C::Tz;

    fn now(&self) -> DateTime<Self::Tz> {
        (**self).now()
    }
}
