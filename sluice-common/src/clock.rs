use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use chrono::{Local, NaiveTime, Timelike};

/// Source of the current local time-of-day.
///
/// Read on every window evaluation; implementations must not cache.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> NaiveTime;
}

/// Wall clock in the process's local time zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time, so a test can hand one clone to the gate and
/// keep another to move time forward.
#[derive(Debug, Clone, Default)]
pub struct FixedClock {
    seconds_from_midnight: Arc<AtomicU32>,
}

impl FixedClock {
    #[must_use]
    pub fn new(time: NaiveTime) -> Self {
        Self {
            seconds_from_midnight: Arc::new(AtomicU32::new(time.num_seconds_from_midnight())),
        }
    }

    /// A clock reading `hour:minute:00`, or `None` if out of range.
    #[must_use]
    pub fn at(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self::new)
    }

    pub fn set(&self, time: NaiveTime) {
        self.seconds_from_midnight
            .store(time.num_seconds_from_midnight(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveTime {
        NaiveTime::from_num_seconds_from_midnight_opt(
            self.seconds_from_midnight.load(Ordering::SeqCst),
            0,
        )
        .unwrap_or_default()
    }
}
