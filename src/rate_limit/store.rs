//! Rate window counters and their storage
//!
//! One `RateWindowCounter` exists per (client, category). Windows are fixed
//! and roll over lazily: a window whose start is at least its length in the
//! past is reset to zero, starting at the current time, the next time the
//! counter is touched.
//!
//! # Thread Safety
//!
//! `MemoryCounterStore` keeps the map of counters behind an `RwLock` and
//! each counter behind its own `Mutex`. Admission holds the map read guard
//! plus the counter mutex for the whole check-and-increment, so two
//! admissions on one key are serialized while different keys only share
//! the read guard. The map write lock is taken on first use of a key and
//! by `reset` / `evict_idle`.

use crate::access_control::{ClientId, RateCategory};
use crate::error::StoreError;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

/// Fixed window lengths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Minute,
    Hour,
}

impl Window {
    pub const fn seconds(&self) -> u64 {
        match self {
            Window::Minute => 60,
            Window::Hour => 3600,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Window::Minute => "minute",
            Window::Hour => "hour",
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ceilings for one category; `None` is unbounded, `Some(0)` blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Ceilings {
    pub per_minute: Option<u32>,
    pub per_hour: Option<u32>,
}

/// Result of one admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Counted; carries the counts after the increment
    Admitted { minute: u32, hour: u32 },
    /// Not counted; `retry_after` is the seconds until `window` rolls over
    Rejected {
        window: Window,
        ceiling: u32,
        retry_after: u64,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// Counts as seen at one instant, with expired windows read as zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WindowUsage {
    pub minute: u32,
    pub hour: u32,
    pub minute_resets_in: u64,
    pub hour_resets_in: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateWindowCounter {
    pub count_this_minute: u32,
    pub minute_started_at: u64,
    pub count_this_hour: u32,
    pub hour_started_at: u64,
}

fn expired(started_at: u64, now: u64, window: Window) -> bool {
    now.saturating_sub(started_at) >= window.seconds()
}

fn resets_in(started_at: u64, now: u64, window: Window) -> u64 {
    (started_at + window.seconds()).saturating_sub(now).max(1)
}

impl RateWindowCounter {
    pub fn new(now: u64) -> Self {
        Self {
            count_this_minute: 0,
            minute_started_at: now,
            count_this_hour: 0,
            hour_started_at: now,
        }
    }

    fn roll(&mut self, now: u64) {
        if expired(self.minute_started_at, now, Window::Minute) {
            self.count_this_minute = 0;
            self.minute_started_at = now;
        }
        if expired(self.hour_started_at, now, Window::Hour) {
            self.count_this_hour = 0;
            self.hour_started_at = now;
        }
    }

    /// Check both windows and count the operation only if both have room
    pub fn try_admit(&mut self, now: u64, ceilings: Ceilings) -> Admission {
        self.roll(now);

        let checks = [
            (Window::Minute, ceilings.per_minute, self.count_this_minute, self.minute_started_at),
            (Window::Hour, ceilings.per_hour, self.count_this_hour, self.hour_started_at),
        ];
        for (window, ceiling, count, started_at) in checks {
            if let Some(ceiling) = ceiling
                && count.saturating_add(1) > ceiling
            {
                return Admission::Rejected {
                    window,
                    ceiling,
                    retry_after: resets_in(started_at, now, window),
                };
            }
        }

        self.count_this_minute += 1;
        self.count_this_hour += 1;
        Admission::Admitted {
            minute: self.count_this_minute,
            hour: self.count_this_hour,
        }
    }

    pub fn usage(&self, now: u64) -> WindowUsage {
        let minute_live = !expired(self.minute_started_at, now, Window::Minute);
        let hour_live = !expired(self.hour_started_at, now, Window::Hour);
        WindowUsage {
            minute: if minute_live { self.count_this_minute } else { 0 },
            hour: if hour_live { self.count_this_hour } else { 0 },
            minute_resets_in: if minute_live {
                resets_in(self.minute_started_at, now, Window::Minute)
            } else {
                Window::Minute.seconds()
            },
            hour_resets_in: if hour_live {
                resets_in(self.hour_started_at, now, Window::Hour)
            } else {
                Window::Hour.seconds()
            },
        }
    }

    /// Both windows expired and the newest start is at least `max_idle` old
    pub fn is_idle(&self, now: u64, max_idle: u64) -> bool {
        let newest = self.minute_started_at.max(self.hour_started_at);
        expired(self.minute_started_at, now, Window::Minute)
            && expired(self.hour_started_at, now, Window::Hour)
            && now.saturating_sub(newest) >= max_idle
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub client: ClientId,
    pub category: RateCategory,
}

impl CounterKey {
    pub fn new(client: ClientId, category: RateCategory) -> Self {
        Self { client, category }
    }
}

/// Storage for rate window counters.
///
/// `admit` must run the check-and-increment for a key as one critical
/// section. An `Err` from `admit` makes the limiter deny the operation.
pub trait CounterStore: Send + Sync {
    fn admit(&self, key: &CounterKey, ceilings: Ceilings, now: u64) -> Result<Admission, StoreError>;

    /// Current usage for a key, `None` if it has never been touched
    fn usage(&self, key: &CounterKey, now: u64) -> Result<Option<WindowUsage>, StoreError>;

    /// Drop every counter of `client`; returns how many were removed
    fn reset(&self, client: &ClientId) -> Result<usize, StoreError>;

    /// Drop idle counters; returns how many were removed
    fn evict_idle(&self, now: u64, max_idle: u64) -> Result<usize, StoreError>;

    /// Number of live counters
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type CounterMap = HashMap<CounterKey, Arc<Mutex<RateWindowCounter>>>;

/// In-process counter store
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: RwLock<CounterMap>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CounterMap> {
        self.counters.read().unwrap_or_else(|poisoned| {
            warn!("Counter map lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, CounterMap> {
        self.counters.write().unwrap_or_else(|poisoned| {
            warn!("Counter map lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

fn lock(counter: &Mutex<RateWindowCounter>) -> MutexGuard<'_, RateWindowCounter> {
    counter.lock().unwrap_or_else(|poisoned| {
        warn!("Counter lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

impl CounterStore for MemoryCounterStore {
    fn admit(&self, key: &CounterKey, ceilings: Ceilings, now: u64) -> Result<Admission, StoreError> {
        {
            let map = self.read();
            if let Some(counter) = map.get(key) {
                return Ok(lock(counter).try_admit(now, ceilings));
            }
        }

        // First use of this key; another thread may have inserted it meanwhile
        let mut map = self.write();
        let counter = map
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(RateWindowCounter::new(now))));
        Ok(lock(counter).try_admit(now, ceilings))
    }

    fn usage(&self, key: &CounterKey, now: u64) -> Result<Option<WindowUsage>, StoreError> {
        let map = self.read();
        Ok(map.get(key).map(|counter| lock(counter).usage(now)))
    }

    fn reset(&self, client: &ClientId) -> Result<usize, StoreError> {
        let mut map = self.write();
        let before = map.len();
        map.retain(|key, _| &key.client != client);
        Ok(before - map.len())
    }

    fn evict_idle(&self, now: u64, max_idle: u64) -> Result<usize, StoreError> {
        let mut map = self.write();
        let before = map.len();
        map.retain(|_, counter| !lock(counter).is_idle(now, max_idle));
        Ok(before - map.len())
    }

    fn len(&self) -> usize {
        self.read().len()
    }
}
