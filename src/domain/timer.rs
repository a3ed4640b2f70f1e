//! Server-side value model of the Timer Profile.
//!
//! Each device computes elapsed time from its own clock; there is no clock
//! synchronisation between client and server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of "now" in UNIX seconds
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_secs(&self) -> u64 {
        (**self).now_secs()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Manually driven clock
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicU64,
}

impl FixedClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Seconds since `offset`, never negative
pub fn elapsed_since(offset: u32, now: u64) -> u32 {
    let elapsed = now.saturating_sub(u64::from(offset));
    u32::try_from(elapsed).unwrap_or(u32::MAX)
}

/// Drop the seconds of a timestamp, as the offset picker only selects minutes
pub fn truncate_to_minute(timestamp: u64) -> u32 {
    let truncated = timestamp - timestamp % 60;
    u32::try_from(truncated).unwrap_or(u32::MAX - u32::MAX % 60)
}

/// Values held by a timer server
pub struct TimerServer<C: Clock> {
    offset: u32,
    clock: C,
}

impl<C: Clock> TimerServer<C> {
    pub fn new(offset: u32, clock: C) -> Self {
        Self { offset, clock }
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: u32) {
        self.offset = offset;
    }

    pub fn elapsed(&self) -> u32 {
        elapsed_since(self.offset, self.clock.now_secs())
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}
