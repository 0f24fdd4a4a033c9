//! Sync scheduler
//!
//! One `CategoryTimer` per sync category, all sharing the engine worker's
//! single wait. The worker sleeps until the earliest `next_due`, fires every
//! due category, and sends that category's request. A timer firing while a
//! response is outstanding is the implicit timeout for that category; there
//! is no separate timeout task.
//!
//! Disabled timers carry a due time roughly a year out instead of a special
//! case in the wait computation.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::SyncConfig;

/// Due-time offset that stands in for "never"
const DISABLED_DELAY: Duration = Duration::from_secs(365 * 24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncCategory {
    Keepalive,
    RingBuffer,
    Sleep,
    Summary,
}

impl SyncCategory {
    pub const ALL: [SyncCategory; 4] = [
        SyncCategory::Keepalive,
        SyncCategory::RingBuffer,
        SyncCategory::Sleep,
        SyncCategory::Summary,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Not scheduled; due time is pushed out to "never"
    Disabled,
    /// Scheduled at the steady cadence
    Steady,
    /// Request sent, reply outstanding; firing again means timeout
    AwaitingResponse,
    /// Timed out at least once, rescheduled at the retry cadence
    AwaitingRetry,
}

#[derive(Debug)]
pub struct CategoryTimer {
    state: TimerState,
    next_due: Instant,
    steady_period: Duration,
    retry_period: Duration,
}

impl CategoryTimer {
    pub fn new(now: Instant, steady_period: Duration, retry_period: Duration) -> Self {
        Self {
            state: TimerState::Disabled,
            next_due: now + DISABLED_DELAY,
            steady_period,
            retry_period,
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.state != TimerState::Disabled && self.next_due <= now
    }

    pub fn disable(&mut self, now: Instant) {
        self.state = TimerState::Disabled;
        self.next_due = now + DISABLED_DELAY;
    }

    /// Schedule to fire immediately.
    pub fn arm_now(&mut self, now: Instant) {
        self.state = TimerState::Steady;
        self.next_due = now;
    }

    /// Request went out; reschedule at the retry cadence so a missing reply
    /// surfaces as the next firing.
    pub fn on_sent(&mut self, now: Instant) {
        self.state = TimerState::AwaitingResponse;
        self.next_due = now + self.retry_period;
    }

    /// Reply arrived; back to the steady cadence.
    pub fn on_response(&mut self, now: Instant) {
        self.state = TimerState::Steady;
        self.next_due = now + self.steady_period;
    }

    /// The outstanding request is considered lost.
    pub fn on_timeout(&mut self, now: Instant) {
        self.state = TimerState::AwaitingRetry;
        self.next_due = now + self.retry_period;
    }
}

/// The four category timers of one device
#[derive(Debug)]
pub struct SyncTimers {
    keepalive: CategoryTimer,
    ring_buffer: CategoryTimer,
    sleep: CategoryTimer,
    summary: CategoryTimer,
}

impl SyncTimers {
    /// All timers start disabled; the engine arms them at startup and on
    /// `sync()`.
    pub fn new(now: Instant, config: &SyncConfig) -> Self {
        Self {
            keepalive: CategoryTimer::new(now, config.keepalive.steady(), config.keepalive.retry()),
            ring_buffer: CategoryTimer::new(
                now,
                config.ring_buffer.steady(),
                config.ring_buffer.retry(),
            ),
            sleep: CategoryTimer::new(now, config.sleep.steady(), config.sleep.retry()),
            summary: CategoryTimer::new(now, config.summary.steady(), config.summary.retry()),
        }
    }

    pub fn timer(&self, category: SyncCategory) -> &CategoryTimer {
        match category {
            SyncCategory::Keepalive => &self.keepalive,
            SyncCategory::RingBuffer => &self.ring_buffer,
            SyncCategory::Sleep => &self.sleep,
            SyncCategory::Summary => &self.summary,
        }
    }

    pub fn timer_mut(&mut self, category: SyncCategory) -> &mut CategoryTimer {
        match category {
            SyncCategory::Keepalive => &mut self.keepalive,
            SyncCategory::RingBuffer => &mut self.ring_buffer,
            SyncCategory::Sleep => &mut self.sleep,
            SyncCategory::Summary => &mut self.summary,
        }
    }

    /// Earliest due time across all categories; the worker's single sleep
    /// target.
    pub fn next_wake(&self) -> Instant {
        SyncCategory::ALL
            .iter()
            .map(|c| self.timer(*c).next_due())
            .min()
            .unwrap_or_else(Instant::now)
    }

    /// Categories whose timers have fired, in fixed priority order.
    pub fn due(&self, now: Instant) -> Vec<SyncCategory> {
        SyncCategory::ALL
            .iter()
            .copied()
            .filter(|c| self.timer(*c).is_due(now))
            .collect()
    }

    /// Arm the data categories for a fresh sync pass. Keepalive runs on its
    /// own cycle and is left alone.
    pub fn arm_sync(&mut self, now: Instant) {
        self.ring_buffer.arm_now(now);
        self.sleep.arm_now(now);
        self.summary.arm_now(now);
    }
}
