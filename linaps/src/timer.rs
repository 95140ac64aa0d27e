//! Software timer set for all protocol timers.
//!
//! Each instance owns up to seven named timers. The queue only tracks
//! deadlines; dispatch is done by the engine, which pops due timers one at a
//! time so that a callback stopping a later timer in the same batch is
//! honoured. The driving thread lives in [`service`](crate::service).

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::types::InstanceId;

/// The timers an instance can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKind {
    /// Wait-to-restore.
    Wtr,
    /// Hold-off for the working port.
    HoldOffWorking,
    /// Hold-off for the protect port.
    HoldOffProtect,
    /// dFOP-NR debounce.
    DfopNr,
    /// L-APS reception on the working port (dFOP-CM clear).
    RxWorking,
    /// L-APS reception on the protect port (dFOP-TO).
    RxProtect,
    /// Periodic L-APS transmission.
    Tx,
}

impl TimerKind {
    /// Every timer kind.
    pub const ALL: [TimerKind; 7] = [
        TimerKind::Wtr,
        TimerKind::HoldOffWorking,
        TimerKind::HoldOffProtect,
        TimerKind::DfopNr,
        TimerKind::RxWorking,
        TimerKind::RxProtect,
        TimerKind::Tx,
    ];

    /// Diagnostic name.
    pub fn name(self) -> &'static str {
        match self {
            TimerKind::Wtr => "WTR",
            TimerKind::HoldOffWorking => "HoffW",
            TimerKind::HoldOffProtect => "HoffP",
            TimerKind::DfopNr => "dFOP-NR",
            TimerKind::RxWorking => "RxW",
            TimerKind::RxProtect => "RxP",
            TimerKind::Tx => "Tx",
        }
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies one timer of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerKey {
    /// Owning instance.
    pub instance: InstanceId,
    /// Which of its timers.
    pub kind: TimerKind,
}

impl TimerKey {
    /// Creates a key for `kind` on `instance`.
    pub const fn new(instance: InstanceId, kind: TimerKind) -> Self {
        Self { instance, kind }
    }
}

#[derive(Debug, Clone)]
struct TimerEntry {
    deadline: Instant,
    period: Duration,
    repeat: bool,
    skipped_periods: u64,
}

/// The set of active timers, ordered by key for deterministic scans.
#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: BTreeMap<TimerKey, TimerEntry>,
}

impl TimerQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts) a timer to fire `period` from `now`.
    ///
    /// # Parameters
    /// - `key`: Timer to arm; an already active timer is re-armed.
    /// - `period`: Delay until the first expiry and, if `repeat`, between expiries.
    /// - `repeat`: Re-arm automatically after each expiry.
    /// - `now`: Current time from the engine clock.
    ///
    /// # Returns
    /// The new deadline.
    pub fn start(&mut self, key: TimerKey, period: Duration, repeat: bool, now: Instant) -> Instant {
        debug_assert!(
            !repeat || !period.is_zero(),
            "periodic timer {} started with zero period",
            key.kind
        );
        let deadline = now + period;
        debug!(instance = %key.instance, timer = %key.kind, period_ms = period.as_millis() as u64, repeat, "timer start");
        self.entries.insert(
            key,
            TimerEntry {
                deadline,
                period,
                repeat: repeat && !period.is_zero(),
                skipped_periods: 0,
            },
        );
        deadline
    }

    /// Stops a timer. Stopping an inactive timer is a no-op.
    pub fn stop(&mut self, key: TimerKey) {
        if self.entries.remove(&key).is_some() {
            debug!(instance = %key.instance, timer = %key.kind, "timer stop");
        }
    }

    /// Whether the timer is armed.
    pub fn is_active(&self, key: TimerKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Time left until the timer fires, `None` if inactive.
    pub fn remaining(&self, key: TimerKey, now: Instant) -> Option<Duration> {
        self.entries
            .get(&key)
            .map(|entry| entry.deadline.saturating_duration_since(now))
    }

    /// Pushes a one-shot timer's deadline out to `now + period` if it would
    /// otherwise fire sooner. Never shortens, never touches periodic timers.
    ///
    /// # Returns
    /// `true` if the deadline moved.
    pub fn extend(&mut self, key: TimerKey, period: Duration, now: Instant) -> bool {
        match self.entries.get_mut(&key) {
            Some(entry) if !entry.repeat => {
                let wanted = now + period;
                if entry.deadline < wanted {
                    entry.deadline = wanted;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Earliest deadline across all active timers.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.deadline).min()
    }

    /// Removes (one-shot) or re-arms (periodic) the earliest timer due at `now`.
    ///
    /// Periodic timers are re-armed on their fixed cadence. If the
    /// dispatcher fell behind, the missed periods are counted and logged
    /// rather than fired.
    ///
    /// # Returns
    /// The key of the expired timer, or `None` when nothing is due.
    pub fn pop_next_due(&mut self, now: Instant) -> Option<TimerKey> {
        let key = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .min_by_key(|(key, entry)| (entry.deadline, **key))
            .map(|(key, _)| *key)?;

        let mut entry = self.entries.remove(&key)?;
        if entry.repeat {
            let behind = now.duration_since(entry.deadline).as_nanos();
            let periods = behind / entry.period.as_nanos() + 1;
            let skipped = (periods - 1) as u64;
            if skipped > 0 {
                entry.skipped_periods += skipped;
                warn!(
                    instance = %key.instance,
                    timer = %key.kind,
                    skipped,
                    total_skipped = entry.skipped_periods,
                    "periodic timer fell behind"
                );
            }
            entry.deadline += entry.period * periods as u32;
            self.entries.insert(key, entry);
        }
        Some(key)
    }

    /// Stops every timer owned by `instance`.
    pub fn cancel_instance(&mut self, instance: InstanceId) {
        self.entries.retain(|key, _| key.instance != instance);
    }

    /// Number of active timers owned by `instance`.
    pub fn active_count(&self, instance: InstanceId) -> usize {
        self.entries.keys().filter(|key| key.instance == instance).count()
    }

    /// Total missed periods of a periodic timer since it was started.
    pub fn skipped_periods(&self, key: TimerKey) -> u64 {
        self.entries
            .get(&key)
            .map_or(0, |entry| entry.skipped_periods)
    }
}
