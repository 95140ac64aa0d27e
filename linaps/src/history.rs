//! Bounded per-instance event history.
//!
//! Every state machine run that changes the (local request, far-end request,
//! state) triple appends one entry. Diagnostics only; nothing reads it back
//! into the protocol.

use std::collections::VecDeque;
use std::fmt::Write;

use serde::Serialize;

use crate::constants::HISTORY_CAPACITY;
use crate::protocol_types::{ProtectionState, Request};
use crate::types::InstanceId;

/// One recorded state machine outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// Milliseconds since the engine was created.
    pub time_ms: u64,
    /// Top-priority local request.
    pub local: Request,
    /// Far-end request used in the evaluation.
    pub far_end: Request,
    /// Resulting protection state.
    pub state: ProtectionState,
}

/// Ring of the most recent [`HISTORY_CAPACITY`] entries.
#[derive(Debug, Clone, Default)]
pub struct HistoryRing {
    entries: VecDeque<HistoryEntry>,
}

impl HistoryRing {
    /// Creates an empty ring.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Appends an entry unless its requests and state equal the newest one.
    ///
    /// # Returns
    /// `true` if the entry was recorded.
    pub fn record(&mut self, entry: HistoryEntry) -> bool {
        if let Some(last) = self.entries.back() {
            if last.local == entry.local
                && last.far_end == entry.far_end
                && last.state == entry.state
            {
                return false;
            }
        }
        if self.entries.len() == HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        true
    }

    /// Forgets all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded since the last clear.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest-first iterator.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Renders the history as a fixed-width table.
    ///
    /// # Parameters
    /// - `instance`: Printed in the first column of every row.
    /// - `print_header`: Prefix the column header lines.
    pub fn dump(&self, instance: InstanceId, print_header: bool) -> String {
        let mut out = String::new();
        if print_header {
            out.push_str("Inst   # Time [ms]      Local Req   Far-end Req Prot State\n");
            out.push_str("---- --- -------------- ----------- ----------- ----------\n");
        }

        // Writing into a String cannot fail.
        for (n, entry) in self.entries.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>4} {:>3} {:>14} {:<11} {:<11} {}",
                instance.value(),
                n + 1,
                entry.time_ms,
                entry.local.name(),
                entry.far_end.name(),
                entry.state.short_name(),
            );
        }
        if self.entries.is_empty() {
            let _ = writeln!(out, "{:>4} <No events registered yet>", instance.value());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(time_ms: u64, local: Request, state: ProtectionState) -> HistoryEntry {
        HistoryEntry {
            time_ms,
            local,
            far_end: Request::NoRequest,
            state,
        }
    }

    #[test]
    fn deduplicates_identical_outcomes() {
        let mut ring = HistoryRing::new();
        assert!(ring.record(entry(1, Request::NoRequest, ProtectionState::NrWorking)));
        assert!(!ring.record(entry(2, Request::NoRequest, ProtectionState::NrWorking)));
        assert!(ring.record(entry(3, Request::SfWorkingOn, ProtectionState::SfWorking)));
        assert_eq!(ring.len(), 2);
        // Time alone never makes an entry distinct.
        assert_eq!(ring.iter().next().map(|e| e.time_ms), Some(1));
    }

    #[test]
    fn overwrites_oldest_when_full() {
        let mut ring = HistoryRing::new();
        for i in 0..(HISTORY_CAPACITY as u64 + 5) {
            let state = if i % 2 == 0 {
                ProtectionState::NrWorking
            } else {
                ProtectionState::SfWorking
            };
            ring.record(entry(i, Request::NoRequest, state));
        }
        assert_eq!(ring.len(), HISTORY_CAPACITY);
        assert_eq!(ring.iter().next().map(|e| e.time_ms), Some(5));
    }

    #[test]
    fn dump_empty_history() {
        let ring = HistoryRing::new();
        assert_eq!(
            ring.dump(InstanceId::new(3), false),
            "   3 <No events registered yet>\n"
        );
    }

    #[test]
    fn dump_formats_rows() {
        let mut ring = HistoryRing::new();
        ring.record(HistoryEntry {
            time_ms: 1234,
            local: Request::SfWorkingOn,
            far_end: Request::NoRequest,
            state: ProtectionState::SfWorking,
        });
        let dump = ring.dump(InstanceId::new(1), true);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "Inst   # Time [ms]      Local Req   Far-end Req Prot State"
        );
        assert_eq!(
            lines[2],
            "   1   1           1234 SF-W        NR          SF-W"
        );
    }
}
