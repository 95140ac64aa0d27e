//! Test doubles for the platform collaborator.
//!
//! Available to unit tests and, through the `test_utils` feature, to
//! integration tests and the simulator.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::PlatformError;
use crate::protocol_types::{Mode, Selector};
use crate::traits::{ApsPlatform, MatchRule, PortInfo};
use crate::types::{InstanceId, MacAddr, PortNo, VlanId};

/// One call made by the engine into the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    ConfigureProtection {
        working: PortNo,
        protect: PortNo,
        mode: Mode,
    },
    ReleaseProtection {
        working: PortNo,
    },
    SetSelector {
        instance: InstanceId,
        working: PortNo,
        selector: Selector,
    },
    Transmit {
        port: PortNo,
        frame: Vec<u8>,
    },
    InstallMatchRule {
        instance: InstanceId,
        rule: MatchRule,
    },
    RemoveMatchRule {
        instance: InstanceId,
    },
}

#[derive(Debug, Default)]
struct Recorded {
    ports: HashMap<PortNo, PortInfo>,
    calls: Vec<PlatformCall>,
    failing: HashSet<&'static str>,
}

/// A platform that records every call and lets tests control port state.
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    inner: Mutex<Recorded>,
}

impl RecordingPlatform {
    /// Creates a platform without ports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a platform with `ports` up, C-tagging and PVID 1.
    pub fn with_ports(ports: impl IntoIterator<Item = u32>) -> Self {
        let platform = Self::new();
        for port in ports {
            platform.add_port(PortNo::new(port), Self::default_port_info(port));
        }
        platform
    }

    /// Port info used by [`with_ports`](Self::with_ports). The MAC encodes
    /// the port number in its last octet.
    pub fn default_port_info(port: u32) -> PortInfo {
        PortInfo {
            link_up: true,
            tpid: 0x8100,
            mac: MacAddr([0x00, 0x01, 0xC1, 0x00, (port >> 8) as u8, port as u8]),
            pvid: VlanId::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces a port.
    pub fn add_port(&self, port: PortNo, info: PortInfo) {
        self.lock().ports.insert(port, info);
    }

    /// Removes a port so lookups fail.
    pub fn remove_port(&self, port: PortNo) {
        self.lock().ports.remove(&port);
    }

    /// Changes the link state reported for `port`.
    pub fn set_link(&self, port: PortNo, up: bool) {
        if let Some(info) = self.lock().ports.get_mut(&port) {
            info.link_up = up;
        }
    }

    /// Makes every later call of `operation` fail, e.g. `"transmit"`.
    pub fn fail_operation(&self, operation: &'static str) {
        self.lock().failing.insert(operation);
    }

    /// Lets `operation` succeed again.
    pub fn heal_operation(&self, operation: &'static str) {
        self.lock().failing.remove(operation);
    }

    /// Every recorded call, oldest first.
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.lock().calls.clone()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Frames transmitted on `port`, oldest first.
    pub fn transmitted(&self, port: PortNo) -> Vec<Vec<u8>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                PlatformCall::Transmit { port: p, frame } if *p == port => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    /// Removes and returns all transmitted frames, leaving other calls.
    pub fn drain_transmitted(&self) -> Vec<(PortNo, Vec<u8>)> {
        let mut recorded = self.lock();
        let mut frames = Vec::new();
        recorded.calls.retain(|call| match call {
            PlatformCall::Transmit { port, frame } => {
                frames.push((*port, frame.clone()));
                false
            }
            _ => true,
        });
        frames
    }

    /// Most recent selector position commanded for `instance`.
    pub fn last_selector(&self, instance: InstanceId) -> Option<Selector> {
        self.lock().calls.iter().rev().find_map(|call| match call {
            PlatformCall::SetSelector {
                instance: i,
                selector,
                ..
            } if *i == instance => Some(*selector),
            _ => None,
        })
    }

    /// Currently installed match rule of `instance`.
    pub fn match_rule(&self, instance: InstanceId) -> Option<MatchRule> {
        let recorded = self.lock();
        for call in recorded.calls.iter().rev() {
            match call {
                PlatformCall::InstallMatchRule { instance: i, rule } if *i == instance => {
                    return Some(*rule);
                }
                PlatformCall::RemoveMatchRule { instance: i } if *i == instance => return None,
                _ => {}
            }
        }
        None
    }

    fn record(&self, operation: &'static str, call: PlatformCall) -> Result<(), PlatformError> {
        let mut recorded = self.lock();
        if recorded.failing.contains(operation) {
            return Err(PlatformError::new(operation, "injected failure"));
        }
        recorded.calls.push(call);
        Ok(())
    }
}

impl ApsPlatform for RecordingPlatform {
    fn port_info(&self, port: PortNo) -> Option<PortInfo> {
        self.lock().ports.get(&port).copied()
    }

    fn configure_protection(
        &self,
        working: PortNo,
        protect: PortNo,
        mode: Mode,
    ) -> Result<(), PlatformError> {
        self.record(
            "configure_protection",
            PlatformCall::ConfigureProtection {
                working,
                protect,
                mode,
            },
        )
    }

    fn release_protection(&self, working: PortNo) -> Result<(), PlatformError> {
        self.record(
            "release_protection",
            PlatformCall::ReleaseProtection { working },
        )
    }

    fn set_selector(
        &self,
        instance: InstanceId,
        working: PortNo,
        selector: Selector,
    ) -> Result<(), PlatformError> {
        self.record(
            "set_selector",
            PlatformCall::SetSelector {
                instance,
                working,
                selector,
            },
        )
    }

    fn transmit(&self, port: PortNo, frame: &[u8]) -> Result<(), PlatformError> {
        self.record(
            "transmit",
            PlatformCall::Transmit {
                port,
                frame: frame.to_vec(),
            },
        )
    }

    fn install_match_rule(
        &self,
        instance: InstanceId,
        rule: &MatchRule,
    ) -> Result<(), PlatformError> {
        self.record(
            "install_match_rule",
            PlatformCall::InstallMatchRule {
                instance,
                rule: *rule,
            },
        )
    }

    fn remove_match_rule(&self, instance: InstanceId) -> Result<(), PlatformError> {
        self.record(
            "remove_match_rule",
            PlatformCall::RemoveMatchRule { instance },
        )
    }
}
