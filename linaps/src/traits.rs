//! Hardware and port collaborator interface.
//!
//! The engine never talks to a switch directly. Everything it needs from the
//! platform (port properties, the protection selector, frame injection and
//! the PDU capture rule) goes through [`ApsPlatform`], injected at
//! construction so tests can substitute a recording fake.

use std::fmt::Debug;

use crate::error::PlatformError;
use crate::protocol_types::{Mode, Selector};
use crate::types::{InstanceId, MacAddr, MegLevel, PortNo, VlanId};

/// Port properties the engine reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortInfo {
    /// Link is up.
    pub link_up: bool,
    /// TPID used when tagging frames egressing this port.
    pub tpid: u16,
    /// Port MAC address; used as SMAC when none is configured.
    pub mac: MacAddr,
    /// Port VLAN ID, the classified VID of untagged frames.
    pub pvid: VlanId,
}

/// Rule capturing L-APS PDUs of one instance to the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchRule {
    /// Ingress ports: working and protect.
    pub ports: [PortNo; 2],
    /// Classified VID to match.
    pub vid: VlanId,
    /// MEG level; PDUs at or below it are captured.
    pub level: MegLevel,
}

/// Platform services required by [`ApsEngine`](crate::engine::ApsEngine).
///
/// Implementations are called with the engine lock held and must not block.
pub trait ApsPlatform: Send + Sync + Debug {
    /// Returns properties of `port`, or `None` if the port does not exist.
    fn port_info(&self, port: PortNo) -> Option<PortInfo>;

    /// Pairs `working` with `protect` in the protection hardware.
    ///
    /// # Errors
    /// - [`PlatformError`] - The hardware rejected the configuration
    fn configure_protection(
        &self,
        working: PortNo,
        protect: PortNo,
        mode: Mode,
    ) -> Result<(), PlatformError>;

    /// Removes any protection pairing from `working`.
    ///
    /// # Errors
    /// - [`PlatformError`] - The hardware rejected the release
    fn release_protection(&self, working: PortNo) -> Result<(), PlatformError>;

    /// Moves the traffic selector of the pair headed by `working`.
    ///
    /// # Errors
    /// - [`PlatformError`] - The selector could not be set
    fn set_selector(
        &self,
        instance: InstanceId,
        working: PortNo,
        selector: Selector,
    ) -> Result<(), PlatformError>;

    /// Injects `frame` on `port`.
    ///
    /// # Errors
    /// - [`PlatformError`] - The frame could not be queued
    fn transmit(&self, port: PortNo, frame: &[u8]) -> Result<(), PlatformError>;

    /// Installs or replaces the PDU capture rule of `instance`.
    ///
    /// # Errors
    /// - [`PlatformError`] - No rule resources available
    fn install_match_rule(&self, instance: InstanceId, rule: &MatchRule)
    -> Result<(), PlatformError>;

    /// Removes the PDU capture rule of `instance`, if any.
    ///
    /// # Errors
    /// - [`PlatformError`] - The rule could not be removed
    fn remove_match_rule(&self, instance: InstanceId) -> Result<(), PlatformError>;
}
