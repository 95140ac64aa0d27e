//! Per-instance configuration.
//!
//! A configuration is immutable for the lifetime of one activation; changing
//! it goes through [`ApsEngine::reconfigure`](crate::engine::ApsEngine::reconfigure).

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_PCP, DEFAULT_WTR_SECS, HOLD_OFF_MSECS_MAX, HOLD_OFF_MSECS_STEP, MEG_LEVEL_MAX,
    PCP_MAX, VLAN_ID_MAX, WTR_SECS_MAX, WTR_SECS_MIN,
};
use crate::error::ApsError;
use crate::protocol_types::{Mode, PortRole};
use crate::types::{MacAddr, MegLevel, PortNo, VlanId};

/// Source of the signal-fail indication for a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SfTrigger {
    /// Link state of the port.
    #[default]
    Link,
    /// Continuity state of an associated MEP.
    Mep,
}

/// One side of the protected pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Physical port.
    pub port: PortNo,
    /// Where SF/SD for this port comes from.
    #[serde(default)]
    pub sf_trigger: SfTrigger,
}

/// Configuration of one linear APS instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Working port.
    pub working: PortConfig,
    /// Protect port; L-APS PDUs are exchanged here.
    pub protect: PortConfig,
    /// MEG level of transmitted and accepted PDUs.
    pub level: MegLevel,
    /// VLAN for transmitted PDUs; 0 sends untagged.
    pub vlan: VlanId,
    /// PCP of transmitted PDUs when tagged.
    pub pcp: u8,
    /// Source MAC; zero means use the protect port's MAC.
    pub smac: MacAddr,
    /// Protection architecture.
    pub mode: Mode,
    /// Transmit APS PDUs. Only honoured as `false` in 1+1 unidirectional mode.
    pub tx_aps: bool,
    /// Revert to working once the working defect clears.
    pub revertive: bool,
    /// Wait-to-restore time in seconds.
    pub wtr_secs: u16,
    /// Hold-off time in milliseconds.
    pub hold_off_msecs: u16,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            working: PortConfig::default(),
            protect: PortConfig {
                port: PortNo::new(1),
                sf_trigger: SfTrigger::Link,
            },
            level: MegLevel::new(0),
            vlan: VlanId::new(0),
            pcp: DEFAULT_PCP,
            smac: MacAddr::ZERO,
            mode: Mode::OneForOne,
            tx_aps: true,
            revertive: false,
            wtr_secs: DEFAULT_WTR_SECS,
            hold_off_msecs: 0,
        }
    }
}

impl InstanceConfig {
    /// Whether this instance transmits L-APS PDUs at all.
    ///
    /// Both 1:1 and 1+1 bidirectional need the protocol; 1+1 unidirectional
    /// only sends when explicitly asked to.
    pub fn tx_laps_pdus(&self) -> bool {
        !self.mode.is_unidirectional() || self.tx_aps
    }

    /// Port playing `role`.
    pub fn port(&self, role: PortRole) -> PortNo {
        match role {
            PortRole::Working => self.working.port,
            PortRole::Protect => self.protect.port,
        }
    }

    /// Validates ranges and cross-field constraints.
    ///
    /// # Errors
    /// - [`ApsError::InvalidConfig`] - A field is out of range or inconsistent
    pub fn validate(&self) -> Result<(), ApsError> {
        if self.working.port == self.protect.port {
            return Err(invalid(
                "protect",
                format!("working and protect share {}", self.working.port),
            ));
        }
        if self.level.value() > MEG_LEVEL_MAX {
            return Err(invalid(
                "level",
                format!("must be within 0..={MEG_LEVEL_MAX}, got {}", self.level.value()),
            ));
        }
        if self.vlan.value() > VLAN_ID_MAX {
            return Err(invalid(
                "vlan",
                format!("must be within 0..={VLAN_ID_MAX}, got {}", self.vlan.value()),
            ));
        }
        if self.pcp > PCP_MAX {
            return Err(invalid(
                "pcp",
                format!("must be within 0..={PCP_MAX}, got {}", self.pcp),
            ));
        }
        if !(WTR_SECS_MIN..=WTR_SECS_MAX).contains(&self.wtr_secs) {
            return Err(invalid(
                "wtr_secs",
                format!(
                    "must be within {WTR_SECS_MIN}..={WTR_SECS_MAX}, got {}",
                    self.wtr_secs
                ),
            ));
        }
        if self.hold_off_msecs > HOLD_OFF_MSECS_MAX
            || self.hold_off_msecs % HOLD_OFF_MSECS_STEP != 0
        {
            return Err(invalid(
                "hold_off_msecs",
                format!(
                    "must be a multiple of {HOLD_OFF_MSECS_STEP} within 0..={HOLD_OFF_MSECS_MAX}, got {}",
                    self.hold_off_msecs
                ),
            ));
        }
        if self.smac.is_multicast() {
            return Err(invalid("smac", format!("{} is a multicast address", self.smac)));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ApsError {
    ApsError::InvalidConfig { field, reason }
}
