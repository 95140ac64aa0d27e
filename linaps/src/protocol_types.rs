//! G.8031 protocol vocabulary: protection states, requests, commands, modes.
//!
//! Priorities are explicit ([`Request::priority`]) rather than implied by
//! declaration order, so the request lattice can be checked in tests.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{
    APS_FLAG_A, APS_FLAG_B, APS_FLAG_D, APS_FLAG_R, APS_REQUEST_MASK, APS_REQUEST_SHIFT,
};
use crate::error::PduParsingError;

/// Protection state of one instance (G.8031 Annex A state names).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProtectionState {
    /// No request, traffic on working.
    #[default]
    NrWorking,
    /// No request, traffic on protect.
    NrProtect,
    /// Lockout of protection.
    Lockout,
    /// Forced switch to protect.
    ForcedSwitch,
    /// Signal fail on working.
    SfWorking,
    /// Signal fail on protect.
    SfProtect,
    /// Manual switch to protect.
    MsToProtect,
    /// Manual switch to working.
    MsToWorking,
    /// Wait-to-restore.
    WaitToRestore,
    /// Do-not-revert.
    DoNotRevert,
    /// Exercise while on working.
    ExerciseWorking,
    /// Exercise while on protect.
    ExerciseProtect,
    /// Reverse request while on working.
    ReverseRequestWorking,
    /// Reverse request while on protect.
    ReverseRequestProtect,
    /// Signal degrade on working.
    SdWorking,
    /// Signal degrade on protect.
    SdProtect,
}

impl ProtectionState {
    /// Every protection state, in declaration order.
    pub const ALL: [ProtectionState; 16] = [
        ProtectionState::NrWorking,
        ProtectionState::NrProtect,
        ProtectionState::Lockout,
        ProtectionState::ForcedSwitch,
        ProtectionState::SfWorking,
        ProtectionState::SfProtect,
        ProtectionState::MsToProtect,
        ProtectionState::MsToWorking,
        ProtectionState::WaitToRestore,
        ProtectionState::DoNotRevert,
        ProtectionState::ExerciseWorking,
        ProtectionState::ExerciseProtect,
        ProtectionState::ReverseRequestWorking,
        ProtectionState::ReverseRequestProtect,
        ProtectionState::SdWorking,
        ProtectionState::SdProtect,
    ];

    /// Abbreviation used in status output and history dumps.
    pub fn short_name(self) -> &'static str {
        match self {
            ProtectionState::NrWorking => "NR-W",
            ProtectionState::NrProtect => "NR-P",
            ProtectionState::Lockout => "LO",
            ProtectionState::ForcedSwitch => "FS",
            ProtectionState::SfWorking => "SF-W",
            ProtectionState::SfProtect => "SF-P",
            ProtectionState::MsToProtect => "MS-to-P",
            ProtectionState::MsToWorking => "MS-to-W",
            ProtectionState::WaitToRestore => "WTR",
            ProtectionState::DoNotRevert => "DNR",
            ProtectionState::ExerciseWorking => "EXER-W",
            ProtectionState::ExerciseProtect => "EXER-P",
            ProtectionState::ReverseRequestWorking => "RR-W",
            ProtectionState::ReverseRequestProtect => "RR-P",
            ProtectionState::SdWorking => "SD-W",
            ProtectionState::SdProtect => "SD-P",
        }
    }

    /// Human-readable name.
    pub fn long_name(self) -> &'static str {
        match self {
            ProtectionState::NrWorking => "No Request (W)",
            ProtectionState::NrProtect => "No Request (P)",
            ProtectionState::Lockout => "Lockout",
            ProtectionState::ForcedSwitch => "Forced Switch",
            ProtectionState::SfWorking => "Signal Fail (W)",
            ProtectionState::SfProtect => "Signal Fail (P)",
            ProtectionState::MsToProtect => "Manual Switch to P",
            ProtectionState::MsToWorking => "Manual Switch to W",
            ProtectionState::WaitToRestore => "Wait-to-Restore",
            ProtectionState::DoNotRevert => "Do Not Revert",
            ProtectionState::ExerciseWorking => "Exercise (W)",
            ProtectionState::ExerciseProtect => "Exercise (P)",
            ProtectionState::ReverseRequestWorking => "Reverse Request (W)",
            ProtectionState::ReverseRequestProtect => "Reverse Request (P)",
            ProtectionState::SdWorking => "Signal Degrade (W)",
            ProtectionState::SdProtect => "Signal Degrade (P)",
        }
    }
}

impl fmt::Display for ProtectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// A request competing for control of the protection state.
///
/// `Clear`, `WtrExpired` and the `*Off` variants only ever originate
/// locally; they force an intermediate re-evaluation and never appear in a
/// received PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Request {
    /// No request.
    NoRequest,
    /// Do-not-revert, announced by a non-revertive end back on protect.
    DoNotRevert,
    /// Acknowledges the far end's Exercise or switch request.
    ReverseRequest,
    /// Operator Clear.
    Clear,
    /// Exercise of the APS channel without switching traffic.
    Exercise,
    /// The WTR timer ran out.
    WtrExpired,
    /// Wait-to-restore in progress.
    WaitToRestore,
    /// Manual switch to working.
    MsToWorking,
    /// Manual switch to protect.
    MsToProtect,
    /// Signal degrade on working cleared.
    SdWorkingOff,
    /// Signal degrade on working.
    SdWorkingOn,
    /// Signal degrade on protect cleared.
    SdProtectOff,
    /// Signal degrade on protect.
    SdProtectOn,
    /// Signal fail on working cleared.
    SfWorkingOff,
    /// Signal fail on working.
    SfWorkingOn,
    /// Forced switch to protect.
    ForcedSwitch,
    /// Signal fail on protect cleared.
    SfProtectOff,
    /// Signal fail on protect.
    SfProtectOn,
    /// Lockout of protection.
    Lockout,
}

impl Request {
    /// Every request, lowest priority first.
    pub const ALL: [Request; 19] = [
        Request::NoRequest,
        Request::DoNotRevert,
        Request::ReverseRequest,
        Request::Clear,
        Request::Exercise,
        Request::WtrExpired,
        Request::WaitToRestore,
        Request::MsToWorking,
        Request::MsToProtect,
        Request::SdWorkingOff,
        Request::SdWorkingOn,
        Request::SdProtectOff,
        Request::SdProtectOn,
        Request::SfWorkingOff,
        Request::SfWorkingOn,
        Request::ForcedSwitch,
        Request::SfProtectOff,
        Request::SfProtectOn,
        Request::Lockout,
    ];

    /// Rank in the request priority lattice; higher wins.
    pub const fn priority(self) -> u8 {
        match self {
            Request::NoRequest => 0,
            Request::DoNotRevert => 1,
            Request::ReverseRequest => 2,
            Request::Clear => 3,
            Request::Exercise => 4,
            Request::WtrExpired => 5,
            Request::WaitToRestore => 6,
            Request::MsToWorking => 7,
            Request::MsToProtect => 8,
            Request::SdWorkingOff => 9,
            Request::SdWorkingOn => 10,
            Request::SdProtectOff => 11,
            Request::SdProtectOn => 12,
            Request::SfWorkingOff => 13,
            Request::SfWorkingOn => 14,
            Request::ForcedSwitch => 15,
            Request::SfProtectOff => 16,
            Request::SfProtectOn => 17,
            Request::Lockout => 18,
        }
    }

    /// Whether this is a local pseudo-request that triggers the two-phase
    /// (local then far-end) evaluation.
    pub const fn is_recovery(self) -> bool {
        matches!(
            self,
            Request::Clear
                | Request::SfWorkingOff
                | Request::SfProtectOff
                | Request::SdWorkingOff
                | Request::SdProtectOff
                | Request::WtrExpired
        )
    }

    /// Name used in history dumps.
    pub fn name(self) -> &'static str {
        match self {
            Request::NoRequest => "NR",
            Request::DoNotRevert => "DNR",
            Request::ReverseRequest => "RR",
            Request::Clear => "Clear",
            Request::Exercise => "EXER",
            Request::WtrExpired => "WTR-Expired",
            Request::WaitToRestore => "WTR",
            Request::MsToWorking => "MS-to-W",
            Request::MsToProtect => "MS-to-P",
            Request::SdWorkingOff => "SD-W Off",
            Request::SdWorkingOn => "SD-W",
            Request::SdProtectOff => "SD-P Off",
            Request::SdProtectOn => "SD-P",
            Request::SfWorkingOff => "SF-W Off",
            Request::SfWorkingOn => "SF-W",
            Request::ForcedSwitch => "FS",
            Request::SfProtectOff => "SF-P Off",
            Request::SfProtectOn => "SF-P",
            Request::Lockout => "LO",
        }
    }
}

impl Ord for Request {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority().cmp(&other.priority())
    }
}

impl PartialOrd for Request {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Command {
    /// No outstanding command.
    #[default]
    NoRequest,
    /// Keep traffic off protect whatever else is requested.
    Lockout,
    /// Move traffic to protect unless locked out or protect has failed.
    ForcedSwitch,
    /// Move traffic back to working.
    ManualSwitchToWorking,
    /// Move traffic to protect.
    ManualSwitchToProtect,
    /// Exercise the APS channel; traffic stays where it is.
    Exercise,
    /// Remove the outstanding command.
    Clear,
    /// Freeze the local state; evaluation is suspended.
    Freeze,
    /// Lift a freeze.
    FreezeClear,
}

impl Command {
    /// Commands that stay outstanding until cleared or overridden.
    pub const fn is_sticky(self) -> bool {
        matches!(
            self,
            Command::Lockout
                | Command::ForcedSwitch
                | Command::ManualSwitchToWorking
                | Command::ManualSwitchToProtect
                | Command::Exercise
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::NoRequest => "NR",
            Command::Lockout => "LO",
            Command::ForcedSwitch => "FS",
            Command::ManualSwitchToWorking => "MS-to-W",
            Command::ManualSwitchToProtect => "MS-to-P",
            Command::Exercise => "EXER",
            Command::Clear => "Clear",
            Command::Freeze => "Freeze",
            Command::FreezeClear => "Freeze-Clear",
        };
        f.write_str(name)
    }
}

/// Post-hold-off condition of a port. Ordered by severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum DefectState {
    /// No defect.
    #[default]
    Ok,
    /// Signal degrade.
    Sd,
    /// Signal fail.
    Sf,
}

impl DefectState {
    /// Folds raw SF/SD inputs into a single state; SF dominates.
    pub const fn from_flags(sf: bool, sd: bool) -> Self {
        if sf {
            DefectState::Sf
        } else if sd {
            DefectState::Sd
        } else {
            DefectState::Ok
        }
    }
}

/// Protection architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// 1:1, always bidirectional.
    #[default]
    OneForOne,
    /// 1+1 unidirectional switching.
    OnePlusOneUnidirectional,
    /// 1+1 bidirectional switching.
    OnePlusOneBidirectional,
}

impl Mode {
    /// Whether the traffic is permanently bridged to both ports.
    pub const fn is_one_plus_one(self) -> bool {
        !matches!(self, Mode::OneForOne)
    }

    /// Whether switching happens independently at each end.
    pub const fn is_unidirectional(self) -> bool {
        matches!(self, Mode::OnePlusOneUnidirectional)
    }
}

/// Position of the hardware traffic selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Selector {
    #[default]
    Working,
    Protect,
}

/// Which of the two protected ports something refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortRole {
    Working,
    Protect,
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRole::Working => f.write_str("W"),
            PortRole::Protect => f.write_str("P"),
        }
    }
}

/// Valid request/state codepoints of the APS-specific information (byte 0, bits 7:4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ApsRequestCode {
    NoRequest = 0x0,
    DoNotRevert = 0x1,
    ReverseRequest = 0x2,
    Exercise = 0x4,
    WaitToRestore = 0x5,
    ManualSwitch = 0x7,
    SignalDegrade = 0x9,
    SfWorking = 0xB,
    ForcedSwitch = 0xD,
    SfProtect = 0xE,
    Lockout = 0xF,
}

impl ApsRequestCode {
    /// Decodes a 4-bit request nibble; reserved codepoints are rejected.
    pub fn from_nibble(nibble: u8) -> Result<Self, PduParsingError> {
        let code = match nibble {
            0x0 => ApsRequestCode::NoRequest,
            0x1 => ApsRequestCode::DoNotRevert,
            0x2 => ApsRequestCode::ReverseRequest,
            0x4 => ApsRequestCode::Exercise,
            0x5 => ApsRequestCode::WaitToRestore,
            0x7 => ApsRequestCode::ManualSwitch,
            0x9 => ApsRequestCode::SignalDegrade,
            0xB => ApsRequestCode::SfWorking,
            0xD => ApsRequestCode::ForcedSwitch,
            0xE => ApsRequestCode::SfProtect,
            0xF => ApsRequestCode::Lockout,
            code => return Err(PduParsingError::InvalidRequestCode { code }),
        };
        Ok(code)
    }

    /// The 4-bit wire value.
    pub const fn nibble(self) -> u8 {
        self as u8
    }
}

/// The 4-byte APS-specific information carried in an L-APS PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ApsInfo(pub [u8; 4]);

impl ApsInfo {
    /// Assembles a payload from its fields. Only the low nibble of `flags` is used.
    pub const fn new(code: ApsRequestCode, flags: u8, requested: u8, bridged: u8) -> Self {
        ApsInfo([
            (code.nibble() << APS_REQUEST_SHIFT) | (flags & 0x0F),
            requested,
            bridged,
            0,
        ])
    }

    /// Raw request nibble.
    pub const fn request_nibble(&self) -> u8 {
        (self.0[0] & APS_REQUEST_MASK) >> APS_REQUEST_SHIFT
    }

    /// Decoded request/state code.
    pub fn request_code(&self) -> Result<ApsRequestCode, PduParsingError> {
        ApsRequestCode::from_nibble(self.request_nibble())
    }

    /// A bit: the sender transmits APS.
    pub const fn a_bit(&self) -> bool {
        self.0[0] & APS_FLAG_A != 0
    }

    /// B bit: the sender runs 1:1.
    pub const fn b_bit(&self) -> bool {
        self.0[0] & APS_FLAG_B != 0
    }

    /// D bit: the sender switches bidirectionally.
    pub const fn d_bit(&self) -> bool {
        self.0[0] & APS_FLAG_D != 0
    }

    /// R bit: the sender is revertive.
    pub const fn r_bit(&self) -> bool {
        self.0[0] & APS_FLAG_R != 0
    }

    /// Requested signal (0 = null/working, 1 = normal traffic).
    pub const fn requested_signal(&self) -> u8 {
        self.0[1]
    }

    /// Bridged signal.
    pub const fn bridged_signal(&self) -> u8 {
        self.0[2]
    }

    /// Whether the payload refers to the null signal. A zero in either
    /// signal field is treated as null.
    pub const fn is_null_signal(&self) -> bool {
        self.0[1] == 0 || self.0[2] == 0
    }

    /// Raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

/// Decoded view of an [`ApsInfo`] for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ApsInfoView {
    /// Request/state code; `None` until a valid payload has been seen.
    pub request: Option<ApsRequestCode>,
    /// Requested signal.
    pub re_signal: u8,
    /// Bridged signal.
    pub br_signal: u8,
}

impl From<&ApsInfo> for ApsInfoView {
    fn from(info: &ApsInfo) -> Self {
        ApsInfoView {
            request: info.request_code().ok(),
            re_signal: info.requested_signal(),
            br_signal: info.bridged_signal(),
        }
    }
}
