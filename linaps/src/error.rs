//! Linear APS error types.
//!
//! This module defines the error types used throughout the `linaps` library.
//! It separates L-APS PDU parsing failures, PDU building failures, failures
//! reported by the hardware platform, and general lifecycle errors. The
//! `thiserror` crate is used for ergonomic error definitions.
//!
//! Protocol defects (dFOP-CM/PM/TO/NR) are not errors; they are surfaced in
//! [`InstanceStatus`](crate::instance::InstanceStatus).

use std::fmt;

use thiserror::Error;

use crate::types::{InstanceId, PortNo};

/// Location within an L-APS frame where parsing ran out of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseContext {
    /// Ethernet header including an optional VLAN tag.
    EthernetHeader,
    /// CFM common header plus APS-specific information.
    LapsPdu,
    /// A TLV following the APS-specific information.
    Tlv,
}

impl fmt::Display for ParseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseContext::EthernetHeader => "Ethernet header",
            ParseContext::LapsPdu => "L-APS PDU",
            ParseContext::Tlv => "TLV",
        };
        f.write_str(name)
    }
}

/// Reasons a received L-APS frame is rejected.
///
/// A rejected frame is counted as invalid and dropped; it never changes
/// protocol state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PduParsingError {
    /// Frame ended before a complete field could be read.
    #[error("Incomplete frame: needed {needed} bytes, got {got} for {context}")]
    NotEnoughData {
        needed: usize,
        got: usize,
        context: ParseContext,
    },

    /// EtherType is not CFM.
    #[error("Not a CFM frame: EtherType 0x{ethertype:04X}")]
    NotCfm { ethertype: u16 },

    /// CFM opcode is not L-APS.
    #[error("Not an L-APS PDU: opcode {opcode}")]
    WrongOpcode { opcode: u8 },

    /// MEG level does not match the configured level.
    #[error("MEG level mismatch: expected {expected}, got {got}")]
    LevelMismatch { expected: u8, got: u8 },

    /// First-TLV-offset differs from the fixed L-APS value.
    #[error("Invalid first TLV offset: {offset}")]
    InvalidFirstTlvOffset { offset: u8 },

    /// A TLV's declared length runs past the end of the frame.
    #[error("TLV type {tlv_type} at offset {offset} with length {length} exceeds frame")]
    TlvOverrun {
        tlv_type: u8,
        offset: usize,
        length: u16,
    },

    /// No End TLV found before the end of the frame.
    #[error("Missing End TLV")]
    MissingEndTlv,

    /// Request/state nibble is a reserved codepoint.
    #[error("Invalid APS request code: 0x{code:X}")]
    InvalidRequestCode { code: u8 },
}

/// Errors that prevent an L-APS frame from being generated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PduBuildingError {
    /// The protect port is unknown to the platform.
    #[error("Protect {0} unavailable for frame generation")]
    ProtectPortUnavailable(PortNo),

    /// MEG level outside 0..=7.
    #[error("Invalid MEG level: {0}")]
    InvalidLevel(u8),

    /// PCP outside 0..=7.
    #[error("Invalid PCP: {0}")]
    InvalidPcp(u8),
}

/// A failure reported by the hardware platform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed: {reason}")]
pub struct PlatformError {
    /// Platform operation that failed, e.g. `"set_selector"`.
    pub operation: &'static str,
    /// Platform-provided description.
    pub reason: String,
}

impl PlatformError {
    /// Creates a platform error for `operation`.
    pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
        Self {
            operation,
            reason: reason.into(),
        }
    }
}

/// Main error type for linear APS operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApsError {
    /// No instance is registered under this ID.
    #[error("Instance {0} not found")]
    InstanceNotFound(InstanceId),

    /// Activation requested for an instance that is already active.
    #[error("Instance {0} is already active")]
    AlreadyActive(InstanceId),

    /// Operation requires an active instance.
    #[error("Instance {0} is not active")]
    NotActive(InstanceId),

    /// Configuration failed validation.
    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfig {
        field: &'static str,
        reason: String,
    },

    /// Only FREEZE-CLEAR is accepted while a freeze command is in effect.
    #[error("Command rejected while frozen")]
    CommandWhileFrozen,

    /// Exercise has no meaning without a peer to answer it.
    #[error("Exercise is not supported in 1+1 unidirectional mode")]
    ExerciseUnidirectional,

    /// The hardware platform failed.
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Error during frame parsing.
    #[error("Parsing error: {0}")]
    Parsing(#[from] PduParsingError),

    /// Error during frame building.
    #[error("Building error: {0}")]
    Building(#[from] PduBuildingError),

    /// Unexpected internal logic error, likely a bug in linaps.
    #[error("Internal logic error: {0}")]
    Internal(String),
}
