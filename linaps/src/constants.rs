//! G.8031 linear APS protocol constants.
//!
//! Wire-level values for the L-APS PDU and the timing constants that drive
//! transmission, loss-of-peer detection and the protocol timers.

use std::time::Duration;

// --- Ethernet / CFM Framing (G.8013/Y.1731, G.8031 cl. 11) ---

/// Length of an untagged Ethernet header (DMAC + SMAC + EtherType).
pub const ETH_HEADER_LEN: usize = 14;
/// Length of a single 802.1Q tag (TPID + TCI).
pub const VLAN_TAG_LEN: usize = 4;
/// Minimum Ethernet frame length (excluding FCS); shorter frames are padded.
pub const ETH_MIN_FRAME_LEN: usize = 60;
/// EtherType carried by CFM/OAM frames.
pub const CFM_ETHERTYPE: u16 = 0x8902;
/// Default 802.1Q TPID used when the protect port reports none.
pub const DEFAULT_TPID: u16 = 0x8100;

/// Destination MAC for L-APS; the low nibble of the last byte carries the MEG level.
pub const LAPS_DMAC: [u8; 6] = [0x01, 0x80, 0xC2, 0x00, 0x00, 0x30];
/// CFM opcode identifying an L-APS PDU.
pub const LAPS_OPCODE: u8 = 39;
/// CFM version carried in the low five bits of the level/version byte.
pub const CFM_VERSION: u8 = 0;
/// The only first-TLV-offset a valid L-APS PDU may carry.
pub const LAPS_FIRST_TLV_OFFSET: u8 = 4;
/// TLV type terminating the PDU.
pub const END_TLV_TYPE: u8 = 0;

/// CFM common header: level/version, opcode, flags, first-TLV-offset.
pub const CFM_COMMON_HEADER_LEN: usize = 4;
/// Length of the APS-specific information.
pub const APS_INFO_LEN: usize = 4;
/// Smallest acceptable PDU after the Ethernet header: common header, APS info, End TLV.
pub const LAPS_PDU_MIN_LEN: usize = CFM_COMMON_HEADER_LEN + APS_INFO_LEN + 1;

/// Shift of the MEG level within the level/version byte.
pub const MEG_LEVEL_SHIFT: u8 = 5;
/// Highest valid MEG level.
pub const MEG_LEVEL_MAX: u8 = 7;
/// Highest valid PCP value.
pub const PCP_MAX: u8 = 7;
/// Highest valid VLAN ID.
pub const VLAN_ID_MAX: u16 = 4095;

// --- APS-Specific Information Byte 0 ---

/// A bit: this end transmits APS PDUs.
pub const APS_FLAG_A: u8 = 0x08;
/// B bit: 1:1 architecture (cleared for 1+1).
pub const APS_FLAG_B: u8 = 0x04;
/// D bit: bidirectional switching.
pub const APS_FLAG_D: u8 = 0x02;
/// R bit: revertive operation.
pub const APS_FLAG_R: u8 = 0x01;
/// Mask covering the request/state nibble.
pub const APS_REQUEST_MASK: u8 = 0xF0;
/// Shift of the request/state nibble.
pub const APS_REQUEST_SHIFT: u8 = 4;

// --- Timing (G.8031 cl. 11.13, G.8021 cl. 9.1.1) ---

/// Steady-state L-APS transmission period.
pub const TX_PERIOD: Duration = Duration::from_millis(5000);
/// Number of back-to-back PDUs sent whenever the payload changes.
pub const TX_BURST_COUNT: u32 = 3;
/// Loss-of-peer detection time (3.5 x Tx period).
pub const RX_TIMEOUT: Duration = Duration::from_millis(17_500);
/// Time a requested-signal mismatch must persist before dFOP-NR is raised.
pub const DFOP_NR_DEBOUNCE: Duration = Duration::from_millis(50);

// --- Configuration Limits and Defaults ---

/// Minimum wait-to-restore time in seconds.
pub const WTR_SECS_MIN: u16 = 1;
/// Maximum wait-to-restore time in seconds.
pub const WTR_SECS_MAX: u16 = 720;
/// Default wait-to-restore time in seconds (5 minutes).
pub const DEFAULT_WTR_SECS: u16 = 300;
/// Maximum hold-off time in milliseconds.
pub const HOLD_OFF_MSECS_MAX: u16 = 10_000;
/// Hold-off must be a multiple of this many milliseconds.
pub const HOLD_OFF_MSECS_STEP: u16 = 100;
/// Default PCP for transmitted PDUs.
pub const DEFAULT_PCP: u8 = 7;

/// Number of entries retained in the per-instance history ring.
pub const HISTORY_CAPACITY: usize = 50;
