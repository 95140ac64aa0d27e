//! L-APS wire serialization.
//!
//! Frame construction and validation for the Ethernet-encapsulated L-APS PDU.

pub mod laps_frame;

pub use laps_frame::{LapsFrame, LapsFrameParams, LapsPdu, build_laps_frame, parse_laps_frame};
