//! Per-instance L-APS transmit state and PDU counters.
//!
//! The transmitter owns the generated frame. It decides *when* a burst is
//! due; the engine performs the actual injection and arms the periodic Tx
//! timer, because both need the platform and the timer queue.

use serde::Serialize;

use crate::protocol_types::ApsInfo;
use crate::serialization::LapsFrame;

/// PDU counters of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Statistics {
    /// Frames handed to the platform for transmission.
    pub tx_count: u64,
    /// Valid PDUs received on the protect port.
    pub rx_valid_count: u64,
    /// Rejected PDUs received on the protect port.
    pub rx_invalid_count: u64,
}

/// What the caller must do after updating the transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxAction {
    /// Nothing changed on the wire.
    None,
    /// Send the frame three times and (re)start the periodic timer.
    Burst,
}

/// The current outgoing frame and whether it has gone out at least once.
#[derive(Debug, Default)]
pub struct LapsTransmitter {
    frame: Option<LapsFrame>,
    transmitted: bool,
}

impl LapsTransmitter {
    /// Creates a transmitter without a frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a frame is loaded.
    pub fn is_active(&self) -> bool {
        self.frame.is_some()
    }

    /// Whether the loaded frame has been sent at least once.
    pub fn has_transmitted(&self) -> bool {
        self.transmitted
    }

    /// Bytes of the loaded frame.
    pub fn frame_bytes(&self) -> Option<&[u8]> {
        self.frame.as_ref().map(|frame| &frame.bytes[..])
    }

    /// APS payload of the loaded frame.
    pub fn current_aps(&self) -> Option<ApsInfo> {
        self.frame.as_ref().map(LapsFrame::aps)
    }

    /// Replaces the frame after one of its header fields changed.
    ///
    /// An identical frame is kept without disturbing the transmit cadence.
    ///
    /// # Returns
    /// `true` if the frame was replaced. The caller then stops the periodic
    /// timer and, if it wants the new frame out now, starts a burst.
    pub fn replace_frame(&mut self, frame: LapsFrame) -> bool {
        if self.frame.as_ref() == Some(&frame) {
            return false;
        }
        self.frame = Some(frame);
        self.transmitted = false;
        true
    }

    /// Writes a new payload into the loaded frame.
    ///
    /// A burst is due when the payload changed, when nothing has been sent
    /// yet, or when flushing the final PDU before shutdown.
    pub fn update_aps(&mut self, aps: &ApsInfo, shutdown: bool) -> TxAction {
        let Some(frame) = self.frame.as_mut() else {
            return TxAction::None;
        };
        if !self.transmitted || shutdown || frame.aps() != *aps {
            frame.set_aps(aps);
            TxAction::Burst
        } else {
            TxAction::None
        }
    }

    /// Records that a burst went out.
    pub fn mark_transmitted(&mut self) {
        if self.frame.is_some() {
            self.transmitted = true;
        }
    }

    /// Drops the frame. The caller stops the periodic timer.
    pub fn cancel(&mut self) {
        self.frame = None;
        self.transmitted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_types::ApsRequestCode;
    use crate::serialization::{LapsFrameParams, build_laps_frame};
    use crate::types::{MacAddr, MegLevel, VlanId};

    fn frame(vlan: u16, aps: ApsInfo) -> LapsFrame {
        build_laps_frame(&LapsFrameParams {
            smac: MacAddr([0, 1, 2, 3, 4, 5]),
            level: MegLevel::new(2),
            vlan: VlanId::new(vlan),
            pcp: 7,
            tpid: 0x8100,
            aps,
        })
        .unwrap()
    }

    fn nr() -> ApsInfo {
        ApsInfo::new(ApsRequestCode::NoRequest, 0x0E, 0, 0)
    }

    fn sf_w() -> ApsInfo {
        ApsInfo::new(ApsRequestCode::SfWorking, 0x0E, 1, 1)
    }

    #[test]
    fn first_update_always_bursts() {
        let mut tx = LapsTransmitter::new();
        assert_eq!(tx.update_aps(&nr(), false), TxAction::None);

        assert!(tx.replace_frame(frame(0, nr())));
        assert_eq!(tx.update_aps(&nr(), false), TxAction::Burst);
        tx.mark_transmitted();
        assert_eq!(tx.update_aps(&nr(), false), TxAction::None);
    }

    #[test]
    fn payload_change_bursts_and_rewrites_in_place() {
        let mut tx = LapsTransmitter::new();
        tx.replace_frame(frame(10, nr()));
        tx.update_aps(&nr(), false);
        tx.mark_transmitted();

        assert_eq!(tx.update_aps(&sf_w(), false), TxAction::Burst);
        assert_eq!(tx.current_aps(), Some(sf_w()));
        assert_eq!(tx.frame_bytes().map(<[u8]>::len), Some(60));
    }

    #[test]
    fn shutdown_forces_burst() {
        let mut tx = LapsTransmitter::new();
        tx.replace_frame(frame(0, nr()));
        tx.mark_transmitted();
        assert_eq!(tx.update_aps(&nr(), true), TxAction::Burst);
        tx.cancel();
        assert!(!tx.is_active());
        assert!(!tx.has_transmitted());
    }

    #[test]
    fn identical_frame_keeps_cadence() {
        let mut tx = LapsTransmitter::new();
        tx.replace_frame(frame(5, nr()));
        tx.mark_transmitted();
        assert!(!tx.replace_frame(frame(5, nr())));
        assert!(tx.has_transmitted());
        assert!(tx.replace_frame(frame(6, nr())));
        assert!(!tx.has_transmitted());
    }
}
