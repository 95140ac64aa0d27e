//! L-APS frame building and parsing.
//!
//! Frame layout (untagged):
//!
//! ```text
//! 0      6      12     14        15      16     17        18       22
//! | DMAC | SMAC | 8902 | lvl|ver | op=39 | flags| tlv_off=4| APS(4) | End(0) | pad..60
//! ```
//!
//! A single 802.1Q tag may sit between SMAC and the EtherType.

use bytes::{BufMut, BytesMut};

use crate::constants::{
    APS_INFO_LEN, CFM_COMMON_HEADER_LEN, CFM_ETHERTYPE, CFM_VERSION, END_TLV_TYPE,
    ETH_HEADER_LEN, ETH_MIN_FRAME_LEN, LAPS_DMAC, LAPS_FIRST_TLV_OFFSET, LAPS_OPCODE,
    LAPS_PDU_MIN_LEN, MEG_LEVEL_MAX, MEG_LEVEL_SHIFT, PCP_MAX, VLAN_TAG_LEN,
};
use crate::error::{ParseContext, PduBuildingError, PduParsingError};
use crate::protocol_types::ApsInfo;
use crate::types::{MacAddr, MegLevel, VlanId};

/// TPIDs recognised when looking for a VLAN tag on received frames.
const KNOWN_TPIDS: [u16; 3] = [0x8100, 0x88A8, 0x9100];

/// Everything needed to generate an L-APS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapsFrameParams {
    /// Source MAC.
    pub smac: MacAddr,
    /// MEG level.
    pub level: MegLevel,
    /// VLAN; zero sends untagged.
    pub vlan: VlanId,
    /// PCP used when tagged.
    pub pcp: u8,
    /// TPID used when tagged.
    pub tpid: u16,
    /// APS-specific information.
    pub aps: ApsInfo,
}

/// A generated frame together with the position of its APS payload, so the
/// payload can be rewritten in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LapsFrame {
    /// Complete frame, padded to the Ethernet minimum.
    pub bytes: BytesMut,
    /// Byte offset of the 4-byte APS-specific information.
    pub aps_offset: usize,
}

impl LapsFrame {
    /// The APS-specific information currently in the frame.
    pub fn aps(&self) -> ApsInfo {
        let mut info = [0u8; APS_INFO_LEN];
        info.copy_from_slice(&self.bytes[self.aps_offset..self.aps_offset + APS_INFO_LEN]);
        ApsInfo(info)
    }

    /// Overwrites the APS-specific information in place.
    pub fn set_aps(&mut self, aps: &ApsInfo) {
        self.bytes[self.aps_offset..self.aps_offset + APS_INFO_LEN].copy_from_slice(aps.as_bytes());
    }
}

/// A successfully validated received L-APS PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapsPdu {
    /// Sender's MAC.
    pub smac: MacAddr,
    /// VLAN found in the frame, if tagged.
    pub vlan: Option<VlanId>,
    /// APS-specific information.
    pub aps: ApsInfo,
}

/// Builds a complete L-APS frame.
///
/// # Parameters
/// - `params`: Addressing, tagging and payload of the frame.
///
/// # Returns
/// The frame and the offset of its APS payload.
///
/// # Errors
/// - [`PduBuildingError::InvalidLevel`] - Level above 7
/// - [`PduBuildingError::InvalidPcp`] - PCP above 7
pub fn build_laps_frame(params: &LapsFrameParams) -> Result<LapsFrame, PduBuildingError> {
    let level = params.level.value();
    if level > MEG_LEVEL_MAX {
        return Err(PduBuildingError::InvalidLevel(level));
    }
    if params.pcp > PCP_MAX {
        return Err(PduBuildingError::InvalidPcp(params.pcp));
    }

    let mut bytes = BytesMut::with_capacity(ETH_MIN_FRAME_LEN);
    let mut dmac = LAPS_DMAC;
    dmac[5] = params.level.dmac_suffix();
    bytes.put_slice(&dmac);
    bytes.put_slice(&params.smac.octets());

    if !params.vlan.is_untagged() {
        bytes.put_u16(params.tpid);
        let tci = (u16::from(params.pcp) << 13) | (params.vlan.value() & 0x0FFF);
        bytes.put_u16(tci);
    }

    bytes.put_u16(CFM_ETHERTYPE);
    bytes.put_u8((level << MEG_LEVEL_SHIFT) | CFM_VERSION);
    bytes.put_u8(LAPS_OPCODE);
    bytes.put_u8(0); // Flags
    bytes.put_u8(LAPS_FIRST_TLV_OFFSET);
    let aps_offset = bytes.len();
    bytes.put_slice(params.aps.as_bytes());
    bytes.put_u8(END_TLV_TYPE);

    if bytes.len() < ETH_MIN_FRAME_LEN {
        bytes.put_bytes(0, ETH_MIN_FRAME_LEN - bytes.len());
    }

    Ok(LapsFrame { bytes, aps_offset })
}

/// Validates a received frame and extracts its APS payload.
///
/// # Parameters
/// - `frame`: Raw frame starting at the destination MAC.
/// - `expected_level`: MEG level configured on the receiving instance.
///
/// # Returns
/// The sender's MAC, VLAN and APS payload.
///
/// # Errors
/// - [`PduParsingError::NotEnoughData`] - Frame truncated
/// - [`PduParsingError::NotCfm`] - Wrong EtherType
/// - [`PduParsingError::WrongOpcode`] - Not opcode 39
/// - [`PduParsingError::LevelMismatch`] - Not for this MEG level
/// - [`PduParsingError::InvalidFirstTlvOffset`] - Offset other than 4
/// - [`PduParsingError::InvalidRequestCode`] - Reserved request nibble
/// - [`PduParsingError::TlvOverrun`] / [`PduParsingError::MissingEndTlv`] - TLV chain malformed
pub fn parse_laps_frame(frame: &[u8], expected_level: MegLevel) -> Result<LapsPdu, PduParsingError> {
    if frame.len() < ETH_HEADER_LEN {
        return Err(PduParsingError::NotEnoughData {
            needed: ETH_HEADER_LEN,
            got: frame.len(),
            context: ParseContext::EthernetHeader,
        });
    }

    let mut smac = [0u8; 6];
    smac.copy_from_slice(&frame[6..12]);

    let mut header_len = ETH_HEADER_LEN;
    let mut vlan = None;
    let mut ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if KNOWN_TPIDS.contains(&ethertype) {
        header_len += VLAN_TAG_LEN;
        if frame.len() < header_len {
            return Err(PduParsingError::NotEnoughData {
                needed: header_len,
                got: frame.len(),
                context: ParseContext::EthernetHeader,
            });
        }
        let tci = u16::from_be_bytes([frame[14], frame[15]]);
        vlan = Some(VlanId::new(tci & 0x0FFF));
        ethertype = u16::from_be_bytes([frame[16], frame[17]]);
    }
    if ethertype != CFM_ETHERTYPE {
        return Err(PduParsingError::NotCfm { ethertype });
    }

    if frame.len() < header_len + LAPS_PDU_MIN_LEN {
        return Err(PduParsingError::NotEnoughData {
            needed: header_len + LAPS_PDU_MIN_LEN,
            got: frame.len(),
            context: ParseContext::LapsPdu,
        });
    }

    let pdu = &frame[header_len..];
    let level = pdu[0] >> MEG_LEVEL_SHIFT;
    if level != expected_level.value() {
        return Err(PduParsingError::LevelMismatch {
            expected: expected_level.value(),
            got: level,
        });
    }
    if pdu[1] != LAPS_OPCODE {
        return Err(PduParsingError::WrongOpcode { opcode: pdu[1] });
    }
    if pdu[3] != LAPS_FIRST_TLV_OFFSET {
        return Err(PduParsingError::InvalidFirstTlvOffset { offset: pdu[3] });
    }

    let mut aps = [0u8; APS_INFO_LEN];
    aps.copy_from_slice(&pdu[CFM_COMMON_HEADER_LEN..CFM_COMMON_HEADER_LEN + APS_INFO_LEN]);
    let aps = ApsInfo(aps);
    aps.request_code()?;

    // TLVs start right after the first-TLV-offset field plus the offset itself.
    let mut offset = CFM_COMMON_HEADER_LEN + usize::from(LAPS_FIRST_TLV_OFFSET);
    while offset < pdu.len() {
        let tlv_type = pdu[offset];
        if tlv_type == END_TLV_TYPE {
            return Ok(LapsPdu {
                smac: MacAddr(smac),
                vlan,
                aps,
            });
        }
        if offset + 3 > pdu.len() {
            return Err(PduParsingError::NotEnoughData {
                needed: header_len + offset + 3,
                got: frame.len(),
                context: ParseContext::Tlv,
            });
        }
        let length = u16::from_be_bytes([pdu[offset + 1], pdu[offset + 2]]);
        let next = offset + 3 + usize::from(length);
        if next > pdu.len() {
            return Err(PduParsingError::TlvOverrun {
                tlv_type,
                offset: header_len + offset,
                length,
            });
        }
        offset = next;
    }

    Err(PduParsingError::MissingEndTlv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{APS_FLAG_A, APS_FLAG_B, APS_FLAG_D};
    use crate::protocol_types::ApsRequestCode;

    fn params() -> LapsFrameParams {
        LapsFrameParams {
            smac: MacAddr([0x00, 0x01, 0xC1, 0x00, 0x00, 0x02]),
            level: MegLevel::new(3),
            vlan: VlanId::new(0),
            pcp: 7,
            tpid: 0x8100,
            aps: ApsInfo::new(
                ApsRequestCode::SfWorking,
                APS_FLAG_A | APS_FLAG_B | APS_FLAG_D,
                1,
                1,
            ),
        }
    }

    #[test]
    fn builds_untagged_frame_layout() {
        let frame = build_laps_frame(&params()).unwrap();
        let b = &frame.bytes;
        assert_eq!(b.len(), ETH_MIN_FRAME_LEN);
        assert_eq!(&b[0..6], &[0x01, 0x80, 0xC2, 0x00, 0x00, 0x33]);
        assert_eq!(&b[6..12], &[0x00, 0x01, 0xC1, 0x00, 0x00, 0x02]);
        assert_eq!(&b[12..14], &[0x89, 0x02]);
        assert_eq!(b[14], 3 << 5);
        assert_eq!(b[15], 39);
        assert_eq!(b[16], 0);
        assert_eq!(b[17], 4);
        assert_eq!(frame.aps_offset, 18);
        assert_eq!(&b[18..22], &[0xBE, 1, 1, 0]);
        assert_eq!(b[22], 0);
    }

    #[test]
    fn builds_tagged_frame_with_pcp_and_vid() {
        let mut p = params();
        p.vlan = VlanId::new(100);
        p.pcp = 5;
        p.tpid = 0x88A8;
        let frame = build_laps_frame(&p).unwrap();
        let b = &frame.bytes;
        assert_eq!(&b[12..14], &[0x88, 0xA8]);
        assert_eq!(u16::from_be_bytes([b[14], b[15]]), (5 << 13) | 100);
        assert_eq!(&b[16..18], &[0x89, 0x02]);
        assert_eq!(frame.aps_offset, 22);
        assert_eq!(frame.aps(), p.aps);
    }

    #[test]
    fn rejects_invalid_level_on_build() {
        let mut p = params();
        p.level = MegLevel::new(8);
        assert_eq!(build_laps_frame(&p), Err(PduBuildingError::InvalidLevel(8)));
    }

    #[test]
    fn parse_roundtrip_untagged_and_tagged() {
        let p = params();
        let frame = build_laps_frame(&p).unwrap();
        let pdu = parse_laps_frame(&frame.bytes, p.level).unwrap();
        assert_eq!(pdu.aps, p.aps);
        assert_eq!(pdu.smac, p.smac);
        assert_eq!(pdu.vlan, None);

        let mut tagged = p;
        tagged.vlan = VlanId::new(42);
        let frame = build_laps_frame(&tagged).unwrap();
        let pdu = parse_laps_frame(&frame.bytes, p.level).unwrap();
        assert_eq!(pdu.aps, p.aps);
        assert_eq!(pdu.vlan, Some(VlanId::new(42)));
    }

    #[test]
    fn set_aps_rewrites_in_place() {
        let mut frame = build_laps_frame(&params()).unwrap();
        let nr = ApsInfo::new(ApsRequestCode::NoRequest, APS_FLAG_A, 0, 0);
        frame.set_aps(&nr);
        assert_eq!(frame.aps(), nr);
        assert_eq!(&frame.bytes[18..22], &[0x08, 0, 0, 0]);
    }

    #[test]
    fn rejects_truncated_frame() {
        let frame = build_laps_frame(&params()).unwrap();
        let err = parse_laps_frame(&frame.bytes[..20], MegLevel::new(3)).unwrap_err();
        assert_eq!(
            err,
            PduParsingError::NotEnoughData {
                needed: 23,
                got: 20,
                context: ParseContext::LapsPdu,
            }
        );
    }

    #[test]
    fn rejects_wrong_level() {
        let frame = build_laps_frame(&params()).unwrap();
        assert_eq!(
            parse_laps_frame(&frame.bytes, MegLevel::new(2)),
            Err(PduParsingError::LevelMismatch {
                expected: 2,
                got: 3
            })
        );
    }

    #[test]
    fn rejects_wrong_first_tlv_offset() {
        let mut frame = build_laps_frame(&params()).unwrap();
        frame.bytes[17] = 5;
        assert_eq!(
            parse_laps_frame(&frame.bytes, MegLevel::new(3)),
            Err(PduParsingError::InvalidFirstTlvOffset { offset: 5 })
        );
    }

    #[test]
    fn rejects_reserved_request_code() {
        let mut frame = build_laps_frame(&params()).unwrap();
        frame.bytes[18] = 0x6E;
        assert_eq!(
            parse_laps_frame(&frame.bytes, MegLevel::new(3)),
            Err(PduParsingError::InvalidRequestCode { code: 0x6 })
        );
    }

    #[test]
    fn rejects_wrong_ethertype_and_opcode() {
        let mut frame = build_laps_frame(&params()).unwrap();
        frame.bytes[15] = 1;
        assert_eq!(
            parse_laps_frame(&frame.bytes, MegLevel::new(3)),
            Err(PduParsingError::WrongOpcode { opcode: 1 })
        );
        frame.bytes[12] = 0x08;
        frame.bytes[13] = 0x00;
        assert_eq!(
            parse_laps_frame(&frame.bytes, MegLevel::new(3)),
            Err(PduParsingError::NotCfm { ethertype: 0x0800 })
        );
    }

    #[test]
    fn skips_unknown_tlvs_before_end() {
        let mut frame = build_laps_frame(&params()).unwrap();
        // Organisation-specific TLV (type 31) with 2 bytes of value, then End.
        frame.bytes.truncate(22);
        frame.bytes.put_slice(&[31, 0, 2, 0xAA, 0xBB, END_TLV_TYPE]);
        frame.bytes.put_bytes(0, 20);
        assert!(parse_laps_frame(&frame.bytes, MegLevel::new(3)).is_ok());
    }

    #[test]
    fn rejects_missing_end_tlv() {
        let mut frame = build_laps_frame(&params()).unwrap();
        frame.bytes.truncate(22);
        // TLV consuming exactly the rest of the frame, leaving no room for End.
        frame.bytes.put_slice(&[31, 0, 1, 0xAA]);
        assert_eq!(
            parse_laps_frame(&frame.bytes, MegLevel::new(3)),
            Err(PduParsingError::MissingEndTlv)
        );
    }

    #[test]
    fn rejects_tlv_overrun() {
        let mut frame = build_laps_frame(&params()).unwrap();
        frame.bytes.truncate(22);
        frame.bytes.put_slice(&[31, 0x01, 0x00, 0xAA]);
        assert_eq!(
            parse_laps_frame(&frame.bytes, MegLevel::new(3)),
            Err(PduParsingError::TlvOverrun {
                tlv_type: 31,
                offset: 22,
                length: 256
            })
        );
    }
}
