//! Fuzz testing harnesses for linaps components.
//!
//! These targets feed arbitrary bytes into the L-APS receive path to verify
//! that malformed PDUs are rejected without panicking or corrupting state.

use std::sync::Arc;
use std::time::Instant;

use crate::config::{InstanceConfig, PortConfig};
use crate::engine::{ApsEngine, RxMetadata};
use crate::protocol_types::{ApsInfo, ApsRequestCode, PortRole};
use crate::serialization::{LapsFrameParams, build_laps_frame};
use crate::testing::RecordingPlatform;
use crate::time::mock_clock::MockClock;
use crate::types::{InstanceId, MacAddr, MegLevel, PortNo, VlanId};

const HARNESS_LEVEL: u8 = 3;

/// Fuzz tests the protect-port receive path of an active 1:1 instance.
///
/// # Setup
/// - Activates instance #1 on ports 1 (working) and 2 (protect)
/// - Feeds a known-good NR PDU so the far end is established
/// - Falls back to fuzzing a fresh instance if setup fails
///
/// # Parameters
/// - `data`: Fuzzer-generated input treated as a raw Ethernet frame
pub fn laps_rx_harness(data: &[u8]) {
    let platform = Arc::new(RecordingPlatform::with_ports([1, 2]));
    let clock = Arc::new(MockClock::new(Instant::now()));
    let mut engine = ApsEngine::new(clock, platform);
    let id = InstanceId::new(1);
    let config = InstanceConfig {
        working: PortConfig {
            port: PortNo::new(1),
            ..Default::default()
        },
        protect: PortConfig {
            port: PortNo::new(2),
            ..Default::default()
        },
        level: MegLevel::new(HARNESS_LEVEL),
        ..Default::default()
    };
    if engine.activate(id, config, false, false).is_err() {
        eprintln!("WARN: Harness failed to activate instance. Fuzzing skipped.");
        return;
    }

    let meta = RxMetadata {
        port_role: PortRole::Protect,
    };
    let known_good = build_laps_frame(&LapsFrameParams {
        smac: MacAddr([0x00, 0x01, 0xC1, 0x00, 0x00, 0x99]),
        level: MegLevel::new(HARNESS_LEVEL),
        vlan: VlanId::new(0),
        pcp: 7,
        tpid: 0x8100,
        aps: ApsInfo::new(ApsRequestCode::NoRequest, 0x0E, 0, 0),
    });
    match known_good {
        Ok(frame) => {
            let _ = engine.rx_frame(id, &frame.bytes, meta);
        }
        Err(_e) => {
            eprintln!("WARN: Harness failed to build sample PDU. Fuzzing against fresh instance.");
        }
    }

    let _ = engine.rx_frame(id, data, meta);
    let _ = engine.status(id);
}
