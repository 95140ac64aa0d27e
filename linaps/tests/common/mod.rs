//! Common test utilities for linaps integration tests.
//!
//! Shared helpers for building engines on a mock clock, crafting peer PDUs
//! and inspecting what the engine put on the wire.

#![allow(dead_code)] // Not every test file uses every helper.

use std::sync::Arc;
use std::time::{Duration, Instant};

use linaps::serialization::{LapsFrameParams, build_laps_frame, parse_laps_frame};
use linaps::testing::RecordingPlatform;
use linaps::time::Clock;
use linaps::time::mock_clock::MockClock;
use linaps::{
    ApsEngine, ApsInfo, ApsRequestCode, InstanceConfig, InstanceId, MacAddr, MegLevel, Mode,
    PortConfig, PortNo, PortRole, RxMetadata, SfTrigger, VlanId,
};

/// Instance used by single-instance tests.
pub const ID: InstanceId = InstanceId(1);
/// Working port of [`ID`].
pub const WORKING: PortNo = PortNo(1);
/// Protect port of [`ID`]; PDUs travel here.
pub const PROTECT: PortNo = PortNo(2);
/// SMAC used for PDUs crafted as coming from the far end.
pub const PEER_SMAC: MacAddr = MacAddr([0x00, 0x01, 0xC1, 0x00, 0x0F, 0xAB]);
/// WTR configured by [`config`].
pub const TEST_WTR_SECS: u16 = 10;

/// An engine on a mock clock backed by a recording platform with ports 1..=4.
pub struct TestBed {
    pub engine: ApsEngine,
    pub clock: Arc<MockClock>,
    pub platform: Arc<RecordingPlatform>,
}

impl TestBed {
    /// Creates the bed with all ports up.
    pub fn new() -> Self {
        let clock = Arc::new(MockClock::new(Instant::now()));
        let platform = Arc::new(RecordingPlatform::with_ports([1, 2, 3, 4]));
        let engine = ApsEngine::new(clock.clone(), platform.clone());
        Self {
            engine,
            clock,
            platform,
        }
    }

    /// Creates the bed and activates [`ID`] with `config`.
    pub fn activated(config: InstanceConfig) -> Self {
        let mut bed = Self::new();
        bed.engine.activate(ID, config, false, false).unwrap();
        bed
    }

    /// Moves time forward and fires every timer that became due.
    ///
    /// The clock stops at each deadline on the way, so periodic timers fire
    /// on their cadence rather than being skipped.
    pub fn advance(&mut self, by: Duration) {
        let until = self.clock.now() + by;
        while let Some(deadline) = self.engine.next_deadline().filter(|d| *d <= until) {
            self.clock.advance_to(deadline);
            self.engine.process_timers();
        }
        self.clock.advance_to(until);
    }

    /// Delivers a PDU carrying `aps` from the far end on the protect port.
    pub fn receive(&mut self, aps: ApsInfo) {
        let level = self.engine.config(ID).unwrap().level;
        let frame = peer_frame(level, aps);
        self.engine
            .rx_frame(
                ID,
                &frame,
                RxMetadata {
                    port_role: PortRole::Protect,
                },
            )
            .unwrap();
    }

    /// APS payload of the most recent PDU sent on the protect port.
    pub fn last_tx(&self) -> Option<ApsInfo> {
        let level = self.engine.config(ID).unwrap().level;
        self.platform
            .transmitted(PROTECT)
            .last()
            .map(|frame| parse_laps_frame(frame, level).unwrap().aps)
    }
}

/// A 1:1 configuration on ports 1 and 2.
pub fn config(mode: Mode, revertive: bool) -> InstanceConfig {
    InstanceConfig {
        working: PortConfig {
            port: WORKING,
            sf_trigger: SfTrigger::Link,
        },
        protect: PortConfig {
            port: PROTECT,
            sf_trigger: SfTrigger::Link,
        },
        mode,
        revertive,
        wtr_secs: TEST_WTR_SECS,
        ..Default::default()
    }
}

/// A/B/D/R flags a correctly provisioned peer would send.
pub fn peer_flags(mode: Mode, revertive: bool) -> u8 {
    let mut flags = 0x08; // A
    if mode == Mode::OneForOne {
        flags |= 0x04;
    }
    if !mode.is_unidirectional() {
        flags |= 0x02;
    }
    if revertive {
        flags |= 0x01;
    }
    flags
}

/// Payload a peer in `mode` would send for `code`.
pub fn peer_aps(code: ApsRequestCode, mode: Mode, revertive: bool, requested: u8) -> ApsInfo {
    let bridged = if mode.is_one_plus_one() { 1 } else { requested };
    ApsInfo::new(code, peer_flags(mode, revertive), requested, bridged)
}

/// Serialized untagged PDU from [`PEER_SMAC`].
pub fn peer_frame(level: MegLevel, aps: ApsInfo) -> Vec<u8> {
    build_laps_frame(&LapsFrameParams {
        smac: PEER_SMAC,
        level,
        vlan: VlanId::new(0),
        pcp: 7,
        tpid: 0x8100,
        aps,
    })
    .unwrap()
    .bytes
    .to_vec()
}
