//! End-to-end protection switching scenarios.
//!
//! Each test drives one instance through the engine API on a mock clock and
//! checks the protection state, the hardware selector and the PDUs sent.

mod common;

use std::time::Duration;

use common::{ID, PROTECT, TEST_WTR_SECS, TestBed, config, peer_aps, peer_frame};
use linaps::{
    ApsRequestCode, Command, Mode, PortRole, ProtectionState, RxMetadata, Selector, TimerKind,
};

#[test]
fn revertive_working_failure_and_restore() {
    let mut bed = TestBed::activated(config(Mode::OneForOne, true));

    bed.engine
        .set_signal_fail_degrade(ID, PortRole::Working, true, false)
        .unwrap();
    let status = bed.engine.status(ID).unwrap();
    assert_eq!(status.state, ProtectionState::SfWorking);
    assert_eq!(status.selector, Selector::Protect);
    assert_eq!(bed.platform.last_selector(ID), Some(Selector::Protect));
    assert_eq!(bed.last_tx().unwrap().request_nibble(), 0xB);

    bed.engine
        .set_signal_fail_degrade(ID, PortRole::Working, false, false)
        .unwrap();
    let status = bed.engine.status(ID).unwrap();
    assert_eq!(status.state, ProtectionState::WaitToRestore);
    assert_eq!(status.selector, Selector::Protect);
    assert_eq!(
        bed.engine.timer_remaining(ID, TimerKind::Wtr),
        Some(Duration::from_secs(u64::from(TEST_WTR_SECS)))
    );

    bed.advance(Duration::from_secs(u64::from(TEST_WTR_SECS) - 1));
    assert_eq!(
        bed.engine.status(ID).unwrap().state,
        ProtectionState::WaitToRestore
    );

    bed.advance(Duration::from_secs(1));
    let status = bed.engine.status(ID).unwrap();
    assert_eq!(status.state, ProtectionState::NrWorking);
    assert_eq!(status.selector, Selector::Working);
    assert!(bed.engine.timer_remaining(ID, TimerKind::Wtr).is_none());
    assert_eq!(bed.last_tx().unwrap().request_nibble(), 0x0);
}

#[test]
fn lockout_and_clear() {
    let mut bed = TestBed::activated(config(Mode::OneForOne, true));

    bed.engine.set_command(ID, Command::Lockout).unwrap();
    let status = bed.engine.status(ID).unwrap();
    assert_eq!(status.state, ProtectionState::Lockout);
    assert_eq!(status.selector, Selector::Working);
    assert_eq!(bed.last_tx().unwrap().request_nibble(), 0xF);

    // Nothing but Clear leaves lockout.
    bed.engine
        .set_signal_fail_degrade(ID, PortRole::Working, true, false)
        .unwrap();
    assert_eq!(bed.engine.status(ID).unwrap().state, ProtectionState::Lockout);
    bed.engine
        .set_signal_fail_degrade(ID, PortRole::Working, false, false)
        .unwrap();

    bed.engine.set_command(ID, Command::Clear).unwrap();
    let status = bed.engine.status(ID).unwrap();
    assert_eq!(status.state, ProtectionState::NrWorking);
    assert_eq!(status.command, Command::NoRequest);
    assert_eq!(status.selector, Selector::Working);
}

#[test]
fn non_revertive_forced_switch_clears_to_dnr() {
    let mut bed = TestBed::activated(config(Mode::OnePlusOneBidirectional, false));

    bed.engine.set_command(ID, Command::ForcedSwitch).unwrap();
    let status = bed.engine.status(ID).unwrap();
    assert_eq!(status.state, ProtectionState::ForcedSwitch);
    assert_eq!(status.selector, Selector::Protect);

    let tx = bed.last_tx().unwrap();
    assert_eq!(tx.as_bytes()[0], 0xDA);
    assert!(tx.a_bit());
    assert!(!tx.b_bit());
    assert!(tx.d_bit());
    assert!(!tx.r_bit());

    bed.engine.set_command(ID, Command::Clear).unwrap();
    let status = bed.engine.status(ID).unwrap();
    assert_eq!(status.state, ProtectionState::DoNotRevert);
    assert_eq!(status.selector, Selector::Protect);
    assert_eq!(bed.last_tx().unwrap().request_nibble(), 0x1);
}

#[test]
fn far_end_ignored_after_protect_timeout() {
    let mode = Mode::OneForOne;
    let mut bed = TestBed::activated(config(mode, true));
    assert!(bed.engine.status(ID).unwrap().dfop_to);

    // Far end forces traffic to protect.
    bed.receive(peer_aps(ApsRequestCode::ForcedSwitch, mode, true, 1));
    let status = bed.engine.status(ID).unwrap();
    assert!(!status.dfop_to);
    assert_eq!(status.state, ProtectionState::NrProtect);

    bed.advance(Duration::from_millis(17_000));
    assert!(!bed.engine.status(ID).unwrap().dfop_to);
    bed.advance(Duration::from_millis(500));
    let status = bed.engine.status(ID).unwrap();
    assert!(status.dfop_to);
    assert_eq!(status.state, ProtectionState::NrProtect);

    // The stale far-end FS would keep us in NR-P; it is no longer consulted.
    bed.engine
        .set_signal_fail_degrade(ID, PortRole::Working, true, false)
        .unwrap();
    assert_eq!(bed.engine.status(ID).unwrap().state, ProtectionState::SfWorking);
}

#[test]
fn far_end_forced_switch_outranks_working_failure() {
    let mode = Mode::OneForOne;
    let mut bed = TestBed::activated(config(mode, true));
    bed.receive(peer_aps(ApsRequestCode::ForcedSwitch, mode, true, 1));

    bed.engine
        .set_signal_fail_degrade(ID, PortRole::Working, true, false)
        .unwrap();
    let status = bed.engine.status(ID).unwrap();
    assert_eq!(status.state, ProtectionState::NrProtect);
    assert_eq!(status.selector, Selector::Protect);
}

#[test]
fn bad_first_tlv_offset_is_dropped() {
    let mode = Mode::OneForOne;
    let mut bed = TestBed::activated(config(mode, true));
    let before = bed.engine.status(ID).unwrap();

    let level = bed.engine.config(ID).unwrap().level;
    let mut frame = peer_frame(level, peer_aps(ApsRequestCode::ForcedSwitch, mode, true, 1));
    frame[17] = 5; // First-TLV-offset of an untagged frame
    bed.engine
        .rx_frame(
            ID,
            &frame,
            RxMetadata {
                port_role: PortRole::Protect,
            },
        )
        .unwrap();

    let stats = bed.engine.statistics(ID).unwrap();
    assert_eq!(stats.rx_invalid_count, 1);
    assert_eq!(stats.rx_valid_count, 0);
    assert_eq!(bed.engine.status(ID).unwrap(), before);
}

#[test]
fn pdu_on_working_port_raises_configuration_mismatch() {
    let mode = Mode::OneForOne;
    let mut bed = TestBed::activated(config(mode, true));
    let level = bed.engine.config(ID).unwrap().level;
    let frame = peer_frame(level, peer_aps(ApsRequestCode::NoRequest, mode, true, 0));

    bed.engine
        .rx_frame(
            ID,
            &frame,
            RxMetadata {
                port_role: PortRole::Working,
            },
        )
        .unwrap();
    assert!(bed.engine.status(ID).unwrap().dfop_cm);

    bed.advance(Duration::from_millis(17_500));
    assert!(!bed.engine.status(ID).unwrap().dfop_cm);
}

#[test]
fn provisioning_mismatch_pins_selector_to_working() {
    let mut bed = TestBed::activated(config(Mode::OneForOne, true));

    // Peer runs 1+1 bidirectional and requests protect.
    bed.receive(peer_aps(
        ApsRequestCode::ForcedSwitch,
        Mode::OnePlusOneBidirectional,
        true,
        1,
    ));
    let status = bed.engine.status(ID).unwrap();
    assert!(status.dfop_pm);
    assert_eq!(status.state, ProtectionState::NrWorking);
    assert_eq!(status.selector, Selector::Working);
}

#[test]
fn requested_signal_mismatch_raises_no_response() {
    let mode = Mode::OneForOne;
    let mut bed = TestBed::activated(config(mode, true));
    bed.receive(peer_aps(ApsRequestCode::NoRequest, mode, true, 0));

    // We now request protect; the peer keeps answering with null.
    bed.engine
        .set_signal_fail_degrade(ID, PortRole::Working, true, false)
        .unwrap();
    assert_eq!(bed.engine.status(ID).unwrap().state, ProtectionState::SfWorking);
    bed.receive(peer_aps(ApsRequestCode::NoRequest, mode, true, 0));
    assert!(!bed.engine.status(ID).unwrap().dfop_nr);

    bed.advance(Duration::from_millis(50));
    assert!(bed.engine.status(ID).unwrap().dfop_nr);

    // Peer catches up.
    bed.receive(peer_aps(ApsRequestCode::NoRequest, mode, true, 1));
    assert!(!bed.engine.status(ID).unwrap().dfop_nr);
}

#[test]
fn periodic_transmission_and_burst() {
    let mut bed = TestBed::activated(config(Mode::OneForOne, true));
    assert_eq!(bed.platform.transmitted(PROTECT).len(), 3);

    bed.advance(Duration::from_secs(15));
    assert_eq!(bed.platform.transmitted(PROTECT).len(), 6);

    bed.engine.set_command(ID, Command::ForcedSwitch).unwrap();
    assert_eq!(bed.platform.transmitted(PROTECT).len(), 9);
    assert_eq!(bed.engine.statistics(ID).unwrap().tx_count, 9);
}
