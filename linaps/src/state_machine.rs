//! G.8031 protection switching state machine.
//!
//! Pure functions only: given the current protection state, operator command,
//! post-hold-off defect states and the last far-end payload, compute the next
//! state. Timers, hardware and transmission are driven by the engine from the
//! returned [`Evaluation`].
//!
//! The evaluation follows G.8031 clause 11.2.1:
//! - a local pseudo-request (Clear, SF/SD off, WTR expired) runs the local
//!   table once and then, unless the far end must be ignored or SF-P just
//!   cleared, the far-end table from the intermediate state;
//! - otherwise the higher of local and far-end request selects the table.

use tracing::error;

use crate::constants::{APS_FLAG_A, APS_FLAG_B, APS_FLAG_D, APS_FLAG_R};
use crate::protocol_types::{
    ApsInfo, ApsRequestCode, Command, DefectState, Mode, ProtectionState, Request, Selector,
};

/// Everything the state machine reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationInputs {
    /// Current protection state.
    pub state: ProtectionState,
    /// Outstanding operator command.
    pub command: Command,
    /// Post-hold-off working port condition.
    pub w_state: DefectState,
    /// Post-hold-off protect port condition.
    pub p_state: DefectState,
    /// Protection architecture.
    pub mode: Mode,
    /// Revertive operation.
    pub revertive: bool,
    /// WTR timer expired while in WTR.
    pub wtr_expired: bool,
    /// Last received far-end payload, `None` if the far end must be ignored
    /// (unidirectional, dFOP-TO or dFOP-PM).
    pub far_end: Option<ApsInfo>,
    /// Latched "SF-W to NR-P in revertive mode" from the previous evaluation.
    pub coming_from_sf: bool,
}

/// Result of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// Top-priority local request.
    pub local: Request,
    /// Far-end request (`NoRequest` when ignored).
    pub far_end: Request,
    /// Far-end payload signalled the null signal.
    pub far_end_null: bool,
    /// Resulting protection state.
    pub state: ProtectionState,
    /// The outstanding command has been overridden and must be forgotten.
    pub clear_command: bool,
    /// New value of the simultaneous-clear latch.
    pub coming_from_sf: bool,
}

/// Computes the top-priority local request.
///
/// Command-driven states only leave on their Clear; defect states leave on
/// the matching "off" pseudo-request. Exercise is only honoured from states
/// where it is allowed and never in unidirectional mode.
///
/// # Parameters
/// - `inputs`: Current state, command and defect conditions.
///
/// # Returns
/// The highest-priority local request eligible in the current state.
pub fn local_request(inputs: &EvaluationInputs) -> Request {
    use ProtectionState as S;

    let clear = inputs.command == Command::Clear;
    let unidirectional = inputs.mode.is_unidirectional();
    let w = inputs.w_state;
    let p = inputs.p_state;
    let or_clear = |otherwise: Request| if clear { Request::Clear } else { otherwise };

    if inputs.state == S::Lockout {
        return or_clear(Request::NoRequest);
    }
    if inputs.command == Command::Lockout {
        return Request::Lockout;
    }

    if inputs.state == S::SfProtect {
        return if p < DefectState::Sf {
            Request::SfProtectOff
        } else {
            Request::NoRequest
        };
    }
    if p == DefectState::Sf {
        return Request::SfProtectOn;
    }

    if inputs.state == S::ForcedSwitch {
        return or_clear(Request::NoRequest);
    }
    if inputs.command == Command::ForcedSwitch {
        return Request::ForcedSwitch;
    }

    if inputs.state == S::SfWorking {
        return if w < DefectState::Sf {
            Request::SfWorkingOff
        } else {
            Request::NoRequest
        };
    }
    if w == DefectState::Sf {
        return Request::SfWorkingOn;
    }

    if inputs.state == S::SdProtect {
        return if p < DefectState::Sd {
            Request::SdProtectOff
        } else {
            Request::NoRequest
        };
    }
    if p == DefectState::Sd {
        return Request::SdProtectOn;
    }

    if inputs.state == S::SdWorking {
        return if w < DefectState::Sd {
            Request::SdWorkingOff
        } else {
            Request::NoRequest
        };
    }
    if w == DefectState::Sd {
        return Request::SdWorkingOn;
    }

    if matches!(inputs.state, S::MsToProtect | S::MsToWorking) {
        return or_clear(Request::NoRequest);
    }
    match inputs.command {
        Command::ManualSwitchToProtect => return Request::MsToProtect,
        Command::ManualSwitchToWorking => return Request::MsToWorking,
        _ => {}
    }

    match inputs.state {
        S::WaitToRestore if inputs.wtr_expired => Request::WtrExpired,
        S::WaitToRestore => or_clear(Request::NoRequest),
        S::NrWorking | S::DoNotRevert | S::ReverseRequestWorking | S::ReverseRequestProtect => {
            if !unidirectional && inputs.command == Command::Exercise {
                Request::Exercise
            } else {
                Request::NoRequest
            }
        }
        S::ExerciseWorking | S::ExerciseProtect => {
            if !unidirectional && clear {
                Request::Clear
            } else {
                Request::NoRequest
            }
        }
        S::NrProtect => Request::NoRequest,
        other => {
            error!(state = %other, "unexpected state in local request evaluation");
            Request::NoRequest
        }
    }
}

/// State transition table for local requests (G.8031 Annex A, table A.1).
///
/// # Parameters
/// - `state`: State to transition from.
/// - `request`: Local request.
/// - `w_state` / `p_state`: Post-hold-off port conditions.
/// - `revertive`: Revertive operation.
///
/// # Returns
/// The next state. An unexpected request keeps `state`.
pub fn local_transition(
    state: ProtectionState,
    request: Request,
    w_state: DefectState,
    p_state: DefectState,
    revertive: bool,
) -> ProtectionState {
    use ProtectionState as S;

    match request {
        Request::NoRequest => state,
        Request::Clear => {
            if p_state == DefectState::Sf {
                S::SfProtect
            } else if w_state == DefectState::Sf {
                S::SfWorking
            } else if p_state == DefectState::Sd {
                S::SdProtect
            } else if w_state == DefectState::Sd {
                S::SdWorking
            } else if revertive {
                S::NrWorking
            } else if matches!(state, S::ForcedSwitch | S::MsToProtect | S::ExerciseProtect) {
                S::DoNotRevert
            } else {
                S::NrWorking
            }
        }
        Request::Exercise => {
            if matches!(state, S::DoNotRevert | S::ReverseRequestProtect) {
                S::ExerciseProtect
            } else {
                S::ExerciseWorking
            }
        }
        Request::WtrExpired => S::NrWorking,
        Request::MsToWorking => S::MsToWorking,
        Request::MsToProtect => S::MsToProtect,
        Request::SdWorkingOff => {
            if p_state == DefectState::Sd {
                S::SdProtect
            } else if revertive {
                S::WaitToRestore
            } else {
                S::DoNotRevert
            }
        }
        Request::SdWorkingOn => S::SdWorking,
        Request::SdProtectOff => {
            if w_state == DefectState::Sd {
                S::SdWorking
            } else {
                S::NrWorking
            }
        }
        Request::SdProtectOn => S::SdProtect,
        Request::SfWorkingOff => {
            if p_state == DefectState::Sd {
                S::SdProtect
            } else if w_state == DefectState::Sd {
                S::SdWorking
            } else if revertive {
                S::WaitToRestore
            } else {
                S::DoNotRevert
            }
        }
        Request::SfWorkingOn => S::SfWorking,
        Request::ForcedSwitch => S::ForcedSwitch,
        Request::SfProtectOff => {
            if w_state == DefectState::Sf {
                S::SfWorking
            } else if p_state == DefectState::Sd {
                S::SdProtect
            } else if w_state == DefectState::Sd {
                S::SdWorking
            } else {
                S::NrWorking
            }
        }
        Request::SfProtectOn => S::SfProtect,
        Request::Lockout => S::Lockout,
        Request::DoNotRevert | Request::ReverseRequest | Request::WaitToRestore => {
            error!(%state, %request, "far-end-only request reached local table");
            state
        }
    }
}

/// Decodes the far-end request from a received payload.
///
/// # Returns
/// The request and whether the payload referred to the null signal.
pub fn far_end_request(aps: &ApsInfo) -> (Request, bool) {
    let is_null = aps.is_null_signal();
    let request = match aps.request_code() {
        Ok(ApsRequestCode::Lockout) => Request::Lockout,
        Ok(ApsRequestCode::SfProtect) => Request::SfProtectOn,
        Ok(ApsRequestCode::ForcedSwitch) => Request::ForcedSwitch,
        Ok(ApsRequestCode::SfWorking) => Request::SfWorkingOn,
        // SD on the peer's protect leaves traffic on working (null signal).
        Ok(ApsRequestCode::SignalDegrade) if is_null => Request::SdProtectOn,
        Ok(ApsRequestCode::SignalDegrade) => Request::SdWorkingOn,
        Ok(ApsRequestCode::ManualSwitch) if is_null => Request::MsToWorking,
        Ok(ApsRequestCode::ManualSwitch) => Request::MsToProtect,
        Ok(ApsRequestCode::WaitToRestore) => Request::WaitToRestore,
        Ok(ApsRequestCode::Exercise) => Request::Exercise,
        Ok(ApsRequestCode::ReverseRequest) => Request::ReverseRequest,
        Ok(ApsRequestCode::DoNotRevert) => Request::DoNotRevert,
        Ok(ApsRequestCode::NoRequest) => Request::NoRequest,
        Err(e) => {
            error!(aps = ?aps.as_bytes(), "unsupported far-end request: {e}");
            Request::NoRequest
        }
    };
    (request, is_null)
}

/// State transition table for far-end requests (G.8031 Annex A, table A.2).
///
/// Manual-switch-to-protect observing a far-end manual-switch-to-working
/// stays put; this combination is not resolved further.
///
/// # Parameters
/// - `state`: State to transition from.
/// - `request`: Far-end request.
/// - `is_null`: Far-end payload referred to the null signal.
/// - `revertive`: Revertive operation.
/// - `coming_from_sf`: Latched simultaneous SF-W clear (G.8031 cl. 11.13).
///
/// # Returns
/// The next state.
pub fn far_end_transition(
    state: ProtectionState,
    request: Request,
    is_null: bool,
    revertive: bool,
    coming_from_sf: bool,
) -> ProtectionState {
    use ProtectionState as S;

    if state == S::Lockout {
        return S::Lockout;
    }
    if request == Request::Lockout {
        return S::NrWorking;
    }
    if state == S::SfProtect {
        return S::SfProtect;
    }
    if request == Request::SfProtectOn {
        return S::NrWorking;
    }
    if state == S::ForcedSwitch {
        return S::ForcedSwitch;
    }
    if request == Request::ForcedSwitch {
        return S::NrProtect;
    }
    if state == S::SfWorking {
        return S::SfWorking;
    }
    if request == Request::SfWorkingOn {
        return S::NrProtect;
    }
    if matches!(state, S::SdWorking | S::SdProtect) {
        return state;
    }
    match request {
        Request::SdWorkingOn => return S::NrProtect,
        Request::SdProtectOn => return S::NrWorking,
        _ => {}
    }
    if matches!(state, S::MsToProtect | S::MsToWorking) {
        return state;
    }
    match request {
        Request::MsToProtect => return S::NrProtect,
        Request::MsToWorking => return S::NrWorking,
        _ => {}
    }
    if state == S::WaitToRestore {
        return S::WaitToRestore;
    }
    if request == Request::WaitToRestore {
        return S::NrProtect;
    }
    if matches!(state, S::ExerciseWorking | S::ExerciseProtect) {
        return state;
    }

    match request {
        Request::Exercise => match state {
            S::NrWorking if is_null => S::ReverseRequestWorking,
            S::DoNotRevert if !is_null => S::ReverseRequestProtect,
            _ => state,
        },
        Request::ReverseRequest => match state {
            S::ReverseRequestWorking if is_null => S::NrWorking,
            S::ReverseRequestProtect if !is_null => S::DoNotRevert,
            _ => state,
        },
        Request::DoNotRevert => match state {
            S::NrWorking if revertive => S::NrProtect,
            S::NrWorking | S::NrProtect | S::ReverseRequestProtect if !revertive => S::DoNotRevert,
            _ => state,
        },
        Request::NoRequest => match state {
            S::NrProtect | S::ReverseRequestWorking if is_null => S::NrWorking,
            S::NrProtect if revertive && coming_from_sf => S::WaitToRestore,
            S::NrProtect if revertive => S::NrWorking,
            S::NrProtect => S::DoNotRevert,
            _ => state,
        },
        other => {
            error!(%state, request = %other, "unhandled far-end request");
            state
        }
    }
}

/// Global priority logic (G.8031 table 11-1): whether the local request
/// takes precedence over the far-end request.
///
/// Must not be called with a local pseudo-request; those always go through
/// the two-phase path.
pub fn local_wins(local: Request, far_end: Request) -> bool {
    match local {
        Request::NoRequest => false,
        Request::Exercise => far_end <= Request::Exercise,
        Request::MsToWorking | Request::MsToProtect => far_end <= Request::MsToProtect,
        Request::SdWorkingOn | Request::SdProtectOn => far_end <= Request::SdProtectOn,
        Request::SfWorkingOn => far_end <= Request::SfWorkingOn,
        Request::ForcedSwitch => far_end <= Request::ForcedSwitch,
        Request::SfProtectOn => far_end <= Request::SfProtectOn,
        Request::Lockout => true,
        other => {
            error!(local = %other, "invalid local request in priority comparison");
            true
        }
    }
}

/// Whether an outstanding command has been overridden by a strictly
/// higher-priority request (G.8031 cl. 11.11). Lockout is never overridden
/// and Clear is always consumed.
pub fn command_overridden(command: Command, local: Request, far_end: Request) -> bool {
    let beaten_by = |threshold: Request| local > threshold || far_end > threshold;
    match command {
        Command::NoRequest | Command::Lockout => false,
        Command::ForcedSwitch => beaten_by(Request::ForcedSwitch),
        Command::ManualSwitchToWorking | Command::ManualSwitchToProtect => {
            beaten_by(Request::MsToProtect)
        }
        Command::Exercise => beaten_by(Request::Exercise),
        Command::Clear => true,
        Command::Freeze | Command::FreezeClear => false,
    }
}

/// Runs one complete evaluation.
///
/// The caller handles Freeze (no evaluation at all) and the revertive
/// DNR/WTR normalisation before calling.
///
/// # Parameters
/// - `inputs`: Snapshot of everything the state machine reads.
///
/// # Returns
/// The requests considered, the new state and the side effects to apply.
pub fn evaluate(inputs: &EvaluationInputs) -> Evaluation {
    let (far_end, far_end_null) = match &inputs.far_end {
        Some(aps) => far_end_request(aps),
        None => (Request::NoRequest, false),
    };
    let ignore_far_end = inputs.far_end.is_none();
    let local = local_request(inputs);

    let run_local = |from: ProtectionState| {
        local_transition(from, local, inputs.w_state, inputs.p_state, inputs.revertive)
    };
    let run_far_end = |from: ProtectionState| {
        far_end_transition(
            from,
            far_end,
            far_end_null,
            inputs.revertive,
            inputs.coming_from_sf,
        )
    };

    let state = if local.is_recovery() {
        let intermediate = run_local(inputs.state);
        if ignore_far_end || local == Request::SfProtectOff {
            intermediate
        } else {
            run_far_end(intermediate)
        }
    } else if ignore_far_end || local_wins(local, far_end) {
        run_local(inputs.state)
    } else {
        run_far_end(inputs.state)
    };

    Evaluation {
        local,
        far_end,
        far_end_null,
        state,
        clear_command: command_overridden(inputs.command, local, far_end),
        coming_from_sf: inputs.revertive
            && inputs.state == ProtectionState::SfWorking
            && state == ProtectionState::NrProtect,
    }
}

/// Hardware selector position for a protection state.
pub const fn selector_for(state: ProtectionState) -> Selector {
    use ProtectionState as S;

    match state {
        S::NrWorking
        | S::Lockout
        | S::SfProtect
        | S::MsToWorking
        | S::ExerciseWorking
        | S::ReverseRequestWorking
        | S::SdProtect => Selector::Working,
        S::NrProtect
        | S::ForcedSwitch
        | S::SfWorking
        | S::MsToProtect
        | S::WaitToRestore
        | S::ExerciseProtect
        | S::ReverseRequestProtect
        | S::DoNotRevert
        | S::SdWorking => Selector::Protect,
    }
}

/// Outgoing APS-specific information for a protection state.
///
/// # Parameters
/// - `state`: Current protection state.
/// - `mode`: Protection architecture (B/D bits, 1+1 bridging).
/// - `revertive`: R bit.
/// - `tx_enabled`: A bit.
pub fn tx_aps_info(state: ProtectionState, mode: Mode, revertive: bool, tx_enabled: bool) -> ApsInfo {
    use ProtectionState as S;

    let mut flags = 0;
    if tx_enabled {
        flags |= APS_FLAG_A;
    }
    if !mode.is_one_plus_one() {
        flags |= APS_FLAG_B;
    }
    if !mode.is_unidirectional() {
        flags |= APS_FLAG_D;
    }
    if revertive {
        flags |= APS_FLAG_R;
    }

    // In 1+1 the normal traffic is permanently bridged.
    let bridged_null = u8::from(mode.is_one_plus_one());
    let (code, requested, bridged) = match state {
        S::NrWorking => (ApsRequestCode::NoRequest, 0, bridged_null),
        S::NrProtect => (ApsRequestCode::NoRequest, 1, 1),
        S::Lockout => (ApsRequestCode::Lockout, 0, bridged_null),
        S::ForcedSwitch => (ApsRequestCode::ForcedSwitch, 1, 1),
        S::SfWorking => (ApsRequestCode::SfWorking, 1, 1),
        S::SfProtect => (ApsRequestCode::SfProtect, 0, bridged_null),
        S::MsToProtect => (ApsRequestCode::ManualSwitch, 1, 1),
        S::MsToWorking => (ApsRequestCode::ManualSwitch, 0, bridged_null),
        S::WaitToRestore => (ApsRequestCode::WaitToRestore, 1, 1),
        S::ExerciseWorking => (ApsRequestCode::Exercise, 0, bridged_null),
        S::ExerciseProtect => (ApsRequestCode::Exercise, 1, 1),
        S::ReverseRequestWorking => (ApsRequestCode::ReverseRequest, 0, bridged_null),
        S::ReverseRequestProtect => (ApsRequestCode::ReverseRequest, 1, 1),
        S::DoNotRevert => (ApsRequestCode::DoNotRevert, 1, 1),
        S::SdWorking => (ApsRequestCode::SignalDegrade, 1, 1),
        S::SdProtect => (ApsRequestCode::SignalDegrade, 0, bridged_null),
    };
    ApsInfo::new(code, flags, requested, bridged)
}
