//! One protected working/protect pair.
//!
//! [`Instance`] owns the live protocol state of an activated pair and
//! implements every procedure that touches it: defect handling with
//! hold-off, operator commands, PDU reception and transmission, timer
//! expiries and the state machine run. The engine owns the shared resources
//! and lends them through [`InstanceContext`] for the duration of one call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::InstanceConfig;
use crate::constants::{DFOP_NR_DEBOUNCE, RX_TIMEOUT, TX_BURST_COUNT, TX_PERIOD};
use crate::error::{ApsError, PduBuildingError};
use crate::history::{HistoryEntry, HistoryRing};
use crate::protocol_types::{
    ApsInfo, ApsInfoView, Command, DefectState, Mode, PortRole, ProtectionState, Selector,
};
use crate::serialization::{LapsFrameParams, build_laps_frame, parse_laps_frame};
use crate::state_machine::{EvaluationInputs, evaluate, selector_for, tx_aps_info};
use crate::timer::{TimerKey, TimerKind, TimerQueue};
use crate::traits::{ApsPlatform, MatchRule};
use crate::transport::{LapsTransmitter, Statistics, TxAction};
use crate::types::{InstanceId, MacAddr, PortNo, VlanId};

/// Operational state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperState {
    /// Not activated, or activation rolled back.
    #[default]
    Inactive,
    /// Protocol running.
    Active,
}

/// Read-only snapshot of an instance for management layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstanceStatus {
    pub oper_state: OperState,
    pub state: ProtectionState,
    /// Post-hold-off working condition.
    pub w_state: DefectState,
    /// Post-hold-off protect condition.
    pub p_state: DefectState,
    /// Transmitted APS-specific information.
    pub tx_aps: ApsInfoView,
    /// Last valid received APS-specific information.
    pub rx_aps: ApsInfoView,
    /// Configuration mismatch: PDUs seen on the working port.
    pub dfop_cm: bool,
    /// Provisioning mismatch: peer A/B/D bits disagree with local mode.
    pub dfop_pm: bool,
    /// No response: requested signal mismatch for longer than 50 ms.
    pub dfop_nr: bool,
    /// Time-out: no valid PDU on the protect port for 17.5 s.
    pub dfop_to: bool,
    /// SMAC of the last valid PDU.
    pub peer_smac: MacAddr,
    /// Outstanding operator command.
    pub command: Command,
    /// Current traffic selector position.
    pub selector: Selector,
}

/// Engine-owned resources lent to an instance for one operation.
pub(crate) struct InstanceContext<'a> {
    pub(crate) timers: &'a mut TimerQueue,
    pub(crate) platform: &'a dyn ApsPlatform,
    pub(crate) links: &'a HashMap<PortNo, bool>,
    pub(crate) now: Instant,
    pub(crate) uptime_ms: u64,
}

impl InstanceContext<'_> {
    /// Last known link state of `port`. Ports never reported through
    /// `port_link_changed` are looked up on the platform.
    pub(crate) fn link_up(&self, port: PortNo) -> bool {
        match self.links.get(&port) {
            Some(&up) => up,
            None => self
                .platform
                .port_info(port)
                .is_some_and(|info| info.link_up),
        }
    }
}

/// Live state of one protection instance.
#[derive(Debug)]
pub(crate) struct Instance {
    id: InstanceId,
    config: InstanceConfig,
    oper_state: OperState,

    sf_w: bool,
    sd_w: bool,
    sf_p: bool,
    sd_p: bool,
    w_state: DefectState,
    p_state: DefectState,

    command: Command,
    state: ProtectionState,
    wtr_expired: bool,
    coming_from_sf: bool,

    dfop_cm: bool,
    dfop_pm: bool,
    dfop_nr: bool,
    dfop_to: bool,

    tx_aps: ApsInfo,
    rx_aps: ApsInfo,
    peer_smac: MacAddr,
    selector: Selector,
    match_rule: Option<MatchRule>,

    transmitter: LapsTransmitter,
    stats: Statistics,
    history: HistoryRing,
}

impl Instance {
    /// Creates an inactive instance.
    pub(crate) fn new(id: InstanceId, config: InstanceConfig) -> Self {
        Self {
            id,
            config,
            oper_state: OperState::Inactive,
            sf_w: false,
            sd_w: false,
            sf_p: false,
            sd_p: false,
            w_state: DefectState::Ok,
            p_state: DefectState::Ok,
            command: Command::NoRequest,
            state: ProtectionState::NrWorking,
            wtr_expired: false,
            coming_from_sf: false,
            dfop_cm: false,
            dfop_pm: false,
            dfop_nr: false,
            dfop_to: false,
            tx_aps: ApsInfo::default(),
            rx_aps: ApsInfo::default(),
            peer_smac: MacAddr::ZERO,
            selector: Selector::Working,
            match_rule: None,
            transmitter: LapsTransmitter::new(),
            stats: Statistics::default(),
            history: HistoryRing::new(),
        }
    }

    pub(crate) fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub(crate) fn is_active(&self) -> bool {
        self.oper_state == OperState::Active
    }

    /// Raw (pre-hold-off) signal-fail inputs, working then protect.
    pub(crate) fn signal_fail_inputs(&self) -> (bool, bool) {
        (self.sf_w, self.sf_p)
    }

    /// Raw signal-degrade input of one port.
    pub(crate) fn signal_degrade_input(&self, role: PortRole) -> bool {
        match role {
            PortRole::Working => self.sd_w,
            PortRole::Protect => self.sd_p,
        }
    }

    /// Replaces the configuration of an inactive instance.
    pub(crate) fn set_config(&mut self, config: InstanceConfig) {
        debug_assert!(!self.is_active(), "reconfiguring active instance {}", self.id);
        self.config = config;
    }

    fn key(&self, kind: TimerKind) -> TimerKey {
        TimerKey::new(self.id, kind)
    }

    fn wtr_period(&self) -> Duration {
        Duration::from_secs(u64::from(self.config.wtr_secs))
    }

    /// Classified VID of PDUs arriving on `role`.
    pub(crate) fn classified_vid(&self, platform: &dyn ApsPlatform, role: PortRole) -> VlanId {
        if self.config.vlan.is_untagged() {
            platform
                .port_info(self.config.port(role))
                .map_or(VlanId::new(0), |info| info.pvid)
        } else {
            self.config.vlan
        }
    }

    // ---- Lifecycle ----

    /// Brings the instance up. On failure everything done so far is undone
    /// and the instance is left inactive.
    ///
    /// # Errors
    /// - [`ApsError::Platform`] - Hardware configuration failed
    /// - [`ApsError::Building`] - The initial PDU could not be generated
    pub(crate) fn activate(
        &mut self,
        ctx: &mut InstanceContext<'_>,
        initial_sf_w: bool,
        initial_sf_p: bool,
    ) -> Result<(), ApsError> {
        match self.do_activate(ctx, initial_sf_w, initial_sf_p) {
            Ok(()) => {
                info!(instance = %self.id, mode = ?self.config.mode, revertive = self.config.revertive, state = %self.state, "activated");
                Ok(())
            }
            Err(e) => {
                warn!(instance = %self.id, "activation failed, rolling back: {e}");
                if let Err(rollback) = self.do_deactivate(ctx) {
                    warn!(instance = %self.id, "rollback incomplete: {rollback}");
                }
                Err(e)
            }
        }
    }

    fn do_activate(
        &mut self,
        ctx: &mut InstanceContext<'_>,
        initial_sf_w: bool,
        initial_sf_p: bool,
    ) -> Result<(), ApsError> {
        self.oper_state = OperState::Active;
        ctx.platform.configure_protection(
            self.config.working.port,
            self.config.protect.port,
            self.config.mode,
        )?;
        self.set_selector(ctx, Selector::Working);
        self.state_clear(ctx);

        // No PDU received yet; one is only expected in bidirectional modes.
        self.dfop_to = !self.config.mode.is_unidirectional();

        self.update_match_rule(ctx)?;
        self.tx_frame_update(ctx, false)?;

        self.set_signal_fail_degrade(ctx, PortRole::Working, initial_sf_w, false);
        self.set_signal_fail_degrade(ctx, PortRole::Protect, initial_sf_p, false);

        // Neither SF input may have changed anything, so run once regardless.
        self.run_state_machine(ctx);
        Ok(())
    }

    /// Takes the instance down: selector back to working, hardware released,
    /// a final NR-W burst flushed, capture rule removed, all timers stopped.
    ///
    /// Every step is attempted; the first failure is returned.
    ///
    /// # Errors
    /// - [`ApsError::Platform`] - A hardware call failed
    pub(crate) fn deactivate(&mut self, ctx: &mut InstanceContext<'_>) -> Result<(), ApsError> {
        let result = self.do_deactivate(ctx);
        info!(instance = %self.id, "deactivated");
        result
    }

    fn do_deactivate(&mut self, ctx: &mut InstanceContext<'_>) -> Result<(), ApsError> {
        let mut first_error: Option<ApsError> = None;

        self.set_selector(ctx, Selector::Working);

        if let Err(e) = ctx.platform.release_protection(self.config.working.port) {
            warn!(instance = %self.id, "{e}");
            first_error.get_or_insert(e.into());
        }

        self.tx_info_update(ctx, ProtectionState::NrWorking, true);

        if let Err(e) = self.remove_match_rule(ctx) {
            warn!(instance = %self.id, "{e}");
            first_error.get_or_insert(e);
        }

        self.state_clear(ctx);
        self.oper_state = OperState::Inactive;

        first_error.map_or(Ok(()), Err)
    }

    /// Resets protocol state to its baseline and stops every timer.
    fn state_clear(&mut self, ctx: &mut InstanceContext<'_>) {
        self.command = Command::NoRequest;
        self.sf_w = false;
        self.sd_w = false;
        self.sf_p = false;
        self.sd_p = false;
        self.w_state = DefectState::Ok;
        self.p_state = DefectState::Ok;
        self.state = ProtectionState::NrWorking;
        self.wtr_expired = false;
        self.coming_from_sf = false;
        self.dfop_cm = false;
        self.dfop_pm = false;
        self.dfop_nr = false;
        self.dfop_to = false;
        self.tx_aps = ApsInfo::default();
        self.rx_aps = ApsInfo::default();
        self.peer_smac = MacAddr::ZERO;

        ctx.timers.cancel_instance(self.id);
        self.transmitter.cancel();
        self.stats = Statistics::default();
        self.history.clear();
    }

    // ---- Hardware ----

    fn set_selector(&mut self, ctx: &mut InstanceContext<'_>, selector: Selector) {
        if let Err(e) = ctx
            .platform
            .set_selector(self.id, self.config.working.port, selector)
        {
            warn!(instance = %self.id, ?selector, "{e}");
        }
        self.selector = selector;
    }

    /// Installs the PDU capture rule, or refreshes it if its classified VID
    /// or level changed.
    ///
    /// # Errors
    /// - [`ApsError::Platform`] - The rule could not be installed
    pub(crate) fn update_match_rule(&mut self, ctx: &mut InstanceContext<'_>) -> Result<(), ApsError> {
        let rule = MatchRule {
            ports: [self.config.working.port, self.config.protect.port],
            vid: self.classified_vid(ctx.platform, PortRole::Protect),
            level: self.config.level,
        };
        if self.match_rule == Some(rule) {
            debug!(instance = %self.id, "match rule unchanged");
            return Ok(());
        }
        ctx.platform.install_match_rule(self.id, &rule)?;
        self.match_rule = Some(rule);
        Ok(())
    }

    fn remove_match_rule(&mut self, ctx: &mut InstanceContext<'_>) -> Result<(), ApsError> {
        if self.match_rule.take().is_some() {
            ctx.platform.remove_match_rule(self.id)?;
        }
        Ok(())
    }

    // ---- Transmission ----

    /// Regenerates the outgoing frame after a header field (SMAC, TPID,
    /// level, VLAN, PCP) may have changed.
    ///
    /// # Errors
    /// - [`ApsError::Building`] - Protect port unknown or parameters invalid
    pub(crate) fn tx_frame_update(
        &mut self,
        ctx: &mut InstanceContext<'_>,
        transmit_now: bool,
    ) -> Result<(), ApsError> {
        if !self.config.tx_laps_pdus() {
            self.tx_cancel(ctx);
            return Ok(());
        }

        let protect = self.config.protect.port;
        let port = ctx
            .platform
            .port_info(protect)
            .ok_or(PduBuildingError::ProtectPortUnavailable(protect))?;
        let smac = if self.config.smac.is_zero() {
            port.mac
        } else {
            self.config.smac
        };
        let frame = build_laps_frame(&LapsFrameParams {
            smac,
            level: self.config.level,
            vlan: self.config.vlan,
            pcp: self.config.pcp,
            tpid: port.tpid,
            aps: self.tx_aps,
        })?;

        if !self.transmitter.replace_frame(frame) {
            debug!(instance = %self.id, "L-APS PDU unchanged");
            return Ok(());
        }
        debug!(instance = %self.id, %smac, tpid = port.tpid, "new L-APS PDU");
        ctx.timers.stop(self.key(TimerKind::Tx));
        if transmit_now {
            self.tx_burst(ctx);
        }
        Ok(())
    }

    /// Writes the payload for `state` into the frame and bursts if needed.
    fn tx_info_update(
        &mut self,
        ctx: &mut InstanceContext<'_>,
        state: ProtectionState,
        shutdown: bool,
    ) {
        self.tx_aps = tx_aps_info(
            state,
            self.config.mode,
            self.config.revertive,
            self.config.tx_laps_pdus(),
        );
        if self.transmitter.update_aps(&self.tx_aps, shutdown) == TxAction::Burst {
            self.tx_burst(ctx);
        }
        if shutdown {
            self.tx_cancel(ctx);
        }
    }

    fn tx_burst(&mut self, ctx: &mut InstanceContext<'_>) {
        for _ in 0..TX_BURST_COUNT {
            self.tx_once(ctx);
        }
        self.transmitter.mark_transmitted();
        ctx.timers
            .start(self.key(TimerKind::Tx), TX_PERIOD, true, ctx.now);
    }

    fn tx_once(&mut self, ctx: &mut InstanceContext<'_>) {
        let protect = self.config.protect.port;
        let Some(bytes) = self.transmitter.frame_bytes() else {
            return;
        };
        if !ctx.link_up(protect) {
            debug!(instance = %self.id, "protect link down, L-APS PDU not sent");
            return;
        }
        if let Err(e) = ctx.platform.transmit(protect, bytes) {
            warn!(instance = %self.id, "{e}");
        }
        self.stats.tx_count += 1;
    }

    fn tx_cancel(&mut self, ctx: &mut InstanceContext<'_>) {
        ctx.timers.stop(self.key(TimerKind::Tx));
        self.transmitter.cancel();
    }

    // ---- Inputs ----

    /// Feeds new raw SF/SD values for one port through hold-off.
    pub(crate) fn set_signal_fail_degrade(
        &mut self,
        ctx: &mut InstanceContext<'_>,
        role: PortRole,
        sf: bool,
        sd: bool,
    ) {
        if role == PortRole::Protect {
            self.supervise_protect_rx(ctx, sf || sd);
        }

        let (old_sf, old_sd, old_state, hold_off_key) = match role {
            PortRole::Working => (
                self.sf_w,
                self.sd_w,
                self.w_state,
                self.key(TimerKind::HoldOffWorking),
            ),
            PortRole::Protect => (
                self.sf_p,
                self.sd_p,
                self.p_state,
                self.key(TimerKind::HoldOffProtect),
            ),
        };
        if sf == old_sf && sd == old_sd {
            return;
        }
        match role {
            PortRole::Working => (self.sf_w, self.sd_w) = (sf, sd),
            PortRole::Protect => (self.sf_p, self.sd_p) = (sf, sd),
        }

        let new_state = DefectState::from_flags(sf, sd);
        let hold_off = self.config.hold_off_msecs;
        debug!(instance = %self.id, port = %role, sf, sd, %hold_off, "signal condition change");

        if new_state > old_state && hold_off != 0 {
            ctx.timers.start(
                hold_off_key,
                Duration::from_millis(u64::from(hold_off)),
                false,
                ctx.now,
            );
            return;
        }

        // Improvements (and worsening without hold-off) apply at once.
        ctx.timers.stop(hold_off_key);
        match role {
            PortRole::Working => self.w_state = new_state,
            PortRole::Protect => self.p_state = new_state,
        }
        self.run_state_machine(ctx);
    }

    /// A protect port in SF or SD cannot time out; otherwise make sure
    /// reception is being supervised.
    fn supervise_protect_rx(&mut self, ctx: &mut InstanceContext<'_>, defect: bool) {
        let key = self.key(TimerKind::RxProtect);
        if defect {
            ctx.timers.stop(key);
        } else if !ctx.timers.is_active(key) {
            ctx.timers.start(key, RX_TIMEOUT, false, ctx.now);
        }
    }

    /// Applies an operator command.
    ///
    /// # Errors
    /// - [`ApsError::CommandWhileFrozen`] - Frozen and not FREEZE-CLEAR
    /// - [`ApsError::ExerciseUnidirectional`] - Exercise in 1+1 unidirectional
    pub(crate) fn set_command(
        &mut self,
        ctx: &mut InstanceContext<'_>,
        command: Command,
    ) -> Result<(), ApsError> {
        if self.command == Command::Freeze && command != Command::FreezeClear {
            return Err(ApsError::CommandWhileFrozen);
        }
        if command == Command::Exercise && self.config.mode.is_unidirectional() {
            return Err(ApsError::ExerciseUnidirectional);
        }
        if command == self.command {
            return Ok(());
        }

        info!(instance = %self.id, from = %self.command, to = %command, "command");

        // Leaving one command-driven state for another goes through Clear.
        if self.command.is_sticky() && command != Command::Clear {
            self.command = Command::Clear;
            self.run_state_machine(ctx);
        }

        self.command = if command == Command::FreezeClear {
            Command::NoRequest
        } else {
            command
        };
        self.run_state_machine(ctx);
        Ok(())
    }

    /// Handles an L-APS frame received on one of the instance's ports.
    pub(crate) fn rx_frame(&mut self, ctx: &mut InstanceContext<'_>, role: PortRole, frame: &[u8]) {
        if role == PortRole::Working {
            // Never validated; its mere presence is the defect.
            ctx.timers
                .start(self.key(TimerKind::RxWorking), RX_TIMEOUT, false, ctx.now);
            if !self.dfop_cm {
                info!(instance = %self.id, "L-APS PDU on working port, dFOP-CM raised");
            }
            self.dfop_cm = true;
            return;
        }

        let pdu = match parse_laps_frame(frame, self.config.level) {
            Ok(pdu) => pdu,
            Err(e) => {
                self.stats.rx_invalid_count += 1;
                debug!(instance = %self.id, "dropping L-APS PDU: {e}");
                return;
            }
        };

        if !self.sf_p {
            ctx.timers
                .start(self.key(TimerKind::RxProtect), RX_TIMEOUT, false, ctx.now);
        }
        self.stats.rx_valid_count += 1;
        self.peer_smac = pdu.smac;
        self.dfop_to = false;

        let mismatch = !self.config.mode.is_unidirectional()
            && provisioning_mismatch(&pdu.aps, self.config.mode);
        if mismatch && !self.dfop_pm {
            warn!(instance = %self.id, aps = ?pdu.aps.as_bytes(), "provisioning mismatch with peer");
        }
        self.dfop_pm = mismatch;

        self.rx_aps = pdu.aps;
        self.dfop_nr_update(ctx);
        self.run_state_machine(ctx);
    }

    /// Dispatches an expired timer of this instance.
    pub(crate) fn on_timer(&mut self, ctx: &mut InstanceContext<'_>, kind: TimerKind) {
        match kind {
            TimerKind::Wtr => {
                self.wtr_expired = true;
                self.run_state_machine(ctx);
            }
            TimerKind::HoldOffWorking => self.hold_off_expired(ctx, PortRole::Working),
            TimerKind::HoldOffProtect => self.hold_off_expired(ctx, PortRole::Protect),
            TimerKind::DfopNr => {
                info!(instance = %self.id, "dFOP-NR raised");
                self.dfop_nr = true;
            }
            TimerKind::RxWorking => {
                info!(instance = %self.id, "dFOP-CM cleared");
                self.dfop_cm = false;
            }
            TimerKind::RxProtect => {
                if !self.config.mode.is_unidirectional() {
                    info!(instance = %self.id, "no L-APS PDU on protect port, dFOP-TO raised");
                    self.dfop_to = true;
                }
            }
            TimerKind::Tx => self.tx_once(ctx),
        }
    }

    /// Promotes a still-worse defect once its hold-off has elapsed.
    fn hold_off_expired(&mut self, ctx: &mut InstanceContext<'_>, role: PortRole) {
        let (current, old_state) = match role {
            PortRole::Working => (DefectState::from_flags(self.sf_w, self.sd_w), self.w_state),
            PortRole::Protect => (DefectState::from_flags(self.sf_p, self.sd_p), self.p_state),
        };
        if current <= old_state {
            return;
        }
        match role {
            PortRole::Working => self.w_state = current,
            PortRole::Protect => self.p_state = current,
        }
        self.run_state_machine(ctx);
    }

    fn dfop_nr_update(&mut self, ctx: &mut InstanceContext<'_>) {
        if self.dfop_pm || self.dfop_to || self.config.mode.is_unidirectional() {
            return;
        }
        let key = self.key(TimerKind::DfopNr);
        if self.tx_aps.requested_signal() != self.rx_aps.requested_signal() {
            if !ctx.timers.is_active(key) && !self.dfop_nr {
                ctx.timers.start(key, DFOP_NR_DEBOUNCE, false, ctx.now);
            }
        } else {
            if self.dfop_nr {
                info!(instance = %self.id, "dFOP-NR cleared");
            }
            self.dfop_nr = false;
            ctx.timers.stop(key);
        }
    }

    // ---- State machine ----

    /// Re-evaluates the protection state and applies the outcome to the
    /// WTR timer, history, selector and outgoing PDU.
    pub(crate) fn run_state_machine(&mut self, ctx: &mut InstanceContext<'_>) {
        if self.command == Command::Freeze {
            debug!(instance = %self.id, "frozen, state machine not run");
            return;
        }

        let wtr_key = self.key(TimerKind::Wtr);

        // Revertiveness may have changed under a settled DNR or WTR.
        if self.config.revertive {
            if self.state == ProtectionState::DoNotRevert {
                self.state = ProtectionState::WaitToRestore;
                ctx.timers.start(wtr_key, self.wtr_period(), false, ctx.now);
            }
        } else if self.state == ProtectionState::WaitToRestore {
            self.state = ProtectionState::DoNotRevert;
            ctx.timers.stop(wtr_key);
        }

        if self.dfop_pm {
            self.set_selector(ctx, Selector::Working);
        }

        let ignore_far_end =
            self.dfop_to || self.dfop_pm || self.config.mode.is_unidirectional();
        let old_state = self.state;
        let eval = evaluate(&EvaluationInputs {
            state: old_state,
            command: self.command,
            w_state: self.w_state,
            p_state: self.p_state,
            mode: self.config.mode,
            revertive: self.config.revertive,
            wtr_expired: self.wtr_expired,
            far_end: (!ignore_far_end).then_some(self.rx_aps),
            coming_from_sf: self.coming_from_sf,
        });
        let new_state = eval.state;
        self.state = new_state;

        if eval.clear_command {
            debug!(instance = %self.id, command = %self.command, "command cleared");
            self.command = Command::NoRequest;
        }
        self.coming_from_sf = eval.coming_from_sf;

        if old_state != new_state && new_state == ProtectionState::WaitToRestore {
            ctx.timers.start(wtr_key, self.wtr_period(), false, ctx.now);
        }
        if new_state != ProtectionState::WaitToRestore {
            ctx.timers.stop(wtr_key);
            self.wtr_expired = false;
        }

        if old_state != new_state {
            info!(
                instance = %self.id,
                local = %eval.local,
                far_end = %eval.far_end,
                far_end_null = eval.far_end_null,
                "protection state {old_state} -> {new_state}"
            );
        } else {
            debug!(instance = %self.id, local = %eval.local, far_end = %eval.far_end, state = %new_state, "state machine run");
        }

        self.history.record(HistoryEntry {
            time_ms: ctx.uptime_ms,
            local: eval.local,
            far_end: eval.far_end,
            state: new_state,
        });

        self.set_selector(ctx, selector_for(new_state));

        if self.config.tx_laps_pdus() {
            self.tx_info_update(ctx, new_state, false);
            self.dfop_nr_update(ctx);
        }
    }

    // ---- Reporting ----

    pub(crate) fn status(&self) -> InstanceStatus {
        InstanceStatus {
            oper_state: self.oper_state,
            state: self.state,
            w_state: self.w_state,
            p_state: self.p_state,
            tx_aps: ApsInfoView::from(&self.tx_aps),
            rx_aps: ApsInfoView::from(&self.rx_aps),
            dfop_cm: self.dfop_cm,
            dfop_pm: self.dfop_pm,
            dfop_nr: self.dfop_nr,
            dfop_to: self.dfop_to,
            peer_smac: self.peer_smac,
            command: self.command,
            selector: self.selector,
        }
    }

    pub(crate) fn statistics(&self) -> Statistics {
        self.stats
    }

    pub(crate) fn clear_statistics(&mut self) {
        self.stats = Statistics::default();
    }

    pub(crate) fn history(&self) -> &HistoryRing {
        &self.history
    }

    pub(crate) fn id(&self) -> InstanceId {
        self.id
    }
}

/// A/B/D bits of a received payload that disagree with the local mode.
///
/// Only meaningful in bidirectional modes, where the peer must run the
/// protocol (A), bidirectionally (D), in the same architecture (B).
fn provisioning_mismatch(aps: &ApsInfo, mode: Mode) -> bool {
    !aps.a_bit() || aps.b_bit() != (mode == Mode::OneForOne) || !aps.d_bit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_types::ApsRequestCode;

    #[test]
    fn provisioning_mismatch_checks_abd() {
        let flags_1_1 = 0x0E; // A B D
        let ok = ApsInfo::new(ApsRequestCode::NoRequest, flags_1_1, 0, 0);
        assert!(!provisioning_mismatch(&ok, Mode::OneForOne));
        assert!(provisioning_mismatch(&ok, Mode::OnePlusOneBidirectional));

        let no_a = ApsInfo::new(ApsRequestCode::NoRequest, 0x06, 0, 0);
        assert!(provisioning_mismatch(&no_a, Mode::OneForOne));

        let bidir = ApsInfo::new(ApsRequestCode::NoRequest, 0x0A, 0, 1);
        assert!(!provisioning_mismatch(&bidir, Mode::OnePlusOneBidirectional));
    }
}
