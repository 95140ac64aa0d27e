//! Core library for the linaps deterministic simulator.
//!
//! Two protection engines run back to back on a shared mock clock. Their
//! protect ports are joined by a simulated link that can drop PDUs, and a
//! seeded event generator drives defects, operator commands, link flaps and
//! the passage of time. After every event the simulator checks the
//! invariants that must hold at each end regardless of what the other end
//! does; once the events run out it lets the span settle and checks that
//! both ends select the same path.

pub mod error_analyzer;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use linaps::protocol_types::ApsInfoView;
use linaps::state_machine::{selector_for, tx_aps_info};
use linaps::testing::RecordingPlatform;
use linaps::{
    ApsEngine, ApsError, Command, InstanceConfig, InstanceId, InstanceStatus, MegLevel, MockClock,
    Mode, PortConfig, PortNo, PortRole, ProtectionState, Selector, SfTrigger, TimerKind, VlanId,
};
use rand::prelude::*;
use rand::rngs::StdRng;

/// Working port at both ends.
pub const WORKING_PORT: PortNo = PortNo(1);
/// Protect port at both ends; the simulated link joins the two.
pub const PROTECT_PORT: PortNo = PortNo(2);
/// The single instance simulated at each end.
pub const INSTANCE: InstanceId = InstanceId(1);

/// PVID of the recording platform's ports; untagged PDUs classify to it.
const CLASSIFIED_VID: VlanId = VlanId(1);
const SIM_LEVEL: MegLevel = MegLevel(4);
/// Longest clock step between timer runs.
const MAX_TIME_STEP: Duration = Duration::from_millis(100);
/// PDU exchanges per delivery before giving up on quiescence.
const MAX_DELIVERY_ROUNDS: usize = 32;

/// Configuration for a simulation scenario.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub seed: u64,
    pub num_events: usize,
    pub mode: Mode,
    pub revertive: bool,
    pub wtr_secs: u16,
    pub hold_off_msecs: u16,
    pub pdu_loss_probability: f64,
    /// Share of events that are operator commands.
    pub command_probability: f64,
    /// Require both ends to agree on the selector once the run has settled.
    pub check_agreement: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            num_events: 100,
            mode: Mode::OneForOne,
            revertive: true,
            wtr_secs: 10,
            hold_off_msecs: 0,
            pdu_loss_probability: 0.0,
            command_probability: 0.2,
            check_agreement: true,
        }
    }
}

impl SimConfig {
    /// Instance configuration used at both ends.
    pub fn instance_config(&self) -> InstanceConfig {
        InstanceConfig {
            working: PortConfig {
                port: WORKING_PORT,
                ..Default::default()
            },
            // SF on the protect port combines the link with the MEP view
            // the simulator reports.
            protect: PortConfig {
                port: PROTECT_PORT,
                sf_trigger: SfTrigger::Mep,
            },
            level: SIM_LEVEL,
            mode: self.mode,
            revertive: self.revertive,
            wtr_secs: self.wtr_secs,
            hold_off_msecs: self.hold_off_msecs,
            ..Default::default()
        }
    }
}

/// One end of the simulated span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

impl Side {
    /// Both ends, A first.
    pub const BOTH: [Side; 2] = [Side::A, Side::B];

    fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }

    /// The other end.
    pub fn peer(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::A => "A",
            Side::B => "B",
        })
    }
}

/// A stimulus applied to the span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    /// New raw SF/SD condition of one port at one end.
    Defect {
        side: Side,
        role: PortRole,
        sf: bool,
        sd: bool,
    },
    /// Operator command at one end.
    Command { side: Side, command: Command },
    /// The protect link goes down or comes back, seen by both ends.
    ProtectLink { up: bool },
    /// Let time pass.
    Wait(Duration),
}

const SIM_COMMANDS: [Command; 9] = [
    Command::Lockout,
    Command::ForcedSwitch,
    Command::ManualSwitchToWorking,
    Command::ManualSwitchToProtect,
    Command::Exercise,
    Command::Clear,
    Command::Clear,
    Command::Freeze,
    Command::FreezeClear,
];

/// Generates a deterministic stream of events from the configured seed.
pub struct EventGenerator {
    rng: StdRng,
    config: SimConfig,
    generated: usize,
}

impl EventGenerator {
    /// Creates a generator seeded from `config.seed`.
    pub fn new(config: &SimConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config: config.clone(),
            generated: 0,
        }
    }

    /// Produces the next event.
    ///
    /// # Returns
    /// The next event, or `None` once `num_events` have been generated.
    pub fn next_event(&mut self) -> Option<SimEvent> {
        if self.generated >= self.config.num_events {
            return None;
        }
        self.generated += 1;

        let side = if self.rng.random_bool(0.5) {
            Side::A
        } else {
            Side::B
        };
        if self.rng.random_bool(self.config.command_probability) {
            let command = SIM_COMMANDS[self.rng.random_range(0..SIM_COMMANDS.len())];
            return Some(SimEvent::Command { side, command });
        }

        let event = match self.rng.random_range(0..10) {
            0..=3 => SimEvent::Wait(Duration::from_millis(self.rng.random_range(10..=6000))),
            4..=7 => {
                let role = if self.rng.random_bool(0.3) {
                    PortRole::Protect
                } else {
                    PortRole::Working
                };
                let (sf, sd) = match self.rng.random_range(0..3) {
                    0 => (false, false),
                    1 => (false, true),
                    _ => (true, false),
                };
                SimEvent::Defect { side, role, sf, sd }
            }
            8 => SimEvent::ProtectLink {
                up: self.rng.random_bool(0.6),
            },
            // Long enough for WTR, hold-off and receive timeouts to play out.
            _ => SimEvent::Wait(Duration::from_secs(self.rng.random_range(5..=30))),
        };
        Some(event)
    }
}

/// Represents the simulated protect link.
pub struct SimulatedChannel {
    rng: StdRng,
    loss_probability: f64,
}

impl SimulatedChannel {
    /// Creates a new simulated link with PDU loss.
    ///
    /// # Parameters
    /// - `seed`: Random seed for reproducible loss patterns
    /// - `loss_probability`: Probability of losing a PDU (0.0 to 1.0)
    pub fn new(seed: u64, loss_probability: f64) -> Self {
        debug_assert!((0.0..=1.0).contains(&loss_probability));
        Self {
            rng: StdRng::seed_from_u64(seed),
            loss_probability,
        }
    }

    /// Carries one PDU across the link.
    ///
    /// # Returns
    /// The frame if it arrives, `None` if it is lost.
    pub fn transmit(&mut self, frame: Vec<u8>) -> Option<Vec<u8>> {
        debug_assert!(!frame.is_empty());
        if self.loss_probability > 0.0 && self.rng.random_bool(self.loss_probability) {
            return None;
        }
        Some(frame)
    }
}

/// Counters gathered over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimReport {
    pub events: usize,
    pub frames_delivered: u64,
    pub frames_lost: u64,
    /// Commands the engine refused (frozen, or Exercise in unidirectional mode).
    pub rejected_commands: usize,
    /// Selector moves summed over both ends.
    pub selector_changes: usize,
}

/// Errors that can occur during a simulation run.
#[derive(Debug)]
pub enum SimError {
    /// An end could not be activated.
    Setup { side: Side, error: ApsError },
    /// The engine rejected an operation it should have accepted.
    Engine {
        event: usize,
        side: Side,
        error: ApsError,
    },
    /// A per-end invariant does not hold.
    InvariantViolation {
        event: usize,
        side: Side,
        message: String,
    },
    /// The settled ends disagree on where traffic is selected.
    Divergence {
        a: ProtectionState,
        b: ProtectionState,
        cause: DivergenceCause,
    },
}

/// Operator state that accounts for a divergence, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceCause {
    /// Nothing the operator did explains it.
    Unexplained,
    /// An end is frozen and no longer follows its peer.
    Freeze,
    /// The ends hold manual switches in opposite directions. Neither
    /// outranks the other, so each keeps its own.
    ManualSwitchConflict,
}

impl DivergenceCause {
    fn of(a: &InstanceStatus, b: &InstanceStatus) -> Self {
        use Command::{ManualSwitchToProtect as MsP, ManualSwitchToWorking as MsW};

        if a.command == Command::Freeze || b.command == Command::Freeze {
            DivergenceCause::Freeze
        } else if matches!((a.command, b.command), (MsP, MsW) | (MsW, MsP)) {
            DivergenceCause::ManualSwitchConflict
        } else {
            DivergenceCause::Unexplained
        }
    }
}

impl fmt::Display for DivergenceCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DivergenceCause::Unexplained => "unexplained",
            DivergenceCause::Freeze => "an end is frozen",
            DivergenceCause::ManualSwitchConflict => "opposing manual switches",
        })
    }
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::Setup { side, error } => write!(f, "end {side}: activation failed: {error}"),
            SimError::Engine { event, side, error } => {
                write!(f, "event {event}, end {side}: engine error: {error}")
            }
            SimError::InvariantViolation {
                event,
                side,
                message,
            } => write!(f, "event {event}, end {side}: {message}"),
            SimError::Divergence { a, b, cause } => {
                write!(f, "settled ends disagree: A in {a}, B in {b} ({cause})")
            }
        }
    }
}

impl std::error::Error for SimError {}

struct End {
    engine: ApsEngine,
    platform: Arc<RecordingPlatform>,
    hw_selector: Selector,
    /// SF/SD of the protect port as last reported by its MEP.
    protect_mep: (bool, bool),
}

/// Orchestrates a single deterministic simulation run.
pub struct ApsSimulator {
    config: SimConfig,
    clock: Arc<MockClock>,
    ends: [End; 2],
    generator: EventGenerator,
    channel: SimulatedChannel,
    protect_link_up: bool,
    report: SimReport,
}

impl ApsSimulator {
    /// Creates both ends, activates them and lets the initial PDUs cross.
    ///
    /// # Errors
    /// - [`SimError::Setup`] - An end rejected the configuration
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        let initial_time = Instant::now();
        let clock = Arc::new(MockClock::new(
            initial_time
                .checked_add(Duration::from_nanos(config.seed % 1_000_000))
                .unwrap_or(initial_time),
        ));

        let make_end = |side: Side| -> Result<End, SimError> {
            let platform = Arc::new(RecordingPlatform::with_ports([
                WORKING_PORT.value(),
                PROTECT_PORT.value(),
            ]));
            let mut engine = ApsEngine::new(clock.clone(), platform.clone());
            engine
                .activate(INSTANCE, config.instance_config(), false, false)
                .map_err(|error| SimError::Setup { side, error })?;
            Ok(End {
                engine,
                platform,
                hw_selector: Selector::Working,
                protect_mep: (false, false),
            })
        };
        let ends = [make_end(Side::A)?, make_end(Side::B)?];

        let generator = EventGenerator::new(&config);
        let channel = SimulatedChannel::new(config.seed.wrapping_add(1), config.pdu_loss_probability);

        let mut sim = Self {
            config,
            clock,
            ends,
            generator,
            channel,
            protect_link_up: true,
            report: SimReport::default(),
        };
        sim.deliver();
        Ok(sim)
    }

    /// Runs the generated events, checking invariants after each.
    ///
    /// # Returns
    /// The run's counters.
    ///
    /// # Errors
    /// - [`SimError::Engine`] - An operation failed unexpectedly
    /// - [`SimError::InvariantViolation`] - An end is internally inconsistent
    /// - [`SimError::Divergence`] - Ends disagree after settling (unless `check_agreement` is off)
    pub fn run(&mut self) -> Result<SimReport, SimError> {
        while let Some(event) = self.generator.next_event() {
            self.step(event)?;
        }
        if self.config.check_agreement {
            self.check_agreement()?;
        }
        Ok(self.report)
    }

    /// Applies a fixed sequence of events, checking invariants after each.
    ///
    /// # Errors
    /// As for [`run`](Self::run), without the agreement check.
    pub fn run_script(&mut self, events: &[SimEvent]) -> Result<SimReport, SimError> {
        for event in events {
            self.step(*event)?;
        }
        Ok(self.report)
    }

    /// Lets the span settle and verifies both ends select the same path.
    ///
    /// Unidirectional spans switch each direction on its own, and a
    /// provisioning or configuration mismatch means the ends are not
    /// running one protocol, so those are not checked.
    ///
    /// # Errors
    /// - [`SimError::Divergence`] - Selectors differ after settling; the
    ///   cause says whether an operator command explains it
    pub fn check_agreement(&mut self) -> Result<(), SimError> {
        if self.config.mode.is_unidirectional() {
            return Ok(());
        }
        let settle = Duration::from_secs(u64::from(self.config.wtr_secs) + 20);
        self.advance(settle);

        let event = self.report.events;
        let status = |side: Side| {
            self.status(side)
                .map_err(|error| SimError::Engine { event, side, error })
        };
        let (a, b) = (status(Side::A)?, status(Side::B)?);
        if [&a, &b].iter().any(|s| s.dfop_pm || s.dfop_cm) {
            return Ok(());
        }
        if a.selector != b.selector {
            return Err(SimError::Divergence {
                a: a.state,
                b: b.state,
                cause: DivergenceCause::of(&a, &b),
            });
        }
        Ok(())
    }

    /// Current status of the instance at `side`.
    ///
    /// # Errors
    /// - [`ApsError::InstanceNotFound`] - Never, unless the engine lost the instance
    pub fn status(&self, side: Side) -> Result<InstanceStatus, ApsError> {
        self.ends[side.index()].engine.status(INSTANCE)
    }

    /// Counters gathered so far.
    pub fn report(&self) -> SimReport {
        self.report
    }

    fn step(&mut self, event: SimEvent) -> Result<(), SimError> {
        let index = self.report.events;
        tracing::debug!(index, ?event, "applying event");
        match event {
            SimEvent::Defect { side, role, sf, sd } => {
                let end = &mut self.ends[side.index()];
                // The MEP cannot see past a dead link.
                let sf = match role {
                    PortRole::Working => sf,
                    PortRole::Protect => {
                        end.protect_mep = (sf, sd);
                        sf || !self.protect_link_up
                    }
                };
                end.engine
                    .set_signal_fail_degrade(INSTANCE, role, sf, sd)
                    .map_err(|error| SimError::Engine {
                        event: index,
                        side,
                        error,
                    })?;
            }
            SimEvent::Command { side, command } => {
                match self.ends[side.index()].engine.set_command(INSTANCE, command) {
                    Ok(()) => {}
                    Err(ApsError::CommandWhileFrozen | ApsError::ExerciseUnidirectional) => {
                        self.report.rejected_commands += 1;
                    }
                    Err(error) => {
                        return Err(SimError::Engine {
                            event: index,
                            side,
                            error,
                        });
                    }
                }
            }
            SimEvent::ProtectLink { up } => {
                self.protect_link_up = up;
                for (side, end) in Side::BOTH.into_iter().zip(&mut self.ends) {
                    end.engine.port_link_changed(PROTECT_PORT, up);
                    if up {
                        // The MEP owns the clear on a MEP-triggered port.
                        let (sf, sd) = end.protect_mep;
                        end.engine
                            .set_signal_fail_degrade(INSTANCE, PortRole::Protect, sf, sd)
                            .map_err(|error| SimError::Engine {
                                event: index,
                                side,
                                error,
                            })?;
                    }
                }
            }
            SimEvent::Wait(duration) => self.advance(duration),
        }
        self.deliver();
        self.report.events += 1;
        self.check_invariants(index)
    }

    /// Moves time forward in small steps, firing timers and exchanging
    /// PDUs after each.
    fn advance(&mut self, duration: Duration) {
        let mut left = duration;
        while !left.is_zero() {
            let step = left.min(MAX_TIME_STEP);
            self.clock.advance(step);
            for end in &mut self.ends {
                end.engine.process_timers();
            }
            self.deliver();
            left -= step;
        }
    }

    /// Carries transmitted PDUs across the link until both ends are quiet.
    fn deliver(&mut self) {
        for _ in 0..MAX_DELIVERY_ROUNDS {
            let mut moved = false;
            for from in Side::BOTH {
                let frames = self.ends[from.index()].platform.drain_transmitted();
                for (port, frame) in frames {
                    if port != PROTECT_PORT {
                        continue;
                    }
                    moved = true;
                    match self.channel.transmit(frame) {
                        Some(frame) => {
                            self.report.frames_delivered += 1;
                            let receiver = &mut self.ends[from.peer().index()].engine;
                            if !receiver.dispatch_frame(PROTECT_PORT, CLASSIFIED_VID, false, &frame)
                            {
                                tracing::warn!(to = %from.peer(), "PDU not claimed by any instance");
                            }
                        }
                        None => self.report.frames_lost += 1,
                    }
                }
            }
            if !moved {
                return;
            }
        }
        tracing::warn!("PDU exchange did not quiesce");
    }

    fn check_invariants(&mut self, event: usize) -> Result<(), SimError> {
        let tx_enabled = self.config.instance_config().tx_laps_pdus();
        for side in Side::BOTH {
            let end = &mut self.ends[side.index()];
            let violation = |message: String| SimError::InvariantViolation {
                event,
                side,
                message,
            };
            let status = end.engine.status(INSTANCE).map_err(|error| SimError::Engine {
                event,
                side,
                error,
            })?;

            if let Some(selector) = end.platform.last_selector(INSTANCE) {
                if selector != end.hw_selector {
                    self.report.selector_changes += 1;
                }
                end.hw_selector = selector;
            }
            end.platform.clear_calls();

            if status.selector != selector_for(status.state) {
                return Err(violation(format!(
                    "selector {:?} in state {}",
                    status.selector, status.state
                )));
            }
            if end.hw_selector != status.selector {
                return Err(violation(format!(
                    "hardware selector {:?}, reported {:?}",
                    end.hw_selector, status.selector
                )));
            }
            if status.command == Command::Lockout && status.state != ProtectionState::Lockout {
                return Err(violation(format!(
                    "lockout outstanding in state {}",
                    status.state
                )));
            }
            if status.command == Command::Freeze {
                continue;
            }

            let wtr_running = end.engine.timer_remaining(INSTANCE, TimerKind::Wtr).is_some();
            if wtr_running != (status.state == ProtectionState::WaitToRestore) {
                return Err(violation(format!(
                    "WTR timer running: {wtr_running} in state {}",
                    status.state
                )));
            }
            if tx_enabled {
                let expected = ApsInfoView::from(&tx_aps_info(
                    status.state,
                    self.config.mode,
                    self.config.revertive,
                    true,
                ));
                if status.tx_aps != expected {
                    return Err(violation(format!(
                        "transmitting {:?} in state {}",
                        status.tx_aps, status.state
                    )));
                }
            }
        }
        Ok(())
    }
}
