//! The linear APS engine.
//!
//! [`ApsEngine`] is the single owner of every protection instance, the timer
//! set and the port link table. All entry points take `&mut self`, so the
//! whole engine is one critical section; [`ApsService`](crate::service::ApsService)
//! puts it behind a mutex and drives its timers from a dedicated thread.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::{InstanceConfig, SfTrigger};
use crate::error::ApsError;
use crate::history::HistoryEntry;
use crate::instance::{Instance, InstanceContext, InstanceStatus};
use crate::protocol_types::{Command, PortRole};
use crate::time::Clock;
use crate::timer::{TimerKey, TimerKind, TimerQueue};
use crate::traits::ApsPlatform;
use crate::transport::Statistics;
use crate::types::{InstanceId, PortNo, VlanId};

/// Receive-side metadata accompanying a frame handed to [`ApsEngine::rx_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxMetadata {
    /// Which of the instance's ports the frame arrived on.
    pub port_role: PortRole,
}

/// The G.8031 linear protection engine.
///
/// Central orchestrator for all protection instances.
///
/// ## Usage
///
/// 1. Create an engine with [`ApsEngine::new`], injecting a clock and platform
/// 2. Bring instances up with [`activate`]
/// 3. Feed it defects ([`set_signal_fail_degrade`], [`port_link_changed`]),
///    operator commands ([`set_command`]) and received frames ([`rx_frame`])
/// 4. Call [`process_timers`] whenever [`next_deadline`] has passed
///
/// [`activate`]: Self::activate
/// [`set_signal_fail_degrade`]: Self::set_signal_fail_degrade
/// [`port_link_changed`]: Self::port_link_changed
/// [`set_command`]: Self::set_command
/// [`rx_frame`]: Self::rx_frame
/// [`process_timers`]: Self::process_timers
/// [`next_deadline`]: Self::next_deadline
#[derive(Debug)]
pub struct ApsEngine {
    /// Known instances, active or not, ordered for deterministic dispatch.
    instances: BTreeMap<InstanceId, Instance>,
    /// Every armed protocol timer of every instance.
    timers: TimerQueue,
    /// Link state reported through `port_link_changed`.
    links: HashMap<PortNo, bool>,
    /// Hardware collaborator.
    platform: Arc<dyn ApsPlatform>,
    /// Time source for timers and history timestamps.
    clock: Arc<dyn Clock>,
    /// Engine creation time; history timestamps count from here.
    epoch: Instant,
}

impl ApsEngine {
    /// Creates an engine without instances.
    ///
    /// # Parameters
    /// - `clock`: Clock implementation for timers and timestamps
    /// - `platform`: Hardware collaborator
    pub fn new(clock: Arc<dyn Clock>, platform: Arc<dyn ApsPlatform>) -> Self {
        let epoch = clock.now();
        ApsEngine {
            instances: BTreeMap::new(),
            timers: TimerQueue::new(),
            links: HashMap::new(),
            platform,
            clock,
            epoch,
        }
    }

    /// Borrows one instance together with the shared resources it needs.
    fn split(
        &mut self,
        id: InstanceId,
    ) -> Result<(&mut Instance, InstanceContext<'_>), ApsError> {
        let now = self.clock.now();
        let uptime_ms = self.clock.millis_since(self.epoch);
        let instance = self
            .instances
            .get_mut(&id)
            .ok_or(ApsError::InstanceNotFound(id))?;
        let ctx = InstanceContext {
            timers: &mut self.timers,
            platform: self.platform.as_ref(),
            links: &self.links,
            now,
            uptime_ms,
        };
        Ok((instance, ctx))
    }

    fn split_active(
        &mut self,
        id: InstanceId,
    ) -> Result<(&mut Instance, InstanceContext<'_>), ApsError> {
        let (instance, ctx) = self.split(id)?;
        if !instance.is_active() {
            return Err(ApsError::NotActive(id));
        }
        Ok((instance, ctx))
    }

    fn get(&self, id: InstanceId) -> Result<&Instance, ApsError> {
        self.instances
            .get(&id)
            .ok_or(ApsError::InstanceNotFound(id))
    }

    /// Activates an instance, creating it on first use.
    ///
    /// # Parameters
    /// - `id`: Instance to activate
    /// - `config`: Configuration for this activation
    /// - `initial_sf_w` / `initial_sf_p`: Signal-fail state of the ports right now
    ///
    /// # Errors
    /// - [`ApsError::InvalidConfig`] - Configuration failed validation
    /// - [`ApsError::AlreadyActive`] - Instance already running
    /// - [`ApsError::Platform`] / [`ApsError::Building`] - Activation failed and was rolled back
    pub fn activate(
        &mut self,
        id: InstanceId,
        config: InstanceConfig,
        initial_sf_w: bool,
        initial_sf_p: bool,
    ) -> Result<(), ApsError> {
        config.validate()?;
        match self.instances.get_mut(&id) {
            Some(instance) if instance.is_active() => return Err(ApsError::AlreadyActive(id)),
            Some(instance) => instance.set_config(config),
            None => {
                self.instances.insert(id, Instance::new(id, config));
            }
        }
        let (instance, mut ctx) = self.split(id)?;
        instance.activate(&mut ctx, initial_sf_w, initial_sf_p)
    }

    /// Deactivates an instance. The instance stays known and can be
    /// re-activated.
    ///
    /// # Errors
    /// - [`ApsError::InstanceNotFound`] / [`ApsError::NotActive`]
    /// - [`ApsError::Platform`] - A hardware call failed; cleanup still completed
    pub fn deactivate(&mut self, id: InstanceId) -> Result<(), ApsError> {
        let (instance, mut ctx) = self.split_active(id)?;
        instance.deactivate(&mut ctx)
    }

    /// Deactivates (if needed) and forgets an instance.
    ///
    /// # Errors
    /// - [`ApsError::InstanceNotFound`] - Unknown instance
    pub fn remove(&mut self, id: InstanceId) -> Result<(), ApsError> {
        let result = match self.deactivate(id) {
            Err(ApsError::NotActive(_)) => Ok(()),
            other => other,
        };
        self.instances.remove(&id);
        self.timers.cancel_instance(id);
        result
    }

    /// Applies a new configuration by deactivating and re-activating,
    /// carrying the current signal-fail inputs across.
    ///
    /// # Errors
    /// - [`ApsError::InvalidConfig`] - New configuration rejected; old one keeps running
    /// - [`ApsError::InstanceNotFound`] / [`ApsError::NotActive`]
    /// - Any activation error
    pub fn reconfigure(&mut self, id: InstanceId, config: InstanceConfig) -> Result<(), ApsError> {
        config.validate()?;
        let (sf_w, sf_p) = {
            let (instance, _) = self.split_active(id)?;
            instance.signal_fail_inputs()
        };
        if let Err(e) = self.deactivate(id) {
            warn!(instance = %id, "deactivation during reconfiguration: {e}");
        }
        self.activate(id, config, sf_w, sf_p)
    }

    /// Issues an operator command.
    ///
    /// # Errors
    /// - [`ApsError::InstanceNotFound`] / [`ApsError::NotActive`]
    /// - [`ApsError::CommandWhileFrozen`] - Only FREEZE-CLEAR accepted while frozen
    /// - [`ApsError::ExerciseUnidirectional`] - Exercise in 1+1 unidirectional mode
    pub fn set_command(&mut self, id: InstanceId, command: Command) -> Result<(), ApsError> {
        let (instance, mut ctx) = self.split_active(id)?;
        instance.set_command(&mut ctx, command)
    }

    /// Reports the raw signal-fail/degrade condition of one port. Hold-off
    /// is applied by the engine.
    ///
    /// # Errors
    /// - [`ApsError::InstanceNotFound`] / [`ApsError::NotActive`]
    pub fn set_signal_fail_degrade(
        &mut self,
        id: InstanceId,
        role: PortRole,
        sf: bool,
        sd: bool,
    ) -> Result<(), ApsError> {
        let (instance, mut ctx) = self.split_active(id)?;
        instance.set_signal_fail_degrade(&mut ctx, role, sf, sd);
        Ok(())
    }

    /// Records a port link change and feeds it as SF to every active
    /// instance using the port. Link up is only an SF clear for ports whose
    /// SF comes from the link; a MEP-triggered port waits for its MEP and
    /// keeps the SD its MEP last reported.
    pub fn port_link_changed(&mut self, port: PortNo, up: bool) {
        if self.links.insert(port, up) == Some(up) {
            return;
        }
        debug!(%port, up, "link change");

        let affected: Vec<(InstanceId, PortRole, bool)> = self
            .instances
            .values()
            .filter(|instance| instance.is_active())
            .filter_map(|instance| {
                let config = instance.config();
                let role = if config.working.port == port {
                    PortRole::Working
                } else if config.protect.port == port {
                    PortRole::Protect
                } else {
                    return None;
                };
                let trigger = match role {
                    PortRole::Working => config.working.sf_trigger,
                    PortRole::Protect => config.protect.sf_trigger,
                };
                let sd = match trigger {
                    SfTrigger::Link => false,
                    SfTrigger::Mep => instance.signal_degrade_input(role),
                };
                (!up || trigger == SfTrigger::Link).then_some((instance.id(), role, sd))
            })
            .collect();

        for (id, role, sd) in affected {
            if let Err(e) = self.set_signal_fail_degrade(id, role, !up, sd) {
                warn!(instance = %id, "link change not applied: {e}");
            }
        }
    }

    /// Refreshes the PDU capture rule after the classified VID or level
    /// of an instance changed.
    ///
    /// # Errors
    /// - [`ApsError::InstanceNotFound`] / [`ApsError::NotActive`]
    /// - [`ApsError::Platform`] - Rule installation failed
    pub fn notify_matching_update(&mut self, id: InstanceId) -> Result<(), ApsError> {
        let (instance, mut ctx) = self.split_active(id)?;
        instance.update_match_rule(&mut ctx)
    }

    /// Regenerates and immediately sends the outgoing PDU after one of its
    /// header fields (TPID, SMAC, level, VLAN, PCP) changed.
    ///
    /// # Errors
    /// - [`ApsError::InstanceNotFound`] / [`ApsError::NotActive`]
    /// - [`ApsError::Building`] - Frame could not be generated
    pub fn notify_tx_frame_update(&mut self, id: InstanceId) -> Result<(), ApsError> {
        let (instance, mut ctx) = self.split_active(id)?;
        if let Err(e) = instance.update_match_rule(&mut ctx) {
            warn!(instance = %id, "{e}");
        }
        instance.tx_frame_update(&mut ctx, true)
    }

    /// Hands a received L-APS frame to an instance.
    ///
    /// Malformed PDUs are counted and dropped, never reported as errors.
    ///
    /// # Errors
    /// - [`ApsError::InstanceNotFound`] / [`ApsError::NotActive`]
    pub fn rx_frame(
        &mut self,
        id: InstanceId,
        frame: &[u8],
        meta: RxMetadata,
    ) -> Result<(), ApsError> {
        let (instance, mut ctx) = self.split_active(id)?;
        instance.rx_frame(&mut ctx, meta.port_role, frame);
        Ok(())
    }

    /// Finds the active instance owning a frame received on `port` and
    /// hands it over.
    ///
    /// # Parameters
    /// - `port`: Ingress port
    /// - `classified_vid`: VLAN the frame was classified to
    /// - `tagged`: The frame carried a VLAN tag on ingress
    /// - `frame`: Raw frame
    ///
    /// # Returns
    /// `true` if an instance consumed the frame.
    pub fn dispatch_frame(
        &mut self,
        port: PortNo,
        classified_vid: VlanId,
        tagged: bool,
        frame: &[u8],
    ) -> bool {
        let platform = self.platform.as_ref();
        let owner = self.instances.values().find_map(|instance| {
            if !instance.is_active() {
                return None;
            }
            let config = instance.config();
            let role = if config.working.port == port {
                PortRole::Working
            } else if config.protect.port == port {
                PortRole::Protect
            } else {
                return None;
            };
            if instance.classified_vid(platform, role) != classified_vid {
                return None;
            }
            // Tagged instances only accept tagged frames and vice versa.
            if config.vlan.is_untagged() == tagged {
                return None;
            }
            Some((instance.id(), role))
        });

        match owner {
            Some((id, port_role)) => self.rx_frame(id, frame, RxMetadata { port_role }).is_ok(),
            None => {
                debug!(%port, vid = %classified_vid, "no instance for L-APS frame");
                false
            }
        }
    }

    /// Zeroes the PDU counters of an instance.
    ///
    /// # Errors
    /// - [`ApsError::InstanceNotFound`]
    pub fn clear_statistics(&mut self, id: InstanceId) -> Result<(), ApsError> {
        let (instance, _) = self.split(id)?;
        instance.clear_statistics();
        Ok(())
    }

    /// Renders the event history of an instance as a table.
    ///
    /// # Errors
    /// - [`ApsError::InstanceNotFound`]
    pub fn dump_history(&self, id: InstanceId) -> Result<String, ApsError> {
        let instance = self.get(id)?;
        let mut out = format!(
            "Now = {} ms\n",
            self.clock.millis_since(self.epoch)
        );
        out.push_str(&instance.history().dump(id, true));
        Ok(out)
    }

    /// Event history of an instance, oldest first.
    ///
    /// # Errors
    /// - [`ApsError::InstanceNotFound`]
    pub fn history(&self, id: InstanceId) -> Result<Vec<HistoryEntry>, ApsError> {
        Ok(self.get(id)?.history().iter().copied().collect())
    }

    /// Status snapshot of an instance.
    ///
    /// # Errors
    /// - [`ApsError::InstanceNotFound`]
    pub fn status(&self, id: InstanceId) -> Result<InstanceStatus, ApsError> {
        Ok(self.get(id)?.status())
    }

    /// PDU counters of an instance.
    ///
    /// # Errors
    /// - [`ApsError::InstanceNotFound`]
    pub fn statistics(&self, id: InstanceId) -> Result<Statistics, ApsError> {
        Ok(self.get(id)?.statistics())
    }

    /// Configuration of an instance.
    ///
    /// # Errors
    /// - [`ApsError::InstanceNotFound`]
    pub fn config(&self, id: InstanceId) -> Result<&InstanceConfig, ApsError> {
        Ok(self.get(id)?.config())
    }

    /// All known instances.
    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.instances.keys().copied().collect()
    }

    /// Time left on one timer of an instance, `None` if not running.
    pub fn timer_remaining(&self, id: InstanceId, kind: TimerKind) -> Option<Duration> {
        self.timers
            .remaining(TimerKey::new(id, kind), self.clock.now())
    }

    /// Current time on the engine clock.
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Earliest pending timer deadline across all instances.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Fires every timer due at the current time, earliest first,
    /// including timers armed by the callbacks themselves.
    ///
    /// # Returns
    /// Number of timers fired.
    pub fn process_timers(&mut self) -> usize {
        let now = self.clock.now();
        let uptime_ms = self.clock.millis_since(self.epoch);
        let mut fired = 0;

        while let Some(key) = self.timers.pop_next_due(now) {
            fired += 1;
            match self.instances.get_mut(&key.instance) {
                Some(instance) if instance.is_active() => {
                    let mut ctx = InstanceContext {
                        timers: &mut self.timers,
                        platform: self.platform.as_ref(),
                        links: &self.links,
                        now,
                        uptime_ms,
                    };
                    instance.on_timer(&mut ctx, key.kind);
                }
                _ => {
                    warn!(instance = %key.instance, timer = %key.kind, "timer of inactive instance fired");
                    self.timers.stop(key);
                }
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PduBuildingError;
    use crate::instance::OperState;
    use crate::protocol_types::{ProtectionState, Selector};
    use crate::testing::{PlatformCall, RecordingPlatform};
    use crate::time::mock_clock::MockClock;
    use crate::config::PortConfig;

    const ID: InstanceId = InstanceId(1);

    fn setup() -> (ApsEngine, Arc<MockClock>, Arc<RecordingPlatform>) {
        let clock = Arc::new(MockClock::new(Instant::now()));
        let platform = Arc::new(RecordingPlatform::with_ports([1, 2, 3]));
        let engine = ApsEngine::new(clock.clone(), platform.clone());
        (engine, clock, platform)
    }

    fn config() -> InstanceConfig {
        InstanceConfig {
            working: PortConfig {
                port: PortNo::new(1),
                sf_trigger: SfTrigger::Link,
            },
            protect: PortConfig {
                port: PortNo::new(2),
                sf_trigger: SfTrigger::Link,
            },
            revertive: true,
            wtr_secs: 10,
            ..Default::default()
        }
    }

    #[test]
    fn activate_configures_hardware_and_sends_burst() {
        let (mut engine, _clock, platform) = setup();
        engine.activate(ID, config(), false, false).unwrap();

        let status = engine.status(ID).unwrap();
        assert_eq!(status.oper_state, OperState::Active);
        assert_eq!(status.state, ProtectionState::NrWorking);
        assert!(status.dfop_to);
        assert_eq!(platform.transmitted(PortNo::new(2)).len(), 3);
        assert_eq!(engine.statistics(ID).unwrap().tx_count, 3);
        assert!(platform.match_rule(ID).is_some());
        assert!(engine.timer_remaining(ID, TimerKind::Tx).is_some());
        assert!(engine.timer_remaining(ID, TimerKind::RxProtect).is_some());
    }

    #[test]
    fn activate_twice_is_rejected() {
        let (mut engine, _clock, _platform) = setup();
        engine.activate(ID, config(), false, false).unwrap();
        assert_eq!(
            engine.activate(ID, config(), false, false),
            Err(ApsError::AlreadyActive(ID))
        );
    }

    #[test]
    fn activation_rolls_back_without_protect_port() {
        let (mut engine, _clock, platform) = setup();
        platform.remove_port(PortNo::new(2));

        let err = engine.activate(ID, config(), false, false).unwrap_err();
        assert_eq!(
            err,
            ApsError::Building(PduBuildingError::ProtectPortUnavailable(PortNo::new(2)))
        );
        assert_eq!(engine.status(ID).unwrap().oper_state, OperState::Inactive);
        assert!(engine.next_deadline().is_none());
        assert!(platform.match_rule(ID).is_none());
        assert!(
            platform
                .calls()
                .contains(&PlatformCall::ReleaseProtection {
                    working: PortNo::new(1)
                })
        );
    }

    #[test]
    fn deactivate_stops_everything_and_flushes_nr() {
        let (mut engine, _clock, platform) = setup();
        engine.activate(ID, config(), false, false).unwrap();
        engine.set_command(ID, Command::ForcedSwitch).unwrap();
        platform.clear_calls();

        engine.deactivate(ID).unwrap();
        assert!(engine.next_deadline().is_none());
        assert_eq!(platform.last_selector(ID), Some(Selector::Working));
        let frames = platform.transmitted(PortNo::new(2));
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0][18] >> 4, 0x0);
        assert_eq!(
            engine.set_command(ID, Command::Clear),
            Err(ApsError::NotActive(ID))
        );
    }

    #[test]
    fn unknown_instance_is_reported() {
        let (mut engine, _clock, _platform) = setup();
        assert_eq!(
            engine.set_command(InstanceId::new(9), Command::Lockout),
            Err(ApsError::InstanceNotFound(InstanceId::new(9)))
        );
    }

    #[test]
    fn freeze_blocks_commands_until_cleared() {
        let (mut engine, _clock, _platform) = setup();
        engine.activate(ID, config(), false, false).unwrap();
        engine.set_command(ID, Command::Freeze).unwrap();
        assert_eq!(
            engine.set_command(ID, Command::Lockout),
            Err(ApsError::CommandWhileFrozen)
        );

        // Defects are recorded but not acted upon.
        engine
            .set_signal_fail_degrade(ID, PortRole::Working, true, false)
            .unwrap();
        assert_eq!(engine.status(ID).unwrap().state, ProtectionState::NrWorking);

        engine.set_command(ID, Command::FreezeClear).unwrap();
        let status = engine.status(ID).unwrap();
        assert_eq!(status.command, Command::NoRequest);
        assert_eq!(status.state, ProtectionState::SfWorking);
    }

    #[test]
    fn hold_off_delays_worsening_only() {
        let (mut engine, clock, _platform) = setup();
        let config = InstanceConfig {
            hold_off_msecs: 500,
            ..config()
        };
        engine.activate(ID, config, false, false).unwrap();

        engine
            .set_signal_fail_degrade(ID, PortRole::Working, true, false)
            .unwrap();
        assert_eq!(engine.status(ID).unwrap().state, ProtectionState::NrWorking);

        clock.advance(Duration::from_millis(500));
        engine.process_timers();
        assert_eq!(engine.status(ID).unwrap().state, ProtectionState::SfWorking);

        // Clearing is immediate.
        engine
            .set_signal_fail_degrade(ID, PortRole::Working, false, false)
            .unwrap();
        assert_eq!(
            engine.status(ID).unwrap().state,
            ProtectionState::WaitToRestore
        );
    }

    #[test]
    fn link_down_on_protect_suppresses_transmission() {
        let (mut engine, _clock, platform) = setup();
        engine.activate(ID, config(), false, false).unwrap();
        platform.clear_calls();

        engine.port_link_changed(PortNo::new(2), false);
        let status = engine.status(ID).unwrap();
        assert_eq!(status.p_state, crate::protocol_types::DefectState::Sf);
        assert_eq!(status.state, ProtectionState::SfProtect);
        assert!(platform.transmitted(PortNo::new(2)).is_empty());
    }

    #[test]
    fn link_down_keeps_degrade_reported_by_mep() {
        let (mut engine, _clock, _platform) = setup();
        let mut config = config();
        config.working.sf_trigger = SfTrigger::Mep;
        engine.activate(ID, config, false, false).unwrap();
        engine
            .set_signal_fail_degrade(ID, PortRole::Working, false, true)
            .unwrap();
        assert_eq!(
            engine.status(ID).unwrap().w_state,
            crate::protocol_types::DefectState::Sd
        );

        engine.port_link_changed(PortNo::new(1), false);
        assert_eq!(
            engine.status(ID).unwrap().w_state,
            crate::protocol_types::DefectState::Sf
        );
        assert!(engine.instances[&ID].signal_degrade_input(PortRole::Working));

        // Link up leaves the MEP-triggered port to its MEP.
        engine.port_link_changed(PortNo::new(1), true);
        assert!(engine.instances[&ID].signal_degrade_input(PortRole::Working));

        engine
            .set_signal_fail_degrade(ID, PortRole::Working, false, true)
            .unwrap();
        let status = engine.status(ID).unwrap();
        assert_eq!(status.w_state, crate::protocol_types::DefectState::Sd);
        assert_eq!(status.state, ProtectionState::SdWorking);
    }

    #[test]
    fn link_driven_port_drops_degrade_with_link() {
        let (mut engine, _clock, _platform) = setup();
        engine.activate(ID, config(), false, false).unwrap();
        engine
            .set_signal_fail_degrade(ID, PortRole::Working, false, true)
            .unwrap();

        engine.port_link_changed(PortNo::new(1), false);
        assert!(!engine.instances[&ID].signal_degrade_input(PortRole::Working));
        engine.port_link_changed(PortNo::new(1), true);
        assert_eq!(
            engine.status(ID).unwrap().w_state,
            crate::protocol_types::DefectState::Ok
        );
    }

    #[test]
    fn history_dump_has_header_and_rows() {
        let (mut engine, _clock, _platform) = setup();
        engine.activate(ID, config(), false, false).unwrap();
        engine.set_command(ID, Command::Lockout).unwrap();

        let dump = engine.dump_history(ID).unwrap();
        assert!(dump.starts_with("Now = "));
        assert!(dump.contains("Inst   # Time [ms]      Local Req   Far-end Req Prot State"));
        assert!(dump.contains(" LO "));
        assert_eq!(engine.history(ID).unwrap().len(), 2);
    }
}
