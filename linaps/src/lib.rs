//! `linaps`: ITU-T G.8031 Ethernet linear protection switching in Rust.
//!
//! This library implements the Linear APS protocol engine: the
//! priority-driven protection state machine, the L-APS PDU codec and
//! transmit cadence, and the software timers the protocol needs. The
//! primary entry point is the [`ApsEngine`].
//!
//! ## Core Concepts
//!
//! - **[`ApsEngine`]**: Owns every protection instance and the timer set.
//!   All inputs (defects, operator commands, received PDUs, timer expiries)
//!   go through it.
//! - **Instances**: One working/protect port pair, configured with an
//!   [`InstanceConfig`] and identified by an [`InstanceId`].
//! - **Platform**: Switch hardware is reached through the [`ApsPlatform`]
//!   trait, injected at construction.
//! - **[`ApsService`]**: Puts the engine behind a mutex and drives its
//!   timers from a dedicated thread.
//!
//! ## Quick Start
//!
//! ```rust
//! use linaps::time::SystemClock;
//! use linaps::{
//!     ApsEngine, ApsPlatform, Command, InstanceConfig, InstanceId, MacAddr, MatchRule, Mode,
//!     PlatformError, PortConfig, PortInfo, PortNo, Selector, VlanId,
//! };
//! use std::sync::Arc;
//!
//! /// A platform that accepts everything and drops every frame.
//! #[derive(Debug)]
//! struct Loopback;
//!
//! impl ApsPlatform for Loopback {
//!     fn port_info(&self, port: PortNo) -> Option<PortInfo> {
//!         Some(PortInfo {
//!             link_up: true,
//!             tpid: 0x8100,
//!             mac: MacAddr([0x00, 0x01, 0xC1, 0x00, 0x00, port.value() as u8]),
//!             pvid: VlanId::new(1),
//!         })
//!     }
//!     fn configure_protection(&self, _: PortNo, _: PortNo, _: Mode) -> Result<(), PlatformError> {
//!         Ok(())
//!     }
//!     fn release_protection(&self, _: PortNo) -> Result<(), PlatformError> {
//!         Ok(())
//!     }
//!     fn set_selector(&self, _: InstanceId, _: PortNo, _: Selector) -> Result<(), PlatformError> {
//!         Ok(())
//!     }
//!     fn transmit(&self, _: PortNo, _: &[u8]) -> Result<(), PlatformError> {
//!         Ok(())
//!     }
//!     fn install_match_rule(&self, _: InstanceId, _: &MatchRule) -> Result<(), PlatformError> {
//!         Ok(())
//!     }
//!     fn remove_match_rule(&self, _: InstanceId) -> Result<(), PlatformError> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut engine = ApsEngine::new(Arc::new(SystemClock), Arc::new(Loopback));
//!
//!     let id = InstanceId::new(1);
//!     let config = InstanceConfig {
//!         working: PortConfig { port: PortNo::new(1), ..Default::default() },
//!         protect: PortConfig { port: PortNo::new(2), ..Default::default() },
//!         revertive: true,
//!         ..Default::default()
//!     };
//!     engine.activate(id, config, false, false)?;
//!
//!     engine.set_command(id, Command::ForcedSwitch)?;
//!     assert_eq!(engine.status(id)?.selector, Selector::Protect);
//!
//!     print!("{}", engine.dump_history(id)?);
//!     engine.deactivate(id)?;
//!     Ok(())
//! }
//! ```
//!
//! With the `test_utils` feature, `testing::RecordingPlatform` provides a
//! platform that records every call for assertions.

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod history;
pub mod instance;
pub mod protocol_types;
pub mod serialization;
pub mod service;
pub mod state_machine;
pub mod time;
pub mod timer;
pub mod traits;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "test_utils"))]
pub mod fuzz_harnesses;
#[cfg(any(test, feature = "test_utils"))]
pub mod testing;

pub use config::{InstanceConfig, PortConfig, SfTrigger};
pub use engine::{ApsEngine, RxMetadata};
pub use error::{ApsError, ParseContext, PduBuildingError, PduParsingError, PlatformError};
pub use history::HistoryEntry;
pub use instance::{InstanceStatus, OperState};
pub use protocol_types::{
    ApsInfo, ApsRequestCode, Command, DefectState, Mode, PortRole, ProtectionState, Request,
    Selector,
};
pub use service::ApsService;
pub use time::mock_clock::MockClock;
pub use timer::TimerKind;
pub use traits::{ApsPlatform, MatchRule, PortInfo};
pub use transport::Statistics;
pub use types::{InstanceId, MacAddr, MegLevel, PortNo, VlanId};
