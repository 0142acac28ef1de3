//! # greelink
//!
//! Asynchronous LAN driver for split-system air conditioners speaking the
//! encrypted JSON-over-UDP protocol, without cloud dependencies.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use greelink::{Command, DeviceBuilder, HvacMode};
//!
//! # async fn run() -> greelink::Result<()> {
//! let device = DeviceBuilder::new("192.168.1.40", "c8:f7:42:a1:b2:c3").build()?;
//! let state = device.refresh().await?;
//! println!("{:?}", state.hvac_mode);
//! device.execute(Command::SetHvacMode(HvacMode::Cool)).await?;
//! # Ok(())
//! # }
//! ```
//!
#[macro_use]
mod macros;
pub mod bind;
pub mod codec;
pub mod command;
pub mod config;
pub mod crypto;
pub mod device;
pub mod engine;
pub mod error;
pub mod params;
pub mod state;
pub mod transport;

#[cfg(test)]
pub(crate) mod fake;

pub use command::{Automation, Command, Feature};
pub use config::DeviceConfig;
pub use crypto::KeyScheme;
pub use device::{Device, DeviceBuilder};
pub use engine::{Capabilities, Capability, ProbeOutcome, SyncEngine};
pub use error::{GreeError, Result};
pub use params::{Overrides, Param, Snapshot};
pub use state::{ClimateState, FanMode, HvacMode, PresetMode, SwingMode, Switch};
pub use transport::{Transport, UdpTransport};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}
