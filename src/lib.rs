pub mod config;
pub mod firmata;
pub mod harness;
pub mod relay;

pub use config::Configuration;
pub use relay::{RelayController, RelayError, RelayId, RelayState};
