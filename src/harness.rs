//! Toggle-and-verify routines for checking the relay wiring of a test board

use std::{thread, time::Duration};

use strum::IntoEnumIterator;

use crate::firmata::FirmataHandle;
use crate::relay::{RelayController, RelayError, RelayId, RelayState};

/// Time a relay of the test board needs until its state pin follows a command
pub const DEFAULT_SETTLE_TIME: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// The state pin disagrees with the commanded position
    #[error("Relay {relay} should be {expected} but is {actual}")]
    Mismatch { relay: RelayId, expected: RelayState, actual: RelayState },
    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// Opens and closes `relay`, checking the state pin after each step
pub fn toggle_relay<H: FirmataHandle>(
    controller: &mut RelayController<H>,
    relay: RelayId,
    settle_time: Duration,
) -> Result<(), VerificationError> {
    controller.open(relay)?;
    thread::sleep(settle_time);
    expect_state(controller, relay, RelayState::Open)?;

    controller.close(relay)?;
    thread::sleep(settle_time);
    expect_state(controller, relay, RelayState::Closed)
}

/// Runs [`toggle_relay`] for every relay of the board
pub fn toggle_all<H: FirmataHandle>(
    controller: &mut RelayController<H>,
    settle_time: Duration,
) -> Result<(), VerificationError> {
    RelayId::iter().try_for_each(|relay| toggle_relay(controller, relay, settle_time))
}

pub fn expect_state<H: FirmataHandle>(
    controller: &RelayController<H>,
    relay: RelayId,
    expected: RelayState,
) -> Result<(), VerificationError> {
    let actual = controller.read_state(relay)?;
    if actual != expected {
        log::error!("Relay {relay} should be {expected} but is {actual}");
        return Err(VerificationError::Mismatch { relay, expected, actual });
    }
    Ok(())
}
