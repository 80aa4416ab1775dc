use std::{
    collections::{BTreeMap, BTreeSet},
    thread,
    time::{Duration, Instant},
};

use strum::IntoEnumIterator;

use crate::config::Configuration;
use crate::firmata::{self, Board, FirmataError, FirmataHandle, Level, PinMode, TOTAL_PINS};

pub type RelayResult<T> = Result<T, RelayError>;

const SAMPLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A relay channel of the test board
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    serde::Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(try_from = "String")]
pub enum RelayId {
    #[strum(to_string = "RELAY_1", serialize = "relay1", serialize = "1")]
    Relay1,
    #[strum(to_string = "RELAY_2", serialize = "relay2", serialize = "2")]
    Relay2,
}

impl RelayId {
    /// Parses `relay1`, `RELAY_1` or `1` (in any case)
    pub fn parse(s: &str) -> RelayResult<Self> {
        s.trim().parse::<RelayId>().map_err(|_| RelayError::UnknownRelay(s.to_owned()))
    }

    pub fn from_number(number: u8) -> RelayResult<Self> {
        match number {
            1 => Ok(RelayId::Relay1),
            2 => Ok(RelayId::Relay2),
            n => Err(RelayError::UnknownRelay(n.to_string())),
        }
    }
}

impl TryFrom<String> for RelayId {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

/// Observed position of a relay
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayState {
    Open,
    Closed,
    /// Part of the result domain, but a digital state pin only ever yields one of the other two
    Undefined,
}

impl From<Level> for RelayState {
    fn from(value: Level) -> Self {
        match value {
            Level::High => RelayState::Open,
            Level::Low => RelayState::Closed,
        }
    }
}

/// The two board pins belonging to a relay
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PinMapping {
    /// Digital output driving the relay
    pub control_pin: u8,
    /// Digital input reporting the relay position
    pub state_pin: u8,
}

impl PinMapping {
    pub const fn new(control_pin: u8, state_pin: u8) -> Self {
        PinMapping { control_pin, state_pin }
    }
}

/// Digital pins of an Arduino Nano, D0 to D13 followed by A0 to A5
pub const NANO_PIN_COUNT: u8 = 20;

/// Wiring of the Arduino Nano test board
pub fn default_mapping() -> BTreeMap<RelayId, PinMapping> {
    BTreeMap::from([
        (RelayId::Relay1, PinMapping::new(6, 2)),
        (RelayId::Relay2, PinMapping::new(7, 3)),
    ])
}

/// Checks that every relay has pins assigned, that every pin exists on a board with `pin_count`
/// digital pins and that no pin is used twice
pub fn validate_mapping(
    mapping: &BTreeMap<RelayId, PinMapping>,
    pin_count: u8,
) -> RelayResult<()> {
    if let Some(relay) = RelayId::iter().find(|r| !mapping.contains_key(r)) {
        return Err(RelayError::InvalidMapping(format!("no pins assigned to {relay}")));
    }

    let mut used = BTreeSet::new();
    for pins in mapping.values() {
        for pin in [pins.control_pin, pins.state_pin] {
            if pin >= pin_count.min(TOTAL_PINS) {
                return Err(RelayError::InvalidMapping(format!("pin {pin} does not exist")));
            }
            if !used.insert(pin) {
                return Err(RelayError::InvalidMapping(format!("pin {pin} is used more than once")));
            }
        }
    }

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The serial port could not be opened or the board did not answer the handshake
    #[error("Could not connect to board: {0}")]
    Connection(#[source] FirmataError),
    #[error("Unknown relay '{0}'")]
    UnknownRelay(String),
    #[error("Invalid pin mapping: {0}")]
    InvalidMapping(String),
    /// The board has not reported the state pin since the connection was established
    #[error("No sample of state pin {pin} received yet for {relay}")]
    SamplePending { relay: RelayId, pin: u8 },
    #[error(transparent)]
    Board(#[from] FirmataError),
}

/// Drives the relays of a test board and reads back their state pins
pub struct RelayController<H: FirmataHandle> {
    board: Board<H>,
    relays: BTreeMap<RelayId, PinMapping>,
}

impl RelayController<Box<dyn serialport::SerialPort>> {
    /// Connects to the board on `port` using the default pin mapping
    pub fn open_port(port: &str) -> RelayResult<Self> {
        Self::connect(&Configuration::new(port))
    }

    /// Connects to the board on the configured serial port
    pub fn connect(config: &Configuration) -> RelayResult<Self> {
        validate_mapping(&config.relays, config.pin_count)?;
        let port = firmata::open_serial(&config.port, config.baudrate, config.read_timeout())
            .map_err(RelayError::Connection)?;
        log::info!("Opened {} at {} baud", config.port, config.baudrate);

        Self::with_handle(port, config)
    }
}

impl<H: FirmataHandle> RelayController<H> {
    /// Sets up the board behind `handle`: configures the pin directions, closes every relay and
    /// starts sampling the state pins.
    pub fn with_handle(handle: H, config: &Configuration) -> RelayResult<Self> {
        validate_mapping(&config.relays, config.pin_count)?;
        let board = Board::connect(handle, config.read_timeout(), config.handshake_timeout())
            .map_err(RelayError::Connection)?;

        let mut controller = RelayController { board, relays: config.relays.clone() };
        controller.init_board()?;
        controller.board.start_sampling()?;

        Ok(controller)
    }

    fn init_board(&mut self) -> RelayResult<()> {
        let relays: Vec<_> = self.relays.iter().map(|(r, p)| (*r, *p)).collect();
        for (relay, pins) in relays {
            self.board.set_pin_mode(pins.control_pin, PinMode::Output)?;
            self.board.set_pin_mode(pins.state_pin, PinMode::Input)?;
            self.close(relay)?;
        }
        Ok(())
    }

    pub fn open(&mut self, relay: RelayId) -> RelayResult<()> {
        log::info!("Open relay {relay}");
        self.set_relay_state(relay, Level::High)
    }

    pub fn close(&mut self, relay: RelayId) -> RelayResult<()> {
        log::info!("Close relay {relay}");
        self.set_relay_state(relay, Level::Low)
    }

    /// Classifies the last sampled level of the relay's state pin.
    ///
    /// The sample may predate a preceding [`open`](Self::open) or [`close`](Self::close) if the
    /// relay had no time to settle. Fails with [`RelayError::SamplePending`] while the board has
    /// not reported the pin yet.
    pub fn read_state(&self, relay: RelayId) -> RelayResult<RelayState> {
        let level = self.read_level(relay)?;
        log::info!("Pin value is {level}");
        Ok(RelayState::from(level))
    }

    /// Blocks until every state pin has been sampled at least once
    pub fn await_samples(&self, timeout: Duration) -> RelayResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.relays().try_for_each(|relay| self.read_level(relay).map(drop)) {
                Err(RelayError::SamplePending { .. }) if Instant::now() < deadline => {
                    thread::sleep(SAMPLE_POLL_INTERVAL)
                }
                result => return result,
            }
        }
    }

    pub fn mapping(&self, relay: RelayId) -> RelayResult<PinMapping> {
        self.relays.get(&relay).copied().ok_or_else(|| RelayError::UnknownRelay(relay.to_string()))
    }

    pub fn relays(&self) -> impl Iterator<Item = RelayId> + '_ {
        self.relays.keys().copied()
    }

    pub fn board(&self) -> &Board<H> {
        &self.board
    }

    fn set_relay_state(&mut self, relay: RelayId, level: Level) -> RelayResult<()> {
        let pins = self.mapping(relay)?;
        self.board.digital_write(pins.control_pin, level)?;
        Ok(())
    }

    fn read_level(&self, relay: RelayId) -> RelayResult<Level> {
        let pin = self.mapping(relay)?.state_pin;
        self.board.digital_read(pin)?.ok_or(RelayError::SamplePending { relay, pin })
    }
}
