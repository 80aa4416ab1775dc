use std::{
    collections::BTreeMap,
    io::{ErrorKind, Read},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use super::{
    BoardMessage, FirmataError, FirmataHandle, FirmataParseError, FirmataResult, HostMessage,
    Level, PinMode,
};

/// Number of digital ports addressable by Firmata
pub const PORT_COUNT: usize = 16;
pub const TOTAL_PINS: u8 = (PORT_COUNT * PINS_PER_PORT) as u8;
const PINS_PER_PORT: usize = 8;

/// Protocol version the board reported during the handshake
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub major: u8,
    pub minor: u8,
}

/// Last reported level mask of every port, `None` until the board reported the port once.
///
/// Only the sampler thread writes to this table. The caller thread only reads it.
#[derive(Default)]
struct PortSamples([Option<u8>; PORT_COUNT]);

type SyncPortSamples = Arc<Mutex<PortSamples>>;

fn lock(samples: &SyncPortSamples) -> std::sync::MutexGuard<'_, PortSamples> {
    // The table holds plain values, a panic while holding the lock cannot leave it inconsistent
    samples.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connection to a board running StandardFirmata
pub struct Board<H: FirmataHandle> {
    handle: H,
    /// Read half, moved into the sampler thread once sampling starts
    reader: Option<MessageReader<H::Reader>>,
    firmware: FirmwareInfo,
    modes: BTreeMap<u8, PinMode>,
    /// Levels last commanded for the output pins of each port. Written by the caller thread only.
    output_masks: [u8; PORT_COUNT],
    reporting: [bool; PORT_COUNT],
    samples: SyncPortSamples,
    /// Cleared on drop to tell the sampler thread to stop
    running_flag: Arc<AtomicBool>,
    sampler: Option<thread::JoinHandle<()>>,
}

impl<H: FirmataHandle> Board<H> {
    /// Performs the version handshake with the board behind `handle`.
    ///
    /// Every read on the connection gives up after `read_timeout`, after which the version query
    /// is repeated, as the board may still be booting. Fails with
    /// [`FirmataError::HandshakeTimeout`] if no version was reported within `handshake_timeout`.
    pub fn connect(
        mut handle: H,
        read_timeout: Duration,
        handshake_timeout: Duration,
    ) -> FirmataResult<Self> {
        handle.set_timeout(read_timeout)?;
        let mut reader = MessageReader::new(handle.try_clone_reader()?);
        let firmware = handshake(&mut handle, &mut reader, handshake_timeout)?;
        log::info!("Board speaks Firmata {}.{}", firmware.major, firmware.minor);
        handle.send_message(&HostMessage::QueryFirmware)?;

        Ok(Board {
            handle,
            reader: Some(reader),
            firmware,
            modes: BTreeMap::new(),
            output_masks: [0; PORT_COUNT],
            reporting: [false; PORT_COUNT],
            samples: SyncPortSamples::default(),
            running_flag: Arc::new(AtomicBool::new(true)),
            sampler: None,
        })
    }

    pub fn firmware(&self) -> FirmwareInfo {
        self.firmware
    }

    pub fn pin_mode(&self, pin: u8) -> Option<PinMode> {
        self.modes.get(&pin).copied()
    }

    /// Configures the direction of a pin. Input pins additionally get the reporting of their
    /// port enabled, so their levels are streamed back to the host.
    pub fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> FirmataResult<()> {
        let (port, bit) = locate(pin)?;
        self.handle.send_message(&HostMessage::SetPinMode { pin, mode })?;
        self.modes.insert(pin, mode);
        // A set bit on an input pin enables its pull-up, so only outputs may appear in the mask
        self.output_masks[port] &= !bit;

        if mode.is_digital_input() && !self.reporting[port] {
            self.handle.send_message(&HostMessage::ReportDigital { port: port as u8, enable: true })?;
            self.reporting[port] = true;
        }

        Ok(())
    }

    /// Drives an output pin. The whole port is written, other outputs keep their last level.
    pub fn digital_write(&mut self, pin: u8, level: Level) -> FirmataResult<()> {
        let (port, bit) = locate(pin)?;
        if self.pin_mode(pin) != Some(PinMode::Output) {
            return Err(FirmataError::NotAnOutput(pin));
        }

        let mask = match level {
            Level::High => self.output_masks[port] | bit,
            Level::Low => self.output_masks[port] & !bit,
        };
        self.output_masks[port] = mask;
        self.handle.send_message(&HostMessage::DigitalPort { port: port as u8, mask })
    }

    /// Returns the most recently sampled level of an input pin, or `None` if the board has not
    /// reported the pin's port yet.
    pub fn digital_read(&self, pin: u8) -> FirmataResult<Option<Level>> {
        let (port, bit) = locate(pin)?;
        if !self.pin_mode(pin).is_some_and(PinMode::is_digital_input) {
            return Err(FirmataError::NotAnInput(pin));
        }

        Ok(lock(&self.samples).0[port].map(|mask| Level::from(mask & bit != 0)))
    }

    /// Starts the sampler thread, which keeps the cached input levels up to date for the lifetime
    /// of the board. Calling this again has no effect.
    pub fn start_sampling(&mut self) -> FirmataResult<()> {
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };

        let samples = Arc::clone(&self.samples);
        let running_flag = Arc::clone(&self.running_flag);
        let handle = thread::Builder::new()
            .name("firmata-sampler".into())
            .spawn(move || sample(reader, samples, running_flag))?;
        self.sampler = Some(handle);

        Ok(())
    }

    /// Whether the sampler thread is still receiving data
    pub fn is_sampling(&self) -> bool {
        self.sampler.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl<H: FirmataHandle> Drop for Board<H> {
    fn drop(&mut self) {
        self.running_flag.store(false, Ordering::Relaxed);
    }
}

fn locate(pin: u8) -> FirmataResult<(usize, u8)> {
    if pin >= TOTAL_PINS {
        return Err(FirmataError::InvalidPin(pin));
    }
    let pin = usize::from(pin);
    Ok((pin / PINS_PER_PORT, 1 << (pin % PINS_PER_PORT)))
}

/// Reads board messages off the read half. A command byte that cut the previous message short
/// starts the next message instead of being dropped along with it.
struct MessageReader<R> {
    reader: R,
    resume: Option<u8>,
}

impl<R: Read> MessageReader<R> {
    fn new(reader: R) -> Self {
        MessageReader { reader, resume: None }
    }

    fn next_message(&mut self) -> Result<BoardMessage, FirmataParseError> {
        let result = match self.resume.take() {
            Some(status) => BoardMessage::try_from_status(status, &mut self.reader),
            None => BoardMessage::try_from_read(&mut self.reader),
        };
        if let Err(FirmataParseError::UnexpectedCommandByte(status)) = result {
            self.resume = Some(status);
        }
        result
    }
}

fn handshake<H: FirmataHandle>(
    handle: &mut H,
    reader: &mut MessageReader<H::Reader>,
    timeout: Duration,
) -> FirmataResult<FirmwareInfo> {
    let deadline = Instant::now() + timeout;
    handle.send_message(&HostMessage::QueryVersion)?;

    while Instant::now() < deadline {
        match reader.next_message() {
            Ok(BoardMessage::ReportVersion { major, minor }) => {
                return Ok(FirmwareInfo { major, minor })
            }
            Ok(message) => log::debug!("Ignoring {message:?} during handshake"),
            Err(FirmataParseError::Io(e)) if e.kind() == ErrorKind::TimedOut => {
                log::debug!("No answer from board yet, repeating version query");
                handle.send_message(&HostMessage::QueryVersion)?;
            }
            Err(FirmataParseError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(FirmataError::Disconnected)
            }
            Err(FirmataParseError::Io(e)) => return Err(e.into()),
            Err(e) => log::warn!("Skipping malformed data during handshake: {e}"),
        }
    }

    Err(FirmataError::HandshakeTimeout(timeout))
}

/// Body of the sampler thread. Sole writer of `samples`.
fn sample(
    mut reader: MessageReader<impl Read>,
    samples: SyncPortSamples,
    running_flag: Arc<AtomicBool>,
) {
    log::debug!("Sampler started");

    while running_flag.load(Ordering::Relaxed) {
        match reader.next_message() {
            Ok(BoardMessage::DigitalPort { port, mask }) => {
                log::trace!("Port {port} reported {mask:#010b}");
                lock(&samples).0[usize::from(port) % PORT_COUNT] = Some(mask);
            }
            Ok(BoardMessage::Firmware { major, minor, name }) => {
                log::info!("Board firmware is {name} {major}.{minor}")
            }
            Ok(message) => log::trace!("Ignoring {message:?}"),
            Err(FirmataParseError::Io(e)) if e.kind() == ErrorKind::TimedOut => {}
            Err(FirmataParseError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                log::warn!("Board connection closed, sampler stops");
                return;
            }
            Err(FirmataParseError::Io(e)) => {
                log::error!("Sampler failed to read from board: {e}");
                return;
            }
            Err(e) => log::warn!("Skipping malformed board data: {e}"),
        }
    }

    log::debug!("Sampler stopped");
}
