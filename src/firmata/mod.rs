mod board;
mod message;
pub use board::{Board, FirmwareInfo, PORT_COUNT, TOTAL_PINS};
pub use message::{BoardMessage, FirmataParseError, HostMessage, Level, PinMode};

use std::{
    io::{Read, Write},
    time::Duration,
};

pub type FirmataResult<T> = Result<T, FirmataError>;

/// A byte stream to a board running Firmata. The write half is used by the caller thread, an
/// independent read half is handed to the sampler thread.
pub trait FirmataHandle: Write + Send {
    type Reader: Read + Send + 'static;

    /// Timeout for a single read on the read half. Reads that time out must fail with
    /// [`std::io::ErrorKind::TimedOut`].
    fn set_timeout(&mut self, timeout: Duration) -> FirmataResult<()>;

    /// Returns a read half that can be moved into another thread
    fn try_clone_reader(&mut self) -> FirmataResult<Self::Reader>;

    fn send_message(&mut self, message: &HostMessage) -> FirmataResult<()> {
        log::trace!("Sending {message:?}");
        self.write_all(&Vec::from(message))?;
        self.flush()?;
        Ok(())
    }
}

impl FirmataHandle for Box<dyn serialport::SerialPort> {
    type Reader = Box<dyn serialport::SerialPort>;

    fn set_timeout(&mut self, timeout: Duration) -> FirmataResult<()> {
        serialport::SerialPort::set_timeout(self.as_mut(), timeout)?;
        Ok(())
    }

    fn try_clone_reader(&mut self) -> FirmataResult<Self::Reader> {
        Ok(self.try_clone()?)
    }
}

/// Opens the serial port a Firmata board is attached to
pub fn open_serial(
    port: &str,
    baudrate: u32,
    read_timeout: Duration,
) -> FirmataResult<Box<dyn serialport::SerialPort>> {
    serialport::new(port, baudrate)
        .timeout(read_timeout)
        .open()
        .map_err(|source| FirmataError::Open { port: port.to_owned(), source })
}

#[derive(Debug, thiserror::Error)]
pub enum FirmataError {
    /// The serial port could not be opened
    #[error("Could not open serial port {port}: {source}")]
    Open { port: String, source: serialport::Error },
    /// The board did not answer the version query in time
    #[error("Board did not report its version within {0:?}")]
    HandshakeTimeout(Duration),
    /// The byte stream ended
    #[error("Board connection closed")]
    Disconnected,
    #[error("Pin {0} is not configured as an output")]
    NotAnOutput(u8),
    #[error("Pin {0} is not configured as an input")]
    NotAnInput(u8),
    #[error("Pin {0} does not exist")]
    InvalidPin(u8),
    #[error(transparent)]
    Parse(#[from] FirmataParseError),
    #[error(transparent)]
    Serial(#[from] serialport::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
