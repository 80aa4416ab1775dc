use std::io::Read;

/// Firmata command bytes. Bytes below 0xF0 carry a port or pin number in their lower nibble.
#[derive(Clone, Copy, Debug, strum::FromRepr)]
#[repr(u8)]
enum Command {
    DigitalMessage = 0x90,
    ReportAnalog = 0xC0,
    ReportDigital = 0xD0,
    AnalogMessage = 0xE0,
    StartSysex = 0xF0,
    SetPinMode = 0xF4,
    EndSysex = 0xF7,
    ReportVersion = 0xF9,
    SystemReset = 0xFF,
}

impl Command {
    /// Splits a status byte into its command and the channel (port or pin) it addresses
    fn split(byte: u8) -> Option<(Self, u8)> {
        if byte < 0xF0 {
            Self::from_repr(byte & 0xF0).map(|c| (c, byte & 0x0F))
        } else {
            Self::from_repr(byte).map(|c| (c, 0))
        }
    }
}

const REPORT_FIRMWARE: u8 = 0x79;

/// Electrical level of a digital pin
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub const fn is_high(self) -> bool {
        matches!(self, Level::High)
    }
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        if value {
            Level::High
        } else {
            Level::Low
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::FromRepr, strum::Display)]
#[repr(u8)]
pub enum PinMode {
    Input = 0x00,
    Output = 0x01,
    Analog = 0x02,
    Pwm = 0x03,
    Servo = 0x04,
    Shift = 0x05,
    I2c = 0x06,
    OneWire = 0x07,
    Stepper = 0x08,
    Encoder = 0x09,
    Serial = 0x0A,
    InputPullup = 0x0B,
}

impl PinMode {
    /// Modes for which the board reports digital levels back to the host
    pub const fn is_digital_input(self) -> bool {
        matches!(self, PinMode::Input | PinMode::InputPullup)
    }
}

/// Messages sent from the host to the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMessage {
    SetPinMode { pin: u8, mode: PinMode },
    /// Sets the output levels of all 8 pins of a port at once
    DigitalPort { port: u8, mask: u8 },
    ReportDigital { port: u8, enable: bool },
    ReportAnalog { pin: u8, enable: bool },
    QueryVersion,
    QueryFirmware,
    Sysex { command: u8, payload: Vec<u8> },
    SystemReset,
}

/// Messages sent from the board to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardMessage {
    /// Levels of all 8 pins of a port, bit n is pin `port * 8 + n`
    DigitalPort { port: u8, mask: u8 },
    AnalogValue { pin: u8, value: u16 },
    ReportVersion { major: u8, minor: u8 },
    Firmware { major: u8, minor: u8, name: String },
    Sysex { command: u8, payload: Vec<u8> },
}

#[derive(Debug, thiserror::Error)]
pub enum FirmataParseError {
    #[error("Expected a command byte, got data byte {0:#04x}")]
    UnexpectedDataByte(u8),
    /// A message ended early. The command byte starts the next message and has to be passed to
    /// [`BoardMessage::try_from_status`] to keep that message.
    #[error("Expected a data byte, got command byte {0:#04x}")]
    UnexpectedCommandByte(u8),
    #[error("Unknown command {0:#04x}")]
    UnknownCommand(u8),
    #[error("Invalid pin mode {0:#04x}")]
    InvalidPinMode(u8),
    #[error("Sysex message exceeds {} bytes", MAXIMUM_SYSEX_LENGTH)]
    SysexTooLong,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub const MAXIMUM_SYSEX_LENGTH: usize = 1024;

impl HostMessage {
    pub fn serialize(&self) -> Vec<u8> {
        Vec::from(self)
    }

    pub fn try_from_read(reader: &mut (impl Read + ?Sized)) -> Result<Self, FirmataParseError> {
        let status = read_byte(reader)?;
        let (command, channel) = split_status(status)?;

        let message = match command {
            Command::DigitalMessage => {
                HostMessage::DigitalPort { port: channel, mask: read_port_mask(reader)? }
            }
            Command::ReportDigital => {
                HostMessage::ReportDigital { port: channel, enable: read_data_byte(reader)? != 0 }
            }
            Command::ReportAnalog => {
                HostMessage::ReportAnalog { pin: channel, enable: read_data_byte(reader)? != 0 }
            }
            Command::SetPinMode => {
                let pin = read_data_byte(reader)?;
                let mode = read_data_byte(reader)?;
                let mode = PinMode::from_repr(mode).ok_or(FirmataParseError::InvalidPinMode(mode))?;
                HostMessage::SetPinMode { pin, mode }
            }
            Command::ReportVersion => HostMessage::QueryVersion,
            Command::SystemReset => HostMessage::SystemReset,
            Command::StartSysex => match read_sysex(reader)? {
                (REPORT_FIRMWARE, payload) if payload.is_empty() => HostMessage::QueryFirmware,
                (command, payload) => HostMessage::Sysex { command, payload },
            },
            Command::AnalogMessage | Command::EndSysex => {
                return Err(FirmataParseError::UnknownCommand(status))
            }
        };

        Ok(message)
    }
}

impl From<&HostMessage> for Vec<u8> {
    fn from(value: &HostMessage) -> Self {
        match value {
            HostMessage::SetPinMode { pin, mode } => {
                vec![Command::SetPinMode as u8, pin & 0x7F, *mode as u8]
            }
            HostMessage::DigitalPort { port, mask } => {
                vec![Command::DigitalMessage as u8 | (port & 0x0F), mask & 0x7F, mask >> 7]
            }
            HostMessage::ReportDigital { port, enable } => {
                vec![Command::ReportDigital as u8 | (port & 0x0F), u8::from(*enable)]
            }
            HostMessage::ReportAnalog { pin, enable } => {
                vec![Command::ReportAnalog as u8 | (pin & 0x0F), u8::from(*enable)]
            }
            HostMessage::QueryVersion => vec![Command::ReportVersion as u8],
            HostMessage::QueryFirmware => {
                vec![Command::StartSysex as u8, REPORT_FIRMWARE, Command::EndSysex as u8]
            }
            HostMessage::Sysex { command, payload } => sysex(*command, payload),
            HostMessage::SystemReset => vec![Command::SystemReset as u8],
        }
    }
}

impl TryFrom<Vec<u8>> for HostMessage {
    type Error = FirmataParseError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        Self::try_from_read(&mut std::io::Cursor::new(value))
    }
}

impl BoardMessage {
    pub fn serialize(&self) -> Vec<u8> {
        Vec::from(self)
    }

    pub fn try_from_read(reader: &mut (impl Read + ?Sized)) -> Result<Self, FirmataParseError> {
        let status = read_byte(reader)?;
        Self::try_from_status(status, reader)
    }

    /// Parses a message whose status byte has already been read from `reader`
    pub fn try_from_status(
        status: u8,
        reader: &mut (impl Read + ?Sized),
    ) -> Result<Self, FirmataParseError> {
        let (command, channel) = split_status(status)?;

        let message = match command {
            Command::DigitalMessage => {
                BoardMessage::DigitalPort { port: channel, mask: read_port_mask(reader)? }
            }
            Command::AnalogMessage => {
                BoardMessage::AnalogValue { pin: channel, value: read_u14(reader)? }
            }
            Command::ReportVersion => {
                let major = read_data_byte(reader)?;
                let minor = read_data_byte(reader)?;
                BoardMessage::ReportVersion { major, minor }
            }
            Command::StartSysex => match read_sysex(reader)? {
                (REPORT_FIRMWARE, payload) if payload.len() >= 2 => {
                    let name = payload[2..]
                        .chunks(2)
                        .map(|pair| {
                            let msb = pair.get(1).copied().unwrap_or(0);
                            char::from_u32(u32::from(pair[0]) | (u32::from(msb) << 7))
                                .unwrap_or(char::REPLACEMENT_CHARACTER)
                        })
                        .collect();
                    BoardMessage::Firmware { major: payload[0], minor: payload[1], name }
                }
                (command, payload) => BoardMessage::Sysex { command, payload },
            },
            Command::ReportDigital
            | Command::ReportAnalog
            | Command::SetPinMode
            | Command::EndSysex
            | Command::SystemReset => return Err(FirmataParseError::UnknownCommand(status)),
        };

        Ok(message)
    }
}

impl From<&BoardMessage> for Vec<u8> {
    fn from(value: &BoardMessage) -> Self {
        match value {
            BoardMessage::DigitalPort { port, mask } => {
                vec![Command::DigitalMessage as u8 | (port & 0x0F), mask & 0x7F, mask >> 7]
            }
            BoardMessage::AnalogValue { pin, value } => vec![
                Command::AnalogMessage as u8 | (pin & 0x0F),
                (value & 0x7F) as u8,
                ((value >> 7) & 0x7F) as u8,
            ],
            BoardMessage::ReportVersion { major, minor } => {
                vec![Command::ReportVersion as u8, major & 0x7F, minor & 0x7F]
            }
            BoardMessage::Firmware { major, minor, name } => {
                let mut payload = vec![major & 0x7F, minor & 0x7F];
                for c in name.chars() {
                    let c = c as u32;
                    payload.push((c & 0x7F) as u8);
                    payload.push(((c >> 7) & 0x7F) as u8);
                }
                sysex(REPORT_FIRMWARE, &payload)
            }
            BoardMessage::Sysex { command, payload } => sysex(*command, payload),
        }
    }
}

impl TryFrom<Vec<u8>> for BoardMessage {
    type Error = FirmataParseError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        Self::try_from_read(&mut std::io::Cursor::new(value))
    }
}

fn sysex(command: u8, payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(payload.len() + 3);
    v.push(Command::StartSysex as u8);
    v.push(command & 0x7F);
    v.extend(payload.iter().map(|b| b & 0x7F));
    v.push(Command::EndSysex as u8);
    v
}

fn split_status(status: u8) -> Result<(Command, u8), FirmataParseError> {
    if status & 0x80 == 0 {
        return Err(FirmataParseError::UnexpectedDataByte(status));
    }
    Command::split(status).ok_or(FirmataParseError::UnknownCommand(status))
}

fn read_byte(reader: &mut (impl Read + ?Sized)) -> Result<u8, FirmataParseError> {
    let mut buffer = [0; 1];
    reader.read_exact(&mut buffer)?;
    Ok(buffer[0])
}

fn read_data_byte(reader: &mut (impl Read + ?Sized)) -> Result<u8, FirmataParseError> {
    let byte = read_byte(reader)?;
    if byte & 0x80 != 0 {
        return Err(FirmataParseError::UnexpectedCommandByte(byte));
    }
    Ok(byte)
}

fn read_u14(reader: &mut (impl Read + ?Sized)) -> Result<u16, FirmataParseError> {
    let lsb = read_data_byte(reader)?;
    let msb = read_data_byte(reader)?;
    Ok(u16::from(lsb) | (u16::from(msb) << 7))
}

fn read_port_mask(reader: &mut (impl Read + ?Sized)) -> Result<u8, FirmataParseError> {
    Ok((read_u14(reader)? & 0xFF) as u8)
}

fn read_sysex(reader: &mut (impl Read + ?Sized)) -> Result<(u8, Vec<u8>), FirmataParseError> {
    let command = read_data_byte(reader)?;
    let mut payload = Vec::new();
    loop {
        let byte = read_byte(reader)?;
        if byte == Command::EndSysex as u8 {
            return Ok((command, payload));
        }
        if byte & 0x80 != 0 {
            return Err(FirmataParseError::UnexpectedCommandByte(byte));
        }
        if payload.len() == MAXIMUM_SYSEX_LENGTH {
            return Err(FirmataParseError::SysexTooLong);
        }
        payload.push(byte);
    }
}
