//! PC/SC driver for scdcard.
//! Can be enabled by turning `pcsc` feature on.
//!
//! ## What is PC/SC?
//! PC/SC (Personal Computer/Smart Card) is an abstraction layer for communicating with Smart Cards
//! from Windows. Using this layer, applications can connect to any devices that supports PC/SC,
//! without depending on their driver implementation. Windows and macOS supports PC/SC by themselves,
//! Linux also supports by installing pcsc-lite shared library.
//!
//! ## Limitations
//! Files are selected by path from the MF and read with ISO 7816-4 commands.
//! This driver does not interpret application directories, so sessions opened through it
//! always use the fallback backend.
//!
//! ## Usage
//! ```rust,ignore
//! use scdcard::pcsc::PcscDriver;
//! use scdcard::x509::X509Parser;
//! use scdcard::{Options, Session};
//!
//! let mut session = Session::open(&PcscDriver, Box::new(X509Parser), Options::default()).unwrap();
//! let (serial, _) = session.serial_and_stamp().unwrap();
//! println!("{}", serial);
//! ```

use std::ffi::CString;
use std::time::Duration;

use apdu::Command;
use pcsc::{Card, Disposition, Protocols, ReaderState, Scope, ShareMode, State, MAX_BUFFER_SIZE};

#[cfg(feature = "tracing")]
use tracing::debug;

use crate::tlv::find_simple_tlv;
use crate::transport::{self, Application, EfStructure, ErrorCode, FileInfo, FileType, Path};

const CLA: u8 = 0x00;

const SELECT_INS: u8 = 0xA4;
const SELECT_P1_MF: u8 = 0x00;
const SELECT_P1_PATH: u8 = 0x08;
const SELECT_P2_FCP: u8 = 0x04;

const GET_RESPONSE_INS: u8 = 0xC0;

const MF: [u8; 2] = [0x3F, 0x00];

const FCP_TEMPLATE: u8 = 0x62;
const FCP_SIZE: u8 = 0x80;
const FCP_TOTAL_SIZE: u8 = 0x81;
const FCP_DESCRIPTOR: u8 = 0x82;

const MAX_READ: usize = 0xFF;

/// Highest offset READ BINARY addresses; bit 8 of P1 selects short EF addressing.
const MAX_OFFSET: usize = 0x7FFF;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Error occurred while communicating with PC/SC: {0}")]
    PcscError(#[from] pcsc::Error),

    #[error("The card returned an error ({0:#X}, {1:#X})")]
    Status(u8, u8),

    #[error("The card returned a malformed FCP template")]
    MalformedFcp,

    #[error("The connection to the card is closed")]
    Closed,

    #[error("Offset {0:#X} is out of range of READ BINARY")]
    OffsetOutOfRange(usize),
}

pub(crate) type Result<T> = std::result::Result<T, Error>;

impl From<Error> for transport::Error {
    fn from(e: Error) -> Self {
        let code = match &e {
            Error::PcscError(pcsc::Error::NoSmartcard) => ErrorCode::CardNotPresent,
            Error::PcscError(pcsc::Error::RemovedCard) => ErrorCode::CardRemoved,
            Error::PcscError(pcsc::Error::NoMemory) => ErrorCode::OutOfMemory,
            Error::PcscError(pcsc::Error::UnsupportedCard) => ErrorCode::InvalidCard,
            Error::PcscError(pcsc::Error::UnsupportedFeature) => ErrorCode::NotSupported,
            Error::PcscError(pcsc::Error::NoReadersAvailable) => ErrorCode::NoReaders,
            Error::PcscError(e) => ErrorCode::Other(*e as i32),
            Error::Status(0x6A, 0x82) => ErrorCode::FileNotFound,
            Error::Status(0x69, 0x82) => ErrorCode::SecurityStatusNotSatisfied,
            Error::Status(sw1, sw2) => ErrorCode::Other(u16::from_be_bytes([*sw1, *sw2]) as i32),
            Error::MalformedFcp => ErrorCode::InvalidCard,
            Error::Closed => ErrorCode::Internal,
            Error::OffsetOutOfRange(_) => ErrorCode::InvalidArguments,
        };

        transport::Error::new(code, e.to_string())
    }
}

/// Driver establishing PC/SC contexts in user scope.
pub struct PcscDriver;

impl transport::Driver for PcscDriver {
    type Context = PcscContext;

    fn establish_context(&self, app_name: &str, debug: bool) -> transport::Result<PcscContext> {
        debug!("Establishing PC/SC context for {}", app_name);

        let ctx = pcsc::Context::establish(Scope::User).map_err(Error::PcscError)?;
        let readers = match ctx.list_readers_owned() {
            Ok(readers) => readers,
            Err(pcsc::Error::NoReadersAvailable) => Vec::new(),
            Err(e) => return Err(Error::PcscError(e).into()),
        };

        for reader in &readers {
            debug!("Found reader: {}", reader.to_str().unwrap_or_default());
        }

        Ok(PcscContext {
            ctx: Some(ctx),
            readers,
            debug,
        })
    }
}

/// PC/SC context.
pub struct PcscContext {
    ctx: Option<pcsc::Context>,
    readers: Vec<CString>,
    debug: bool,
}

impl PcscContext {
    fn ctx(&self) -> Result<&pcsc::Context> {
        self.ctx.as_ref().ok_or(Error::Closed)
    }

    fn reader(&self, reader: usize) -> Result<&CString> {
        self.readers
            .get(reader)
            .ok_or(Error::PcscError(pcsc::Error::UnknownReader))
    }
}

impl transport::Context for PcscContext {
    type Connection = PcscConnection;

    fn reader_count(&self) -> usize {
        self.readers.len()
    }

    fn detect_card_presence(&self, reader: usize) -> transport::Result<bool> {
        let mut states = [ReaderState::new(self.reader(reader)?.clone(), State::UNAWARE)];

        self.ctx()?
            .get_status_change(Duration::ZERO, &mut states)
            .map_err(Error::PcscError)?;

        Ok(states[0].event_state().contains(State::PRESENT))
    }

    fn connect(&mut self, reader: usize) -> transport::Result<PcscConnection> {
        let name = self.reader(reader)?;
        let card = self
            .ctx()?
            .connect(name, ShareMode::Shared, Protocols::ANY)
            .map_err(Error::PcscError)?;

        debug!("Connected to the card in {}", name.to_str().unwrap_or_default());

        Ok(PcscConnection {
            card: Some(card),
            debug: self.debug,
        })
    }

    fn release(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            if let Err((_, e)) = ctx.release() {
                debug!("Failed to release the PC/SC context: {}", e);
            }
        }
    }
}

/// A card to be communicated through PC/SC.
pub struct PcscConnection {
    card: Option<Card>,
    debug: bool,
}

impl PcscConnection {
    fn card(&mut self) -> Result<&mut Card> {
        self.card.as_mut().ok_or(Error::Closed)
    }

    /// Transmits an APDU command to the card, then receives a response from them.
    pub fn transmit(&mut self, tx: &[u8]) -> Result<Vec<u8>> {
        let debug = self.debug;
        if debug {
            debug!("TX: {}", hex::encode(tx));
        }

        let mut rx = [0u8; MAX_BUFFER_SIZE];
        let rx = self.card()?.transmit(tx, &mut rx).map_err(Error::PcscError)?;

        if debug {
            debug!("RX: {}", hex::encode(rx));
        }

        Ok(Vec::from(rx))
    }

    /// Handles the command, collecting pending response data and checking the status word.
    fn handle(&mut self, command: Command) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        let mut rx = self.transmit(&Vec::from(command))?;

        loop {
            let (sw1, sw2) = match rx.len() {
                n if n >= 2 => (rx[n - 2], rx[n - 1]),
                _ => return Err(Error::Status(0x00, 0x00)),
            };
            rx.truncate(rx.len() - 2);
            payload.append(&mut rx);

            match (sw1, sw2) {
                (0x90, 0x00) | (0x91, 0x00) => return Ok(payload),
                // More response data is available, GET RESPONSE has no command data.
                (0x61, le) => rx = self.transmit(&[CLA, GET_RESPONSE_INS, 0x00, 0x00, le])?,
                (sw1, sw2) => return Err(Error::Status(sw1, sw2)),
            }
        }
    }
}

fn parse_fcp(response: &[u8]) -> Result<FileInfo> {
    let fcp = find_simple_tlv(response, FCP_TEMPLATE)
        .and_then(|tlv| tlv.value())
        .ok_or(Error::MalformedFcp)?;

    let size = find_simple_tlv(fcp, FCP_SIZE)
        .or_else(|| find_simple_tlv(fcp, FCP_TOTAL_SIZE))
        .and_then(|tlv| tlv.value())
        .filter(|size| !size.is_empty() && size.len() <= 4)
        .map(|size| size.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize))
        .unwrap_or(0);

    let descriptor = find_simple_tlv(fcp, FCP_DESCRIPTOR)
        .and_then(|tlv| tlv.value())
        .and_then(|value| value.first().copied())
        .ok_or(Error::MalformedFcp)?;

    let file_type = match (descriptor >> 3) & 0x07 {
        0 => FileType::WorkingEf,
        1 => FileType::InternalEf,
        7 => FileType::Df,
        _ => FileType::Unknown,
    };

    let structure = match file_type {
        FileType::WorkingEf | FileType::InternalEf => match descriptor & 0x07 {
            1 => EfStructure::Transparent,
            2 | 3 => EfStructure::LinearFixed,
            4 | 5 => EfStructure::LinearVariable,
            6 | 7 => EfStructure::Cyclic,
            _ => EfStructure::Unknown,
        },
        _ => EfStructure::Unknown,
    };

    Ok(FileInfo {
        file_type,
        structure,
        size,
    })
}

impl transport::Connection for PcscConnection {
    fn driver_name(&self) -> &str {
        "PC/SC"
    }

    fn lock(&mut self) -> transport::Result<()> {
        self.card()?
            .reconnect(ShareMode::Exclusive, Protocols::ANY, Disposition::LeaveCard)
            .map_err(|e| Error::PcscError(e).into())
    }

    fn unlock(&mut self) {
        if let Ok(card) = self.card() {
            if let Err(e) =
                card.reconnect(ShareMode::Shared, Protocols::ANY, Disposition::LeaveCard)
            {
                debug!("Failed to unlock the card: {}", e);
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(card) = self.card.take() {
            if let Err((_, e)) = card.disconnect(Disposition::LeaveCard) {
                debug!("Failed to disconnect the card: {}", e);
            }
        }
    }

    fn select_file(&mut self, path: &Path) -> transport::Result<FileInfo> {
        let (p1, ids) = match path.ids() {
            [MF] => (SELECT_P1_MF, &path.ids()[..]),
            [MF, rest @ ..] => (SELECT_P1_PATH, rest),
            ids => (SELECT_P1_PATH, ids),
        };

        let data: Vec<u8> = ids.iter().flatten().copied().collect();
        let response = self.handle(Command::new_with_payload_le(
            CLA,
            SELECT_INS,
            p1,
            SELECT_P2_FCP,
            0,
            &data,
        ))?;

        Ok(parse_fcp(&response)?)
    }

    fn read_binary(&mut self, offset: usize, len: usize) -> transport::Result<Vec<u8>> {
        let mut buf: Vec<u8> = Vec::new();

        while buf.len() < len {
            let [p1, p2] = read_position(offset + buf.len())?;
            let le = (len - buf.len()).min(MAX_READ) as u8;

            let mut fragment = self.handle(apdu::command::read_binary(p1, p2, le).into())?;
            let length = fragment.len();

            buf.append(&mut fragment);

            if length < le as usize {
                break;
            }
        }

        Ok(buf)
    }

    fn bind_application(&mut self) -> transport::Result<Box<dyn Application>> {
        Err(transport::Error::new(
            ErrorCode::ApplicationNotFound,
            "No application directory support in the PC/SC driver",
        ))
    }
}

fn read_position(offset: usize) -> Result<[u8; 2]> {
    match u16::try_from(offset) {
        Ok(pos) if offset <= MAX_OFFSET => Ok(pos.to_be_bytes()),
        _ => Err(Error::OffsetOutOfRange(offset)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fcp_transparent_ef() {
        let fcp = [
            0x62, 0x0B, 0x80, 0x02, 0x00, 0x0C, 0x82, 0x01, 0x01, 0x83, 0x02, 0x2F, 0x02,
        ];

        assert_eq!(
            FileInfo {
                file_type: FileType::WorkingEf,
                structure: EfStructure::Transparent,
                size: 12,
            },
            parse_fcp(&fcp).unwrap()
        );
    }

    #[test]
    fn test_parse_fcp_df() {
        let fcp = [0x62, 0x06, 0x82, 0x01, 0x38, 0x83, 0x01, 0xDF];
        let info = parse_fcp(&fcp).unwrap();

        assert_eq!(FileType::Df, info.file_type);
        assert_eq!(EfStructure::Unknown, info.structure);
        assert_eq!(0, info.size);
    }

    #[test]
    fn test_parse_fcp_malformed() {
        assert!(matches!(parse_fcp(&[0x6F, 0x00]), Err(Error::MalformedFcp)));
        assert!(matches!(
            parse_fcp(&[0x62, 0x04, 0x80, 0x02, 0x00, 0x0C]),
            Err(Error::MalformedFcp)
        ));
    }

    #[test]
    fn test_status_error_codes() {
        assert_eq!(
            ErrorCode::FileNotFound,
            transport::Error::from(Error::Status(0x6A, 0x82)).code()
        );
        assert_eq!(
            ErrorCode::CardRemoved,
            transport::Error::from(Error::PcscError(pcsc::Error::RemovedCard)).code()
        );
    }

    #[test]
    fn test_read_position() {
        assert_eq!([0x00, 0x00], read_position(0).unwrap());
        assert_eq!([0x01, 0x02], read_position(0x0102).unwrap());
        assert_eq!([0x7F, 0xFF], read_position(MAX_OFFSET).unwrap());
        assert!(matches!(
            read_position(0x8000),
            Err(Error::OffsetOutOfRange(0x8000))
        ));
        assert!(matches!(
            read_position(0x1_0000),
            Err(Error::OffsetOutOfRange(0x1_0000))
        ));
    }

    #[test]
    fn test_read_binary_rejects_high_offsets() {
        let mut conn = PcscConnection {
            card: None,
            debug: false,
        };

        let e = transport::Connection::read_binary(&mut conn, 0x8000, 4).unwrap_err();
        assert_eq!(ErrorCode::InvalidArguments, e.code());

        let e = transport::Connection::read_binary(&mut conn, 0x7FFE, 4).unwrap_err();
        assert_eq!(ErrorCode::Internal, e.code());
    }
}
