//! Interfaces to the smart card driver stack.
//!
//! The session never talks to a reader directly. A [`Driver`] establishes a [`Context`],
//! which enumerates readers and connects to a card, yielding a [`Connection`] for file access.
//! A connection may additionally bind the structured application directory on the card,
//! represented as an [`Application`].
//!
//! Everything here reports [`Error`]; it is translated into [`crate::Error`] by the session.

use std::fmt::{Display, Formatter};

use crate::backend::HashAlgorithm;

/// Error codes reported by the driver stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotSupported,
    ApplicationNotFound,
    OutOfMemory,
    CardNotPresent,
    CardRemoved,
    InvalidCard,
    NoReaders,
    InvalidArguments,
    FileNotFound,
    Transmit,
    SecurityStatusNotSatisfied,
    Internal,

    /// A driver specific code.
    Other(i32),
}

/// An error from the driver stack, with the driver's description of this very failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    code: ErrorCode,
    message: String,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// An absolute path of file identifiers from the MF, e.g. `3F002F02`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path(Vec<[u8; 2]>);

impl Path {
    /// Parses a path from its hex notation.
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| {
            Error::new(
                ErrorCode::InvalidArguments,
                format!("Invalid path {s:?}: {e}"),
            )
        })?;

        if bytes.is_empty() || bytes.len() % 2 != 0 {
            return Err(Error::new(
                ErrorCode::InvalidArguments,
                format!("Invalid path {s:?}: not a sequence of file identifiers"),
            ));
        }

        Ok(Self(bytes.chunks(2).map(|id| [id[0], id[1]]).collect()))
    }

    pub fn ids(&self) -> &[[u8; 2]] {
        &self.0
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for id in &self.0 {
            write!(f, "{:02X}{:02X}", id[0], id[1])?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    WorkingEf,
    InternalEf,
    Df,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EfStructure {
    Transparent,
    LinearFixed,
    LinearVariable,
    Cyclic,
    Unknown,
}

/// What the card reports about a selected file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub file_type: FileType,
    pub structure: EfStructure,
    pub size: usize,
}

/// Entry point of a driver stack.
pub trait Driver {
    type Context: Context;

    /// Establishes a context scoped to the application.
    fn establish_context(&self, app_name: &str, debug: bool) -> Result<Self::Context>;
}

/// A context to enumerate readers and connect to cards.
pub trait Context {
    type Connection: Connection;

    /// Number of readers known to the context.
    fn reader_count(&self) -> usize;

    /// Reports whether a card is physically present in the reader.
    fn detect_card_presence(&self, reader: usize) -> Result<bool>;

    fn connect(&mut self, reader: usize) -> Result<Self::Connection>;

    fn release(&mut self);
}

/// A connection to the card in one reader.
pub trait Connection {
    fn driver_name(&self) -> &str;

    /// Acquires exclusive access to the card.
    fn lock(&mut self) -> Result<()>;

    fn unlock(&mut self);

    fn disconnect(&mut self);

    fn select_file(&mut self, path: &Path) -> Result<FileInfo>;

    /// Reads at most `len` octets of the selected file from `offset`.
    fn read_binary(&mut self, offset: usize, len: usize) -> Result<Vec<u8>>;

    /// Binds the structured application directory of the card.
    /// Cards without one report [`ErrorCode::ApplicationNotFound`].
    fn bind_application(&mut self) -> Result<Box<dyn Application>>;
}

/// A private key object listed in the application directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateKey {
    pub id: Vec<u8>,
}

/// A structured application directory bound on the card.
pub trait Application {
    /// Serial number recorded in the token information, if any.
    fn serial_number(&self) -> Option<&str>;

    fn private_keys(&mut self) -> Result<Vec<PrivateKey>>;

    /// Reads the certificate with the ID, if there is one.
    fn certificate(&mut self, id: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Label of the PIN object protecting the key.
    fn pin_label(&mut self, key_id: &[u8]) -> Result<Option<String>>;

    fn verify_pin(&mut self, key_id: &[u8], pin: &str) -> Result<()>;

    fn compute_signature(
        &mut self,
        key_id: &[u8],
        hash: HashAlgorithm,
        digest: &[u8],
    ) -> Result<Vec<u8>>;

    fn decipher(&mut self, key_id: &[u8], data: &[u8]) -> Result<Vec<u8>>;

    fn unbind(&mut self);
}
