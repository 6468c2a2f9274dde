//! Backends implementing the card operations for one on-card data layout.
//!
//! A backend exposes each operation as an optional capability slot. A slot is either
//! present, and backed by a full implementation, or absent. The session binds exactly one
//! backend per card on first use: [`P15Backend`] when the card carries a structured
//! application directory, [`DinsigBackend`] otherwise.

pub mod dinsig;
pub mod p15;

pub use self::dinsig::DinsigBackend;
pub use self::p15::P15Backend;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[cfg(feature = "tracing")]
use tracing::warn;

use crate::error::{translate, Error, Result};
use crate::keygrip::{CertificateParser, Keygrip};
use crate::transport::{Application, Connection, EfStructure, ErrorCode, FileType, Path};

/// Hash algorithm of a digest to be signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Rmd160,
    Sha256,
}

impl HashAlgorithm {
    /// Length of the digests produced by the algorithm.
    pub fn digest_len(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 | Self::Rmd160 => 20,
            Self::Sha256 => 32,
        }
    }
}

impl Display for HashAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Rmd160 => "rmd160",
            Self::Sha256 => "sha256",
        })
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "rmd160" | "ripemd160" => Ok(Self::Rmd160),
            "sha256" => Ok(Self::Sha256),
            _ => Err(Error::UnsupportedAlgorithm),
        }
    }
}

/// A keypair found on the card.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Keypair {
    pub keygrip: Keygrip,

    /// Backend internal identifier of the key, without spaces.
    pub key_id: Option<String>,
}

/// Asks the cardholder for a PIN.
///
/// Backends call it synchronously while an operation is in progress, so it may block the
/// calling thread for as long as the cardholder takes.
pub trait PinCallback {
    fn pin(&mut self, prompt: &str) -> Result<String>;
}

impl<F> PinCallback for F
where
    F: FnMut(&str) -> Result<String>,
{
    fn pin(&mut self, prompt: &str) -> Result<String> {
        self(prompt)
    }
}

/// Access to the card lent to a backend for the duration of one operation.
pub struct CardIo<'a> {
    pub conn: &'a mut dyn Connection,
    pub certs: &'a dyn CertificateParser,
}

impl<'a> CardIo<'a> {
    /// Reads the entire transparent EF at the path.
    pub fn read_file(&mut self, path: &Path) -> Result<Vec<u8>> {
        let file = translate(self.conn.select_file(path))?;

        if file.file_type != FileType::WorkingEf
            || file.structure != EfStructure::Transparent
            || file.size == 0
        {
            return Err(Error::CardError);
        }

        let mut buf: Vec<u8> = Vec::with_capacity(file.size);
        while buf.len() < file.size {
            let fragment = translate(self.conn.read_binary(buf.len(), file.size - buf.len()))?;
            if fragment.is_empty() {
                break;
            }

            buf.extend_from_slice(&fragment);
        }

        match buf.len() == file.size {
            true => Ok(buf),
            _ => Err(Error::CardError),
        }
    }
}

pub trait EnumKeypairs {
    /// Returns the keypair at the index, or `None` when all keypairs have been enumerated.
    fn enum_keypairs(&mut self, io: CardIo<'_>, idx: usize) -> Result<Option<Keypair>>;
}

pub trait ReadCert {
    /// Reads the DER-encoded certificate identified by the backend defined ID.
    fn read_cert(&mut self, io: CardIo<'_>, cert_id: &str) -> Result<Vec<u8>>;
}

pub trait Sign {
    fn sign(
        &mut self,
        io: CardIo<'_>,
        key_id: &str,
        hash: HashAlgorithm,
        pin: &mut dyn PinCallback,
        digest: &[u8],
    ) -> Result<Vec<u8>>;
}

pub trait Decipher {
    fn decipher(
        &mut self,
        io: CardIo<'_>,
        key_id: &str,
        pin: &mut dyn PinCallback,
        data: &[u8],
    ) -> Result<Vec<u8>>;
}

/// The capability table of one on-card data layout.
pub trait Backend {
    fn name(&self) -> &'static str;

    /// The structured application bound by this backend, if any.
    fn application(&self) -> Option<&dyn Application> {
        None
    }

    fn keypairs(&mut self) -> Option<&mut dyn EnumKeypairs> {
        None
    }

    fn certificates(&mut self) -> Option<&mut dyn ReadCert> {
        None
    }

    fn signer(&mut self) -> Option<&mut dyn Sign> {
        None
    }

    fn decipherer(&mut self) -> Option<&mut dyn Decipher> {
        None
    }

    /// Releases everything the backend holds on the card.
    fn release(&mut self) {}
}

/// Figures out the layout of the card and binds the matching backend.
///
/// A card without a structured application falls back to [`DinsigBackend`]. So does a card
/// whose application fails to bind, which is logged as a recoverable error.
pub(crate) fn bind(conn: &mut dyn Connection, reader: usize) -> Box<dyn Backend> {
    match conn.bind_application() {
        Ok(app) => Box::new(P15Backend::new(app)),
        Err(e) => {
            if e.code() != ErrorCode::ApplicationNotFound {
                warn!(
                    "binding of existing PKCS-15 failed in reader {}: {}; using the fallback backend",
                    reader, e
                );
            }

            Box::new(DinsigBackend)
        }
    }
}
