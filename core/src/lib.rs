//! A crate to manage a session with a smart card and operate on its keys
//! without knowing which on-card application is present.
//!
//! A [`Session`] owns the transport context, the connection and the exclusive lock on one card.
//! On first use it binds a backend: the structured application directory when the card has one,
//! the minimal fallback backend otherwise. Keys, certificates, signing and decryption then go
//! through that backend for the rest of the session.

#[macro_use]
mod macros;

#[cfg(feature = "pcsc")]
pub mod pcsc;

#[cfg(feature = "x509")]
pub mod x509;

pub mod backend;
pub mod error;
pub mod keygrip;
pub mod serial;
pub mod session;
pub mod tlv;
pub mod transport;

pub use backend::{HashAlgorithm, Keypair, PinCallback};
pub use error::{Error, Result};
pub use keygrip::{CertificateParser, Keygrip};
pub use session::{Options, Session};
