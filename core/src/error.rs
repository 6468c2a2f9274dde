//! Errors reported by card sessions, and the translation from transport errors.

use crate::transport;
use crate::transport::ErrorCode;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Out of core")]
    OutOfMemory,

    #[error("Card not present")]
    CardNotPresent,

    #[error("Card removed")]
    CardRemoved,

    #[error("Invalid card")]
    InvalidCard,

    /// No structured application directory was found on the card.
    #[error("No PKCS15 application")]
    NoApplication,

    #[error("Not supported")]
    NotSupported,

    /// Generic failure on the transport, or a badly encoded card object.
    #[error("Card error")]
    CardError,

    #[error("Invalid value")]
    InvalidValue,

    #[error("Invalid index")]
    InvalidIndex,

    /// An operation was attempted before a backend has been bound.
    #[error("Card not initialized")]
    NotInitialized,

    /// The bound backend does not provide the operation.
    #[error("Unsupported operation")]
    UnsupportedOperation,

    /// A private key exists but no certificate is paired with it.
    /// Enumeration may continue with the next index.
    #[error("Missing certificate")]
    MissingCertificate,

    #[error("Unsupported algorithm")]
    UnsupportedAlgorithm,

    #[error("Bad PIN")]
    BadPin,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Maps a transport error code onto the application's taxonomy.
    /// Codes without a counterpart collapse to [`Error::CardError`].
    pub fn from_code(code: ErrorCode) -> Self {
        match code {
            ErrorCode::NotSupported => Self::NotSupported,
            ErrorCode::ApplicationNotFound => Self::NoApplication,
            ErrorCode::OutOfMemory => Self::OutOfMemory,
            ErrorCode::CardNotPresent => Self::CardNotPresent,
            ErrorCode::CardRemoved => Self::CardRemoved,
            ErrorCode::InvalidCard => Self::InvalidCard,
            _ => Self::CardError,
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::from_code(e.code())
    }
}

/// Translates a transport result at the boundary, keeping success as it is.
pub(crate) fn translate<T>(result: std::result::Result<T, transport::Error>) -> Result<T> {
    result.map_err(Error::from)
}

/// Describes the outcome of an operation for the verbose log line.
pub(crate) fn describe<T>(result: &Result<T>) -> String {
    match result {
        Ok(_) => "Success".to_owned(),
        Err(e) => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code_fixed_table() {
        assert_eq!(Error::NotSupported, Error::from_code(ErrorCode::NotSupported));
        assert_eq!(
            Error::NoApplication,
            Error::from_code(ErrorCode::ApplicationNotFound)
        );
        assert_eq!(Error::OutOfMemory, Error::from_code(ErrorCode::OutOfMemory));
        assert_eq!(
            Error::CardNotPresent,
            Error::from_code(ErrorCode::CardNotPresent)
        );
        assert_eq!(Error::CardRemoved, Error::from_code(ErrorCode::CardRemoved));
        assert_eq!(Error::InvalidCard, Error::from_code(ErrorCode::InvalidCard));
    }

    #[test]
    fn test_from_code_collapses_unknown() {
        for code in [
            ErrorCode::NoReaders,
            ErrorCode::InvalidArguments,
            ErrorCode::FileNotFound,
            ErrorCode::Transmit,
            ErrorCode::SecurityStatusNotSatisfied,
            ErrorCode::Internal,
            ErrorCode::Other(-1),
            ErrorCode::Other(i32::MIN),
        ] {
            assert_eq!(Error::CardError, Error::from_code(code));
        }
    }

    #[test]
    fn test_translate_keeps_success() {
        assert_eq!(Ok(7), translate(Ok(7)));
        assert_eq!(
            Err(Error::CardRemoved),
            translate::<()>(Err(transport::Error::new(
                ErrorCode::CardRemoved,
                "Card was removed"
            )))
        );
    }

    #[test]
    fn test_describe() {
        assert_eq!("Success", describe(&Ok(())));
        assert_eq!("Missing certificate", describe::<()>(&Err(Error::MissingCertificate)));
    }
}
