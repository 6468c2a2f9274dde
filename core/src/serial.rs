//! Resolution of the card serial number (ICCSN).
//!
//! The serial is read from the GDO file and rendered as uppercase hex.
//! Serials that were synthesized rather than read verbatim carry the prefix `FF0100`;
//! organic serials that happen to start with `FF` are prefixed by `FF0000` so that
//! both remain distinguishable. Downstream code parses `[FF0000|FF0100]?<HEX>*`.

#[cfg(feature = "tracing")]
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::tlv::find_simple_tlv;
use crate::transport::{Connection, EfStructure, FileType, Path};

/// Path of the GDO file holding the ICCSN.
pub const GDO_PATH: &str = "3F002F02";

/// Work buffer ceiling for the GDO file; files of this size or larger are rejected.
pub const GDO_MAX_SIZE: usize = 256;

const ICCSN_TAG: u8 = 0x5A;

/// Placeholder serial of German signature cards, which is useless as an identity.
pub const PLACEHOLDER_SERIAL: &str = "D27600000000000000000000";

/// Prefix of serials synthesized from the application's token information.
pub const SYNTHETIC_PREFIX: &str = "FF0100";

/// Prefix of organic serials starting with `FF`.
pub const ESCAPE_PREFIX: &str = "FF0000";

// The BMI test cards declare 13 octets for their ICCSN but the GDO file holds only 12.
const BMI_TESTCARD_DECLARED_LENGTH: usize = 0x0D;

/// Extracts the ICCSN from the contents of the GDO file as uppercase hex.
pub fn find_iccsn(gdo: &[u8]) -> Result<String> {
    let tlv = find_simple_tlv(gdo, ICCSN_TAG).ok_or(Error::CardError)?;
    let remaining = tlv.rest.len();
    let mut length = tlv.length;

    if length > remaining {
        if length == BMI_TESTCARD_DECLARED_LENGTH && remaining + 1 == length {
            debug!("enabling BMI testcard workaround");
            length -= 1;
        } else {
            return Err(Error::CardError);
        }
    }

    if length == 0 {
        return Err(Error::CardError);
    }

    Ok(hex::encode_upper(&tlv.rest[..length]))
}

/// Applies the prefix convention to a serial read from the card.
///
/// `application_serial` is `Some` when a structured application is bound, carrying its own
/// serial number (empty when it reports none).
pub fn normalize(serial: String, application_serial: Option<&str>) -> String {
    match application_serial {
        Some(efser) if serial == PLACEHOLDER_SERIAL => format!("{SYNTHETIC_PREFIX}{efser}"),
        _ if serial.starts_with("FF") => format!("{ESCAPE_PREFIX}{serial}"),
        _ => serial,
    }
}

/// Reads the whole GDO file from the card.
pub(crate) fn read_gdo(conn: &mut dyn Connection) -> Result<Vec<u8>> {
    let path = Path::parse(GDO_PATH).map_err(|_| Error::CardError)?;

    let file = conn.select_file(&path).map_err(|e| {
        error!("select of the GDO file failed: {}", e);
        Error::CardError
    })?;

    if file.file_type != FileType::WorkingEf || file.structure != EfStructure::Transparent {
        error!("wrong type or structure of GDO file");
        return Err(Error::CardError);
    }

    if file.size == 0 || file.size >= GDO_MAX_SIZE {
        error!("unsupported size of GDO file ({})", file.size);
        return Err(Error::CardError);
    }

    let buf = conn.read_binary(0, file.size).map_err(|e| {
        error!("error reading GDO file: {}", e);
        Error::CardError
    })?;

    if buf.len() != file.size {
        error!("short read on GDO file");
        return Err(Error::CardError);
    }

    Ok(buf)
}

/// Reads the GDO file and resolves the normalized serial number.
pub(crate) fn resolve(
    conn: &mut dyn Connection,
    application_serial: Option<&str>,
) -> Result<String> {
    let gdo = read_gdo(conn)?;
    let serial = find_iccsn(&gdo).map_err(|e| {
        error!("invalid structure of GDO file");
        e
    })?;

    Ok(normalize(serial, application_serial))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_iccsn() {
        let gdo = [
            0x5A, 0x0A, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF, 0x00, 0x1F,
        ];

        let serial = find_iccsn(&gdo).unwrap();

        assert_eq!(20, serial.len());
        assert_eq!("0123456789ABCDEF001F", serial);
    }

    #[test]
    fn test_find_iccsn_after_other_records() {
        let gdo = [0x4F, 0x02, 0xAA, 0xBB, 0x5A, 0x02, 0xFF, 0x12];

        assert_eq!("FF12", find_iccsn(&gdo).unwrap());
    }

    #[test]
    fn test_find_iccsn_bmi_workaround() {
        let mut gdo = vec![0x5A, 0x0D];
        gdo.extend_from_slice(&[0x11; 12]);

        assert_eq!("11".repeat(12), find_iccsn(&gdo).unwrap());
    }

    #[test]
    fn test_find_iccsn_length_mismatch() {
        let mut gdo = vec![0x5A, 0x0D];
        gdo.extend_from_slice(&[0x11; 11]);
        assert_eq!(Err(Error::CardError), find_iccsn(&gdo));

        let mut gdo = vec![0x5A, 0x0C];
        gdo.extend_from_slice(&[0x11; 11]);
        assert_eq!(Err(Error::CardError), find_iccsn(&gdo));
    }

    #[test]
    fn test_find_iccsn_empty_value() {
        assert_eq!(Err(Error::CardError), find_iccsn(&[0x5A, 0x00]));
        assert_eq!(Err(Error::CardError), find_iccsn(&[0x5A, 0x00, 0x01]));
    }

    #[test]
    fn test_find_iccsn_missing_tag() {
        assert_eq!(Err(Error::CardError), find_iccsn(&[0x4F, 0x01, 0x00]));
        assert_eq!(Err(Error::CardError), find_iccsn(&[]));
    }

    #[test]
    fn test_normalize_placeholder() {
        assert_eq!(
            "FF0100ABC",
            normalize(PLACEHOLDER_SERIAL.to_owned(), Some("ABC"))
        );
        assert_eq!("FF0100", normalize(PLACEHOLDER_SERIAL.to_owned(), Some("")));
    }

    #[test]
    fn test_normalize_placeholder_without_application() {
        assert_eq!(
            PLACEHOLDER_SERIAL,
            normalize(PLACEHOLDER_SERIAL.to_owned(), None)
        );
    }

    #[test]
    fn test_normalize_escapes_ff() {
        assert_eq!("FF0000FF1234", normalize("FF1234".to_owned(), None));
        assert_eq!("FF0000FF1234", normalize("FF1234".to_owned(), Some("ABC")));
    }

    #[test]
    fn test_normalize_keeps_organic() {
        assert_eq!("D2760001", normalize("D2760001".to_owned(), Some("ABC")));
        assert_eq!("0F1234", normalize("0F1234".to_owned(), None));
    }
}
