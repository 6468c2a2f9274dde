//! Simple TLV support.
//!
//! A simple TLV record is a one octet tag, a one octet length, then the value.
//! A length octet of `0xFF` is followed by the real length in two octets, big endian.

const EXTENDED_LENGTH: u8 = 0xFF;

/// A record found by [`find_simple_tlv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleTlv<'a> {
    /// The buffer from the first octet of the value up to the end of the input.
    pub rest: &'a [u8],

    /// The length declared by the record, which may exceed `rest`.
    pub length: usize,
}

impl<'a> SimpleTlv<'a> {
    /// The value, if the declared length fits in the buffer.
    pub fn value(&self) -> Option<&'a [u8]> {
        self.rest.get(..self.length)
    }
}

/// Locates the first record with the tag in the buffer.
///
/// The length of the matched record is not checked against the remaining buffer.
/// Callers must do it themselves, e.g. through [`SimpleTlv::value`].
pub fn find_simple_tlv(buffer: &[u8], tag: u8) -> Option<SimpleTlv<'_>> {
    let mut rest = buffer;

    loop {
        let (record_tag, length, tail) = match rest {
            [t, l, tail @ ..] => (*t, *l, tail),
            _ => return None,
        };

        let (length, tail) = match length {
            EXTENDED_LENGTH => match tail {
                [hi, lo, tail @ ..] => (u16::from_be_bytes([*hi, *lo]) as usize, tail),
                _ => return None,
            },
            l => (l as usize, tail),
        };

        if record_tag == tag {
            return Some(SimpleTlv { rest: tail, length });
        }

        rest = tail.get(length..)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_first_record() {
        let buf = [0x5A, 0x03, 0x01, 0x02, 0x03, 0x5F, 0x01, 0xAA];
        let tlv = find_simple_tlv(&buf, 0x5A).unwrap();

        assert_eq!(3, tlv.length);
        assert_eq!(Some(&[0x01, 0x02, 0x03][..]), tlv.value());
    }

    #[test]
    fn test_find_after_skipping() {
        let buf = [0x01, 0x02, 0xFF, 0xFF, 0x5A, 0x02, 0x12, 0x34];
        let tlv = find_simple_tlv(&buf, 0x5A).unwrap();

        assert_eq!(Some(&[0x12, 0x34][..]), tlv.value());
    }

    #[test]
    fn test_find_returns_first_match() {
        let buf = [0x5A, 0x01, 0x01, 0x5A, 0x01, 0x02];

        assert_eq!(Some(&[0x01][..]), find_simple_tlv(&buf, 0x5A).unwrap().value());
    }

    #[test]
    fn test_extended_length() {
        let mut buf = vec![0x01, 0xFF, 0x01, 0x00];
        buf.extend_from_slice(&[0xEE; 0x100]);
        buf.extend_from_slice(&[0x5A, 0xFF, 0x00, 0x02, 0xAB, 0xCD]);

        let tlv = find_simple_tlv(&buf, 0x5A).unwrap();

        assert_eq!(2, tlv.length);
        assert_eq!(Some(&[0xAB, 0xCD][..]), tlv.value());
    }

    #[test]
    fn test_tag_not_present() {
        let buf = [0x01, 0x01, 0x00, 0x02, 0x00];

        assert_eq!(None, find_simple_tlv(&buf, 0x5A));
        assert_eq!(None, find_simple_tlv(&[], 0x5A));
    }

    #[test]
    fn test_truncated_header() {
        assert_eq!(None, find_simple_tlv(&[0x5A], 0x5A));
        assert_eq!(None, find_simple_tlv(&[0x01, 0x00, 0x5A], 0x5A));
    }

    #[test]
    fn test_truncated_extended_length() {
        assert_eq!(None, find_simple_tlv(&[0x5A, 0xFF, 0x00], 0x5A));
        assert_eq!(None, find_simple_tlv(&[0x5A, 0xFF], 0x5A));
    }

    #[test]
    fn test_truncated_while_skipping() {
        // The first record claims 5 octets but only 3 follow.
        let buf = [0x01, 0x05, 0x5A, 0x01, 0x00];

        assert_eq!(None, find_simple_tlv(&buf, 0x5A));
    }

    #[test]
    fn test_matched_length_not_checked() {
        let buf = [0x5A, 0x0D, 0x01, 0x02];
        let tlv = find_simple_tlv(&buf, 0x5A).unwrap();

        assert_eq!(13, tlv.length);
        assert_eq!(&[0x01, 0x02], tlv.rest);
        assert_eq!(None, tlv.value());
    }
}
