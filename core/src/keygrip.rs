//! Keygrips: fixed size fingerprints of public keys, independent of the key's container.

use std::fmt::{Debug, Display, Formatter};

use crate::error::{Error, Result};

pub const KEYGRIP_LEN: usize = 20;

/// A 20 octets fingerprint of a public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Keygrip([u8; KEYGRIP_LEN]);

impl Keygrip {
    pub fn new(bytes: [u8; KEYGRIP_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEYGRIP_LEN] {
        &self.0
    }

    /// Computes the keygrip of a public key given as a canonical S-expression,
    /// e.g. `(10:public-key(3:rsa(1:n3:...)(1:e1:...)))`.
    ///
    /// Only RSA keys are supported; their keygrip is the SHA-1 of the modulus octets.
    pub fn from_canon_sexp(sexp: &[u8]) -> Option<Self> {
        let (expr, rest) = Sexp::parse(sexp)?;
        if !rest.is_empty() {
            return None;
        }

        let key = match expr.list()? {
            [Sexp::Atom(b"public-key"), key] => key.list()?,
            _ => return None,
        };

        let (algo, params) = key.split_first()?;
        if algo.atom()? != b"rsa" {
            return None;
        }

        let n = params.iter().find_map(|param| match param.list()? {
            [Sexp::Atom(b"n"), Sexp::Atom(value)] => Some(*value),
            _ => None,
        })?;

        let digest = ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, n);
        let mut grip = [0u8; KEYGRIP_LEN];
        grip.copy_from_slice(digest.as_ref());

        Some(Self(grip))
    }
}

impl Display for Keygrip {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl Debug for Keygrip {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keygrip({self})")
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Keygrip {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// A parser to extract the public key from a certificate.
pub trait CertificateParser {
    /// Returns the public key of the DER-encoded certificate as a canonical S-expression.
    fn public_key(&self, cert: &[u8]) -> Option<Vec<u8>>;
}

/// Computes the keygrip of the key certified by the DER-encoded certificate.
pub fn from_certificate(parser: &dyn CertificateParser, cert: &[u8]) -> Result<Keygrip> {
    parser
        .public_key(cert)
        .and_then(|sexp| Keygrip::from_canon_sexp(&sexp))
        .ok_or(Error::CardError)
}

enum Sexp<'a> {
    Atom(&'a [u8]),
    List(Vec<Sexp<'a>>),
}

impl<'a> Sexp<'a> {
    fn parse(buf: &'a [u8]) -> Option<(Self, &'a [u8])> {
        match buf.split_first()? {
            (&b'(', mut rest) => {
                let mut items = Vec::new();
                loop {
                    if let Some((&b')', tail)) = rest.split_first() {
                        return Some((Self::List(items), tail));
                    }

                    let (item, tail) = Self::parse(rest)?;
                    items.push(item);
                    rest = tail;
                }
            }
            (&(b'0'..=b'9'), _) => {
                let colon = buf.iter().position(|&b| b == b':')?;
                let len: usize = std::str::from_utf8(&buf[..colon]).ok()?.parse().ok()?;
                let end = len.checked_add(colon + 1)?;
                let value = buf.get(colon + 1..end)?;

                Some((Self::Atom(value), &buf[end..]))
            }
            _ => None,
        }
    }

    fn atom(&self) -> Option<&'a [u8]> {
        match self {
            Self::Atom(value) => Some(*value),
            _ => None,
        }
    }

    fn list(&self) -> Option<&[Sexp<'a>]> {
        match self {
            Self::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }
}
