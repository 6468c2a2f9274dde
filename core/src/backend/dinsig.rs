//! Fallback backend for cards without an application directory.
//!
//! Assumes the DINSIG layout: a single keypair whose certificate lives in EF `C000`
//! beneath DF `DF01`. The card can not be used for signing or deciphering through it.

#[cfg(feature = "tracing")]
use tracing::error;

use crate::backend::{Backend, CardIo, EnumKeypairs, Keypair, ReadCert};
use crate::error::{Error, Result};
use crate::keygrip;
use crate::transport::Path;

/// The only certificate ID known to this backend, also used as the ID of its key.
pub const CERT_ID: &str = "DINSIG-DF01.C000";

const CERT_PATH: &str = "3F00DF01C000";

pub struct DinsigBackend;

impl DinsigBackend {
    fn read_certificate(io: &mut CardIo<'_>) -> Result<Vec<u8>> {
        let path = Path::parse(CERT_PATH).map_err(|_| Error::CardError)?;

        io.read_file(&path).map_err(|e| {
            error!("failed to read the certificate file {}: {}", path, e);
            e
        })
    }
}

impl Backend for DinsigBackend {
    fn name(&self) -> &'static str {
        "DINSIG"
    }

    fn keypairs(&mut self) -> Option<&mut dyn EnumKeypairs> {
        Some(self)
    }

    fn certificates(&mut self) -> Option<&mut dyn ReadCert> {
        Some(self)
    }
}

impl EnumKeypairs for DinsigBackend {
    fn enum_keypairs(&mut self, mut io: CardIo<'_>, idx: usize) -> Result<Option<Keypair>> {
        if idx > 0 {
            return Ok(None);
        }

        let cert = Self::read_certificate(&mut io)?;
        let keygrip = keygrip::from_certificate(io.certs, &cert).map_err(|e| {
            error!("can't calculate the keygrip of certificate {}", CERT_ID);
            e
        })?;

        Ok(Some(Keypair {
            keygrip,
            key_id: Some(CERT_ID.to_owned()),
        }))
    }
}

impl ReadCert for DinsigBackend {
    fn read_cert(&mut self, mut io: CardIo<'_>, cert_id: &str) -> Result<Vec<u8>> {
        if cert_id != CERT_ID {
            return Err(Error::InvalidValue);
        }

        Self::read_certificate(&mut io)
    }
}
