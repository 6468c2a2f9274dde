//! Backend for cards with a PKCS#15 application directory.
//!
//! Keys and certificates are paired through their common ID. Key and certificate IDs are
//! exposed as `P15-5015.` followed by the hex encoded object ID.

#[cfg(feature = "tracing")]
use tracing::{debug, error};

use crate::backend::{
    Backend, CardIo, Decipher, EnumKeypairs, HashAlgorithm, Keypair, PinCallback, ReadCert, Sign,
};
use crate::error::{Error, Result};
use crate::keygrip;
use crate::transport::Application;

pub const ID_PREFIX: &str = "P15-5015.";

const DEFAULT_PIN_PROMPT: &str = "PIN";

pub struct P15Backend {
    app: Box<dyn Application>,
    released: bool,
}

impl P15Backend {
    pub fn new(app: Box<dyn Application>) -> Self {
        Self {
            app,
            released: false,
        }
    }

    fn verify_pin(&mut self, key_id: &[u8], pin: &mut dyn PinCallback) -> Result<()> {
        let label = self.app.pin_label(key_id).map_err(|e| {
            error!("failed to find the PIN object: {}", e);
            Error::from(e)
        })?;

        let pin = pin.pin(label.as_deref().unwrap_or(DEFAULT_PIN_PROMPT))?;

        self.app.verify_pin(key_id, &pin).map_err(|e| {
            error!("PIN verification failed: {}", e);
            Error::BadPin
        })
    }
}

/// Formats an object ID the way this backend exposes it.
pub fn format_id(id: &[u8]) -> String {
    format!("{ID_PREFIX}{}", hex::encode_upper(id))
}

/// Parses an ID formatted by [`format_id`].
pub fn parse_id(s: &str) -> Result<Vec<u8>> {
    match s.strip_prefix(ID_PREFIX) {
        Some(id) if !id.is_empty() => hex::decode(id).map_err(|_| Error::InvalidValue),
        _ => Err(Error::InvalidValue),
    }
}

impl Backend for P15Backend {
    fn name(&self) -> &'static str {
        "PKCS#15"
    }

    fn application(&self) -> Option<&dyn Application> {
        Some(self.app.as_ref())
    }

    fn keypairs(&mut self) -> Option<&mut dyn EnumKeypairs> {
        Some(self)
    }

    fn certificates(&mut self) -> Option<&mut dyn ReadCert> {
        Some(self)
    }

    fn signer(&mut self) -> Option<&mut dyn Sign> {
        Some(self)
    }

    fn decipherer(&mut self) -> Option<&mut dyn Decipher> {
        Some(self)
    }

    fn release(&mut self) {
        if !self.released {
            self.app.unbind();
            self.released = true;
        }
    }
}

impl EnumKeypairs for P15Backend {
    fn enum_keypairs(&mut self, io: CardIo<'_>, idx: usize) -> Result<Option<Keypair>> {
        let keys = self.app.private_keys().map_err(|e| {
            error!("private keys enumeration failed: {}", e);
            Error::from(e)
        })?;

        let key = match keys.get(idx) {
            Some(key) => key,
            None => return Ok(None),
        };

        let cert = match self.app.certificate(&key.id).map_err(|e| {
            error!("failed to read the certificate: {}", e);
            Error::from(e)
        })? {
            Some(cert) => cert,
            None => {
                debug!("no certificate for private key {}", hex::encode_upper(&key.id));
                return Err(Error::MissingCertificate);
            }
        };

        let keygrip = keygrip::from_certificate(io.certs, &cert).map_err(|e| {
            error!("can't calculate the keygrip of certificate {}", format_id(&key.id));
            e
        })?;

        Ok(Some(Keypair {
            keygrip,
            key_id: Some(format_id(&key.id)),
        }))
    }
}

impl ReadCert for P15Backend {
    fn read_cert(&mut self, _: CardIo<'_>, cert_id: &str) -> Result<Vec<u8>> {
        let id = parse_id(cert_id)?;

        match self.app.certificate(&id).map_err(|e| {
            error!("failed to read the certificate: {}", e);
            Error::from(e)
        })? {
            Some(cert) => Ok(cert),
            None => {
                error!("certificate {} not found", cert_id);
                Err(Error::CardError)
            }
        }
    }
}

impl Sign for P15Backend {
    fn sign(
        &mut self,
        _: CardIo<'_>,
        key_id: &str,
        hash: HashAlgorithm,
        pin: &mut dyn PinCallback,
        digest: &[u8],
    ) -> Result<Vec<u8>> {
        let id = parse_id(key_id)?;

        if !matches!(hash, HashAlgorithm::Sha1 | HashAlgorithm::Rmd160) {
            return Err(Error::UnsupportedAlgorithm);
        }

        if digest.len() != hash.digest_len() {
            error!(
                "digest of {} bytes does not match {} ({} bytes)",
                digest.len(),
                hash,
                hash.digest_len()
            );
            return Err(Error::InvalidValue);
        }

        self.verify_pin(&id, pin)?;

        self.app.compute_signature(&id, hash, digest).map_err(|e| {
            error!("failed to create signature: {}", e);
            Error::from(e)
        })
    }
}

impl Decipher for P15Backend {
    fn decipher(
        &mut self,
        _: CardIo<'_>,
        key_id: &str,
        pin: &mut dyn PinCallback,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let id = parse_id(key_id)?;

        self.verify_pin(&id, pin)?;

        self.app.decipher(&id, data).map_err(|e| {
            error!("failed to decipher the data: {}", e);
            Error::from(e)
        })
    }
}
