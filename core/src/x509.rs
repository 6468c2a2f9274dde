//! X.509 certificate support, to compute keygrips of certified keys.
//! Can be enabled by turning `x509` feature on.

use der::asn1::UintRef;
use der::{Decode, Sequence};
use x509_certificate::{KeyAlgorithm, X509Certificate};

use crate::keygrip::CertificateParser;

/// PKCS#1 RSA public key.
#[derive(Sequence)]
struct RsaPublicKey<'a> {
    modulus: UintRef<'a>,
    public_exponent: UintRef<'a>,
}

/// Parses DER-encoded X.509 certificates. Only RSA keys are supported.
#[derive(Debug, Default, Clone, Copy)]
pub struct X509Parser;

impl CertificateParser for X509Parser {
    fn public_key(&self, cert: &[u8]) -> Option<Vec<u8>> {
        let x509 = X509Certificate::from_der(cert).ok()?;

        if !matches!(x509.key_algorithm(), Some(KeyAlgorithm::Rsa)) {
            return None;
        }

        let data = x509.public_key_data();
        let key = RsaPublicKey::from_der(data.as_ref()).ok()?;

        Some(rsa_public_key_sexp(
            key.modulus.as_bytes(),
            key.public_exponent.as_bytes(),
        ))
    }
}

/// Renders an RSA public key as a canonical S-expression.
/// Integers are written as unsigned MPIs, padded with a zero octet when their high bit is set.
fn rsa_public_key_sexp(n: &[u8], e: &[u8]) -> Vec<u8> {
    let mut sexp = b"(10:public-key(3:rsa".to_vec();

    for (name, value) in [(b'n', n), (b'e', e)] {
        let mpi = match value.first() {
            Some(b) if b & 0x80 != 0 => [&[0u8][..], value].concat(),
            _ => value.to_vec(),
        };

        sexp.extend_from_slice(format!("(1:{}{}:", name as char, mpi.len()).as_bytes());
        sexp.extend_from_slice(&mpi);
        sexp.push(b')');
    }

    sexp.extend_from_slice(b"))");
    sexp
}
