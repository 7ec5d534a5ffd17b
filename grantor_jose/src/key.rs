//! RSA keys used to sign and verify assertions

use std::{fmt, sync::Arc};

use ring::{
    rand::SystemRandom,
    signature::{self, RsaKeyPair, UnparsedPublicKey},
};

use crate::{
    error::{self, KeyRejected},
    jws, Error,
};

/// An RSA private key capable of producing `RS256` signatures
///
/// The key material is held behind an [`Arc`], so clones are cheap and
/// share the same underlying key pair.
#[derive(Clone)]
#[must_use]
pub struct PrivateKey {
    key_pair: Arc<RsaKeyPair>,
}

impl PrivateKey {
    /// Parses an RSA private key
    ///
    /// The input may be PEM armored, in which case the first private key
    /// block is used, or raw DER. The DER content is tried as PKCS#8 first and then
    /// as PKCS#1.
    ///
    /// # Errors
    ///
    /// The key is not an RSA private key in any of the supported encodings.
    pub fn parse(key: impl AsRef<[u8]>) -> Result<Self, KeyRejected> {
        let key = key.as_ref();
        let der = match pem_contents(key)? {
            Some(der) => der,
            None => key.to_vec(),
        };

        let key_pair = RsaKeyPair::from_pkcs8(&der).or_else(|pkcs8| {
            RsaKeyPair::from_der(&der).map_err(|pkcs1| {
                error::key_rejected(format!(
                    "not an RSA private key (pkcs8: {}, pkcs1: {})",
                    pkcs8, pkcs1
                ))
            })
        })?;

        Ok(Self {
            key_pair: Arc::new(key_pair),
        })
    }

    /// Extracts the public half of the key pair
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            der: self.key_pair.public().as_ref().to_vec(),
        }
    }

    /// The size of signatures produced by this key, in bytes
    #[must_use]
    pub fn signature_len(&self) -> usize {
        self.key_pair.public().modulus_len()
    }
}

impl jws::Signer for PrivateKey {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let mut signature = vec![0; self.signature_len()];
        self.key_pair
            .sign(
                &signature::RSA_PKCS1_SHA256,
                &SystemRandom::new(),
                data,
                &mut signature,
            )
            .map_err(|_| Error::Signing)?;
        Ok(signature)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public_key", &self.public_key())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// An RSA public key in DER-encoded `RSAPublicKey` form
#[derive(Clone, PartialEq, Eq)]
#[must_use]
pub struct PublicKey {
    der: Vec<u8>,
}

impl PublicKey {
    /// Constructs a public key from a DER-encoded PKCS#1 `RSAPublicKey`
    pub fn from_der(der: impl Into<Vec<u8>>) -> Self {
        Self { der: der.into() }
    }

    /// The DER encoding of the key
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Verifies an `RS256` signature over `data`
    ///
    /// # Errors
    ///
    /// The signature was not produced by the matching private key.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), Error> {
        UnparsedPublicKey::new(&signature::RSA_PKCS1_2048_8192_SHA256, &self.der)
            .verify(data, signature)
            .map_err(|_| Error::SignatureMismatch)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("bits", &(self.der.len() * 8))
            .finish_non_exhaustive()
    }
}

/// Extracts the DER payload of the first private key block, if the input is PEM armored
///
/// Blocks with other labels, such as certificates bundled with the key, are
/// skipped.
fn pem_contents(input: &[u8]) -> Result<Option<Vec<u8>>, KeyRejected> {
    const BEGIN: &[u8] = b"-----BEGIN ";
    if !input.windows(BEGIN.len()).any(|w| w == BEGIN) {
        return Ok(None);
    }

    let blocks =
        pem::parse_many(input).map_err(|e| error::key_rejected(format!("invalid PEM: {}", e)))?;

    blocks
        .into_iter()
        .find(|block| block.tag().ends_with("PRIVATE KEY"))
        .map(|block| Some(block.into_contents()))
        .ok_or_else(|| error::key_rejected("no private key block in PEM input"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jws::Signer;

    const PKCS8_PEM: &str = include_str!("../data/rsa-pkcs8.pem");
    const PKCS1_PEM: &str = include_str!("../data/rsa-pkcs1.pem");
    const PKCS1_DER: &[u8] = include_bytes!("../data/rsa-pkcs1.der");
    const EC_PEM: &str = include_str!("../data/ec-pkcs8.pem");
    const CERT_PEM: &str = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";

    #[test]
    fn parses_pkcs8_pem() {
        let key = PrivateKey::parse(PKCS8_PEM).unwrap();
        assert_eq!(key.signature_len(), 256);
    }

    #[test]
    fn parses_pkcs1_pem() {
        let key = PrivateKey::parse(PKCS1_PEM).unwrap();
        assert_eq!(key.signature_len(), 256);
    }

    #[test]
    fn parses_pkcs1_der() {
        let key = PrivateKey::parse(PKCS1_DER).unwrap();
        assert_eq!(key.signature_len(), 256);
    }

    #[test]
    fn all_encodings_yield_the_same_key() {
        let pkcs8 = PrivateKey::parse(PKCS8_PEM).unwrap().public_key();
        let pkcs1 = PrivateKey::parse(PKCS1_PEM).unwrap().public_key();
        let der = PrivateKey::parse(PKCS1_DER).unwrap().public_key();

        assert_eq!(pkcs8, pkcs1);
        assert_eq!(pkcs1, der);
    }

    #[test]
    fn rejects_non_rsa_key() {
        let err = PrivateKey::parse(EC_PEM).unwrap_err();
        assert!(err.reason().contains("not an RSA private key"), "{}", err);
    }

    #[test]
    fn rejects_garbage() {
        assert!(PrivateKey::parse(b"definitely not a key").is_err());
    }

    #[test]
    fn rejects_unterminated_pem() {
        let truncated = &PKCS8_PEM[..PKCS8_PEM.len() / 2];
        let err = PrivateKey::parse(truncated).unwrap_err();
        assert!(err.reason().contains("PEM"), "{}", err);
    }

    #[test]
    fn skips_leading_text_and_other_blocks() {
        let bundle = format!("service account key\n{}{}", CERT_PEM, PKCS1_PEM);

        let key = PrivateKey::parse(bundle).unwrap();
        assert_eq!(key.public_key(), PrivateKey::parse(PKCS1_PEM).unwrap().public_key());
    }

    #[test]
    fn rejects_pem_without_private_key() {
        let err = PrivateKey::parse(CERT_PEM).unwrap_err();
        assert_eq!(err.reason(), "no private key block in PEM input");
    }

    #[test]
    fn signature_verifies_with_public_key() {
        let key = PrivateKey::parse(PKCS8_PEM).unwrap();
        let signature = key.sign(b"payload").unwrap();

        key.public_key().verify(b"payload", &signature).unwrap();
        assert!(matches!(
            key.public_key().verify(b"tampered", &signature),
            Err(Error::SignatureMismatch)
        ));
    }

    #[test]
    fn debug_does_not_leak_private_key() {
        let key = PrivateKey::parse(PKCS8_PEM).unwrap();
        let debug = format!("{:?}", key);
        assert!(debug.contains("<redacted>"));
        assert!(debug.contains("PublicKey"));
    }
}
