//! Proof Key for Code Exchange (RFC 7636)

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;

use crate::Error;

/// The characters a code verifier may contain
const UNRESERVED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

const GENERATED_LEN: usize = 64;
const MIN_LEN: usize = 43;
const MAX_LEN: usize = 128;

/// A PKCE code verifier
///
/// The verifier is a secret; `Debug` does not reveal it.
#[derive(Clone, PartialEq, Eq)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Generates a random 64-character verifier
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let verifier = (0..GENERATED_LEN)
            .map(|_| char::from(UNRESERVED[rng.gen_range(0..UNRESERVED.len())]))
            .collect();
        Self(verifier)
    }

    /// Wraps an existing verifier
    ///
    /// # Errors
    ///
    /// The verifier is not between 43 and 128 unreserved characters long.
    pub fn new(verifier: impl Into<String>) -> Result<Self, Error> {
        let verifier = verifier.into();
        if !(MIN_LEN..=MAX_LEN).contains(&verifier.len()) {
            return Err(Error::config(format!(
                "PKCE verifier must be between {} and {} characters, got {}",
                MIN_LEN,
                MAX_LEN,
                verifier.len()
            )));
        }
        if !verifier.bytes().all(|b| UNRESERVED.contains(&b)) {
            return Err(Error::config(
                "PKCE verifier may only contain unreserved URL characters",
            ));
        }
        Ok(Self(verifier))
    }

    /// The verifier, as sent in the `code_verifier` parameter
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `S256` code challenge: the unpadded base64url SHA-256 digest of the verifier
    pub fn s256_challenge(&self) -> String {
        let digest = ring::digest::digest(&ring::digest::SHA256, self.0.as_bytes());
        URL_SAFE_NO_PAD.encode(digest.as_ref())
    }
}

impl fmt::Debug for PkceVerifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("PkceVerifier(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_verifier_uses_unreserved_alphabet() {
        let verifier = PkceVerifier::generate();
        assert_eq!(verifier.as_str().len(), 64);
        assert!(verifier.as_str().bytes().all(|b| UNRESERVED.contains(&b)));
        assert_ne!(verifier, PkceVerifier::generate());
    }

    #[test]
    fn alphabet_has_sixty_six_characters() {
        assert_eq!(UNRESERVED.len(), 66);
    }

    #[test]
    fn s256_challenge_matches_rfc_example() {
        let verifier = PkceVerifier::new("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk").unwrap();
        assert_eq!(
            verifier.s256_challenge(),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn rejects_short_and_long_verifiers() {
        assert!(PkceVerifier::new("a".repeat(42)).is_err());
        assert!(PkceVerifier::new("a".repeat(43)).is_ok());
        assert!(PkceVerifier::new("a".repeat(128)).is_ok());
        assert!(PkceVerifier::new("a".repeat(129)).is_err());
    }

    #[test]
    fn rejects_reserved_characters() {
        let err = PkceVerifier::new(format!("{}+", "a".repeat(50))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn debug_hides_verifier() {
        let verifier = PkceVerifier::generate();
        assert_eq!(format!("{:?}", verifier), "PkceVerifier(***)");
    }
}
