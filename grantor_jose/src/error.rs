//! Common errors

use thiserror::Error;

/// A private key could not be used for signing
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("private key rejected: {reason}")]
pub struct KeyRejected {
    reason: String,
}

impl KeyRejected {
    /// Describes why the key was rejected
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[inline]
pub(crate) fn key_rejected(reason: impl Into<String>) -> KeyRejected {
    KeyRejected {
        reason: reason.into(),
    }
}

/// An error while producing or consuming a JSON Web Signature
#[derive(Debug, Error)]
pub enum Error {
    /// The key could not be parsed as an RSA private key
    #[error(transparent)]
    KeyRejected(#[from] KeyRejected),

    /// The value is not a compact serialization of three dot-separated segments
    #[error("malformed JWS compact serialization")]
    Malformed,

    /// A segment was not valid unpadded base64url
    #[error("malformed JWS segment")]
    Base64(#[from] base64::DecodeError),

    /// The header or claims could not be (de)serialized
    #[error("invalid JWS JSON content")]
    Json(#[from] serde_json::Error),

    /// The claim set would expire before it was issued
    #[error("claim set expires before it was issued")]
    ExpiresBeforeIssued,

    /// The signer was unable to produce a signature
    #[error("unable to produce signature")]
    Signing,

    /// The signature does not match the signed content
    #[error("signature mismatch")]
    SignatureMismatch,
}
