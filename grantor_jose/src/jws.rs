//! Implementations of the JSON Web Signature (JWS) compact serialization
//!
//! Only the `RS256` algorithm is produced. The specifications for this
//! standard can be found in [RFC7515][].
//!
//! [RFC7515]: https://tools.ietf.org/html/rfc7515

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, PublicKey};

/// The RSASSA-PKCS1-v1_5 using SHA-256 algorithm identifier
pub const RS256: &str = "RS256";

/// Issue times default to this many seconds in the past to tolerate clock skew
const ISSUED_AT_SKEW: i64 = 10;

/// Default lifetime of a claim set without an explicit expiry, in seconds
const DEFAULT_LIFETIME: i64 = 3600;

/// A JWS signer
pub trait Signer {
    /// Signs `data`, returning the raw signature bytes
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error>;
}

impl<S: Signer + ?Sized> Signer for &'_ S {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        (**self).sign(data)
    }
}

/// The protected header of a JWS
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// The signing algorithm
    #[serde(rename = "alg")]
    pub algorithm: String,

    /// The media type of the complete JWS
    #[serde(rename = "typ", default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// A hint identifying the signing key
    #[serde(rename = "kid", default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

impl Header {
    /// A `{"alg":"RS256","typ":"JWT"}` header
    pub fn rs256() -> Self {
        Self {
            algorithm: RS256.to_owned(),
            token_type: Some("JWT".to_owned()),
            key_id: None,
        }
    }

    /// Attaches a key identifier to the header
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }
}

/// The claims carried by a JWT assertion or ID token
///
/// Registered claims have dedicated fields. Any other claims are kept in
/// [`private_claims`][Self::private_claims]; these are merged into the
/// top-level JSON object when encoding, and unknown claims are collected
/// there when decoding.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimSet {
    /// Issuer
    #[serde(default)]
    pub iss: String,

    /// Space-delimited list of requested scopes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,

    /// Intended audience
    #[serde(default)]
    pub aud: String,

    /// Expiration time, in seconds since the Unix epoch
    #[serde(default)]
    pub exp: i64,

    /// Issue time, in seconds since the Unix epoch
    #[serde(default)]
    pub iat: i64,

    /// Token type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,

    /// Subject, the principal being impersonated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Legacy name for the subject, sent alongside `sub` for older authorities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prn: Option<String>,

    /// Unique identifier of this assertion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Additional claims
    #[serde(flatten)]
    pub private_claims: Map<String, Value>,
}

impl ClaimSet {
    /// Fills in issue and expiry times when they are unset
    ///
    /// An unset `iat` becomes `now` less a small allowance for clock skew, and
    /// an unset `exp` becomes one hour after that.
    fn with_defaults(mut self, now: i64) -> Result<Self, Error> {
        let issued = now - ISSUED_AT_SKEW;
        if self.iat == 0 {
            self.iat = issued;
        }
        if self.exp == 0 {
            self.exp = issued + DEFAULT_LIFETIME;
        }
        if self.exp < self.iat {
            return Err(Error::ExpiresBeforeIssued);
        }
        Ok(self)
    }
}

/// Encodes and signs a claim set, producing a compact serialization
///
/// # Errors
///
/// The claim set expires before it was issued, or the signer failed.
pub fn encode<S: Signer + ?Sized>(
    header: &Header,
    claims: &ClaimSet,
    signer: &S,
) -> Result<String, Error> {
    let claims = claims.clone().with_defaults(unix_now())?;

    let mut token = encode_segment(header)?;
    token.push('.');
    token.push_str(&encode_segment(&claims)?);

    let signature = signer.sign(token.as_bytes())?;
    token.push('.');
    token.push_str(&URL_SAFE_NO_PAD.encode(signature));

    Ok(token)
}

/// Decodes the claims of a compact JWS without verifying its signature
///
/// # Errors
///
/// The value is not a three-segment compact serialization, or the payload
/// is not valid base64url-encoded JSON.
pub fn decode(token: &str) -> Result<ClaimSet, Error> {
    let (_, payload, _) = split(token)?;
    decode_segment(payload)
}

/// Decodes the protected header of a compact JWS
///
/// # Errors
///
/// The value is not a three-segment compact serialization, or the header
/// is not valid base64url-encoded JSON.
pub fn decode_header(token: &str) -> Result<Header, Error> {
    let (header, _, _) = split(token)?;
    decode_segment(header)
}

/// Verifies the `RS256` signature of a compact JWS
///
/// # Errors
///
/// The value is malformed or the signature does not match.
pub fn verify(token: &str, key: &PublicKey) -> Result<(), Error> {
    let (header, payload, signature) = split(token)?;
    let signed = &token[..header.len() + 1 + payload.len()];
    let signature = URL_SAFE_NO_PAD.decode(signature)?;
    key.verify(signed.as_bytes(), &signature)
}

fn split(token: &str) -> Result<(&str, &str, &str), Error> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None) => Ok((header, payload, signature)),
        _ => Err(Error::Malformed),
    }
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, Error> {
    Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(value)?))
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, Error> {
    let raw = URL_SAFE_NO_PAD.decode(segment)?;
    Ok(serde_json::from_slice(&raw)?)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
