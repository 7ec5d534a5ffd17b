//! Signing primitives used by the `grantor` OAuth2 client
//!
//! This crate covers the small slice of the JOSE standards that an OAuth2 client
//! needs in order to authenticate itself with a signed assertion:
//!
//! * parsing RSA private keys from PEM, PKCS#8 or PKCS#1 encodings
//! * producing compact JSON Web Signatures ([RFC7515][]) using `RS256`
//! * decoding the claims of a compact JWS, such as an OpenID Connect ID token
//!
//! Signature verification is provided, but decoding never verifies. Decoded
//! claims should be treated as untrusted unless checked with [`jws::verify`].
//!
//! [RFC7515]: https://tools.ietf.org/html/rfc7515
//!
//! # Example
//!
//! ```
//! use grantor_jose::{jws, PrivateKey};
//!
//! let pem = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/rsa-pkcs8.pem"));
//! let key = PrivateKey::parse(pem).unwrap();
//!
//! let claims = jws::ClaimSet {
//!     iss: "service@example.com".into(),
//!     aud: "https://example.com/token".into(),
//!     ..Default::default()
//! };
//!
//! let token = jws::encode(&jws::Header::rs256(), &claims, &key).unwrap();
//! jws::verify(&token, &key.public_key()).unwrap();
//!
//! let decoded = jws::decode(&token).unwrap();
//! assert_eq!(decoded.iss, "service@example.com");
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod error;
pub mod jws;
mod key;

#[doc(inline)]
pub use error::Error;
pub use key::{PrivateKey, PublicKey};
