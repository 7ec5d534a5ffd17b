//! OAuth 2.0 client token acquisition and lifecycle management
//!
//! This crate obtains tokens from an OAuth 2.0 authority and keeps them
//! fresh. It speaks the token endpoint protocol of RFC 6749 and its
//! extensions:
//!
//! * the authorization code flow, with PKCE (RFC 7636), and refresh tokens
//! * the client credentials and resource owner password grants
//! * the JWT bearer grant (RFC 7523)
//! * the device authorization grant (RFC 8628)
//! * token exchange (RFC 8693)
//!
//! Clients authenticate with HTTP Basic, form parameters, signed JWT
//! assertions, or mutual TLS. When the style is not known in advance, it is
//! discovered by trying the token endpoint and remembered in an
//! [`AuthStyleCache`][client_auth::AuthStyleCache].
//!
//! Tokens are plain values. A [`TokenSource`][sources::TokenSource]
//! produces them, and sources compose: a
//! [`ReuseTokenSource`][sources::ReuseTokenSource] caches its parent's
//! token until it goes stale, and a [`TokenWatcher`] refreshes a token in
//! the background before it expires.
//!
//! # Client credentials
//!
//! ```no_run
//! use grantor::{
//!     client_auth::ClientIdentity, grants::ClientCredentials, sources::TokenSource, ClientId,
//!     ClientSecret,
//! };
//!
//! # async fn run() -> Result<(), grantor::Error> {
//! let client = grantor::HttpClient::from(reqwest::Client::new());
//! let identity = ClientIdentity::new(ClientId::from("my-client"))
//!     .with_secret(ClientSecret::from("my-secret"));
//!
//! let source = ClientCredentials::new(
//!     client,
//!     identity,
//!     "https://auth.example.com/oauth/token".parse().unwrap(),
//! )
//! .with_scopes(["read", "write"])
//! .with_endpoint_param("audience", "https://api.example.com")
//! .token_source();
//!
//! let token = source.token().await?;
//! println!("Authorization: {}", token.authorization());
//! # Ok(())
//! # }
//! ```
//!
//! # Authorization code with PKCE
//!
//! ```
//! use grantor::{
//!     client_auth::ClientIdentity,
//!     endpoint::Endpoint,
//!     grants::{verify_state, AuthCodeOption, Config, ExchangeOption},
//!     pkce::PkceVerifier,
//!     ClientId,
//! };
//!
//! # fn run() -> Result<(), grantor::Error> {
//! let config = Config::new(
//!     grantor::HttpClient::from(reqwest::Client::new()),
//!     ClientIdentity::new(ClientId::from("my-client")),
//!     Endpoint::new(
//!         "https://auth.example.com/authorize".parse().unwrap(),
//!         "https://auth.example.com/oauth/token".parse().unwrap(),
//!     ),
//! )
//! .with_redirect_url("https://app.example.com/callback".parse().unwrap())
//! .with_scopes(["profile"]);
//!
//! let verifier = PkceVerifier::generate();
//! let url = config.auth_code_url(
//!     "state-123",
//!     &[AuthCodeOption::AccessTypeOffline, AuthCodeOption::S256Challenge(verifier.clone())],
//! )?;
//! assert!(url.as_str().contains("code_challenge_method=S256"));
//!
//! // After the user is redirected back with `state` and `code`:
//! verify_state("state-123", "state-123")?;
//! let _exchange_opts = [ExchangeOption::Verifier(verifier)];
//! # Ok(())
//! # }
//! # run().unwrap();
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
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod backoff;
mod braids;
pub mod client_auth;
pub mod clock;
pub mod endpoint;
pub mod error;
pub mod grants;
pub mod jitter;
pub mod pkce;
pub mod sources;
mod token;
pub mod transport;
mod watcher;


pub use braids::*;
pub use error::{Error, ErrorCode, RetrieveError};
pub use token::{Token, TokenStatus, DEFAULT_EARLY_EXPIRY};
pub use transport::HttpClient;
pub use watcher::TokenWatcher;
