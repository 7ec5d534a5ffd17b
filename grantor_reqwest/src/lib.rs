//! Middleware to authorize outgoing requests with tokens from a token source
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AuthorizationMiddleware`] in the middleware stack to stamp
//! each outbound request with an `Authorization` header built from the
//! current token of a [`TokenSource`].
//!
//! The middleware never refreshes tokens on its own, not even after a `401`.
//! Keeping tokens fresh is the source's job; wrap it in a
//! [`ReuseTokenSource`][grantor::sources::ReuseTokenSource] or use a
//! [`TokenWatcher`][grantor::TokenWatcher]. If the source fails, the request
//! fails without being sent.
//!
//! ```
//! use grantor::{sources::StaticTokenSource, Token};
//! use grantor_reqwest::AuthorizationMiddleware;
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! let source = StaticTokenSource::new(Token::new("token").with_token_type("bearer"));
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AuthorizationMiddleware::new(source))
//!     .build();
//!
//! let req = client.get("https://example.com");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! ```
//!
//! The middleware can also be configured to add a token only conditionally.
//! This can be useful in the event that you want to use a single common
//! middleware stack with multiple potential backends and want to ensure that
//! specific tokens are only sent to specific backends.
//!
//! These predicates can be composed together to evaluate more complex
//! requirements prior to attaching a token to a request.
//!
//! ```
//! use grantor::{sources::StaticTokenSource, Token};
//! use grantor_reqwest::{AuthorizationMiddleware, ExactHostMatch, HttpsOnly};
//! use predicates::prelude::PredicateBooleanExt;
//!
//! AuthorizationMiddleware::new(StaticTokenSource::new(Token::new("token")))
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("example.com")));
//! ```

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

use std::fmt;

use bytes::{BufMut, BytesMut};
use grantor::{
    clock::{Clock, System},
    sources::TokenSource,
    Token, DEFAULT_EARLY_EXPIRY,
};
use predicates::{constant::BooleanPredicate, prelude::*, reflection};
use reqwest::{header, Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next, Result};

/// A middleware that stamps outgoing requests with the current token
///
/// Any `Authorization` header already on the request is replaced.
#[derive(Clone, Debug)]
pub struct AuthorizationMiddleware<S, P = BooleanPredicate> {
    source: S,
    predicate: P,
}

impl<S> AuthorizationMiddleware<S> {
    /// Authorizes every request with tokens from `source`
    ///
    /// To only authorize some requests, provide a predicate with
    /// [`with_predicate()`][Self::with_predicate()].
    pub fn new(source: S) -> Self {
        Self {
            source,
            predicate: predicate::always(),
        }
    }
}

impl<S, P> AuthorizationMiddleware<S, P> {
    /// Replaces the predicate deciding which requests are authorized
    pub fn with_predicate<P2>(self, predicate: P2) -> AuthorizationMiddleware<S, P2> {
        AuthorizationMiddleware {
            source: self.source,
            predicate,
        }
    }
}

fn authorization_value(token: &Token) -> Result<header::HeaderValue> {
    if tracing::enabled!(tracing::Level::TRACE) {
        let now = System.now();

        tracing::trace!(
            token.status = ?token.token_status_at(now, DEFAULT_EARLY_EXPIRY),
            token.expiry = token.expiry().map(|e| e.0),
            token.until_expired = token.until_expired_at(now).map(|d| d.0),
            "obtained access token"
        );
    }

    let scheme = token.scheme();
    let access_token = token.access_token().as_str();
    let mut buf = BytesMut::with_capacity(scheme.len() + 1 + access_token.len());
    buf.put_slice(scheme.as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(access_token.as_bytes());

    let mut value = header::HeaderValue::from_maybe_shared(buf.freeze())
        .map_err(reqwest_middleware::Error::middleware)?;
    value.set_sensitive(true);
    Ok(value)
}

#[async_trait::async_trait]
impl<S, P> Middleware for AuthorizationMiddleware<S, P>
where
    S: TokenSource + 'static,
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) {
            let token = self
                .source
                .token()
                .await
                .map_err(reqwest_middleware::Error::middleware)?;
            let value = authorization_value(&token)?;
            req.headers_mut().insert(header::AUTHORIZATION, value);
        }

        next.run(req, extensions).await
    }
}

/// Builds a client that authorizes every request with tokens from `source`
pub fn client_with_source<S>(client: reqwest::Client, source: S) -> ClientWithMiddleware
where
    S: TokenSource + 'static,
{
    ClientBuilder::new(client)
        .with(AuthorizationMiddleware::new(source))
        .build()
}

/// Only attach a token if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "scheme",
                    req.url().scheme().to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only attach a token if the request is being sent to the exact host specified
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Matches requests to `host`
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().host_str() == Some(self.host.as_str())
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "host",
                    req.url().host_str().unwrap_or("<none>").to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("host == ")?;
        f.write_str(&self.host)
    }
}
