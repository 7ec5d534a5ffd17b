//! Client authentication at the token endpoint
//!
//! A client proves its identity to the token endpoint in one of the ways
//! described by [`AuthStyle`]. When the style is
//! [`AutoDetect`][AuthStyle::AutoDetect], the first request to a token URL
//! tries HTTP Basic authentication and falls back to sending the
//! credentials in the form body. Whichever style works is remembered in an
//! [`AuthStyleCache`] so later requests skip detection.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use grantor_jose::{
    jws::{self, ClaimSet, Header},
    PrivateKey,
};
use rand::Rng;
use reqwest::{header, StatusCode};
use url::Url;

use crate::{
    clock::{Clock, DurationSecs, System, UnixTime},
    endpoint::AuthStyle,
    transport::{self, HttpClient, Params},
    ClientId, ClientIdRef, ClientSecret, ClientSecretRef, Error, ErrorCode, Token,
};

/// The `client_assertion_type` for JWT client assertions (RFC 7523 §2.2)
pub const JWT_BEARER_ASSERTION_TYPE: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// The default lifetime of a client assertion
pub const DEFAULT_ASSERTION_LIFETIME: DurationSecs = DurationSecs(3600);

/// The credentials a client presents to the token endpoint
#[derive(Clone, Debug)]
pub struct ClientIdentity {
    client_id: ClientId,
    client_secret: ClientSecret,
    assertion_key: Option<AssertionKey>,
}

impl ClientIdentity {
    /// A public client, identified only by its client ID
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            client_secret: ClientSecret::new(String::new()),
            assertion_key: None,
        }
    }

    /// Adds a client secret
    pub fn with_secret(mut self, client_secret: ClientSecret) -> Self {
        self.client_secret = client_secret;
        self
    }

    /// Adds a key for signing client assertions
    ///
    /// The key is only used when the authentication style is
    /// [`AuthStyle::PrivateKeyJwt`].
    pub fn with_assertion_key(mut self, assertion_key: AssertionKey) -> Self {
        self.assertion_key = Some(assertion_key);
        self
    }

    /// The client ID
    #[inline]
    pub fn client_id(&self) -> &ClientIdRef {
        &self.client_id
    }

    /// The client secret, which may be empty
    #[inline]
    pub fn client_secret(&self) -> &ClientSecretRef {
        &self.client_secret
    }

    /// The assertion signing key, if one has been set
    #[inline]
    pub fn assertion_key(&self) -> Option<&AssertionKey> {
        self.assertion_key.as_ref()
    }

    /// Adds this client's credentials to a token request
    ///
    /// Returns the `Authorization` header value to send, if the style calls
    /// for one.
    pub(crate) fn authenticate(
        &self,
        style: AuthStyle,
        token_url: &Url,
        params: &mut Params,
        now: UnixTime,
    ) -> Result<Option<header::HeaderValue>, Error> {
        match style {
            AuthStyle::AutoDetect | AuthStyle::InHeader => transport::basic_authorization(
                self.client_id.as_str(),
                self.client_secret.as_str(),
            )
            .map(Some),
            AuthStyle::InParams => {
                params.set("client_id", self.client_id.as_str());
                params.set_non_empty("client_secret", self.client_secret.as_str());
                Ok(None)
            }
            AuthStyle::PrivateKeyJwt => {
                let key = self.assertion_key.as_ref().ok_or_else(|| {
                    Error::config("private key JWT authentication requires an assertion key")
                })?;
                let assertion = key.assertion(&self.client_id, token_url, now)?;
                params.set("client_assertion", assertion);
                params.set("client_assertion_type", JWT_BEARER_ASSERTION_TYPE);
                Ok(None)
            }
            AuthStyle::Mtls => {
                params.set("client_id", self.client_id.as_str());
                Ok(None)
            }
        }
    }
}

/// A key used to sign client assertions (RFC 7523 §2.2)
#[derive(Clone, Debug)]
pub struct AssertionKey {
    key: PrivateKey,
    key_id: Option<String>,
    lifetime: DurationSecs,
}

impl AssertionKey {
    /// Signs assertions with the given key and a one hour lifetime
    pub fn new(key: PrivateKey) -> Self {
        Self {
            key,
            key_id: None,
            lifetime: DEFAULT_ASSERTION_LIFETIME,
        }
    }

    /// Parses a PEM or DER encoded RSA private key
    ///
    /// # Errors
    ///
    /// The key is not an RSA private key.
    pub fn parse(key: impl AsRef<[u8]>) -> Result<Self, Error> {
        Ok(Self::new(PrivateKey::parse(key)?))
    }

    /// Sets the `kid` header of assertions
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Sets how long assertions remain valid
    pub fn with_lifetime(mut self, lifetime: DurationSecs) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Produces a signed assertion identifying `client_id` to `token_url`
    pub(crate) fn assertion(
        &self,
        client_id: &ClientIdRef,
        token_url: &Url,
        now: UnixTime,
    ) -> Result<String, Error> {
        let jti: [u8; 16] = rand::thread_rng().gen();
        let claims = ClaimSet {
            iss: client_id.as_str().to_owned(),
            sub: Some(client_id.as_str().to_owned()),
            aud: token_url.as_str().to_owned(),
            iat: now.0 as i64,
            exp: (now + self.lifetime).0 as i64,
            jti: Some(URL_SAFE_NO_PAD.encode(jti)),
            ..ClaimSet::default()
        };

        let mut header = Header::rs256();
        if let Some(key_id) = &self.key_id {
            header = header.with_key_id(key_id.clone());
        }

        Ok(jws::encode(&header, &claims, &self.key)?)
    }
}

/// Remembers which authentication style each token URL accepted
///
/// Clones share the same entries. Entries are only ever added or replaced
/// with a concrete style; [`AuthStyle::AutoDetect`] is never stored.
#[derive(Clone, Debug, Default)]
pub struct AuthStyleCache {
    styles: Arc<Mutex<HashMap<String, AuthStyle>>>,
}

impl AuthStyleCache {
    /// An empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The style that last worked for `token_url`
    pub fn get(&self, token_url: &str) -> Option<AuthStyle> {
        self.styles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token_url)
            .copied()
    }

    /// Records the style that worked for `token_url`
    pub fn set(&self, token_url: &str, style: AuthStyle) {
        if style == AuthStyle::AutoDetect {
            return;
        }

        self.styles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token_url.to_owned(), style);
    }
}

/// Requests a token, authenticating the client as the endpoint requires
///
/// The caller's parameters are never modified; each attempt authenticates
/// a copy.
#[tracing::instrument(
    level = "debug",
    skip_all,
    fields(token_url = %token_url, client_id = %identity.client_id()),
)]
pub(crate) async fn retrieve_token(
    client: &HttpClient,
    token_url: &Url,
    auth_style: AuthStyle,
    identity: &ClientIdentity,
    params: &Params,
    cache: &AuthStyleCache,
) -> Result<Token, Error> {
    let (style, detecting) = match auth_style {
        AuthStyle::AutoDetect => match cache.get(token_url.as_str()) {
            Some(style) => (style, false),
            None => (AuthStyle::InHeader, true),
        },
        style => (style, false),
    };

    let result = attempt(client, token_url, identity, params, style).await;
    if !detecting {
        return result;
    }

    let (style, result) = match result {
        Err(err) if should_fall_back(&err) => {
            tracing::debug!(
                error = %err,
                "authority rejected credentials in header; retrying with credentials in form"
            );
            let style = AuthStyle::InParams;
            (style, attempt(client, token_url, identity, params, style).await)
        }
        result => (AuthStyle::InHeader, result),
    };

    if result.is_ok() {
        tracing::debug!(?style, "remembering authentication style");
        cache.set(token_url.as_str(), style);
    }

    result
}

async fn attempt(
    client: &HttpClient,
    token_url: &Url,
    identity: &ClientIdentity,
    params: &Params,
    style: AuthStyle,
) -> Result<Token, Error> {
    let mut params = params.clone();
    let authorization = identity.authenticate(style, token_url, &mut params, System.now())?;

    let mut request = transport::form_request(client, token_url, &params);
    if let Some(authorization) = authorization {
        request = request.header(header::AUTHORIZATION, authorization);
    }

    transport::request_token(request).await
}

fn should_fall_back(err: &Error) -> bool {
    match err {
        Error::Transport(_) => true,
        Error::Retrieve(rejection) => {
            rejection.status() == StatusCode::UNAUTHORIZED
                || (rejection.status() == StatusCode::BAD_REQUEST
                    && rejection.code() == Some(&ErrorCode::InvalidClient))
        }
        _ => false,
    }
}
