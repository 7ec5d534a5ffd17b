//! The three-legged authorization code flow and the grants that share its configuration

use url::Url;

use super::refresh::RefreshTokenSource;
use crate::{
    client_auth::{self, AuthStyleCache, ClientIdentity},
    endpoint::Endpoint,
    pkce::PkceVerifier,
    sources::ReuseTokenSource,
    transport::{HttpClient, Params},
    AuthorizationCodeRef, Error, RefreshTokenRef, Token,
};

/// An option applied to the authorization URL or device authorization request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthCodeOption {
    /// `access_type=online`
    AccessTypeOnline,
    /// `access_type=offline`, asking for a refresh token
    AccessTypeOffline,
    /// `prompt=consent`, forcing the user to approve again
    ApprovalForce,
    /// An arbitrary parameter
    Param(String, String),
    /// A PKCE challenge using the `S256` method
    S256Challenge(PkceVerifier),
    /// A PKCE challenge using the `plain` method
    ///
    /// Only accepted when the config allows plain PKCE.
    PlainChallenge(PkceVerifier),
}

impl AuthCodeOption {
    /// An arbitrary parameter
    pub fn param(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Param(name.into(), value.into())
    }

    pub(super) fn apply(&self, params: &mut Params, allow_plain_pkce: bool) -> Result<(), Error> {
        match self {
            Self::AccessTypeOnline => {
                params.set("access_type", "online");
            }
            Self::AccessTypeOffline => {
                params.set("access_type", "offline");
            }
            Self::ApprovalForce => {
                params.set("prompt", "consent");
            }
            Self::Param(name, value) => {
                params.set(name.as_str(), value.as_str());
            }
            Self::S256Challenge(verifier) => {
                params
                    .set("code_challenge_method", "S256")
                    .set("code_challenge", verifier.s256_challenge());
            }
            Self::PlainChallenge(verifier) => {
                if !allow_plain_pkce {
                    return Err(Error::config("plain PKCE challenges are not enabled"));
                }
                params
                    .set("code_challenge_method", "plain")
                    .set("code_challenge", verifier.as_str());
            }
        }
        Ok(())
    }
}

/// An option applied when exchanging an authorization code
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExchangeOption {
    /// An arbitrary parameter
    Param(String, String),
    /// The PKCE verifier whose challenge was sent with the authorization URL
    Verifier(PkceVerifier),
}

impl ExchangeOption {
    /// An arbitrary parameter
    pub fn param(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Param(name.into(), value.into())
    }

    fn apply(&self, params: &mut Params) {
        match self {
            Self::Param(name, value) => params.set(name.as_str(), value.as_str()),
            Self::Verifier(verifier) => params.set("code_verifier", verifier.as_str()),
        };
    }
}

/// Checks that the `state` returned to the redirect URL is the one sent
///
/// # Errors
///
/// Returns [`Error::StateMismatch`] if the values differ.
pub fn verify_state(expected: &str, received: &str) -> Result<(), Error> {
    if expected.is_empty() || expected != received {
        return Err(Error::StateMismatch);
    }
    Ok(())
}

/// A client's configuration for an authority's three-legged flows
///
/// The same configuration drives the authorization code, refresh, password,
/// and device grants. It is read-only once built; clones share the
/// [`AuthStyleCache`].
#[derive(Clone, Debug)]
pub struct Config {
    client: HttpClient,
    identity: ClientIdentity,
    endpoint: Endpoint,
    redirect_url: Option<Url>,
    scopes: Vec<String>,
    auth_styles: AuthStyleCache,
    allow_plain_pkce: bool,
    preserve_scope_on_refresh: bool,
}

impl Config {
    /// Configures a client of the authority at `endpoint`
    pub fn new(client: HttpClient, identity: ClientIdentity, endpoint: Endpoint) -> Self {
        Self {
            client,
            identity,
            endpoint,
            redirect_url: None,
            scopes: Vec::new(),
            auth_styles: AuthStyleCache::new(),
            allow_plain_pkce: false,
            preserve_scope_on_refresh: false,
        }
    }

    /// Sets the URL the authority redirects users back to
    pub fn with_redirect_url(mut self, redirect_url: Url) -> Self {
        self.redirect_url = Some(redirect_url);
        self
    }

    /// Sets the scopes to request
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Shares an authentication style cache with other configs
    pub fn with_auth_style_cache(mut self, auth_styles: AuthStyleCache) -> Self {
        self.auth_styles = auth_styles;
        self
    }

    /// Accepts [`AuthCodeOption::PlainChallenge`]
    pub fn allowing_plain_pkce(mut self) -> Self {
        self.allow_plain_pkce = true;
        self
    }

    /// Sends the configured scopes when refreshing
    ///
    /// Some authorities reduce the scope of a refreshed token when `scope`
    /// is omitted.
    pub fn preserving_scope_on_refresh(mut self) -> Self {
        self.preserve_scope_on_refresh = true;
        self
    }

    /// The client's identity
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// The authority's endpoints
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The requested scopes
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// The authentication style cache
    pub fn auth_styles(&self) -> &AuthStyleCache {
        &self.auth_styles
    }

    pub(crate) fn client(&self) -> &HttpClient {
        &self.client
    }

    pub(crate) fn allows_plain_pkce(&self) -> bool {
        self.allow_plain_pkce
    }

    /// Builds the URL to send the user to for consent
    ///
    /// `state` protects against cross-site request forgery and should be
    /// checked with [`verify_state`] when the user is redirected back.
    ///
    /// # Errors
    ///
    /// A plain PKCE challenge was requested but is not enabled.
    pub fn auth_code_url(&self, state: &str, opts: &[AuthCodeOption]) -> Result<Url, Error> {
        let mut params = Params::new();
        params
            .set("response_type", "code")
            .set("client_id", self.identity.client_id().as_str())
            .set_scopes(&self.scopes)
            .set_non_empty("state", state);
        if let Some(redirect_url) = &self.redirect_url {
            params.set("redirect_uri", redirect_url.as_str());
        }
        for opt in opts {
            opt.apply(&mut params, self.allow_plain_pkce)?;
        }

        let mut url = self.endpoint.auth_url().clone();
        url.query_pairs_mut().extend_pairs(params.iter());
        Ok(url)
    }

    /// Exchanges an authorization code for a token
    ///
    /// # Errors
    ///
    /// The request failed or the authority rejected the code.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn exchange(
        &self,
        code: &AuthorizationCodeRef,
        opts: &[ExchangeOption],
    ) -> Result<Token, Error> {
        let mut params = Params::new();
        params
            .set("grant_type", "authorization_code")
            .set("code", code.as_str())
            .set_scopes(&self.scopes);
        if let Some(redirect_url) = &self.redirect_url {
            params.set("redirect_uri", redirect_url.as_str());
        }
        for opt in opts {
            opt.apply(&mut params);
        }

        self.retrieve(&params).await
    }

    /// Obtains a token with the resource owner's username and password
    ///
    /// This grant should only be used by highly trusted clients.
    ///
    /// # Errors
    ///
    /// The request failed or the authority rejected the credentials.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn password_credentials_token(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Token, Error> {
        let mut params = Params::new();
        params
            .set("grant_type", "password")
            .set("username", username)
            .set("password", password)
            .set_scopes(&self.scopes);

        self.retrieve(&params).await
    }

    /// Exchanges a refresh token for a new token
    ///
    /// If the authority does not rotate the refresh token, the returned token
    /// carries `refresh_token` forward.
    ///
    /// # Errors
    ///
    /// The request failed or the authority rejected the refresh token.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<Token, Error> {
        let mut params = Params::new();
        params
            .set("grant_type", "refresh_token")
            .set("refresh_token", refresh_token.as_str());
        if self.preserve_scope_on_refresh {
            params.set_scopes(&self.scopes);
        }

        let mut token = self.retrieve(&params).await?;
        token.set_refresh_token_if_absent(refresh_token);
        Ok(token)
    }

    /// A source that reuses `token` until it goes stale and then refreshes it
    pub fn token_source(&self, token: Option<Token>) -> ReuseTokenSource<RefreshTokenSource> {
        let refresh_token = token
            .as_ref()
            .and_then(|t| t.refresh_token())
            .map(ToOwned::to_owned);
        ReuseTokenSource::new(RefreshTokenSource::new(self.clone(), refresh_token), token)
    }

    pub(crate) async fn retrieve(&self, params: &Params) -> Result<Token, Error> {
        client_auth::retrieve_token(
            &self.client,
            self.endpoint.token_url(),
            self.endpoint.auth_style(),
            &self.identity,
            params,
            &self.auth_styles,
        )
        .await
    }
}
