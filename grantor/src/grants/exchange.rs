//! OAuth 2.0 token exchange (RFC 8693)

use async_trait::async_trait;
use url::Url;

use crate::{
    client_auth::{self, AuthStyleCache, ClientIdentity},
    endpoint::AuthStyle,
    sources::DeriveToken,
    transport::{self, HttpClient, Params},
    Error, Token,
};

/// The `grant_type` of a token exchange
pub const TOKEN_EXCHANGE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

/// The token type identifier of an access token
pub const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Exchanges a parent token for a new token at a security token service
///
/// Use with a [`DerivedTokenSource`][crate::sources::DerivedTokenSource] to
/// obtain narrower or impersonated tokens from another source.
#[derive(Clone, Debug)]
pub struct TokenExchange {
    client: HttpClient,
    token_url: Url,
    identity: Option<ClientIdentity>,
    auth_style: AuthStyle,
    auth_styles: AuthStyleCache,
    subject_token_type: String,
    requested_token_type: Option<String>,
    audience: Option<String>,
    resource: Option<String>,
    scopes: Vec<String>,
}

impl TokenExchange {
    /// Exchanges access tokens at `token_url` without client authentication
    pub fn new(client: HttpClient, token_url: Url) -> Self {
        Self {
            client,
            token_url,
            identity: None,
            auth_style: AuthStyle::AutoDetect,
            auth_styles: AuthStyleCache::new(),
            subject_token_type: ACCESS_TOKEN_TYPE.to_owned(),
            requested_token_type: None,
            audience: None,
            resource: None,
            scopes: Vec::new(),
        }
    }

    /// Authenticates the exchange as `identity`
    pub fn with_identity(mut self, identity: ClientIdentity, auth_style: AuthStyle) -> Self {
        self.identity = Some(identity);
        self.auth_style = auth_style;
        self
    }

    /// Declares the type of the parent token
    pub fn with_subject_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.subject_token_type = token_type.into();
        self
    }

    /// Asks for a particular type of token
    pub fn with_requested_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.requested_token_type = Some(token_type.into());
        self
    }

    /// Names the service the token is intended for
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Names the resource the token is intended for
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Narrows the scope of the issued token
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Exchanges `subject` for a new token
    ///
    /// # Errors
    ///
    /// The request failed or the service rejected the exchange.
    #[tracing::instrument(level = "debug", skip_all, fields(token_url = %self.token_url))]
    pub async fn exchange(&self, subject: &Token) -> Result<Token, Error> {
        let mut params = Params::new();
        params
            .set("grant_type", TOKEN_EXCHANGE_GRANT_TYPE)
            .set("subject_token", subject.access_token().as_str())
            .set("subject_token_type", self.subject_token_type.as_str())
            .set_scopes(&self.scopes);
        if let Some(requested) = &self.requested_token_type {
            params.set("requested_token_type", requested.as_str());
        }
        if let Some(audience) = &self.audience {
            params.set("audience", audience.as_str());
        }
        if let Some(resource) = &self.resource {
            params.set("resource", resource.as_str());
        }

        match &self.identity {
            Some(identity) => {
                client_auth::retrieve_token(
                    &self.client,
                    &self.token_url,
                    self.auth_style,
                    identity,
                    &params,
                    &self.auth_styles,
                )
                .await
            }
            None => {
                let request = transport::form_request(&self.client, &self.token_url, &params);
                transport::request_token(request).await
            }
        }
    }
}

#[async_trait]
impl DeriveToken for TokenExchange {
    type Error = Error;

    async fn derive(&self, parent: &Token) -> Result<Token, Self::Error> {
        self.exchange(parent).await
    }
}
