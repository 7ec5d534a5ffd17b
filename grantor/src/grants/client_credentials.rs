use async_trait::async_trait;
use url::Url;

use crate::{
    client_auth::{self, AssertionKey, AuthStyleCache, ClientIdentity},
    endpoint::AuthStyle,
    sources::{ReuseTokenSource, TokenSource},
    transport::{HttpClient, Params},
    Error, Token,
};

/// The two-legged client credentials grant (RFC 6749 §4.4)
///
/// Every call to [`token`][Self::token] requests a new token. Use
/// [`token_source`][Self::token_source] to reuse tokens until they go stale.
#[derive(Clone, Debug)]
pub struct ClientCredentials {
    client: HttpClient,
    identity: ClientIdentity,
    token_url: Url,
    auth_style: AuthStyle,
    scopes: Vec<String>,
    endpoint_params: Params,
    auth_styles: AuthStyleCache,
}

impl ClientCredentials {
    /// Requests tokens from `token_url` as `identity`
    pub fn new(client: HttpClient, identity: ClientIdentity, token_url: Url) -> Self {
        Self {
            client,
            identity,
            token_url,
            auth_style: AuthStyle::AutoDetect,
            scopes: Vec::new(),
            endpoint_params: Params::new(),
            auth_styles: AuthStyleCache::new(),
        }
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

    /// Adds a parameter to every token request, such as `audience`
    ///
    /// A `grant_type` parameter replaces the standard `client_credentials`
    /// grant type, for authorities that reuse this flow for other grants.
    pub fn with_endpoint_param(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.endpoint_params.set(name, value);
        self
    }

    /// Fixes the client authentication style instead of detecting it
    pub fn with_auth_style(mut self, auth_style: AuthStyle) -> Self {
        self.auth_style = auth_style;
        self
    }

    /// Authenticates with signed client assertions
    pub fn with_assertion_key(mut self, key: AssertionKey) -> Self {
        self.identity = self.identity.with_assertion_key(key);
        self.auth_style = AuthStyle::PrivateKeyJwt;
        self
    }

    /// Shares an authentication style cache with other configs
    pub fn with_auth_style_cache(mut self, auth_styles: AuthStyleCache) -> Self {
        self.auth_styles = auth_styles;
        self
    }

    /// The authentication style cache
    pub fn auth_styles(&self) -> &AuthStyleCache {
        &self.auth_styles
    }

    /// Requests a new token
    ///
    /// # Errors
    ///
    /// An endpoint parameter collides with a standard parameter, the request
    /// failed, or the authority rejected the client.
    #[tracing::instrument(level = "debug", skip_all, fields(token_url = %self.token_url))]
    pub async fn token(&self) -> Result<Token, Error> {
        let mut params = Params::new();
        params
            .set("grant_type", "client_credentials")
            .set_scopes(&self.scopes);

        for (name, value) in self.endpoint_params.iter() {
            if name != "grant_type" && params.contains(name) {
                return Err(Error::config(format!("cannot overwrite parameter {:?}", name)));
            }
            params.set(name, value);
        }

        client_auth::retrieve_token(
            &self.client,
            &self.token_url,
            self.auth_style,
            &self.identity,
            &params,
            &self.auth_styles,
        )
        .await
    }

    /// A source that reuses tokens until they go stale
    pub fn token_source(self) -> ReuseTokenSource<Self> {
        ReuseTokenSource::new(self, None)
    }
}

#[async_trait]
impl TokenSource for ClientCredentials {
    type Error = Error;

    async fn token(&self) -> Result<Token, Self::Error> {
        ClientCredentials::token(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client_auth::JWT_BEARER_ASSERTION_TYPE,
        clock::{Clock, System},
        test::{StubAuthority, StubResponse, RSA_KEY},
        ClientId, ClientSecret,
    };

    fn credentials(stub: &StubAuthority) -> ClientCredentials {
        ClientCredentials::new(
            stub.client(),
            ClientIdentity::new(ClientId::from("CLIENT_ID"))
                .with_secret(ClientSecret::from("CLIENT_SECRET")),
            "https://server.example.com/token".parse().unwrap(),
        )
        .with_scopes(["scope1", "scope2"])
    }

    #[tokio::test]
    async fn sends_basic_auth_and_scopes() {
        let stub = StubAuthority::new();
        stub.respond(StubResponse::form(
            200,
            "access_token=90d64460d14870c08c81352a05dedd3465940a7c&token_type=bearer",
        ));

        let token = credentials(&stub)
            .with_auth_style(AuthStyle::InHeader)
            .with_endpoint_param("audience", "audience1")
            .token()
            .await
            .unwrap();

        assert_eq!(token.access_token().as_str(), "90d64460d14870c08c81352a05dedd3465940a7c");
        assert_eq!(token.token_type(), "bearer");
        assert!(token.is_valid());

        let request = &stub.requests()[0];
        assert_eq!(request.method, reqwest::Method::POST);
        assert_eq!(
            request.body,
            "audience=audience1&grant_type=client_credentials&scope=scope1+scope2"
        );
        assert_eq!(
            request.header("authorization"),
            Some("Basic Q0xJRU5UX0lEOkNMSUVOVF9TRUNSRVQ=")
        );
        assert_eq!(request.header("content-type"), Some("application/x-www-form-urlencoded"));
    }

    #[tokio::test]
    async fn grant_type_may_be_overridden() {
        let stub = StubAuthority::new();
        stub.respond(StubResponse::json(200, r#"{"access_token":"abc"}"#));

        credentials(&stub)
            .with_auth_style(AuthStyle::InParams)
            .with_endpoint_param("grant_type", "password")
            .token()
            .await
            .unwrap();

        let form = stub.requests()[0].form();
        assert_eq!(form["grant_type"], "password");
        assert_eq!(form["client_id"], "CLIENT_ID");
        assert_eq!(form["client_secret"], "CLIENT_SECRET");
    }

    #[tokio::test]
    async fn other_collisions_are_rejected() {
        let stub = StubAuthority::new();

        let err = credentials(&stub)
            .with_endpoint_param("scope", "everything")
            .token()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
        assert!(stub.requests().is_empty());
    }

    #[tokio::test]
    async fn private_key_jwt_sends_assertion() {
        let stub = StubAuthority::new();
        stub.respond(StubResponse::json(200, r#"{"access_token":"abc"}"#));
        let key = AssertionKey::parse(RSA_KEY).unwrap();
        let now = System.now();

        ClientCredentials::new(
            stub.client(),
            ClientIdentity::new(ClientId::from("CLIENT_ID")),
            "https://server/token".parse().unwrap(),
        )
        .with_assertion_key(key)
        .token()
        .await
        .unwrap();

        let request = &stub.requests()[0];
        assert_eq!(request.header("authorization"), None);
        let form = request.form();
        assert_eq!(form["client_assertion_type"], JWT_BEARER_ASSERTION_TYPE);
        assert_eq!(form["grant_type"], "client_credentials");

        let claims = grantor_jose::jws::decode(&form["client_assertion"]).unwrap();
        assert_eq!(claims.iss, "CLIENT_ID");
        assert_eq!(claims.sub.as_deref(), Some("CLIENT_ID"));
        assert_eq!(claims.aud, "https://server/token");
        assert!((claims.exp - (now.0 as i64 + 3600)).abs() <= 5);
        assert!(claims.jti.map_or(false, |jti| !jti.is_empty()));
    }

    #[tokio::test]
    async fn token_source_reuses_token() {
        let stub = StubAuthority::new();
        stub.respond(StubResponse::json(200, r#"{"access_token":"abc","expires_in":3600}"#));
        let source = credentials(&stub)
            .with_auth_style(AuthStyle::InHeader)
            .token_source();

        let first = TokenSource::token(&source).await.unwrap();
        let second = TokenSource::token(&source).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(stub.requests().len(), 1);
    }
}
