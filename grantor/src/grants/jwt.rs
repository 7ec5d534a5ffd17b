//! The two-legged JWT bearer grant (RFC 7523 §2.1)

use async_trait::async_trait;
use grantor_jose::{
    jws::{self, ClaimSet, Header},
    PrivateKey,
};
use serde_json::{Map, Value};
use url::Url;

use crate::{
    clock::{Clock, DurationSecs, System, UnixTime},
    sources::{ReuseTokenSource, TokenSource},
    transport::{self, HttpClient, Params},
    Error, Token,
};

/// The `grant_type` of the JWT bearer grant
pub const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Configuration for obtaining tokens with a signed JWT assertion
///
/// This is typically used by service accounts, where the assertion is
/// signed with the account's private key and no user is involved.
#[derive(Clone, Debug)]
pub struct JwtConfig {
    client: HttpClient,
    email: String,
    key: PrivateKey,
    key_id: Option<String>,
    token_url: Url,
    scopes: Vec<String>,
    subject: Option<String>,
    audience: Option<String>,
    lifetime: DurationSecs,
    private_claims: Map<String, Value>,
    use_id_token: bool,
}

impl JwtConfig {
    /// Requests tokens from `token_url` on behalf of `email`
    pub fn new(
        client: HttpClient,
        email: impl Into<String>,
        key: PrivateKey,
        token_url: Url,
    ) -> Self {
        Self {
            client,
            email: email.into(),
            key,
            key_id: None,
            token_url,
            scopes: Vec::new(),
            subject: None,
            audience: None,
            lifetime: DurationSecs(3600),
            private_claims: Map::new(),
            use_id_token: false,
        }
    }

    /// Sets the `kid` header of the assertion
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
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

    /// Impersonates `subject`
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Addresses the assertion to `audience` rather than the token URL
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Sets how long the assertion remains valid
    pub fn with_lifetime(mut self, lifetime: DurationSecs) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Adds a claim to the assertion
    pub fn with_private_claim(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.private_claims.insert(name.into(), value.into());
        self
    }

    /// Uses the ID token returned by the authority as the access token
    pub fn using_id_token(mut self) -> Self {
        self.use_id_token = true;
        self
    }

    fn assertion(&self, now: UnixTime) -> Result<String, Error> {
        let claims = ClaimSet {
            iss: self.email.clone(),
            scope: self.scopes.join(" "),
            aud: self
                .audience
                .clone()
                .unwrap_or_else(|| self.token_url.as_str().to_owned()),
            iat: now.0 as i64,
            exp: (now + self.lifetime).0 as i64,
            sub: self.subject.clone(),
            prn: self.subject.clone(),
            private_claims: self.private_claims.clone(),
            ..ClaimSet::default()
        };

        let mut header = Header::rs256();
        if let Some(key_id) = &self.key_id {
            header = header.with_key_id(key_id.clone());
        }

        Ok(jws::encode(&header, &claims, &self.key)?)
    }

    /// Requests a new token
    ///
    /// If the authority returns an ID token, the token's expiry is taken from
    /// the ID token's `exp` claim.
    ///
    /// # Errors
    ///
    /// The assertion could not be signed, the request failed, the authority
    /// rejected the assertion, or an ID token was required but not returned.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(token_url = %self.token_url, iss = %self.email),
    )]
    pub async fn token(&self) -> Result<Token, Error> {
        let mut params = Params::new();
        params
            .set("grant_type", JWT_BEARER_GRANT_TYPE)
            .set("assertion", self.assertion(System.now())?);

        let request = transport::form_request(&self.client, &self.token_url, &params);
        let mut token = transport::request_token(request).await?;

        if let Some(id_token) = token.id_token().map(ToOwned::to_owned) {
            let claims = jws::decode(&id_token)?;
            token = token.with_expiry(UnixTime(claims.exp.max(0) as u64));
            if self.use_id_token {
                token.set_access_token(id_token);
            }
        } else if self.use_id_token {
            return Err(Error::MissingIdToken);
        }

        Ok(token)
    }

    /// A source that reuses tokens until they go stale
    pub fn token_source(self) -> ReuseTokenSource<Self> {
        ReuseTokenSource::new(self, None)
    }
}

#[async_trait]
impl TokenSource for JwtConfig {
    type Error = Error;

    async fn token(&self) -> Result<Token, Self::Error> {
        JwtConfig::token(self).await
    }
}
