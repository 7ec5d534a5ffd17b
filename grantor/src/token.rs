use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    clock::{Clock, DurationSecs, System, UnixTime},
    AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef,
};

/// How long before its expiry a token stops being handed out
///
/// A token that expires within this window is treated as already expired so
/// that callers are not given a token that dies in flight.
pub const DEFAULT_EARLY_EXPIRY: DurationSecs = DurationSecs(10);

/// The credentials obtained from an authority
///
/// Tokens are plain values: they hold no reference back to whatever source
/// produced them and may be freely cloned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Token {
    access_token: AccessToken,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<RefreshToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<UnixTime>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    extra: Map<String, Value>,
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is valid and may be used
    Fresh,
    /// The token has not expired, but is within the early expiry window
    Stale,
    /// The token is no longer valid
    Expired,
}

impl Token {
    /// Constructs a bearer token without an expiry
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: AccessToken::new(access_token.into()),
            token_type: String::new(),
            refresh_token: None,
            expiry: None,
            extra: Map::new(),
        }
    }

    /// Sets the token type as declared by the authority
    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = token_type.into();
        self
    }

    /// Sets the refresh token
    pub fn with_refresh_token(mut self, refresh_token: impl Into<Option<RefreshToken>>) -> Self {
        self.refresh_token = refresh_token.into();
        self
    }

    /// Sets the expiry
    pub fn with_expiry(mut self, expiry: impl Into<Option<UnixTime>>) -> Self {
        self.expiry = expiry.into();
        self
    }

    /// Replaces the additional fields returned with the token
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the token type exactly as declared by the authority
    #[inline]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Gets the refresh token, if any
    #[inline]
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// Gets the expiry, if the token expires
    #[inline]
    pub fn expiry(&self) -> Option<UnixTime> {
        self.expiry
    }

    /// Gets an additional field returned by the authority
    ///
    /// For form-encoded responses every field is a string.
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Gets all additional fields returned by the authority
    #[inline]
    pub fn extras(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Gets the OpenID Connect ID token, if the authority returned one
    pub fn id_token(&self) -> Option<&str> {
        self.extra
            .get("id_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }

    /// The authorization scheme to present this token with
    ///
    /// The well-known `bearer`, `mac`, and `basic` types are matched without
    /// regard to case and given their canonical spelling. Other types have
    /// their first letter upper-cased, and an empty type means `Bearer`.
    pub fn scheme(&self) -> Cow<'_, str> {
        let t = self.token_type.as_str();
        if t.is_empty() || t.eq_ignore_ascii_case("bearer") {
            Cow::Borrowed("Bearer")
        } else if t.eq_ignore_ascii_case("mac") {
            Cow::Borrowed("MAC")
        } else if t.eq_ignore_ascii_case("basic") {
            Cow::Borrowed("Basic")
        } else {
            let mut chars = t.chars();
            match chars.next() {
                Some(first) if !first.is_uppercase() => {
                    Cow::Owned(first.to_uppercase().chain(chars).collect())
                }
                _ => Cow::Borrowed(t),
            }
        }
    }

    /// The value to send in an `Authorization` header
    pub fn authorization(&self) -> String {
        format!("{} {}", self.scheme(), self.access_token.as_str())
    }

    /// Whether the token may currently be used, using the default early expiry
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(System.now(), DEFAULT_EARLY_EXPIRY)
    }

    /// Whether the token may be used according to the provided clock
    #[inline]
    pub fn is_valid_with_clock<C: Clock>(&self, clock: &C, early_expiry: DurationSecs) -> bool {
        self.is_valid_at(clock.now(), early_expiry)
    }

    /// Whether the token may be used at `time`
    ///
    /// A token is valid when its access token is non-empty and it either has
    /// no expiry or expires strictly after `time + early_expiry`.
    pub fn is_valid_at(&self, time: UnixTime, early_expiry: DurationSecs) -> bool {
        !self.access_token.as_str().is_empty()
            && self.token_status_at(time, early_expiry) == TokenStatus::Fresh
    }

    /// Gets the token's lifetime status as of the provided time
    pub fn token_status_at(&self, time: UnixTime, early_expiry: DurationSecs) -> TokenStatus {
        match self.expiry {
            None => TokenStatus::Fresh,
            Some(expiry) if time + early_expiry < expiry => TokenStatus::Fresh,
            Some(expiry) if time < expiry => TokenStatus::Stale,
            Some(_) => TokenStatus::Expired,
        }
    }

    /// Gets how much longer the token would be valid as of the provided time
    ///
    /// Returns `None` for tokens that do not expire.
    pub fn until_expired_at(&self, time: UnixTime) -> Option<DurationSecs> {
        self.expiry.map(|expiry| expiry - time)
    }

    pub(crate) fn set_access_token(&mut self, access_token: impl Into<String>) {
        self.access_token = AccessToken::new(access_token.into());
    }

    pub(crate) fn set_refresh_token_if_absent(&mut self, refresh_token: &RefreshTokenRef) {
        if self.refresh_token.is_none() {
            self.refresh_token = Some(refresh_token.to_owned());
        }
    }
}
