//! Errors produced while obtaining tokens

use std::{borrow::Cow, error::Error as StdError, fmt, time::Duration};

use bytes::Bytes;
use reqwest::{
    header::{self, HeaderMap},
    StatusCode,
};
use thiserror::Error;

/// An error while attempting to obtain a token
#[derive(Debug, Error)]
pub enum Error {
    /// The client is misconfigured; retrying will not help
    #[error("invalid configuration: {0}")]
    Config(Cow<'static, str>),

    /// Unable to send a request to the authority
    #[error("error sending request to authority")]
    Transport(#[source] reqwest_middleware::Error),

    /// Unable to read the response from the authority
    #[error("error reading response from authority")]
    ResponseRead(#[source] reqwest::Error),

    /// The authority rejected the request
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),

    /// The authority responded successfully, but the body could not be understood
    #[error("cannot parse response from authority")]
    MalformedResponse(#[source] Box<dyn StdError + Send + Sync + 'static>),

    /// The authority responded successfully without an access token
    #[error("server response missing access_token")]
    MissingAccessToken,

    /// An ID token was required, but the authority did not return one
    #[error("server response missing id_token")]
    MissingIdToken,

    /// A refresh was requested, but no refresh token is available
    #[error("token expired and refresh token is not set")]
    MissingRefreshToken,

    /// The state returned to the redirect URL does not match the state sent
    #[error("state mismatch in authorization response")]
    StateMismatch,

    /// Unable to produce or decode a signed JWT
    #[error("unable to process JWT")]
    Jose(#[from] grantor_jose::Error),

    /// The device code expired before the user completed authorization
    #[error("device code expired before authorization completed")]
    DeviceCodeExpired,

    /// The operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn malformed(source: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self::MalformedResponse(source.into())
    }

    /// The authority's rejection, if that is what this error is
    pub fn retrieve_error(&self) -> Option<&RetrieveError> {
        match self {
            Self::Retrieve(err) => Some(err),
            _ => None,
        }
    }

    /// The RFC 6749 error code returned by the authority, if any
    pub fn error_code(&self) -> Option<&ErrorCode> {
        self.retrieve_error().and_then(RetrieveError::code)
    }

    /// Whether repeating the same request later could succeed
    ///
    /// Network failures and garbled responses are transient. Misconfiguration
    /// is not, and neither is a rejection of the client or its grant.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_)
            | Self::ResponseRead(_)
            | Self::MalformedResponse(_)
            | Self::MissingAccessToken => true,
            Self::Retrieve(err) => err.is_transient(),
            Self::Config(_)
            | Self::MissingIdToken
            | Self::MissingRefreshToken
            | Self::StateMismatch
            | Self::Jose(_)
            | Self::DeviceCodeExpired
            | Self::Cancelled => false,
        }
    }
}

impl From<grantor_jose::error::KeyRejected> for Error {
    fn from(err: grantor_jose::error::KeyRejected) -> Self {
        Self::Jose(err.into())
    }
}

/// Error codes defined by RFC 6749 §5.2 and RFC 8628 §3.5
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    /// `invalid_request`
    InvalidRequest,
    /// `invalid_client`
    InvalidClient,
    /// `invalid_grant`
    InvalidGrant,
    /// `unauthorized_client`
    UnauthorizedClient,
    /// `unsupported_grant_type`
    UnsupportedGrantType,
    /// `invalid_scope`
    InvalidScope,
    /// `authorization_pending`: the user has not yet completed device authorization
    AuthorizationPending,
    /// `slow_down`: the client is polling too quickly
    SlowDown,
    /// `access_denied`: the user declined the authorization request
    AccessDenied,
    /// `expired_token`: the device code has expired
    ExpiredToken,
    /// Any other code
    Other(String),
}

impl ErrorCode {
    /// The code as sent on the wire
    pub fn as_str(&self) -> &str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::InvalidScope => "invalid_scope",
            Self::AuthorizationPending => "authorization_pending",
            Self::SlowDown => "slow_down",
            Self::AccessDenied => "access_denied",
            Self::ExpiredToken => "expired_token",
            Self::Other(code) => code,
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        match code {
            "invalid_request" => Self::InvalidRequest,
            "invalid_client" => Self::InvalidClient,
            "invalid_grant" => Self::InvalidGrant,
            "unauthorized_client" => Self::UnauthorizedClient,
            "unsupported_grant_type" => Self::UnsupportedGrantType,
            "invalid_scope" => Self::InvalidScope,
            "authorization_pending" => Self::AuthorizationPending,
            "slow_down" => Self::SlowDown,
            "access_denied" => Self::AccessDenied,
            "expired_token" => Self::ExpiredToken,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejection by the authority
///
/// Carries the status, headers, and raw body of the response, along with the
/// structured RFC 6749 §5.2 error fields when the body contained them.
#[derive(Clone, Debug)]
pub struct RetrieveError {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    code: Option<ErrorCode>,
    description: Option<String>,
    uri: Option<String>,
}

impl RetrieveError {
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            code: None,
            description: None,
            uri: None,
        }
    }

    pub(crate) fn with_fields(
        mut self,
        code: Option<String>,
        description: Option<String>,
        uri: Option<String>,
    ) -> Self {
        self.code = code
            .filter(|c| !c.is_empty())
            .map(|c| ErrorCode::from(c.as_str()));
        self.description = description.filter(|d| !d.is_empty());
        self.uri = uri.filter(|u| !u.is_empty());
        self
    }

    /// The HTTP status of the response
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The headers of the response
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The raw body of the response, capped at 1 MiB
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The `error` field of the response
    pub fn code(&self) -> Option<&ErrorCode> {
        self.code.as_ref()
    }

    /// The `error_description` field of the response
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The `error_uri` field of the response
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// The delay requested by the authority's `Retry-After` header
    ///
    /// Only the delta-seconds form is understood; HTTP dates are ignored.
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(header::RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
            .map(Duration::from_secs)
    }

    /// Whether the authority might accept the same request later
    ///
    /// Without an error code, only server errors, `408`, and `429` count.
    pub fn is_transient(&self) -> bool {
        match &self.code {
            Some(
                ErrorCode::InvalidRequest
                | ErrorCode::InvalidClient
                | ErrorCode::InvalidGrant
                | ErrorCode::UnauthorizedClient
                | ErrorCode::UnsupportedGrantType
                | ErrorCode::InvalidScope
                | ErrorCode::AccessDenied
                | ErrorCode::ExpiredToken,
            ) => false,
            Some(_) => true,
            None => {
                self.status.is_server_error()
                    || self.status == StatusCode::REQUEST_TIMEOUT
                    || self.status == StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

impl fmt::Display for RetrieveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.code {
            Some(code) => {
                write!(f, "authority returned {:?}", code.as_str())?;
                if let Some(description) = &self.description {
                    write!(f, " {:?}", description)?;
                }
                if let Some(uri) = &self.uri {
                    write!(f, " {:?}", uri)?;
                }
                Ok(())
            }
            None => write!(
                f,
                "cannot fetch token: {}; response: {}",
                self.status,
                String::from_utf8_lossy(&self.body)
            ),
        }
    }
}

impl StdError for RetrieveError {}
