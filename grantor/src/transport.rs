//! The token endpoint wire protocol
//!
//! Builds form-encoded token requests, sends them, and decodes token responses
//! in either JSON or form-encoded shape. Nothing here retries or logs; every
//! failure is returned to the caller.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    StatusCode,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use url::{form_urlencoded, Url};

use crate::{
    clock::{Clock, DurationSecs, System},
    Error, RefreshToken, RetrieveError, Token,
};

/// The HTTP client used for every request to an authority
///
/// Middleware may be layered in to observe or replace the transport. Mutual
/// TLS is configured on the inner `reqwest::Client`.
pub type HttpClient = reqwest_middleware::ClientWithMiddleware;

/// Responses larger than this are truncated
pub const MAX_RESPONSE_BODY: usize = 1 << 20;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Form parameters for a token request
///
/// Parameters are kept sorted by name so that encoded bodies are stable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    /// An empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter, replacing any previous value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Sets a parameter only if the value is non-empty
    pub fn set_non_empty(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        let value = value.into();
        if !value.is_empty() {
            self.0.insert(name.into(), value);
        }
        self
    }

    /// Sets `scope` to the space-delimited scopes, if there are any
    pub fn set_scopes<S: AsRef<str>>(&mut self, scopes: &[S]) -> &mut Self {
        if !scopes.is_empty() {
            let joined = scopes
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join(" ");
            self.0.insert("scope".to_owned(), joined);
        }
        self
    }

    /// Gets a parameter
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Whether the parameter is set
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Iterates over the parameters in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Encodes the parameters as `application/x-www-form-urlencoded`
    pub fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.0.iter())
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// URL-encodes a value the way `application/x-www-form-urlencoded` does
pub(crate) fn form_escape(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Starts a `POST` of `params` to `url`
///
/// The returned builder may have further headers attached before sending.
pub fn form_request(
    client: &HttpClient,
    url: &Url,
    params: &Params,
) -> reqwest_middleware::RequestBuilder {
    client
        .post(url.clone())
        .header(header::CONTENT_TYPE, FORM_CONTENT_TYPE)
        .body(params.encode())
}

/// A raw response from an authority
#[derive(Debug)]
pub struct RawResponse {
    /// The HTTP status
    pub status: StatusCode,
    /// The response headers
    pub headers: HeaderMap,
    /// The response body, capped at [`MAX_RESPONSE_BODY`]
    pub body: Bytes,
}

impl RawResponse {
    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Converts the response into a rejection without structured fields
    pub(crate) fn into_rejection(self) -> RetrieveError {
        RetrieveError::new(self.status, self.headers, self.body)
    }

    fn media_type(&self) -> String {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_default()
    }
}

/// Sends a request and reads its response body
///
/// # Errors
///
/// The request could not be sent, or the body could not be read.
pub async fn send(request: reqwest_middleware::RequestBuilder) -> Result<RawResponse, Error> {
    let mut response = request.send().await.map_err(Error::Transport)?;
    let status = response.status();
    let headers = response.headers().clone();

    let mut body = BytesMut::new();
    while let Some(chunk) = response.chunk().await.map_err(Error::ResponseRead)? {
        let remaining = MAX_RESPONSE_BODY - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
        if body.len() >= MAX_RESPONSE_BODY {
            break;
        }
    }

    Ok(RawResponse {
        status,
        headers,
        body: body.freeze(),
    })
}

/// Sends a token request and decodes the token in the response
///
/// # Errors
///
/// Besides transport failures, the authority may reject the request with a
/// non-2xx status or an `error` field, or respond without an access token.
pub async fn request_token(request: reqwest_middleware::RequestBuilder) -> Result<Token, Error> {
    let response = send(request).await?;
    parse_token_response(response)
}

/// Decodes a token response
///
/// Form-encoded and `text/plain` bodies are parsed as query strings; all
/// other media types are parsed as JSON.
pub fn parse_token_response(response: RawResponse) -> Result<Token, Error> {
    let parsed = match parse_body(&response) {
        Ok(parsed) => parsed,
        Err(_) if !response.is_success() => return Err(response.into_rejection().into()),
        Err(err) => return Err(err),
    };

    if !response.is_success() || parsed.error.as_deref().map_or(false, |e| !e.is_empty()) {
        let rejection = response.into_rejection().with_fields(
            parsed.error,
            parsed.error_description,
            parsed.error_uri,
        );
        return Err(rejection.into());
    }

    parsed.into_token(&System)
}

/// Converts an unsuccessful response into a rejection
///
/// The RFC 6749 §5.2 error fields are included when the body contains them.
pub(crate) fn rejection(response: RawResponse) -> RetrieveError {
    match parse_body(&response) {
        Ok(parsed) => response.into_rejection().with_fields(
            parsed.error,
            parsed.error_description,
            parsed.error_uri,
        ),
        Err(_) => response.into_rejection(),
    }
}

fn parse_body(response: &RawResponse) -> Result<TokenResponse, Error> {
    match response.media_type().as_str() {
        "application/x-www-form-urlencoded" | "text/plain" => Ok(parse_form(&response.body)),
        _ => parse_json(&response.body),
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error_uri: Option<String>,
    #[serde(skip)]
    raw: Map<String, Value>,
}

impl TokenResponse {
    fn into_token<C: Clock>(self, clock: &C) -> Result<Token, Error> {
        if self.access_token.is_empty() {
            return Err(Error::MissingAccessToken);
        }

        let expiry = self
            .expires_in
            .as_ref()
            .and_then(seconds)
            .map(|secs| clock.now() + secs);

        Ok(Token::new(self.access_token)
            .with_token_type(self.token_type)
            .with_refresh_token(
                self.refresh_token
                    .filter(|r| !r.is_empty())
                    .map(RefreshToken::new),
            )
            .with_expiry(expiry)
            .with_extra(self.raw))
    }
}

/// Interprets a lifetime in seconds, accepting numbers or numeric strings
///
/// Zero and negative lifetimes mean the token does not expire.
fn seconds(value: &Value) -> Option<DurationSecs> {
    let secs = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    secs.filter(|s| *s > 0)
        .map(|s| DurationSecs(s.min(i32::MAX as u64)))
}

fn parse_form(body: &[u8]) -> TokenResponse {
    let mut response = TokenResponse::default();
    for (key, value) in form_urlencoded::parse(body) {
        match key.as_ref() {
            "access_token" => response.access_token = value.to_string(),
            "token_type" => response.token_type = value.to_string(),
            "refresh_token" => response.refresh_token = Some(value.to_string()),
            "expires_in" => response.expires_in = Some(Value::String(value.to_string())),
            "error" => response.error = Some(value.to_string()),
            "error_description" => response.error_description = Some(value.to_string()),
            "error_uri" => response.error_uri = Some(value.to_string()),
            _ => {}
        }
        response
            .raw
            .entry(key.into_owned())
            .or_insert_with(|| Value::String(value.into_owned()));
    }
    response
}

fn parse_json(body: &[u8]) -> Result<TokenResponse, Error> {
    let raw: Map<String, Value> = serde_json::from_slice(body).map_err(Error::malformed)?;
    let mut response: TokenResponse =
        serde_json::from_value(Value::Object(raw.clone())).map_err(Error::malformed)?;
    response.raw = raw;
    Ok(response)
}

/// Builds the value of a Basic `Authorization` header
///
/// Both halves are form-encoded before joining, as RFC 6749 §2.3.1 requires.
pub(crate) fn basic_authorization(user: &str, password: &str) -> Result<HeaderValue, Error> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let credentials = format!("{}:{}", form_escape(user), form_escape(password));
    let mut value = HeaderValue::try_from(format!("Basic {}", STANDARD.encode(credentials)))
        .map_err(|_| Error::config("client credentials cannot be sent in a header"))?;
    value.set_sensitive(true);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::UnixTime, ErrorCode};

    fn response(status: u16, content_type: &str, body: &'static str) -> RawResponse {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        RawResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn params_encode_sorted_with_plus_for_spaces() {
        let mut params = Params::new();
        params
            .set("grant_type", "client_credentials")
            .set_scopes(&["scope1", "scope2"])
            .set("audience", "audience1");
        assert_eq!(
            params.encode(),
            "audience=audience1&grant_type=client_credentials&scope=scope1+scope2"
        );
    }

    #[test]
    fn empty_values_and_scopes_are_skipped() {
        let mut params = Params::new();
        params
            .set_non_empty("redirect_uri", "")
            .set_scopes::<&str>(&[]);
        assert_eq!(params.encode(), "");
    }

    #[test]
    fn basic_header_escapes_credentials() {
        let value = basic_authorization("CLIENT_ID", "CLIENT_SECRET").unwrap();
        assert_eq!(value, "Basic Q0xJRU5UX0lEOkNMSUVOVF9TRUNSRVQ=");
        assert!(value.is_sensitive());

        // "a b:c" becomes "a+b:c%3A" before encoding
        let value = basic_authorization("a b", "c:").unwrap();
        assert_eq!(value, "Basic YStiOmMlM0E=");
    }

    #[test]
    fn parses_form_encoded_token() {
        let token = parse_token_response(response(
            200,
            "application/x-www-form-urlencoded",
            "access_token=90d64460d14870c08c81352a05dedd3465940a7c&token_type=bearer&scope=user",
        ))
        .unwrap();

        assert_eq!(token.access_token().as_str(), "90d64460d14870c08c81352a05dedd3465940a7c");
        assert_eq!(token.token_type(), "bearer");
        assert_eq!(token.expiry(), None);
        assert_eq!(token.extra("scope"), Some(&Value::from("user")));
        assert!(token.is_valid());
    }

    #[test]
    fn parses_text_plain_as_form() {
        let before = System.now();
        let token = parse_token_response(response(
            200,
            "text/plain; charset=utf-8",
            "access_token=abc&expires_in=3600&refresh_token=r1",
        ))
        .unwrap();

        let expiry = token.expiry().unwrap();
        assert!(expiry >= before + DurationSecs(3600));
        assert!(expiry <= System.now() + DurationSecs(3600));
        assert_eq!(token.refresh_token().unwrap().as_str(), "r1");
        assert_eq!(token.extra("expires_in"), Some(&Value::from("3600")));
    }

    #[test]
    fn parses_json_token_with_extras() {
        let token = parse_token_response(response(
            200,
            "application/json; charset=utf-8",
            r#"{"access_token":"abc","token_type":"Bearer","expires_in":60,"id_token":"eyJ","custom":7}"#,
        ))
        .unwrap();

        assert_eq!(token.access_token().as_str(), "abc");
        assert!(token.expiry().is_some());
        assert_eq!(token.id_token(), Some("eyJ"));
        assert_eq!(token.extra("custom"), Some(&Value::from(7)));
    }

    #[test]
    fn unknown_media_type_is_parsed_as_json() {
        let token = parse_token_response(response(200, "", r#"{"access_token":"abc"}"#)).unwrap();
        assert_eq!(token.access_token().as_str(), "abc");
    }

    #[test]
    fn string_and_zero_lifetimes() {
        assert_eq!(seconds(&Value::from("120")), Some(DurationSecs(120)));
        assert_eq!(seconds(&Value::from(0)), None);
        assert_eq!(seconds(&Value::from(-5)), None);
        assert_eq!(seconds(&Value::from(1.5e3)), Some(DurationSecs(1500)));
        assert_eq!(seconds(&Value::from("soon")), None);
    }

    #[test]
    fn expiry_uses_clock() {
        let parsed = parse_json(br#"{"access_token":"abc","expires_in":"30"}"#).unwrap();
        let token = parsed
            .into_token(&crate::clock::TestClock::new(UnixTime(100)))
            .unwrap();
        assert_eq!(token.expiry(), Some(UnixTime(130)));
    }

    #[test]
    fn missing_access_token_is_an_error() {
        let err = parse_token_response(response(
            200,
            "application/json",
            r#"{"token_type":"bearer"}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, Error::MissingAccessToken));
    }

    #[test]
    fn json_error_body_yields_structured_rejection() {
        let err = parse_token_response(response(
            400,
            "application/json",
            r#"{"error":"invalid_grant","error_description":"expired","error_uri":"https://example.com/e"}"#,
        ))
        .unwrap_err();

        let rejection = err.retrieve_error().unwrap();
        assert_eq!(rejection.status(), StatusCode::BAD_REQUEST);
        assert_eq!(rejection.code(), Some(&ErrorCode::InvalidGrant));
        assert_eq!(rejection.description(), Some("expired"));
        assert_eq!(rejection.uri(), Some("https://example.com/e"));
    }

    #[test]
    fn form_error_body_yields_structured_rejection() {
        let err = parse_token_response(response(
            401,
            "application/x-www-form-urlencoded",
            "error=invalid_client",
        ))
        .unwrap_err();
        assert_eq!(err.error_code(), Some(&ErrorCode::InvalidClient));
    }

    #[test]
    fn unparsable_error_body_is_kept_raw() {
        let err = parse_token_response(response(502, "text/html", "<html>bad gateway</html>"))
            .unwrap_err();

        let rejection = err.retrieve_error().unwrap();
        assert_eq!(rejection.code(), None);
        assert_eq!(rejection.body(), b"<html>bad gateway</html>");
    }

    #[test]
    fn error_field_on_success_status_is_a_rejection() {
        let err = parse_token_response(response(
            200,
            "application/json",
            r#"{"error":"slow_down"}"#,
        ))
        .unwrap_err();
        assert_eq!(err.error_code(), Some(&ErrorCode::SlowDown));
    }

    #[test]
    fn unparsable_success_body_is_malformed() {
        let err = parse_token_response(response(200, "application/json", "nope")).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }
}
