//! Descriptions of an authority's endpoints

use url::Url;

/// How a client authenticates itself to the token endpoint
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AuthStyle {
    /// Detect the style, trying [`InHeader`][Self::InHeader] and falling back to
    /// [`InParams`][Self::InParams], then remember what worked
    #[default]
    AutoDetect,
    /// HTTP Basic authentication with the URL-encoded client ID and secret
    InHeader,
    /// `client_id` and `client_secret` sent in the form body
    InParams,
    /// A signed JWT sent as `client_assertion` (RFC 7523)
    PrivateKeyJwt,
    /// Mutual TLS; only `client_id` is sent in the form body and the
    /// HTTP client is expected to present a client certificate
    Mtls,
}

/// The URLs of an authority's authorization, token, and device endpoints
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    auth_url: Url,
    token_url: Url,
    device_auth_url: Option<Url>,
    auth_style: AuthStyle,
}

impl Endpoint {
    /// Describes an authority by its authorization and token URLs
    pub fn new(auth_url: Url, token_url: Url) -> Self {
        Self {
            auth_url,
            token_url,
            device_auth_url: None,
            auth_style: AuthStyle::AutoDetect,
        }
    }

    /// Adds the device authorization URL (RFC 8628)
    pub fn with_device_auth_url(mut self, device_auth_url: Url) -> Self {
        self.device_auth_url = Some(device_auth_url);
        self
    }

    /// Fixes the client authentication style instead of detecting it
    pub fn with_auth_style(mut self, auth_style: AuthStyle) -> Self {
        self.auth_style = auth_style;
        self
    }

    /// The authorization URL users are sent to in the code flow
    #[inline]
    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    /// The token URL
    #[inline]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// The device authorization URL, if the authority supports the device flow
    #[inline]
    pub fn device_auth_url(&self) -> Option<&Url> {
        self.device_auth_url.as_ref()
    }

    /// The client authentication style hint
    #[inline]
    pub fn auth_style(&self) -> AuthStyle {
        self.auth_style
    }
}
