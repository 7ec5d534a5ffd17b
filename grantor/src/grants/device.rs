//! The device authorization grant (RFC 8628)

use std::time::Duration;

use reqwest::header;
use serde::{Deserialize, Serialize};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{AuthCodeOption, Config};
use crate::{
    clock::{Clock, DurationSecs, System, UnixTime},
    transport::{self, Params},
    DeviceCode, Error, ErrorCode, Token,
};

/// The `grant_type` used when polling for a device access token
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

/// A device authorization, describing what the user must do to approve the device
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAuthResponse {
    /// The code the device uses to poll for a token
    pub device_code: DeviceCode,
    /// The code the user enters at the verification URI
    pub user_code: String,
    /// Where the user goes to approve the device
    pub verification_uri: String,
    /// A verification URI with the user code already filled in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    /// When the device code expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<UnixTime>,
    /// The minimum number of seconds between polls; zero means the default of five
    #[serde(default)]
    pub interval: u64,
}

#[derive(Deserialize)]
struct RawDeviceAuth {
    device_code: String,
    #[serde(default)]
    user_code: String,
    #[serde(default)]
    verification_uri: Option<String>,
    #[serde(default)]
    verification_url: Option<String>,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    #[serde(default)]
    expires_in: i64,
    #[serde(default)]
    interval: u64,
}

impl RawDeviceAuth {
    fn into_response(self, issued: UnixTime) -> DeviceAuthResponse {
        DeviceAuthResponse {
            device_code: DeviceCode::new(self.device_code),
            user_code: self.user_code,
            verification_uri: self
                .verification_uri
                .filter(|uri| !uri.is_empty())
                .or(self.verification_url)
                .unwrap_or_default(),
            verification_uri_complete: self.verification_uri_complete.filter(|uri| !uri.is_empty()),
            expiry: u64::try_from(self.expires_in)
                .ok()
                .filter(|&secs| secs > 0)
                .map(|secs| issued + DurationSecs(secs)),
            interval: self.interval,
        }
    }
}

impl Config {
    /// Starts a device authorization
    ///
    /// Show the user the returned verification URI and user code, then call
    /// [`device_access_token`][Self::device_access_token] to wait for them
    /// to approve the device.
    ///
    /// # Errors
    ///
    /// The endpoint has no device authorization URL, the request failed, or
    /// the authority rejected it.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn device_auth(&self, opts: &[AuthCodeOption]) -> Result<DeviceAuthResponse, Error> {
        let url = self
            .endpoint()
            .device_auth_url()
            .ok_or_else(|| Error::config("endpoint has no device authorization URL"))?;

        let mut params = Params::new();
        params
            .set("client_id", self.identity().client_id().as_str())
            .set_scopes(self.scopes());
        for opt in opts {
            opt.apply(&mut params, self.allows_plain_pkce())?;
        }

        let issued = System.now();
        let request = transport::form_request(self.client(), url, &params)
            .header(header::ACCEPT, "application/json");
        let response = transport::send(request).await?;

        if !response.is_success() {
            return Err(transport::rejection(response).into());
        }

        let raw: RawDeviceAuth = serde_json::from_slice(&response.body).map_err(Error::malformed)?;
        Ok(raw.into_response(issued))
    }

    /// Polls the token endpoint until the user approves the device
    ///
    /// Polling stops when the device code expires. To stop polling earlier,
    /// drop the returned future or use
    /// [`device_access_token_with_cancellation`][Self::device_access_token_with_cancellation].
    ///
    /// # Errors
    ///
    /// The user denied the request, the device code expired, or the request
    /// failed.
    pub async fn device_access_token(&self, auth: &DeviceAuthResponse) -> Result<Token, Error> {
        self.device_access_token_with_cancellation(auth, &CancellationToken::new())
            .await
    }

    /// Polls the token endpoint until the user approves the device or `cancel` fires
    ///
    /// Polls are spaced by the authorization's interval. Each `slow_down`
    /// response lengthens the interval by five seconds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires and
    /// [`Error::DeviceCodeExpired`] if the device code expires first.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn device_access_token_with_cancellation(
        &self,
        auth: &DeviceAuthResponse,
        cancel: &CancellationToken,
    ) -> Result<Token, Error> {
        let mut params = Params::new();
        params
            .set("grant_type", DEVICE_CODE_GRANT_TYPE)
            .set("device_code", auth.device_code.as_str())
            .set("client_id", self.identity().client_id().as_str())
            .set_scopes(self.scopes());

        let expired = async {
            match auth.expiry {
                Some(expiry) => {
                    let remaining = expiry - System.now();
                    sleep_until(Instant::now() + Duration::from(remaining)).await
                }
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expired);

        let mut period = match auth.interval {
            0 => DEFAULT_INTERVAL,
            secs => Duration::from_secs(secs),
        };
        let mut ticker = poll_ticker(period);

        loop {
            let poll = async {
                ticker.tick().await;
                self.retrieve(&params).await
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = &mut expired => return Err(Error::DeviceCodeExpired),
                result = poll => result,
            };

            let err = match result {
                Ok(token) => return Ok(token),
                Err(err) => err,
            };

            match err.error_code() {
                Some(ErrorCode::AuthorizationPending) => {
                    tracing::trace!("authorization pending");
                }
                Some(ErrorCode::SlowDown) => {
                    period += SLOW_DOWN_INCREMENT;
                    tracing::debug!(
                        interval_secs = period.as_secs(),
                        "authority asked to slow down"
                    );
                    ticker = poll_ticker(period);
                }
                _ => return Err(err),
            }
        }
    }
}

/// Ticks every `period`, starting one period from now
///
/// A tick that was missed while a slow poll was in flight is delayed rather
/// than fired in a burst, so polls are never sent back to back.
fn poll_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
