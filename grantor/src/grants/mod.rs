//! Grant drivers
//!
//! Each driver turns typed inputs into a token request, sends it to the
//! authority, and converts the response into a [`Token`][crate::Token].
//! Drivers do not cache or retry; wrap them in a
//! [`ReuseTokenSource`][crate::sources::ReuseTokenSource] to reuse tokens.

mod client_credentials;
mod code;
mod device;
mod exchange;
mod jwt;
mod refresh;

pub use client_credentials::ClientCredentials;
pub use code::{verify_state, AuthCodeOption, Config, ExchangeOption};
pub use device::{DeviceAuthResponse, DEVICE_CODE_GRANT_TYPE};
pub use exchange::{TokenExchange, ACCESS_TOKEN_TYPE, TOKEN_EXCHANGE_GRANT_TYPE};
pub use jwt::{JwtConfig, JWT_BEARER_GRANT_TYPE};
pub use refresh::RefreshTokenSource;
