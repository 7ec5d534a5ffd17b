use std::fmt;

use aliri_braid::braid;

/// Implements redacting `Debug` and `Display` for a secret-bearing borrowed type
///
/// Secrets are only revealed with the alternate flag (`{:#}`), and `Debug`
/// truncates the revealed value to the formatter width or `$default` characters.
macro_rules! redacted {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    reveal_prefix(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    reveal_prefix(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn reveal_prefix(secret: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        return f.write_str("…");
    }

    match secret.char_indices().nth(max_len - 1) {
        Some((idx, _)) => {
            f.write_str(&secret[..idx])?;
            f.write_str("…")
        }
        None => f.write_str(secret),
    }
}

/// An OAuth2 client identifier
#[braid(serde)]
pub struct ClientId;

/// An OAuth2 client secret
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

redacted!(ClientSecretRef: "CLIENT SECRET", 5);

/// An access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

redacted!(AccessTokenRef: "ACCESS TOKEN", 15);

/// A refresh token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

redacted!(RefreshTokenRef: "REFRESH TOKEN", 5);

/// An authorization code returned to the redirect URL of the code flow
#[braid(serde, debug = "owned", display = "owned")]
pub struct AuthorizationCode;

redacted!(AuthorizationCodeRef: "AUTHORIZATION CODE", 5);

/// A device verification code, used while polling in the device flow
#[braid(serde, debug = "owned", display = "owned")]
pub struct DeviceCode;

redacted!(DeviceCodeRef: "DEVICE CODE", 5);
