use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::Config;
use crate::{sources::TokenSource, Error, RefreshToken, Token};

/// A source that obtains every token by refreshing
///
/// When the authority rotates the refresh token, the new one is used for
/// the next refresh.
#[derive(Debug)]
pub struct RefreshTokenSource {
    config: Config,
    refresh_token: Mutex<Option<RefreshToken>>,
}

impl RefreshTokenSource {
    /// Refreshes with `refresh_token` using `config`
    pub fn new(config: Config, refresh_token: Option<RefreshToken>) -> Self {
        Self {
            config,
            refresh_token: Mutex::new(refresh_token),
        }
    }

    fn current(&self) -> Option<RefreshToken> {
        self.refresh_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TokenSource for RefreshTokenSource {
    type Error = Error;

    async fn token(&self) -> Result<Token, Self::Error> {
        let refresh_token = self.current().ok_or(Error::MissingRefreshToken)?;
        let token = self.config.refresh(&refresh_token).await?;

        if let Some(rotated) = token.refresh_token() {
            if rotated != &*refresh_token {
                tracing::debug!("authority rotated refresh token");
                *self
                    .refresh_token
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(rotated.to_owned());
            }
        }

        Ok(token)
    }
}
