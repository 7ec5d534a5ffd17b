use std::convert::Infallible;

use async_trait::async_trait;

use super::TokenSource;
use crate::Token;

/// A source that always returns the same token
///
/// The token is never refreshed; once it expires, callers keep receiving
/// the expired token and should check its validity themselves.
#[derive(Clone, Debug)]
pub struct StaticTokenSource {
    token: Token,
}

impl StaticTokenSource {
    /// Wraps a fixed token
    pub fn new(token: Token) -> Self {
        Self { token }
    }
}

impl From<Token> for StaticTokenSource {
    fn from(token: Token) -> Self {
        Self::new(token)
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    type Error = Infallible;

    async fn token(&self) -> Result<Token, Self::Error> {
        Ok(self.token.clone())
    }
}
