//! Sources that trade a parent token for another

use async_trait::async_trait;
use thiserror::Error;

use super::TokenSource;
use crate::Token;

/// Produces a new token from a parent token
///
/// Implementations typically narrow the parent's scope or impersonate
/// another principal; see [`TokenExchange`][crate::grants::TokenExchange].
#[async_trait]
pub trait DeriveToken: Send + Sync {
    /// The error returned when derivation fails
    type Error: std::error::Error + Send + Sync + 'static;

    /// Derives a token from `parent`
    async fn derive(&self, parent: &Token) -> Result<Token, Self::Error>;
}

/// An error from a [`DerivedTokenSource`]
#[derive(Debug, Error)]
pub enum DerivedTokenError<P, D> {
    /// The parent source failed
    #[error("unable to obtain parent token")]
    Parent(#[source] P),
    /// The parent token could not be exchanged
    #[error("unable to derive token")]
    Derive(#[source] D),
}

/// A source whose tokens are derived from those of a parent source
///
/// Every call derives a new token. Wrap the source in a
/// [`ReuseTokenSource`][super::ReuseTokenSource] to cache the result.
#[derive(Debug)]
pub struct DerivedTokenSource<P, D> {
    parent: P,
    deriver: D,
}

impl<P, D> DerivedTokenSource<P, D> {
    /// Derives tokens from `parent` using `deriver`
    pub fn new(parent: P, deriver: D) -> Self {
        Self { parent, deriver }
    }
}

#[async_trait]
impl<P, D> TokenSource for DerivedTokenSource<P, D>
where
    P: TokenSource,
    D: DeriveToken,
{
    type Error = DerivedTokenError<P::Error, D::Error>;

    async fn token(&self) -> Result<Token, Self::Error> {
        let parent = self.parent.token().await.map_err(DerivedTokenError::Parent)?;
        self.deriver
            .derive(&parent)
            .await
            .map_err(DerivedTokenError::Derive)
    }
}
