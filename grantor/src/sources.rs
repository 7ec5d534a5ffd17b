//! Token sources
//!
//! A [`TokenSource`] produces a token that is valid right now. Sources
//! compose: a grant driver performs a fresh grant on every call, a
//! [`ReuseTokenSource`] caches whatever its parent produced until it goes
//! stale, and a [`DerivedTokenSource`] trades a parent token for a narrower
//! or impersonated one.

use std::{error, sync::Arc};

use async_trait::async_trait;

use crate::Token;

pub mod derived;
pub mod reuse;
mod static_token;

pub use derived::{DeriveToken, DerivedTokenError, DerivedTokenSource};
pub use reuse::ReuseTokenSource;
pub use static_token::StaticTokenSource;

/// An asynchronous source for tokens
///
/// Cancelling a request is done by dropping the returned future.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// The error type returned in the event that obtaining a token fails
    type Error: error::Error + Send + Sync + 'static;

    /// Obtains a token that is currently valid
    async fn token(&self) -> Result<Token, Self::Error>;
}

#[async_trait]
impl<S: TokenSource + ?Sized> TokenSource for Arc<S> {
    type Error = S::Error;

    #[inline]
    async fn token(&self) -> Result<Token, Self::Error> {
        (**self).token().await
    }
}

#[async_trait]
impl<S: TokenSource + ?Sized> TokenSource for Box<S> {
    type Error = S::Error;

    #[inline]
    async fn token(&self) -> Result<Token, Self::Error> {
        (**self).token().await
    }
}
