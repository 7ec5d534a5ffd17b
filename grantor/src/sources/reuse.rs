//! A caching layer over another token source

use std::fmt;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::TokenSource;
use crate::{
    clock::{Clock, DurationSecs, System},
    Token, DEFAULT_EARLY_EXPIRY,
};

/// Reuses a token until it becomes stale, then obtains a new one from a parent source
///
/// At most one request to the parent is in flight at a time. The cache lock
/// is held while the parent is consulted, so callers that arrive during a
/// refresh wait for it to finish and then receive the freshly cached token
/// rather than starting refreshes of their own. The flip side is that every
/// caller sharing a source also shares the latency of its refreshes.
///
/// Failures are not cached: a failed refresh leaves the previous token in
/// place and returns the error to the caller. Dropping a call while it waits
/// on the parent likewise leaves the cache unchanged.
pub struct ReuseTokenSource<S, C = System> {
    parent: S,
    current: Mutex<Option<Token>>,
    early_expiry: DurationSecs,
    clock: C,
}

impl<S> ReuseTokenSource<S> {
    /// Wraps `parent`, optionally seeding the cache with an existing token
    pub fn new(parent: S, seed: Option<Token>) -> Self {
        Self {
            parent,
            current: Mutex::new(seed),
            early_expiry: DEFAULT_EARLY_EXPIRY,
            clock: System,
        }
    }
}

impl<S, C> ReuseTokenSource<S, C> {
    /// Treats tokens as stale this long before they actually expire
    ///
    /// Defaults to [`DEFAULT_EARLY_EXPIRY`].
    pub fn with_early_expiry(mut self, early_expiry: DurationSecs) -> Self {
        self.early_expiry = early_expiry;
        self
    }

    /// Judges token validity against the given clock
    pub fn with_clock<C2>(self, clock: C2) -> ReuseTokenSource<S, C2> {
        ReuseTokenSource {
            parent: self.parent,
            current: self.current,
            early_expiry: self.early_expiry,
            clock,
        }
    }

    /// The parent source
    pub fn parent(&self) -> &S {
        &self.parent
    }
}

impl<S: fmt::Debug, C: fmt::Debug> fmt::Debug for ReuseTokenSource<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ReuseTokenSource")
            .field("parent", &self.parent)
            .field("early_expiry", &self.early_expiry)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S, C> TokenSource for ReuseTokenSource<S, C>
where
    S: TokenSource,
    C: Clock + Send + Sync,
{
    type Error = S::Error;

    async fn token(&self) -> Result<Token, Self::Error> {
        let mut current = self.current.lock().await;

        if let Some(token) = current.as_ref() {
            if token.is_valid_with_clock(&self.clock, self.early_expiry) {
                tracing::trace!("reusing cached token");
                return Ok(token.clone());
            }
            tracing::debug!(
                expiry = ?token.expiry(),
                "cached token is stale, requesting new token"
            );
        } else {
            tracing::debug!("no cached token, requesting new token");
        }

        let token = self.parent.token().await?;
        *current = Some(token.clone());
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::*;
    use crate::{
        clock::{TestClock, UnixTime},
        Error,
    };

    const START: UnixTime = UnixTime(1_000_000);

    #[derive(Debug)]
    struct CountingSource {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
        clock: TestClock,
    }

    impl CountingSource {
        fn new(clock: TestClock) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay: Duration::ZERO,
                clock,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        type Error = Error;

        async fn token(&self) -> Result<Token, Self::Error> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::MissingRefreshToken);
            }
            Ok(Token::new(format!("token-{}", n))
                .with_expiry(self.clock.now() + DurationSecs(60)))
        }
    }

    fn reuse(
        parent: Arc<CountingSource>,
        seed: Option<Token>,
    ) -> ReuseTokenSource<Arc<CountingSource>, TestClock> {
        let clock = parent.clock.clone();
        ReuseTokenSource::new(parent, seed).with_clock(clock)
    }

    mod when_cache_is_fresh {
        use super::*;

        #[tokio::test]
        async fn returns_seed_without_calling_parent() {
            let clock = TestClock::new(START);
            let parent = Arc::new(CountingSource::new(clock.clone()));
            let seed = Token::new("seed").with_expiry(START + DurationSecs(3600));
            let source = reuse(parent.clone(), Some(seed.clone()));

            for _ in 0..3 {
                assert_eq!(source.token().await.unwrap(), seed);
            }
            assert_eq!(parent.calls(), 0);
        }

        #[tokio::test]
        async fn non_expiring_tokens_are_reused_forever() {
            let clock = TestClock::new(START);
            let parent = Arc::new(CountingSource::new(clock.clone()));
            let source = reuse(parent.clone(), Some(Token::new("forever")));

            clock.advance(DurationSecs(1_000_000));
            assert_eq!(source.token().await.unwrap().access_token().as_str(), "forever");
            assert_eq!(parent.calls(), 0);
        }
    }

    mod when_cache_is_stale {
        use super::*;

        #[tokio::test]
        async fn refreshes_inside_early_expiry_window() {
            let clock = TestClock::new(START);
            let parent = Arc::new(CountingSource::new(clock.clone()));
            let seed = Token::new("seed").with_expiry(START + DurationSecs(5));
            let source = reuse(parent.clone(), Some(seed));

            let token = source.token().await.unwrap();
            assert_eq!(token.access_token().as_str(), "token-1");
            assert_eq!(parent.calls(), 1);

            assert_eq!(source.token().await.unwrap(), token);
            assert_eq!(parent.calls(), 1);

            clock.advance(DurationSecs(51));
            assert_eq!(source.token().await.unwrap().access_token().as_str(), "token-2");
        }

        #[tokio::test]
        async fn custom_early_expiry_is_honored() {
            let clock = TestClock::new(START);
            let parent = Arc::new(CountingSource::new(clock.clone()));
            let seed = Token::new("seed").with_expiry(START + DurationSecs(5));
            let source = reuse(parent.clone(), Some(seed)).with_early_expiry(DurationSecs(0));

            assert_eq!(source.token().await.unwrap().access_token().as_str(), "seed");
            assert_eq!(parent.calls(), 0);
        }

        #[tokio::test]
        async fn failures_are_not_cached() {
            let clock = TestClock::new(START);
            let parent = Arc::new(CountingSource::new(clock.clone()));
            let source = reuse(parent.clone(), None);

            let first = source.token().await.unwrap();
            clock.advance(DurationSecs(120));

            parent.fail.store(true, Ordering::SeqCst);
            assert!(source.token().await.is_err());
            assert!(source.token().await.is_err());
            assert_eq!(parent.calls(), 3);

            parent.fail.store(false, Ordering::SeqCst);
            let recovered = source.token().await.unwrap();
            assert_ne!(recovered, first);
            assert_eq!(parent.calls(), 4);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_refresh() {
        let clock = TestClock::new(START);
        let parent = Arc::new(CountingSource {
            delay: Duration::from_secs(2),
            ..CountingSource::new(clock.clone())
        });
        let source = Arc::new(reuse(parent.clone(), None));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let source = source.clone();
                tokio::spawn(async move { source.token().await })
            })
            .collect();

        for handle in handles {
            let token = handle.await.unwrap().unwrap();
            assert_eq!(token.access_token().as_str(), "token-1");
        }
        assert_eq!(parent.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_refresh_leaves_cache_intact() {
        let clock = TestClock::new(START);
        let parent = Arc::new(CountingSource {
            delay: Duration::from_secs(10),
            ..CountingSource::new(clock.clone())
        });
        let seed = Token::new("seed").with_expiry(START + DurationSecs(5));
        let source = reuse(parent.clone(), Some(seed.clone()));

        let attempt = tokio::time::timeout(Duration::from_secs(1), source.token()).await;
        assert!(attempt.is_err());
        assert_eq!(parent.calls(), 1);

        assert_eq!(source.current.lock().await.as_ref(), Some(&seed));

        let token = source.token().await.unwrap();
        assert_eq!(token.access_token().as_str(), "token-2");
    }
}
