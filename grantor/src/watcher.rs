use std::{convert::Infallible, error, time::Duration};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{
    backoff::{RetryConfig, RetryDecision, RetryState},
    clock::{Clock, DurationSecs, System, UnixTime},
    jitter::JitterSource,
    sources::TokenSource,
    Token, DEFAULT_EARLY_EXPIRY,
};

/// Keeps a token fresh in the background
///
/// A spawned task refreshes the token from its source shortly before it
/// expires, so callers never wait on the authority. Clones observe the same
/// token. Once every watcher has been dropped, the task stops at its next
/// wake-up.
#[derive(Clone, Debug)]
pub struct TokenWatcher {
    watcher: watch::Receiver<Token>,
}

impl TokenWatcher {
    /// Obtains a token from `token_source` and spawns a task that keeps it fresh
    ///
    /// The token is refreshed once it enters the early expiry window, moved
    /// earlier by `jitter_source` so that many instances sharing an authority
    /// don't all refresh at once. Transient refresh failures are retried
    /// according to `retry_config`; after a permanent failure the last token
    /// stays published and refreshing stops. Tokens that never expire are
    /// never refreshed.
    ///
    /// # Errors
    ///
    /// The initial token could not be obtained.
    pub async fn spawn<S, J>(
        token_source: S,
        jitter_source: J,
        retry_config: RetryConfig,
    ) -> Result<Self, S::Error>
    where
        S: TokenSource + 'static,
        J: JitterSource + Send + 'static,
    {
        Self::spawn_with_clock(token_source, jitter_source, retry_config, System).await
    }

    /// Spawns a token watcher using the given clock
    ///
    /// # Errors
    ///
    /// The initial token could not be obtained.
    pub async fn spawn_with_clock<S, J, C>(
        token_source: S,
        jitter_source: J,
        retry_config: RetryConfig,
        clock: C,
    ) -> Result<Self, S::Error>
    where
        S: TokenSource + 'static,
        J: JitterSource + Send + 'static,
        C: Clock + Send + 'static,
    {
        let initial = token_source.token().await?;
        let first_stale = stale_at(&initial);
        let (tx, rx) = watch::channel(initial);

        let join = tokio::spawn(forever_refresh(
            token_source,
            jitter_source,
            tx,
            first_stale,
            retry_config,
            clock,
        ));

        tokio::spawn(async move {
            match join.await {
                Err(err) if err.is_panic() => tracing::error!("token refresh task panicked"),
                Err(_) => tracing::info!("token refresh task was cancelled"),
                Ok(()) => tracing::debug!("token refresh task finished"),
            }
        });

        Ok(Self { watcher: rx })
    }

    /// The most recently published token
    pub fn current(&self) -> Token {
        self.watcher.borrow().clone()
    }

    /// Waits until a new token is published
    ///
    /// # Errors
    ///
    /// The refresh task has stopped and no new tokens will be published.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.watcher.changed().await
    }
}

#[async_trait]
impl TokenSource for TokenWatcher {
    type Error = Infallible;

    async fn token(&self) -> Result<Token, Self::Error> {
        Ok(self.current())
    }
}

fn stale_at(token: &Token) -> Option<UnixTime> {
    token.expiry().map(|expiry| expiry - DEFAULT_EARLY_EXPIRY)
}

enum Delay {
    UntilTime(UnixTime),
    ForDuration(Duration),
}

/// Wakes at least this often while waiting for a token to go stale
///
/// Timers do not advance while a machine is suspended, so the wall clock is
/// re-checked periodically.
const HEARTBEAT: DurationSecs = DurationSecs(30);

async fn forever_refresh<S, J, C>(
    token_source: S,
    mut jitter_source: J,
    tx: watch::Sender<Token>,
    first_stale: Option<UnixTime>,
    retry_config: RetryConfig,
    clock: C,
) where
    S: TokenSource,
    J: JitterSource,
    C: Clock,
{
    let mut retry = RetryState::new(retry_config);
    let mut delay = match first_stale {
        Some(stale) => Delay::UntilTime(jitter_source.jitter(stale)),
        None => {
            tracing::debug!("token does not expire, halting refreshes");
            return;
        }
    };

    loop {
        match delay {
            Delay::ForDuration(d) => tokio::time::sleep(d).await,
            Delay::UntilTime(t) => loop {
                let now = clock.now();
                if now >= t {
                    tracing::trace!("token now stale");
                    break;
                }
                let until_stale = t - now;
                let nap = until_stale.min(HEARTBEAT);
                tracing::trace!(
                    delay = nap.0,
                    until_stale = until_stale.0,
                    "token not yet stale, sleeping"
                );
                tokio::time::sleep(nap.into()).await;
            },
        }

        if tx.is_closed() {
            tracing::info!("no one is listening for token refreshes anymore, halting refreshes");
            return;
        }

        tracing::debug!("requesting new token");
        delay = match token_source.token().await {
            Ok(token) => {
                retry.succeeded();
                let stale = stale_at(&token);
                if tx.send(token).is_err() {
                    tracing::info!(
                        "no one is listening for token refreshes anymore, halting refreshes"
                    );
                    return;
                }

                match stale {
                    Some(stale) => {
                        tracing::debug!(stale = stale.0, "waiting for token to become stale");
                        Delay::UntilTime(jitter_source.jitter(stale))
                    }
                    None => {
                        tracing::debug!("token does not expire, halting refreshes");
                        return;
                    }
                }
            }
            Err(error) => match retry.failed(&error) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        error = (&error as &dyn error::Error),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "error requesting token, will retry"
                    );
                    Delay::ForDuration(delay)
                }
                RetryDecision::GiveUp => {
                    tracing::error!(
                        error = (&error as &dyn error::Error),
                        "permanent error requesting token, halting refreshes"
                    );
                    return;
                }
            },
        };
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use tokio::time::Instant;

    use super::*;
    use crate::{jitter::NullJitter, Error};

    /// A clock that follows tokio's (pausable) time
    #[derive(Debug)]
    struct TokioClock {
        base: UnixTime,
        start: Instant,
    }

    impl TokioClock {
        fn new() -> Self {
            Self {
                base: UnixTime(1_000_000),
                start: Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> UnixTime {
            self.base + DurationSecs(self.start.elapsed().as_secs())
        }
    }

    #[derive(Debug)]
    struct ScriptedSource {
        calls: AtomicUsize,
        failure: Option<(usize, fn() -> Error)>,
        lifetime: Option<DurationSecs>,
        clock: Arc<TokioClock>,
    }

    impl ScriptedSource {
        fn new(lifetime: Option<DurationSecs>, clock: Arc<TokioClock>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failure: None,
                lifetime,
                clock,
            }
        }

        fn failing_on(mut self, call: usize, failure: fn() -> Error) -> Self {
            self.failure = Some((call, failure));
            self
        }
    }

    #[async_trait]
    impl TokenSource for ScriptedSource {
        type Error = Error;

        async fn token(&self) -> Result<Token, Self::Error> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.failure {
                Some((call, failure)) if call == n => Err(failure()),
                _ => Ok(Token::new(format!("token-{}", n))
                    .with_expiry(self.lifetime.map(|l| self.clock.now() + l))),
            }
        }
    }

    fn transient() -> Error {
        Error::MissingAccessToken
    }

    fn permanent() -> Error {
        Error::MissingRefreshToken
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_before_expiry() {
        let clock = Arc::new(TokioClock::new());
        let source = Arc::new(ScriptedSource::new(Some(DurationSecs(60)), clock.clone()));

        let mut watcher = TokenWatcher::spawn_with_clock(
            source.clone(),
            NullJitter,
            RetryConfig::default(),
            clock,
        )
        .await
        .unwrap();
        assert_eq!(watcher.current().access_token().as_str(), "token-1");

        tokio::time::sleep(Duration::from_secs(49)).await;
        assert_eq!(watcher.token().await.unwrap().access_token().as_str(), "token-1");

        watcher.changed().await.unwrap();
        assert_eq!(watcher.current().access_token().as_str(), "token-2");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_transient_errors() {
        let clock = Arc::new(TokioClock::new());
        let source = Arc::new(
            ScriptedSource::new(Some(DurationSecs(20)), clock.clone()).failing_on(2, transient),
        );

        let mut watcher = TokenWatcher::spawn_with_clock(
            source.clone(),
            NullJitter,
            RetryConfig::new(Duration::from_secs(1), Duration::from_secs(1), 1),
            clock,
        )
        .await
        .unwrap();

        watcher.changed().await.unwrap();
        assert_eq!(watcher.current().access_token().as_str(), "token-3");
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_permanent_error() {
        let clock = Arc::new(TokioClock::new());
        let source = Arc::new(
            ScriptedSource::new(Some(DurationSecs(20)), clock.clone()).failing_on(2, permanent),
        );

        let mut watcher = TokenWatcher::spawn_with_clock(
            source.clone(),
            NullJitter,
            RetryConfig::default(),
            clock,
        )
        .await
        .unwrap();

        assert!(watcher.changed().await.is_err());
        assert_eq!(watcher.current().access_token().as_str(), "token-1");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_expiring_tokens_are_never_refreshed() {
        let clock = Arc::new(TokioClock::new());
        let source = Arc::new(ScriptedSource::new(None, clock.clone()));

        let mut watcher = TokenWatcher::spawn_with_clock(
            source.clone(),
            NullJitter,
            RetryConfig::default(),
            clock,
        )
        .await
        .unwrap();

        assert!(watcher.changed().await.is_err());
        assert_eq!(watcher.current().access_token().as_str(), "token-1");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn initial_failure_is_returned() {
        let clock = Arc::new(TokioClock::new());
        let source =
            ScriptedSource::new(Some(DurationSecs(60)), clock.clone()).failing_on(1, permanent);

        let result =
            TokenWatcher::spawn_with_clock(source, NullJitter, RetryConfig::default(), clock)
                .await;
        assert!(matches!(result, Err(Error::MissingRefreshToken)));
    }
}
