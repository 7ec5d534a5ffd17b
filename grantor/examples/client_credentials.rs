use std::time::Duration;

use clap::Parser;
use grantor::{
    backoff::RetryConfig,
    client_auth::ClientIdentity,
    clock::{Clock, DurationSecs, System},
    grants::ClientCredentials,
    jitter::RandomEarlyJitter,
    ClientId, ClientSecret, HttpClient, TokenStatus, TokenWatcher, DEFAULT_EARLY_EXPIRY,
};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The issuing authority's token request URL
    #[clap(short, long, env)]
    token_url: reqwest::Url,

    /// The client ID of the client
    #[clap(short, long, env)]
    client_id: String,

    /// The client secret used to identify the client to the issuing authority
    #[clap(short = 's', long, env, hide_env_values = true)]
    client_secret: String,

    /// The audience to request a token for
    #[clap(short, long, env)]
    audience: Option<String>,

    /// Scopes to request
    #[clap(long, env, value_delimiter = ' ')]
    scope: Vec<String>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = HttpClient::from(reqwest::Client::builder().https_only(true).build()?);
    let identity = ClientIdentity::new(ClientId::new(opts.client_id))
        .with_secret(ClientSecret::new(opts.client_secret));

    let mut credentials =
        ClientCredentials::new(client, identity, opts.token_url).with_scopes(opts.scope);
    if let Some(audience) = opts.audience {
        credentials = credentials.with_endpoint_param("audience", audience);
    }

    let watcher = TokenWatcher::spawn(
        credentials,
        RandomEarlyJitter::new(DurationSecs(60)),
        RetryConfig::default(),
    )
    .await?;

    tracing::info!(
        token = format_args!("{:#?}", watcher.current().access_token()),
        "first access token"
    );

    let mut interval = time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;

        let token = watcher.current();
        let status = token.token_status_at(System.now(), DEFAULT_EARLY_EXPIRY);
        let expiry = token.expiry().map(|e| e.0);
        match status {
            TokenStatus::Fresh => tracing::debug!(?status, expiry, "pulled token"),
            TokenStatus::Stale => tracing::warn!(?status, expiry, "pulled token"),
            TokenStatus::Expired => tracing::error!(?status, expiry, "pulled token"),
        }
    }
}
