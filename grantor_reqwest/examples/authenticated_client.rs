use clap::Parser;
use grantor::{
    backoff::RetryConfig, client_auth::ClientIdentity, clock::DurationSecs,
    grants::ClientCredentials, jitter::RandomEarlyJitter, ClientId, ClientSecret, HttpClient,
    TokenWatcher,
};
use grantor_reqwest::{AuthorizationMiddleware, HttpsOnly};
use reqwest_middleware::ClientBuilder;

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

    /// Scopes to request
    #[clap(long, env, value_delimiter = ' ')]
    scope: Vec<String>,

    /// The protected resource to fetch
    url: reqwest::Url,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let identity = ClientIdentity::new(ClientId::new(opts.client_id))
        .with_secret(ClientSecret::new(opts.client_secret));
    let credentials = ClientCredentials::new(
        HttpClient::from(reqwest::Client::new()),
        identity,
        opts.token_url,
    )
    .with_scopes(opts.scope);

    let watcher = TokenWatcher::spawn(
        credentials,
        RandomEarlyJitter::new(DurationSecs(60)),
        RetryConfig::default(),
    )
    .await?;

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(AuthorizationMiddleware::new(watcher).with_predicate(HttpsOnly))
        .build();

    let response = client.get(opts.url).send().await?;
    tracing::info!(status = %response.status(), "fetched protected resource");
    println!("{}", response.text().await?);

    Ok(())
}
