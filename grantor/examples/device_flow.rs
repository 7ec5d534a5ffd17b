use clap::Parser;
use grantor::{
    client_auth::ClientIdentity,
    endpoint::Endpoint,
    grants::Config,
    ClientId, HttpClient,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
struct Opts {
    /// The authority's authorization URL
    #[clap(long, env)]
    auth_url: reqwest::Url,

    /// The authority's token URL
    #[clap(long, env)]
    token_url: reqwest::Url,

    /// The authority's device authorization URL
    #[clap(long, env)]
    device_auth_url: reqwest::Url,

    /// The client ID of the device
    #[clap(short, long, env)]
    client_id: String,

    /// Scopes to request
    #[clap(long, env, value_delimiter = ' ')]
    scope: Vec<String>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let config = Config::new(
        HttpClient::from(reqwest::Client::new()),
        ClientIdentity::new(ClientId::new(opts.client_id)),
        Endpoint::new(opts.auth_url, opts.token_url).with_device_auth_url(opts.device_auth_url),
    )
    .with_scopes(opts.scope);

    let auth = config.device_auth(&[]).await?;
    match &auth.verification_uri_complete {
        Some(uri) => println!("Visit {} to approve this device", uri),
        None => println!(
            "Visit {} and enter the code {}",
            auth.verification_uri, auth.user_code
        ),
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let token = config
        .device_access_token_with_cancellation(&auth, &cancel)
        .await?;

    tracing::info!(
        token = format_args!("{:#?}", token.access_token()),
        expiry = ?token.expiry(),
        "device approved"
    );

    Ok(())
}
