use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use clap::Parser as _;
use eyre::WrapErr as _;
use nowplaying_on_typetalk::{
    callback::{self, AuthContext, CallbackServer},
    config::{self, Cli},
    handler::Notifier,
    logging, spotify,
    stream::PlayingStream,
    token_cache,
    typetalk::{TypetalkClient, DEFAULT_SCOPE},
    Config,
};
use rspotify::AuthCodeSpotify;
use tokio::signal;
use tracing::{error, info};
use uuid::Uuid;

/// Upper bound for the subscription loop to stop after a signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);
/// Upper bound for the OAuth callback listener to flush its last response.
const CALLBACK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let setup = load_config(&cli);
    logging::init(setup.as_ref().map_or(cli.debug, |(config, _)| config.debug));

    let result = match setup {
        Ok((config, dir)) => run(config, dir).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("[FATAL] {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> eyre::Result<(Config, PathBuf)> {
    let dir = config::config_dir()?;
    config::ensure_config_dir(&dir)
        .wrap_err_with(|| format!("Failed to create {}", dir.display()))?;
    let config = Config::load(cli, &dir).wrap_err("Failed to read config")?;
    Ok((config, dir))
}

async fn run(config: Config, dir: PathBuf) -> eyre::Result<()> {
    let spotify = match restore(&config, &dir).await {
        Some(spotify) => spotify,
        None => authorize(&config, &dir).await?,
    };

    let typetalk = TypetalkClient::new(
        &config.typetalk_client_id,
        &config.typetalk_client_secret,
        DEFAULT_SCOPE,
    );
    let notifier = Notifier::new(
        typetalk,
        &config.typetalk_space_key,
        &config.status_emoji,
        &config.topics,
    );
    let stream = Arc::new(PlayingStream::new(
        spotify.clone(),
        notifier,
        config.poll_interval,
    ));

    let subscription = tokio::spawn({
        let stream = stream.clone();
        async move {
            info!("Start to subscribe to the Spotify playing stream");
            if let Err(e) = stream.subscribe().await {
                error!("{e}");
            }
        }
    });

    wait_for_signal()
        .await
        .wrap_err("Failed to listen for shutdown signals")?;
    info!("Received a signal of graceful shutdown");

    match stream.shutdown(SHUTDOWN_TIMEOUT).await {
        Ok(()) => info!("Completed graceful shutdown"),
        Err(e) => {
            error!("Failed to graceful shutdown: {e}");
            subscription.abort();
        }
    }

    persist_token(&dir, &spotify).await;
    Ok(())
}

/// A client from the token cache, if the cached token is still good.
async fn restore(config: &Config, dir: &Path) -> Option<AuthCodeSpotify> {
    let cached = match token_cache::load(dir) {
        Ok(cached) => cached,
        Err(e) => {
            info!("{e}");
            return None;
        }
    };

    let spotify = match spotify::restore_client(config, &cached).await {
        Ok(spotify) => spotify,
        Err(e) => {
            error!("{e}");
            return None;
        }
    };

    match spotify::verify(&spotify).await {
        Ok(()) => Some(spotify),
        Err(e) => {
            error!("Cached Spotify token was rejected: {e}");
            None
        }
    }
}

/// Run the browser login and wait for the callback to deliver a client.
async fn authorize(config: &Config, dir: &Path) -> eyre::Result<AuthCodeSpotify> {
    let state = Uuid::new_v4().to_string();
    let (ctx, handoff) = AuthContext::new(spotify::create_client(config, &state), &state);
    let server = CallbackServer::start(ctx, config.port, callback::open_browser)
        .await
        .wrap_err_with(|| format!("Failed to start the OAuth callback on port {}", config.port))?;

    let outcome = handoff
        .await
        .wrap_err("OAuth callback closed without a result")?;

    if let Err(e) = server.stop(CALLBACK_STOP_TIMEOUT).await {
        error!("Failed to stop the OAuth callback server: {e}");
    }

    let spotify = outcome.wrap_err("Spotify authorization failed")?;
    persist_token(dir, &spotify).await;
    Ok(spotify)
}

/// Best-effort write of the client's current token to the cache.
async fn persist_token(dir: &Path, spotify: &AuthCodeSpotify) {
    let token = match spotify::current_token(spotify).await {
        Ok(Some(token)) => token,
        Ok(None) => return,
        Err(e) => {
            error!("{e}");
            return;
        }
    };

    if let Err(e) = token_cache::save(dir, &token) {
        error!("Failed to save the Spotify token: {e}");
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            received = signal::ctrl_c() => received?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c().await?;

    Ok(())
}
