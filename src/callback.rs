//! Local listener completing the Spotify authorization-code redirect.
//!
//! The server lives for exactly one callback: the first request on the
//! callback route consumes the one-shot handoff, whatever its outcome, and
//! the orchestrator then stops the server.

use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    process::Command,
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Router,
};
use rspotify::{clients::OAuthClient as _, AuthCodeSpotify};
use serde::Deserialize;
use tokio::{
    net::TcpListener,
    sync::{oneshot, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{NowPlayingError, Result},
    spotify, APP_NAME,
};

const LOGIN_COMPLETED: &str = "Login completed. You can close this tab.";

/// What the callback hands to the waiting orchestrator.
pub type Handoff = Result<AuthCodeSpotify>;

/// Opens the authorize URL for the user.
pub type BrowserOpener = fn(&str) -> io::Result<()>;

/// Handshake state shared with the callback route.
pub struct AuthContext {
    spotify: AuthCodeSpotify,
    state: String,
    handoff: Mutex<Option<oneshot::Sender<Handoff>>>,
}

impl AuthContext {
    /// Create the context and the receiving end of its one-shot handoff.
    ///
    /// `spotify` must have been created with `state` as its OAuth state.
    pub fn new(spotify: AuthCodeSpotify, state: &str) -> (Arc<Self>, oneshot::Receiver<Handoff>) {
        let (tx, rx) = oneshot::channel();
        let ctx = Self {
            spotify,
            state: state.to_string(),
            handoff: Mutex::new(Some(tx)),
        };
        (Arc::new(ctx), rx)
    }

    /// Authorize URL the user has to visit.
    pub fn authorize_url(&self) -> Result<String> {
        self.spotify
            .get_authorize_url(false)
            .map_err(|e| NowPlayingError::Auth(format!("Failed to get authorize URL: {e}")))
    }

    /// Check the state and exchange the code for an authorized client.
    async fn complete(&self, query: CallbackQuery) -> Handoff {
        let received = query.state.unwrap_or_default();
        if received != self.state {
            return Err(NowPlayingError::StateMismatch(received));
        }

        let code = query.code.filter(|code| !code.is_empty()).ok_or_else(|| {
            NowPlayingError::Auth(format!(
                "Callback carried no code: {}",
                query.error.as_deref().unwrap_or("unknown error")
            ))
        })?;

        self.spotify
            .request_token(&code)
            .await
            .map_err(|e| NowPlayingError::Auth(format!("Failed to request token: {e}")))?;
        spotify::verify(&self.spotify).await?;
        Ok(self.spotify.clone())
    }
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn complete_auth(
    State(ctx): State<Arc<AuthContext>>,
    Query(query): Query<CallbackQuery>,
) -> (StatusCode, &'static str) {
    let Some(handoff) = ctx.handoff.lock().await.take() else {
        return (StatusCode::GONE, "Login already handled.");
    };

    let outcome = ctx.complete(query).await;
    let response = match &outcome {
        Ok(_) => (StatusCode::OK, LOGIN_COMPLETED),
        Err(NowPlayingError::StateMismatch(_)) => (StatusCode::NOT_FOUND, "404 page not found"),
        Err(_) => (StatusCode::FORBIDDEN, "Couldn't get token"),
    };

    if handoff.send(outcome).is_err() {
        tracing::error!("Nobody is waiting for the login result");
    }
    response
}

/// Router exposing the single callback route.
pub fn router(ctx: Arc<AuthContext>) -> Router {
    Router::new()
        .route(&format!("/{APP_NAME}"), get(complete_auth))
        .with_state(ctx)
}

/// A running callback listener.
pub struct CallbackServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<io::Result<()>>>,
}

impl CallbackServer {
    /// Bind `localhost:<port>`, start serving in the background and send the
    /// user to the authorize URL.
    ///
    /// The IPv4 loopback is required; the IPv6 one is served too when it is
    /// available. A browser that cannot be opened is only logged.
    pub async fn start(ctx: Arc<AuthContext>, port: u16, open: BrowserOpener) -> Result<Self> {
        let url = ctx.authorize_url()?;

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
        let addr = listener.local_addr()?;
        let mut listeners = vec![listener];
        match TcpListener::bind((Ipv6Addr::LOCALHOST, addr.port())).await {
            Ok(listener) => listeners.push(listener),
            Err(e) => tracing::debug!("Not listening on the IPv6 loopback: {e}"),
        }

        let app = router(ctx);
        let shutdown = CancellationToken::new();
        let tasks = listeners
            .into_iter()
            .map(|listener| {
                let app = app.clone();
                let signal = shutdown.clone();
                tokio::spawn(async move {
                    axum::serve(listener, app)
                        .with_graceful_shutdown(signal.cancelled_owned())
                        .await
                })
            })
            .collect();
        tracing::debug!("OAuth callback listening on http://localhost:{}/{APP_NAME}", addr.port());

        if let Err(e) = open(&url) {
            tracing::info!("Could not open a browser: {e}");
        }
        tracing::info!("Log in to Spotify by visiting the following page in your browser: {url}");

        Ok(Self {
            addr,
            shutdown,
            tasks,
        })
    }

    /// IPv4 address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait up to `timeout` for in-flight responses.
    pub async fn stop(self, timeout: Duration) -> Result<()> {
        self.shutdown.cancel();
        let tasks = self.tasks;
        let drained = async move {
            for task in tasks {
                task.await??;
            }
            Ok::<_, NowPlayingError>(())
        };
        tokio::time::timeout(timeout, drained)
            .await
            .map_err(|_| NowPlayingError::ShutdownTimeout(timeout))?
    }
}

/// Open `url` in the system default browser.
pub fn open_browser(url: &str) -> io::Result<()> {
    let (program, args): (&str, &[&str]) = if cfg!(target_os = "windows") {
        ("rundll32", &["url.dll,FileProtocolHandler"])
    } else if cfg!(target_os = "macos") {
        ("open", &[])
    } else {
        ("xdg-open", &[])
    };
    Command::new(program).args(args).arg(url).spawn()?;
    Ok(())
}
