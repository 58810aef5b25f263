//! Spotify client construction and token plumbing.

use chrono::Utc;
use rspotify::{
    clients::OAuthClient as _,
    model::{AdditionalType, PlayableItem},
    scopes, AuthCodeSpotify, Config as SpotifyClientConfig, Credentials, OAuth, Token,
    DEFAULT_API_BASE_URL, DEFAULT_AUTH_BASE_URL,
};

use crate::{
    config::Config,
    error::{NowPlayingError, Result},
    format::NowPlayingEvent,
    stream::PlayingSource,
    token_cache::CachedToken,
};

/// Create an unauthenticated client whose authorize URL carries `state`.
pub fn create_client(config: &Config, state: &str) -> AuthCodeSpotify {
    create_client_with_endpoints(config, state, DEFAULT_API_BASE_URL, DEFAULT_AUTH_BASE_URL)
}

/// Like [`create_client`], talking to custom Web API and accounts endpoints.
pub fn create_client_with_endpoints(
    config: &Config,
    state: &str,
    api_base_url: &str,
    auth_base_url: &str,
) -> AuthCodeSpotify {
    AuthCodeSpotify::with_config(
        Credentials::new(&config.spotify_client_id, &config.spotify_client_secret),
        OAuth {
            redirect_uri: config.redirect_uri(),
            state: state.to_string(),
            scopes: scopes!("user-read-currently-playing"),
            ..Default::default()
        },
        SpotifyClientConfig {
            api_base_url: api_base_url.to_string(),
            auth_base_url: auth_base_url.to_string(),
            token_refreshing: true,
            ..Default::default()
        },
    )
}

/// Create a client that uses a cached token.
pub async fn restore_client(config: &Config, cached: &CachedToken) -> Result<AuthCodeSpotify> {
    let spotify = create_client(config, "");
    *spotify
        .token
        .lock()
        .await
        .map_err(|_| NowPlayingError::Auth("Spotify token lock is unavailable".into()))? =
        Some(to_spotify_token(cached));
    Ok(spotify)
}

/// The token the client currently holds, if any.
pub async fn current_token(spotify: &AuthCodeSpotify) -> Result<Option<CachedToken>> {
    let token = spotify
        .token
        .lock()
        .await
        .map_err(|_| NowPlayingError::Auth("Spotify token lock is unavailable".into()))?;
    Ok(token.as_ref().map(from_spotify_token))
}

/// Check that the client is authorized by fetching the current user.
pub async fn verify(spotify: &AuthCodeSpotify) -> Result<()> {
    let user = spotify.current_user().await?;
    tracing::debug!(
        "You are logged in as: {}",
        user.display_name.as_deref().unwrap_or("(no display name)")
    );
    Ok(())
}

fn to_spotify_token(cached: &CachedToken) -> Token {
    let mut token = Token::default();
    token.access_token = cached.access_token.clone();
    token.refresh_token = (!cached.refresh_token.is_empty()).then(|| cached.refresh_token.clone());
    token.expires_in = cached.expiry - Utc::now();
    token.expires_at = Some(cached.expiry);
    token.scopes = scopes!("user-read-currently-playing");
    token
}

fn from_spotify_token(token: &Token) -> CachedToken {
    CachedToken {
        access_token: token.access_token.clone(),
        refresh_token: token.refresh_token.clone().unwrap_or_default(),
        expiry: token
            .expires_at
            .unwrap_or_else(|| Utc::now() + token.expires_in),
        token_type: "Bearer".to_string(),
    }
}

impl PlayingSource for AuthCodeSpotify {
    async fn now_playing(&self) -> Result<Option<NowPlayingEvent>> {
        let Some(playing) = self
            .current_playing(None, None::<Vec<&AdditionalType>>)
            .await?
        else {
            return Ok(None);
        };

        if !playing.is_playing {
            return Ok(None);
        }

        let Some(PlayableItem::Track(track)) = playing.item else {
            return Ok(None);
        };

        Ok(Some(NowPlayingEvent::from(&track)))
    }
}
