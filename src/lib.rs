//! nowplaying-on-typetalk - posts your currently playing Spotify track to Typetalk.
//!
//! Polls Spotify for the track you are listening to and mirrors it into your
//! Typetalk user status, optionally posting it to one or more topics as well.

pub mod callback;
pub mod config;
pub mod error;
pub mod format;
pub mod handler;
pub mod logging;
pub mod spotify;
pub mod stream;
pub mod token_cache;
pub mod typetalk;

pub use config::Config;
pub use error::{NowPlayingError, Result, TokenCacheError};

/// Name used for the config directory, the OAuth callback route and the CLI.
pub const APP_NAME: &str = "nowplaying-on-typetalk";
