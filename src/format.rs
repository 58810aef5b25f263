//! Turning a playing track into Typetalk message text.

use rspotify::model::FullTrack;

/// Maximum number of characters of `track/artist` kept in the status.
const SHORT_MAX_CHARS: usize = 25;
/// Appended when the short form is cut.
const ELLIPSIS: char = '…';

/// A track that just started playing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NowPlayingEvent {
    /// Spotify track id, used to detect track changes.
    pub track_id: Option<String>,
    pub track_name: String,
    /// First listed artist.
    pub artist_name: String,
    pub album_name: String,
    /// `open.spotify.com` link to the track.
    pub external_url: String,
    /// Largest album cover image.
    pub album_art_url: String,
}

impl From<&FullTrack> for NowPlayingEvent {
    fn from(track: &FullTrack) -> Self {
        Self {
            track_id: track.id.as_ref().map(|id| id.to_string()),
            track_name: track.name.clone(),
            artist_name: track
                .artists
                .first()
                .map(|artist| artist.name.clone())
                .unwrap_or_default(),
            album_name: track.album.name.clone(),
            external_url: track
                .external_urls
                .get("spotify")
                .cloned()
                .unwrap_or_default(),
            album_art_url: track
                .album
                .images
                .first()
                .map(|image| image.url.clone())
                .unwrap_or_default(),
        }
    }
}

/// `track/artist`, cut to 25 characters plus an ellipsis.
pub fn format_short(event: &NowPlayingEvent) -> String {
    let meta = format!("{}/{}", event.track_name, event.artist_name);
    if meta.chars().count() <= SHORT_MAX_CHARS {
        return meta;
    }
    let mut short: String = meta.chars().take(SHORT_MAX_CHARS).collect();
    short.push(ELLIPSIS);
    short
}

/// `track / artist - album [ ](album art)`.
///
/// The empty-label link is rendered by Typetalk as an inline thumbnail.
pub fn format_long(event: &NowPlayingEvent) -> String {
    format!(
        "{} / {} - {} [ ]({})",
        event.track_name, event.artist_name, event.album_name, event.album_art_url
    )
}

/// Text for the user status.
pub fn format_status_message(event: &NowPlayingEvent) -> String {
    format!("{} {}", format_short(event), event.external_url)
}

/// Text posted to a topic.
pub fn format_topic_message(emoji: &str, event: &NowPlayingEvent) -> String {
    format!("{} {}\n{}", emoji, format_long(event), event.external_url)
}
