//! Currently-playing subscription.
//!
//! [`PlayingStream`] polls a [`PlayingSource`] at a fixed interval and hands
//! every track change to an [`EventHandler`] until it is shut down.

use std::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use crate::{
    error::{NowPlayingError, Result},
    format::NowPlayingEvent,
};

/// Something that can tell which track is playing right now.
pub trait PlayingSource: Send + Sync {
    /// The playing track, or `None` when nothing (or no music track) is playing.
    fn now_playing(&self) -> impl Future<Output = Result<Option<NowPlayingEvent>>> + Send;
}

/// Receives track changes.
pub trait EventHandler: Send + Sync {
    fn serve(&self, event: &NowPlayingEvent) -> impl Future<Output = ()> + Send;
}

/// Receives errors raised while polling.
pub type Logger = fn(&NowPlayingError);

fn log_poll_error(err: &NowPlayingError) {
    tracing::error!("{err}");
}

/// Fixed-interval poller that emits an event whenever the track changes.
pub struct PlayingStream<S, H> {
    source: S,
    handler: H,
    interval: Duration,
    logger: Logger,
    started: AtomicBool,
    stop: CancellationToken,
    stopped: CancellationToken,
}

impl<S: PlayingSource, H: EventHandler> PlayingStream<S, H> {
    pub fn new(source: S, handler: H, interval: Duration) -> Self {
        Self {
            source,
            handler,
            interval,
            logger: log_poll_error,
            started: AtomicBool::new(false),
            stop: CancellationToken::new(),
            stopped: CancellationToken::new(),
        }
    }

    /// Replace the callback poll errors are reported to.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Poll until [`shutdown`](Self::shutdown) is requested.
    ///
    /// A poll in flight is abandoned on shutdown; a handler call in flight is
    /// allowed to finish.
    pub async fn subscribe(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        let _done = self.stopped.clone().drop_guard();
        let mut last_key: Option<String> = None;

        loop {
            let polled = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                polled = self.source.now_playing() => polled,
            };

            match polled {
                Ok(Some(event)) => {
                    let key = change_key(&event);
                    if last_key.as_deref() != Some(key.as_str()) {
                        last_key = Some(key);
                        self.handler.serve(&event).await;
                    }
                }
                Ok(None) => last_key = None,
                Err(err) => (self.logger)(&err),
            }

            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        Ok(())
    }

    /// Ask [`subscribe`](Self::subscribe) to return and wait up to `timeout` for it.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.stop.cancel();
        if !self.started.load(Ordering::SeqCst) {
            return Ok(());
        }
        tokio::time::timeout(timeout, self.stopped.cancelled())
            .await
            .map_err(|_| NowPlayingError::ShutdownTimeout(timeout))
    }
}

/// Identity of the playing track; local files have no Spotify id.
fn change_key(event: &NowPlayingEvent) -> String {
    event
        .track_id
        .clone()
        .unwrap_or_else(|| format!("{}/{}/{}", event.track_name, event.artist_name, event.album_name))
}
