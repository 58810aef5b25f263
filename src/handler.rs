//! Mirrors track changes into Typetalk.

use tracing::{debug, error};

use crate::{
    format::{format_status_message, format_topic_message, NowPlayingEvent},
    stream::EventHandler,
    typetalk::{ChatApi, StatusOptions},
};

/// Posts every track change to the configured topics and sets the user status.
///
/// Chat failures are logged and never stop the remaining calls.
pub struct Notifier<C> {
    client: C,
    space_key: String,
    emoji: String,
    topics: Vec<u64>,
}

impl<C: ChatApi> Notifier<C> {
    pub fn new(client: C, space_key: &str, emoji: &str, topics: &[u64]) -> Self {
        Self {
            client,
            space_key: space_key.to_string(),
            emoji: emoji.to_string(),
            topics: topics.to_vec(),
        }
    }

    async fn post_topic(&self, topic_id: u64, event: &NowPlayingEvent) {
        let message = format_topic_message(&self.emoji, event);
        if let Err(e) = self.client.post_message(topic_id, &message).await {
            error!(topic_id, "Failed to post to topic: {e}");
        }
    }

    async fn update_status(&self, event: &NowPlayingEvent) {
        let message = format_status_message(event);
        debug!("NOW PLAYING - {message}");

        let options = StatusOptions {
            clear_at: String::new(),
            notification_disabled: true,
        };
        if let Err(e) = self
            .client
            .save_user_status(&self.space_key, &self.emoji, &message, &options)
            .await
        {
            error!("Failed to save user status: {e}");
        }
    }
}

impl<C: ChatApi> EventHandler for Notifier<C> {
    async fn serve(&self, event: &NowPlayingEvent) {
        for &topic_id in &self.topics {
            self.post_topic(topic_id, event).await;
        }
        self.update_status(event).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::{NowPlayingError, Result};

    #[derive(Debug, PartialEq)]
    enum Call {
        Post(u64, String),
        Status {
            space_key: String,
            emoji: String,
            message: String,
            options: StatusOptions,
        },
    }

    #[derive(Default)]
    struct MockChat {
        failing_topics: Vec<u64>,
        fail_status: bool,
        calls: Mutex<Vec<Call>>,
    }

    impl ChatApi for MockChat {
        async fn post_message(&self, topic_id: u64, message: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Post(topic_id, message.to_string()));
            if self.failing_topics.contains(&topic_id) {
                return Err(NowPlayingError::Typetalk("topic is gone".into()));
            }
            Ok(())
        }

        async fn save_user_status(
            &self,
            space_key: &str,
            emoji: &str,
            message: &str,
            options: &StatusOptions,
        ) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Status {
                space_key: space_key.to_string(),
                emoji: emoji.to_string(),
                message: message.to_string(),
                options: options.clone(),
            });
            if self.fail_status {
                return Err(NowPlayingError::Typetalk("status rejected".into()));
            }
            Ok(())
        }
    }

    fn event() -> NowPlayingEvent {
        NowPlayingEvent {
            track_id: Some("6aOaB0vl2ilHxRb23Wiazv".into()),
            track_name: "Retarded".into(),
            artist_name: "KID FRESINO".into(),
            album_name: "ai qing".into(),
            external_url: "https://open.spotify.com/track/6aOaB0vl2ilHxRb23Wiazv".into(),
            album_art_url: "https://i.scdn.co/image/cover".into(),
        }
    }

    fn posted_topics(calls: &[Call]) -> Vec<u64> {
        calls
            .iter()
            .filter_map(|call| match call {
                Call::Post(topic_id, _) => Some(*topic_id),
                Call::Status { .. } => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_status_only_without_topics() {
        let notifier = Notifier::new(MockChat::default(), "space", ":musical_note:", &[]);
        notifier.serve(&event()).await;

        let calls = notifier.client.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![Call::Status {
                space_key: "space".into(),
                emoji: ":musical_note:".into(),
                message: "Retarded/KID FRESINO https://open.spotify.com/track/6aOaB0vl2ilHxRb23Wiazv"
                    .into(),
                options: StatusOptions {
                    clear_at: String::new(),
                    notification_disabled: true,
                },
            }]
        );
    }

    #[tokio::test]
    async fn test_failing_topic_does_not_stop_others() {
        let chat = MockChat {
            failing_topics: vec![2],
            ..MockChat::default()
        };
        let notifier = Notifier::new(chat, "space", ":cd:", &[1, 2, 3]);
        notifier.serve(&event()).await;

        let calls = notifier.client.calls.lock().unwrap();
        assert_eq!(posted_topics(&calls), vec![1, 2, 3]);
        let statuses = calls
            .iter()
            .filter(|call| matches!(call, Call::Status { .. }))
            .count();
        assert_eq!(statuses, 1);
    }

    #[tokio::test]
    async fn test_topic_message_uses_long_form() {
        let notifier = Notifier::new(MockChat::default(), "space", ":cd:", &[7]);
        notifier.serve(&event()).await;

        let calls = notifier.client.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            Call::Post(
                7,
                ":cd: Retarded / KID FRESINO - ai qing [ ](https://i.scdn.co/image/cover)\n\
                 https://open.spotify.com/track/6aOaB0vl2ilHxRb23Wiazv"
                    .into()
            )
        );
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let chat = MockChat {
            failing_topics: vec![1, 2],
            fail_status: true,
            ..MockChat::default()
        };
        let notifier = Notifier::new(chat, "space", ":cd:", &[1, 2]);

        notifier.serve(&event()).await;
        notifier.serve(&event()).await;

        let calls = notifier.client.calls.lock().unwrap();
        assert_eq!(posted_topics(&calls), vec![1, 2, 1, 2]);
        assert_eq!(calls.len(), 6);
    }
}
