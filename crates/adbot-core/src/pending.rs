//! Staged, not-yet-confirmed submissions. Process-local; lost on restart.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    domain::{MessageRef, OfferId, UserId},
    messaging::port::MessagingPort,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingContent {
    pub offer_id: OfferId,
    pub text: String,
    pub photos: Vec<String>,
    pub received_at: DateTime<Utc>,
    /// Preview messages shown to the user; removed on confirm/reload.
    pub previews: Vec<MessageRef>,
}

#[derive(Default)]
pub struct PendingContentCache {
    inner: Mutex<HashMap<UserId, PendingContent>>,
}

impl PendingContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage content for `user`, returning whatever was staged before.
    pub async fn stage(&self, user: UserId, content: PendingContent) -> Option<PendingContent> {
        self.inner.lock().await.insert(user, content)
    }

    pub async fn get(&self, user: UserId) -> Option<PendingContent> {
        self.inner.lock().await.get(&user).cloned()
    }

    /// Returns `false` if nothing is staged for `user`.
    pub async fn set_previews(&self, user: UserId, previews: Vec<MessageRef>) -> bool {
        match self.inner.lock().await.get_mut(&user) {
            Some(content) => {
                content.previews = previews;
                true
            }
            None => false,
        }
    }

    pub async fn take(&self, user: UserId) -> Option<PendingContent> {
        self.inner.lock().await.remove(&user)
    }

    /// Drop staged content and its preview messages.
    pub async fn discard(&self, user: UserId, messenger: &dyn MessagingPort) -> Option<PendingContent> {
        let content = self.take(user).await?;
        discard_previews(messenger, &content.previews).await;
        Some(content)
    }
}

/// Best-effort deletion; gateway failures are swallowed.
pub async fn discard_previews(messenger: &dyn MessagingPort, previews: &[MessageRef]) {
    for msg in previews {
        if let Err(e) = messenger.delete_message(*msg).await {
            debug!(error = %e, message_id = msg.message_id.0, "preview already gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ChatId, MessageId},
        testing::RecordingMessenger,
    };

    fn content(text: &str) -> PendingContent {
        PendingContent {
            offer_id: OfferId(1),
            text: text.into(),
            photos: vec![],
            received_at: Utc::now(),
            previews: vec![],
        }
    }

    #[tokio::test]
    async fn stage_replaces_and_take_clears() {
        let cache = PendingContentCache::new();
        assert!(cache.stage(UserId(1), content("a")).await.is_none());
        let old = cache.stage(UserId(1), content("b")).await.unwrap();
        assert_eq!(old.text, "a");

        assert_eq!(cache.take(UserId(1)).await.unwrap().text, "b");
        assert!(cache.get(UserId(1)).await.is_none());
        assert!(!cache.set_previews(UserId(1), vec![]).await);
    }

    #[tokio::test]
    async fn discard_deletes_previews_even_if_gateway_fails() {
        let messenger = RecordingMessenger::new();
        messenger.fail_deletes(true);
        let cache = PendingContentCache::new();
        cache.stage(UserId(2), content("x")).await;
        let previews = vec![
            MessageRef::new(ChatId(2), MessageId(10)),
            MessageRef::new(ChatId(2), MessageId(11)),
        ];
        assert!(cache.set_previews(UserId(2), previews.clone()).await);

        let dropped = cache.discard(UserId(2), &messenger).await.unwrap();
        assert_eq!(dropped.previews, previews);
        assert!(cache.get(UserId(2)).await.is_none());
    }
}
