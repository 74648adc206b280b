//! Post lifecycle: expired posts are taken down and their owners reminded.
//!
//! Message deletion and the deleted mark are not one transaction. A sweep that
//! fails after deleting messages retries the post on the next run; deleting an
//! already-deleted message is a no-op, and the mark only succeeds once.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    audit::{AuditEvent, AuditLog},
    clock::Clock,
    domain::PublishedPost,
    formatting::deep_link,
    messaging::{
        port::MessagingPort,
        types::{ChatTarget, InlineButton, InlineKeyboard},
    },
    store::Store,
    texts, Result,
};

/// Outcome of one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub found: usize,
    pub expired: usize,
    pub failed: usize,
}

pub struct PostLifecycle {
    store: Arc<dyn Store>,
    messenger: Arc<dyn MessagingPort>,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
    bot_username: String,
    currency: String,
}

impl PostLifecycle {
    pub fn new(
        store: Arc<dyn Store>,
        messenger: Arc<dyn MessagingPort>,
        clock: Arc<dyn Clock>,
        audit: AuditLog,
        bot_username: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            messenger,
            clock,
            audit,
            bot_username: bot_username.into(),
            currency: currency.into(),
        }
    }

    pub async fn run(self: Arc<Self>, every: Duration, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(every);
        loop {
            tokio::select! {
              _ = shutdown.cancelled() => break,
              _ = tick.tick() => {
                match self.sweep().await {
                  Ok(r) if r.found > 0 => info!(found = r.found, expired = r.expired, failed = r.failed, "expiry sweep"),
                  Ok(_) => debug!("expiry sweep: nothing to do"),
                  Err(e) => warn!(error = %e, "expiry sweep failed"),
                }
              }
            }
        }
        debug!("post lifecycle stopped");
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let posts = self.store.expired_posts(now).await?;
        let mut report = SweepReport {
            found: posts.len(),
            ..SweepReport::default()
        };

        for post in posts {
            for msg in &post.messages {
                if let Err(e) = self.messenger.delete_message(*msg).await {
                    warn!(post_id = post.id.0, message_id = msg.message_id.0, error = %e, "failed to delete expired post message");
                }
            }

            match self.store.mark_post_deleted(post.id, now).await {
                Ok(true) => {
                    report.expired += 1;
                    self.audit.record(AuditEvent::post_expired(post.owner, post.id));
                    self.remind(&post).await;
                }
                Ok(false) => debug!(post_id = post.id.0, "post already marked deleted"),
                Err(e) => {
                    report.failed += 1;
                    warn!(post_id = post.id.0, error = %e, "failed to mark post deleted; retrying next sweep");
                }
            }
        }
        Ok(report)
    }

    async fn remind(&self, post: &PublishedPost) {
        let offer = match self.store.offer(post.offer_id).await {
            Ok(Some(offer)) => offer,
            Ok(None) => {
                debug!(post_id = post.id.0, "offer gone; no reminder");
                return;
            }
            Err(e) => {
                warn!(post_id = post.id.0, error = %e, "offer lookup failed; no reminder");
                return;
            }
        };

        let html = texts::expired_reminder(
            &offer.title,
            offer.price,
            &self.currency,
            offer.duration_days,
        );
        let keyboard = InlineKeyboard::single(InlineButton::url(
            texts::BUTTON_POST_AGAIN,
            deep_link(&self.bot_username, offer.id),
        ));
        if let Err(e) = self
            .messenger
            .send_text(ChatTarget::user(post.owner), &html, Some(keyboard))
            .await
        {
            warn!(user_id = post.owner.0, error = %e, "failed to send expiry reminder");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ChatId, MessageId, MessageRef, NewOffer, NewPost, UserId},
        messaging::types::ButtonKind,
        store::memory::InMemoryStore,
        testing::{start_time, ManualClock, RecordingMessenger},
    };

    struct Fixture {
        store: Arc<InMemoryStore>,
        messenger: Arc<RecordingMessenger>,
        clock: Arc<ManualClock>,
        lifecycle: PostLifecycle,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let messenger = Arc::new(RecordingMessenger::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let lifecycle = PostLifecycle::new(
            store.clone(),
            messenger.clone(),
            clock.clone(),
            AuditLog::disabled(),
            "ads_bot",
            "RUB",
        );

        let offer = store
            .upsert_offer(NewOffer {
                group_id: ChatId(-1),
                thread_id: crate::domain::ThreadId(3),
                title: "Services".into(),
                price: 50_000,
                duration_days: 7,
                max_photos: 5,
                max_text_len: 1000,
            })
            .await
            .unwrap();
        store
            .create_post(NewPost {
                messages: vec![
                    MessageRef::new(ChatId(-1), MessageId(10)),
                    MessageRef::new(ChatId(-1), MessageId(11)),
                ],
                offer_id: offer.id,
                owner: UserId(42),
                text: "Lawn mowing".into(),
                photos: vec!["a".into(), "b".into()],
                created_at: start_time(),
                expires_at: start_time() + chrono::Duration::days(7),
            })
            .await
            .unwrap();

        Fixture {
            store,
            messenger,
            clock,
            lifecycle,
        }
    }

    #[tokio::test]
    async fn nothing_expires_early() {
        let f = fixture().await;
        f.clock.advance(chrono::Duration::days(6));
        assert_eq!(f.lifecycle.sweep().await.unwrap(), SweepReport::default());
        assert!(f.messenger.deleted().is_empty());
    }

    #[tokio::test]
    async fn second_sweep_finds_nothing() {
        let f = fixture().await;
        f.clock.advance(chrono::Duration::days(7) + chrono::Duration::minutes(1));

        let first = f.lifecycle.sweep().await.unwrap();
        assert_eq!(first.found, 1);
        assert_eq!(first.expired, 1);
        assert_eq!(f.messenger.deleted().len(), 2);

        let second = f.lifecycle.sweep().await.unwrap();
        assert_eq!(second.found, 0);

        let posts = f.store.posts().await;
        assert!(posts[0].deleted);
        assert_eq!(f.messenger.texts_to(ChatId(42)).len(), 1);
    }

    #[tokio::test]
    async fn reminder_links_back_to_the_offer() {
        let f = fixture().await;
        f.clock.advance(chrono::Duration::days(8));
        f.lifecycle.sweep().await.unwrap();

        let sent = f.messenger.sent_to(ChatId(42));
        let keyboard = sent[0].keyboard().unwrap();
        assert_eq!(
            keyboard.rows[0][0].kind,
            ButtonKind::Url("https://t.me/ads_bot?start=pay_1".into())
        );
        assert!(f.messenger.texts_to(ChatId(42))[0].contains("«Services»"));
    }

    #[tokio::test]
    async fn failed_deletes_still_mark_the_post() {
        let f = fixture().await;
        f.messenger.fail_deletes(true);
        f.clock.advance(chrono::Duration::days(8));

        let report = f.lifecycle.sweep().await.unwrap();
        assert_eq!(report.expired, 1);
        assert!(f.store.posts().await[0].deleted);
    }
}
