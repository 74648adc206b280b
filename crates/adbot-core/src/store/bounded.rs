use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    domain::{
        AllowedDomain, ChatId, NewOffer, NewPayment, NewPendingModeration, NewPost, Offer,
        OfferId, Payment, PendingModeration, PendingModerationId, PostId, PublishedPost,
        SpamViolation, ThreadId, UserId, UserProfile,
    },
    errors::Error,
    session::{Session, UserState},
    Result,
};

use super::Store;

/// Run `fut`, failing with `Error::Timeout` once `limit` elapses.
pub async fn with_timeout<T, F>(op: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout(format!("{op} after {}ms", limit.as_millis()))),
    }
}

/// Store decorator that bounds every call.
pub struct BoundedStore {
    inner: Arc<dyn Store>,
    limit: Duration,
}

impl BoundedStore {
    pub fn new(inner: Arc<dyn Store>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl Store for BoundedStore {
    async fn upsert_group(&self, group_id: ChatId, title: &str) -> Result<()> {
        with_timeout(
            "upsert_group",
            self.limit,
            self.inner.upsert_group(group_id, title),
        )
        .await
    }

    async fn upsert_offer(&self, offer: NewOffer) -> Result<Offer> {
        with_timeout("upsert_offer", self.limit, self.inner.upsert_offer(offer)).await
    }

    async fn offer(&self, id: OfferId) -> Result<Option<Offer>> {
        with_timeout("offer", self.limit, self.inner.offer(id)).await
    }

    async fn offer_by_thread(
        &self,
        group_id: ChatId,
        thread_id: ThreadId,
    ) -> Result<Option<Offer>> {
        with_timeout(
            "offer_by_thread",
            self.limit,
            self.inner.offer_by_thread(group_id, thread_id),
        )
        .await
    }

    async fn get_or_create_session(
        &self,
        user_id: UserId,
        profile: &UserProfile,
    ) -> Result<Session> {
        with_timeout(
            "get_or_create_session",
            self.limit,
            self.inner.get_or_create_session(user_id, profile),
        )
        .await
    }

    async fn session(&self, user_id: UserId) -> Result<Option<Session>> {
        with_timeout("session", self.limit, self.inner.session(user_id)).await
    }

    async fn save_session(&self, session: &Session, expected: UserState) -> Result<bool> {
        with_timeout(
            "save_session",
            self.limit,
            self.inner.save_session(session, expected),
        )
        .await
    }

    async fn record_payment(&self, payment: NewPayment) -> Result<Payment> {
        with_timeout(
            "record_payment",
            self.limit,
            self.inner.record_payment(payment),
        )
        .await
    }

    async fn create_pending_moderation(
        &self,
        entry: NewPendingModeration,
    ) -> Result<PendingModeration> {
        with_timeout(
            "create_pending_moderation",
            self.limit,
            self.inner.create_pending_moderation(entry),
        )
        .await
    }

    async fn pending_moderation(&self, user_id: UserId) -> Result<Option<PendingModeration>> {
        with_timeout(
            "pending_moderation",
            self.limit,
            self.inner.pending_moderation(user_id),
        )
        .await
    }

    async fn delete_pending_moderation(&self, id: PendingModerationId) -> Result<()> {
        with_timeout(
            "delete_pending_moderation",
            self.limit,
            self.inner.delete_pending_moderation(id),
        )
        .await
    }

    async fn create_post(&self, post: NewPost) -> Result<PublishedPost> {
        with_timeout("create_post", self.limit, self.inner.create_post(post)).await
    }

    async fn expired_posts(&self, now: DateTime<Utc>) -> Result<Vec<PublishedPost>> {
        with_timeout("expired_posts", self.limit, self.inner.expired_posts(now)).await
    }

    async fn mark_post_deleted(&self, id: PostId, at: DateTime<Utc>) -> Result<bool> {
        with_timeout(
            "mark_post_deleted",
            self.limit,
            self.inner.mark_post_deleted(id, at),
        )
        .await
    }

    async fn record_spam_violation(&self, violation: SpamViolation) -> Result<()> {
        with_timeout(
            "record_spam_violation",
            self.limit,
            self.inner.record_spam_violation(violation),
        )
        .await
    }

    async fn allowed_domains(&self) -> Result<Vec<AllowedDomain>> {
        with_timeout("allowed_domains", self.limit, self.inner.allowed_domains()).await
    }
}
