//! Persistence port.
//!
//! Only the logical operations the pipeline needs; schema and storage mechanics
//! live in adapter crates. `memory` is the in-process implementation used by
//! tests and sandbox runs, `bounded` adds per-call timeouts to any store.

pub mod bounded;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    domain::{
        AllowedDomain, ChatId, NewOffer, NewPayment, NewPendingModeration, NewPost, Offer,
        OfferId, Payment, PendingModeration, PendingModerationId, PostId, PublishedPost,
        SpamViolation, ThreadId, UserId, UserProfile,
    },
    session::{Session, UserState},
    Result,
};

#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_group(&self, group_id: ChatId, title: &str) -> Result<()>;
    /// Create the offer for `(group, thread)` or rename the existing one.
    async fn upsert_offer(&self, offer: NewOffer) -> Result<Offer>;
    async fn offer(&self, id: OfferId) -> Result<Option<Offer>>;
    /// Active offer bound to a forum thread.
    async fn offer_by_thread(&self, group_id: ChatId, thread_id: ThreadId)
        -> Result<Option<Offer>>;

    /// Fetch the session, creating a neutral one on first contact. Contact fields
    /// are refreshed from `profile` where present.
    async fn get_or_create_session(&self, user_id: UserId, profile: &UserProfile)
        -> Result<Session>;
    async fn session(&self, user_id: UserId) -> Result<Option<Session>>;
    /// Write `session` only if the stored state still equals `expected`.
    /// Returns `false` when another event moved the session first.
    async fn save_session(&self, session: &Session, expected: UserState) -> Result<bool>;

    async fn record_payment(&self, payment: NewPayment) -> Result<Payment>;

    async fn create_pending_moderation(
        &self,
        entry: NewPendingModeration,
    ) -> Result<PendingModeration>;
    /// Most recent entry for the user.
    async fn pending_moderation(&self, user_id: UserId) -> Result<Option<PendingModeration>>;
    async fn delete_pending_moderation(&self, id: PendingModerationId) -> Result<()>;

    async fn create_post(&self, post: NewPost) -> Result<PublishedPost>;
    /// Non-deleted posts whose expiry is before `now`.
    async fn expired_posts(&self, now: DateTime<Utc>) -> Result<Vec<PublishedPost>>;
    /// Returns `false` if the post was already marked.
    async fn mark_post_deleted(&self, id: PostId, at: DateTime<Utc>) -> Result<bool>;

    async fn record_spam_violation(&self, violation: SpamViolation) -> Result<()>;
    async fn allowed_domains(&self) -> Result<Vec<AllowedDomain>>;
}
