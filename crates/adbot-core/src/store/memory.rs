use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

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

#[derive(Default)]
struct MemoryState {
    groups: HashMap<i64, String>,
    offers: Vec<Offer>,
    sessions: HashMap<UserId, Session>,
    payments: Vec<Payment>,
    pending: Vec<PendingModeration>,
    posts: Vec<PublishedPost>,
    violations: Vec<SpamViolation>,
    allowed: Vec<AllowedDomain>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-local store. Used by tests and by sandbox runs without a database.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Administrative offer update (moderation flag, limits, activity).
    pub async fn update_offer(&self, offer: Offer) -> Result<()> {
        let mut st = self.state.lock().await;
        let slot = st
            .offers
            .iter_mut()
            .find(|o| o.id == offer.id)
            .ok_or_else(|| Error::NotFound(format!("offer {}", offer.id.0)))?;
        *slot = offer;
        Ok(())
    }

    pub async fn set_allowed_domains(&self, domains: Vec<AllowedDomain>) {
        self.state.lock().await.allowed = domains;
    }

    pub async fn posts(&self) -> Vec<PublishedPost> {
        self.state.lock().await.posts.clone()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.state.lock().await.payments.clone()
    }

    pub async fn pending_entries(&self) -> Vec<PendingModeration> {
        self.state.lock().await.pending.clone()
    }

    pub async fn violations(&self) -> Vec<SpamViolation> {
        self.state.lock().await.violations.clone()
    }

    pub async fn group_title(&self, group_id: ChatId) -> Option<String> {
        self.state.lock().await.groups.get(&group_id.0).cloned()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_group(&self, group_id: ChatId, title: &str) -> Result<()> {
        let mut st = self.state.lock().await;
        st.groups.insert(group_id.0, title.to_string());
        Ok(())
    }

    async fn upsert_offer(&self, offer: NewOffer) -> Result<Offer> {
        let mut st = self.state.lock().await;
        if let Some(existing) = st
            .offers
            .iter_mut()
            .find(|o| o.group_id == offer.group_id && o.thread_id == offer.thread_id)
        {
            existing.title = offer.title;
            return Ok(existing.clone());
        }

        let created = Offer {
            id: OfferId(st.next_id()),
            group_id: offer.group_id,
            thread_id: offer.thread_id,
            title: offer.title,
            price: offer.price,
            duration_days: offer.duration_days,
            max_photos: offer.max_photos,
            max_text_len: offer.max_text_len,
            moderation_required: false,
            active: true,
        };
        st.offers.push(created.clone());
        Ok(created)
    }

    async fn offer(&self, id: OfferId) -> Result<Option<Offer>> {
        let st = self.state.lock().await;
        Ok(st.offers.iter().find(|o| o.id == id).cloned())
    }

    async fn offer_by_thread(
        &self,
        group_id: ChatId,
        thread_id: ThreadId,
    ) -> Result<Option<Offer>> {
        let st = self.state.lock().await;
        Ok(st
            .offers
            .iter()
            .find(|o| o.group_id == group_id && o.thread_id == thread_id && o.active)
            .cloned())
    }

    async fn get_or_create_session(
        &self,
        user_id: UserId,
        profile: &UserProfile,
    ) -> Result<Session> {
        let mut st = self.state.lock().await;
        let session = st
            .sessions
            .entry(user_id)
            .or_insert_with(|| Session::new(user_id, UserProfile::default()));
        if profile.username.is_some() {
            session.profile.username = profile.username.clone();
        }
        if profile.first_name.is_some() {
            session.profile.first_name = profile.first_name.clone();
        }
        if profile.last_name.is_some() {
            session.profile.last_name = profile.last_name.clone();
        }
        Ok(session.clone())
    }

    async fn session(&self, user_id: UserId) -> Result<Option<Session>> {
        let st = self.state.lock().await;
        Ok(st.sessions.get(&user_id).cloned())
    }

    async fn save_session(&self, session: &Session, expected: UserState) -> Result<bool> {
        let mut st = self.state.lock().await;
        let Some(current) = st.sessions.get_mut(&session.user_id) else {
            return Err(Error::NotFound(format!("session {}", session.user_id.0)));
        };
        if current.state != expected {
            return Ok(false);
        }
        *current = session.clone();
        Ok(true)
    }

    async fn record_payment(&self, payment: NewPayment) -> Result<Payment> {
        let mut st = self.state.lock().await;
        let row = Payment {
            id: st.next_id(),
            user_id: payment.user_id,
            offer_id: payment.offer_id,
            charge_id: payment.charge_id,
            amount: payment.amount,
            currency: payment.currency,
            created_at: payment.created_at,
        };
        st.payments.push(row.clone());
        Ok(row)
    }

    async fn create_pending_moderation(
        &self,
        entry: NewPendingModeration,
    ) -> Result<PendingModeration> {
        let mut st = self.state.lock().await;
        let row = PendingModeration {
            id: PendingModerationId(st.next_id()),
            user_id: entry.user_id,
            offer_id: entry.offer_id,
            text: entry.text,
            photos: entry.photos,
            reject_reason: None,
            created_at: entry.created_at,
        };
        st.pending.push(row.clone());
        Ok(row)
    }

    async fn pending_moderation(&self, user_id: UserId) -> Result<Option<PendingModeration>> {
        let st = self.state.lock().await;
        Ok(st
            .pending
            .iter()
            .filter(|p| p.user_id == user_id)
            .max_by_key(|p| (p.created_at, p.id.0))
            .cloned())
    }

    async fn delete_pending_moderation(&self, id: PendingModerationId) -> Result<()> {
        let mut st = self.state.lock().await;
        st.pending.retain(|p| p.id != id);
        Ok(())
    }

    async fn create_post(&self, post: NewPost) -> Result<PublishedPost> {
        let mut st = self.state.lock().await;
        let row = PublishedPost {
            id: PostId(st.next_id()),
            messages: post.messages,
            offer_id: post.offer_id,
            owner: post.owner,
            text: post.text,
            photos: post.photos,
            created_at: post.created_at,
            expires_at: post.expires_at,
            deleted: false,
            deleted_at: None,
        };
        st.posts.push(row.clone());
        Ok(row)
    }

    async fn expired_posts(&self, now: DateTime<Utc>) -> Result<Vec<PublishedPost>> {
        let st = self.state.lock().await;
        Ok(st
            .posts
            .iter()
            .filter(|p| !p.deleted && p.expires_at < now)
            .cloned()
            .collect())
    }

    async fn mark_post_deleted(&self, id: PostId, at: DateTime<Utc>) -> Result<bool> {
        let mut st = self.state.lock().await;
        match st.posts.iter_mut().find(|p| p.id == id) {
            Some(p) if !p.deleted => {
                p.deleted = true;
                p.deleted_at = Some(at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(Error::NotFound(format!("post {}", id.0))),
        }
    }

    async fn record_spam_violation(&self, violation: SpamViolation) -> Result<()> {
        self.state.lock().await.violations.push(violation);
        Ok(())
    }

    async fn allowed_domains(&self) -> Result<Vec<AllowedDomain>> {
        Ok(self.state.lock().await.allowed.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_offer(thread: i32, title: &str) -> NewOffer {
        NewOffer {
            group_id: ChatId(-1001),
            thread_id: ThreadId(thread),
            title: title.into(),
            price: 50_000,
            duration_days: 7,
            max_photos: 5,
            max_text_len: 1000,
        }
    }

    #[tokio::test]
    async fn upsert_offer_renames_existing_thread() {
        let store = InMemoryStore::new();
        let a = store.upsert_offer(new_offer(5, "Services")).await.unwrap();
        let b = store.upsert_offer(new_offer(5, "Repairs")).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.title, "Repairs");

        let found = store
            .offer_by_thread(ChatId(-1001), ThreadId(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.title, "Repairs");
        assert!(store
            .offer_by_thread(ChatId(-1001), ThreadId(6))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn save_session_is_compare_and_set() {
        let store = InMemoryStore::new();
        let s = store
            .get_or_create_session(UserId(1), &UserProfile::default())
            .await
            .unwrap();

        let mut moved = s.clone();
        moved.state = UserState::AwaitingPayment;
        moved.offer_id = Some(OfferId(1));
        assert!(store.save_session(&moved, UserState::Neutral).await.unwrap());
        // Stale writer still believes the session is neutral.
        assert!(!store.save_session(&s, UserState::Neutral).await.unwrap());

        let stored = store.session(UserId(1)).await.unwrap().unwrap();
        assert_eq!(stored.state, UserState::AwaitingPayment);
    }

    #[tokio::test]
    async fn profile_fields_are_refreshed_not_erased() {
        let store = InMemoryStore::new();
        let first = UserProfile {
            username: Some("mower".into()),
            first_name: Some("Ann".into()),
            last_name: None,
        };
        store.get_or_create_session(UserId(2), &first).await.unwrap();
        let s = store
            .get_or_create_session(UserId(2), &UserProfile::default())
            .await
            .unwrap();
        assert_eq!(s.profile, first);
    }
}
