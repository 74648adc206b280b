use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::moderation::ViolationKind;

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub i32);

/// Forum topic (thread) id inside a supergroup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

impl MessageRef {
    pub fn new(chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

impl UserId {
    /// Private chats share the user's id.
    pub fn chat(self) -> ChatId {
        ChatId(self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OfferId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingModerationId(pub i64);

/// A purchasable placement slot: one forum thread of a supergroup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub group_id: ChatId,
    pub thread_id: ThreadId,
    pub title: String,
    /// Minor currency units.
    pub price: i64,
    pub duration_days: u32,
    pub max_photos: usize,
    pub max_text_len: usize,
    pub moderation_required: bool,
    pub active: bool,
}

impl Offer {
    pub fn lifetime(&self) -> Duration {
        Duration::days(i64::from(self.duration_days))
    }
}

/// Offer fields supplied on registration; moderation and activity keep their
/// stored values on conflict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOffer {
    pub group_id: ChatId,
    pub thread_id: ThreadId,
    pub title: String,
    pub price: i64,
    pub duration_days: u32,
    pub max_photos: usize,
    pub max_text_len: usize,
}

/// Contact fields refreshed from the platform on every interaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        let mut name = self.first_name.clone().unwrap_or_default();
        if let Some(last) = self.last_name.as_deref().filter(|s| !s.is_empty()) {
            if !name.is_empty() {
                name.push(' ');
            }
            name.push_str(last);
        }
        name
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPendingModeration {
    pub user_id: UserId,
    pub offer_id: OfferId,
    pub text: String,
    pub photos: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingModeration {
    pub id: PendingModerationId,
    pub user_id: UserId,
    pub offer_id: OfferId,
    pub text: String,
    pub photos: Vec<String>,
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPost {
    pub messages: Vec<MessageRef>,
    pub offer_id: OfferId,
    pub owner: UserId,
    pub text: String,
    pub photos: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedPost {
    pub id: PostId,
    pub messages: Vec<MessageRef>,
    pub offer_id: OfferId,
    pub owner: UserId,
    pub text: String,
    pub photos: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPayment {
    pub user_id: UserId,
    pub offer_id: OfferId,
    pub charge_id: String,
    pub amount: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payment {
    pub id: i64,
    pub user_id: UserId,
    pub offer_id: OfferId,
    pub charge_id: String,
    pub amount: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpamViolation {
    pub user_id: UserId,
    pub group_id: ChatId,
    pub thread_id: Option<ThreadId>,
    pub text: String,
    pub kind: ViolationKind,
    pub matched: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllowedDomain {
    pub domain: String,
    pub active: bool,
}
