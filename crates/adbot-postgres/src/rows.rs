//! Row shapes as stored, and their checked conversion into domain types.

use chrono::{DateTime, Utc};
use sqlx::types::Json;

use adbot_core::{
    domain::{
        AllowedDomain, ChatId, MessageRef, Offer, OfferId, Payment, PendingModeration,
        PendingModerationId, PostId, PublishedPost, ThreadId, UserId, UserProfile,
    },
    errors::Error,
    session::{Session, UserState},
    Result,
};

fn corrupt(table: &str, detail: impl std::fmt::Display) -> Error {
    Error::Store(format!("corrupt {table} row: {detail}"))
}

fn non_negative<T: TryFrom<i32>>(table: &str, column: &str, v: i32) -> Result<T> {
    T::try_from(v).map_err(|_| corrupt(table, format!("{column} = {v}")))
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct OfferRow {
    pub id: i64,
    pub group_id: i64,
    pub thread_id: i32,
    pub title: String,
    pub price: i64,
    pub duration_days: i32,
    pub max_photos: i32,
    pub max_text_len: i32,
    pub moderation_required: bool,
    pub active: bool,
}

impl TryFrom<OfferRow> for Offer {
    type Error = Error;

    fn try_from(r: OfferRow) -> Result<Self> {
        Ok(Offer {
            id: OfferId(r.id),
            group_id: ChatId(r.group_id),
            thread_id: ThreadId(r.thread_id),
            title: r.title,
            price: r.price,
            duration_days: non_negative("offers", "duration_days", r.duration_days)?,
            max_photos: non_negative("offers", "max_photos", r.max_photos)?,
            max_text_len: non_negative("offers", "max_text_len", r.max_text_len)?,
            moderation_required: r.moderation_required,
            active: r.active,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SessionRow {
    pub user_id: i64,
    pub state: String,
    pub offer_id: Option<i64>,
    pub paid_at: Option<DateTime<Utc>>,
    pub email: Option<String>,
    pub email_declined: bool,
    pub banned_at: Option<DateTime<Utc>>,
    pub ban_reason: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl TryFrom<SessionRow> for Session {
    type Error = Error;

    fn try_from(r: SessionRow) -> Result<Self> {
        let state: UserState = r
            .state
            .parse()
            .map_err(|e| corrupt("user_sessions", e))?;
        let session = Session {
            user_id: UserId(r.user_id),
            state,
            offer_id: r.offer_id.map(OfferId),
            paid_at: r.paid_at,
            email: r.email,
            email_declined: r.email_declined,
            banned_at: r.banned_at,
            ban_reason: r.ban_reason,
            profile: UserProfile {
                username: r.username,
                first_name: r.first_name,
                last_name: r.last_name,
            },
        };
        if !session.invariant_holds() {
            return Err(corrupt(
                "user_sessions",
                format!("user {} in state {} without offer", r.user_id, state),
            ));
        }
        Ok(session)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PaymentRow {
    pub id: i64,
    pub user_id: i64,
    pub offer_id: i64,
    pub charge_id: String,
    pub amount: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl From<PaymentRow> for Payment {
    fn from(r: PaymentRow) -> Self {
        Payment {
            id: r.id,
            user_id: UserId(r.user_id),
            offer_id: OfferId(r.offer_id),
            charge_id: r.charge_id,
            amount: r.amount,
            currency: r.currency,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PendingRow {
    pub id: i64,
    pub user_id: i64,
    pub offer_id: i64,
    pub text: String,
    pub photos: Vec<String>,
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<PendingRow> for PendingModeration {
    fn from(r: PendingRow) -> Self {
        PendingModeration {
            id: PendingModerationId(r.id),
            user_id: UserId(r.user_id),
            offer_id: OfferId(r.offer_id),
            text: r.text,
            photos: r.photos,
            reject_reason: r.reject_reason,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PostRow {
    pub id: i64,
    pub messages: Json<Vec<MessageRef>>,
    pub offer_id: i64,
    pub owner_id: i64,
    pub text: String,
    pub photos: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<PostRow> for PublishedPost {
    fn from(r: PostRow) -> Self {
        PublishedPost {
            id: PostId(r.id),
            messages: r.messages.0,
            offer_id: OfferId(r.offer_id),
            owner: UserId(r.owner_id),
            text: r.text,
            photos: r.photos,
            created_at: r.created_at,
            expires_at: r.expires_at,
            deleted: r.deleted,
            deleted_at: r.deleted_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AllowedDomainRow {
    pub domain: String,
    pub active: bool,
}

impl From<AllowedDomainRow> for AllowedDomain {
    fn from(r: AllowedDomainRow) -> Self {
        AllowedDomain {
            domain: r.domain,
            active: r.active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_row(state: &str, offer_id: Option<i64>) -> SessionRow {
        SessionRow {
            user_id: 42,
            state: state.into(),
            offer_id,
            paid_at: None,
            email: None,
            email_declined: false,
            banned_at: None,
            ban_reason: None,
            username: Some("ivan".into()),
            first_name: None,
            last_name: None,
        }
    }

    #[test]
    fn persisted_state_names_are_parsed() {
        let s = Session::try_from(session_row("waiting_content", Some(3))).unwrap();
        assert_eq!(s.state, UserState::AwaitingContent);
        assert_eq!(s.offer_id, Some(OfferId(3)));
        assert_eq!(s.profile.username.as_deref(), Some("ivan"));
    }

    #[test]
    fn unknown_state_is_rejected() {
        let err = Session::try_from(session_row("waiting_for_godot", None)).unwrap_err();
        assert!(matches!(err, Error::Store(msg) if msg.contains("waiting_for_godot")));
    }

    #[test]
    fn paid_state_without_offer_is_rejected() {
        assert!(Session::try_from(session_row("waiting_confirm", None)).is_err());
    }

    #[test]
    fn negative_offer_limits_are_rejected() {
        let row = OfferRow {
            id: 1,
            group_id: -100,
            thread_id: 7,
            title: "Services".into(),
            price: 50_000,
            duration_days: 7,
            max_photos: -1,
            max_text_len: 1000,
            moderation_required: false,
            active: true,
        };
        let err = Offer::try_from(row).unwrap_err();
        assert!(matches!(err, Error::Store(msg) if msg.contains("max_photos")));
    }
}
