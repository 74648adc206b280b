//! PostgreSQL `Store` (sqlx).
//!
//! Queries are checked at runtime, so the crate builds without a live
//! database. Migrations are embedded and applied by `PgStore::migrate`.

mod rows;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool};
use tracing::{debug, info};

use adbot_core::{
    domain::{
        AllowedDomain, ChatId, NewOffer, NewPayment, NewPendingModeration, NewPost, Offer,
        OfferId, Payment, PendingModeration, PendingModerationId, PostId, PublishedPost,
        SpamViolation, ThreadId, UserId, UserProfile,
    },
    errors::Error,
    session::{Session, UserState},
    store::Store,
    Result,
};

use rows::{AllowedDomainRow, OfferRow, PaymentRow, PendingRow, PostRow, SessionRow};

const OFFER_COLUMNS: &str = "id, group_id, thread_id, title, price, duration_days, max_photos, \
     max_text_len, moderation_required, active";
const SESSION_COLUMNS: &str = "user_id, state, offer_id, paid_at, email, email_declined, \
     banned_at, ban_reason, username, first_name, last_name";
const POST_COLUMNS: &str = "id, messages, offer_id, owner_id, text, photos, created_at, \
     expires_at, deleted, deleted_at";

fn db(e: sqlx::Error) -> Error {
    Error::Store(e.to_string())
}

fn to_i32(column: &str, v: usize) -> Result<i32> {
    i32::try_from(v).map_err(|_| Error::Validation(format!("{column} {v} out of range")))
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(db)?;
        info!("database connected");
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Store(format!("migration failed: {e}")))?;
        info!("migrations complete");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_group(&self, group_id: ChatId, title: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO groups (group_id, title)
            VALUES ($1, $2)
            ON CONFLICT (group_id) DO UPDATE
            SET title = EXCLUDED.title,
                updated_at = NOW()
            "#,
        )
        .bind(group_id.0)
        .bind(title)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn upsert_offer(&self, offer: NewOffer) -> Result<Offer> {
        let sql = format!(
            r#"
            INSERT INTO offers (group_id, thread_id, title, price, duration_days, max_photos, max_text_len)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (group_id, thread_id) DO UPDATE
            SET title = EXCLUDED.title
            RETURNING {OFFER_COLUMNS}
            "#
        );
        let duration = i32::try_from(offer.duration_days).map_err(|_| {
            Error::Validation(format!("duration_days {} out of range", offer.duration_days))
        })?;
        let row: OfferRow = sqlx::query_as(&sql)
            .bind(offer.group_id.0)
            .bind(offer.thread_id.0)
            .bind(&offer.title)
            .bind(offer.price)
            .bind(duration)
            .bind(to_i32("max_photos", offer.max_photos)?)
            .bind(to_i32("max_text_len", offer.max_text_len)?)
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;
        row.try_into()
    }

    async fn offer(&self, id: OfferId) -> Result<Option<Offer>> {
        let sql = format!("SELECT {OFFER_COLUMNS} FROM offers WHERE id = $1");
        let row: Option<OfferRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.map(Offer::try_from).transpose()
    }

    async fn offer_by_thread(
        &self,
        group_id: ChatId,
        thread_id: ThreadId,
    ) -> Result<Option<Offer>> {
        let sql = format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE group_id = $1 AND thread_id = $2 AND active"
        );
        let row: Option<OfferRow> = sqlx::query_as(&sql)
            .bind(group_id.0)
            .bind(thread_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.map(Offer::try_from).transpose()
    }

    async fn get_or_create_session(
        &self,
        user_id: UserId,
        profile: &UserProfile,
    ) -> Result<Session> {
        // Contact fields are refreshed when supplied, never erased.
        let sql = format!(
            r#"
            INSERT INTO user_sessions (user_id, username, first_name, last_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET username = COALESCE(EXCLUDED.username, user_sessions.username),
                first_name = COALESCE(EXCLUDED.first_name, user_sessions.first_name),
                last_name = COALESCE(EXCLUDED.last_name, user_sessions.last_name),
                updated_at = NOW()
            RETURNING {SESSION_COLUMNS}
            "#
        );
        let row: SessionRow = sqlx::query_as(&sql)
            .bind(user_id.0)
            .bind(profile.username.as_deref())
            .bind(profile.first_name.as_deref())
            .bind(profile.last_name.as_deref())
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;
        row.try_into()
    }

    async fn session(&self, user_id: UserId) -> Result<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM user_sessions WHERE user_id = $1");
        let row: Option<SessionRow> = sqlx::query_as(&sql)
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.map(Session::try_from).transpose()
    }

    async fn save_session(&self, session: &Session, expected: UserState) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE user_sessions
            SET state = $2,
                offer_id = $3,
                paid_at = $4,
                email = $5,
                email_declined = $6,
                banned_at = $7,
                ban_reason = $8,
                username = $9,
                first_name = $10,
                last_name = $11,
                updated_at = NOW()
            WHERE user_id = $1 AND state = $12
            "#,
        )
        .bind(session.user_id.0)
        .bind(session.state.as_str())
        .bind(session.offer_id.map(|o| o.0))
        .bind(session.paid_at)
        .bind(session.email.as_deref())
        .bind(session.email_declined)
        .bind(session.banned_at)
        .bind(session.ban_reason.as_deref())
        .bind(session.profile.username.as_deref())
        .bind(session.profile.first_name.as_deref())
        .bind(session.profile.last_name.as_deref())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        if res.rows_affected() == 1 {
            return Ok(true);
        }
        let exists: Option<(i64,)> =
            sqlx::query_as("SELECT user_id FROM user_sessions WHERE user_id = $1")
                .bind(session.user_id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?;
        match exists {
            Some(_) => {
                debug!(user_id = session.user_id.0, expected = %expected, "session moved concurrently");
                Ok(false)
            }
            None => Err(Error::NotFound(format!("session {}", session.user_id.0))),
        }
    }

    async fn record_payment(&self, payment: NewPayment) -> Result<Payment> {
        let row: PaymentRow = sqlx::query_as(
            r#"
            INSERT INTO payments (user_id, offer_id, charge_id, amount, currency, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, offer_id, charge_id, amount, currency, created_at
            "#,
        )
        .bind(payment.user_id.0)
        .bind(payment.offer_id.0)
        .bind(&payment.charge_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db)?;
        Ok(row.into())
    }

    async fn create_pending_moderation(
        &self,
        entry: NewPendingModeration,
    ) -> Result<PendingModeration> {
        let row: PendingRow = sqlx::query_as(
            r#"
            INSERT INTO pending_moderations (user_id, offer_id, text, photos, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, offer_id, text, photos, reject_reason, created_at
            "#,
        )
        .bind(entry.user_id.0)
        .bind(entry.offer_id.0)
        .bind(&entry.text)
        .bind(&entry.photos)
        .bind(entry.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db)?;
        Ok(row.into())
    }

    async fn pending_moderation(&self, user_id: UserId) -> Result<Option<PendingModeration>> {
        let row: Option<PendingRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, offer_id, text, photos, reject_reason, created_at
            FROM pending_moderations
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        Ok(row.map(Into::into))
    }

    async fn delete_pending_moderation(&self, id: PendingModerationId) -> Result<()> {
        sqlx::query("DELETE FROM pending_moderations WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(())
    }

    async fn create_post(&self, post: NewPost) -> Result<PublishedPost> {
        let sql = format!(
            r#"
            INSERT INTO published_posts (messages, offer_id, owner_id, text, photos, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {POST_COLUMNS}
            "#
        );
        let row: PostRow = sqlx::query_as(&sql)
            .bind(Json(&post.messages))
            .bind(post.offer_id.0)
            .bind(post.owner.0)
            .bind(&post.text)
            .bind(&post.photos)
            .bind(post.created_at)
            .bind(post.expires_at)
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;
        Ok(row.into())
    }

    async fn expired_posts(&self, now: DateTime<Utc>) -> Result<Vec<PublishedPost>> {
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM published_posts \
             WHERE NOT deleted AND expires_at < $1 ORDER BY expires_at"
        );
        let rows: Vec<PostRow> = sqlx::query_as(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_post_deleted(&self, id: PostId, at: DateTime<Utc>) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE published_posts SET deleted = TRUE, deleted_at = $2 WHERE id = $1 AND NOT deleted",
        )
        .bind(id.0)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        if res.rows_affected() == 1 {
            return Ok(true);
        }
        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM published_posts WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        match exists {
            Some(_) => Ok(false),
            None => Err(Error::NotFound(format!("post {}", id.0))),
        }
    }

    async fn record_spam_violation(&self, violation: SpamViolation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO spam_violations (user_id, group_id, thread_id, text, kind, matched, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(violation.user_id.0)
        .bind(violation.group_id.0)
        .bind(violation.thread_id.map(|t| t.0))
        .bind(&violation.text)
        .bind(violation.kind.as_str())
        .bind(&violation.matched)
        .bind(violation.created_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn allowed_domains(&self) -> Result<Vec<AllowedDomain>> {
        let rows: Vec<AllowedDomainRow> =
            sqlx::query_as("SELECT domain, active FROM allowed_domains ORDER BY domain")
                .fetch_all(&self.pool)
                .await
                .map_err(db)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
