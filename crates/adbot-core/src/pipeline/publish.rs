use tracing::{info, warn};

use crate::{
    audit::AuditEvent,
    domain::{NewPost, Offer, PendingModeration, PublishedPost, UserId, UserProfile},
    errors::Error,
    formatting::{escape_html, mention, render_post},
    messaging::types::{ButtonAction, ChatTarget, InlineButton, InlineKeyboard},
    pending::discard_previews,
    session::{Session, Trigger},
    texts, Result,
};

use super::{commands::Command, Pipeline};

impl Pipeline {
    /// Post the submission into the offer's thread and persist it with its expiry.
    pub(super) async fn publish(
        &self,
        offer: &Offer,
        owner: UserId,
        profile: &UserProfile,
        text: &str,
        photos: &[String],
    ) -> Result<PublishedPost> {
        let to = ChatTarget::thread(offer.group_id, Some(offer.thread_id));
        let html = render_post(text, profile);

        let messages = match photos {
            [] => vec![self.messenger.send_text(to, &html, None).await?],
            [photo] => vec![
                self.messenger
                    .send_photo(to, photo, Some(&html), None)
                    .await?,
            ],
            album => self.messenger.send_album(to, album, Some(&html)).await?,
        };

        let now = self.clock.now();
        let created = self
            .store
            .create_post(NewPost {
                messages: messages.clone(),
                offer_id: offer.id,
                owner,
                text: text.to_string(),
                photos: photos.to_vec(),
                created_at: now,
                expires_at: now + offer.lifetime(),
            })
            .await;

        match created {
            Ok(post) => {
                info!(
                    user_id = owner.0,
                    offer_id = offer.id.0,
                    post_id = post.id.0,
                    expires_at = %post.expires_at,
                    "post published"
                );
                Ok(post)
            }
            Err(e) => {
                // An unrecorded post would never expire; take it down again.
                discard_previews(self.messenger.as_ref(), &messages).await;
                Err(e)
            }
        }
    }

    /// Send a queued submission to every admin with Approve / Reject buttons.
    pub(super) async fn notify_moderators(
        &self,
        session: &Session,
        offer: &Offer,
        entry: &PendingModeration,
    ) {
        let user = session.user_id;
        let mut user_line = format!(
            "{} <code>{}</code>",
            mention(user, &session.profile.display_name()),
            user.0
        );
        if let Some(username) = session.profile.username.as_deref() {
            user_line.push_str(&format!(" @{}", escape_html(username)));
        }
        let body = match entry.text.as_str() {
            "" => format!("📷 Photos: {}", entry.photos.len()),
            t => escape_html(t),
        };
        let html = texts::moderation_request(&user_line, &offer.title, &body);
        let keyboard = InlineKeyboard {
            rows: vec![vec![
                InlineButton::callback(texts::BUTTON_APPROVE, ButtonAction::Approve(user)),
                InlineButton::callback(texts::BUTTON_REJECT, ButtonAction::Reject(user)),
            ]],
        };

        for &admin in &self.settings.admin_user_ids {
            let to = ChatTarget::user(UserId(admin));
            let photos = match entry.photos.as_slice() {
                [] => Ok(()),
                [photo] => self.messenger.send_photo(to, photo, None, None).await.map(|_| ()),
                album => self.messenger.send_album(to, album, None).await.map(|_| ()),
            };
            if let Err(e) = photos {
                warn!(admin_id = admin, error = %e, "failed to forward photos to moderator");
            }
            if let Err(e) = self
                .messenger
                .send_text(to, &html, Some(keyboard.clone()))
                .await
            {
                warn!(admin_id = admin, error = %e, "failed to notify moderator");
            }
        }
    }

    /// `/approve`, `/reject`, `/ban` from a private chat. Runs without the
    /// sender's lock since the target may be the sender.
    pub(super) async fn on_admin_command(&self, admin: UserId, cmd: &Command<'_>) -> Result<()> {
        if !self.settings.is_admin(admin) {
            self.reply(admin, texts::NOT_ALLOWED).await?;
            return Ok(());
        }
        let usage = match cmd.name.as_str() {
            "approve" => texts::USAGE_APPROVE,
            "reject" => texts::USAGE_REJECT,
            _ => texts::USAGE_BAN,
        };
        let Some((target, rest)) = cmd.target_and_rest() else {
            self.reply(admin, usage).await?;
            return Ok(());
        };
        let reason = Some(rest).filter(|r| !r.is_empty());

        match cmd.name.as_str() {
            "approve" => self.moderate(admin, target, true, None).await,
            "reject" => self.moderate(admin, target, false, reason).await,
            _ => match reason {
                Some(reason) => self.ban(admin, target, reason).await,
                None => {
                    self.reply(admin, usage).await?;
                    Ok(())
                }
            },
        }
    }

    /// Apply a moderator's decision to the target's latest queued submission.
    pub(super) async fn moderate(
        &self,
        moderator: UserId,
        target: UserId,
        approved: bool,
        reason: Option<&str>,
    ) -> Result<()> {
        let _guard = self.locks.lock_user(target).await;

        let Some(session) = self.store.session(target).await? else {
            self.reply(moderator, texts::USER_NOT_FOUND).await?;
            return Ok(());
        };
        let entry = self.store.pending_moderation(target).await?;
        let trigger = if approved {
            Trigger::ModeratorAccept
        } else {
            Trigger::ModeratorReject
        };
        let (Some(entry), Ok(next)) = (entry, session.apply(trigger, self.clock.now())) else {
            self.reply(moderator, texts::NOTHING_TO_MODERATE).await?;
            return Ok(());
        };
        if !self.commit(&session, &next).await? {
            self.reply(moderator, texts::ALREADY_HANDLED).await?;
            return Ok(());
        }

        if approved {
            let published = async {
                let offer = self
                    .store
                    .offer(entry.offer_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("offer {}", entry.offer_id.0)))?;
                let post = self
                    .publish(&offer, target, &session.profile, &entry.text, &entry.photos)
                    .await?;
                Ok::<_, Error>((offer, post))
            }
            .await;
            let (offer, post) = match published {
                Ok(done) => done,
                Err(e) => {
                    self.roll_back(&session, &next).await;
                    return Err(e);
                }
            };
            if let Err(e) = self.store.delete_pending_moderation(entry.id).await {
                warn!(entry_id = entry.id.0, error = %e, "failed to delete moderation entry");
            }
            self.notify(target, &texts::published(offer.duration_days))
                .await;
            self.audit
                .record(AuditEvent::moderation_decision(target, true, None));
            self.audit
                .record(AuditEvent::published(target, offer.id, post.id));
            self.reply(moderator, &texts::approved_ack(target.0)).await?;
            return Ok(());
        }

        if let Err(e) = self.store.delete_pending_moderation(entry.id).await {
            warn!(entry_id = entry.id.0, error = %e, "failed to delete moderation entry");
        }
        self.notify(target, &texts::rejected(reason)).await;
        self.audit
            .record(AuditEvent::moderation_decision(target, false, reason));
        info!(user_id = target.0, moderator_id = moderator.0, "submission rejected");
        self.reply(moderator, &texts::rejected_ack(target.0)).await?;
        Ok(())
    }

    async fn ban(&self, admin: UserId, target: UserId, reason: &str) -> Result<()> {
        let _guard = self.locks.lock_user(target).await;

        let session = self
            .store
            .get_or_create_session(target, &UserProfile::default())
            .await?;
        let next = session
            .apply(Trigger::Ban { reason }, self.clock.now())
            .map_err(|e| Error::Validation(e.to_string()))?;
        if !self.commit(&session, &next).await? {
            self.reply(admin, texts::ALREADY_HANDLED).await?;
            return Ok(());
        }
        self.pending.discard(target, self.messenger.as_ref()).await;

        self.audit.record(AuditEvent::banned(target, reason));
        info!(user_id = target.0, admin_id = admin.0, "user banned");
        self.notify(target, texts::BANNED).await;
        self.reply(admin, &texts::banned_notice(target.0)).await?;
        Ok(())
    }
}
