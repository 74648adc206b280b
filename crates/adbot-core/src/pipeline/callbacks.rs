use tracing::{debug, info, warn};

use crate::{
    audit::AuditEvent,
    domain::{NewPendingModeration, OfferId, UserId},
    errors::Error,
    messaging::types::{ButtonAction, CallbackQuery},
    session::{Session, TransitionError, Trigger, UserState},
    texts, Result,
};

use super::Pipeline;

impl Pipeline {
    pub(super) async fn on_callback(&self, q: CallbackQuery) -> Result<()> {
        // Always stop the client spinner, whatever happens next.
        if let Err(e) = self.messenger.answer_callback_query(&q.callback_id, None).await {
            debug!(error = %e, "answer_callback_query failed");
        }

        let Some(action) = ButtonAction::parse(&q.data) else {
            warn!(user_id = q.from.user_id.0, data = %q.data, "unknown callback data");
            return Ok(());
        };
        let user = q.from.user_id;

        if let ButtonAction::Approve(target) | ButtonAction::Reject(target) = action {
            if !self.settings.is_admin(user) {
                self.reply(user, texts::NOT_ALLOWED).await?;
                return Ok(());
            }
            let approved = matches!(action, ButtonAction::Approve(_));
            return self.moderate(user, target, approved, None).await;
        }

        let _guard = self.locks.lock_user(user).await;
        let session = self
            .store
            .get_or_create_session(user, &q.from.profile)
            .await?;
        if session.state == UserState::Banned {
            self.reply(user, texts::BANNED).await?;
            return Ok(());
        }

        match action {
            ButtonAction::ConfirmPublish => self.confirm(session).await,
            ButtonAction::ReloadContent => self.reload(session).await,
            ButtonAction::SkipEmail(offer_id) => self.decline_email(session, offer_id).await,
            ButtonAction::Pay(offer_id) => self.request_payment(session, offer_id).await,
            ButtonAction::Approve(_) | ButtonAction::Reject(_) => Ok(()),
        }
    }

    /// "Publish" pressed on the preview. Caller holds the user lock.
    async fn confirm(&self, session: Session) -> Result<()> {
        let user = session.user_id;
        if session.state != UserState::AwaitingConfirmation {
            self.reply(user, texts::ALREADY_HANDLED).await?;
            return Ok(());
        }

        let Some(content) = self.pending.get(user).await else {
            let next = session
                .apply(Trigger::Reload, self.clock.now())
                .map_err(|e| Error::Validation(e.to_string()))?;
            self.commit(&session, &next).await?;
            self.reply(user, texts::CONTENT_LOST).await?;
            return Ok(());
        };

        let offer = self
            .store
            .offer(content.offer_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("offer {}", content.offer_id.0)))?;

        let next = match session.apply(
            Trigger::Confirm {
                moderation_required: offer.moderation_required,
            },
            self.clock.now(),
        ) {
            Ok(next) => next,
            Err(TransitionError::UnexpectedState { .. }) => {
                self.reply(user, texts::ALREADY_HANDLED).await?;
                return Ok(());
            }
            Err(e) => return Err(Error::Validation(e.to_string())),
        };
        if !self.commit(&session, &next).await? {
            self.reply(user, texts::ALREADY_HANDLED).await?;
            return Ok(());
        }

        if offer.moderation_required {
            let entry = match self
                .store
                .create_pending_moderation(NewPendingModeration {
                    user_id: user,
                    offer_id: offer.id,
                    text: content.text.clone(),
                    photos: content.photos.clone(),
                    created_at: self.clock.now(),
                })
                .await
            {
                Ok(entry) => entry,
                Err(e) => {
                    self.roll_back(&session, &next).await;
                    return Err(e);
                }
            };
            self.pending.discard(user, self.messenger.as_ref()).await;
            self.reply(user, texts::SENT_TO_MODERATION).await?;
            self.audit
                .record(AuditEvent::queued_for_moderation(user, offer.id));
            info!(user_id = user.0, offer_id = offer.id.0, entry_id = entry.id.0, "queued for moderation");
            self.notify_moderators(&session, &offer, &entry).await;
            return Ok(());
        }

        self.notify(user, texts::ACCEPTED_PUBLISHING).await;
        let post = match self
            .publish(&offer, user, &session.profile, &content.text, &content.photos)
            .await
        {
            Ok(post) => post,
            Err(e) => {
                // Previews stay so the user can press Publish again.
                self.roll_back(&session, &next).await;
                return Err(e);
            }
        };
        self.pending.discard(user, self.messenger.as_ref()).await;
        self.reply(user, &texts::published(offer.duration_days))
            .await?;
        self.audit
            .record(AuditEvent::published(user, offer.id, post.id));
        Ok(())
    }

    /// "Upload again": drop the staged content and wait for a new submission.
    async fn reload(&self, session: Session) -> Result<()> {
        let user = session.user_id;
        let next = match session.apply(Trigger::Reload, self.clock.now()) {
            Ok(next) => next,
            Err(TransitionError::UnexpectedState { .. }) => {
                self.reply(user, texts::ALREADY_HANDLED).await?;
                return Ok(());
            }
            Err(e) => return Err(Error::Validation(e.to_string())),
        };
        if !self.commit(&session, &next).await? {
            self.reply(user, texts::ALREADY_HANDLED).await?;
            return Ok(());
        }
        self.pending.discard(user, self.messenger.as_ref()).await;

        let max_photos = match next.offer_id {
            Some(id) => self
                .store
                .offer(id)
                .await?
                .map(|o| o.max_photos)
                .unwrap_or(self.settings.offer_defaults.max_photos),
            None => self.settings.offer_defaults.max_photos,
        };
        self.reply(user, &texts::reload_content(max_photos)).await?;
        Ok(())
    }

    async fn decline_email(&self, session: Session, offer_id: OfferId) -> Result<()> {
        let user = session.user_id;
        let next = match session.apply(Trigger::DeclineEmail(offer_id), self.clock.now()) {
            Ok(next) => next,
            Err(TransitionError::UnexpectedState { .. }) if session.state == UserState::Neutral => {
                // Email step already settled; just offer payment again.
                return self.resend_pay_prompt(user, offer_id).await;
            }
            Err(TransitionError::UnexpectedState { .. }) => {
                self.reply(user, texts::ALREADY_HANDLED).await?;
                return Ok(());
            }
            Err(e) => return Err(Error::Validation(e.to_string())),
        };
        if !self.commit(&session, &next).await? {
            self.reply(user, texts::ALREADY_HANDLED).await?;
            return Ok(());
        }
        self.resend_pay_prompt(user, offer_id).await
    }

    async fn resend_pay_prompt(&self, user: UserId, offer_id: OfferId) -> Result<()> {
        match self.store.offer(offer_id).await? {
            Some(offer) if offer.active => self.send_pay_prompt(user, &offer).await,
            _ => {
                self.reply(user, texts::TOPIC_NOT_FOUND).await?;
                Ok(())
            }
        }
    }
}
