use tracing::{info, warn};

use crate::{
    domain::{MessageRef, Offer, OfferId, UserId},
    errors::Error,
    formatting::render_preview,
    media_group::{MediaItem, SealedGroup},
    messaging::types::{
        ButtonAction, ChatTarget, InlineButton, InlineKeyboard, PrivateMessage,
    },
    pending::{discard_previews, PendingContent},
    session::{Session, TransitionError, Trigger, UserState},
    submission::{self, SubmissionError},
    texts, Result,
};

use super::{commands::Command, Pipeline};

impl Pipeline {
    pub(super) async fn on_private_message(&self, msg: PrivateMessage) -> Result<()> {
        if msg.from.is_bot {
            return Ok(());
        }
        let user = msg.from.user_id;

        // Album parts are buffered without the user lock; the sealed group comes
        // back through `on_album`, which takes it.
        if let (Some(group_id), Some(photo)) = (msg.media_group_id.as_deref(), &msg.photo) {
            self.store
                .get_or_create_session(user, &msg.from.profile)
                .await?;
            let item = MediaItem {
                message_id: msg.message_id,
                file_id: photo.clone(),
                caption: msg.caption.clone(),
            };
            self.media_groups.push(group_id, user, item).await;
            return Ok(());
        }

        let text = msg.text.as_deref().or(msg.caption.as_deref());
        let cmd = text.and_then(Command::parse);
        if let Some(cmd) = &cmd {
            if matches!(cmd.name.as_str(), "approve" | "reject" | "ban") {
                return self.on_admin_command(user, cmd).await;
            }
        }

        let _guard = self.locks.lock_user(user).await;
        let session = self
            .store
            .get_or_create_session(user, &msg.from.profile)
            .await?;

        if session.state == UserState::Banned {
            self.reply(user, texts::BANNED).await?;
            return Ok(());
        }

        if let Some(cmd) = cmd {
            match cmd.name.as_str() {
                "start" => return self.on_start(session, cmd.args).await,
                "testpay" if self.settings.test_mode => return self.test_payment(session).await,
                _ => {}
            }
        }

        match session.state {
            UserState::AwaitingEmail => self.supply_email(session, text).await,
            UserState::AwaitingContent => {
                let text = text.map(str::to_string);
                let photos = msg.photo.into_iter().collect();
                self.submit_content(session, text, photos).await
            }
            _ => self.state_reply(&session).await,
        }
    }

    /// A sealed media group; runs under the owner's lock.
    pub(super) async fn on_album(&self, group: SealedGroup) {
        let user = group.owner;
        let _guard = self.locks.lock_user(user).await;

        let res = async {
            let Some(session) = self.store.session(user).await? else {
                return Ok(());
            };
            match session.state {
                UserState::AwaitingContent => {
                    self.submit_content(session, group.caption, group.photos)
                        .await
                }
                _ => self.state_reply(&session).await,
            }
        }
        .await;

        if let Err(e) = res {
            self.report_failure(Some(user), &e).await;
        }
    }

    /// Informative reply for states that do not accept content.
    async fn state_reply(&self, session: &Session) -> Result<()> {
        let text = match session.state {
            UserState::Banned => texts::BANNED,
            UserState::AwaitingModeration => texts::UNDER_REVIEW,
            UserState::AwaitingConfirmation => texts::AWAITING_CONFIRMATION,
            UserState::AwaitingPayment => texts::AWAITING_INVOICE,
            UserState::AwaitingEmail => texts::ASK_EMAIL,
            UserState::Neutral | UserState::AwaitingContent => texts::PAYMENT_REQUIRED,
        };
        self.reply(session.user_id, text).await?;
        Ok(())
    }

    async fn on_start(&self, session: Session, args: &str) -> Result<()> {
        let offer_id = args
            .strip_prefix("pay_")
            .and_then(|id| id.parse::<i64>().ok())
            .map(OfferId);
        match offer_id {
            Some(id) => self.select_offer(session, id).await,
            None => {
                self.reply(session.user_id, texts::START_HINT).await?;
                Ok(())
            }
        }
    }

    async fn select_offer(&self, session: Session, offer_id: OfferId) -> Result<()> {
        let user = session.user_id;
        let Some(offer) = self.store.offer(offer_id).await? else {
            self.reply(user, texts::TOPIC_NOT_FOUND).await?;
            return Ok(());
        };

        let next = match session.apply(Trigger::SelectOffer(&offer), self.clock.now()) {
            Ok(next) => next,
            Err(TransitionError::OfferInactive(_)) => {
                self.reply(user, texts::TOPIC_NOT_FOUND).await?;
                return Ok(());
            }
            Err(TransitionError::UnexpectedState { .. }) => {
                self.reply(user, texts::PAID_IN_PROGRESS).await?;
                return Ok(());
            }
            Err(e) => return Err(Error::Validation(e.to_string())),
        };
        if !self.commit(&session, &next).await? {
            self.reply(user, texts::ALREADY_HANDLED).await?;
            return Ok(());
        }
        info!(user_id = user.0, offer_id = offer.id.0, state = %next.state, "offer selected");

        if next.state == UserState::AwaitingEmail {
            let skip = InlineKeyboard::single(InlineButton::callback(
                texts::BUTTON_SKIP,
                ButtonAction::SkipEmail(offer.id),
            ));
            self.reply_with(user, texts::ASK_EMAIL, skip).await?;
            return Ok(());
        }
        self.send_pay_prompt(user, &offer).await
    }

    pub(super) async fn send_pay_prompt(&self, user: UserId, offer: &Offer) -> Result<()> {
        let pay = InlineKeyboard::single(InlineButton::callback(
            texts::BUTTON_PAY,
            ButtonAction::Pay(offer.id),
        ));
        let text = texts::welcome(offer.price, &self.settings.currency, offer.duration_days);
        self.reply_with(user, &text, pay).await?;
        Ok(())
    }

    async fn supply_email(&self, session: Session, text: Option<&str>) -> Result<()> {
        let user = session.user_id;
        let raw = text.unwrap_or_default();
        let next = match session.apply(Trigger::SupplyEmail(raw), self.clock.now()) {
            Ok(next) => next,
            Err(TransitionError::InvalidEmail) => {
                self.reply(user, texts::INVALID_EMAIL).await?;
                return Ok(());
            }
            Err(e) => return Err(Error::Validation(e.to_string())),
        };
        if !self.commit(&session, &next).await? {
            self.reply(user, texts::ALREADY_HANDLED).await?;
            return Ok(());
        }

        let email = next.email.as_deref().unwrap_or_default();
        self.reply(user, &texts::email_saved(email)).await?;

        let offer_id = next
            .offer_id
            .ok_or_else(|| Error::NotFound(format!("offer for user {}", user.0)))?;
        let offer = self
            .store
            .offer(offer_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("offer {}", offer_id.0)))?;
        self.send_pay_prompt(user, &offer).await
    }

    /// Validate and stage content, then show the preview. Caller holds the user lock.
    async fn submit_content(
        &self,
        session: Session,
        text: Option<String>,
        photos: Vec<String>,
    ) -> Result<()> {
        let user = session.user_id;
        let now = self.clock.now();

        let next = match session.apply(
            Trigger::SubmitContent {
                payment_window: self.settings.payment_window,
            },
            now,
        ) {
            Ok(next) => next,
            Err(TransitionError::PaymentExpired) => {
                let reset = session
                    .apply(Trigger::Reset, now)
                    .map_err(|e| Error::Validation(e.to_string()))?;
                self.commit(&session, &reset).await?;
                info!(user_id = user.0, "payment window expired");
                self.reply(user, texts::PAYMENT_EXPIRED).await?;
                return Ok(());
            }
            Err(TransitionError::UnexpectedState { .. }) => {
                self.reply(user, texts::ALREADY_HANDLED).await?;
                return Ok(());
            }
            Err(e) => return Err(Error::Validation(e.to_string())),
        };

        let offer_id = session
            .offer_id
            .ok_or_else(|| Error::NotFound(format!("offer for user {}", user.0)))?;
        let offer = self
            .store
            .offer(offer_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("offer {}", offer_id.0)))?;

        let accepted = match submission::validate(&offer, text, photos) {
            Ok(s) => s,
            Err(SubmissionError::Empty) => {
                self.reply(user, texts::SEND_TEXT_OR_PHOTO).await?;
                return Ok(());
            }
            Err(SubmissionError::TextTooLong { max, .. }) => {
                self.reply(user, &texts::text_too_long(max)).await?;
                return Ok(());
            }
        };
        if let Some(received) = accepted.dropped_from {
            warn!(user_id = user.0, received, kept = offer.max_photos, "too many photos");
            self.notify(user, &texts::too_many_photos(received, offer.max_photos))
                .await;
        }

        if !self.commit(&session, &next).await? {
            self.reply(user, texts::ALREADY_HANDLED).await?;
            return Ok(());
        }

        let content = PendingContent {
            offer_id: offer.id,
            text: accepted.text,
            photos: accepted.photos,
            received_at: now,
            previews: Vec::new(),
        };
        if let Some(stale) = self.pending.stage(user, content.clone()).await {
            discard_previews(self.messenger.as_ref(), &stale.previews).await;
        }

        match self.show_preview(user, &content).await {
            Ok(previews) => {
                self.pending.set_previews(user, previews).await;
                info!(
                    user_id = user.0,
                    offer_id = offer.id.0,
                    photos = content.photos.len(),
                    "content staged"
                );
                Ok(())
            }
            Err(e) => {
                self.pending.take(user).await;
                self.roll_back(&session, &next).await;
                Err(e)
            }
        }
    }

    /// Preview with Publish / Upload again buttons. Returns every message shown.
    async fn show_preview(&self, user: UserId, content: &PendingContent) -> Result<Vec<MessageRef>> {
        let to = ChatTarget::user(user);
        let html = render_preview(&content.text, content.photos.len());
        let keyboard = InlineKeyboard {
            rows: vec![vec![
                InlineButton::callback(texts::BUTTON_PUBLISH, ButtonAction::ConfirmPublish),
                InlineButton::callback(texts::BUTTON_RELOAD, ButtonAction::ReloadContent),
            ]],
        };

        match content.photos.as_slice() {
            [] => Ok(vec![
                self.messenger.send_text(to, &html, Some(keyboard)).await?,
            ]),
            [photo] => Ok(vec![
                self.messenger
                    .send_photo(to, photo, Some(&html), Some(keyboard))
                    .await?,
            ]),
            photos => {
                let mut shown = self.messenger.send_album(to, photos, None).await?;
                match self.messenger.send_text(to, &html, Some(keyboard)).await {
                    Ok(m) => {
                        shown.push(m);
                        Ok(shown)
                    }
                    Err(e) => {
                        discard_previews(self.messenger.as_ref(), &shown).await;
                        Err(e)
                    }
                }
            }
        }
    }
}
