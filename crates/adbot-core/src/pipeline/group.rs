use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    audit::AuditEvent,
    domain::{NewOffer, SpamViolation},
    formatting::{deep_link, mention},
    messaging::types::{ChatTarget, GroupMessage, InlineButton, InlineKeyboard},
    moderation::{self, Violation},
    texts, Result,
};

use super::{commands::Command, Pipeline};

const SPAM_WARNING_TTL: Duration = Duration::from_secs(30);
const TOPIC_PROMPT_TTL: Duration = Duration::from_secs(60);

impl Pipeline {
    pub(super) async fn on_group_message(&self, msg: GroupMessage) -> Result<()> {
        if msg.from.is_bot {
            return Ok(());
        }
        if let Some(title) = msg.chat_title.as_deref() {
            self.store.upsert_group(msg.chat_id, title).await?;
        }

        let author = msg.from.user_id;
        let is_admin = self.settings.is_admin(author);

        if let Some(cmd) = msg.text.as_deref().and_then(Command::parse) {
            if cmd.name == "register" {
                if is_admin {
                    return self.register_offer(&msg, cmd.args).await;
                }
                debug!(user_id = author.0, "register from non-admin ignored");
            }
        }
        if is_admin {
            return Ok(());
        }

        if let Some(text) = msg.text.as_deref() {
            let allowed = self.allow_list.snapshot();
            if let Some(violation) = moderation::check(text, &allowed) {
                return self.remove_spam(&msg, text, violation).await;
            }
        }

        let Some(thread_id) = msg.thread_id else {
            return Ok(());
        };
        let Some(offer) = self.store.offer_by_thread(msg.chat_id, thread_id).await? else {
            return Ok(());
        };
        if !offer.active {
            return Ok(());
        }

        // Posting in a paid topic goes through the bot.
        if let Err(e) = self.messenger.delete_message(msg.message_ref()).await {
            warn!(error = %e, user_id = author.0, "could not remove message in paid topic");
        }
        self.store
            .get_or_create_session(author, &msg.from.profile)
            .await?;

        let keyboard = InlineKeyboard::single(InlineButton::url(
            texts::BUTTON_PAY_PLACEMENT,
            deep_link(&self.settings.bot_username, offer.id),
        ));
        let prompt = texts::paid_topic_prompt(&mention(author, &msg.from.profile.display_name()));
        let sent = self
            .messenger
            .send_text(
                ChatTarget::thread(msg.chat_id, msg.thread_id),
                &prompt,
                Some(keyboard),
            )
            .await?;
        self.schedule_delete(sent, TOPIC_PROMPT_TTL);
        info!(user_id = author.0, offer_id = offer.id.0, "paid topic post intercepted");
        Ok(())
    }

    async fn remove_spam(&self, msg: &GroupMessage, text: &str, violation: Violation) -> Result<()> {
        let author = msg.from.user_id;
        if let Err(e) = self.messenger.delete_message(msg.message_ref()).await {
            warn!(error = %e, user_id = author.0, "could not delete spam message");
        }

        let record = SpamViolation {
            user_id: author,
            group_id: msg.chat_id,
            thread_id: msg.thread_id,
            text: text.to_string(),
            kind: violation.kind,
            matched: violation.matched.clone(),
            created_at: self.clock.now(),
        };
        if let Err(e) = self.store.record_spam_violation(record).await {
            warn!(error = %e, user_id = author.0, "failed to record spam violation");
        }
        self.audit
            .record(AuditEvent::spam_deleted(author, msg.chat_id, &violation));

        let warning = texts::spam_warning(&mention(author, &msg.from.profile.display_name()));
        match self
            .messenger
            .send_text(ChatTarget::thread(msg.chat_id, msg.thread_id), &warning, None)
            .await
        {
            Ok(sent) => self.schedule_delete(sent, SPAM_WARNING_TTL),
            Err(e) => warn!(error = %e, "failed to post spam warning"),
        }
        info!(
            user_id = author.0,
            kind = %violation.kind,
            matched = %violation.matched,
            "spam removed"
        );
        Ok(())
    }

    /// `/register [title]` inside a forum thread.
    async fn register_offer(&self, msg: &GroupMessage, title: &str) -> Result<()> {
        let target = ChatTarget::thread(msg.chat_id, msg.thread_id);
        let Some(thread_id) = msg.thread_id else {
            self.messenger
                .send_text(target, texts::REGISTER_IN_TOPIC, None)
                .await?;
            return Ok(());
        };

        let title = match title.trim() {
            "" => format!("Topic {}", thread_id.0),
            t => t.to_string(),
        };
        let defaults = &self.settings.offer_defaults;
        let offer = self
            .store
            .upsert_offer(NewOffer {
                group_id: msg.chat_id,
                thread_id,
                title,
                price: defaults.price,
                duration_days: defaults.duration_days,
                max_photos: defaults.max_photos,
                max_text_len: defaults.max_text_len,
            })
            .await?;

        self.audit
            .record(AuditEvent::offer_registered(offer.id, &offer.title));
        info!(offer_id = offer.id.0, group_id = msg.chat_id.0, thread_id = thread_id.0, "offer registered");
        self.messenger
            .send_text(target, &texts::offer_registered(&offer.title), None)
            .await?;
        Ok(())
    }
}
