//! Telegram adapter (teloxide).
//!
//! Implements the `adbot-core` MessagingPort over the Telegram Bot API and turns
//! incoming updates into `InboundEvent`s.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{
        InlineKeyboardButton, InlineKeyboardMarkup, InputFile, InputMedia, InputMediaPhoto,
        LabeledPrice, ParseMode,
    },
    ApiError,
};

use tokio::time::sleep;

pub mod convert;
pub mod handlers;
pub mod router;

use adbot_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ButtonKind, ChatTarget, InlineKeyboard, Invoice},
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
    provider_token: String,
}

impl TelegramMessenger {
    pub fn new(bot: Bot, provider_token: impl Into<String>) -> Self {
        Self {
            bot,
            provider_token: provider_token.into(),
        }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn msg_ref(chat_id: ChatId, msg: &Message) -> MessageRef {
        MessageRef::new(chat_id, MessageId(msg.id.0))
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        self.call(op).await.map_err(Self::map_err)
    }

    /// Run a request, retrying once on a 429 `RetryAfter`.
    async fn call<T, Fut>(
        &self,
        mut op: impl FnMut() -> Fut,
    ) -> std::result::Result<T, teloxide::RequestError>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Convert a port keyboard into Telegram markup. URL buttons must carry a valid URL.
pub fn to_markup(keyboard: &InlineKeyboard) -> Result<InlineKeyboardMarkup> {
    let mut rows = Vec::with_capacity(keyboard.rows.len());
    for row in &keyboard.rows {
        let mut buttons = Vec::with_capacity(row.len());
        for b in row {
            let button = match &b.kind {
                ButtonKind::Callback(data) => {
                    InlineKeyboardButton::callback(b.label.clone(), data.clone())
                }
                ButtonKind::Url(url) => {
                    let url = reqwest::Url::parse(url)
                        .map_err(|e| Error::Validation(format!("bad button url {url:?}: {e}")))?;
                    InlineKeyboardButton::url(b.label.clone(), url)
                }
            };
            buttons.push(button);
        }
        rows.push(buttons);
    }
    Ok(InlineKeyboardMarkup::new(rows))
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_text(
        &self,
        to: ChatTarget,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        let markup = keyboard.as_ref().map(to_markup).transpose()?;
        let msg = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .send_message(Self::tg_chat(to.chat_id), html.to_string())
                    .parse_mode(ParseMode::Html);
                if let Some(thread) = to.thread_id {
                    req = req.message_thread_id(thread.0);
                }
                if let Some(m) = markup.clone() {
                    req = req.reply_markup(m);
                }
                req
            })
            .await?;
        Ok(Self::msg_ref(to.chat_id, &msg))
    }

    async fn send_photo(
        &self,
        to: ChatTarget,
        file_id: &str,
        caption_html: Option<&str>,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        let markup = keyboard.as_ref().map(to_markup).transpose()?;
        let msg = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .send_photo(Self::tg_chat(to.chat_id), InputFile::file_id(file_id));
                if let Some(caption) = caption_html {
                    req = req.caption(caption.to_string()).parse_mode(ParseMode::Html);
                }
                if let Some(thread) = to.thread_id {
                    req = req.message_thread_id(thread.0);
                }
                if let Some(m) = markup.clone() {
                    req = req.reply_markup(m);
                }
                req
            })
            .await?;
        Ok(Self::msg_ref(to.chat_id, &msg))
    }

    async fn send_album(
        &self,
        to: ChatTarget,
        file_ids: &[String],
        caption_html: Option<&str>,
    ) -> Result<Vec<MessageRef>> {
        let media: Vec<InputMedia> = file_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let mut photo = InputMediaPhoto::new(InputFile::file_id(id.clone()));
                if i == 0 {
                    if let Some(caption) = caption_html {
                        photo = photo.caption(caption.to_string()).parse_mode(ParseMode::Html);
                    }
                }
                InputMedia::Photo(photo)
            })
            .collect();

        let msgs = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .send_media_group(Self::tg_chat(to.chat_id), media.clone());
                if let Some(thread) = to.thread_id {
                    req = req.message_thread_id(thread.0);
                }
                req
            })
            .await?;
        Ok(msgs.iter().map(|m| Self::msg_ref(to.chat_id, m)).collect())
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        let res = self
            .call(|| {
                self.bot
                    .delete_message(Self::tg_chat(msg.chat_id), Self::tg_msg_id(msg.message_id))
            })
            .await;
        match res {
            // Already gone counts as deleted.
            Ok(_) | Err(teloxide::RequestError::Api(ApiError::MessageToDeleteNotFound)) => Ok(()),
            Err(e) => Err(Self::map_err(e)),
        }
    }

    async fn send_invoice(&self, chat_id: ChatId, invoice: &Invoice) -> Result<MessageRef> {
        let amount = invoice
            .amount
            .try_into()
            .map_err(|_| Error::Validation(format!("invoice amount {} out of range", invoice.amount)))?;
        let price = LabeledPrice::new(invoice.price_label.clone(), amount);
        let msg = self
            .with_retry(|| {
                self.bot.send_invoice(
                    Self::tg_chat(chat_id),
                    invoice.title.clone(),
                    invoice.description.clone(),
                    invoice.payload.clone(),
                    self.provider_token.clone(),
                    invoice.currency.clone(),
                    vec![price.clone()],
                )
            })
            .await?;
        Ok(Self::msg_ref(chat_id, &msg))
    }

    async fn answer_pre_checkout(
        &self,
        query_id: &str,
        outcome: std::result::Result<(), String>,
    ) -> Result<()> {
        self.with_retry(|| {
            let req = self
                .bot
                .answer_pre_checkout_query(query_id.to_string(), outcome.is_ok());
            match &outcome {
                Ok(()) => req,
                Err(reason) => req.error_message(reason.clone()),
            }
        })
        .await?;
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.with_retry(|| {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adbot_core::messaging::types::{ButtonAction, InlineButton};
    use teloxide::types::InlineKeyboardButtonKind;

    #[test]
    fn keyboard_rows_and_kinds_are_preserved() {
        let kb = InlineKeyboard {
            rows: vec![
                vec![
                    InlineButton::callback("Publish", ButtonAction::ConfirmPublish),
                    InlineButton::callback("Again", ButtonAction::ReloadContent),
                ],
                vec![InlineButton::url("Pay", "https://t.me/ads_bot?start=pay_3")],
            ],
        };
        let m = to_markup(&kb).unwrap();
        assert_eq!(m.inline_keyboard.len(), 2);
        assert_eq!(m.inline_keyboard[0].len(), 2);
        assert!(matches!(
            &m.inline_keyboard[0][0].kind,
            InlineKeyboardButtonKind::CallbackData(d) if d == "confirm_publish"
        ));
        assert!(matches!(
            &m.inline_keyboard[1][0].kind,
            InlineKeyboardButtonKind::Url(u) if u.as_str() == "https://t.me/ads_bot?start=pay_3"
        ));
    }

    #[test]
    fn invalid_url_button_is_rejected() {
        let kb = InlineKeyboard::single(InlineButton::url("Pay", "not a url"));
        assert!(matches!(to_markup(&kb), Err(Error::Validation(_))));
    }
}
