use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::{ChatTarget, InlineKeyboard, Invoice},
    Result,
};

/// Outbound messenger operations used by the pipeline.
///
/// All text is HTML. Implementations must treat deleting an already-deleted
/// message as success.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_text(
        &self,
        to: ChatTarget,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef>;

    async fn send_photo(
        &self,
        to: ChatTarget,
        file_id: &str,
        caption_html: Option<&str>,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef>;

    /// Album of photos; the caption is attached to the first one.
    async fn send_album(
        &self,
        to: ChatTarget,
        file_ids: &[String],
        caption_html: Option<&str>,
    ) -> Result<Vec<MessageRef>>;

    async fn delete_message(&self, msg: MessageRef) -> Result<()>;

    async fn send_invoice(&self, chat_id: ChatId, invoice: &Invoice) -> Result<MessageRef>;

    /// `Err(reason)` declines the checkout.
    async fn answer_pre_checkout(
        &self,
        query_id: &str,
        outcome: std::result::Result<(), String>,
    ) -> Result<()>;

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}
