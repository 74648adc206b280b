//! Dispatcher endpoints: convert the update and hand it to the pipeline.
//!
//! The pipeline reports its own failures, so endpoints always succeed.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message, PreCheckoutQuery},
};
use tracing::debug;

use crate::{convert, router::AppState};

pub async fn handle_pre_checkout(q: PreCheckoutQuery, state: Arc<AppState>) -> ResponseResult<()> {
    state
        .pipeline
        .handle(convert::pre_checkout_event(&q))
        .await;
    Ok(())
}

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    match convert::callback_event(&q) {
        Some(event) => state.pipeline.handle(event).await,
        None => debug!(callback_id = %q.id, "callback without data ignored"),
    }
    Ok(())
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    match convert::message_event(&msg) {
        Some(event) => state.pipeline.handle(event).await,
        None => debug!(chat_id = msg.chat.id.0, "message not routed"),
    }
    Ok(())
}
