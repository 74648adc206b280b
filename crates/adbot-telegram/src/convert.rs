//! Telegram update → `InboundEvent`.

use teloxide::types::{CallbackQuery, Message, PreCheckoutQuery, User};

use adbot_core::{
    domain::{ChatId, MessageId, MessageRef, ThreadId, UserId, UserProfile},
    messaging::types::{
        self as ev, GroupMessage, InboundEvent, PaymentSucceeded, PrivateMessage, Sender,
    },
};

pub fn sender(user: &User) -> Sender {
    Sender {
        user_id: UserId(user.id.0 as i64),
        is_bot: user.is_bot,
        profile: UserProfile {
            username: user.username.clone(),
            first_name: Some(user.first_name.clone()).filter(|s| !s.is_empty()),
            last_name: user.last_name.clone(),
        },
    }
}

/// Messages without an author (channel posts, service messages) are dropped.
pub fn message_event(msg: &Message) -> Option<InboundEvent> {
    let from = sender(msg.from()?);

    if let Some(p) = msg.successful_payment() {
        return Some(InboundEvent::PaymentSucceeded(PaymentSucceeded {
            from,
            payload: p.invoice_payload.clone(),
            charge_id: p.telegram_payment_charge_id.clone(),
            currency: format!("{:?}", p.currency),
            total_amount: i64::from(p.total_amount),
        }));
    }

    if msg.chat.is_private() {
        return Some(InboundEvent::PrivateMessage(PrivateMessage {
            from,
            message_id: MessageId(msg.id.0),
            text: msg.text().map(str::to_string),
            // Sizes are ascending; keep the largest.
            photo: msg.photo().and_then(|p| p.last()).map(|p| p.file.id.clone()),
            caption: msg.caption().map(str::to_string),
            media_group_id: msg.media_group_id().map(str::to_string),
        }));
    }

    if msg.chat.is_group() || msg.chat.is_supergroup() {
        return Some(InboundEvent::GroupMessage(GroupMessage {
            chat_id: ChatId(msg.chat.id.0),
            chat_title: msg.chat.title().map(str::to_string),
            thread_id: msg.thread_id.map(ThreadId),
            message_id: MessageId(msg.id.0),
            from,
            text: msg.text().or(msg.caption()).map(str::to_string),
        }));
    }

    None
}

pub fn callback_event(q: &CallbackQuery) -> Option<InboundEvent> {
    let data = q.data.clone().filter(|d| !d.is_empty())?;
    Some(InboundEvent::Callback(ev::CallbackQuery {
        callback_id: q.id.clone(),
        from: sender(&q.from),
        data,
        message: q
            .message
            .as_ref()
            .map(|m| MessageRef::new(ChatId(m.chat.id.0), MessageId(m.id.0))),
    }))
}

pub fn pre_checkout_event(q: &PreCheckoutQuery) -> InboundEvent {
    InboundEvent::PreCheckout(ev::PreCheckout {
        query_id: q.id.clone(),
        from: UserId(q.from.id.0 as i64),
        payload: q.invoice_payload.clone(),
        currency: format!("{:?}", q.currency),
        total_amount: i64::from(q.total_amount),
    })
}
