use crate::domain::{ChatId, MessageId, MessageRef, OfferId, ThreadId, UserId, UserProfile};

/// Where an outbound message goes: a chat, optionally a forum thread inside it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChatTarget {
    pub chat_id: ChatId,
    pub thread_id: Option<ThreadId>,
}

impl ChatTarget {
    pub fn chat(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            thread_id: None,
        }
    }

    pub fn thread(chat_id: ChatId, thread_id: Option<ThreadId>) -> Self {
        Self { chat_id, thread_id }
    }

    pub fn user(user_id: UserId) -> Self {
        Self::chat(user_id.chat())
    }
}

/// Author of an inbound event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sender {
    pub user_id: UserId,
    pub is_bot: bool,
    pub profile: UserProfile,
}

/// Messenger-neutral inbound event, produced by the adapter.
#[derive(Clone, Debug)]
pub enum InboundEvent {
    PreCheckout(PreCheckout),
    PaymentSucceeded(PaymentSucceeded),
    GroupMessage(GroupMessage),
    PrivateMessage(PrivateMessage),
    Callback(CallbackQuery),
}

#[derive(Clone, Debug)]
pub struct PreCheckout {
    pub query_id: String,
    pub from: UserId,
    pub payload: String,
    pub currency: String,
    pub total_amount: i64,
}

#[derive(Clone, Debug)]
pub struct PaymentSucceeded {
    pub from: Sender,
    pub payload: String,
    pub charge_id: String,
    pub currency: String,
    pub total_amount: i64,
}

/// Any message posted in a supergroup (text or caption).
#[derive(Clone, Debug)]
pub struct GroupMessage {
    pub chat_id: ChatId,
    pub chat_title: Option<String>,
    pub thread_id: Option<ThreadId>,
    pub message_id: MessageId,
    pub from: Sender,
    pub text: Option<String>,
}

impl GroupMessage {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef::new(self.chat_id, self.message_id)
    }
}

#[derive(Clone, Debug)]
pub struct PrivateMessage {
    pub from: Sender,
    pub message_id: MessageId,
    pub text: Option<String>,
    /// Largest rendition of an attached photo.
    pub photo: Option<String>,
    pub caption: Option<String>,
    pub media_group_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CallbackQuery {
    pub callback_id: String,
    pub from: Sender,
    pub data: String,
    pub message: Option<MessageRef>,
}

/// Payment request shown to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invoice {
    pub title: String,
    pub description: String,
    pub payload: String,
    pub currency: String,
    pub price_label: String,
    /// Minor currency units.
    pub amount: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ButtonKind {
    Callback(String),
    Url(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub kind: ButtonKind,
}

impl InlineButton {
    pub fn callback(label: impl Into<String>, action: ButtonAction) -> Self {
        Self {
            label: label.into(),
            kind: ButtonKind::Callback(action.encode()),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: ButtonKind::Url(url.into()),
        }
    }
}

/// Inline keyboard, row by row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    pub fn single(button: InlineButton) -> Self {
        Self {
            rows: vec![vec![button]],
        }
    }

    /// One button per row.
    pub fn column(buttons: Vec<InlineButton>) -> Self {
        Self {
            rows: buttons.into_iter().map(|b| vec![b]).collect(),
        }
    }

    pub fn callback_data(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().flatten().filter_map(|b| match &b.kind {
            ButtonKind::Callback(data) => Some(data.as_str()),
            ButtonKind::Url(_) => None,
        })
    }
}

/// Button payloads understood by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonAction {
    ConfirmPublish,
    ReloadContent,
    SkipEmail(OfferId),
    Pay(OfferId),
    Approve(UserId),
    Reject(UserId),
}

impl ButtonAction {
    pub fn encode(self) -> String {
        match self {
            ButtonAction::ConfirmPublish => "confirm_publish".to_string(),
            ButtonAction::ReloadContent => "reload_content".to_string(),
            ButtonAction::SkipEmail(id) => format!("skip_email_{}", id.0),
            ButtonAction::Pay(id) => format!("pay_{}", id.0),
            ButtonAction::Approve(user) => format!("mod_approve_{}", user.0),
            ButtonAction::Reject(user) => format!("mod_reject_{}", user.0),
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "confirm_publish" => return Some(ButtonAction::ConfirmPublish),
            "reload_content" => return Some(ButtonAction::ReloadContent),
            _ => {}
        }
        if let Some(id) = data.strip_prefix("skip_email_") {
            return id.parse().ok().map(|id| ButtonAction::SkipEmail(OfferId(id)));
        }
        if let Some(id) = data.strip_prefix("pay_") {
            return id.parse().ok().map(|id| ButtonAction::Pay(OfferId(id)));
        }
        if let Some(id) = data.strip_prefix("mod_approve_") {
            return id.parse().ok().map(|id| ButtonAction::Approve(UserId(id)));
        }
        if let Some(id) = data.strip_prefix("mod_reject_") {
            return id.parse().ok().map(|id| ButtonAction::Reject(UserId(id)));
        }
        None
    }
}
