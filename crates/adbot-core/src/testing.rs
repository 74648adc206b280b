//! Test doubles shared by unit tests: a recording messenger, a manual clock
//! and a pipeline harness over the in-memory store.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    allowlist::AllowList,
    audit::AuditLog,
    clock::Clock,
    config::OfferDefaults,
    domain::{
        ChatId, MessageId, MessageRef, NewOffer, Offer, ThreadId, UserId, UserProfile,
    },
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{
            ButtonAction, CallbackQuery, ChatTarget, GroupMessage, InboundEvent, InlineKeyboard,
            Invoice, PaymentSucceeded, PrivateMessage, Sender,
        },
    },
    pipeline::{Pipeline, PipelineDeps, PipelineSettings},
    store::{memory::InMemoryStore, Store},
    Result,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Sent {
    Text {
        to: ChatTarget,
        html: String,
        keyboard: Option<InlineKeyboard>,
    },
    Photo {
        to: ChatTarget,
        file_id: String,
        caption: Option<String>,
        keyboard: Option<InlineKeyboard>,
    },
    Album {
        to: ChatTarget,
        file_ids: Vec<String>,
        caption: Option<String>,
    },
    Invoice {
        chat_id: ChatId,
        invoice: Invoice,
    },
}

impl Sent {
    pub fn chat_id(&self) -> ChatId {
        match self {
            Sent::Text { to, .. } | Sent::Photo { to, .. } | Sent::Album { to, .. } => to.chat_id,
            Sent::Invoice { chat_id, .. } => *chat_id,
        }
    }

    pub fn keyboard(&self) -> Option<&InlineKeyboard> {
        match self {
            Sent::Text { keyboard, .. } | Sent::Photo { keyboard, .. } => keyboard.as_ref(),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Recorded {
    sent: Vec<Sent>,
    deleted: Vec<MessageRef>,
    pre_checkout: Vec<(String, std::result::Result<(), String>)>,
    callbacks: Vec<String>,
}

/// In-memory `MessagingPort` that records every call.
#[derive(Default)]
pub struct RecordingMessenger {
    rec: Mutex<Recorded>,
    next_id: AtomicI32,
    hang_sends: AtomicBool,
    fail_sends: AtomicBool,
    fail_deletes: AtomicBool,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI32::new(1000),
            ..Self::default()
        }
    }

    /// Sends never complete.
    pub fn hang_sends(&self, on: bool) {
        self.hang_sends.store(on, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, on: bool) {
        self.fail_sends.store(on, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, on: bool) {
        self.fail_deletes.store(on, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.rec.lock().unwrap().sent.clone()
    }

    pub fn sent_to(&self, chat_id: ChatId) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| s.chat_id() == chat_id)
            .collect()
    }

    /// HTML of plain text messages sent to `chat_id`, in order.
    pub fn texts_to(&self, chat_id: ChatId) -> Vec<String> {
        self.sent_to(chat_id)
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { html, .. } => Some(html),
                _ => None,
            })
            .collect()
    }

    pub fn last_text_to(&self, chat_id: ChatId) -> Option<String> {
        self.texts_to(chat_id).pop()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.rec.lock().unwrap().deleted.clone()
    }

    pub fn invoices(&self) -> Vec<Invoice> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Invoice { invoice, .. } => Some(invoice),
                _ => None,
            })
            .collect()
    }

    pub fn pre_checkout_answers(&self) -> Vec<(String, std::result::Result<(), String>)> {
        self.rec.lock().unwrap().pre_checkout.clone()
    }

    pub fn answered_callbacks(&self) -> Vec<String> {
        self.rec.lock().unwrap().callbacks.clone()
    }

    async fn gate(&self) -> Result<()> {
        if self.hang_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::External("send failed".into()));
        }
        Ok(())
    }

    fn record(&self, chat_id: ChatId, sent: Sent) -> MessageRef {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.rec.lock().unwrap().sent.push(sent);
        MessageRef::new(chat_id, MessageId(id))
    }
}

#[async_trait]
impl MessagingPort for RecordingMessenger {
    async fn send_text(
        &self,
        to: ChatTarget,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        self.gate().await?;
        Ok(self.record(
            to.chat_id,
            Sent::Text {
                to,
                html: html.to_string(),
                keyboard,
            },
        ))
    }

    async fn send_photo(
        &self,
        to: ChatTarget,
        file_id: &str,
        caption_html: Option<&str>,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        self.gate().await?;
        Ok(self.record(
            to.chat_id,
            Sent::Photo {
                to,
                file_id: file_id.to_string(),
                caption: caption_html.map(str::to_string),
                keyboard,
            },
        ))
    }

    async fn send_album(
        &self,
        to: ChatTarget,
        file_ids: &[String],
        caption_html: Option<&str>,
    ) -> Result<Vec<MessageRef>> {
        self.gate().await?;
        let first = self.record(
            to.chat_id,
            Sent::Album {
                to,
                file_ids: file_ids.to_vec(),
                caption: caption_html.map(str::to_string),
            },
        );
        let rest = (1..file_ids.len()).map(|_| {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            MessageRef::new(to.chat_id, MessageId(id))
        });
        Ok(std::iter::once(first).chain(rest).collect())
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::External("delete failed".into()));
        }
        self.rec.lock().unwrap().deleted.push(msg);
        Ok(())
    }

    async fn send_invoice(&self, chat_id: ChatId, invoice: &Invoice) -> Result<MessageRef> {
        self.gate().await?;
        Ok(self.record(
            chat_id,
            Sent::Invoice {
                chat_id,
                invoice: invoice.clone(),
            },
        ))
    }

    async fn answer_pre_checkout(
        &self,
        query_id: &str,
        outcome: std::result::Result<(), String>,
    ) -> Result<()> {
        self.rec
            .lock()
            .unwrap()
            .pre_checkout
            .push((query_id.to_string(), outcome));
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str, _text: Option<&str>) -> Result<()> {
        self.rec
            .lock()
            .unwrap()
            .callbacks
            .push(callback_id.to_string());
        Ok(())
    }
}

/// Clock moved by hand.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub const GROUP: ChatId = ChatId(-100_200);
pub const THREAD: ThreadId = ThreadId(7);
pub const ADMIN: UserId = UserId(900);
pub const LOG_CHANNEL: ChatId = ChatId(-555);

pub fn start_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn profile(first: &str, username: Option<&str>) -> UserProfile {
    UserProfile {
        username: username.map(str::to_string),
        first_name: Some(first.to_string()),
        last_name: None,
    }
}

/// A wired pipeline over the in-memory store and recording messenger.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub messenger: Arc<RecordingMessenger>,
    pub clock: Arc<ManualClock>,
    pub allow_list: Arc<AllowList>,
    pub pipeline: Arc<Pipeline>,
    next_message: AtomicI32,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let messenger = Arc::new(RecordingMessenger::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let allow_list = Arc::new(AllowList::new());
        let settings = PipelineSettings {
            bot_username: "ads_bot".into(),
            currency: "RUB".into(),
            payment_window: chrono::Duration::hours(24),
            test_mode: true,
            admin_user_ids: vec![ADMIN.0],
            offer_defaults: OfferDefaults::default(),
            media_group_window: Duration::from_millis(1500),
        };
        let pipeline = Pipeline::new(
            settings,
            PipelineDeps {
                store: store.clone(),
                messenger: messenger.clone(),
                allow_list: allow_list.clone(),
                clock: clock.clone(),
                audit: AuditLog::to_channel(messenger.clone(), LOG_CHANNEL),
                shutdown: CancellationToken::new(),
            },
        );

        Self {
            store,
            messenger,
            clock,
            allow_list,
            pipeline,
            next_message: AtomicI32::new(1),
        }
    }

    /// Register the standard offer (price 50000, 7 days, 5 photos, 1000 chars).
    pub async fn offer(&self, moderation_required: bool) -> Offer {
        let defaults = OfferDefaults::default();
        let mut offer = self
            .store
            .upsert_offer(NewOffer {
                group_id: GROUP,
                thread_id: THREAD,
                title: "Services".into(),
                price: defaults.price,
                duration_days: defaults.duration_days,
                max_photos: defaults.max_photos,
                max_text_len: defaults.max_text_len,
            })
            .await
            .unwrap();
        offer.moderation_required = moderation_required;
        self.store.update_offer(offer.clone()).await.unwrap();
        offer
    }

    fn message_id(&self) -> MessageId {
        MessageId(self.next_message.fetch_add(1, Ordering::SeqCst))
    }

    pub fn sender(user: UserId) -> Sender {
        Sender {
            user_id: user,
            is_bot: false,
            profile: profile("Ivan", Some("ivan")),
        }
    }

    pub async fn text(&self, user: UserId, text: &str) {
        let event = InboundEvent::PrivateMessage(PrivateMessage {
            from: Self::sender(user),
            message_id: self.message_id(),
            text: Some(text.to_string()),
            photo: None,
            caption: None,
            media_group_id: None,
        });
        self.pipeline.handle(event).await;
    }

    pub async fn photo(&self, user: UserId, file_id: &str, caption: Option<&str>, group: Option<&str>) {
        let event = InboundEvent::PrivateMessage(PrivateMessage {
            from: Self::sender(user),
            message_id: self.message_id(),
            text: None,
            photo: Some(file_id.to_string()),
            caption: caption.map(str::to_string),
            media_group_id: group.map(str::to_string),
        });
        self.pipeline.handle(event).await;
    }

    pub async fn press(&self, user: UserId, action: ButtonAction) {
        let event = InboundEvent::Callback(CallbackQuery {
            callback_id: format!("cb-{}", self.message_id().0),
            from: Self::sender(user),
            data: action.encode(),
            message: None,
        });
        self.pipeline.handle(event).await;
    }

    pub async fn group_text(&self, user: UserId, thread: Option<ThreadId>, text: &str) -> MessageRef {
        let message_id = self.message_id();
        let event = InboundEvent::GroupMessage(GroupMessage {
            chat_id: GROUP,
            chat_title: Some("Market".into()),
            thread_id: thread,
            message_id,
            from: Self::sender(user),
            text: Some(text.to_string()),
        });
        self.pipeline.handle(event).await;
        MessageRef::new(GROUP, message_id)
    }

    pub async fn pay(&self, user: UserId, payload: &str, amount: i64) {
        let event = InboundEvent::PaymentSucceeded(PaymentSucceeded {
            from: Self::sender(user),
            payload: payload.to_string(),
            charge_id: format!("ch-{}", self.message_id().0),
            currency: "RUB".into(),
            total_amount: amount,
        });
        self.pipeline.handle(event).await;
    }
}
