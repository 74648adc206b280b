//! Submission pipeline: routes inbound events to state-appropriate handling.
//!
//! Events run concurrently; everything that reads and then writes a user's
//! session holds that user's lock, and every session write is a compare-and-set
//! on the state it was computed from.

mod callbacks;
mod commands;
mod group;
mod payments;
mod private;
mod publish;


use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, PoisonError, Weak},
    time::Duration,
};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    allowlist::AllowList,
    audit::AuditLog,
    clock::Clock,
    config::{Config, OfferDefaults},
    domain::{MessageRef, UserId},
    errors::Error,
    media_group::{MediaGroupAggregator, SealFn},
    messaging::{
        port::MessagingPort,
        types::{ChatTarget, InboundEvent, InlineKeyboard},
    },
    pending::PendingContentCache,
    session::Session,
    store::Store,
    texts, Result,
};

pub use payments::InvoicePayload;

/// Pipeline knobs that come from configuration.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub bot_username: String,
    pub currency: String,
    pub payment_window: chrono::Duration,
    pub test_mode: bool,
    pub admin_user_ids: Vec<i64>,
    pub offer_defaults: OfferDefaults,
    pub media_group_window: Duration,
}

impl PipelineSettings {
    pub fn from_config(cfg: &Config, bot_username: impl Into<String>) -> Self {
        Self {
            bot_username: bot_username.into(),
            currency: cfg.currency.clone(),
            payment_window: cfg.payment_window,
            test_mode: cfg.test_mode,
            admin_user_ids: cfg.admin_user_ids.clone(),
            offer_defaults: cfg.offer_defaults.clone(),
            media_group_window: cfg.media_group_timeout,
        }
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admin_user_ids.contains(&user_id.0)
    }
}

/// Collaborators the pipeline is wired to.
pub struct PipelineDeps {
    pub store: Arc<dyn Store>,
    pub messenger: Arc<dyn MessagingPort>,
    pub allow_list: Arc<AllowList>,
    pub clock: Arc<dyn Clock>,
    pub audit: AuditLog,
    pub shutdown: CancellationToken,
}

/// Per-user serialization. An entry lives only while someone holds or waits
/// for that user's lock.
#[derive(Default)]
pub struct UserLocks {
    inner: Arc<StdMutex<HashMap<UserId, Arc<Mutex<()>>>>>,
}

impl UserLocks {
    pub async fn lock_user(&self, user_id: UserId) -> UserGuard {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(user_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        UserGuard {
            user_id,
            guard: Some(lock.lock_owned().await),
            map: Arc::clone(&self.inner),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Held lock for one user; releasing the last reference removes the entry.
pub struct UserGuard {
    user_id: UserId,
    guard: Option<OwnedMutexGuard<()>>,
    map: Arc<StdMutex<HashMap<UserId, Arc<Mutex<()>>>>>,
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters clone the entry under the map lock, so a count of one means
        // nobody else can reach it.
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        if map
            .get(&self.user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.user_id);
        }
    }
}

pub struct Pipeline {
    settings: PipelineSettings,
    store: Arc<dyn Store>,
    messenger: Arc<dyn MessagingPort>,
    allow_list: Arc<AllowList>,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
    pending: PendingContentCache,
    media_groups: Arc<MediaGroupAggregator>,
    locks: UserLocks,
    shutdown: CancellationToken,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings, deps: PipelineDeps) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Pipeline>| {
            let weak = weak.clone();
            let sink: SealFn = Arc::new(move |group| {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(pipeline) = weak.upgrade() {
                        pipeline.on_album(group).await;
                    }
                })
            });
            let media_groups = MediaGroupAggregator::new(
                settings.media_group_window,
                sink,
                deps.shutdown.child_token(),
            );

            Self {
                settings,
                store: deps.store,
                messenger: deps.messenger,
                allow_list: deps.allow_list,
                clock: deps.clock,
                audit: deps.audit,
                pending: PendingContentCache::new(),
                media_groups,
                locks: UserLocks::default(),
                shutdown: deps.shutdown,
            }
        })
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Handle one inbound event. Failures are logged and, where a private chat
    /// exists, reported to the user; they never propagate to the intake loop.
    pub async fn handle(&self, event: InboundEvent) {
        let reply_to = match &event {
            InboundEvent::PaymentSucceeded(p) => Some(p.from.user_id),
            InboundEvent::PrivateMessage(m) => Some(m.from.user_id),
            InboundEvent::Callback(q) => Some(q.from.user_id),
            InboundEvent::PreCheckout(_) | InboundEvent::GroupMessage(_) => None,
        };

        let res = match event {
            InboundEvent::PreCheckout(q) => self.on_pre_checkout(q).await,
            InboundEvent::PaymentSucceeded(p) => self.on_payment(p).await,
            InboundEvent::GroupMessage(m) => self.on_group_message(m).await,
            InboundEvent::PrivateMessage(m) => self.on_private_message(m).await,
            InboundEvent::Callback(q) => self.on_callback(q).await,
        };

        if let Err(e) = res {
            self.report_failure(reply_to, &e).await;
        }
    }

    async fn report_failure(&self, user: Option<UserId>, err: &Error) {
        match err {
            Error::NotFound(_) => warn!(user_id = ?user.map(|u| u.0), error = %err, "missing record"),
            _ => error!(user_id = ?user.map(|u| u.0), error = %err, "event handling failed"),
        }
        let Some(user) = user else {
            return;
        };
        let text = match err {
            Error::NotFound(_) => texts::START_OVER,
            _ => texts::TRY_LATER,
        };
        self.notify(user, text).await;
    }

    async fn reply(&self, user: UserId, html: &str) -> Result<MessageRef> {
        self.messenger
            .send_text(ChatTarget::user(user), html, None)
            .await
    }

    async fn reply_with(
        &self,
        user: UserId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.messenger
            .send_text(ChatTarget::user(user), html, Some(keyboard))
            .await
    }

    /// Best-effort reply; failures are logged only.
    async fn notify(&self, user: UserId, html: &str) {
        if let Err(e) = self.reply(user, html).await {
            warn!(user_id = user.0, error = %e, "failed to message user");
        }
    }

    /// Compare-and-set `next` over `current`. `false` means another event won.
    async fn commit(&self, current: &Session, next: &Session) -> Result<bool> {
        let saved = self.store.save_session(next, current.state).await?;
        if saved {
            debug!(
                user_id = current.user_id.0,
                from = %current.state,
                to = %next.state,
                "session transition"
            );
        } else {
            debug!(user_id = current.user_id.0, expected = %current.state, "stale session write");
        }
        Ok(saved)
    }

    /// Undo a committed transition after a failed side effect.
    async fn roll_back(&self, previous: &Session, committed: &Session) {
        match self.store.save_session(previous, committed.state).await {
            Ok(true) => {}
            Ok(false) => warn!(user_id = previous.user_id.0, "rollback skipped: session moved on"),
            Err(e) => error!(user_id = previous.user_id.0, error = %e, "rollback failed"),
        }
    }

    /// Delete `msg` after `after`, unless shutting down.
    fn schedule_delete(&self, msg: MessageRef, after: Duration) {
        let messenger = Arc::clone(&self.messenger);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
              _ = shutdown.cancelled() => {}
              _ = tokio::time::sleep(after) => {
                if let Err(e) = messenger.delete_message(msg).await {
                    debug!(error = %e, message_id = msg.message_id.0, "scheduled delete failed");
                }
              }
            }
        });
    }
}
