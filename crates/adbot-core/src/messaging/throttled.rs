use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{ChatTarget, InlineKeyboard, Invoice},
    },
    store::bounded::with_timeout,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between any two API calls.
    pub global_min_interval: Duration,
    /// Minimum spacing between calls to the same chat.
    pub per_chat_min_interval: Duration,
    /// Bound on a single call, queueing excluded.
    pub call_timeout: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40), // ~25/sec
            per_chat_min_interval: Duration::from_millis(1050), // ~0.95/sec
            call_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// MessagingPort decorator that rate-limits and time-bounds outbound calls.
///
/// Spacing is best-effort protection against 429s during bursts (album previews,
/// expiry sweeps); it does not guarantee zero 429s.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<HashMap<i64, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for_chat(&self, chat_id: i64) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_chat.lock().await;
        map.entry(chat_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_chat_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle_chat(&self, chat_id: ChatId) {
        let global_wait = { self.global.lock().await.reserve() };
        let chat_wait = {
            let lim = self.limiter_for_chat(chat_id.0).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(chat_wait);
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }

    async fn throttle_global(&self) {
        let wait = { self.global.lock().await.reserve() };
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    async fn send_text(
        &self,
        to: ChatTarget,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        self.throttle_chat(to.chat_id).await;
        with_timeout(
            "send_text",
            self.cfg.call_timeout,
            self.inner.send_text(to, html, keyboard),
        )
        .await
    }

    async fn send_photo(
        &self,
        to: ChatTarget,
        file_id: &str,
        caption_html: Option<&str>,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        self.throttle_chat(to.chat_id).await;
        with_timeout(
            "send_photo",
            self.cfg.call_timeout,
            self.inner.send_photo(to, file_id, caption_html, keyboard),
        )
        .await
    }

    async fn send_album(
        &self,
        to: ChatTarget,
        file_ids: &[String],
        caption_html: Option<&str>,
    ) -> Result<Vec<MessageRef>> {
        self.throttle_chat(to.chat_id).await;
        with_timeout(
            "send_album",
            self.cfg.call_timeout,
            self.inner.send_album(to, file_ids, caption_html),
        )
        .await
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.throttle_chat(msg.chat_id).await;
        with_timeout(
            "delete_message",
            self.cfg.call_timeout,
            self.inner.delete_message(msg),
        )
        .await
    }

    async fn send_invoice(&self, chat_id: ChatId, invoice: &Invoice) -> Result<MessageRef> {
        self.throttle_chat(chat_id).await;
        with_timeout(
            "send_invoice",
            self.cfg.call_timeout,
            self.inner.send_invoice(chat_id, invoice),
        )
        .await
    }

    async fn answer_pre_checkout(
        &self,
        query_id: &str,
        outcome: std::result::Result<(), String>,
    ) -> Result<()> {
        // Pre-checkout answers are not tied to a chat; global spacing only.
        self.throttle_global().await;
        with_timeout(
            "answer_pre_checkout",
            self.cfg.call_timeout,
            self.inner.answer_pre_checkout(query_id, outcome),
        )
        .await
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.throttle_global().await;
        with_timeout(
            "answer_callback_query",
            self.cfg.call_timeout,
            self.inner.answer_callback_query(callback_id, text),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingMessenger;

    #[tokio::test(start_paused = true)]
    async fn same_chat_calls_are_spaced() {
        let inner = Arc::new(RecordingMessenger::new());
        let throttled = ThrottledMessenger::new(inner.clone(), ThrottleConfig::default());
        let to = ChatTarget::chat(ChatId(5));

        let start = Instant::now();
        throttled.send_text(to, "a", None).await.unwrap();
        throttled.send_text(to, "b", None).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1050));
        assert_eq!(inner.texts_to(ChatId(5)), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out() {
        let inner = Arc::new(RecordingMessenger::new());
        inner.hang_sends(true);
        let cfg = ThrottleConfig {
            call_timeout: Duration::from_millis(200),
            ..ThrottleConfig::default()
        };
        let throttled = ThrottledMessenger::new(inner, cfg);
        let err = throttled
            .send_text(ChatTarget::chat(ChatId(1)), "x", None)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Timeout(_)));
    }
}
