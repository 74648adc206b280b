use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    domain::{ChatId, OfferId, PostId, UserId},
    formatting::{escape_html, truncate_text},
    messaging::{port::MessagingPort, types::ChatTarget},
    moderation::Violation,
};

const AUDIT_MAX_TEXT: usize = 200;

/// Operational event: logged through `tracing`, mirrored to the log channel.
#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEvent {
    fn new(event: &'static str, user_id: Option<UserId>) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            user_id: user_id.map(|u| u.0),
            offer_id: None,
            post_id: None,
            amount: None,
            currency: None,
            detail: None,
        }
    }

    pub fn payment(
        user_id: UserId,
        offer_id: OfferId,
        amount: i64,
        currency: &str,
        charge_id: &str,
    ) -> Self {
        Self {
            offer_id: Some(offer_id.0),
            amount: Some(amount),
            currency: Some(currency.to_string()),
            detail: Some(charge_id.to_string()),
            ..Self::new("payment", Some(user_id))
        }
    }

    pub fn published(user_id: UserId, offer_id: OfferId, post_id: PostId) -> Self {
        Self {
            offer_id: Some(offer_id.0),
            post_id: Some(post_id.0),
            ..Self::new("published", Some(user_id))
        }
    }

    pub fn queued_for_moderation(user_id: UserId, offer_id: OfferId) -> Self {
        Self {
            offer_id: Some(offer_id.0),
            ..Self::new("moderation_queued", Some(user_id))
        }
    }

    pub fn moderation_decision(user_id: UserId, approved: bool, reason: Option<&str>) -> Self {
        let event = if approved {
            "moderation_approved"
        } else {
            "moderation_rejected"
        };
        Self {
            detail: reason.map(str::to_string),
            ..Self::new(event, Some(user_id))
        }
    }

    pub fn spam_deleted(user_id: UserId, group_id: ChatId, violation: &Violation) -> Self {
        Self {
            detail: Some(format!(
                "{} in {}: {}",
                violation.kind, group_id.0, violation.matched
            )),
            ..Self::new("spam_deleted", Some(user_id))
        }
    }

    pub fn post_expired(owner: UserId, post_id: PostId) -> Self {
        Self {
            post_id: Some(post_id.0),
            ..Self::new("post_expired", Some(owner))
        }
    }

    pub fn banned(user_id: UserId, reason: &str) -> Self {
        Self {
            detail: Some(reason.to_string()),
            ..Self::new("banned", Some(user_id))
        }
    }

    pub fn offer_registered(offer_id: OfferId, title: &str) -> Self {
        Self {
            offer_id: Some(offer_id.0),
            detail: Some(title.to_string()),
            ..Self::new("offer_registered", None)
        }
    }

    /// One-line HTML summary for the log channel.
    pub fn to_html(&self) -> String {
        let mut out = format!("<b>{}</b>", self.event);
        if let Some(u) = self.user_id {
            out.push_str(&format!(" user=<code>{u}</code>"));
        }
        if let Some(o) = self.offer_id {
            out.push_str(&format!(" offer={o}"));
        }
        if let Some(p) = self.post_id {
            out.push_str(&format!(" post={p}"));
        }
        if let (Some(a), Some(c)) = (self.amount, self.currency.as_deref()) {
            out.push_str(&format!(" amount={a} {}", escape_html(c)));
        }
        if let Some(d) = &self.detail {
            out.push_str(&format!(" · {}", escape_html(&truncate_text(d, AUDIT_MAX_TEXT))));
        }
        out
    }
}

/// Audit sink. Channel delivery is fire-and-forget; a failed send is logged only.
#[derive(Clone, Default)]
pub struct AuditLog {
    channel: Option<(Arc<dyn MessagingPort>, ChatId)>,
}

impl AuditLog {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn to_channel(messenger: Arc<dyn MessagingPort>, channel: ChatId) -> Self {
        Self {
            channel: Some((messenger, channel)),
        }
    }

    pub fn record(&self, event: AuditEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => info!(audit = %json, "{}", event.event),
            Err(e) => warn!(error = %e, event = event.event, "audit event not serializable"),
        }

        let Some((messenger, channel)) = self.channel.clone() else {
            return;
        };
        let html = event.to_html();
        tokio::spawn(async move {
            if let Err(e) = messenger
                .send_text(ChatTarget::chat(channel), &html, None)
                .await
            {
                warn!(error = %e, "failed to post to log channel");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{moderation::ViolationKind, testing::RecordingMessenger};

    #[test]
    fn html_line_carries_ids_and_escaped_detail() {
        let ev = AuditEvent::spam_deleted(
            UserId(5),
            ChatId(-100),
            &Violation {
                kind: ViolationKind::Link,
                matched: "<evil>.ru".into(),
            },
        );
        let html = ev.to_html();
        assert!(html.starts_with("<b>spam_deleted</b> user=<code>5</code>"));
        assert!(html.contains("&lt;evil&gt;.ru"));
    }

    #[test]
    fn json_skips_empty_fields() {
        let ev = AuditEvent::post_expired(UserId(1), PostId(9));
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"post_id\":9"));
        assert!(!json.contains("amount"));
    }

    #[tokio::test(start_paused = true)]
    async fn mirrors_events_to_channel() {
        let messenger = Arc::new(RecordingMessenger::new());
        let log = AuditLog::to_channel(messenger.clone(), ChatId(-500));
        log.record(AuditEvent::banned(UserId(3), "spam"));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let lines = messenger.texts_to(ChatId(-500));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("banned"));
    }
}
