//! User-facing message texts (HTML).

use crate::formatting::{escape_html, format_price};

pub const START_HINT: &str =
    "👋 To place an ad, write in the matching topic of the group.";
pub const BANNED: &str = "🚫 You are blocked.";
pub const UNDER_REVIEW: &str = "⏳ Your ad is under review. We will notify you of the decision.";
pub const PAYMENT_REQUIRED: &str = "💳 Please pay for the placement first.";
pub const AWAITING_INVOICE: &str = "💳 Please pay the invoice above to continue.";
pub const PAYMENT_EXPIRED: &str = "⏰ The submission window after payment has passed. Please pay again.";
pub const SEND_TEXT_OR_PHOTO: &str = "❌ Send text or a photo.";
pub const AWAITING_CONFIRMATION: &str =
    "⚠️ You have an unpublished ad.\n\nUse the buttons above to confirm or upload again.";
pub const ALREADY_HANDLED: &str = "❌ This ad was already published or cancelled.";
pub const CONTENT_LOST: &str = "❌ Ad content not found. Please send your ad again.";
pub const START_OVER: &str = "❌ Something went missing. Please start over from the group topic.";
pub const TRY_LATER: &str = "❌ Error. Please try again later.";
pub const TOPIC_NOT_FOUND: &str = "❌ Topic not found.";
pub const SELECT_TOPIC_FIRST: &str = "❌ Choose a topic for your ad first.";
pub const ASK_EMAIL: &str = "📧 Send an email to receive receipts and service notices.";
pub const INVALID_EMAIL: &str = "❌ Invalid email format. Try again or press «Skip».";
pub const SENT_TO_MODERATION: &str = "⏳ Your ad was sent for moderation.";
pub const ACCEPTED_PUBLISHING: &str = "✅ Accepted! Publishing...";
pub const NOT_ALLOWED: &str = "❌ This command is for administrators.";
pub const PRE_CHECKOUT_UNAVAILABLE: &str = "This placement is no longer available.";
pub const PAID_IN_PROGRESS: &str =
    "💡 You already have a paid ad in progress. Finish it before choosing another topic.";
pub const REGISTER_IN_TOPIC: &str = "❌ Send /register inside the topic that should become paid.";
pub const USER_NOT_FOUND: &str = "❌ No such user.";
pub const NOTHING_TO_MODERATE: &str = "❌ This user has no ad waiting for moderation.";
pub const USAGE_APPROVE: &str = "Usage: /approve &lt;user_id&gt;";
pub const USAGE_REJECT: &str = "Usage: /reject &lt;user_id&gt; &lt;reason&gt;";
pub const USAGE_BAN: &str = "Usage: /ban &lt;user_id&gt; &lt;reason&gt;";

pub const BUTTON_PAY: &str = "💳 Pay";
pub const BUTTON_PAY_PLACEMENT: &str = "💳 Pay for placement";
pub const BUTTON_SKIP: &str = "❌ Skip";
pub const BUTTON_PUBLISH: &str = "✅ Publish";
pub const BUTTON_RELOAD: &str = "🔄 Upload again";
pub const BUTTON_POST_AGAIN: &str = "🔄 Post again";
pub const BUTTON_APPROVE: &str = "✅ Approve";
pub const BUTTON_REJECT: &str = "❌ Reject";

pub const INVOICE_TITLE: &str = "Ad placement";
pub const INVOICE_PRICE_LABEL: &str = "placement";

pub fn welcome(price: i64, currency: &str, days: u32) -> String {
    format!(
        "👋 Paid ads bot.\n\n💰 Price: {} for {days} days",
        format_price(price, currency)
    )
}

pub fn invoice_description(days: u32, offer_title: &str) -> String {
    format!("Publication for {days} days in the «{offer_title}» topic")
}

pub fn payment_success(max_photos: usize) -> String {
    format!(
        "✅ Payment received!\n\nSend your ad:\n• Text with a description\n• Photos (up to {max_photos})\n• Contacts\n\n⚠️ In a single message."
    )
}

pub fn reload_content(max_photos: usize) -> String {
    format!("🔄 Send your ad again: text and up to {max_photos} photos in a single message.")
}

pub fn published(days: u32) -> String {
    format!("🎉 Published for {days} days!")
}

pub fn email_saved(email: &str) -> String {
    format!("✅ Email {} saved!", escape_html(email))
}

pub fn text_too_long(max: usize) -> String {
    format!("❌ The text is too long. Maximum {max} characters.")
}

pub fn too_many_photos(sent: usize, max: usize) -> String {
    format!("⚠️ You sent {sent} photos, the maximum is {max}. The first {max} will be used.")
}

pub fn paid_topic_prompt(mention: &str) -> String {
    format!("{mention}, placing ads here is paid. Press the button below to proceed.")
}

pub fn spam_warning(mention: &str) -> String {
    format!("{mention}, your message was removed: phone numbers, links and contacts are not allowed here.")
}

pub fn expired_reminder(offer_title: &str, price: i64, currency: &str, days: u32) -> String {
    format!(
        "⏰ Your ad in «{}» has expired and was removed.\n\nPost again: {} for {days} days.",
        escape_html(offer_title),
        format_price(price, currency)
    )
}

pub fn rejected(reason: Option<&str>) -> String {
    match reason.filter(|r| !r.trim().is_empty()) {
        Some(r) => format!(
            "❌ Your ad was rejected by the moderator.\nReason: {}\n\nSend a corrected version.",
            escape_html(r)
        ),
        None => "❌ Your ad was rejected by the moderator.\n\nSend a corrected version.".to_string(),
    }
}

pub fn offer_registered(title: &str) -> String {
    format!("✅ Topic «{}» is now a paid placement.", escape_html(title))
}

pub fn banned_notice(user_id: i64) -> String {
    format!("🚫 User {user_id} is banned.")
}

pub fn moderation_request(user_line: &str, offer_title: &str, body: &str) -> String {
    format!(
        "🛡 <b>Moderation</b> · «{}»\nFrom: {user_line}\n\n{body}",
        escape_html(offer_title)
    )
}

pub fn approved_ack(user_id: i64) -> String {
    format!("✅ Ad of user {user_id} approved and published.")
}

pub fn rejected_ack(user_id: i64) -> String {
    format!("❌ Ad of user {user_id} rejected.")
}
