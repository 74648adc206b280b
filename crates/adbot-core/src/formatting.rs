//! HTML rendering for posts, previews and notices (Telegram HTML parse mode).

use crate::domain::{OfferId, UserId, UserProfile};

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Cut to `max_chars` characters, appending `...` when something was dropped.
pub fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out = s.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}

/// Published form of a submission.
pub fn render_post(text: &str, profile: &UserProfile) -> String {
    let mut out = format!(
        "🛠 <b>Service</b>\n\n{}\n\n👤 {}",
        escape_html(text),
        escape_html(&profile.display_name())
    );
    if let Some(username) = profile.username.as_deref().filter(|u| !u.is_empty()) {
        out.push_str(&format!(" (@{})", escape_html(username)));
    }
    out
}

pub fn render_preview(text: &str, photo_count: usize) -> String {
    let rule = "━━━━━━━━━━━━━━━";
    let mut out = format!("📋 <b>Post preview:</b>\n\n{rule}\n");
    if !text.is_empty() {
        out.push_str(&escape_html(text));
        out.push('\n');
    }
    out.push_str(rule);
    out.push_str("\n\n");
    if photo_count > 0 {
        out.push_str(&format!("📷 Photos: {photo_count}\n\n"));
    }
    out.push_str("Confirm publication or upload again.");
    out
}

/// Inline mention that notifies the user even without a username.
pub fn mention(user_id: UserId, name: &str) -> String {
    let name = if name.trim().is_empty() { "user" } else { name };
    format!(
        r#"<a href="tg://user?id={}">{}</a>"#,
        user_id.0,
        escape_html(name)
    )
}

/// `50000` minor units of RUB → `500 ₽`; other currencies keep their code.
pub fn format_price(amount: i64, currency: &str) -> String {
    let major = amount / 100;
    let minor = (amount % 100).abs();
    let symbol = match currency {
        "RUB" => "₽",
        "USD" => "$",
        "EUR" => "€",
        other => other,
    };
    if minor == 0 {
        format!("{major} {symbol}")
    } else {
        format!("{major}.{minor:02} {symbol}")
    }
}

pub fn deep_link(bot_username: &str, offer_id: OfferId) -> String {
    format!("https://t.me/{bot_username}?start=pay_{}", offer_id.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(first: &str, last: Option<&str>, username: Option<&str>) -> UserProfile {
        UserProfile {
            username: username.map(str::to_string),
            first_name: Some(first.to_string()),
            last_name: last.map(str::to_string),
        }
    }

    #[test]
    fn escapes_html() {
        assert_eq!(escape_html("<b>&\"x\""), "&lt;b&gt;&amp;&quot;x&quot;");
    }

    #[test]
    fn post_has_header_body_and_author() {
        let html = render_post("Lawn mowing, call me", &profile("Ann", Some("Lee"), Some("ann")));
        assert_eq!(
            html,
            "🛠 <b>Service</b>\n\nLawn mowing, call me\n\n👤 Ann Lee (@ann)"
        );
    }

    #[test]
    fn post_escapes_user_text_and_skips_missing_username() {
        let html = render_post("<script>", &profile("Bob", None, None));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.ends_with("👤 Bob"));
    }

    #[test]
    fn preview_mentions_photo_count_only_with_photos() {
        assert!(render_preview("hi", 3).contains("Photos: 3"));
        assert!(!render_preview("hi", 0).contains("Photos"));
    }

    #[test]
    fn prices_and_links() {
        assert_eq!(format_price(50_000, "RUB"), "500 ₽");
        assert_eq!(format_price(1_999, "USD"), "19.99 $");
        assert_eq!(
            deep_link("ads_bot", OfferId(4)),
            "https://t.me/ads_bot?start=pay_4"
        );
    }

    #[test]
    fn truncation_counts_chars() {
        assert_eq!(truncate_text("привет", 10), "привет");
        assert_eq!(truncate_text("привет", 3), "при...");
    }
}
