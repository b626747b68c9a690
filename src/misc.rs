use html_escape::encode_text;
use teloxide::types::{User, UserId};

/// Resolve who a relayed message goes to.
/// An active reply target always wins over the referral pointer.
pub fn resolve_target(reply_to: Option<UserId>, referral: Option<UserId>) -> Option<UserId> {
    reply_to.or(referral)
}

/// Name shown to a premium addressee: `@username`, else the first
/// name, else a synthesized `user<id>` label.
pub fn sender_display_name(user: &User) -> String {
    if let Some(username) = &user.username {
        format!("@{}", username)
    } else if !user.first_name.is_empty() {
        user.first_name.clone()
    } else {
        format!("user{}", user.id)
    }
}

/// Compose the HTML text delivered to the addressee, gated on their
/// premium status. User-controlled text never escapes the markup.
pub fn compose_relay_text(sender_name: &str, addressee_is_premium: bool, text: &str) -> String {
    if addressee_is_premium {
        format!(
            "<b>Message from {}:</b>\n{}",
            encode_text(sender_name),
            encode_text(text)
        )
    } else {
        format!("<b>Anonymous message:</b>\n{}", encode_text(text))
    }
}

/// Extract the target of a `ref<id>` entry-link payload.
/// Telegram sometimes glues the payload onto surrounding text, so the
/// token is searched for anywhere in it. Malformed payloads yield
/// `None` and are ignored by the caller.
pub fn parse_ref_token(payload: &str) -> Option<UserId> {
    let index = payload.find("ref")?;
    payload[index + 3..].trim().parse().ok().map(UserId)
}

/// Payload of the inline "Reply" button under a delivered message.
pub fn reply_callback_payload(sender: UserId) -> String {
    format!("reply_{}", sender)
}

pub fn parse_reply_payload(data: &str) -> Option<UserId> {
    data.strip_prefix("reply_")?.parse().ok().map(UserId)
}

/// The shareable entry link that seeds the referral pointer.
pub fn entry_link(bot_username: &str, user: UserId) -> String {
    format!("https://t.me/{}?start=ref{}", bot_username, user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_user(username: Option<&str>, first_name: &str) -> User {
        User {
            id: UserId(99),
            is_bot: false,
            first_name: first_name.to_string(),
            last_name: None,
            username: username.map(str::to_string),
            language_code: None,
            is_premium: false,
            added_to_attachment_menu: false,
        }
    }

    #[test]
    fn reply_target_wins_over_referral() {
        assert_eq!(
            resolve_target(Some(UserId(1)), Some(UserId(2))),
            Some(UserId(1))
        );
        assert_eq!(resolve_target(None, Some(UserId(2))), Some(UserId(2)));
        assert_eq!(resolve_target(Some(UserId(1)), None), Some(UserId(1)));
        assert_eq!(resolve_target(None, None), None);
    }

    #[test]
    fn display_name_fallbacks() {
        assert_eq!(
            sender_display_name(&dummy_user(Some("alice"), "Alice")),
            "@alice"
        );
        assert_eq!(sender_display_name(&dummy_user(None, "Alice")), "Alice");
        assert_eq!(sender_display_name(&dummy_user(None, "")), "user99");
    }

    #[test]
    fn disclosure_gating() {
        assert_eq!(
            compose_relay_text("@alice", true, "hi"),
            "<b>Message from @alice:</b>\nhi"
        );
        assert_eq!(
            compose_relay_text("@alice", false, "hi"),
            "<b>Anonymous message:</b>\nhi"
        );
        // User text must not break out of the HTML.
        assert_eq!(
            compose_relay_text("@alice", false, "<b>hi</b>"),
            "<b>Anonymous message:</b>\n&lt;b&gt;hi&lt;/b&gt;"
        );
    }

    #[test]
    fn ref_tokens() {
        assert_eq!(parse_ref_token("ref1234"), Some(UserId(1234)));
        assert_eq!(parse_ref_token("start=ref1234"), Some(UserId(1234)));
        assert_eq!(parse_ref_token("ref 1234"), Some(UserId(1234)));
        assert_eq!(parse_ref_token("refabc"), None);
        assert_eq!(parse_ref_token("1234"), None);
        assert_eq!(parse_ref_token(""), None);
    }

    #[test]
    fn reply_payloads() {
        assert_eq!(
            parse_reply_payload(&reply_callback_payload(UserId(77))),
            Some(UserId(77))
        );
        assert_eq!(parse_reply_payload("reply_"), None);
        assert_eq!(parse_reply_payload("show_example"), None);
    }

    #[test]
    fn entry_links() {
        assert_eq!(
            entry_link("some_bot", UserId(5)),
            "https://t.me/some_bot?start=ref5"
        );
    }
}
