/// The admin's premium grant flow.
pub mod admin;

use std::sync::Arc;

use teloxide::{
    payloads::{AnswerCallbackQuerySetters, SendMessageSetters},
    prelude::*,
    types::{
        BotCommand, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup,
        Me, ParseMode, User, UserId,
    },
    RequestError,
};

use crate::{
    database::Database,
    misc::{
        compose_relay_text, entry_link, parse_ref_token, parse_reply_payload,
        reply_callback_payload, resolve_target, sender_display_name,
    },
    ADMIN_ID,
};

// Main menu button labels.
const MENU_PROFILE: &str = "👤 Profile";
const MENU_PREMIUM: &str = "⭐ Premium";
const MENU_HOW: &str = "ℹ️ How it works";
const MENU_GRANT: &str = "👑 Grant premium";

pub fn generate_bot_commands() -> Vec<BotCommand> {
    vec![
        BotCommand::new("start", "Register and show your entry link."),
        BotCommand::new("stop", "Stop the current conversation."),
    ]
}

fn main_menu(user_id: UserId) -> KeyboardMarkup {
    let mut rows = vec![
        vec![
            KeyboardButton::new(MENU_PROFILE),
            KeyboardButton::new(MENU_PREMIUM),
        ],
        vec![KeyboardButton::new(MENU_HOW)],
    ];
    if user_id == ADMIN_ID {
        rows.push(vec![KeyboardButton::new(MENU_GRANT)]);
    }
    KeyboardMarkup::new(rows).resize_keyboard()
}

pub async fn handle_message(
    bot: Bot,
    me: Me,
    message: Message,
    database: Arc<Database>,
) -> Result<(), RequestError> {
    // This bot only ever talks in DMs.
    if !message.chat.is_private() {
        return Ok(());
    }
    let Some(user) = message.from() else {
        return Ok(());
    };
    if user.id == me.id {
        return Ok(());
    }
    // Only text can be relayed anonymously.
    let Some(text) = message.text() else {
        return Ok(());
    };

    // Refresh the username so lookups by @name keep working.
    database
        .update_username(user.id, user.username.as_deref())
        .await
        .expect("Database died!");

    if handle_command(&bot, &me, user, text, &database).await? {
        return Ok(());
    }

    if user.id == ADMIN_ID {
        if text == MENU_GRANT {
            // (Re)starting the flow from the menu overwrites whatever
            // state an abandoned session left behind.
            admin::start_grant_flow(&bot, &database).await?;
            return Ok(());
        }
        // Mid-flow input belongs to the grant FSM, not the relay.
        if admin::handle_grant_input(&bot, text, &database).await? {
            return Ok(());
        }
    }

    match text {
        MENU_PROFILE => send_profile(&bot, &me, user, &database).await?,
        MENU_PREMIUM => send_premium_info(&bot, user).await?,
        MENU_HOW => send_how_it_works(&bot, user).await?,
        _ => relay_message(&bot, user, text, &database).await?,
    }

    Ok(())
}

/// Returns `true` if a command was parsed and responded to.
async fn handle_command(
    bot: &Bot,
    me: &Me,
    user: &User,
    text: &str,
    database: &Database,
) -> Result<bool, RequestError> {
    // Check if it starts with "/", like how a command should.
    if !text.starts_with('/') {
        return Ok(false);
    }
    // Get first word in the message, the command itself.
    let Some(command) = text.split_whitespace().next() else {
        return Ok(false);
    };

    let command_full_len = command.len();

    // Trim the bot's username from the command and convert to lowercase.
    let username = format!("@{}", me.username());
    let command = command.trim_end_matches(username.as_str()).to_lowercase();
    let params = text[command_full_len..].trim_start();

    match command.as_str() {
        "/start" => handle_start(bot, me, user, params, database).await?,
        "/stop" => handle_stop(bot, user, database).await?,
        "/premium" => admin::handle_premium_command(bot, user.id, params, database).await?,
        _ => return Ok(false),
    }

    Ok(true)
}

async fn handle_start(
    bot: &Bot,
    me: &Me,
    user: &User,
    params: &str,
    database: &Database,
) -> Result<(), RequestError> {
    let new = database
        .see_user(user.id, user.username.as_deref())
        .await
        .expect("Database died!");

    if new {
        // Heads-up for the admin. Their DM may be unreachable, and
        // that shouldn't break anyone's /start.
        let mut note = format!("🚀 New user: {}", user.id);
        if let Some(username) = &user.username {
            note.push_str(&format!(" (@{})", username));
        }
        if let Err(e) = bot.send_message(ADMIN_ID, note).await {
            log::warn!("Failed to notify the admin about a new user: {}", e);
        }
    }

    // A ?start=ref<id> payload seeds the referral pointer.
    // Malformed or self-referring tokens are silently ignored.
    let mut ref_set = false;
    if let Some(target) = parse_ref_token(params) {
        ref_set = database
            .set_ref(user.id, target)
            .await
            .expect("Database died!");
    }

    let link = entry_link(me.username(), user.id);
    let text = format!(
        concat!(
            "👋 <b>Welcome to the anonymous chat!</b>\n\n",
            "📩 People can write to you here <b>anonymously</b>.\n",
            "🔗 Put your entry link in your profile, and anyone who opens it ",
            "can message you.\n\n",
            "<b>Your link:</b>\n<code>{}</code>\n\n",
            "Use the menu below."
        ),
        link
    );
    bot.send_message(user.id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(main_menu(user.id))
        .await?;

    if ref_set {
        bot.send_message(
            user.id,
            "✅ You arrived via someone's link. Write a message below and \
             it will be delivered anonymously!",
        )
        .await?;
    }

    Ok(())
}

async fn handle_stop(bot: &Bot, user: &User, database: &Database) -> Result<(), RequestError> {
    database
        .clear_last_reply_to(user.id)
        .await
        .expect("Database died!");
    bot.send_message(
        user.id,
        concat!(
            "🛑 <b>Conversation stopped.</b>\n",
            "You are no longer talking to that person.\n",
            "To answer them again, press \"Reply\" under one of their messages."
        ),
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(main_menu(user.id))
    .await?;
    Ok(())
}

/// Relay `text` from `sender` to whoever their messages currently
/// resolve to, with identity disclosure gated on the addressee's
/// premium status.
async fn relay_message(
    bot: &Bot,
    sender: &User,
    text: &str,
    database: &Database,
) -> Result<(), RequestError> {
    let reply_to = database
        .get_last_reply_to(sender.id)
        .await
        .expect("Database died!");
    let referral = database.get_ref(sender.id).await.expect("Database died!");

    let Some(target) = resolve_target(reply_to, referral) else {
        bot.send_message(
            sender.id,
            "❗ To write to someone, open their entry link first.",
        )
        .await?;
        return Ok(());
    };

    let premium = database.is_premium(target).await.expect("Database died!");
    let out_text = compose_relay_text(&sender_display_name(sender), premium, text);

    let keyboard = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "Reply",
        reply_callback_payload(sender.id),
    )]]);

    match bot
        .send_message(target, out_text)
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard)
        .await
    {
        Ok(_) => {
            bot.send_message(sender.id, "✅ Your message has been sent.")
                .reply_markup(main_menu(sender.id))
                .await?;
        }
        Err(e) => {
            // Blocked the bot, deactivated the account, whatever.
            // Report it back; no retries.
            log::warn!("Failed to deliver a relay to {}: {}", target, e);
            bot.send_message(
                sender.id,
                "❌ Could not deliver the message. The recipient is unreachable.",
            )
            .await?;
        }
    }

    Ok(())
}

async fn send_profile(
    bot: &Bot,
    me: &Me,
    user: &User,
    database: &Database,
) -> Result<(), RequestError> {
    let status = database
        .premium_status(user.id)
        .await
        .expect("Database died!");
    let link = entry_link(me.username(), user.id);
    let text = format!(
        concat!(
            "<b>Profile</b>\n\n",
            "Your status: {}\n\n",
            "Your entry link:\n<code>{}</code>\n\n",
            "Put this link in your profile to receive anonymous messages."
        ),
        status, link
    );
    bot.send_message(user.id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(main_menu(user.id))
        .await?;
    Ok(())
}

async fn send_premium_info(bot: &Bot, user: &User) -> Result<(), RequestError> {
    let keyboard = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "Show an example",
        "show_example",
    )]]);
    bot.send_message(
        user.id,
        concat!(
            "⭐ <b>Premium</b>\n\n",
            "You will see <b>who</b> wrote each message.\n",
            "Senders won't know that you have premium.\n\n",
            "3 days / 7 days / 1 month / forever.\n",
            "Ask the administrator for details."
        ),
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(keyboard)
    .await?;
    Ok(())
}

async fn send_how_it_works(bot: &Bot, user: &User) -> Result<(), RequestError> {
    bot.send_message(
        user.id,
        concat!(
            "ℹ️ <b>How it works</b>\n\n",
            "1️⃣ You share your entry link\n",
            "2️⃣ Someone opens it and writes to you anonymously\n",
            "3️⃣ A \"Reply\" button under the message lets you answer\n",
            "4️⃣ /stop ends the current conversation\n\n",
            "⭐ With premium you see who each message is from"
        ),
    )
    .parse_mode(ParseMode::Html)
    .await?;
    Ok(())
}

pub async fn handle_callback_query(
    bot: Bot,
    query: CallbackQuery,
    database: Arc<Database>,
) -> Result<(), RequestError> {
    macro_rules! goodbye {
        ($text:expr) => {
            bot.answer_callback_query(query.id).text($text).await?;
            return Ok(());
        };
        () => {
            bot.answer_callback_query(query.id).await?;
            return Ok(());
        };
    }

    let user_id = query.from.id;

    let Some(data) = query.data else {
        goodbye!();
    };

    if data == "show_example" {
        bot.send_message(
            user_id,
            "<b>Example:</b>\n<code>Message from @user: I like you!</code>",
        )
        .parse_mode(ParseMode::Html)
        .await?;
        goodbye!("Example shown.");
    }

    // Activating the reply affordance under a delivered message.
    if let Some(sender) = parse_reply_payload(&data) {
        database
            .set_last_reply_to(user_id, sender)
            .await
            .expect("Database died!");
        bot.send_message(
            user_id,
            "✏️ Write your reply. Send /stop to end the conversation.",
        )
        .reply_markup(main_menu(user_id))
        .await?;
        goodbye!("Write a message and it will be delivered anonymously.");
    }

    goodbye!("Unknown button.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// Validate that bot commands match requirements by Telegram's Bot API.
    /// See https://core.telegram.org/bots/api#botcommand
    fn validate_bot_commands() {
        let commands = generate_bot_commands();
        // "At most 100 commands can be specified"
        assert!(commands.len() <= 100);
        for command in commands {
            // "Text of the command; 1-32 characters."
            assert!(!command.command.is_empty());
            assert!(command.command.len() <= 32);
            // "Can contain only lowercase English letters, digits and underscores."
            for chr in command.command.chars() {
                assert!(chr.is_ascii_lowercase() || chr.is_ascii_digit() || chr == '_');
            }
            // "Description of the command; 1-256 characters."
            assert!(!command.description.is_empty());
            assert!(command.description.len() <= 256);
        }
    }
}
