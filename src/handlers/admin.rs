//! The premium grant flow: a tiny per-admin state machine that
//! collects a target identifier, then a duration, then applies the
//! entitlement. Only ever driven by [`ADMIN_ID`](crate::ADMIN_ID).

use chrono::Utc;
use teloxide::{prelude::*, types::UserId, RequestError};

use crate::{
    database::Database,
    types::{AdminState, DurationPolicy, TargetIdentifier},
    ADMIN_ID,
};

/// Put the FSM into `AwaitingIdentifier` and prompt.
pub async fn start_grant_flow(bot: &Bot, database: &Database) -> Result<(), RequestError> {
    database
        .set_admin_state(ADMIN_ID, AdminState::AwaitingIdentifier)
        .await
        .expect("Database died!");
    bot.send_message(
        ADMIN_ID,
        "✏️ Who gets premium? Send their @username or numeric user id.",
    )
    .await?;
    Ok(())
}

/// Feed one admin text message to the FSM.
/// Returns `true` if the text was consumed by the grant flow.
pub async fn handle_grant_input(
    bot: &Bot,
    text: &str,
    database: &Database,
) -> Result<bool, RequestError> {
    let token = database
        .get_admin_state_token(ADMIN_ID)
        .await
        .expect("Database died!");

    let state = match AdminState::from_db(token.as_deref()) {
        Ok(state) => state,
        Err(bad_token) => {
            // Shouldn't be possible to write such a token anymore, but
            // rows from before the typed encoding may still hold one.
            log::error!("Unparseable admin state token: {:?}", bad_token);
            database
                .set_admin_state(ADMIN_ID, AdminState::Idle)
                .await
                .expect("Database died!");
            bot.send_message(ADMIN_ID, "❌ Internal grant state was corrupt. Starting over.")
                .await?;
            return Ok(true);
        }
    };

    match state {
        AdminState::Idle => Ok(false),
        AdminState::AwaitingIdentifier => {
            receive_identifier(bot, text, database).await?;
            Ok(true)
        }
        AdminState::AwaitingDuration(target) => {
            receive_duration(bot, text, target, database).await?;
            Ok(true)
        }
    }
}

async fn receive_identifier(
    bot: &Bot,
    text: &str,
    database: &Database,
) -> Result<(), RequestError> {
    let target = match TargetIdentifier::parse(text) {
        Some(TargetIdentifier::Username(name)) => database
            .find_user_by_username(&name)
            .await
            .expect("Database died!"),
        Some(TargetIdentifier::Id(id)) => database
            .user_exists(id)
            .await
            .expect("Database died!")
            .then_some(id),
        None => None,
    };

    let Some(target) = target else {
        // State stays at AwaitingIdentifier so the admin can retry.
        bot.send_message(
            ADMIN_ID,
            "❌ No such user in the database. Make sure they have pressed /start.",
        )
        .await?;
        return Ok(());
    };

    database
        .set_admin_state(ADMIN_ID, AdminState::AwaitingDuration(target))
        .await
        .expect("Database died!");
    bot.send_message(
        ADMIN_ID,
        "⏳ Now the duration: 3 days / 7 days / 1 month / forever.",
    )
    .await?;
    Ok(())
}

async fn receive_duration(
    bot: &Bot,
    text: &str,
    target: UserId,
    database: &Database,
) -> Result<(), RequestError> {
    let Some(policy) = DurationPolicy::parse(text) else {
        // Invalid duration leaves the flow exactly where it was.
        bot.send_message(
            ADMIN_ID,
            "❌ Can't parse that duration. Try \"3 days\", \"7 days\", \"1 month\" or \"forever\".",
        )
        .await?;
        return Ok(());
    };

    database
        .set_admin_state(ADMIN_ID, AdminState::Idle)
        .await
        .expect("Database died!");
    grant(bot, target, policy, database).await
}

/// Apply the grant and notify both sides.
/// Shared by the FSM and the /premium shortcut.
pub async fn grant(
    bot: &Bot,
    target: UserId,
    policy: DurationPolicy,
    database: &Database,
) -> Result<(), RequestError> {
    let until = policy.until(Utc::now().timestamp());
    database
        .set_premium_until(target, until)
        .await
        .expect("Database died!");

    bot.send_message(
        ADMIN_ID,
        format!("✅ Premium granted to {} for {}.", target, policy.label()),
    )
    .await?;

    // The target may have blocked the bot. The grant stands either way.
    if let Err(e) = bot
        .send_message(
            target,
            format!(
                "⭐ You have been granted premium for {}!\n\
                 You can now see who your messages are from.",
                policy.label()
            ),
        )
        .await
    {
        log::warn!("Failed to notify {} about their premium: {}", target, e);
    }

    Ok(())
}

/// The `/premium <user_id> <duration>` shortcut, bypassing the FSM.
pub async fn handle_premium_command(
    bot: &Bot,
    sender: UserId,
    params: &str,
    database: &Database,
) -> Result<(), RequestError> {
    if sender != ADMIN_ID {
        bot.send_message(sender, "This command is for the administrator only.")
            .await?;
        return Ok(());
    }

    let mut parts = params.split_whitespace();
    let (Some(id), Some(period)) = (parts.next(), parts.next()) else {
        bot.send_message(ADMIN_ID, "Usage: /premium <user_id> <3d|7d|1m|forever>")
            .await?;
        return Ok(());
    };

    let Ok(target) = id.parse().map(UserId) else {
        bot.send_message(ADMIN_ID, "The first argument must be a numeric user id.")
            .await?;
        return Ok(());
    };

    let Some(policy) = DurationPolicy::parse(period) else {
        bot.send_message(ADMIN_ID, "Bad duration. Try 3d, 7d, 1m or forever.")
            .await?;
        return Ok(());
    };

    grant(bot, target, policy, database).await
}
