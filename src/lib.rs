//! Source code for an anonymous relay bot on Telegram:
//! people message each other through the bot without learning who
//! the other side is, unless the recipient holds premium status.

/// Various types used throughout.
mod types;

/// Miscellaneous functions.
mod misc;

/// The database.
mod database;

/// Functions that handle events from Telegram.
mod handlers;

/// Entry function that starts the bot.
mod entry;
pub use entry::*;

use teloxide::types::UserId;

/// The single identity allowed to grant premium status.
///
/// FSM state is stored per-user in the database, so extending this
/// to a set of admins later only needs a change here and in routing.
pub static ADMIN_ID: UserId = UserId(8128381503);
