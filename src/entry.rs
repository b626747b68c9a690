use std::{fs, sync::Arc};
use teloxide::{dptree::deps, prelude::*};

use crate::{database::Database, handlers};

/// # Panics
///
/// Panics if there's no key file, or if startup init fails.
pub async fn entry() {
    log::info!("ASYNC WOOOO");
    let key = fs::read_to_string(match cfg!(debug_assertions) {
        true => "key_debug",
        false => "key",
    })
    .expect("Could not load bot key file!");

    let bot = Bot::new(key);

    bot.set_my_commands(handlers::generate_bot_commands())
        .await
        .expect("Failed to set bot commands!");

    let database = Arc::new(Database::new().await.expect("Failed to create database!"));

    log::info!("Creating the handler...");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handlers::handle_message))
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback_query));

    log::info!("Dispatching the dispatcher!");

    Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .dependencies(deps![database])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    log::info!("it appears we have been bonked.");
}
