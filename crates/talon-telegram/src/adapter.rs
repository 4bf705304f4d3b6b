//! Telegram channel adapter: wraps a teloxide `Bot` + `Dispatcher` and
//! drives the long-polling loop. No public URL required.

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::info;

use crate::app::App;
use crate::handler::handle_message;

pub struct TelegramAdapter {
    bot: Bot,
    app: Arc<App>,
}

impl TelegramAdapter {
    pub fn new(bot: Bot, app: Arc<App>) -> Self {
        Self { bot, app }
    }

    /// Connect and dispatch until the surrounding task is aborted.
    pub async fn run(self) {
        info!("starting Telegram long-polling dispatcher");
        let handler = Update::filter_message().endpoint(handle_message);
        Dispatcher::builder(self.bot, handler)
            .dependencies(dptree::deps![self.app])
            .default_handler(|_upd| async {})
            .build()
            .dispatch()
            .await;
    }
}
