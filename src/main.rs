//! Application entry point: configuration, storage setup and the dispatcher

use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::Connection;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use menubot::auth::Role;
use menubot::bot::{self, BotConfig};
use menubot::db::{self, Db};
use menubot::dialogue::FlowState;
use menubot::invites::InviteTokenService;
use menubot::kv::ExpiringStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let token =
        std::env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN must be set")?;
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "menubot.db".to_string());

    let conn = Connection::open(&database_url)
        .with_context(|| format!("Failed to open database at {database_url}"))?;
    db::init_database_schema(&conn).context("Failed to initialize database schema")?;

    // Superadmins are provisioned from the environment, never invited
    if let Ok(superadmin_tg_id) = std::env::var("SUPERADMIN_TG_ID") {
        if db::create_user_if_absent(
            &conn,
            "Super",
            "Admin",
            None,
            &superadmin_tg_id,
            Role::Superadmin,
            None,
        )?
        .is_some()
        {
            info!("Bootstrapped superadmin account");
        }
    }

    let db: Db = Arc::new(tokio::sync::Mutex::new(conn));
    let invites = Arc::new(InviteTokenService::new(ExpiringStore::new(db.clone())));

    let tech_group = match std::env::var("TECH_GROUP_ID") {
        Ok(raw) => match raw.parse::<i64>() {
            Ok(id) => Some(ChatId(id)),
            Err(_) => {
                warn!("TECH_GROUP_ID is not a valid chat id, dish cards will not be published");
                None
            }
        },
        Err(_) => None,
    };
    let cfg = BotConfig { tech_group };

    let bot = Bot::new(token);
    info!("Starting menubot...");

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .enter_dialogue::<Message, InMemStorage<FlowState>, FlowState>()
                .endpoint(bot::message_handler),
        )
        .branch(
            Update::filter_callback_query()
                .enter_dialogue::<CallbackQuery, InMemStorage<FlowState>, FlowState>()
                .endpoint(bot::callback_handler),
        );

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![
            InMemStorage::<FlowState>::new(),
            db,
            invites,
            cfg
        ])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
