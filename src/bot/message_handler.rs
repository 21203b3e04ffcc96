//! Message handler module for routing incoming text and media messages
//!
//! Every update is processed under the caller's single-flight gate, then
//! routed by the caller's current flow state. Payload kind checks live in
//! the individual flow handlers so a wrong payload re-prompts in place.

use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use tracing::{error, info};

use crate::auth::{self, Role};
use crate::db::{self, Db, User};
use crate::dialogue::{BotDialogue, FlowState};
use crate::errors::FlowError;
use crate::invites::InviteTokenService;
use crate::media;

use super::dialogue_manager::{self, caller_tg_id};
use super::ui_builder;
use super::{BotConfig, CALLER_GATE};

pub async fn message_handler(
    bot: Bot,
    msg: Message,
    dialogue: BotDialogue,
    db: Db,
    invites: Arc<InviteTokenService>,
    cfg: BotConfig,
) -> Result<()> {
    let caller_id = msg
        .from
        .as_ref()
        .map(|u| u.id.0 as i64)
        .unwrap_or(msg.chat.id.0);

    // One update at a time per caller; the dialogue read below must not
    // interleave with another update's write
    let gate = CALLER_GATE.acquire(caller_id);
    let _guard = gate.lock().await;

    if let Err(e) = route_message(&bot, &msg, dialogue, db, invites, &cfg).await {
        error!(user_id = caller_id, error = %e, "Message handling failed");
        bot.send_message(msg.chat.id, FlowError::from(e).user_message())
            .await?;
    }

    Ok(())
}

async fn route_message(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    db: Db,
    invites: Arc<InviteTokenService>,
    cfg: &BotConfig,
) -> Result<()> {
    let tg_id = caller_tg_id(msg);
    let user = {
        let conn = db.lock().await;
        auth::resolve_caller(&conn, &tg_id)?
    };

    if let Some(token) = msg.text().and_then(start_token) {
        return handle_start(bot, msg, dialogue, invites, user.as_ref(), token).await;
    }

    let state = dialogue
        .get()
        .await
        .context("Failed to read dialogue state")?
        .unwrap_or_default();

    match state {
        FlowState::Idle => {
            let Some(text) = msg.text() else {
                bot.send_message(msg.chat.id, "Please pick an action with the buttons.")
                    .await?;
                return Ok(());
            };
            handle_idle_text(bot, msg, dialogue, db, invites, user.as_ref(), text).await
        }

        FlowState::RegisterFirstName {
            token,
            restaurant_id,
            role,
        } => {
            let Some(text) = msg.text() else {
                bot.send_message(msg.chat.id, "Please enter your first name as text.")
                    .await?;
                return Ok(());
            };
            dialogue_manager::handle_register_first_name(
                bot,
                msg,
                dialogue,
                text,
                token,
                restaurant_id,
                role,
            )
            .await
        }

        FlowState::RegisterLastName {
            token, first_name, ..
        } => {
            let Some(text) = msg.text() else {
                bot.send_message(msg.chat.id, "Please enter your last name as text.")
                    .await?;
                return Ok(());
            };
            dialogue_manager::handle_register_last_name(
                bot, msg, dialogue, db, &invites, text, token, first_name,
            )
            .await
        }

        FlowState::RestaurantName => {
            let Some(text) = msg.text() else {
                bot.send_message(msg.chat.id, "Please enter the restaurant name as text.")
                    .await?;
                return Ok(());
            };
            dialogue_manager::handle_restaurant_name(bot, msg, dialogue, db, user.as_ref(), text)
                .await
        }

        FlowState::AdminInviteRestaurantId => {
            let Some(text) = msg.text() else {
                bot.send_message(msg.chat.id, "Please enter the restaurant id as text.")
                    .await?;
                return Ok(());
            };
            dialogue_manager::handle_admin_invite_restaurant_id(
                bot,
                msg,
                dialogue,
                db,
                &invites,
                user.as_ref(),
                text,
            )
            .await
        }

        FlowState::CategoryName => {
            let Some(text) = msg.text() else {
                bot.send_message(msg.chat.id, "Please enter the category name as text.")
                    .await?;
                return Ok(());
            };
            dialogue_manager::handle_category_name(bot, msg, dialogue, db, user.as_ref(), text)
                .await
        }

        FlowState::CategoryRename { category_id } => {
            let Some(text) = msg.text() else {
                bot.send_message(msg.chat.id, "Please enter the new name as text.")
                    .await?;
                return Ok(());
            };
            dialogue_manager::handle_category_rename(
                bot,
                msg,
                dialogue,
                db,
                user.as_ref(),
                category_id,
                text,
            )
            .await
        }

        FlowState::DishName { edit_id } => {
            let Some(text) = msg.text() else {
                bot.send_message(msg.chat.id, "Please enter the dish name as text.")
                    .await?;
                return Ok(());
            };
            dialogue_manager::handle_dish_name(bot, msg, dialogue, db, user.as_ref(), edit_id, text)
                .await
        }

        FlowState::DishCategory { .. } => {
            // Category choice arrives as a callback; text here is a misstep
            bot.send_message(msg.chat.id, "Please pick a category with the buttons.")
                .await?;
            Ok(())
        }

        FlowState::DishComposition { draft } => {
            let Some(text) = msg.text() else {
                bot.send_message(msg.chat.id, "Please list the ingredients as text.")
                    .await?;
                return Ok(());
            };
            dialogue_manager::handle_dish_composition(bot, msg, dialogue, user.as_ref(), draft, text)
                .await
        }

        FlowState::DishDescription { draft } => {
            let Some(text) = msg.text() else {
                bot.send_message(msg.chat.id, "Please enter the description as text.")
                    .await?;
                return Ok(());
            };
            dialogue_manager::handle_dish_description(bot, msg, dialogue, user.as_ref(), draft, text)
                .await
        }

        FlowState::DishIngredientsPhoto { draft } => {
            dialogue_manager::handle_ingredients_photo(bot, msg, dialogue, user.as_ref(), draft)
                .await
        }

        FlowState::DishReadyPhoto { draft } => {
            dialogue_manager::handle_ready_photo(bot, msg, dialogue, user.as_ref(), draft).await
        }

        FlowState::DishAudio { draft } => {
            dialogue_manager::handle_dish_audio(bot, msg, dialogue, db, cfg, user.as_ref(), draft)
                .await
        }

        FlowState::DishVideo { draft } => {
            dialogue_manager::handle_dish_video(bot, msg, dialogue, db, user.as_ref(), draft).await
        }

        FlowState::BrowseChoice => {
            let Some(text) = msg.text() else {
                bot.send_message(msg.chat.id, "Please pick an action with the buttons.")
                    .await?;
                return Ok(());
            };
            dialogue_manager::handle_browse_choice(bot, msg, dialogue, db, user.as_ref(), text)
                .await
        }

        FlowState::BrowseCategories
        | FlowState::BrowseDishes { .. }
        | FlowState::ViewDish { .. } => {
            bot.send_message(msg.chat.id, "Please use the buttons under the menu.")
                .await?;
            Ok(())
        }
    }
}

/// Extract the argument of a `/start` command. `None` for non-commands and
/// for commands that merely share the prefix (`/starting`).
fn start_token(text: &str) -> Option<&str> {
    let rest = text.trim().strip_prefix("/start")?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// `/start`, with or without an invitation token argument
async fn handle_start(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    invites: Arc<InviteTokenService>,
    user: Option<&User>,
    token: &str,
) -> Result<()> {
    // /start abandons whatever flow was active; a wizard interrupted here
    // must not leave its captured temp files behind
    if let Some(state) = dialogue.get().await? {
        if let Some(draft) = state.draft() {
            media::cleanup_draft_media(draft);
        }
    }

    if !token.is_empty() {
        if user.is_some() {
            bot.send_message(msg.chat.id, FlowError::AlreadyRegistered.user_message())
                .await?;
            dialogue.exit().await?;
            return Ok(());
        }

        let Some(invite) = invites.resolve(token).await? else {
            info!(user_id = %msg.chat.id, "Rejected invalid or expired invitation token");
            bot.send_message(msg.chat.id, FlowError::TokenInvalid.user_message())
                .await?;
            return Ok(());
        };

        bot.send_message(msg.chat.id, "Welcome! Enter your first name:")
            .await?;
        dialogue
            .update(FlowState::RegisterFirstName {
                token: token.to_string(),
                restaurant_id: invite.restaurant_id,
                role: invite.role,
            })
            .await?;
        return Ok(());
    }

    match user.map(|u| u.role) {
        Some(Role::Superadmin) => {
            bot.send_message(msg.chat.id, "Hello! Pick an action:")
                .reply_markup(ui_builder::superadmin_home_keyboard())
                .await?;
            dialogue.exit().await?;
        }
        Some(Role::Admin) => {
            bot.send_message(msg.chat.id, "Hello! Pick an action:")
                .reply_markup(ui_builder::admin_home_keyboard())
                .await?;
            dialogue.exit().await?;
        }
        Some(Role::Waiter) => {
            bot.send_message(msg.chat.id, "Hello! Pick an action:")
                .reply_markup(ui_builder::waiter_home_keyboard())
                .await?;
            dialogue.update(FlowState::BrowseChoice).await?;
        }
        None => {
            bot.send_message(
                msg.chat.id,
                "This bot is invitation-only. Ask your restaurant for an invitation link.",
            )
            .await?;
        }
    }

    Ok(())
}

/// Role-menu buttons pressed outside any flow
async fn handle_idle_text(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    db: Db,
    invites: Arc<InviteTokenService>,
    user: Option<&User>,
    text: &str,
) -> Result<()> {
    match user.map(|u| u.role) {
        Some(Role::Superadmin) => match text {
            ui_builder::BTN_CREATE_RESTAURANT => {
                bot.send_message(msg.chat.id, "Enter the restaurant name:")
                    .await?;
                dialogue.update(FlowState::RestaurantName).await?;
            }
            ui_builder::BTN_MAKE_ADMIN => {
                bot.send_message(msg.chat.id, "Enter the restaurant id for the new admin:")
                    .await?;
                dialogue.update(FlowState::AdminInviteRestaurantId).await?;
            }
            _ => {
                bot.send_message(msg.chat.id, "Please pick an action with the buttons.")
                    .reply_markup(ui_builder::superadmin_home_keyboard())
                    .await?;
            }
        },

        Some(Role::Admin) => {
            let Some(restaurant_id) = user.and_then(|u| u.restaurant_id) else {
                bot.send_message(msg.chat.id, FlowError::Unauthorized.user_message())
                    .await?;
                return Ok(());
            };
            match text {
                ui_builder::BTN_DISHES => {
                    let dishes = {
                        let conn = db.lock().await;
                        db::get_dishes_by_restaurant(&conn, restaurant_id)?
                    };
                    bot.send_message(msg.chat.id, "Dishes:")
                        .reply_markup(ui_builder::admin_dishes_keyboard(&dishes))
                        .await?;
                }
                ui_builder::BTN_CATEGORIES => {
                    let categories = {
                        let conn = db.lock().await;
                        db::get_categories_by_restaurant(&conn, restaurant_id)?
                    };
                    bot.send_message(msg.chat.id, "Categories:")
                        .reply_markup(ui_builder::admin_categories_keyboard(&categories))
                        .await?;
                }
                ui_builder::BTN_INVITE_WAITER => {
                    dialogue_manager::send_invite_link(
                        bot,
                        msg.chat.id,
                        &invites,
                        restaurant_id,
                        Role::Waiter,
                    )
                    .await?;
                }
                ui_builder::BTN_STAFF => {
                    let waiters = {
                        let conn = db.lock().await;
                        db::get_waiters_by_restaurant(&conn, restaurant_id)?
                    };
                    if waiters.is_empty() {
                        bot.send_message(msg.chat.id, "No waiters yet.").await?;
                    }
                    for waiter in &waiters {
                        bot.send_message(msg.chat.id, ui_builder::staff_row_text(waiter))
                            .reply_markup(ui_builder::staff_row_keyboard(waiter.id))
                            .await?;
                    }
                }
                _ => {
                    bot.send_message(msg.chat.id, "Please pick an action with the buttons.")
                        .reply_markup(ui_builder::admin_home_keyboard())
                        .await?;
                }
            }
        }

        // A waiter outside any flow is treated as being at the home choice
        Some(Role::Waiter) => {
            dialogue_manager::handle_browse_choice(bot, msg, dialogue, db, user, text).await?;
        }

        None => {
            bot.send_message(
                msg.chat.id,
                "This bot is invitation-only. Ask your restaurant for an invitation link.",
            )
            .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::DishDraft;

    #[test]
    fn test_start_token_extraction() {
        assert_eq!(start_token("/start"), Some(""));
        assert_eq!(start_token("/start  "), Some(""));
        assert_eq!(start_token("/start aBc123"), Some("aBc123"));
        assert_eq!(start_token("  /start aBc123  "), Some("aBc123"));

        // Commands that merely share the prefix are not /start
        assert_eq!(start_token("/starting"), None);
        assert_eq!(start_token("/startxyz token"), None);
        assert_eq!(start_token("start token"), None);
    }

    #[test]
    fn test_interrupted_wizard_leaves_no_media_behind() {
        // The same cleanup handle_start runs when a wizard is abandoned
        let photo = tempfile::NamedTempFile::new().unwrap();
        let photo_path = photo.into_temp_path().keep().unwrap();

        let state = FlowState::DishReadyPhoto {
            draft: DishDraft {
                name: "Soup".to_string(),
                ingredients_photo_path: Some(photo_path.to_string_lossy().to_string()),
                ..Default::default()
            },
        };

        assert!(photo_path.exists());
        if let Some(draft) = state.draft() {
            media::cleanup_draft_media(draft);
        }
        assert!(!photo_path.exists());
    }
}
