//! Callback handler module for inline keyboard interactions
//!
//! Catalog browsing always sends a fresh card message instead of editing the
//! previous one, so a slow media upload can never race an edit of a message
//! that was already replaced.

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{FileId, InlineKeyboardMarkup, InputFile};
use tracing::{error, info};

use crate::auth::{self, Role};
use crate::db::{self, Db, Dish, User};
use crate::dialogue::{BotDialogue, FlowState};
use crate::errors::FlowError;
use crate::media;

use super::dialogue_manager::ensure_role;
use super::ui_builder;
use super::CALLER_GATE;

pub async fn callback_handler(
    bot: Bot,
    q: CallbackQuery,
    dialogue: BotDialogue,
    db: Db,
) -> Result<()> {
    let caller_id = q.from.id.0 as i64;
    let gate = CALLER_GATE.acquire(caller_id);
    let _guard = gate.lock().await;

    if let Err(e) = route_callback(&bot, &q, dialogue, db).await {
        error!(user_id = caller_id, error = %e, "Callback handling failed");
        if let Some(msg) = q.message.as_ref() {
            bot.send_message(msg.chat().id, FlowError::from(e).user_message())
                .await?;
        }
    }

    bot.answer_callback_query(q.id).await?;
    Ok(())
}

async fn route_callback(bot: &Bot, q: &CallbackQuery, dialogue: BotDialogue, db: Db) -> Result<()> {
    let (Some(data), Some(msg)) = (q.data.as_deref(), q.message.as_ref()) else {
        return Ok(());
    };
    let chat_id = msg.chat().id;

    let user = {
        let conn = db.lock().await;
        auth::resolve_caller(&conn, &q.from.id.to_string())?
    };
    let user = user.as_ref();

    // Waiter catalog browsing
    if let Some(id) = data.strip_prefix(ui_builder::CB_BROWSE_CATEGORY) {
        return browse_category(bot, chat_id, dialogue, db, user, id.parse()?).await;
    }
    if let Some(id) = data.strip_prefix(ui_builder::CB_BROWSE_DISH) {
        return browse_dish(bot, chat_id, dialogue, db, user, id.parse()?).await;
    }
    match data {
        ui_builder::CB_NAV_PREV => return browse_step(bot, chat_id, dialogue, db, user, -1).await,
        ui_builder::CB_NAV_NEXT => return browse_step(bot, chat_id, dialogue, db, user, 1).await,
        ui_builder::CB_MEDIA_TOGGLE => return media_toggle(bot, chat_id, dialogue, db, user).await,
        ui_builder::CB_BACK_DISHES => return back_to_dishes(bot, chat_id, dialogue, db, user).await,
        ui_builder::CB_BACK_CATEGORIES => {
            return back_to_categories(bot, chat_id, dialogue, db, user).await
        }
        _ => {}
    }

    // Everything below manages the catalog and requires the admin role
    if !ensure_role(bot, chat_id, &dialogue, user, &[Role::Admin]).await? {
        return Ok(());
    }
    let Some(restaurant_id) = user.and_then(|u| u.restaurant_id) else {
        return Ok(());
    };

    match data {
        ui_builder::CB_ADD_CATEGORY => {
            bot.send_message(chat_id, "Enter the category name:").await?;
            dialogue.update(FlowState::CategoryName).await?;
        }
        ui_builder::CB_ADD_DISH => {
            bot.send_message(chat_id, "Enter the dish name:").await?;
            dialogue
                .update(FlowState::DishName { edit_id: None })
                .await?;
        }
        ui_builder::CB_CANCEL_DISH => {
            if let Some(state) = dialogue.get().await? {
                if let Some(draft) = state.draft() {
                    media::cleanup_draft_media(draft);
                }
            }
            dialogue.exit().await?;
            bot.send_message(chat_id, "Dish creation cancelled.").await?;
        }

        _ => {
            if let Some(id) = data.strip_prefix(ui_builder::CB_EDIT_CATEGORY) {
                let category_id: i64 = id.parse()?;
                let known = {
                    let conn = db.lock().await;
                    db::get_category_scoped(&conn, category_id, restaurant_id)?
                };
                if known.is_none() {
                    bot.send_message(chat_id, FlowError::NotFound.user_message())
                        .await?;
                    return Ok(());
                }
                bot.send_message(chat_id, "Enter the new category name:").await?;
                dialogue
                    .update(FlowState::CategoryRename { category_id })
                    .await?;
            } else if let Some(id) = data.strip_prefix(ui_builder::CB_DEL_CATEGORY) {
                let deleted = {
                    let conn = db.lock().await;
                    db::delete_category_scoped(&conn, id.parse()?, restaurant_id)?
                };
                let reply = outcome_reply(deleted, "Category deleted, together with its dishes.");
                bot.send_message(chat_id, reply).await?;
            } else if let Some(id) = data.strip_prefix(ui_builder::CB_EDIT_DISH) {
                let dish_id: i64 = id.parse()?;
                let known = {
                    let conn = db.lock().await;
                    db::get_dish_scoped(&conn, dish_id, restaurant_id)?
                };
                if known.is_none() {
                    bot.send_message(chat_id, FlowError::NotFound.user_message())
                        .await?;
                    return Ok(());
                }
                bot.send_message(chat_id, "Enter the new dish name:").await?;
                dialogue
                    .update(FlowState::DishName {
                        edit_id: Some(dish_id),
                    })
                    .await?;
            } else if let Some(id) = data.strip_prefix(ui_builder::CB_DEL_DISH) {
                let deleted = {
                    let conn = db.lock().await;
                    db::delete_dish_scoped(&conn, id.parse()?, restaurant_id)?
                };
                bot.send_message(chat_id, outcome_reply(deleted, "Dish deleted."))
                    .await?;
            } else if let Some(id) = data.strip_prefix(ui_builder::CB_VIEW_DISH) {
                let dish = {
                    let conn = db.lock().await;
                    db::get_dish_scoped(&conn, id.parse()?, restaurant_id)?
                };
                match dish {
                    Some(dish) => send_dish_card(bot, chat_id, &dish, None).await?,
                    None => {
                        bot.send_message(chat_id, FlowError::NotFound.user_message())
                            .await?;
                    }
                }
            } else if let Some(id) = data.strip_prefix(ui_builder::CB_CHOOSE_CATEGORY) {
                choose_category(bot, chat_id, dialogue, db, restaurant_id, id.parse()?).await?;
            } else if let Some(id) = data.strip_prefix(ui_builder::CB_DEL_WAITER) {
                let removed = {
                    let conn = db.lock().await;
                    db::delete_waiter_scoped(&conn, id.parse()?, restaurant_id)?
                };
                bot.send_message(chat_id, outcome_reply(removed, "Waiter removed."))
                    .await?;
            } else {
                info!(data = %data, "Ignoring unknown callback tag");
            }
        }
    }

    Ok(())
}

/// Reply for a tenant-scoped write: the success text, or the uniform
/// not-found wording when the row was missing or owned by another restaurant
fn outcome_reply(affected: bool, done: &str) -> String {
    if affected {
        done.to_string()
    } else {
        FlowError::NotFound.user_message()
    }
}

/// Category picked inside the dish wizard
async fn choose_category(
    bot: &Bot,
    chat_id: ChatId,
    dialogue: BotDialogue,
    db: Db,
    restaurant_id: i64,
    category_id: i64,
) -> Result<()> {
    let Some(FlowState::DishCategory { mut draft }) = dialogue.get().await? else {
        bot.send_message(chat_id, "This choice is no longer active.")
            .await?;
        return Ok(());
    };

    let known = {
        let conn = db.lock().await;
        db::get_category_scoped(&conn, category_id, restaurant_id)?
    };
    if known.is_none() {
        bot.send_message(chat_id, FlowError::NotFound.user_message())
            .await?;
        return Ok(());
    }

    draft.category_id = Some(category_id);
    bot.send_message(chat_id, "List the ingredients, separated by commas:")
        .await?;
    dialogue.update(FlowState::DishComposition { draft }).await?;
    Ok(())
}

// ---- Waiter catalog browsing -------------------------------------------

async fn browse_category(
    bot: &Bot,
    chat_id: ChatId,
    dialogue: BotDialogue,
    db: Db,
    user: Option<&User>,
    category_id: i64,
) -> Result<()> {
    if !ensure_role(bot, chat_id, &dialogue, user, &[Role::Waiter]).await? {
        return Ok(());
    }
    let Some(restaurant_id) = user.and_then(|u| u.restaurant_id) else {
        return Ok(());
    };

    let dishes = {
        let conn = db.lock().await;
        db::get_dishes_by_category(&conn, category_id, restaurant_id)?
    };
    if dishes.is_empty() {
        bot.send_message(chat_id, "No dishes in this category yet.")
            .await?;
        return Ok(());
    }

    bot.send_message(chat_id, "Pick a dish:")
        .reply_markup(ui_builder::browse_dishes_keyboard(&dishes))
        .await?;
    dialogue
        .update(FlowState::BrowseDishes { category_id })
        .await?;
    Ok(())
}

async fn browse_dish(
    bot: &Bot,
    chat_id: ChatId,
    dialogue: BotDialogue,
    db: Db,
    user: Option<&User>,
    dish_id: i64,
) -> Result<()> {
    if !ensure_role(bot, chat_id, &dialogue, user, &[Role::Waiter]).await? {
        return Ok(());
    }
    let Some(restaurant_id) = user.and_then(|u| u.restaurant_id) else {
        return Ok(());
    };

    let Some(FlowState::BrowseDishes { category_id }) = dialogue.get().await? else {
        bot.send_message(chat_id, "This menu is no longer active. Send /start to reopen it.")
            .await?;
        return Ok(());
    };

    let dish = {
        let conn = db.lock().await;
        db::get_dish_scoped(&conn, dish_id, restaurant_id)?
    };
    let Some(dish) = dish else {
        bot.send_message(chat_id, FlowError::NotFound.user_message())
            .await?;
        return Ok(());
    };

    show_browsed_dish(bot, chat_id, dialogue, category_id, &dish).await
}

/// Wrap-around navigation over the dishes of the current category
async fn browse_step(
    bot: &Bot,
    chat_id: ChatId,
    dialogue: BotDialogue,
    db: Db,
    user: Option<&User>,
    step: i64,
) -> Result<()> {
    if !ensure_role(bot, chat_id, &dialogue, user, &[Role::Waiter]).await? {
        return Ok(());
    }
    let Some(restaurant_id) = user.and_then(|u| u.restaurant_id) else {
        return Ok(());
    };

    let Some(FlowState::ViewDish {
        category_id,
        dish_id,
        ..
    }) = dialogue.get().await?
    else {
        bot.send_message(chat_id, "This card is no longer active. Send /start to reopen the menu.")
            .await?;
        return Ok(());
    };

    let dishes = {
        let conn = db.lock().await;
        db::get_dishes_by_category(&conn, category_id, restaurant_id)?
    };
    if dishes.is_empty() {
        bot.send_message(chat_id, "No dishes in this category anymore.")
            .await?;
        dialogue.update(FlowState::BrowseCategories).await?;
        return Ok(());
    }

    // A deleted current dish degrades to starting from the first one
    let position = dishes.iter().position(|d| d.id == dish_id).unwrap_or(0) as i64;
    let count = dishes.len() as i64;
    let next = ((position + step).rem_euclid(count)) as usize;

    show_browsed_dish(bot, chat_id, dialogue, category_id, &dishes[next]).await
}

/// Toggle the current card between its photo and its video
async fn media_toggle(
    bot: &Bot,
    chat_id: ChatId,
    dialogue: BotDialogue,
    db: Db,
    user: Option<&User>,
) -> Result<()> {
    if !ensure_role(bot, chat_id, &dialogue, user, &[Role::Waiter]).await? {
        return Ok(());
    }
    let Some(restaurant_id) = user.and_then(|u| u.restaurant_id) else {
        return Ok(());
    };

    let Some(FlowState::ViewDish {
        category_id,
        dish_id,
        showing_video,
    }) = dialogue.get().await?
    else {
        bot.send_message(chat_id, "This card is no longer active. Send /start to reopen the menu.")
            .await?;
        return Ok(());
    };

    let dish = {
        let conn = db.lock().await;
        db::get_dish_scoped(&conn, dish_id, restaurant_id)?
    };
    let Some(dish) = dish else {
        bot.send_message(chat_id, FlowError::NotFound.user_message())
            .await?;
        return Ok(());
    };

    if showing_video {
        return show_browsed_dish(bot, chat_id, dialogue, category_id, &dish).await;
    }

    if send_dish_video(bot, chat_id, &db, &dish).await? {
        dialogue
            .update(FlowState::ViewDish {
                category_id,
                dish_id,
                showing_video: true,
            })
            .await?;
    } else {
        bot.send_message(chat_id, "This dish has no video.").await?;
    }
    Ok(())
}

async fn back_to_dishes(
    bot: &Bot,
    chat_id: ChatId,
    dialogue: BotDialogue,
    db: Db,
    user: Option<&User>,
) -> Result<()> {
    if !ensure_role(bot, chat_id, &dialogue, user, &[Role::Waiter]).await? {
        return Ok(());
    }
    let Some(restaurant_id) = user.and_then(|u| u.restaurant_id) else {
        return Ok(());
    };

    let Some(FlowState::ViewDish { category_id, .. }) = dialogue.get().await? else {
        return back_to_categories(bot, chat_id, dialogue, db, user).await;
    };

    let dishes = {
        let conn = db.lock().await;
        db::get_dishes_by_category(&conn, category_id, restaurant_id)?
    };
    bot.send_message(chat_id, "Pick a dish:")
        .reply_markup(ui_builder::browse_dishes_keyboard(&dishes))
        .await?;
    dialogue
        .update(FlowState::BrowseDishes { category_id })
        .await?;
    Ok(())
}

async fn back_to_categories(
    bot: &Bot,
    chat_id: ChatId,
    dialogue: BotDialogue,
    db: Db,
    user: Option<&User>,
) -> Result<()> {
    if !ensure_role(bot, chat_id, &dialogue, user, &[Role::Waiter]).await? {
        return Ok(());
    }
    let Some(restaurant_id) = user.and_then(|u| u.restaurant_id) else {
        return Ok(());
    };

    let categories = {
        let conn = db.lock().await;
        db::get_categories_by_restaurant(&conn, restaurant_id)?
    };
    if categories.is_empty() {
        bot.send_message(chat_id, "No categories yet.").await?;
        dialogue.update(FlowState::BrowseChoice).await?;
        return Ok(());
    }

    bot.send_message(chat_id, "Pick a category:")
        .reply_markup(ui_builder::browse_categories_keyboard(&categories))
        .await?;
    dialogue.update(FlowState::BrowseCategories).await?;
    Ok(())
}

/// Send the photo card for a browsed dish and record the view position
async fn show_browsed_dish(
    bot: &Bot,
    chat_id: ChatId,
    dialogue: BotDialogue,
    category_id: i64,
    dish: &Dish,
) -> Result<()> {
    let has_video = dish.video_file_id.is_some() || dish.video_url.is_some();
    let keyboard = ui_builder::dish_nav_keyboard(false, has_video);
    send_dish_card(bot, chat_id, dish, Some(keyboard)).await?;

    dialogue
        .update(FlowState::ViewDish {
            category_id,
            dish_id: dish.id,
            showing_video: false,
        })
        .await?;
    Ok(())
}

/// Send a dish card: the finished-dish photo with the caption, or plain text
/// when no photo was captured
async fn send_dish_card(
    bot: &Bot,
    chat_id: ChatId,
    dish: &Dish,
    keyboard: Option<InlineKeyboardMarkup>,
) -> Result<()> {
    let caption = ui_builder::dish_card_caption(dish);

    let photo = dish
        .ready_photo_url
        .as_deref()
        .filter(|path| std::path::Path::new(path).exists());

    match (photo, keyboard) {
        (Some(path), Some(kb)) => {
            bot.send_photo(chat_id, InputFile::file(path))
                .caption(caption)
                .reply_markup(kb)
                .await?;
        }
        (Some(path), None) => {
            bot.send_photo(chat_id, InputFile::file(path))
                .caption(caption)
                .await?;
        }
        (None, Some(kb)) => {
            bot.send_message(chat_id, caption).reply_markup(kb).await?;
        }
        (None, None) => {
            bot.send_message(chat_id, caption).await?;
        }
    }
    Ok(())
}

/// Send the dish video, preferring the cached Telegram file id over a fresh
/// upload. A successful upload caches the returned file id for next time.
/// Returns false when the dish has no video at all.
async fn send_dish_video(bot: &Bot, chat_id: ChatId, db: &Db, dish: &Dish) -> Result<bool> {
    let keyboard = ui_builder::dish_nav_keyboard(true, true);

    if let Some(file_id) = &dish.video_file_id {
        bot.send_video(chat_id, InputFile::file_id(FileId(file_id.clone())))
            .reply_markup(keyboard)
            .await?;
        return Ok(true);
    }

    let Some(path) = dish
        .video_url
        .as_deref()
        .filter(|path| std::path::Path::new(path).exists())
    else {
        return Ok(false);
    };

    let sent = bot
        .send_video(chat_id, InputFile::file(path))
        .reply_markup(keyboard)
        .await?;
    if let Some(video) = sent.video() {
        let conn = db.lock().await;
        if let Err(e) = db::set_dish_video_file_id(&conn, dish.id, &video.file.id.0) {
            error!(dish_id = dish.id, error = %e, "Failed to cache video file id");
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_reply_success_uses_given_text() {
        let reply: String = outcome_reply(true, "Dish deleted.");
        assert_eq!(reply, "Dish deleted.");
    }

    #[test]
    fn test_outcome_reply_miss_reads_as_not_found() {
        // A cross-tenant write and a missing row must produce the same text
        let reply = outcome_reply(false, "Dish deleted.");
        assert_eq!(reply, FlowError::NotFound.user_message());
        assert!(!reply.contains("Dish"));
    }
}
