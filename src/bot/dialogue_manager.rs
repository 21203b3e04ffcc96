//! Dialogue Manager module for handling flow state transitions
//!
//! Every transition handler re-checks authorization for its flow's required
//! role before touching accumulated fields. A mid-flow authorization failure
//! clears the flow, discards everything collected so far and reports
//! "not authorized" without partial commits.

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::InputFile;
use tracing::{error, info, warn};

use crate::auth::{self, Role};
use crate::db::{self, Db, DishUpdate, NewDish, User};
use crate::dialogue::{
    declines_video, parse_entity_id, validate_name, BotDialogue, DishDraft, FlowState,
};
use crate::errors::FlowError;
use crate::invites::{InviteTokenService, INVITE_TTL_SECONDS};
use crate::media;
use crate::onboarding::{self, RegistrationOutcome};

use super::ui_builder;
use super::BotConfig;

/// Entry guard shared by every transition handler. On failure the flow is
/// cleared before the caller sees the refusal, so no fields survive.
pub async fn ensure_role(
    bot: &Bot,
    chat_id: ChatId,
    dialogue: &BotDialogue,
    user: Option<&User>,
    required: &[Role],
) -> Result<bool> {
    if auth::authorize(user, required) {
        return Ok(true);
    }

    dialogue.exit().await?;
    bot.send_message(chat_id, FlowError::Unauthorized.user_message())
        .await?;
    Ok(false)
}

/// The restaurant an admin acts on. `None` short-circuits as unauthorized
/// upstream, so this is only called after `ensure_role`.
fn admin_restaurant_id(user: Option<&User>) -> Option<i64> {
    user.and_then(|u| u.restaurant_id)
}

/// Issue an invitation and send the deep link to the chat
pub async fn send_invite_link(
    bot: &Bot,
    chat_id: ChatId,
    invites: &InviteTokenService,
    restaurant_id: i64,
    role: Role,
) -> Result<()> {
    let token = invites.issue(restaurant_id, role, INVITE_TTL_SECONDS).await?;
    let me = bot.get_me().await?;
    let link = format!("https://t.me/{}?start={}", me.username(), token);

    let label = match role {
        Role::Admin => "Become restaurant admin",
        _ => "Join as waiter",
    };
    let keyboard = ui_builder::invite_link_keyboard(label, &link)?;

    info!(restaurant_id, role = %role, "Issued invitation link");
    bot.send_message(
        chat_id,
        format!("Invitation link for a new {role} (valid for 15 minutes):"),
    )
    .reply_markup(keyboard)
    .await?;

    Ok(())
}

// ---- Token-gated self-registration -------------------------------------

pub async fn handle_register_first_name(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    input: &str,
    token: String,
    restaurant_id: i64,
    role: Role,
) -> Result<()> {
    match validate_name(input) {
        Ok(first_name) => {
            bot.send_message(msg.chat.id, "Enter your last name:").await?;
            dialogue
                .update(FlowState::RegisterLastName {
                    token,
                    restaurant_id,
                    role,
                    first_name,
                })
                .await?;
        }
        Err(_) => {
            // Re-prompt in the same state
            bot.send_message(msg.chat.id, "Please enter a valid first name:")
                .await?;
        }
    }
    Ok(())
}

pub async fn handle_register_last_name(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    db: Db,
    invites: &InviteTokenService,
    input: &str,
    token: String,
    first_name: String,
) -> Result<()> {
    let last_name = match validate_name(input) {
        Ok(name) => name,
        Err(_) => {
            bot.send_message(msg.chat.id, "Please enter a valid last name:")
                .await?;
            return Ok(());
        }
    };

    let tg_id = caller_tg_id(msg);
    let tg_username = msg.from.as_ref().and_then(|u| u.username.as_deref());

    let outcome = onboarding::complete_registration(
        &db,
        invites,
        &token,
        &tg_id,
        tg_username,
        &first_name,
        &last_name,
    )
    .await?;

    match outcome {
        RegistrationOutcome::Registered(user) => {
            let keyboard = match user.role {
                Role::Admin => Some(ui_builder::admin_home_keyboard()),
                Role::Waiter => Some(ui_builder::waiter_home_keyboard()),
                Role::Superadmin => None,
            };
            let text = format!("You are registered as {}. Welcome!", user.role);
            match keyboard {
                Some(kb) => bot.send_message(msg.chat.id, text).reply_markup(kb).await?,
                None => bot.send_message(msg.chat.id, text).await?,
            };
        }
        RegistrationOutcome::AlreadyRegistered => {
            bot.send_message(msg.chat.id, FlowError::AlreadyRegistered.user_message())
                .await?;
        }
        RegistrationOutcome::TokenInvalid => {
            bot.send_message(msg.chat.id, FlowError::TokenInvalid.user_message())
                .await?;
        }
    }

    dialogue.exit().await?;
    Ok(())
}

// ---- Superadmin provisioning -------------------------------------------

pub async fn handle_restaurant_name(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    db: Db,
    user: Option<&User>,
    input: &str,
) -> Result<()> {
    if !ensure_role(bot, msg.chat.id, &dialogue, user, &[Role::Superadmin]).await? {
        return Ok(());
    }

    let name = match validate_name(input) {
        Ok(name) => name,
        Err(_) => {
            bot.send_message(msg.chat.id, "Please enter a valid restaurant name:")
                .await?;
            return Ok(());
        }
    };

    let restaurant = {
        let conn = db.lock().await;
        db::create_restaurant(&conn, &name)?
    };

    bot.send_message(
        msg.chat.id,
        format!(
            "Restaurant '{}' created with id {}. You can now invite its admin.",
            restaurant.name, restaurant.id
        ),
    )
    .reply_markup(ui_builder::superadmin_home_keyboard())
    .await?;
    dialogue.exit().await?;
    Ok(())
}

pub async fn handle_admin_invite_restaurant_id(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    db: Db,
    invites: &InviteTokenService,
    user: Option<&User>,
    input: &str,
) -> Result<()> {
    if !ensure_role(bot, msg.chat.id, &dialogue, user, &[Role::Superadmin]).await? {
        return Ok(());
    }

    let Some(restaurant_id) = parse_entity_id(input) else {
        bot.send_message(msg.chat.id, "Please enter a numeric restaurant id:")
            .await?;
        return Ok(());
    };

    let restaurant = {
        let conn = db.lock().await;
        db::get_restaurant(&conn, restaurant_id)?
    };
    if restaurant.is_none() {
        bot.send_message(msg.chat.id, FlowError::NotFound.user_message())
            .await?;
        return Ok(());
    }

    send_invite_link(bot, msg.chat.id, invites, restaurant_id, Role::Admin).await?;
    dialogue.exit().await?;
    Ok(())
}

// ---- Category wizard ----------------------------------------------------

pub async fn handle_category_name(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    db: Db,
    user: Option<&User>,
    input: &str,
) -> Result<()> {
    if !ensure_role(bot, msg.chat.id, &dialogue, user, &[Role::Admin]).await? {
        return Ok(());
    }
    let Some(restaurant_id) = admin_restaurant_id(user) else {
        return Ok(());
    };

    let name = match validate_name(input) {
        Ok(name) => name,
        Err(_) => {
            bot.send_message(msg.chat.id, "Please enter a valid category name:")
                .await?;
            return Ok(());
        }
    };

    let category = {
        let conn = db.lock().await;
        db::create_category(&conn, &name, restaurant_id)?
    };

    bot.send_message(msg.chat.id, format!("Category '{}' created!", category.name))
        .await?;
    dialogue.exit().await?;
    Ok(())
}

pub async fn handle_category_rename(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    db: Db,
    user: Option<&User>,
    category_id: i64,
    input: &str,
) -> Result<()> {
    if !ensure_role(bot, msg.chat.id, &dialogue, user, &[Role::Admin]).await? {
        return Ok(());
    }
    let Some(restaurant_id) = admin_restaurant_id(user) else {
        return Ok(());
    };

    let name = match validate_name(input) {
        Ok(name) => name,
        Err(_) => {
            bot.send_message(msg.chat.id, "Please enter a valid category name:")
                .await?;
            return Ok(());
        }
    };

    let renamed = {
        let conn = db.lock().await;
        db::rename_category_scoped(&conn, category_id, restaurant_id, &name)?
    };

    if renamed {
        bot.send_message(msg.chat.id, format!("Category renamed to '{name}'."))
            .await?;
    } else {
        bot.send_message(msg.chat.id, FlowError::NotFound.user_message())
            .await?;
    }
    dialogue.exit().await?;
    Ok(())
}

// ---- Dish wizard --------------------------------------------------------

pub async fn handle_dish_name(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    db: Db,
    user: Option<&User>,
    edit_id: Option<i64>,
    input: &str,
) -> Result<()> {
    if !ensure_role(bot, msg.chat.id, &dialogue, user, &[Role::Admin]).await? {
        return Ok(());
    }
    let Some(restaurant_id) = admin_restaurant_id(user) else {
        return Ok(());
    };

    let name = match validate_name(input) {
        Ok(name) => name,
        Err(_) => {
            bot.send_message(msg.chat.id, "Please enter a valid dish name:")
                .await?;
            return Ok(());
        }
    };

    let categories = {
        let conn = db.lock().await;
        db::get_categories_by_restaurant(&conn, restaurant_id)?
    };
    if categories.is_empty() {
        bot.send_message(msg.chat.id, "No categories yet. Create a category first!")
            .await?;
        dialogue.exit().await?;
        return Ok(());
    }

    let draft = DishDraft {
        edit_id,
        name,
        ..Default::default()
    };
    bot.send_message(msg.chat.id, "Pick a category for the dish:")
        .reply_markup(ui_builder::category_pick_keyboard(&categories))
        .await?;
    dialogue.update(FlowState::DishCategory { draft }).await?;
    Ok(())
}

pub async fn handle_dish_composition(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    user: Option<&User>,
    mut draft: DishDraft,
    input: &str,
) -> Result<()> {
    if !ensure_role(bot, msg.chat.id, &dialogue, user, &[Role::Admin]).await? {
        media::cleanup_draft_media(&draft);
        return Ok(());
    }

    let composition = match validate_name(input) {
        Ok(text) => text,
        Err(_) => {
            bot.send_message(
                msg.chat.id,
                "Please list the ingredients, separated by commas:",
            )
            .await?;
            return Ok(());
        }
    };

    draft.composition = Some(composition);
    bot.send_message(msg.chat.id, "Enter the dish description:")
        .await?;
    dialogue.update(FlowState::DishDescription { draft }).await?;
    Ok(())
}

pub async fn handle_dish_description(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    user: Option<&User>,
    mut draft: DishDraft,
    input: &str,
) -> Result<()> {
    if !ensure_role(bot, msg.chat.id, &dialogue, user, &[Role::Admin]).await? {
        media::cleanup_draft_media(&draft);
        return Ok(());
    }

    let description = match validate_name(input) {
        Ok(text) => text,
        Err(_) => {
            bot.send_message(msg.chat.id, "Please enter the dish description:")
                .await?;
            return Ok(());
        }
    };
    draft.description = Some(description);

    // The flow bifurcates here: edits may skip the asset-capture path,
    // creation always walks it in full before the single commit
    if draft.edit_id.is_some() {
        bot.send_message(msg.chat.id, "Send a presentation video, or reply 'no' to skip:")
            .await?;
        dialogue.update(FlowState::DishVideo { draft }).await?;
    } else {
        bot.send_message(msg.chat.id, "Send a photo of the ingredients:")
            .await?;
        dialogue
            .update(FlowState::DishIngredientsPhoto { draft })
            .await?;
    }
    Ok(())
}

/// Edit-variant terminal step: a video upload or a literal "no"
pub async fn handle_dish_video(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    db: Db,
    user: Option<&User>,
    draft: DishDraft,
) -> Result<()> {
    if !ensure_role(bot, msg.chat.id, &dialogue, user, &[Role::Admin]).await? {
        media::cleanup_draft_media(&draft);
        return Ok(());
    }
    let Some(restaurant_id) = admin_restaurant_id(user) else {
        return Ok(());
    };

    let video_file_id = if let Some(video) = msg.video() {
        Some(video.file.id.0.clone())
    } else if msg.text().map(declines_video).unwrap_or(false) {
        None
    } else {
        bot.send_message(msg.chat.id, "Please send a video or reply 'no'.")
            .await?;
        return Ok(());
    };

    let (Some(edit_id), Some(category_id)) = (draft.edit_id, draft.category_id) else {
        // Draft cannot reach this state without both; treat as a lost flow
        warn!(user_id = %msg.chat.id, "Dish edit draft missing id fields, clearing flow");
        dialogue.exit().await?;
        return Ok(());
    };

    // An uploaded video is already hosted by Telegram, so only the file id
    // cache is set; there is no local path to record
    let update = DishUpdate {
        name: draft.name.clone(),
        category_id,
        composition: draft.composition.clone(),
        description: draft.description.clone(),
        video_url: None,
    };
    let updated = {
        let conn = db.lock().await;
        let updated = db::update_dish_scoped(&conn, edit_id, restaurant_id, &update)?;
        if updated {
            if let Some(file_id) = &video_file_id {
                db::set_dish_video_file_id(&conn, edit_id, file_id)?;
            }
        }
        updated
    };

    if updated {
        bot.send_message(msg.chat.id, format!("Dish updated: {}", update.name))
            .await?;
    } else {
        bot.send_message(msg.chat.id, FlowError::NotFound.user_message())
            .await?;
    }
    dialogue.exit().await?;
    Ok(())
}

pub async fn handle_ingredients_photo(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    user: Option<&User>,
    mut draft: DishDraft,
) -> Result<()> {
    if !ensure_role(bot, msg.chat.id, &dialogue, user, &[Role::Admin]).await? {
        media::cleanup_draft_media(&draft);
        return Ok(());
    }

    let Some(photo) = msg.photo().and_then(|photos| photos.last()) else {
        bot.send_message(msg.chat.id, "Please send a photo of the ingredients.")
            .await?;
        return Ok(());
    };

    let path = media::download_to_temp(bot, photo.file.id.clone(), ".jpg").await?;
    draft.ingredients_photo_path = Some(path);

    bot.send_message(
        msg.chat.id,
        "Ingredients photo received. Now send a photo of the finished dish:",
    )
    .await?;
    dialogue.update(FlowState::DishReadyPhoto { draft }).await?;
    Ok(())
}

pub async fn handle_ready_photo(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    user: Option<&User>,
    mut draft: DishDraft,
) -> Result<()> {
    if !ensure_role(bot, msg.chat.id, &dialogue, user, &[Role::Admin]).await? {
        media::cleanup_draft_media(&draft);
        return Ok(());
    }

    let Some(photo) = msg.photo().and_then(|photos| photos.last()) else {
        bot.send_message(msg.chat.id, "Please send a photo of the finished dish.")
            .await?;
        return Ok(());
    };

    let path = media::download_to_temp(bot, photo.file.id.clone(), ".jpg").await?;
    draft.ready_photo_path = Some(path);

    bot.send_message(
        msg.chat.id,
        "Finished-dish photo received. Now send an audio file (mp3):",
    )
    .await?;
    dialogue.update(FlowState::DishAudio { draft }).await?;
    Ok(())
}

/// Creation-variant terminal step: capture the audio, synthesize the video,
/// publish the card and persist everything in one insert
pub async fn handle_dish_audio(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    db: Db,
    cfg: &BotConfig,
    user: Option<&User>,
    draft: DishDraft,
) -> Result<()> {
    if !ensure_role(bot, msg.chat.id, &dialogue, user, &[Role::Admin]).await? {
        media::cleanup_draft_media(&draft);
        return Ok(());
    }
    let Some(restaurant_id) = admin_restaurant_id(user) else {
        return Ok(());
    };

    let audio_file_id = if let Some(audio) = msg.audio() {
        audio.file.id.clone()
    } else if let Some(voice) = msg.voice() {
        voice.file.id.clone()
    } else {
        bot.send_message(msg.chat.id, "Please send an audio file (mp3).")
            .await?;
        return Ok(());
    };

    let (Some(ingredients_photo), Some(ready_photo), Some(category_id)) = (
        draft.ingredients_photo_path.clone(),
        draft.ready_photo_path.clone(),
        draft.category_id,
    ) else {
        warn!(user_id = %msg.chat.id, "Dish draft missing captured assets, clearing flow");
        media::cleanup_draft_media(&draft);
        dialogue.exit().await?;
        return Ok(());
    };

    bot.send_message(msg.chat.id, "Audio received. Generating the video...")
        .await?;

    let audio_path = media::download_to_temp(bot, audio_file_id, ".mp3").await?;
    let synthesized = media::synthesize_video(&ingredients_photo, &audio_path).await;
    media::remove_media_file(&audio_path);

    let video_path = match synthesized {
        Ok(path) => path,
        Err(e) => {
            error!(user_id = %msg.chat.id, error = %e, "Video synthesis failed");
            // Same state; the caller can send the audio again
            bot.send_message(msg.chat.id, FlowError::Infra(e.to_string()).user_message())
                .await?;
            return Ok(());
        }
    };

    let dish = {
        let conn = db.lock().await;
        db::create_dish(
            &conn,
            &NewDish {
                name: draft.name.clone(),
                category_id,
                restaurant_id,
                composition: draft.composition.clone(),
                description: draft.description.clone(),
                cook_time: None,
                video_url: Some(video_path.clone()),
                ingredients_photo_url: Some(ingredients_photo.clone()),
                ready_photo_url: Some(ready_photo.clone()),
            },
        )?
    };

    publish_dish_card(bot, &db, cfg, &dish, &ready_photo, &video_path).await;

    bot.send_message(msg.chat.id, "Dish card created, photos and video saved!")
        .await?;
    dialogue.exit().await?;
    Ok(())
}

/// Send the finished card and video to the technical group and cache the
/// returned Telegram file id. Failures here are logged, not surfaced: the
/// dish is already persisted.
async fn publish_dish_card(
    bot: &Bot,
    db: &Db,
    cfg: &BotConfig,
    dish: &db::Dish,
    ready_photo: &str,
    video_path: &str,
) {
    let Some(tech_group) = cfg.tech_group else {
        warn!("No technical group configured, skipping dish card upload");
        return;
    };

    let caption = ui_builder::dish_card_caption(dish);
    if let Err(e) = bot
        .send_photo(tech_group, InputFile::file(ready_photo))
        .caption(caption)
        .await
    {
        error!(dish_id = dish.id, error = %e, "Failed to send dish card to tech group");
    }

    match bot.send_video(tech_group, InputFile::file(video_path)).await {
        Ok(sent) => {
            if let Some(video) = sent.video() {
                let conn = db.lock().await;
                if let Err(e) = db::set_dish_video_file_id(&conn, dish.id, &video.file.id.0) {
                    error!(dish_id = dish.id, error = %e, "Failed to cache video file id");
                }
            }
        }
        Err(e) => {
            error!(dish_id = dish.id, error = %e, "Failed to upload dish video to tech group");
        }
    }
}

// ---- Waiter home --------------------------------------------------------

pub async fn handle_browse_choice(
    bot: &Bot,
    msg: &Message,
    dialogue: BotDialogue,
    db: Db,
    user: Option<&User>,
    input: &str,
) -> Result<()> {
    if !ensure_role(bot, msg.chat.id, &dialogue, user, &[Role::Waiter]).await? {
        return Ok(());
    }
    let Some(restaurant_id) = user.and_then(|u| u.restaurant_id) else {
        return Ok(());
    };

    if input.eq_ignore_ascii_case(ui_builder::BTN_MENU) {
        let categories = {
            let conn = db.lock().await;
            db::get_categories_by_restaurant(&conn, restaurant_id)?
        };
        if categories.is_empty() {
            bot.send_message(msg.chat.id, "No categories yet.").await?;
            return Ok(());
        }
        bot.send_message(msg.chat.id, "Pick a category:")
            .reply_markup(ui_builder::browse_categories_keyboard(&categories))
            .await?;
        dialogue.update(FlowState::BrowseCategories).await?;
    } else if input.eq_ignore_ascii_case(ui_builder::BTN_TEST) {
        bot.send_message(msg.chat.id, "Testing is not implemented yet.")
            .await?;
    } else {
        bot.send_message(msg.chat.id, "Please pick an action with the buttons.")
            .await?;
    }
    Ok(())
}

/// The Telegram id the flows key on: the sending user, or the chat for
/// channel-style updates without one
pub fn caller_tg_id(msg: &Message) -> String {
    msg.from
        .as_ref()
        .map(|u| u.id.to_string())
        .unwrap_or_else(|| msg.chat.id.to_string())
}
