//! UI Builder module for creating keyboards and formatting dish cards

use lazy_static::lazy_static;
use regex::Regex;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

use crate::db::{Category, Dish, User};

// Home keyboard button labels
pub const BTN_DISHES: &str = "🍽️ Dishes";
pub const BTN_CATEGORIES: &str = "📂 Categories";
pub const BTN_INVITE_WAITER: &str = "🤝 Invite waiter";
pub const BTN_STAFF: &str = "🧑‍🤝‍🧑 Staff";
pub const BTN_CREATE_RESTAURANT: &str = "Create restaurant";
pub const BTN_MAKE_ADMIN: &str = "Make admin";
pub const BTN_MENU: &str = "Menu";
pub const BTN_TEST: &str = "Test";

// Callback data tags. Prefixed tags carry a numeric payload after the prefix.
pub const CB_BROWSE_CATEGORY: &str = "cat_";
pub const CB_BROWSE_DISH: &str = "dish_";
pub const CB_NAV_PREV: &str = "nav_prev";
pub const CB_NAV_NEXT: &str = "nav_next";
pub const CB_MEDIA_TOGGLE: &str = "media_toggle";
pub const CB_BACK_CATEGORIES: &str = "back_cats";
pub const CB_BACK_DISHES: &str = "back_dishes";
pub const CB_ADD_DISH: &str = "add_dish";
pub const CB_VIEW_DISH: &str = "viewdish_";
pub const CB_EDIT_DISH: &str = "editdish_";
pub const CB_DEL_DISH: &str = "deldish_";
pub const CB_ADD_CATEGORY: &str = "add_category";
pub const CB_EDIT_CATEGORY: &str = "editcat_";
pub const CB_DEL_CATEGORY: &str = "delcat_";
pub const CB_CHOOSE_CATEGORY: &str = "choosecat_";
pub const CB_CANCEL_DISH: &str = "cancel_dish";
pub const CB_DEL_WAITER: &str = "delwaiter_";

/// Reply keyboard for the superadmin home view
pub fn superadmin_home_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(BTN_CREATE_RESTAURANT)],
        vec![KeyboardButton::new(BTN_MAKE_ADMIN)],
    ])
    .resize_keyboard()
}

/// Reply keyboard for the admin home view
pub fn admin_home_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![
            KeyboardButton::new(BTN_DISHES),
            KeyboardButton::new(BTN_CATEGORIES),
        ],
        vec![
            KeyboardButton::new(BTN_INVITE_WAITER),
            KeyboardButton::new(BTN_STAFF),
        ],
    ])
    .resize_keyboard()
}

/// Reply keyboard for the waiter home view
pub fn waiter_home_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![
        KeyboardButton::new(BTN_TEST),
        KeyboardButton::new(BTN_MENU),
    ]])
    .resize_keyboard()
}

/// Admin category management: add button plus rename/delete per category
pub fn admin_categories_keyboard(categories: &[Category]) -> InlineKeyboardMarkup {
    let mut buttons = vec![vec![InlineKeyboardButton::callback(
        "➕ Add category",
        CB_ADD_CATEGORY.to_string(),
    )]];

    for category in categories {
        buttons.push(vec![
            InlineKeyboardButton::callback(
                format!("✏️ {}", category.name),
                format!("{CB_EDIT_CATEGORY}{}", category.id),
            ),
            InlineKeyboardButton::callback("🗑️", format!("{CB_DEL_CATEGORY}{}", category.id)),
        ]);
    }

    InlineKeyboardMarkup::new(buttons)
}

/// Admin dish management: add button plus view/edit/delete per dish
pub fn admin_dishes_keyboard(dishes: &[Dish]) -> InlineKeyboardMarkup {
    let mut buttons = vec![vec![InlineKeyboardButton::callback(
        "➕ Add dish",
        CB_ADD_DISH.to_string(),
    )]];

    for dish in dishes {
        buttons.push(vec![
            InlineKeyboardButton::callback(
                format!("👁️ {}", dish.name),
                format!("{CB_VIEW_DISH}{}", dish.id),
            ),
            InlineKeyboardButton::callback("✏️", format!("{CB_EDIT_DISH}{}", dish.id)),
            InlineKeyboardButton::callback("🗑️", format!("{CB_DEL_DISH}{}", dish.id)),
        ]);
    }

    InlineKeyboardMarkup::new(buttons)
}

/// Category picker inside the dish wizard, with a cancel escape hatch
pub fn category_pick_keyboard(categories: &[Category]) -> InlineKeyboardMarkup {
    let mut buttons: Vec<Vec<InlineKeyboardButton>> = categories
        .iter()
        .map(|c| {
            vec![InlineKeyboardButton::callback(
                format!("📂 {}", c.name),
                format!("{CB_CHOOSE_CATEGORY}{}", c.id),
            )]
        })
        .collect();

    buttons.push(vec![InlineKeyboardButton::callback(
        "❌ Cancel",
        CB_CANCEL_DISH.to_string(),
    )]);

    InlineKeyboardMarkup::new(buttons)
}

/// Category list for waiter browsing
pub fn browse_categories_keyboard(categories: &[Category]) -> InlineKeyboardMarkup {
    let buttons: Vec<Vec<InlineKeyboardButton>> = categories
        .iter()
        .map(|c| {
            vec![InlineKeyboardButton::callback(
                c.name.clone(),
                format!("{CB_BROWSE_CATEGORY}{}", c.id),
            )]
        })
        .collect();

    InlineKeyboardMarkup::new(buttons)
}

/// Dish list for waiter browsing, with a back-to-categories row
pub fn browse_dishes_keyboard(dishes: &[Dish]) -> InlineKeyboardMarkup {
    let mut buttons: Vec<Vec<InlineKeyboardButton>> = dishes
        .iter()
        .map(|d| {
            vec![InlineKeyboardButton::callback(
                format!("{} 🍽️", d.name),
                format!("{CB_BROWSE_DISH}{}", d.id),
            )]
        })
        .collect();

    buttons.push(vec![InlineKeyboardButton::callback(
        "🔙 Back",
        CB_BACK_CATEGORIES.to_string(),
    )]);

    InlineKeyboardMarkup::new(buttons)
}

/// Navigation keyboard under a dish card
pub fn dish_nav_keyboard(showing_video: bool, has_video: bool) -> InlineKeyboardMarkup {
    let mut buttons = vec![vec![
        InlineKeyboardButton::callback("⬅️ Prev", CB_NAV_PREV.to_string()),
        InlineKeyboardButton::callback("➡️ Next", CB_NAV_NEXT.to_string()),
    ]];

    if has_video {
        let toggle_label = if showing_video { "📸 Photo" } else { "🎬 Video" };
        buttons.push(vec![InlineKeyboardButton::callback(
            toggle_label,
            CB_MEDIA_TOGGLE.to_string(),
        )]);
    }

    buttons.push(vec![InlineKeyboardButton::callback(
        "🔙 To dishes",
        CB_BACK_DISHES.to_string(),
    )]);

    InlineKeyboardMarkup::new(buttons)
}

/// Inline button opening an invitation deep link
pub fn invite_link_keyboard(label: &str, link: &str) -> anyhow::Result<InlineKeyboardMarkup> {
    let url = reqwest::Url::parse(link)?;
    Ok(InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::url(label.to_string(), url),
    ]]))
}

/// Per-waiter row in the staff listing
pub fn staff_row_keyboard(waiter_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "🗑️ Remove",
        format!("{CB_DEL_WAITER}{waiter_id}"),
    )]])
}

/// One line of the staff listing
pub fn staff_row_text(waiter: &User) -> String {
    format!(
        "{} {} (@{}), id: {}",
        waiter.first_name,
        waiter.last_name,
        waiter.tg_username.as_deref().unwrap_or("-"),
        waiter.id
    )
}

lazy_static! {
    // Ingredients are separated by commas or runs of whitespace in free text
    static ref COMPOSITION_SPLIT: Regex = Regex::new(r",\s*|\s{2,}").unwrap();
}

/// Format a dish's free-text composition as a bullet list
pub fn format_composition(composition: Option<&str>) -> String {
    let Some(composition) = composition else {
        return "No data".to_string();
    };

    let items: Vec<String> = COMPOSITION_SPLIT
        .split(composition)
        .filter(|i| !i.trim().is_empty())
        .map(|i| format!("• {}", i.trim()))
        .collect();

    if items.is_empty() {
        "No data".to_string()
    } else {
        items.join("\n")
    }
}

/// Full caption for a dish card
pub fn dish_card_caption(dish: &Dish) -> String {
    format!(
        "{} 🍽️\n\nComposition:\n{}\n\nDescription:\n{}",
        dish.name,
        format_composition(dish.composition.as_deref()),
        dish.description.as_deref().unwrap_or("No data")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_dish(id: i64, name: &str) -> Dish {
        Dish {
            id,
            name: name.to_string(),
            category_id: 1,
            restaurant_id: 1,
            composition: None,
            description: None,
            cook_time: None,
            video_url: None,
            ingredients_photo_url: None,
            ready_photo_url: None,
            video_file_id: None,
        }
    }

    #[test]
    fn test_format_composition_bullets() {
        let formatted = format_composition(Some("potato, beef,salt,  pepper"));
        assert_eq!(formatted, "• potato\n• beef\n• salt\n• pepper");
    }

    #[test]
    fn test_format_composition_empty_input() {
        assert_eq!(format_composition(None), "No data");
        assert_eq!(format_composition(Some("   ")), "No data");
    }

    #[test]
    fn test_dish_card_caption_contains_all_sections() {
        let mut dish = make_dish(1, "Soup");
        dish.composition = Some("pumpkin, cream".to_string());
        dish.description = Some("Autumn special".to_string());

        let caption = dish_card_caption(&dish);
        assert!(caption.contains("Soup"));
        assert!(caption.contains("• pumpkin"));
        assert!(caption.contains("Autumn special"));
    }

    #[test]
    fn test_admin_dishes_keyboard_layout() {
        let dishes = vec![make_dish(1, "Soup"), make_dish(2, "Steak")];
        let keyboard = admin_dishes_keyboard(&dishes);

        // Add row plus one row per dish
        assert_eq!(keyboard.inline_keyboard.len(), 3);
        assert_eq!(keyboard.inline_keyboard[1].len(), 3);
    }

    #[test]
    fn test_dish_nav_keyboard_toggle_only_with_video() {
        let without_video = dish_nav_keyboard(false, false);
        assert_eq!(without_video.inline_keyboard.len(), 2);

        let with_video = dish_nav_keyboard(false, true);
        assert_eq!(with_video.inline_keyboard.len(), 3);
    }

    #[test]
    fn test_invite_link_keyboard_rejects_bad_url() {
        assert!(invite_link_keyboard("Join", "not a url").is_err());
        assert!(invite_link_keyboard("Join", "https://t.me/menubot?start=abc").is_ok());
    }
}
