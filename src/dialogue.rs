//! Conversation state for every multi-step flow.
//!
//! Each caller has at most one active flow, held as a `FlowState` variant in
//! the dialogue storage keyed by chat id. Variants carry the fields
//! accumulated so far; the final step of a flow performs exactly one
//! persistence operation and resets the state to `Idle`.

use serde::{Deserialize, Serialize};
use teloxide::dispatching::dialogue::{Dialogue, InMemStorage};

use crate::auth::Role;

/// Fields accumulated by the dish wizard across its steps.
///
/// `edit_id` distinguishes the edit variant (may decline the video step)
/// from creation (full asset-capture path before commit).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DishDraft {
    pub edit_id: Option<i64>,
    pub name: String,
    pub category_id: Option<i64>,
    pub composition: Option<String>,
    pub description: Option<String>,
    pub ingredients_photo_path: Option<String>,
    pub ready_photo_path: Option<String>,
}

/// Per-caller flow position
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub enum FlowState {
    #[default]
    Idle,

    // Token-gated self-registration
    RegisterFirstName {
        token: String,
        restaurant_id: i64,
        role: Role,
    },
    RegisterLastName {
        token: String,
        restaurant_id: i64,
        role: Role,
        first_name: String,
    },

    // Superadmin provisioning
    RestaurantName,
    AdminInviteRestaurantId,

    // Category wizard
    CategoryName,
    CategoryRename {
        category_id: i64,
    },

    // Dish wizard (creation and edit share the text steps)
    DishName {
        edit_id: Option<i64>,
    },
    DishCategory {
        draft: DishDraft,
    },
    DishComposition {
        draft: DishDraft,
    },
    DishDescription {
        draft: DishDraft,
    },
    DishIngredientsPhoto {
        draft: DishDraft,
    },
    DishReadyPhoto {
        draft: DishDraft,
    },
    DishAudio {
        draft: DishDraft,
    },
    DishVideo {
        draft: DishDraft,
    },

    // Waiter catalog browsing
    BrowseChoice,
    BrowseCategories,
    BrowseDishes {
        category_id: i64,
    },
    ViewDish {
        category_id: i64,
        dish_id: i64,
        showing_video: bool,
    },
}

impl FlowState {
    /// The dish draft this state carries, if it is a wizard step.
    ///
    /// Every path that abandons a wizard mid-flight must run the draft's
    /// media cleanup before replacing or clearing the state.
    pub fn draft(&self) -> Option<&DishDraft> {
        match self {
            FlowState::DishCategory { draft }
            | FlowState::DishComposition { draft }
            | FlowState::DishDescription { draft }
            | FlowState::DishIngredientsPhoto { draft }
            | FlowState::DishReadyPhoto { draft }
            | FlowState::DishAudio { draft }
            | FlowState::DishVideo { draft } => Some(draft),
            _ => None,
        }
    }
}

/// Type alias for the per-caller dialogue handle
pub type BotDialogue = Dialogue<FlowState, InMemStorage<FlowState>>;

/// Validates a free-text name input (restaurant, category, dish, person)
pub fn validate_name(name: &str) -> Result<String, &'static str> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err("empty");
    }

    if trimmed.len() > 255 {
        return Err("too_long");
    }

    Ok(trimmed.to_string())
}

/// Parses a numeric entity id typed by the caller
pub fn parse_entity_id(input: &str) -> Option<i64> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.len() >= 10 || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

/// True when the caller declines the video step with a literal "no"
pub fn declines_video(input: &str) -> bool {
    input.trim().eq_ignore_ascii_case("no")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        assert!(validate_name("Starters").is_ok());
        assert!(validate_name("  Pumpkin Soup  ").is_ok());

        assert!(validate_name("").is_err());
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"a".repeat(256)).is_err());
    }

    #[test]
    fn test_name_trimming() {
        let result = validate_name("  North Kitchen  ");
        assert_eq!(result.unwrap(), "North Kitchen");
    }

    #[test]
    fn test_parse_entity_id() {
        assert_eq!(parse_entity_id("7"), Some(7));
        assert_eq!(parse_entity_id("  42 "), Some(42));

        assert_eq!(parse_entity_id(""), None);
        assert_eq!(parse_entity_id("abc"), None);
        assert_eq!(parse_entity_id("7b"), None);
        assert_eq!(parse_entity_id("-3"), None);
        assert_eq!(parse_entity_id("1234567890"), None);
    }

    #[test]
    fn test_declines_video() {
        assert!(declines_video("no"));
        assert!(declines_video(" No "));
        assert!(declines_video("NO"));

        assert!(!declines_video("nope"));
        assert!(!declines_video("yes"));
        assert!(!declines_video(""));
    }

    #[test]
    fn test_default_state_is_idle() {
        assert!(matches!(FlowState::default(), FlowState::Idle));
    }

    #[test]
    fn test_every_wizard_state_exposes_its_draft() {
        let draft = DishDraft {
            name: "Soup".to_string(),
            ingredients_photo_path: Some("/tmp/in.jpg".to_string()),
            ..Default::default()
        };

        let wizard_states = [
            FlowState::DishCategory { draft: draft.clone() },
            FlowState::DishComposition { draft: draft.clone() },
            FlowState::DishDescription { draft: draft.clone() },
            FlowState::DishIngredientsPhoto { draft: draft.clone() },
            FlowState::DishReadyPhoto { draft: draft.clone() },
            FlowState::DishAudio { draft: draft.clone() },
            FlowState::DishVideo { draft: draft.clone() },
        ];
        for state in &wizard_states {
            assert_eq!(state.draft(), Some(&draft));
        }

        assert!(FlowState::Idle.draft().is_none());
        assert!(FlowState::CategoryName.draft().is_none());
        assert!(FlowState::BrowseCategories.draft().is_none());
    }

    #[test]
    fn test_draft_accumulation_across_steps() {
        let mut draft = DishDraft {
            edit_id: None,
            name: "Soup".to_string(),
            ..Default::default()
        };
        draft.category_id = Some(3);
        draft.composition = Some("pumpkin, cream".to_string());

        let state = FlowState::DishDescription { draft: draft.clone() };
        match state {
            FlowState::DishDescription { draft } => {
                assert_eq!(draft.name, "Soup");
                assert_eq!(draft.category_id, Some(3));
                assert!(draft.ingredients_photo_path.is_none());
            }
            _ => panic!("Unexpected flow state"),
        }
    }

    #[test]
    fn test_state_serialization_round_trip() {
        let state = FlowState::RegisterLastName {
            token: "abc123".to_string(),
            restaurant_id: 7,
            role: Role::Waiter,
            first_name: "Ann".to_string(),
        };

        let json = serde_json::to_string(&state).unwrap();
        let back: FlowState = serde_json::from_str(&json).unwrap();
        match back {
            FlowState::RegisterLastName { restaurant_id, first_name, .. } => {
                assert_eq!(restaurant_id, 7);
                assert_eq!(first_name, "Ann");
            }
            _ => panic!("Unexpected flow state after round trip"),
        }
    }
}
