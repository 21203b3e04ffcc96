//! Bot module for handling Telegram interactions
//!
//! This module is split into several submodules for better organization:
//! - `message_handler`: Routes incoming text and media messages
//! - `callback_handler`: Handles inline keyboard callback queries
//! - `ui_builder`: Creates keyboards and formats dish cards
//! - `dialogue_manager`: Flow step handlers and final persistence

pub mod callback_handler;
pub mod dialogue_manager;
pub mod message_handler;
pub mod ui_builder;

use std::sync::LazyLock;

use teloxide::types::ChatId;

use crate::caller_gate::CallerGate;

// Re-export main handler functions for use in main.rs
pub use callback_handler::callback_handler;
pub use message_handler::message_handler;

/// Values injected once at process start
#[derive(Clone, Debug)]
pub struct BotConfig {
    /// Technical group that receives dish cards and hosts video uploads
    pub tech_group: Option<ChatId>,
}

/// Shared single-flight gate for both update kinds
pub(crate) static CALLER_GATE: LazyLock<CallerGate> = LazyLock::new(CallerGate::default);
