//! # Menubot
//!
//! A Telegram bot that lets restaurant chains manage per-restaurant menus
//! and lets waiters browse a paginated dish catalog. Staff self-register
//! through time-limited, single-use invitation links.

pub mod auth;
pub mod bot;
pub mod caller_gate;
pub mod db;
pub mod dialogue;
pub mod errors;
pub mod invites;
pub mod kv;
pub mod media;
pub mod onboarding;
