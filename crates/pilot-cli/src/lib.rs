//! # pilot-cli
//!
//! Command-line interface for Phonepilot.
//!
//! ## Commands
//!
//! - `pilot telegram` — Start the Telegram bot
//! - `pilot lark` — Start the Lark bot (webhook server)
//! - `pilot run <task>` — Run one task from the terminal
//! - `pilot status` — Show connected devices
//! - `pilot init` — Write a default pilot.toml

pub mod commands;

pub use commands::Cli;
