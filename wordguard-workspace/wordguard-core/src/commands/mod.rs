// src/commands/mod.rs
pub mod init;
mod api;

pub use api::{CharReport, Moderator, global, moderate};

pub use init::{InitReport, ensure_initialized_at, ensure_initialized_once, wordguard_root};
