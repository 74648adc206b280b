//! Core domain and application logic for the paid classified-ad bot.
//!
//! Framework-agnostic: the messenger and the database live behind ports
//! (`MessagingPort`, `Store`) implemented in adapter crates.

pub mod allowlist;
pub mod audit;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod lifecycle;
pub mod logging;
pub mod media_group;
pub mod messaging;
pub mod moderation;
pub mod pending;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod submission;
pub mod texts;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
