//! Moderator identity and the submission visibility state machine.

pub mod engine;
pub mod identity;

pub use engine::{ModerationEngine, ModerationError};
pub use identity::{AccessDenied, Actor, ModeratorDirectory, StaticModerators};
