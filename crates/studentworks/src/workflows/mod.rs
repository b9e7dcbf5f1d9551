//! Submission moderation and application lifecycle for the student job board.

pub mod applications;
pub mod attachments;
mod board;
pub mod moderation;
pub mod notifications;
pub mod router;
pub mod store;
pub mod submissions;
pub mod validation;

pub use board::{Board, BoardError};
pub use router::board_router;
