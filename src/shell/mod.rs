//! View Shell
//!
//! Chooses between the signed-out prompt and the signed-in screen, and keeps
//! one bookmark list bound to whoever is signed in.

mod app;
mod screen;

pub use app::Shell;
pub use screen::{Screen, DEFAULT_AVATAR};
