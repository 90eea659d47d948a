//! Shared library for the anime/manga discovery client.
//!
//! This crate provides common functionality used by the fetch layer and its CLI:
//! - Configuration management
//! - Logging infrastructure
//! - Media and user models
//! - Favorites store and session collaborators

pub mod config;
pub mod db;
pub mod favorites;
pub mod logging;
pub mod models;
pub mod session;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use favorites::{toggle_favorite, FavoriteError, FavoriteItem, FavoritesStore, SqliteFavorites, ToggleOutcome};
pub use logging::LogConfig;
pub use models::*;
pub use session::{LocalSession, SessionProvider};

/// Common result type using anyhow::Error
pub type Result<T> = anyhow::Result<T>;
