//! Per-user favorites store.
//!
//! The discovery UI keeps one favorites collection per user and media type.
//! [`FavoritesStore`] is the document-store contract the UI layer talks to;
//! [`SqliteFavorites`] implements it on the local SQLite database.

use crate::db::Database;
use crate::models::{Favorite, MediaType, UserIdentity};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by favorites operations
#[derive(Debug, Error)]
pub enum FavoriteError {
    #[error("Please sign in to manage favorites")]
    SignInRequired,

    #[error("Favorites storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Invalid favorite payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Document-store contract for favorites
pub trait FavoritesStore: Send + Sync {
    fn get_favorite(
        &self,
        user_id: &str,
        media_type: MediaType,
        item_id: u64,
    ) -> Result<Option<Favorite>, FavoriteError>;

    /// Insert or replace a favorite
    fn set_favorite(&self, favorite: &Favorite) -> Result<(), FavoriteError>;

    /// Returns whether a favorite was removed
    fn delete_favorite(
        &self,
        user_id: &str,
        media_type: MediaType,
        item_id: u64,
    ) -> Result<bool, FavoriteError>;

    /// Newest first
    fn list_favorites(
        &self,
        user_id: &str,
        media_type: MediaType,
    ) -> Result<Vec<Favorite>, FavoriteError>;
}

/// Item the user wants to (un)favorite
#[derive(Debug, Clone)]
pub struct FavoriteItem {
    pub media_type: MediaType,
    pub item_id: u64,
    pub title: String,
    pub image_url: Option<String>,
    pub score: Option<f64>,
    pub payload: serde_json::Value,
}

/// Result of [`toggle_favorite`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Added,
    Removed,
}

/// Add the item to the user's favorites, or remove it if already present
pub fn toggle_favorite(
    store: &dyn FavoritesStore,
    user: Option<&UserIdentity>,
    item: FavoriteItem,
) -> Result<ToggleOutcome, FavoriteError> {
    let user = user.ok_or(FavoriteError::SignInRequired)?;

    if store
        .get_favorite(&user.uid, item.media_type, item.item_id)?
        .is_some()
    {
        store.delete_favorite(&user.uid, item.media_type, item.item_id)?;
        info!(
            user = %user.uid,
            media_type = %item.media_type,
            item_id = item.item_id,
            "Removed from favorites"
        );
        return Ok(ToggleOutcome::Removed);
    }

    let favorite = Favorite {
        user_id: user.uid.clone(),
        media_type: item.media_type,
        item_id: item.item_id,
        title: item.title,
        image_url: item.image_url,
        score: item.score,
        added_at: Utc::now(),
        payload: item.payload,
    };
    store.set_favorite(&favorite)?;

    info!(
        user = %user.uid,
        media_type = %favorite.media_type,
        item_id = favorite.item_id,
        "Added to favorites"
    );
    Ok(ToggleOutcome::Added)
}

/// SQLite-backed favorites store
pub struct SqliteFavorites {
    db: Mutex<Database>,
}

impl SqliteFavorites {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }
}

impl FavoritesStore for SqliteFavorites {
    fn get_favorite(
        &self,
        user_id: &str,
        media_type: MediaType,
        item_id: u64,
    ) -> Result<Option<Favorite>, FavoriteError> {
        let db = self.db.lock();
        let row = db
            .conn()
            .query_row(
                "SELECT user_id, media_type, item_id, title, image_url, score, added_at, payload
                 FROM favorites
                 WHERE user_id = ?1 AND media_type = ?2 AND item_id = ?3",
                params![user_id, media_type.as_str(), item_id as i64],
                row_to_favorite,
            )
            .optional()?;

        row.map(|(favorite, payload)| finish(favorite, &payload))
            .transpose()
    }

    fn set_favorite(&self, favorite: &Favorite) -> Result<(), FavoriteError> {
        let payload = serde_json::to_string(&favorite.payload)?;
        let db = self.db.lock();
        db.conn().execute(
            "INSERT OR REPLACE INTO favorites (
                user_id, media_type, item_id, title, image_url, score, added_at, payload
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                favorite.user_id,
                favorite.media_type.as_str(),
                favorite.item_id as i64,
                favorite.title,
                favorite.image_url,
                favorite.score,
                favorite.added_at,
                payload,
            ],
        )?;

        debug!(
            user = %favorite.user_id,
            media_type = %favorite.media_type,
            item_id = favorite.item_id,
            "Favorite stored"
        );
        Ok(())
    }

    fn delete_favorite(
        &self,
        user_id: &str,
        media_type: MediaType,
        item_id: u64,
    ) -> Result<bool, FavoriteError> {
        let db = self.db.lock();
        let deleted = db.conn().execute(
            "DELETE FROM favorites WHERE user_id = ?1 AND media_type = ?2 AND item_id = ?3",
            params![user_id, media_type.as_str(), item_id as i64],
        )?;
        Ok(deleted > 0)
    }

    fn list_favorites(
        &self,
        user_id: &str,
        media_type: MediaType,
    ) -> Result<Vec<Favorite>, FavoriteError> {
        let db = self.db.lock();
        let mut stmt = db.conn().prepare(
            "SELECT user_id, media_type, item_id, title, image_url, score, added_at, payload
             FROM favorites
             WHERE user_id = ?1 AND media_type = ?2
             ORDER BY added_at DESC, rowid DESC",
        )?;

        let rows = stmt
            .query_map(params![user_id, media_type.as_str()], row_to_favorite)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(favorite, payload)| finish(favorite, &payload))
            .collect()
    }
}

/// Helper: Convert a database row to a Favorite plus its raw payload text
fn row_to_favorite(row: &rusqlite::Row) -> rusqlite::Result<(Favorite, String)> {
    let media_type: String = row.get(1)?;
    let media_type = media_type.parse::<MediaType>().map_err(|e: anyhow::Error| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
    })?;

    let favorite = Favorite {
        user_id: row.get(0)?,
        media_type,
        item_id: row.get::<_, i64>(2)? as u64,
        title: row.get(3)?,
        image_url: row.get(4)?,
        score: row.get(5)?,
        added_at: row.get::<_, DateTime<Utc>>(6)?,
        payload: serde_json::Value::Null,
    };

    Ok((favorite, row.get(7)?))
}

fn finish(mut favorite: Favorite, payload: &str) -> Result<Favorite, FavoriteError> {
    favorite.payload = serde_json::from_str(payload)?;
    Ok(favorite)
}
