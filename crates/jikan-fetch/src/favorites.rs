//! Bridge from fetched records to favorites.

use crate::api::types::MediaEntry;
use shared::{FavoriteItem, MediaType};

/// Favorite snapshot of a record; `None` when the record has no id
pub fn favorite_item(media_type: MediaType, entry: &MediaEntry) -> Option<FavoriteItem> {
    let item_id = entry.mal_id?;

    Some(FavoriteItem {
        media_type,
        item_id,
        title: entry.display_title().to_string(),
        image_url: entry.image_url().map(str::to_string),
        score: entry.score,
        payload: serde_json::to_value(entry).unwrap_or_default(),
    })
}
