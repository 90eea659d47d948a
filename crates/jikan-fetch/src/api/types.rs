//! Jikan API v4 response types.
//!
//! Payloads are decoded leniently: every field except the identifier is
//! optional, so one odd record never fails a whole page. Records without a
//! usable identifier are dropped later by the normalizer.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Top-level response wrapper shared by every endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// Pagination metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pagination {
    pub last_visible_page: Option<u32>,
    pub has_next_page: bool,
    pub current_page: Option<u32>,
    pub items: Option<PaginationItems>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationItems {
    pub count: u32,
    pub total: u32,
    pub per_page: u32,
}

/// Anime or manga record as served by list and detail endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaEntry {
    #[serde(deserialize_with = "lenient_id")]
    pub mal_id: Option<u64>,
    pub url: Option<String>,
    pub images: Option<Images>,

    // Titles
    pub title: Option<String>,
    pub title_english: Option<String>,
    pub title_japanese: Option<String>,

    // Type and status
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<String>,
    pub rating: Option<String>,

    // Scores and rankings
    pub score: Option<f64>,
    pub scored_by: Option<u64>,
    pub rank: Option<u64>,
    pub popularity: Option<u64>,
    pub members: Option<u64>,
    pub favorites: Option<u64>,

    // Length
    pub episodes: Option<u32>,
    pub chapters: Option<u32>,
    pub volumes: Option<u32>,

    pub synopsis: Option<String>,

    // Season
    pub season: Option<String>,
    pub year: Option<u32>,

    pub genres: Vec<NamedEntity>,
    pub studios: Vec<NamedEntity>,
}

impl MediaEntry {
    /// Best available title for display and sorting
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .or(self.title_english.as_deref())
            .unwrap_or_default()
    }

    /// Largest available cover image
    pub fn image_url(&self) -> Option<&str> {
        let jpg = self.images.as_ref()?.jpg.as_ref()?;
        jpg.large_image_url
            .as_deref()
            .or(jpg.image_url.as_deref())
    }
}

/// Image variants
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Images {
    pub jpg: Option<ImageSet>,
    pub webp: Option<ImageSet>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSet {
    pub image_url: Option<String>,
    pub small_image_url: Option<String>,
    pub large_image_url: Option<String>,
}

/// MAL entity (genre, studio, person, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamedEntity {
    #[serde(deserialize_with = "lenient_id")]
    pub mal_id: Option<u64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub name: String,
    pub url: Option<String>,
}

/// One entry of `/recommendations/{type}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Recommendation {
    /// Pair id such as "1-5114", not a media id
    pub mal_id: Option<String>,
    pub entry: Vec<MediaEntry>,
    pub content: Option<String>,
    pub date: Option<String>,
}

/// One entry of `/{type}/{id}/characters`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterRole {
    pub character: CharacterRef,
    pub role: String,
    pub favorites: Option<u64>,
    pub voice_actors: Vec<VoiceActor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterRef {
    #[serde(deserialize_with = "lenient_id")]
    pub mal_id: Option<u64>,
    pub url: Option<String>,
    pub images: Option<Images>,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceActor {
    pub person: NamedEntity,
    pub language: Option<String>,
}

/// `/{type}/{id}/statistics`; manga uses reading/plan_to_read
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Statistics {
    #[serde(alias = "reading")]
    pub watching: Option<u64>,
    pub completed: Option<u64>,
    pub on_hold: Option<u64>,
    pub dropped: Option<u64>,
    #[serde(alias = "plan_to_read")]
    pub plan_to_watch: Option<u64>,
    pub total: Option<u64>,
    pub scores: Vec<ScoreBucket>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreBucket {
    pub score: u8,
    pub votes: u64,
    pub percentage: f64,
}

/// One year of `/seasons`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeasonArchive {
    pub year: u32,
    pub seasons: Vec<String>,
}

/// Genre/Theme/Demographic item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Genre {
    pub mal_id: u64,
    pub name: String,
    pub url: Option<String>,
    pub count: u64,
}

/// Accepts numeric ids, numeric strings and null; anything else is "no id"
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_media_entry_lenient_decode() {
        let entry: MediaEntry = serde_json::from_value(json!({
            "mal_id": 5114,
            "title": "Fullmetal Alchemist: Brotherhood",
            "type": "TV",
            "score": 9.1,
            "members": 3400000,
            "season": "spring",
            "year": 2009,
            "genres": [{ "mal_id": 1, "type": "anime", "name": "Action", "url": "x" }],
            "unknown_field": { "ignored": true }
        }))
        .unwrap();

        assert_eq!(entry.mal_id, Some(5114));
        assert_eq!(entry.kind.as_deref(), Some("TV"));
        assert_eq!(entry.genres[0].name, "Action");
        assert_eq!(entry.display_title(), "Fullmetal Alchemist: Brotherhood");
    }

    #[test]
    fn test_identifier_variants() {
        let from_string: MediaEntry = serde_json::from_value(json!({ "mal_id": "42" })).unwrap();
        assert_eq!(from_string.mal_id, Some(42));

        let from_null: MediaEntry = serde_json::from_value(json!({ "mal_id": null })).unwrap();
        assert_eq!(from_null.mal_id, None);

        let missing: MediaEntry = serde_json::from_value(json!({ "title": "x" })).unwrap();
        assert_eq!(missing.mal_id, None);

        let garbage: MediaEntry = serde_json::from_value(json!({ "mal_id": "1-2" })).unwrap();
        assert_eq!(garbage.mal_id, None);
    }

    #[test]
    fn test_manga_statistics_aliases() {
        let stats: Statistics = serde_json::from_value(json!({
            "reading": 10,
            "completed": 20,
            "plan_to_read": 5,
            "total": 35,
            "scores": [{ "score": 10, "votes": 3, "percentage": 60.0 }]
        }))
        .unwrap();

        assert_eq!(stats.watching, Some(10));
        assert_eq!(stats.plan_to_watch, Some(5));
        assert_eq!(stats.scores.len(), 1);
    }

    #[test]
    fn test_image_url_prefers_large() {
        let entry: MediaEntry = serde_json::from_value(json!({
            "mal_id": 1,
            "images": { "jpg": { "image_url": "small.jpg", "large_image_url": "large.jpg" } }
        }))
        .unwrap();
        assert_eq!(entry.image_url(), Some("large.jpg"));
    }
}
