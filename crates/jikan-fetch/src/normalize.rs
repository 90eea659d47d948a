//! Normalization of upstream record lists.
//!
//! Upstream pages can repeat a record (an anime airing in two seasons shows up
//! twice in a season listing) and can carry records without an identifier.
//! Normalizing drops the unusable records, removes duplicates keeping the
//! first occurrence, attaches a composite key and applies a stable sort.

use crate::api::types::{CharacterRole, MediaEntry, Pagination};
use crate::api::FetchError;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::str::FromStr;

/// Sort order applied after deduplication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Members, descending
    Popularity,
    /// Score, descending
    Score,
    /// Title, ascending and case-insensitive
    Title,
    /// Keep upstream order
    #[default]
    Unspecified,
}

impl FromStr for SortKey {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "popularity" | "members" => Ok(SortKey::Popularity),
            "score" => Ok(SortKey::Score),
            "title" => Ok(SortKey::Title),
            "upstream" | "none" => Ok(SortKey::Unspecified),
            _ => Err(FetchError::InvalidRequest(format!("unknown sort key: {}", s))),
        }
    }
}

/// Media record plus its composite key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub unique_key: String,
    #[serde(flatten)]
    pub entry: MediaEntry,
}

/// Character record plus its composite key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedCharacter {
    pub unique_key: String,
    #[serde(flatten)]
    pub role: CharacterRole,
}

/// One page of normalized results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub has_next_page: bool,
    pub next_page: Option<u32>,
}

impl<T> PaginatedResult<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_next_page: false,
            next_page: None,
        }
    }

    /// Attach pagination metadata; the next page follows the upstream's
    /// current page, or the requested one when the upstream omits it
    pub fn from_page(items: Vec<T>, pagination: Option<&Pagination>, requested_page: u32) -> Self {
        let has_next_page = pagination.map_or(false, |p| p.has_next_page);
        let current = pagination
            .and_then(|p| p.current_page)
            .unwrap_or(requested_page);

        Self {
            items,
            has_next_page,
            next_page: has_next_page.then(|| current.saturating_add(1)),
        }
    }
}

impl<T> Default for PaginatedResult<T> {
    fn default() -> Self {
        Self::empty()
    }
}

/// `{id}-{type}-{season}-{year}`, missing parts left empty
pub fn unique_key(entry: &MediaEntry) -> Option<String> {
    let id = entry.mal_id?;
    Some(format!(
        "{}-{}-{}-{}",
        id,
        entry.kind.as_deref().unwrap_or_default(),
        entry.season.as_deref().unwrap_or_default(),
        entry.year.map(|y| y.to_string()).unwrap_or_default(),
    ))
}

/// Drop records without an id, dedupe (first wins), key and sort
pub fn normalize(raw: Vec<MediaEntry>, sort: SortKey) -> Vec<NormalizedRecord> {
    let mut seen = HashSet::new();
    let mut records: Vec<NormalizedRecord> = raw
        .into_iter()
        .filter_map(|entry| {
            let unique_key = unique_key(&entry)?;
            seen.insert(unique_key.clone())
                .then_some(NormalizedRecord { unique_key, entry })
        })
        .collect();

    // Vec::sort_by is stable
    match sort {
        SortKey::Popularity => records.sort_by(|a, b| {
            b.entry
                .members
                .unwrap_or(0)
                .cmp(&a.entry.members.unwrap_or(0))
        }),
        SortKey::Score => records.sort_by(|a, b| {
            b.entry
                .score
                .unwrap_or(0.0)
                .total_cmp(&a.entry.score.unwrap_or(0.0))
        }),
        SortKey::Title => records.sort_by(|a, b| compare_titles(&a.entry, &b.entry)),
        SortKey::Unspecified => {}
    }

    records
}

fn compare_titles(a: &MediaEntry, b: &MediaEntry) -> Ordering {
    a.display_title()
        .to_lowercase()
        .cmp(&b.display_title().to_lowercase())
}

fn role_rank(role: &str) -> u8 {
    match role {
        "Main" => 0,
        "Supporting" => 1,
        _ => 2,
    }
}

/// Dedupe characters on (character id, role) and order Main, Supporting, rest
pub fn normalize_characters(raw: Vec<CharacterRole>) -> Vec<NormalizedCharacter> {
    let mut seen = HashSet::new();
    let mut characters: Vec<NormalizedCharacter> = raw
        .into_iter()
        .filter_map(|role| {
            let id = role.character.mal_id?;
            let unique_key = format!("{}-{}", id, role.role);
            seen.insert(unique_key.clone())
                .then_some(NormalizedCharacter { unique_key, role })
        })
        .collect();

    characters.sort_by_key(|c| role_rank(&c.role.role));
    characters
}

/// Client-side narrowing used when browsing season listings
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Genre name, case-insensitive
    pub genre: Option<String>,
    /// Media format such as "TV" or "Movie", case-insensitive
    pub kind: Option<String>,
    /// Hide R+/Rx rated entries
    pub exclude_adult: bool,
}

impl RecordFilter {
    pub fn is_empty(&self) -> bool {
        self.genre.is_none() && self.kind.is_none() && !self.exclude_adult
    }

    pub fn matches(&self, entry: &MediaEntry) -> bool {
        if let Some(genre) = &self.genre {
            if !entry
                .genres
                .iter()
                .any(|g| g.name.eq_ignore_ascii_case(genre))
            {
                return false;
            }
        }

        if let Some(kind) = &self.kind {
            match &entry.kind {
                Some(k) if k.eq_ignore_ascii_case(kind) => {}
                _ => return false,
            }
        }

        !(self.exclude_adult && is_adult(entry))
    }

    pub fn apply(&self, records: Vec<NormalizedRecord>) -> Vec<NormalizedRecord> {
        if self.is_empty() {
            return records;
        }
        records
            .into_iter()
            .filter(|r| self.matches(&r.entry))
            .collect()
    }
}

/// "R - 17+", "R+ - Mild Nudity" and "Rx - Hentai"
fn is_adult(entry: &MediaEntry) -> bool {
    entry
        .rating
        .as_deref()
        .map_or(false, |r| r.starts_with("R -") || r.starts_with("R+") || r.starts_with("Rx"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{CharacterRef, NamedEntity};

    fn entry(id: Option<u64>, score: Option<f64>) -> MediaEntry {
        MediaEntry {
            mal_id: id,
            score,
            ..Default::default()
        }
    }

    fn titled(id: u64, title: &str, members: Option<u64>) -> MediaEntry {
        MediaEntry {
            mal_id: Some(id),
            title: Some(title.to_string()),
            members,
            ..Default::default()
        }
    }

    fn ids(records: &[NormalizedRecord]) -> Vec<u64> {
        records.iter().filter_map(|r| r.entry.mal_id).collect()
    }

    fn character(id: u64, role: &str) -> CharacterRole {
        CharacterRole {
            character: CharacterRef {
                mal_id: Some(id),
                name: format!("Character {}", id),
                ..Default::default()
            },
            role: role.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_score_sort_treats_missing_as_zero() {
        let raw = vec![entry(Some(1), Some(5.0)), entry(Some(2), Some(9.0)), entry(Some(3), None)];
        assert_eq!(ids(&normalize(raw, SortKey::Score)), vec![2, 1, 3]);
    }

    #[test]
    fn test_popularity_sort() {
        let raw = vec![
            titled(1, "a", Some(10)),
            titled(2, "b", None),
            titled(3, "c", Some(500)),
        ];
        assert_eq!(ids(&normalize(raw, SortKey::Popularity)), vec![3, 1, 2]);
    }

    #[test]
    fn test_title_sort_is_case_insensitive() {
        let raw = vec![
            titled(1, "naruto", None),
            titled(2, "Bleach", None),
            titled(3, "akira", None),
        ];
        assert_eq!(ids(&normalize(raw, SortKey::Title)), vec![3, 2, 1]);
    }

    #[test]
    fn test_unspecified_keeps_upstream_order() {
        let raw = vec![entry(Some(3), Some(1.0)), entry(Some(1), Some(9.0))];
        assert_eq!(ids(&normalize(raw, SortKey::Unspecified)), vec![3, 1]);
    }

    #[test]
    fn test_sort_key_parse() {
        assert_eq!("Score".parse::<SortKey>().unwrap(), SortKey::Score);
        assert_eq!("members".parse::<SortKey>().unwrap(), SortKey::Popularity);
        assert_eq!("upstream".parse::<SortKey>().unwrap(), SortKey::Unspecified);
        assert!("scroe".parse::<SortKey>().is_err());
    }

    #[test]
    fn test_sort_is_stable() {
        let raw = vec![
            titled(1, "x", Some(7)),
            titled(2, "y", Some(7)),
            titled(3, "z", Some(7)),
        ];
        assert_eq!(ids(&normalize(raw, SortKey::Popularity)), vec![1, 2, 3]);
    }

    #[test]
    fn test_dedupe_keeps_first_and_drops_missing_ids() {
        let mut first = titled(1, "first", None);
        first.season = Some("spring".to_string());
        first.year = Some(2024);
        let mut repeat = first.clone();
        repeat.title = Some("repeat".to_string());

        let raw = vec![first, entry(None, Some(9.9)), repeat];
        let records = normalize(raw.clone(), SortKey::Unspecified);

        assert!(records.len() <= raw.len());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entry.title.as_deref(), Some("first"));
        assert_eq!(records[0].unique_key, "1--spring-2024");
    }

    #[test]
    fn test_same_id_different_season_kept() {
        let mut spring = titled(1, "show", None);
        spring.season = Some("spring".to_string());
        let mut summer = spring.clone();
        summer.season = Some("summer".to_string());

        let records = normalize(vec![spring, summer], SortKey::Unspecified);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_keys_unique_and_idempotent() {
        let raw: Vec<MediaEntry> = (0..40u64)
            .map(|i| entry(Some(i % 13), Some((i % 7) as f64)))
            .collect();

        let once = normalize(raw.clone(), SortKey::Score);
        let again = normalize(raw, SortKey::Score);
        assert_eq!(once, again);

        let keys: HashSet<&str> = once.iter().map(|r| r.unique_key.as_str()).collect();
        assert_eq!(keys.len(), once.len());

        let renormalized = normalize(
            once.iter().map(|r| r.entry.clone()).collect(),
            SortKey::Score,
        );
        assert_eq!(renormalized, once);
    }

    #[test]
    fn test_empty_input() {
        assert!(normalize(Vec::new(), SortKey::Title).is_empty());
        assert!(normalize_characters(Vec::new()).is_empty());
    }

    #[test]
    fn test_characters_dedupe_and_role_order() {
        let raw = vec![
            character(1, "Supporting"),
            character(2, "Main"),
            character(1, "Supporting"),
        ];
        let keys: Vec<String> = normalize_characters(raw)
            .into_iter()
            .map(|c| c.unique_key)
            .collect();
        assert_eq!(keys, vec!["2-Main", "1-Supporting"]);
    }

    #[test]
    fn test_characters_other_roles_last_and_stable() {
        let raw = vec![
            character(5, "Background"),
            character(6, "Supporting"),
            character(7, "Main"),
            character(8, "Main"),
        ];
        let keys: Vec<String> = normalize_characters(raw)
            .into_iter()
            .map(|c| c.unique_key)
            .collect();
        assert_eq!(keys, vec!["7-Main", "8-Main", "6-Supporting", "5-Background"]);
    }

    #[test]
    fn test_pagination() {
        let pagination = Pagination {
            has_next_page: true,
            current_page: Some(3),
            ..Default::default()
        };
        let page = PaginatedResult::from_page(vec![1, 2], Some(&pagination), 1);
        assert_eq!(page.next_page, Some(4));

        let last = PaginatedResult::from_page(vec![1], None, 2);
        assert!(!last.has_next_page);
        assert_eq!(last.next_page, None);
    }

    #[test]
    fn test_record_filter() {
        let mut action_tv = titled(1, "a", None);
        action_tv.kind = Some("TV".to_string());
        action_tv.rating = Some("PG-13 - Teens 13 or older".to_string());
        action_tv.genres = vec![NamedEntity {
            name: "Action".to_string(),
            ..Default::default()
        }];

        let mut adult_movie = titled(2, "b", None);
        adult_movie.kind = Some("Movie".to_string());
        adult_movie.rating = Some("R - 17+ (violence & profanity)".to_string());

        let records = normalize(vec![action_tv, adult_movie], SortKey::Unspecified);

        let genre = RecordFilter {
            genre: Some("action".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(&genre.apply(records.clone())), vec![1]);

        let kind = RecordFilter {
            kind: Some("movie".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(&kind.apply(records.clone())), vec![2]);

        let safe = RecordFilter {
            exclude_adult: true,
            ..Default::default()
        };
        assert_eq!(ids(&safe.apply(records.clone())), vec![1]);

        assert_eq!(RecordFilter::default().apply(records.clone()), records);
    }
}
