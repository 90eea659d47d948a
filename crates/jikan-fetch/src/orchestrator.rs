//! Fetch orchestrator.
//!
//! Every accessor follows the same path: build a fingerprint, answer from a
//! fresh cache entry when there is one, otherwise queue the upstream call.
//! Successful payloads are cached raw and normalized on the way out. A rate
//! limit bumps the shared backoff and falls back to a stale cache entry, or
//! to a neutral empty result when there is none. Any other failure yields the
//! empty result and leaves the backoff alone.
//!
//! Accessors never fail: the outcome is reported through [`DataSource`] on
//! the result and through [`Notice`]s on a broadcast side channel.

use crate::api::types::{
    CharacterRole, Envelope, Genre, MediaEntry, Recommendation, SeasonArchive, Statistics,
};
use crate::api::{
    BackoffController, FailureKind, FetchError, JikanClient, RequestQueue, SharedBackoff, Upstream,
};
use crate::cache::{CacheOptions, TtlCache, TtlClass, TtlPolicy};
use crate::fingerprint::Fingerprint;
use crate::normalize::{
    normalize, normalize_characters, NormalizedCharacter, NormalizedRecord, PaginatedResult,
    SortKey,
};
use chrono::{DateTime, Datelike, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{Config, MediaType, Season};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// First year with catalogued anime seasons
const MIN_SEASON_YEAR: i32 = 1917;

/// Notices kept for slow subscribers
const NOTICE_CAPACITY: usize = 64;

/// Where an accessor's data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Fresh upstream response
    Network,
    /// Fresh cache entry, no request made
    Cache,
    /// Expired cache entry served because the upstream was rate limiting
    StaleFallback,
    /// Neutral empty result after a failure of the given kind
    Degraded(FailureKind),
    /// Nothing to ask for (blank search); empty result, no request made
    Skipped,
}

/// Accessor result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fetched<T> {
    pub data: T,
    pub source: DataSource,
}

impl<T> Fetched<T> {
    pub fn is_degraded(&self) -> bool {
        matches!(self.source, DataSource::Degraded(_))
    }

    /// Transform the payload, keeping the source
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        Fetched {
            data: f(self.data),
            source: self.source,
        }
    }
}

impl<T: Default> Fetched<T> {
    fn empty(source: DataSource) -> Self {
        Self {
            data: T::default(),
            source,
        }
    }
}

/// Observational events for whoever displays status to the user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    /// Rate limited; showing data stored at `stored_at`
    UsingCachedData {
        request: String,
        stored_at: DateTime<Utc>,
    },
    /// Rate limited with nothing cached to show
    RateLimited { request: String },
    /// Request failed for a reason other than rate limiting
    RequestFailed {
        request: String,
        kind: FailureKind,
        message: String,
    },
}

/// Paging and ordering of list accessors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery {
    pub page: u32,
    pub sort: SortKey,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            sort: SortKey::Unspecified,
        }
    }
}

impl ListQuery {
    pub fn page(page: u32) -> Self {
        Self {
            page,
            ..Default::default()
        }
    }

    pub fn sorted(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }
}

/// Search ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchSort {
    #[default]
    Popularity,
    Score,
    Title,
    StartDate,
}

impl SearchSort {
    /// Upstream `order_by` and `sort` parameters
    fn upstream_order(&self) -> (&'static str, &'static str) {
        match self {
            // Popularity is a rank, 1 being the most popular
            SearchSort::Popularity => ("popularity", "asc"),
            SearchSort::Score => ("score", "desc"),
            SearchSort::Title => ("title", "asc"),
            SearchSort::StartDate => ("start_date", "desc"),
        }
    }

    fn sort_key(&self) -> SortKey {
        match self {
            SearchSort::Popularity => SortKey::Popularity,
            SearchSort::Score => SortKey::Score,
            SearchSort::Title => SortKey::Title,
            SearchSort::StartDate => SortKey::Unspecified,
        }
    }
}

impl FromStr for SearchSort {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "popularity" => Ok(SearchSort::Popularity),
            "score" => Ok(SearchSort::Score),
            "title" => Ok(SearchSort::Title),
            "start_date" | "start-date" | "date" => Ok(SearchSort::StartDate),
            _ => Err(FetchError::InvalidRequest(format!("unknown search sort: {}", s))),
        }
    }
}

/// Airing/publishing status filter for search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    Airing,
    Publishing,
    Complete,
    Hiatus,
    Discontinued,
    Upcoming,
}

impl SearchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStatus::Airing => "airing",
            SearchStatus::Publishing => "publishing",
            SearchStatus::Complete => "complete",
            SearchStatus::Hiatus => "hiatus",
            SearchStatus::Discontinued => "discontinued",
            SearchStatus::Upcoming => "upcoming",
        }
    }
}

impl FromStr for SearchStatus {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "airing" => Ok(SearchStatus::Airing),
            "publishing" => Ok(SearchStatus::Publishing),
            "complete" | "completed" | "finished" => Ok(SearchStatus::Complete),
            "hiatus" => Ok(SearchStatus::Hiatus),
            "discontinued" => Ok(SearchStatus::Discontinued),
            "upcoming" => Ok(SearchStatus::Upcoming),
            _ => Err(FetchError::InvalidRequest(format!("unknown status: {}", s))),
        }
    }
}

/// Search request
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub media_type: MediaType,
    pub query: String,
    pub sort: SearchSort,
    pub status: Option<SearchStatus>,
    pub page: u32,
}

impl SearchParams {
    pub fn new(media_type: MediaType, query: impl Into<String>) -> Self {
        Self {
            media_type,
            query: query.into(),
            sort: SearchSort::default(),
            status: None,
            page: 1,
        }
    }
}

/// `/top/{type}` filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopFilter {
    Airing,
    Upcoming,
    ByPopularity,
    Favorite,
    Publishing,
}

impl TopFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopFilter::Airing => "airing",
            TopFilter::Upcoming => "upcoming",
            TopFilter::ByPopularity => "bypopularity",
            TopFilter::Favorite => "favorite",
            TopFilter::Publishing => "publishing",
        }
    }
}

impl FromStr for TopFilter {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "airing" => Ok(TopFilter::Airing),
            "upcoming" => Ok(TopFilter::Upcoming),
            "bypopularity" | "popularity" => Ok(TopFilter::ByPopularity),
            "favorite" | "favorites" => Ok(TopFilter::Favorite),
            "publishing" => Ok(TopFilter::Publishing),
            _ => Err(FetchError::InvalidRequest(format!("unknown top filter: {}", s))),
        }
    }
}

/// `/genres/{type}` filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenreFilter {
    Genres,
    ExplicitGenres,
    Themes,
    Demographics,
}

impl GenreFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenreFilter::Genres => "genres",
            GenreFilter::ExplicitGenres => "explicit_genres",
            GenreFilter::Themes => "themes",
            GenreFilter::Demographics => "demographics",
        }
    }
}

impl FromStr for GenreFilter {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "genres" => Ok(GenreFilter::Genres),
            "explicit_genres" | "explicit" => Ok(GenreFilter::ExplicitGenres),
            "themes" => Ok(GenreFilter::Themes),
            "demographics" => Ok(GenreFilter::Demographics),
            _ => Err(FetchError::InvalidRequest(format!("unknown genre filter: {}", s))),
        }
    }
}

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub ttl: TtlPolicy,
    pub backoff: BackoffController,
    /// Upper bound for one queued upstream call, retries included
    pub request_timeout: Duration,
    /// `limit` sent to paginated endpoints
    pub page_limit: Option<u32>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            ttl: TtlPolicy::default(),
            backoff: BackoffController::default(),
            request_timeout: Duration::from_secs(15),
            page_limit: Some(24),
        }
    }
}

impl FetchSettings {
    pub fn from_config(config: &Config) -> Self {
        let cache = &config.cache;
        Self {
            ttl: TtlPolicy {
                static_ttl: Duration::from_secs(cache.static_ttl_seconds),
                seasonal_ttl: Duration::from_secs(cache.seasonal_ttl_seconds),
                dynamic_ttl: Duration::from_secs(cache.dynamic_ttl_seconds),
            },
            backoff: BackoffController::new(
                Duration::from_millis(config.backoff.base_delay_ms),
                Duration::from_millis(config.backoff.max_delay_ms),
                config.backoff.success_decay,
            ),
            request_timeout: JikanClient::request_budget(&config.api),
            page_limit: config.api.page_limit,
        }
    }
}

/// Cached, paced, rate-limit aware access to the Jikan API
pub struct FetchOrchestrator {
    upstream: Arc<dyn Upstream>,
    cache: Arc<TtlCache>,
    backoff: SharedBackoff,
    queue: RequestQueue,
    ttl: TtlPolicy,
    page_limit: Option<u32>,
    notices: broadcast::Sender<Notice>,
}

impl FetchOrchestrator {
    /// Create an orchestrator and spawn its request queue.
    /// Must be called inside a tokio runtime.
    pub fn new(upstream: Arc<dyn Upstream>, cache: Arc<TtlCache>, settings: FetchSettings) -> Self {
        let backoff = SharedBackoff::new(settings.backoff);
        let queue = RequestQueue::spawn(backoff.clone(), settings.request_timeout);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        Self {
            upstream,
            cache,
            backoff,
            queue,
            ttl: settings.ttl,
            page_limit: settings.page_limit,
            notices,
        }
    }

    /// Wire the HTTP client and cache described by `config`
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = JikanClient::from_config(&config.api)?;
        let cache = TtlCache::new(CacheOptions {
            max_entries: config.cache.max_entries,
            stale_grace: Duration::from_secs(config.cache.stale_grace_seconds),
            persist_dir: config.cache.persist.then(|| config.cache_dir()),
        });

        Ok(Self::new(
            Arc::new(client),
            Arc::new(cache),
            FetchSettings::from_config(config),
        ))
    }

    /// Receive notices published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    pub fn backoff(&self) -> &SharedBackoff {
        &self.backoff
    }

    // ---- Accessors ----

    /// Years and seasons with catalogued anime
    pub async fn season_list(&self) -> Fetched<Vec<SeasonArchive>> {
        info!("Fetching season archive");
        self.fetch(Fingerprint::new("/seasons"), TtlClass::Static, |value| {
            decode_items(&envelope(value)?.data)
        })
        .await
    }

    /// Anime airing in `season` of `year`
    pub async fn season(
        &self,
        year: i32,
        season: Season,
        query: ListQuery,
    ) -> Fetched<PaginatedResult<NormalizedRecord>> {
        info!(year = year, season = %season, page = query.page, "Fetching season");

        let latest = Utc::now().year() + 1;
        if !(MIN_SEASON_YEAR..=latest).contains(&year) {
            self.notify(Notice::RequestFailed {
                request: format!("/seasons/{}/{}", year, season),
                kind: FailureKind::Client,
                message: format!("year must be between {} and {}", MIN_SEASON_YEAR, latest),
            });
            return Fetched::empty(DataSource::Degraded(FailureKind::Client));
        }

        let fingerprint = self.paged(format!("/seasons/{}/{}", year, season), query.page);
        self.fetch_page(fingerprint, TtlClass::Seasonal, query).await
    }

    /// Anime airing this season
    pub async fn season_now(&self, query: ListQuery) -> Fetched<PaginatedResult<NormalizedRecord>> {
        info!(page = query.page, "Fetching current season");
        let fingerprint = self.paged("/seasons/now", query.page);
        self.fetch_page(fingerprint, TtlClass::Seasonal, query).await
    }

    /// Anime announced for next season
    pub async fn season_upcoming(
        &self,
        query: ListQuery,
    ) -> Fetched<PaginatedResult<NormalizedRecord>> {
        info!(page = query.page, "Fetching upcoming season");
        let fingerprint = self.paged("/seasons/upcoming", query.page);
        self.fetch_page(fingerprint, TtlClass::Seasonal, query).await
    }

    /// Title search; a blank query makes no request
    pub async fn search(&self, params: &SearchParams) -> Fetched<PaginatedResult<NormalizedRecord>> {
        let query = params.query.trim();
        if query.is_empty() {
            debug!("Blank search query, skipping request");
            return Fetched::empty(DataSource::Skipped);
        }

        info!(media_type = %params.media_type, query = query, page = params.page, "Searching");

        let (order_by, sort) = params.sort.upstream_order();
        let fingerprint = self
            .paged(format!("/{}", params.media_type), params.page)
            .param("q", query)
            .param("order_by", order_by)
            .param("sort", sort)
            .param_opt("status", params.status.map(|s| s.as_str()));

        let list = ListQuery::page(params.page).sorted(params.sort.sort_key());
        self.fetch_page(fingerprint, TtlClass::Dynamic, list).await
    }

    /// Top-ranked entries, optionally filtered
    pub async fn top(
        &self,
        media_type: MediaType,
        page: u32,
        filter: Option<TopFilter>,
    ) -> Fetched<PaginatedResult<NormalizedRecord>> {
        info!(media_type = %media_type, page = page, filter = ?filter, "Fetching top list");
        let fingerprint = self
            .paged(format!("/top/{}", media_type), page)
            .param_opt("filter", filter.map(|f| f.as_str()));
        self.fetch_page(fingerprint, TtlClass::Seasonal, ListQuery::page(page))
            .await
    }

    /// Recent user recommendations, flattened to the recommended entries
    pub async fn recommendations(
        &self,
        media_type: MediaType,
        page: u32,
    ) -> Fetched<PaginatedResult<NormalizedRecord>> {
        info!(media_type = %media_type, page = page, "Fetching recommendations");
        let page = page.max(1);
        let fingerprint = Fingerprint::new(format!("/recommendations/{}", media_type)).param("page", page);

        self.fetch(fingerprint, TtlClass::Dynamic, |value| {
            let envelope = envelope(value)?;
            let entries: Vec<MediaEntry> = decode_items::<Recommendation>(&envelope.data)?
                .into_iter()
                .flat_map(|r| r.entry)
                .collect();
            Ok(PaginatedResult::from_page(
                normalize(entries, SortKey::Unspecified),
                envelope.pagination.as_ref(),
                page,
            ))
        })
        .await
    }

    /// One random entry
    pub async fn random(&self, media_type: MediaType) -> Fetched<Option<MediaEntry>> {
        info!(media_type = %media_type, "Fetching random entry");
        let fingerprint = Fingerprint::new(format!("/random/{}", media_type));
        self.fetch(fingerprint, TtlClass::Dynamic, |value| {
            decode_object(&envelope(value)?.data)
        })
        .await
    }

    /// Full record for one entry
    pub async fn details(&self, media_type: MediaType, id: u64) -> Fetched<Option<MediaEntry>> {
        info!(media_type = %media_type, id = id, "Fetching details");
        let fingerprint = Fingerprint::new(format!("/{}/{}/full", media_type, id));
        self.fetch(fingerprint, TtlClass::Static, |value| {
            decode_object(&envelope(value)?.data)
        })
        .await
    }

    /// Characters of one entry, main roles first
    pub async fn characters(
        &self,
        media_type: MediaType,
        id: u64,
    ) -> Fetched<Vec<NormalizedCharacter>> {
        info!(media_type = %media_type, id = id, "Fetching characters");
        let fingerprint = Fingerprint::new(format!("/{}/{}/characters", media_type, id));
        self.fetch(fingerprint, TtlClass::Static, |value| {
            let roles = decode_items::<CharacterRole>(&envelope(value)?.data)?;
            Ok(normalize_characters(roles))
        })
        .await
    }

    /// List-status and score statistics of one entry
    pub async fn statistics(&self, media_type: MediaType, id: u64) -> Fetched<Option<Statistics>> {
        info!(media_type = %media_type, id = id, "Fetching statistics");
        let fingerprint = Fingerprint::new(format!("/{}/{}/statistics", media_type, id));
        self.fetch(fingerprint, TtlClass::Static, |value| {
            decode_object(&envelope(value)?.data)
        })
        .await
    }

    /// Genres, themes or demographics, sorted by name
    pub async fn genres(
        &self,
        media_type: MediaType,
        filter: Option<GenreFilter>,
    ) -> Fetched<Vec<Genre>> {
        info!(media_type = %media_type, filter = ?filter, "Fetching genres");
        let fingerprint = Fingerprint::new(format!("/genres/{}", media_type))
            .param_opt("filter", filter.map(|f| f.as_str()));
        self.fetch(fingerprint, TtlClass::Static, |value| {
            let mut genres = decode_items::<Genre>(&envelope(value)?.data)?;
            genres.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
            Ok(genres)
        })
        .await
    }

    // ---- Internals ----

    fn paged(&self, endpoint: impl Into<String>, page: u32) -> Fingerprint {
        Fingerprint::new(endpoint)
            .param("page", page.max(1))
            .param_opt("limit", self.page_limit)
    }

    async fn fetch_page(
        &self,
        fingerprint: Fingerprint,
        class: TtlClass,
        query: ListQuery,
    ) -> Fetched<PaginatedResult<NormalizedRecord>> {
        let page = query.page.max(1);
        self.fetch(fingerprint, class, |value| {
            let envelope = envelope(value)?;
            let entries = decode_items::<MediaEntry>(&envelope.data)?;
            Ok(PaginatedResult::from_page(
                normalize(entries, query.sort),
                envelope.pagination.as_ref(),
                page,
            ))
        })
        .await
    }

    /// Cache lookup, queued upstream call and failure handling shared by all
    /// accessors. `decode` turns a raw payload into the accessor's result.
    async fn fetch<T, D>(&self, fingerprint: Fingerprint, class: TtlClass, decode: D) -> Fetched<T>
    where
        T: Default,
        D: Fn(&Value) -> Result<T, FetchError>,
    {
        let key = fingerprint.key();

        if let Some(value) = self.cache.get(&key) {
            match decode(&value) {
                Ok(data) => {
                    return Fetched {
                        data,
                        source: DataSource::Cache,
                    }
                }
                Err(e) => debug!(key = %key, error = %e, "Cached payload unusable, refetching"),
            }
        }

        let outcome = self.request(&fingerprint).await;

        let error = match outcome {
            Ok(value) => match decode(&value) {
                Ok(data) => {
                    self.cache.set(&key, value, self.ttl.ttl(class));
                    return Fetched {
                        data,
                        source: DataSource::Network,
                    };
                }
                Err(e) => e,
            },
            Err(e) => e,
        };

        if error.is_rate_limited() {
            if let Some(entry) = self.cache.get_stale(&key) {
                if let Ok(data) = decode(&entry.value) {
                    self.notify(Notice::UsingCachedData {
                        request: key,
                        stored_at: entry.stored_at,
                    });
                    return Fetched {
                        data,
                        source: DataSource::StaleFallback,
                    };
                }
            }
            self.notify(Notice::RateLimited { request: key });
        } else {
            self.notify(Notice::RequestFailed {
                request: key,
                kind: error.kind(),
                message: error.to_string(),
            });
        }

        Fetched::empty(DataSource::Degraded(error.kind()))
    }

    /// Run the upstream call on the request lane. Backoff is updated inside
    /// the lane so the pacing delay that follows already reflects the outcome.
    async fn request(&self, fingerprint: &Fingerprint) -> Result<Value, FetchError> {
        let upstream = Arc::clone(&self.upstream);
        let backoff = self.backoff.clone();
        let endpoint = fingerprint.endpoint().to_string();
        let query = fingerprint.query();

        debug!(request = %fingerprint, "Queueing upstream request");
        self.queue
            .enqueue(fingerprint.key(), move || async move {
                let result = upstream.get_json(&endpoint, &query).await;
                match &result {
                    Ok(_) => backoff.on_success(),
                    Err(e) if e.is_rate_limited() => backoff.on_failure(),
                    Err(_) => {}
                }
                result
            })
            .await
    }

    fn notify(&self, notice: Notice) {
        match &notice {
            Notice::UsingCachedData { request, stored_at } => {
                warn!(request = %request, stored_at = %stored_at, "Rate limited, using cached data")
            }
            Notice::RateLimited { request } => {
                warn!(request = %request, "Rate limited, no cached data available")
            }
            Notice::RequestFailed {
                request,
                kind,
                message,
            } => warn!(request = %request, kind = %kind, error = %message, "Request failed"),
        }
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }
}

fn envelope(value: &Value) -> Result<Envelope, FetchError> {
    Envelope::deserialize(value).map_err(|e| FetchError::Decode(e.to_string()))
}

/// Decode a `data` list, skipping records that do not fit the schema
fn decode_items<T: DeserializeOwned>(data: &Value) -> Result<Vec<T>, FetchError> {
    let items = data
        .as_array()
        .ok_or_else(|| FetchError::Decode("expected a list under `data`".to_string()))?;

    Ok(items
        .iter()
        .filter_map(|item| match T::deserialize(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                debug!(error = %e, "Skipping undecodable record");
                None
            }
        })
        .collect())
}

/// Decode a single `data` object; `null` means no record
fn decode_object<T: DeserializeOwned>(data: &Value) -> Result<Option<T>, FetchError> {
    if data.is_null() {
        return Ok(None);
    }
    T::deserialize(data)
        .map(Some)
        .map_err(|e| FetchError::Decode(e.to_string()))
}
