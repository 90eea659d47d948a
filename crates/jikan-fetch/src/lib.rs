//! Resilient client-side access to the Jikan anime/manga API.
//!
//! Requests are fingerprinted and answered from a TTL cache when possible.
//! Misses go through a single-lane queue paced by an exponential backoff
//! controller, and list results are deduplicated and sorted before they are
//! handed back. Accessors on [`FetchOrchestrator`] never fail: degraded
//! outcomes are reported through [`DataSource`] and [`Notice`].

pub mod api;
pub mod cache;
pub mod favorites;
pub mod fingerprint;
pub mod normalize;
pub mod orchestrator;

pub use api::{FailureKind, FetchError, JikanClient, Upstream};
pub use cache::{CacheError, TtlCache, TtlClass, TtlPolicy};
pub use fingerprint::Fingerprint;
pub use normalize::{
    normalize, normalize_characters, NormalizedCharacter, NormalizedRecord, PaginatedResult,
    RecordFilter, SortKey,
};
pub use orchestrator::{
    DataSource, FetchOrchestrator, FetchSettings, Fetched, GenreFilter, ListQuery, Notice,
    SearchParams, SearchSort, SearchStatus, TopFilter,
};
