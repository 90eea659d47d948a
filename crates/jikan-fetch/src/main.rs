//! Jikan fetch CLI application.

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use jikan_fetch::favorites::favorite_item;
use jikan_fetch::{
    FetchOrchestrator, Fetched, GenreFilter, ListQuery, NormalizedRecord, PaginatedResult,
    RecordFilter, SearchParams, SearchSort, SearchStatus, SortKey, TopFilter,
};
use serde::Serialize;
use shared::{
    toggle_favorite, Config, Database, FavoriteError, FavoriteItem, FavoritesStore, LocalSession,
    MediaType, Season, SessionProvider, SqliteFavorites, ToggleOutcome,
};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Clear cache before running
    #[arg(long)]
    clear_cache: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List years and seasons with catalogued anime
    Seasons,
    /// Anime of one season
    Season {
        year: i32,
        season: Season,
        #[command(flatten)]
        list: ListArgs,
    },
    /// Anime airing this season
    Now {
        #[command(flatten)]
        list: ListArgs,
    },
    /// Anime airing next season
    Upcoming {
        #[command(flatten)]
        list: ListArgs,
    },
    /// Search by title
    Search {
        query: String,
        #[arg(short = 't', long = "type", default_value = "anime")]
        media_type: MediaType,
        /// popularity, score, title or start_date
        #[arg(long, default_value = "popularity")]
        sort: SearchSort,
        /// airing, complete, upcoming, publishing, hiatus or discontinued
        #[arg(long)]
        status: Option<SearchStatus>,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Top-ranked anime or manga
    Top {
        media_type: MediaType,
        /// airing, upcoming, bypopularity, favorite or publishing
        #[arg(long)]
        filter: Option<TopFilter>,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Recent user recommendations
    Recommendations {
        media_type: MediaType,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// One random entry
    Random { media_type: MediaType },
    /// Full record of one entry
    Details { media_type: MediaType, id: u64 },
    /// Characters of one entry
    Characters { media_type: MediaType, id: u64 },
    /// List and score statistics of one entry
    Stats { media_type: MediaType, id: u64 },
    /// Genres, themes or demographics
    Genres {
        media_type: MediaType,
        /// genres, explicit_genres, themes or demographics
        #[arg(long)]
        filter: Option<GenreFilter>,
    },
    /// Manage favorites of the configured user
    Favorites {
        #[command(subcommand)]
        action: FavoritesCommand,
    },
}

#[derive(Subcommand, Debug)]
enum FavoritesCommand {
    /// List favorites, newest first
    List { media_type: MediaType },
    /// Add an entry to favorites, or remove it if already there
    Toggle { media_type: MediaType, id: u64 },
}

/// Paging, ordering and filtering of season listings
#[derive(ClapArgs, Debug)]
struct ListArgs {
    #[arg(long, default_value_t = 1)]
    page: u32,
    /// popularity, score, title or upstream
    #[arg(long, default_value = "upstream")]
    sort: SortKey,
    /// Only entries with this genre
    #[arg(long)]
    genre: Option<String>,
    /// Only entries of this format (TV, Movie, OVA, ...)
    #[arg(long)]
    kind: Option<String>,
    /// Hide R+/Rx rated entries
    #[arg(long)]
    exclude_adult: bool,
}

impl ListArgs {
    fn query(&self) -> ListQuery {
        ListQuery::page(self.page).sorted(self.sort)
    }

    fn filter(&self) -> RecordFilter {
        RecordFilter {
            genre: self.genre.clone(),
            kind: self.kind.clone(),
            exclude_adult: self.exclude_adult,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Initialize logging
    shared::logging::init(shared::LogConfig::from_settings(
        &config.logging,
        config.log_dir(),
        "jikan-fetch",
        args.verbose,
    ))?;

    info!(config_file = %args.config.display(), "Loaded configuration");

    let fetcher = FetchOrchestrator::from_config(&config).context("Failed to create fetcher")?;

    if args.clear_cache {
        info!("Clearing cache");
        fetcher.cache().clear().context("Failed to clear cache")?;
    }

    let cache_stats = fetcher.cache().stats().context("Failed to get cache stats")?;
    info!(
        cached_files = cache_stats.total_files,
        cache_size_kb = cache_stats.total_size_bytes / 1_000,
        "Cache statistics"
    );

    match args.command {
        Command::Seasons => print(&fetcher.season_list().await),
        Command::Season { year, season, list } => {
            let result = fetcher.season(year, season, list.query()).await;
            print(&filtered(result, &list))
        }
        Command::Now { list } => {
            let result = fetcher.season_now(list.query()).await;
            print(&filtered(result, &list))
        }
        Command::Upcoming { list } => {
            let result = fetcher.season_upcoming(list.query()).await;
            print(&filtered(result, &list))
        }
        Command::Search {
            query,
            media_type,
            sort,
            status,
            page,
        } => {
            let params = SearchParams {
                sort,
                status,
                page,
                ..SearchParams::new(media_type, query)
            };
            print(&fetcher.search(&params).await)
        }
        Command::Top {
            media_type,
            filter,
            page,
        } => print(&fetcher.top(media_type, page, filter).await),
        Command::Recommendations { media_type, page } => {
            print(&fetcher.recommendations(media_type, page).await)
        }
        Command::Random { media_type } => print(&fetcher.random(media_type).await),
        Command::Details { media_type, id } => print(&fetcher.details(media_type, id).await),
        Command::Characters { media_type, id } => {
            print(&fetcher.characters(media_type, id).await)
        }
        Command::Stats { media_type, id } => print(&fetcher.statistics(media_type, id).await),
        Command::Genres { media_type, filter } => {
            print(&fetcher.genres(media_type, filter).await)
        }
        Command::Favorites { action } => run_favorites(&config, &fetcher, action).await,
    }
}

async fn run_favorites(
    config: &Config,
    fetcher: &FetchOrchestrator,
    action: FavoritesCommand,
) -> Result<()> {
    let session = LocalSession::from_config(config.session.as_ref());
    let Some(user) = session.current_user() else {
        bail!(FavoriteError::SignInRequired);
    };

    let db_path = config.database_path();
    info!(db_path = %db_path.display(), "Opening database");
    let database = Database::open(&db_path).context("Failed to open database")?;
    let store = SqliteFavorites::new(database);

    match action {
        FavoritesCommand::List { media_type } => {
            let favorites = store
                .list_favorites(&user.uid, media_type)
                .context("Failed to list favorites")?;
            print(&favorites)
        }
        FavoritesCommand::Toggle { media_type, id } => {
            let item = match store.get_favorite(&user.uid, media_type, id)? {
                // Removal only needs the identifiers
                Some(existing) => FavoriteItem {
                    media_type,
                    item_id: id,
                    title: existing.title,
                    image_url: existing.image_url,
                    score: existing.score,
                    payload: existing.payload,
                },
                None => {
                    let details = fetcher.details(media_type, id).await;
                    if details.is_degraded() {
                        warn!(source = ?details.source, "Details unavailable");
                    }
                    let Some(item) = details.data.as_ref().and_then(|e| favorite_item(media_type, e))
                    else {
                        bail!("No {} with id {} could be fetched", media_type, id);
                    };
                    item
                }
            };

            let outcome = toggle_favorite(&store, Some(&user), item)?;
            let message = match outcome {
                ToggleOutcome::Added => "added",
                ToggleOutcome::Removed => "removed",
            };
            print(&serde_json::json!({
                "media_type": media_type,
                "id": id,
                "favorite": message,
            }))
        }
    }
}

fn filtered(
    mut result: Fetched<PaginatedResult<NormalizedRecord>>,
    list: &ListArgs,
) -> Fetched<PaginatedResult<NormalizedRecord>> {
    let filter = list.filter();
    if !filter.is_empty() {
        result.data.items = filter.apply(std::mem::take(&mut result.data.items));
    }
    result
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    let output = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", output);
    Ok(())
}
