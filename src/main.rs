use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tweetdump::backend::{self, browser};
use tweetdump::config::{BackendKind, Config};
use tweetdump::db::{Database, PostFilters, ReadOrder};
use tweetdump::engine::{self, Pace, ScrapeOptions};
use tweetdump::error::ScrapeError;
use tweetdump::model::{Post, RunEvent};
use tweetdump::target::parse_timeline_url;
use tweetdump::view::{self, ViewOptions};

#[derive(Parser)]
#[command(name = "tweetdump", version)]
#[command(about = "X/Twitter list and user profile scraper with a local store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape a timeline URL into the local store and print new posts as JSON.
    ///
    /// Posts are cached locally; repeated runs only fetch and print what is
    /// new since the last run.
    Scrape {
        /// X/Twitter timeline URL (list, user profile or thread)
        url: String,

        /// Maximum number of new posts to collect
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Collect posts back to this age, e.g. '7d', '24h', '30m'
        #[arg(long)]
        old: Option<String>,

        /// Maximum number of pages to fetch
        #[arg(long)]
        max_pages: Option<usize>,

        /// Auto-fetch full threads when detecting self-thread posts
        #[arg(short = 'e', long)]
        expand_threads: bool,

        /// Pretty-print JSON output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Print already-stored posts for a timeline URL. No network access.
    View {
        /// X/Twitter timeline URL previously scraped
        url: String,

        /// Maximum number of posts to print
        #[arg(short = 'n', long)]
        limit: Option<u32>,

        /// Print oldest posts first (default: newest first)
        #[arg(long)]
        oldest_first: bool,

        /// Exclude retweets
        #[arg(long)]
        no_retweets: bool,

        /// Restrict to a single conversation id
        #[arg(short = 't', long)]
        thread: Option<String>,

        /// Pretty-print JSON output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Open the browser profile for manual login (browser backend only)
    Login,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Scrape {
            url,
            limit,
            old,
            max_pages,
            expand_threads,
            pretty,
        } => run_scrape(&config, &url, limit, old, max_pages, expand_threads, pretty).await,
        Commands::View {
            url,
            limit,
            oldest_first,
            no_retweets,
            thread,
            pretty,
        } => run_view(&config, &url, limit, oldest_first, no_retweets, thread, pretty).await,
        Commands::Login => run_login(&config).await,
    }
}

async fn run_scrape(
    config: &Config,
    url: &str,
    limit: Option<usize>,
    old: Option<String>,
    max_pages: Option<usize>,
    expand_threads: bool,
    pretty: bool,
) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let target = parse_timeline_url(url)?;
    let max_age = old.as_deref().map(parse_duration).transpose()?;

    let db = open_store(config).await?;
    let backend = backend::create_backend(config)?;

    let options = ScrapeOptions {
        max_count: limit,
        max_age,
        max_pages,
        expand_threads,
        // Human-like pause between thread fetches
        expansion_pace: Some(Pace {
            min: Duration::from_secs(3),
            max: Duration::from_secs(6),
        }),
        ..ScrapeOptions::default()
    };

    info!(timeline = %target.key(), store = %config.store_path.display(), "Starting scrape");

    let stream = engine::scrape(backend.as_ref(), &db, &target, options);
    futures_util::pin_mut!(stream);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut new_count = 0usize;
    let mut warning_count = 0usize;
    let mut incomplete: Option<ScrapeError> = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                warn!("Interrupted; collected posts stay stored");
                break;
            }
            event = stream.next() => match event {
                None => break,
                Some(Ok(RunEvent::Post(post))) => {
                    new_count += 1;
                    print_post(&post, pretty)?;
                }
                Some(Ok(RunEvent::Warning(_))) => {
                    // Already logged by the engine with full context
                    warning_count += 1;
                }
                Some(Err(e)) => {
                    incomplete = Some(e);
                    break;
                }
            }
        }
    }

    info!(new_posts = new_count, warnings = warning_count, "Scrape finished");

    if let Some(e) = incomplete {
        bail!("run incomplete ({new_count} posts collected before failure): {e}");
    }
    Ok(())
}

async fn run_view(
    config: &Config,
    url: &str,
    limit: Option<u32>,
    oldest_first: bool,
    no_retweets: bool,
    thread: Option<String>,
    pretty: bool,
) -> Result<()> {
    let target = parse_timeline_url(url)?;
    let db = open_store(config).await?;

    let options = ViewOptions {
        order: if oldest_first {
            ReadOrder::OldestFirst
        } else {
            ReadOrder::NewestFirst
        },
        limit,
        filters: PostFilters {
            exclude_retweets: no_retweets,
            conversation_id: thread,
        },
    };

    let posts = match view::read(&db, &target, &options).await {
        Ok(posts) => posts,
        Err(e @ ScrapeError::NotFound(_)) => {
            bail!("{e}. Run 'tweetdump scrape' first.");
        }
        Err(e) => return Err(e.into()),
    };

    for post in &posts {
        print_post(post, pretty)?;
    }
    Ok(())
}

async fn run_login(config: &Config) -> Result<()> {
    if config.backend != BackendKind::Browser {
        bail!(
            "login requires the browser backend. Set TWEETDUMP_BACKEND=browser and try again."
        );
    }
    browser::interactive_login(config).await
}

async fn open_store(config: &Config) -> Result<Database> {
    if let Some(parent) = config.store_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create store directory: {}", parent.display()))?;
    }
    Database::new(&config.store_path)
        .await
        .context("Failed to initialize store")
}

fn print_post(post: &Post, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(post)?
    } else {
        serde_json::to_string(post)?
    };
    println!("{json}");
    Ok(())
}

/// Parse a duration like `7d`, `24h` or `30m`.
fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim().to_lowercase();
    let (number, unit) = value.split_at(value.len().saturating_sub(1));
    let count: u64 = number
        .parse()
        .with_context(|| format!("invalid duration '{value}', use e.g. '7d', '24h', '30m'"))?;

    let seconds = match unit {
        "d" => count * 86_400,
        "h" => count * 3_600,
        "m" => count * 60,
        _ => bail!("invalid duration unit '{unit}', use 'd', 'h' or 'm'"),
    };
    Ok(Duration::from_secs(seconds))
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tweetdump=debug"));

    // Logs go to stderr; stdout carries the JSON post output.
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}
