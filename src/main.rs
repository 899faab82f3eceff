mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use skillsync::client::{self, Backend};
use skillsync::config::Config;
use skillsync::model::{RepoHandle, ScrapeOutcome};
use skillsync::repository::Database;
use skillsync::scraper::{IndicatifProgress, LAST_SYNC_KEY, ScrapeError, ScrapeOptions, Scraper};
use skillsync::util::{format_duration, format_size, format_timestamp};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Sync {
            force,
            concurrency,
            backend,
        } => sync(&config, force, concurrency, backend).await,
        Command::Cleanup { max_age_hours } => cleanup(&config, max_age_hours).await,
        Command::Remove { repo } => remove(&config, &repo).await,
        Command::Stats => stats(&config).await,
        Command::Search {
            query,
            limit,
            backend,
        } => search(&config, &query, limit, backend).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "skillsync=debug" } else { "skillsync=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn open_database(config: &Config) -> Result<Database> {
    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create {}", parent.display()))?;
    }
    let db_path_str = db_path.to_str().context("Invalid path encoding")?;
    let db = Database::new(db_path_str).await?;
    if db.init_schema().await? {
        tracing::info!(path = %db_path.display(), "initialized database");
    }
    Ok(db)
}

async fn sync(config: &Config, force: bool, concurrency: Option<usize>, backend: Option<Backend>) -> Result<()> {
    let backend = backend.unwrap_or(config.backend);
    let repos = Arc::new(config.repo_store()?);
    let client = config.source_client(backend, repos)?;
    let db = Arc::new(open_database(config).await?);

    let scraper = Scraper::new(client, db).with_max_slug_attempts(config.max_slug_attempts);
    let progress = Arc::new(IndicatifProgress::new(config.sources.len()));
    let options = ScrapeOptions::default()
        .force(force)
        .max_concurrency(concurrency.unwrap_or(config.max_concurrency))
        .on_progress(progress.clone());

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling sync...");
                cancel.cancel();
            }
        }
    });

    let result = scraper.scrape_all(&config.sources, options, cancel).await;
    progress.finish();

    match result {
        Ok(outcome) => {
            print_outcome(&outcome);
            let stats = scraper.client().stats();
            tracing::debug!(
                requests = stats.requests,
                cache_hits = stats.cache_hits,
                errors = stats.errors,
                "client stats"
            );
            Ok(())
        }
        Err(ScrapeError::Cancelled { partial }) => {
            print_outcome(&partial);
            bail!("sync cancelled")
        }
        Err(e) => Err(e.into()),
    }
}

fn print_outcome(outcome: &ScrapeOutcome) {
    println!(
        "Sources: {} processed, {} unchanged, {} failed",
        outcome.sources_processed, outcome.sources_skipped, outcome.sources_failed
    );
    println!(
        "Skills:  {} found, {} new, {} updated, {} duplicate",
        outcome.skills_found, outcome.skills_new, outcome.skills_updated, outcome.skills_duplicate
    );
    println!("Elapsed: {}", format_duration(outcome.duration));

    if outcome.has_errors() {
        eprintln!("{} error(s):", outcome.errors.len());
        for error in &outcome.errors {
            eprintln!("  {}", error);
        }
    }
}

async fn cleanup(config: &Config, max_age_hours: u64) -> Result<()> {
    let repos = config.repo_store()?;
    let report = repos
        .cleanup_old_repos(Duration::from_secs(max_age_hours * 3600))
        .await;

    for repo in &report.removed {
        println!("Removed {}", repo);
    }
    for error in &report.failed {
        eprintln!("Failed: {}", error);
    }
    println!("{} clone(s) removed", report.removed.len());
    Ok(())
}

async fn remove(config: &Config, repo: &str) -> Result<()> {
    let handle = RepoHandle::parse(repo).with_context(|| format!("Expected owner/name, got '{}'", repo))?;
    let repos = config.repo_store()?;
    if repos.remove_repository(&handle).await? {
        println!("Removed {}", handle);
    } else {
        println!("No clone of {}", handle);
    }
    Ok(())
}

async fn stats(config: &Config) -> Result<()> {
    let db = open_database(config).await?;
    let stats = db.get_stats().await?;
    let last_sync = db
        .get_sync_meta(LAST_SYNC_KEY)
        .await
        .and_then(|v| v.parse::<i64>().ok())
        .map(format_timestamp)
        .unwrap_or_else(|| "never".to_string());
    let db_size = std::fs::metadata(config.database_path()?)
        .map(|m| m.len())
        .unwrap_or(0);
    let clones = config.repo_store()?.list_clones().await;

    println!("Sources:   {}", stats.sources);
    println!("Skills:    {}", stats.skills);
    println!("Tags:      {}", stats.tags);
    println!("Clones:    {}", clones.len());
    println!("Database:  {}", format_size(db_size));
    println!("Last sync: {}", last_sync);

    let sources = db.list_sources().await?;
    if !sources.is_empty() {
        println!();
        for source in sources {
            println!(
                "  {:<45} {:>4} skills  {}",
                source.id,
                source.skill_count,
                source
                    .last_scraped_at
                    .map(format_timestamp)
                    .unwrap_or_else(|| "never".to_string())
            );
        }
    }
    Ok(())
}

async fn search(config: &Config, query: &str, limit: usize, backend: Option<Backend>) -> Result<()> {
    let repos = Arc::new(config.repo_store()?);
    let client = config.source_client(backend.unwrap_or(config.backend), repos)?;
    let results = client::search(client.as_ref(), query, limit).await?;

    if results.is_empty() {
        println!("No results");
        return Ok(());
    }
    for repo in results {
        println!(
            "{}/{}  ★{}  {}",
            repo.owner,
            repo.name,
            repo.stars,
            repo.description.unwrap_or_default()
        );
    }
    Ok(())
}
