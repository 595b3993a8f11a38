mod api;
mod app;
mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

// mimalloc keeps memory flat under sustained high-concurrency fetching
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use searchlight_core::AppConfig;

use crate::app::App;
use crate::cli::{Cli, Commands};

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using defaults");
        include_str!("../config/default.toml").to_string()
    });
    let mut config: AppConfig = toml::from_str(&config_str)?;

    // environment overrides for the common tunables
    if let Ok(v) = std::env::var("MAX_DEPTH") {
        if let Ok(n) = v.parse::<u32>() {
            config.general.max_depth = n;
        }
    }
    if let Ok(v) = std::env::var("FETCH_WORKERS") {
        if let Ok(n) = v.parse::<usize>() {
            if n > 0 && n <= 256 {
                config.crawler.fetch_workers_min = n;
                config.crawler.fetch_workers_max = config.crawler.fetch_workers_max.max(n);
            }
        }
    }
    if let Ok(v) = std::env::var("FRONTIER_STRATEGY") {
        config.frontier.strategy = v;
    }

    match cli.command {
        Commands::Crawl { seeds, seed, depth } => {
            if let Some(depth) = depth {
                config.general.max_depth = depth;
            }
            let app = App::build(config).await?;
            commands::crawl::run(app, seeds, seed).await?;
        }
        Commands::Serve { bind } => {
            let app = App::build(config).await?;
            commands::serve::run(app, &bind).await?;
        }
        Commands::Search {
            query,
            page,
            size,
            sort,
        } => {
            let app = App::build(config).await?;
            commands::search::run(app, query, page, size, sort).await?;
        }
        Commands::Status => {
            let app = App::build(config).await?;
            commands::status::run(app).await?;
        }
        Commands::Pagerank => {
            let app = App::build(config).await?;
            commands::pagerank::run(app).await?;
        }
        Commands::DedupSweep => {
            let app = App::build(config).await?;
            let groups = app.dedup.sweep().await?;
            println!("{} near-duplicate groups", groups.len());
            for group in groups {
                println!("---");
                for (doc_id, url) in group {
                    println!("  {doc_id}  {url}");
                }
            }
        }
    }

    Ok(())
}
