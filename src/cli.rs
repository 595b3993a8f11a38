use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "searchlight", about = "Distributed web crawler & full-text search engine")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl from seed URLs until interrupted
    Crawl {
        /// Seed URLs (comma-separated or file path)
        #[arg(short, long)]
        seeds: Option<String>,

        /// Single seed URL
        #[arg(long)]
        seed: Option<String>,

        /// Maximum crawl depth
        #[arg(short, long)]
        depth: Option<u32>,
    },
    /// Run the HTTP API together with the crawl pipeline
    Serve {
        /// Bind address
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        bind: String,
    },
    /// Query the index from the command line
    Search {
        /// Query string
        query: String,

        /// Result page (0-based)
        #[arg(long, default_value = "0")]
        page: usize,

        /// Results per page
        #[arg(long, default_value = "10")]
        size: usize,

        /// Sort order (relevance, date, pagerank)
        #[arg(long, default_value = "relevance")]
        sort: String,
    },
    /// Show crawl status counts
    Status,
    /// Run one PageRank pass and exit
    Pagerank,
    /// Scan the whole index for near-duplicate groups
    DedupSweep,
}
