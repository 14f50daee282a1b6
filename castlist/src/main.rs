//! Castlist command-line front end.
//!
//! ```bash
//! # List the cast without attributing anything
//! cargo run -p castlist -- discover pride.txt --save-registry pride.cast.json
//!
//! # Attribute every paragraph, reusing the saved cast
//! cargo run -p castlist -- attribute pride.txt --registry pride.cast.json --out pride.json
//! ```
//!
//! Oracle calls need `ANTHROPIC_API_KEY` (a `.env` file is read if present);
//! `--no-oracle` runs on local heuristics only.

use anyhow::{Context, Result};
use castlist_core::{
    load_registry, read_plain_text, AttributionConfig, Attributor, Book, ClaudeOracle,
    FinalizedRegistry, RunStats,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "castlist")]
#[command(about = "Attribute dialogue in plain-text books to a consistent cast of characters")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build and print the character registry without attributing
    Discover {
        /// Plain-text book
        book: PathBuf,
        /// Heuristics only; never call the oracle
        #[arg(long, default_value_t = false)]
        no_oracle: bool,
        /// Save the registry snapshot here
        #[arg(long)]
        save_registry: Option<PathBuf>,
    },
    /// Attribute every paragraph and write the segments as JSON
    Attribute {
        /// Plain-text book
        book: PathBuf,
        /// Output file (stdout if omitted)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Start from a saved registry snapshot
        #[arg(long)]
        registry: Option<PathBuf>,
        /// Heuristics only; never call the oracle
        #[arg(long, default_value_t = false)]
        no_oracle: bool,
        /// Chapters attributed at the same time
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Discover {
            book,
            no_oracle,
            save_registry,
        } => discover(&book, no_oracle, save_registry.as_deref()).await,
        Command::Attribute {
            book,
            out,
            registry,
            no_oracle,
            concurrency,
        } => {
            let mut config = AttributionConfig::from_env();
            if let Some(chapters) = concurrency {
                config = config.with_chapter_concurrency(chapters);
            }
            attribute(&book, config, out.as_deref(), registry.as_deref(), no_oracle).await
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn read_book(path: &Path) -> Result<Book> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let book = read_plain_text(&content);
    info!(
        title = %book.title,
        chapters = book.chapters.len(),
        paragraphs = book.paragraph_count(),
        "Loaded book"
    );
    Ok(book)
}

fn build_attributor(config: AttributionConfig, no_oracle: bool) -> Result<Attributor> {
    let attributor = Attributor::new(config);
    if no_oracle {
        return Ok(attributor);
    }
    let oracle = ClaudeOracle::from_env()
        .context("Could not set up the Claude oracle (pass --no-oracle to run on heuristics only)")?;
    Ok(attributor.with_oracle(Arc::new(oracle)))
}

async fn discover(path: &Path, no_oracle: bool, save_to: Option<&Path>) -> Result<()> {
    let book = read_book(path).await?;
    let attributor = build_attributor(AttributionConfig::from_env(), no_oracle)?;
    let registry = attributor.discover(&book).await;

    print_registry(&registry);

    if let Some(save_to) = save_to {
        registry.snapshot().save_json(save_to).await?;
        eprintln!("Registry saved to {}", save_to.display());
    }
    Ok(())
}

async fn attribute(
    path: &Path,
    config: AttributionConfig,
    out: Option<&Path>,
    registry: Option<&Path>,
    no_oracle: bool,
) -> Result<()> {
    let book = read_book(path).await?;
    let mut attributor = build_attributor(config, no_oracle)?;

    match registry {
        Some(registry) => {
            let loaded = load_registry(registry)
                .await
                .with_context(|| format!("loading registry {}", registry.display()))?;
            attributor = attributor.with_registry(FinalizedRegistry::from(loaded));
            if attributor.config().prescan {
                attributor.prescan(&book.chapters).await;
            }
        }
        None => {
            attributor.discover(&book).await;
        }
    }

    let attributed = attributor.attribute_book(&book).await?;
    let json = serde_json::to_string_pretty(&attributed)?;
    match out {
        Some(out) => {
            tokio::fs::write(out, json)
                .await
                .with_context(|| format!("writing {}", out.display()))?;
            eprintln!("Segments written to {}", out.display());
        }
        None => println!("{json}"),
    }

    print_stats(&attributed.stats);
    Ok(())
}

fn print_registry(registry: &FinalizedRegistry) {
    println!("{} characters", registry.len());
    for character in registry.all_characters() {
        let mut line = format!("{:>5}  {}", character.id.to_string(), character.canonical_name);
        if character.gender.is_known() {
            line.push_str(&format!(" [{}]", character.gender.name()));
        }
        if !character.aliases.is_empty() {
            line.push_str(&format!("  aka {}", character.aliases.join(", ")));
        }
        println!("{line}");
    }
}

fn print_stats(stats: &RunStats) {
    eprintln!("Oracle calls:        {}", stats.oracle_calls);
    eprintln!("Oracle cache hits:   {}", stats.cache_hits);
    eprintln!("Oracle failures:     {}", stats.oracle_failures);
    eprintln!("Degraded segments:   {}", stats.degraded_segments);
    eprintln!("Unresolved segments: {}", stats.unresolved_segments);
    eprintln!("Characters created:  {}", stats.characters_created);
}
