use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use lifefeed::engine::{
    Confirm, ConfirmAction, DeleteOutcome, EditOutcome, FetchOutcome, PinOutcome,
};
use lifefeed::source::HttpSource;
use lifefeed::{Config, FeedContext, FeedEngine, FeedItem, ItemId, ItemType};

/// Upper bound on pages walked while looking for an item to pin or edit.
const MAX_LOOKUP_PAGES: usize = 20;

/// Get the config file path (~/.config/lifefeed/config.toml)
fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("lifefeed")
        .join("config.toml"))
}

#[derive(Parser, Debug)]
#[command(name = "lifefeed", about = "Browse and manage your personal-tracking feed")]
struct Args {
    /// Config file (default: ~/.config/lifefeed/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Feed context to operate on (default from config)
    #[arg(long, global = true)]
    context: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the pinned section and the first pages of the feed
    Feed {
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Toggle an item's pin state
    Pin {
        id: String,
        #[arg(value_name = "TYPE")]
        item_type: ItemType,
    },
    /// Delete a record
    Delete {
        #[arg(value_name = "TYPE")]
        item_type: ItemType,
        source_id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Save changed fields (a JSON object) for an item
    Edit { id: String, patch: String },
    /// Print the full record behind a feed item
    Show {
        #[arg(value_name = "TYPE")]
        item_type: ItemType,
        source_id: String,
    },
}

/// Asks on the terminal before destructive actions.
struct StdinConfirm;

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&self, action: &ConfirmAction) -> bool {
        let prompt = action.prompt();
        let answer = tokio::task::spawn_blocking(move || {
            print!("{prompt} [y/N] ");
            std::io::stdout().flush()?;
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            Ok::<_, std::io::Error>(line)
        })
        .await;
        match answer {
            Ok(Ok(line)) => matches!(line.trim(), "y" | "Y" | "yes"),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to read confirmation");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Confirmation task failed");
                false
            }
        }
    }
}

fn print_item(item: &FeedItem) {
    let marker = if item.pinned { "*" } else { " " };
    println!(
        "{marker} {:<24} {:<18} {:<12} {}  ({})",
        item.id,
        item.item_type,
        item.source_id,
        item.title,
        item.updated_at.format("%Y-%m-%d %H:%M")
    );
}

/// Load pages until `id` shows up in the feed.
async fn find_item(engine: &FeedEngine, context: &FeedContext, id: &ItemId) -> Result<FeedItem> {
    for _ in 0..MAX_LOOKUP_PAGES {
        let found = engine
            .snapshot(context)
            .and_then(|snap| snap.find(id).cloned());
        if let Some(item) = found {
            return Ok(item);
        }
        match engine
            .fetch_next_page(context)
            .await
            .context("Failed to load feed page")?
        {
            FetchOutcome::Appended { .. } => {}
            _ => break,
        }
    }
    anyhow::bail!("Item {id} not found in feed '{context}'")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?
        .apply_env();
    tracing::debug!(config = ?config, "Loaded configuration");

    let client = reqwest::Client::builder()
        .user_agent(concat!("lifefeed/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let source = Arc::new(
        HttpSource::from_config(client, &config).context("Invalid api_base_url in config")?,
    );

    let mut builder = FeedEngine::from_source(source).config(&config);
    let skip_confirm = matches!(args.command, Command::Delete { yes: true, .. });
    if !skip_confirm {
        builder = builder.confirm(Arc::new(StdinConfirm));
    }
    let engine = builder.build();

    let context = FeedContext::from(
        args.context
            .clone()
            .unwrap_or_else(|| config.default_context.clone()),
    );
    engine.open_feed(&context)?;

    match args.command {
        Command::Feed { pages } => {
            if let Err(e) = engine.load_pinned(&context).await {
                eprintln!("Warning: could not load pinned items: {e}");
            }
            for _ in 0..pages.max(1) {
                match engine
                    .fetch_next_page(&context)
                    .await
                    .context("Failed to load feed page")?
                {
                    FetchOutcome::Appended { .. } => {}
                    _ => break,
                }
            }
            let pinned = engine.pinned_feed(&context);
            if !pinned.is_empty() {
                println!("Pinned");
                pinned.iter().for_each(print_item);
                println!();
            }
            engine.unpinned_feed(&context).iter().for_each(print_item);
            if engine.has_next_page(&context) {
                println!("(more available: --pages {})", pages.max(1) + 1);
            }
        }
        Command::Pin { id, item_type } => {
            let id = ItemId::from(id);
            find_item(&engine, &context, &id).await?;
            match engine
                .toggle_pin(&id, item_type, &context)
                .await
                .context("Failed to toggle pin")?
            {
                PinOutcome::Confirmed { pinned: true } => println!("Pinned {id}"),
                PinOutcome::Confirmed { pinned: false } => println!("Unpinned {id}"),
                PinOutcome::Removed => println!("{id} no longer exists"),
                other => tracing::debug!(outcome = ?other, "Pin toggle settled"),
            }
        }
        Command::Delete {
            item_type,
            source_id,
            ..
        } => match engine
            .delete_item(&source_id, item_type)
            .await
            .context("Failed to delete")?
        {
            DeleteOutcome::Deleted => println!("Deleted {item_type} {source_id}"),
            DeleteOutcome::AlreadyGone => println!("{item_type} {source_id} was already deleted"),
            DeleteOutcome::Cancelled => println!("Cancelled"),
            other => tracing::debug!(outcome = ?other, "Delete settled"),
        },
        Command::Edit { id, patch } => {
            let id = ItemId::from(id);
            let patch: serde_json::Value =
                serde_json::from_str(&patch).context("Patch is not valid JSON")?;
            find_item(&engine, &context, &id).await?;
            match engine
                .edit_and_save(&id, &context, patch)
                .await
                .context("Failed to save edit")?
            {
                EditOutcome::Saved(item) => print_item(&item),
                EditOutcome::Removed => println!("{id} no longer exists"),
                EditOutcome::Superseded => {
                    println!("{id} was changed elsewhere; reload and try again")
                }
                other => tracing::debug!(outcome = ?other, "Edit settled"),
            }
        }
        Command::Show {
            item_type,
            source_id,
        } => {
            let record = engine
                .get_full_session(item_type, &source_id)
                .await
                .with_context(|| format!("Failed to load {item_type} {source_id}"))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&record.body).context("Failed to format record")?
            );
        }
    }

    engine.shutdown();
    Ok(())
}
