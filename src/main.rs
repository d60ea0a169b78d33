use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use mailsieve::classifier::{ClassifierAdapter, ClassifierPolicy};
use mailsieve::cli::{ingest, list, parse_fingerprint, review, view};
use mailsieve::config::Config;
use mailsieve::engine::Engine;
use mailsieve::feed::FeedRegistry;
use mailsieve::model::Category;
use mailsieve::store::Store;

#[derive(Parser)]
#[command(name = "mailsieve")]
#[command(about = "Mail classification and review-badge state engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "mailsieve.yaml")]
    config: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ingestion cycle over the mail feed
    Poll,

    /// Keep polling on the configured interval until Ctrl-C
    Watch,

    /// Show the pending-review count
    Pending,

    /// Show mail, calendar and tasks on one timeline
    View {
        /// Hours back and ahead of now
        #[arg(long, default_value_t = 24)]
        hours: i64,

        /// Leave out SPAM
        #[arg(long)]
        hide_spam: bool,
    },

    /// List classified messages
    List {
        /// Only messages that need review, most urgent first
        #[arg(long)]
        pending: bool,

        /// Only settled tasks with at least this urgency (0-100)
        #[arg(long, value_name = "MIN", conflicts_with = "pending")]
        urgent: Option<u8>,
    },

    /// Set the final category of a message
    Review {
        /// Message fingerprint (mail:<id> or bare id)
        fingerprint: String,
        /// SCHEDULE, TASK, SPAM or UNCERTAIN
        category: Category,
    },

    /// Classify an unreviewed message again
    Reclassify {
        /// Message fingerprint (mail:<id> or bare id)
        fingerprint: String,
    },

    /// Show a message with its archived text and review history
    Show {
        /// Message fingerprint (mail:<id> or bare id)
        fingerprint: String,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Load config
    let config = Config::load(&cli.config)?;

    // Initialize store
    let store = Arc::new(
        Store::open(&config.database_path())
            .with_context(|| format!("opening {}", config.database_path().display()))?,
    );

    // Initialize feeds and classifier
    let registry = FeedRegistry::new(&config);
    let classifier = Arc::new(
        ClassifierAdapter::new(
            config.build_model()?,
            ClassifierPolicy::from(&config.classifier),
        )
        .with_local_offset(config.local_offset()?),
    );
    let engine = Engine::new(Arc::clone(&store), classifier, registry.external_feeds())
        .context("restoring pending count")?;
    let json = cli.json;

    match cli.command {
        Commands::Poll => {
            ingest::poll(&engine, &registry, json)?;
        }
        Commands::Watch => {
            ingest::watch(&engine, &registry, config.worker_interval())?;
        }
        Commands::Pending => {
            list::pending(&engine, json)?;
        }
        Commands::View { hours, hide_spam } => {
            view::run(&engine, hours, hide_spam, json)?;
        }
        Commands::List { pending, urgent } => {
            list::run(&engine, pending, urgent, json)?;
        }
        Commands::Review {
            fingerprint,
            category,
        } => {
            review::review(&engine, &parse_fingerprint(&fingerprint), category, json)?;
        }
        Commands::Reclassify { fingerprint } => {
            review::reclassify(&engine, &parse_fingerprint(&fingerprint), json)?;
        }
        Commands::Show { fingerprint } => {
            list::show(&engine, &store, &parse_fingerprint(&fingerprint), json)?;
        }
    }

    Ok(())
}
