use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use tracing::{info, warn};

use mirrorbird::config::Config;
use mirrorbird::dedup::DedupStore;
use mirrorbird::forward::compose::Composer;
use mirrorbird::forward::decision::DecisionEngine;
use mirrorbird::forward::orchestrator::Forwarder;
use mirrorbird::publish::dry_run::DryRunPublisher;
use mirrorbird::publish::IdentitySanitizer;
use mirrorbird::subscriptions::Subscriptions;
use mirrorbird::twitter::client::TwitterClient;
use mirrorbird::twitter::rules::RuleManager;
use mirrorbird::twitter::stream::{HttpStreamConnector, StreamClient, StreamQuery};

/// Mirrorbird: mirror subscribed accounts' posts from a filtered stream.
///
/// Keeps one filter rule matching every subscribed account, listens on the
/// filtered stream, and forwards each post as a new post, a repost, or a
/// comment under something already mirrored.
#[derive(Parser)]
#[command(name = "mirrorbird", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reset stream rules, then listen and forward until interrupted
    Run,

    /// Show the stream rules currently installed
    Rules,

    /// Replace all stream rules with one built from the subscriptions file
    ResetRules,

    /// Show where a source post was mirrored to, if anywhere
    Lookup {
        /// The source post id
        source_id: String,
    },

    /// Drop dedup records older than the retention window
    Prune,

    /// Show dedup store status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mirrorbird=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = Config::load()?;
            config.require_twitter()?;
            let subscriptions = load_subscriptions(&config)?;

            let client = TwitterClient::new(&config.twitter_api_url, &config.bearer_token)?;
            let dedup = Arc::new(DedupStore::new(&config.dedup_path, config.retention));
            let composer = Composer::new(
                subscriptions.clone(),
                config.display_offset,
                &config.spoiler_tag,
                &config.dest_link_base,
            );
            let engine = DecisionEngine::new(subscriptions.clone(), dedup.clone(), composer);

            warn!("No destination configured; forwards are logged by the dry-run publisher");
            let forwarder = Forwarder::new(
                engine,
                dedup,
                Arc::new(DryRunPublisher::new()),
                Arc::new(IdentitySanitizer),
                client.clone(),
                config.media_dir.clone(),
            );

            let rules = RuleManager::new(client.clone(), subscriptions.clone());
            let listener =
                StreamClient::new(HttpStreamConnector::new(client), config.retry_interval);
            let query = StreamQuery::default();

            info!(
                accounts = subscriptions.len(),
                dedup = %config.dedup_path.display(),
                "Starting mirrorbird"
            );

            let listen = listener.listen(
                || async {
                    rules.reset(&config.rule_tag).await?;
                    Ok::<_, anyhow::Error>(())
                },
                &query,
                |post| forwarder.handle(post),
            );

            // Dropping the listen future closes the open stream connection.
            tokio::select! {
                result = listen => result?,
                result = shutdown_signal() => {
                    result?;
                    info!("Shutdown signal received, stopping");
                }
            }
        }

        Commands::Rules => {
            let config = Config::load()?;
            config.require_twitter()?;
            let client = TwitterClient::new(&config.twitter_api_url, &config.bearer_token)?;
            let rules = RuleManager::new(client, Arc::new(Subscriptions::default()));

            let installed = rules.fetch_rules().await?;
            if installed.is_empty() {
                println!("No stream rules installed.");
                println!("{}", "Run `mirrorbird reset-rules` to create one.".dimmed());
            }
            for rule in &installed {
                println!(
                    "{} [{}] {}",
                    rule.id.bold(),
                    rule.tag.as_deref().unwrap_or("-"),
                    rule.value
                );
            }
        }

        Commands::ResetRules => {
            let config = Config::load()?;
            config.require_twitter()?;
            let subscriptions = load_subscriptions(&config)?;
            let client = TwitterClient::new(&config.twitter_api_url, &config.bearer_token)?;

            let created = RuleManager::new(client, subscriptions)
                .reset(&config.rule_tag)
                .await?;
            for rule in &created {
                println!("{} {}", "Created".green(), rule.value);
            }
        }

        Commands::Lookup { source_id } => {
            let config = Config::load()?;
            let dedup = DedupStore::new(&config.dedup_path, config.retention);
            match dedup.load().await?.get(&source_id) {
                Some(record) => println!(
                    "{} -> {} ({}, recorded {})",
                    source_id,
                    record.destination_post_id.bold(),
                    format!("{}{}", config.dest_link_base, record.destination_post_id).dimmed(),
                    record.recorded_at.format("%Y-%m-%d %H:%M:%S UTC")
                ),
                None => println!("{source_id} has not been mirrored."),
            }
        }

        Commands::Prune => {
            let config = Config::load()?;
            let dedup = DedupStore::new(&config.dedup_path, config.retention);
            let map = dedup.load().await?;
            let before = map.len();
            dedup.save(map).await?;
            let after = dedup.load().await?.len();
            println!(
                "Pruned {} of {} records ({} kept).",
                before - after,
                before,
                after
            );
        }

        Commands::Status => {
            let config = Config::load()?;
            mirrorbird::status::show(&DedupStore::new(&config.dedup_path, config.retention))
                .await?;
        }
    }

    Ok(())
}

/// Load the subscription registry, refusing to run with nobody to follow.
fn load_subscriptions(config: &Config) -> Result<Arc<Subscriptions>> {
    config.require_subscriptions()?;
    let subscriptions = Subscriptions::load(&config.subscriptions_path)?;
    if subscriptions.is_empty() {
        anyhow::bail!(
            "No accounts in {}. Add at least one {{\"username\", \"name\"}} entry.",
            config.subscriptions_path.display()
        );
    }
    Ok(Arc::new(subscriptions))
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}
