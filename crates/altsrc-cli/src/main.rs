use std::path::PathBuf;
use std::time::Duration;

use altsrc_adapters::{fetch_and_classify, HttpCatalogFetcher};
use altsrc_storage::{HttpClientConfig, HttpFetcher};
use altsrc_sync::{run_sync_once, SyncConfig};
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "altsrc")]
#[command(about = "Sync AltStore catalogs into the source directory content tree")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every registered catalog and merge it into the content tree.
    Sync(SyncArgs),
    /// Fetch and classify one catalog, printing the result as JSON without writing anything.
    Preview {
        url: String,
        #[arg(long)]
        rules: Option<PathBuf>,
    },
}

#[derive(Debug, Default, Args)]
struct SyncArgs {
    #[arg(long)]
    registry: Option<PathBuf>,
    #[arg(long)]
    content_dir: Option<PathBuf>,
    /// Catalog location to sync instead of the registry; repeatable.
    #[arg(long = "url")]
    urls: Vec<String>,
    #[arg(long)]
    rules: Option<PathBuf>,
    #[arg(long)]
    reports_dir: Option<PathBuf>,
}

impl SyncArgs {
    fn apply(self, config: &mut SyncConfig) -> Vec<String> {
        if let Some(path) = self.registry {
            config.registry_path = path;
        }
        if let Some(path) = self.content_dir {
            config.content_dir = path;
        }
        if self.rules.is_some() {
            config.rules_path = self.rules;
        }
        if self.reports_dir.is_some() {
            config.reports_dir = self.reports_dir;
        }
        self.urls
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync(SyncArgs::default())) {
        Commands::Sync(args) => {
            let urls = args.apply(&mut config);
            let summary = run_sync_once(&config, urls).await?;
            for failed in summary.failed_locations() {
                warn!(
                    location = %failed.location,
                    status = ?failed.status,
                    error = failed.error.as_deref().unwrap_or(""),
                    "location not synced"
                );
            }
            println!(
                "sync complete: run_id={} sources={}/{} items={} item_failures={} \
                 created={} updated={} unchanged={}",
                summary.run_id,
                summary.sources_processed,
                summary.locations,
                summary.items_processed,
                summary.items_failed,
                summary.records_created,
                summary.records_updated,
                summary.records_unchanged
            );
        }
        Commands::Preview { url, rules } => {
            if rules.is_some() {
                config.rules_path = rules;
            }
            let http = HttpFetcher::new(HttpClientConfig {
                timeout: Duration::from_secs(config.http_timeout_secs),
                user_agent: Some(config.user_agent.clone()),
            })?;
            let fetcher = HttpCatalogFetcher::new(http);
            let classified = fetch_and_classify(&fetcher, &url, &config.load_rules()?).await?;
            println!("{}", serde_json::to_string_pretty(&classified)?);
        }
    }

    Ok(())
}
