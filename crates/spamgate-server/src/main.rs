//! Spamgate - anti-spam test runner entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spamgate_common::config::Config;
use spamgate_common::logging::init_logging;
use spamgate_core::{
    ConfiguredTransport, DnsResolver, SharedSpamAssassinConfig, SpamAssassinTestConnect,
    SpamTestData, SpamTestResultSet, SpamTestSpamAssassin, SpamTestSuite,
};
use spamgate_storage::{LocalStorage, MessageStorage};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "spamgate",
    about = "Run anti-spam tests against mail messages",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (default: ./spamgate.toml, then /etc/spamgate/spamgate.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that SpamAssassin is reachable by scanning the GTUBE message
    TestConnect {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Run the enabled spam tests against a message file
    Scan {
        /// RFC 5322 message to test
        file: PathBuf,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    init_logging(&config.logging);

    let spamassassin: SharedSpamAssassinConfig =
        Arc::new(RwLock::new(config.antispam.spamassassin.clone()));

    match cli.command {
        Commands::TestConnect { json } => test_connect(&config, &spamassassin, json).await,
        Commands::Scan { file, json } => scan(&file, &spamassassin, json).await,
    }
}

async fn test_connect(config: &Config, spamassassin: &SharedSpamAssassinConfig, json: bool) -> Result<()> {
    let sa = &config.antispam.spamassassin;
    info!(host = %sa.host, port = sa.port, tls = sa.tls.is_some(), "Testing SpamAssassin connection");

    let resolver = DnsResolver::system();
    let transport = ConfiguredTransport::new(spamassassin.clone())
        .context("Invalid SpamAssassin TLS settings")?;

    match SpamAssassinTestConnect::test_connect(spamassassin, &resolver, &transport).await {
        Ok(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("SpamAssassin at {}:{}", report.resolved_address, sa.port);
                println!("  completed:   {}", report.completed);
                println!("  spam:        {}", report.is_spam);
                println!("  score:       {}", report.score);
                println!(
                    "  X-Spam-Status: {}",
                    report.spam_status.as_deref().unwrap_or("(missing)")
                );
            }
            if !report.is_spam {
                warn!("SpamAssassin did not tag the GTUBE message as spam");
            }
        }
        Err(e) => {
            // An unreachable engine is a finding, not a process failure
            if json {
                println!("{}", serde_json::json!({ "error": e.to_string() }));
            } else {
                println!("SpamAssassin connection test failed: {}", e);
            }
        }
    }

    Ok(())
}

async fn scan(file: &Path, spamassassin: &SharedSpamAssassinConfig, json: bool) -> Result<()> {
    let raw = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
    let storage = MessageStorage::new(Arc::new(LocalStorage::from_path(scratch.path())?));
    let message = storage.store_message(&uuid::Uuid::new_v4(), &raw).await?;
    let data = SpamTestData::new(message).await?;

    let suite = SpamTestSuite::new().with_test(Arc::new(
        SpamTestSpamAssassin::from_config(spamassassin.clone())
            .context("Invalid SpamAssassin settings")?,
    ));

    info!(file = %file.display(), tests = ?suite.test_names(), "Scanning message");
    let results = suite.run(&data).await;
    print_results(&results, json)?;

    Ok(())
}

fn print_results(results: &SpamTestResultSet, json: bool) -> Result<()> {
    if json {
        let items: Vec<_> = results.iter().map(|r| r.as_ref()).collect();
        let output = serde_json::json!({
            "results": items,
            "total_score": results.total_score(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No spam test results");
    }
    for result in results.iter() {
        println!(
            "{:<24} {:<5} {:>6}  {}",
            result.test_name(),
            result.outcome().to_string(),
            result.score(),
            result.reason()
        );
    }
    println!("Total score: {}", results.total_score());

    Ok(())
}
