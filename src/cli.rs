use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::contract::VideoStore;
use crate::database::{default_init_policy, SqliteVideoStore};
use crate::download::YtDlpFetcher;
use crate::load_config::{load_config, load_database_url};
use crate::notify::SmtpMailer;
use crate::pipeline::{Collaborators, Pipeline};
use crate::publish::GcsStorage;
use crate::resolve::YouTubeClient;
use crate::segment::FfmpegEngine;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// CLI for vod-slicer: cut the latest finished livestream into 15-minute parts and publish them.
#[derive(Parser)]
#[clap(
    name = "vod-slicer",
    version,
    about = "Download the latest completed livestream, split it into 15-minute segments, publish the archive and notify stakeholders"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline once
    Run {
        /// Path to the YAML config file (secrets always come from the environment)
        #[clap(long)]
        config: Option<PathBuf>,
    },
    /// Create the videos table if it does not exist
    InitDb {
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

/// Async CLI entrypoint shared by main() and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { config } => {
            let config = load_config(config.as_deref())?;
            config.trace_loaded();
            run_pipeline(config).await
        }
        Commands::InitDb { config } => {
            let url = load_database_url(config.as_deref())?;
            init_db(&url).await
        }
    }
}

async fn run_pipeline(config: PipelineConfig) -> Result<()> {
    let lookup = YouTubeClient::new(config.source.api_key.clone(), config.source.timeout)?;
    let storage = GcsStorage::new(
        config.storage.bucket.clone(),
        config.storage.access_token.clone(),
        &config.storage.endpoint,
        UPLOAD_TIMEOUT,
    )?;
    let mailer = SmtpMailer::new(&config.mail)?;

    let policy = default_init_policy();
    let store = SqliteVideoStore::connect(&config.database.url, &policy)
        .await
        .context("connecting to the database")?;
    if let Err(e) = store.init_schema(&policy).await {
        store.close().await;
        return Err(e).context("preparing the database schema");
    }

    let deps = Collaborators {
        lookup: Arc::new(lookup),
        fetcher: Arc::new(YtDlpFetcher::new()),
        engine: Arc::new(FfmpegEngine::new()),
        storage: Arc::new(storage),
        store: Arc::new(store),
        mailer: Arc::new(mailer),
    };

    println!("Pipeline starting...");
    match Pipeline::new(config, deps).run().await {
        Ok(report) => {
            if report.succeeded() {
                println!("Pipeline complete.");
            } else {
                eprintln!("[ERROR] Pipeline ended in state {:?}", report.state);
            }
            println!("Report:");
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Pipeline aborted");
            eprintln!("[ERROR] Pipeline aborted: {e}");
            Err(anyhow::Error::new(e))
        }
    }
}

async fn init_db(url: &str) -> Result<()> {
    let policy = default_init_policy();
    let store = SqliteVideoStore::connect(url, &policy)
        .await
        .context("connecting to the database")?;
    let result = async {
        store.init_schema(&policy).await?;
        store.count_videos().await
    }
    .await;
    store.close().await;

    let count = result.context("preparing the database schema")?;
    info!(videos = count, "Database ready");
    println!("Database ready ({count} videos recorded).");
    Ok(())
}
