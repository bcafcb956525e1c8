use anyhow::Result;
use clap::Parser;
use std::path::Path;
use vod_slicer::logging;
use vod_slicer::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _guard = logging::init(Path::new(logging::LOG_DIR))?;

    run(cli)
        .await
        .inspect_err(|e| tracing::error!(error = ?e, "vod-slicer failed"))
}
