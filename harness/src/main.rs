use clap::Parser;
use harness_backend::loopback::FaultPlan;
use std::sync::Arc;
use topic_harness::cli::Args;
use topic_harness::config::load_topic_file;
use topic_harness::loopback::loopback_for;
use topic_harness::Harness;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    topic_harness::init_logging();

    let args = Args::parse();
    info!("{args:?}");

    let path = args.topic_file()?;
    let app = load_topic_file(path)?;
    info!("Loaded {} topics for <{}>", app.topics.len(), app.app_name);

    let backend = Arc::new(loopback_for(&app.topics, FaultPlan::default()));
    let harness = Harness::prepare(&app.topics, backend, args.settings())?;

    let summary = harness.run().await?;
    print!("{}", summary.report);

    Ok(())
}
