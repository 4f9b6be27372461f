pub mod file;
pub mod kafka;
pub mod s3;

use std::sync::Arc;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use digger_core::consumer::Consumer;
use digger_core::engine::Digger;
use digger_core::processor::{LiveStats, LiveStatsConfig, Processor};
use digger_core::DiggerError;

/// Flags shared by every source sub-command.
#[derive(Args, Clone, Debug)]
pub struct CommonArgs {
    /// Turn on debug logging
    #[arg(long)]
    pub debug: bool,

    /// Filter regexp to apply before generating stats
    #[arg(short = 'f', long)]
    pub filter: Option<String>,

    /// Number of top values to show
    #[arg(short = 'k', long = "num-categories", default_value_t = 25)]
    pub num_categories: usize,

    /// Treat values as numbers instead of strings
    #[arg(long)]
    pub numeric: bool,

    /// Paths to generate stats for: groups separated by ';', paths within a
    /// group by ','
    #[arg(long, default_value = "")]
    pub paths: String,

    /// Print out records that miss all paths
    #[arg(long)]
    pub print_missing: bool,

    /// Show raw records that pass filters
    #[arg(long)]
    pub raw: bool,

    /// Show extended info about records that pass filters
    #[arg(long)]
    pub raw_extended: bool,

    /// Sort top K values by their category names
    #[arg(long)]
    pub sort_by_name: bool,
}

pub fn make_processors(
    common: &CommonArgs,
    schemas: Vec<String>,
) -> Result<Vec<Box<dyn Processor>>, DiggerError> {
    let live_stats = LiveStats::new(LiveStatsConfig {
        filter: common.filter.clone(),
        k: common.num_categories,
        numeric: common.numeric,
        paths: common.paths.clone(),
        print_missing: common.print_missing,
        schemas,
        raw: common.raw,
        raw_extended: common.raw_extended,
        sort_by_name: common.sort_by_name,
    })?;

    Ok(vec![Box::new(live_stats)])
}

/// Run the engine to completion, stop the processors, and log each
/// processor's summary. Cancellation counts as a clean stop.
pub async fn run_digger(
    consumer: Arc<dyn Consumer>,
    common: &CommonArgs,
    schemas: Vec<String>,
    shutdown: CancellationToken,
) -> Result<(), DiggerError> {
    let processors = make_processors(common, schemas)?;
    let mut digger = Digger::new(consumer, processors);

    if !common.raw && !common.raw_extended {
        info!("Starting digger; press ctrl-c to stop and print a summary");
    }

    match digger.run(shutdown).await {
        Ok(()) => {}
        Err(DiggerError::Cancelled) => debug!("engine cancelled"),
        Err(err) => return Err(err),
    }

    for processor in &mut digger.processors {
        processor.stop().await?;
        info!("Processor summary:\n{}", processor.summary());
    }

    Ok(())
}

/// Split a comma-separated flag value, dropping empty entries.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
