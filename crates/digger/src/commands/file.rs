use std::sync::Arc;

use clap::Args;
use tokio_util::sync::CancellationToken;

use digger_core::consumer::FileConsumer;
use digger_core::DiggerError;

use super::{run_digger, split_list, CommonArgs};

#[derive(Args, Debug)]
pub struct FileArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Comma-separated list of file paths
    #[arg(long)]
    pub file_paths: String,

    /// Scan subdirectories recursively
    #[arg(long)]
    pub recursive: bool,
}

pub async fn run(args: FileArgs, shutdown: CancellationToken) -> Result<(), DiggerError> {
    let paths = split_list(&args.file_paths);
    if paths.is_empty() {
        return Err(DiggerError::Config(
            "at least one file path is required".to_string(),
        ));
    }

    let consumer = Arc::new(FileConsumer {
        paths,
        recursive: args.recursive,
    });

    run_digger(consumer, &args.common, Vec::new(), shutdown).await
}
