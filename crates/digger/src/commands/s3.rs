use std::sync::Arc;

use aws_config::BehaviorVersion;
use clap::Args;
use tokio_util::sync::CancellationToken;

use digger_core::consumer::S3Consumer;
use digger_core::DiggerError;

use super::{run_digger, split_list, CommonArgs};

#[derive(Args, Debug)]
pub struct S3Args {
    #[command(flatten)]
    pub common: CommonArgs,

    /// S3 bucket
    #[arg(short = 'b', long)]
    pub bucket: String,

    /// Number of objects to read in parallel
    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,

    /// Comma-separated list of key prefixes
    #[arg(short = 'p', long)]
    pub prefixes: String,
}

pub async fn run(args: S3Args, shutdown: CancellationToken) -> Result<(), DiggerError> {
    let prefixes = split_list(&args.prefixes);
    if prefixes.is_empty() {
        return Err(DiggerError::Config(
            "at least one prefix is required".to_string(),
        ));
    }

    let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let client = aws_sdk_s3::Client::new(&config);

    let consumer = Arc::new(S3Consumer {
        client,
        bucket: args.bucket,
        prefixes,
        num_workers: args.num_workers,
    });

    run_digger(consumer, &args.common, Vec::new(), shutdown).await
}
