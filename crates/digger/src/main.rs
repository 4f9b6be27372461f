//! Command-line entrypoint for the digger.

mod commands;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use commands::{file::FileArgs, kafka::KafkaArgs, s3::S3Args, CommonArgs};

#[derive(Parser, Debug)]
#[command(
    name = "digger",
    about = "Dig through JSON or binary record streams and report live value stats",
    disable_version_flag = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dig through newline-delimited records in local files
    File(FileArgs),
    /// Dig through records in a Kafka topic
    Kafka(KafkaArgs),
    /// Dig through newline-delimited records in S3 objects
    S3(S3Args),
    /// Print the digger version
    Version,
}

impl Command {
    fn common(&self) -> Option<&CommonArgs> {
        match self {
            Command::File(args) => Some(&args.common),
            Command::Kafka(args) => Some(&args.common),
            Command::S3(args) => Some(&args.common),
            Command::Version => None,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let debug_logging = cli.command.common().is_some_and(|c| c.debug);
    init_tracing(debug_logging);

    digger_proto::register_builtin_schemas();

    let shutdown = CancellationToken::new();
    let interrupt_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("caught interrupt, cancelling");
            interrupt_token.cancel();
        }
    });

    let result = match cli.command {
        Command::File(args) => commands::file::run(args, shutdown).await,
        Command::Kafka(args) => commands::kafka::run(args, shutdown).await,
        Command::S3(args) => commands::s3::run(args, shutdown).await,
        Command::Version => {
            println!("digger version v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error running digger: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(debug: bool) {
    let level = if debug { "debug" } else { "info" };

    let filter = EnvFilter::try_new(format!("rdkafka=off,librdkafka=off,{level}"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr; stdout is reserved for raw record output.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
