use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Args;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer as _};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use digger_core::consumer::KafkaConsumer;
use digger_core::util::{parse_range_str, parse_time_or_duration};
use digger_core::DiggerError;

use super::{run_digger, split_list, CommonArgs};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Args, Debug)]
pub struct KafkaArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Kafka bootstrap address
    #[arg(short = 'a', long)]
    pub address: String,

    /// Starting offset: -1 for the tail, 0 for the tail sentinel, any other
    /// value is used as-is
    #[arg(short = 'o', long, default_value_t = -1, allow_hyphen_values = true)]
    pub offset: i64,

    /// Partitions to read, as a range expression like "0,2,4-6"; all
    /// partitions when unset
    #[arg(short = 'p', long, default_value = "")]
    pub partitions: String,

    /// Comma-separated list of registered binary schema names
    #[arg(long, default_value = "")]
    pub schemas: String,

    /// Time to start at, as an RFC-3339 timestamp or a duration relative to
    /// now (e.g. "-30m")
    #[arg(long, default_value = "")]
    pub since: String,

    /// Time to stop at, as an RFC-3339 timestamp or a duration relative to
    /// now
    #[arg(long, default_value = "")]
    pub until: String,

    /// Kafka topic
    #[arg(short = 't', long)]
    pub topic: String,
}

pub async fn run(args: KafkaArgs, shutdown: CancellationToken) -> Result<(), DiggerError> {
    let now = Utc::now();
    let since = parse_time_or_duration(&args.since, now)?;
    let until = parse_time_or_duration(&args.until, now)?;
    validate_times(now, since, until)?;

    let (partitions, total) =
        read_partitions(args.address.clone(), args.topic.clone(), args.partitions.clone()).await?;

    if !args.common.raw && !args.common.raw_extended {
        info!(
            "Reading from {} partitions (out of {} total)",
            partitions.len(),
            total,
        );
    }

    let consumer = Arc::new(KafkaConsumer {
        brokers: args.address,
        topic: args.topic,
        partitions,
        offset: args.offset,
        since,
        until,
        fetch_min_bytes: Some(10_000),
        fetch_max_bytes: Some(10_000_000),
    });

    run_digger(
        consumer,
        &args.common,
        split_list(&args.schemas),
        shutdown,
    )
    .await
}

fn validate_times(
    now: DateTime<Utc>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> Result<(), DiggerError> {
    if let Some(since) = since {
        if since > now {
            return Err(DiggerError::Config("since must be in the past".to_string()));
        }
        if let Some(until) = until {
            if since > until {
                return Err(DiggerError::Config(
                    "since must be before until".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Discover the topic's partitions from broker metadata and intersect them
/// with the requested range expression. Returns the selected partition IDs
/// and the total partition count.
async fn read_partitions(
    address: String,
    topic: String,
    partitions: String,
) -> Result<(Vec<i32>, usize), DiggerError> {
    tokio::task::spawn_blocking(move || {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", &address)
            .create()?;

        debug!(%topic, %address, "fetching partitions");

        let metadata = consumer.fetch_metadata(Some(&topic), METADATA_TIMEOUT)?;
        let topic_metadata = metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .ok_or_else(|| DiggerError::Config(format!("topic {topic} not found")))?;

        let available: Vec<i32> = topic_metadata
            .partitions()
            .iter()
            .map(|p| p.id())
            .collect();

        if partitions.is_empty() {
            let total = available.len();
            return Ok((available, total));
        }

        let requested = parse_range_str(&partitions)?;
        let selected: Vec<i32> = available
            .iter()
            .copied()
            .filter(|id| requested.contains(id))
            .collect();

        Ok((selected, available.len()))
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_validate_times() {
        let now = Utc::now();
        let past = Some(now - ChronoDuration::minutes(30));
        let recent = Some(now - ChronoDuration::minutes(5));
        let future = Some(now + ChronoDuration::minutes(30));

        assert!(validate_times(now, None, None).is_ok());
        assert!(validate_times(now, past, None).is_ok());
        assert!(validate_times(now, past, recent).is_ok());

        assert!(validate_times(now, future, None).is_err());
        assert!(validate_times(now, recent, past).is_err());
    }
}
