//! Background progress rendering for the live-stats processor.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use digger_stats::{MessageCounter, TimeBucketCounter, TopKCounter};

use crate::DiggerError;

const SPINNER_STATES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

const INTERACTIVE_TICK: Duration = Duration::from_millis(50);
const PLAIN_TICK: Duration = Duration::from_secs(2);
// Effectively never; the loop only wakes up for the final update.
const SILENT_TICK: Duration = Duration::from_secs(3600);

/// How progress is presented while the digger runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ProgressMode {
    /// Rewrite a multi-line region in place at a fast tick.
    Interactive,
    /// Append plain blocks to stderr at a slow tick, so frequent log lines
    /// are not torn apart.
    Plain,
    /// Render nothing; stdout belongs to raw record output.
    Silent,
}

pub(crate) struct ProgressHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ProgressHandle {
    /// Signal the loop, let it print one final update, and join it.
    pub(crate) async fn stop(self) -> Result<(), DiggerError> {
        self.token.cancel();
        self.task.await?;
        Ok(())
    }
}

/// Start the progress loop for the given counters.
pub(crate) fn spawn(
    mode: ProgressMode,
    top_k: Arc<TopKCounter>,
    messages: Arc<MessageCounter>,
    rate: Arc<TimeBucketCounter>,
) -> ProgressHandle {
    let token = CancellationToken::new();
    let loop_token = token.clone();

    let task = tokio::spawn(async move {
        progress_loop(mode, loop_token, top_k, messages, rate).await;
    });

    ProgressHandle { token, task }
}

async fn progress_loop(
    mode: ProgressMode,
    token: CancellationToken,
    top_k: Arc<TopKCounter>,
    messages: Arc<MessageCounter>,
    rate: Arc<TimeBucketCounter>,
) {
    let tick = match mode {
        ProgressMode::Interactive => INTERACTIVE_TICK,
        ProgressMode::Plain => PLAIN_TICK,
        ProgressMode::Silent => SILENT_TICK,
    };

    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut live = LiveRegion::default();
    let mut spinner_index = 0;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                // One last update before shutting down
                render(mode, &mut live, spinner_index, &top_k, &messages, &rate);
                return;
            }
            _ = ticker.tick() => {
                render(mode, &mut live, spinner_index, &top_k, &messages, &rate);
                spinner_index = (spinner_index + 1) % SPINNER_STATES.len();
            }
        }
    }
}

fn render(
    mode: ProgressMode,
    live: &mut LiveRegion,
    spinner_index: usize,
    top_k: &TopKCounter,
    messages: &MessageCounter,
    rate: &TimeBucketCounter,
) {
    if mode == ProgressMode::Silent {
        return;
    }

    let text = render_text(spinner_index, top_k, messages, rate);

    match mode {
        ProgressMode::Interactive => live.rewrite(&text),
        ProgressMode::Plain => {
            let mut stderr = std::io::stderr().lock();
            let _ = stderr.write_all(text.as_bytes());
            let _ = stderr.flush();
        }
        ProgressMode::Silent => {}
    }
}

fn render_text(
    spinner_index: usize,
    top_k: &TopKCounter,
    messages: &MessageCounter,
    rate: &TimeBucketCounter,
) -> String {
    let top_k_summary = top_k.summary();
    let message_summary = messages.summary();

    format!(
        "{spinner} Reading records\n\
         \x20 {rate:.0} records / sec\n\
         \x20 {total} records total ({partitions} partitions/files, {first}->{last})\n\
         \x20 {post_filter} records post-filters\n\
         \x20 {added} record values added\n\
         \x20 {categories} categories\n\
         \x20 {missing} records with no value categories\n\
         \x20 {invalid} records with invalid structures\n\
         \x20 {removed} record values dropped due to category overflow\n",
        spinner = SPINNER_STATES[spinner_index],
        rate = rate.rate_per_sec(),
        total = message_summary.total_messages,
        partitions = message_summary.partition_counters.len(),
        first = format_time(message_summary.first_time),
        last = format_time(message_summary.last_time),
        post_filter = message_summary.post_filter_messages,
        added = top_k_summary.total_added,
        categories = top_k_summary.num_categories,
        missing = top_k_summary.total_missing,
        invalid = top_k_summary.total_invalid,
        removed = top_k_summary.total_removed,
    )
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(time) => time.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => "-".to_string(),
    }
}

/// Rewrites a block of lines in place on stdout using cursor-up and
/// erase-below escapes, so the progress block stays put while it updates.
#[derive(Default)]
struct LiveRegion {
    lines: usize,
}

impl LiveRegion {
    fn rewrite(&mut self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        if self.lines > 0 {
            let _ = write!(stdout, "\x1b[{}A\x1b[J", self.lines);
        }
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
        self.lines = text.matches('\n').count();
    }
}
