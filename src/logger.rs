/*!
This module contains the [`ReaderLogger`] trait and the [`DefaultLogger`] implementation.

The [`ReaderLogger`] trait is an interface of hooks called by the
[`SourceReader`][crate::reader::SourceReader] and the
[`ReaderProcessor`][crate::processor::ReaderProcessor] at various points of a
read. This allows for custom logging and metric collection. The default
implementation is [`DefaultLogger`].
*/

use async_trait::async_trait;
use colored::Colorize;
use log::{debug, error, info, warn};
use std::{
    collections::VecDeque,
    error::Error,
    time::{Duration, Instant},
};

use crate::{
    checkpoint::CheckpointMark,
    models::{Offset, Timestamp},
};

/// The interval at which the metrics are considered for the
/// records per second report.
const METRIC_CONSIDERATION_INTERVAL: Duration = Duration::from_secs(10);

/// Metrics about a read, collected by the [`DefaultLogger`].
pub struct ReaderMetrics {
    pub records_delivered: u64,
    pub records_skipped: u64,
    pub restarts: u64,
    pub time_started: Instant,
    pub last_offset: Option<Offset>,
    pub last_timestamp: Option<Timestamp>,
    pub recent_records: VecDeque<Instant>,
}

impl Default for ReaderMetrics {
    fn default() -> Self {
        Self {
            records_delivered: 0,
            records_skipped: 0,
            restarts: 0,
            time_started: Instant::now(),
            last_offset: None,
            last_timestamp: None,
            recent_records: VecDeque::new(),
        }
    }
}

/// An interface of hooks called during a read.
#[async_trait]
pub trait ReaderLogger: Send + Sync {
    /// Called when a receiver instance was started. `generation` counts
    /// the instances of this reader, starting at 1.
    async fn receiver_started(&mut self, generation: u64, start_offset: Offset);
    /// Called when a receiver stopped or failed mid-stream and is about to
    /// be replaced after `restart_delay`.
    async fn receiver_failed(
        &mut self,
        generation: u64,
        reason: &str,
        restart_delay: Duration,
    );
    /// Called when a record at or below the last delivered offset was
    /// discarded.
    async fn record_skipped(&mut self, offset: Offset, resume_offset: Offset);
    /// Called when a record was handed out by the reader.
    async fn record_delivered(&mut self, offset: Offset, timestamp: Timestamp);
    /// Called when the processor committed a checkpoint mark.
    async fn checkpoint_committed(&mut self, mark: &CheckpointMark);
    /// Called when a record handler asked for a retry. It could be called
    /// multiple times for the same record if it continues to fail.
    async fn record_retry_error(
        &mut self,
        offset: Offset,
        error: &anyhow::Error,
        timeout: Duration,
    );
    /// Called when the read stops because of an error.
    async fn unrecoverable_error(&mut self, error: &(dyn Error + Send + Sync));
    /// Called periodically by the processor.
    async fn periodic_report(&self);
    /// How often `periodic_report` should be called.
    fn periodic_report_interval(&self) -> Duration;
}

/// The default logger implementation. It collects some metrics about the
/// read and logs them periodically, next to lifecycle messages.
pub struct DefaultLogger {
    metrics: ReaderMetrics,
    custom_report_interval: Option<Duration>,
}

impl Default for DefaultLogger {
    fn default() -> Self {
        Self {
            metrics: ReaderMetrics::default(),
            custom_report_interval: None,
        }
    }
}

impl DefaultLogger {
    pub fn with_custom_report_interval(
        custom_report_interval: Duration,
    ) -> Self {
        Self {
            custom_report_interval: Some(custom_report_interval),
            ..Self::default()
        }
    }

    pub fn metrics(&self) -> &ReaderMetrics {
        &self.metrics
    }
}

/// Renders an error with its whole source chain on one line.
pub(crate) fn error_chain(error: &(dyn Error + Send + Sync)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[async_trait]
impl ReaderLogger for DefaultLogger {
    async fn receiver_started(&mut self, generation: u64, start_offset: Offset) {
        let message = format!(
            "RECEIVER #{} STARTED - RESUMING AT OFFSET {}",
            generation, start_offset
        )
        .bright_green();
        info!("{}", message);
    }

    async fn receiver_failed(
        &mut self,
        generation: u64,
        reason: &str,
        restart_delay: Duration,
    ) {
        self.metrics.restarts += 1;
        let message =
            format!("RECEIVER #{} ENDED - {}", generation, reason).bright_red();
        let retry_message = format!(
            "RESTARTING IN {:.1} SECONDS",
            restart_delay.as_secs_f32()
        )
        .bright_yellow();
        warn!("{}", message);
        info!("{}", retry_message);
    }

    async fn record_skipped(&mut self, offset: Offset, resume_offset: Offset) {
        self.metrics.records_skipped += 1;
        debug!(
            "skipping redelivered offset {} (receivers resume at {})",
            offset, resume_offset
        );
    }

    async fn record_delivered(&mut self, offset: Offset, timestamp: Timestamp) {
        self.metrics.records_delivered += 1;
        self.metrics.last_offset = Some(offset);
        self.metrics.last_timestamp = Some(timestamp);
        let now = Instant::now();
        self.metrics.recent_records.push_back(now);
        while let Some(&time) = self.metrics.recent_records.front() {
            if now.duration_since(time) > METRIC_CONSIDERATION_INTERVAL {
                self.metrics.recent_records.pop_front();
            } else {
                break;
            }
        }
    }

    async fn checkpoint_committed(&mut self, mark: &CheckpointMark) {
        debug!("committed checkpoint {:?}", mark.last_offset);
    }

    async fn record_retry_error(
        &mut self,
        offset: Offset,
        error: &anyhow::Error,
        timeout: Duration,
    ) {
        let message =
            format!("ERROR HANDLING RECORD AT OFFSET {} - {:?}", offset, error)
                .bright_red();
        let retry_message =
            format!("RETRYING IN {:.1} SECONDS\n", timeout.as_secs_f32())
                .bright_yellow();

        error!("{}", message);
        info!("{}", retry_message);
    }

    async fn unrecoverable_error(&mut self, error: &(dyn Error + Send + Sync)) {
        let message =
            format!("UNRECOVERABLE ERROR: {}", error_chain(error)).bright_red();
        error!("{}", message);
    }

    async fn periodic_report(&self) {
        match self.metrics.last_offset {
            Some(offset) => {
                let state_message = format!(
                    "DELIVERED UP TO: {} - {}",
                    offset,
                    self.metrics
                        .last_timestamp
                        .map(|timestamp| timestamp
                            .format("%a %d-%m-%Y %H:%M")
                            .to_string())
                        .unwrap_or_default()
                )
                .bright_blue();

                let window = METRIC_CONSIDERATION_INTERVAL.as_secs().min(
                    self.metrics.time_started.elapsed().as_secs().max(1),
                );
                let records_per_second =
                    self.metrics.recent_records.len() as u64 / window;
                let rate_message = format!(
                    "PROCESSING ~{} RECORDS PER SECOND",
                    records_per_second
                )
                .bright_blue();
                let totals_message = format!(
                    "DELIVERED {} - SKIPPED {} - RESTARTS {}",
                    self.metrics.records_delivered,
                    self.metrics.records_skipped,
                    self.metrics.restarts
                )
                .bright_blue();
                info!("{}", state_message);
                info!("{}", rate_message);
                info!("{}", totals_message);
            }
            None => {
                info!("{}", "NO RECORDS DELIVERED YET".bright_blue());
            }
        }
    }

    fn periodic_report_interval(&self) -> Duration {
        self.custom_report_interval
            .unwrap_or(Duration::from_secs(5))
    }
}
