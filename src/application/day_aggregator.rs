// Day aggregator - Accumulates one day's records and flushes them at end of day
use crate::application::clock::Clock;
use crate::application::day_sink::{DaySink, DayTable, SinkError};
use crate::domain::measurement::MeasurementRecord;
use chrono::{NaiveDate, NaiveTime};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Result of an end-of-day call that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    Written(PathBuf),
    /// The window held no rows and empty days are skipped.
    Empty,
    /// The window was already closed.
    AlreadyClosed,
}

pub struct DayAggregator {
    sink: Arc<dyn DaySink>,
    clock: Arc<dyn Clock>,
    write_attempts: u32,
    retry_delay: Duration,
    skip_empty_days: bool,
    day_key: NaiveDate,
    rows: Vec<MeasurementRecord>,
    // None until the first record of the window is admitted
    latest_seen: Option<NaiveTime>,
    closed: bool,
}

impl DayAggregator {
    pub fn new(sink: Arc<dyn DaySink>, clock: Arc<dyn Clock>, write_attempts: u32) -> Self {
        let day_key = clock.now().date();
        Self {
            sink,
            clock,
            write_attempts: write_attempts.max(1),
            retry_delay: DEFAULT_RETRY_DELAY,
            skip_empty_days: false,
            day_key,
            rows: Vec::new(),
            latest_seen: None,
            closed: false,
        }
    }

    /// Delay before the first write retry; doubled for each further retry.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Close windows without rows without calling the sink.
    pub fn with_skip_empty_days(mut self, skip_empty_days: bool) -> Self {
        self.skip_empty_days = skip_empty_days;
        self
    }

    /// Admit a record if it is strictly newer than anything seen this window.
    pub fn add(&mut self, record: MeasurementRecord) -> bool {
        if self.closed {
            self.reopen();
        }

        let time = record.receive_time();
        if self.latest_seen.is_some_and(|latest| time <= latest) {
            tracing::trace!("Discarding duplicate or out-of-order record at {}", time);
            return false;
        }

        self.latest_seen = Some(time);
        self.rows.push(record);
        true
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }

    pub fn day_key(&self) -> NaiveDate {
        self.day_key
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the window and hand its rows to the sink. No-op when already closed.
    ///
    /// The window is closed even if every write attempt fails; the rows of that
    /// day are then dropped so the next day starts clean.
    pub async fn end_of_day(&mut self) -> Result<FlushOutcome, SinkError> {
        if self.closed {
            return Ok(FlushOutcome::AlreadyClosed);
        }

        let table = DayTable {
            day_key: self.day_key,
            rows: std::mem::take(&mut self.rows),
        };
        self.closed = true;
        self.latest_seen = None;

        if table.rows.is_empty() && self.skip_empty_days {
            tracing::info!("Day {} closed with no readings", table.day_key);
            return Ok(FlushOutcome::Empty);
        }

        let mut attempt = 1;
        let mut delay = self.retry_delay;
        loop {
            match self.sink.write_day(&table).await {
                Ok(path) => {
                    tracing::info!(
                        "Day {} closed: {} readings written to {}",
                        table.day_key,
                        table.rows.len(),
                        path.display()
                    );
                    return Ok(FlushOutcome::Written(path));
                }
                Err(e) if attempt < self.write_attempts => {
                    tracing::warn!(
                        "Write attempt {}/{} for day {} failed: {}",
                        attempt,
                        self.write_attempts,
                        table.day_key,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn reopen(&mut self) {
        self.day_key = self.clock.now().date();
        self.rows.clear();
        self.latest_seen = None;
        self.closed = false;
        tracing::info!("Opened day window {}", self.day_key);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::application::clock::tests::FixedClock;
    use crate::domain::measurement::InverterTelemetry;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Sink that records every table and can fail a number of times first.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) tables: Mutex<Vec<DayTable>>,
        pub(crate) failures_left: Mutex<u32>,
        pub(crate) calls: Mutex<u32>,
    }

    impl RecordingSink {
        pub(crate) fn failing(times: u32) -> Self {
            Self {
                failures_left: Mutex::new(times),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl DaySink for RecordingSink {
        async fn write_day(&self, table: &DayTable) -> Result<PathBuf, SinkError> {
            *self.calls.lock().unwrap() += 1;
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SinkError::Io {
                    path: PathBuf::from("/unwritable"),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                });
            }
            self.tables.lock().unwrap().push(table.clone());
            Ok(PathBuf::from(format!("{}.csv", table.day_key)))
        }
    }

    pub(crate) fn record(time: &str, power: f64) -> MeasurementRecord {
        MeasurementRecord::new(
            NaiveTime::parse_from_str(time, "%H:%M:%S").unwrap(),
            InverterTelemetry {
                inverter_serial: "1031234567890AB".to_string(),
                current_power: power,
                ..Default::default()
            },
        )
    }

    fn aggregator(sink: Arc<RecordingSink>, clock: Arc<FixedClock>) -> DayAggregator {
        DayAggregator::new(sink, clock, 3).with_retry_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_starts_open_and_empty() {
        let clock = Arc::new(FixedClock::at("2024-06-01 05:00:00"));
        let agg = aggregator(Arc::new(RecordingSink::default()), clock);
        assert_eq!(agg.count(), 0);
        assert!(!agg.is_closed());
        assert_eq!(agg.day_key(), NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
    }

    #[test]
    fn test_exact_repeat_admitted_once() {
        let clock = Arc::new(FixedClock::at("2024-06-01 05:00:00"));
        let mut agg = aggregator(Arc::new(RecordingSink::default()), clock);

        assert!(agg.add(record("10:00:00", 100.0)));
        assert!(!agg.add(record("10:00:00", 100.0)));
        assert_eq!(agg.count(), 1);
    }

    #[test]
    fn test_rejects_anything_not_newer_than_admitted_max() {
        let clock = Arc::new(FixedClock::at("2024-06-01 05:00:00"));
        let mut agg = aggregator(Arc::new(RecordingSink::default()), clock);

        assert!(agg.add(record("10:00:05", 1.0)));
        assert!(!agg.add(record("10:00:01", 2.0)));
        assert!(!agg.add(record("10:00:03", 3.0)));
        assert!(!agg.add(record("10:00:05", 4.0)));
        assert!(agg.add(record("10:00:06", 5.0)));
        assert_eq!(agg.count(), 2);
    }

    #[test]
    fn test_midnight_record_admitted_into_fresh_window() {
        let clock = Arc::new(FixedClock::at("2024-06-01 00:00:00"));
        let mut agg = aggregator(Arc::new(RecordingSink::default()), clock);
        assert!(agg.add(record("00:00:00", 1.0)));
    }

    #[tokio::test]
    async fn test_end_of_day_twice_writes_once() {
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(FixedClock::at("2024-06-01 05:00:00"));
        let mut agg = aggregator(sink.clone(), clock);
        agg.add(record("10:00:00", 1.0));
        agg.add(record("11:00:00", 2.0));

        let first = agg.end_of_day().await.unwrap();
        let second = agg.end_of_day().await.unwrap();

        assert_eq!(first, FlushOutcome::Written(PathBuf::from("2024-06-01.csv")));
        assert_eq!(second, FlushOutcome::AlreadyClosed);
        assert_eq!(*sink.calls.lock().unwrap(), 1);

        let tables = sink.tables.lock().unwrap();
        assert_eq!(tables[0].rows, vec![record("10:00:00", 1.0), record("11:00:00", 2.0)]);
        assert_eq!(agg.count(), 0);
        assert!(agg.is_closed());
    }

    #[tokio::test]
    async fn test_empty_window_handed_to_sink_once() {
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(FixedClock::at("2024-06-01 05:00:00"));
        let mut agg = aggregator(sink.clone(), clock);

        let first = agg.end_of_day().await.unwrap();
        let second = agg.end_of_day().await.unwrap();

        assert_eq!(first, FlushOutcome::Written(PathBuf::from("2024-06-01.csv")));
        assert_eq!(second, FlushOutcome::AlreadyClosed);
        assert_eq!(*sink.calls.lock().unwrap(), 1);
        assert!(sink.tables.lock().unwrap()[0].rows.is_empty());
    }

    #[tokio::test]
    async fn test_empty_window_skipped_when_configured() {
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(FixedClock::at("2024-06-01 05:00:00"));
        let mut agg = aggregator(sink.clone(), clock).with_skip_empty_days(true);

        assert_eq!(agg.end_of_day().await.unwrap(), FlushOutcome::Empty);
        assert!(agg.is_closed());
        assert_eq!(*sink.calls.lock().unwrap(), 0);

        agg.add(record("10:00:00", 1.0));
        agg.end_of_day().await.unwrap();
        assert_eq!(*sink.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_after_close_reopens_with_new_day_key() {
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(FixedClock::at("2024-06-01 05:00:00"));
        let mut agg = aggregator(sink.clone(), clock.clone());
        agg.add(record("20:00:00", 1.0));
        agg.end_of_day().await.unwrap();
        assert_eq!(agg.count(), 0);

        clock.set("2024-06-02 06:10:00");
        // earlier time of day than yesterday's last record
        assert!(agg.add(record("06:10:00", 2.0)));
        assert_eq!(agg.count(), 1);
        assert!(!agg.is_closed());
        assert_eq!(agg.day_key(), NaiveDate::from_ymd_opt(2024, 6, 2).unwrap());

        agg.end_of_day().await.unwrap();
        let tables = sink.tables.lock().unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[1].day_key, NaiveDate::from_ymd_opt(2024, 6, 2).unwrap());
        assert_eq!(tables[1].rows, vec![record("06:10:00", 2.0)]);
    }

    #[tokio::test]
    async fn test_write_retried_until_success() {
        let sink = Arc::new(RecordingSink::failing(2));
        let clock = Arc::new(FixedClock::at("2024-06-01 05:00:00"));
        let mut agg = aggregator(sink.clone(), clock);
        agg.add(record("10:00:00", 1.0));

        let outcome = agg.end_of_day().await.unwrap();
        assert!(matches!(outcome, FlushOutcome::Written(_)));
        assert_eq!(*sink.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retries_back_off() {
        let sink = Arc::new(RecordingSink::failing(2));
        let clock = Arc::new(FixedClock::at("2024-06-01 05:00:00"));
        let mut agg = DayAggregator::new(sink.clone(), clock, 3)
            .with_retry_delay(Duration::from_millis(40));
        agg.add(record("10:00:00", 1.0));

        let started = std::time::Instant::now();
        agg.end_of_day().await.unwrap();

        // 40ms then 80ms
        assert!(started.elapsed() >= Duration::from_millis(120));
        assert_eq!(*sink.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_write_failure_reported_and_aggregator_keeps_working() {
        let sink = Arc::new(RecordingSink::failing(10));
        let clock = Arc::new(FixedClock::at("2024-06-01 05:00:00"));
        let mut agg = aggregator(sink.clone(), clock);
        agg.add(record("10:00:00", 1.0));

        assert!(agg.end_of_day().await.is_err());
        assert_eq!(*sink.calls.lock().unwrap(), 3);
        assert!(agg.is_closed());

        // repeated timeouts do not retry a failed day
        assert_eq!(agg.end_of_day().await.unwrap(), FlushOutcome::AlreadyClosed);

        assert!(agg.add(record("07:00:00", 2.0)));
        assert_eq!(agg.count(), 1);
    }
}
