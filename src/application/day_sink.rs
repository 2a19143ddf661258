// Sink trait for finished day tables
use crate::domain::measurement::MeasurementRecord;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

/// One closed day window, rows in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct DayTable {
    pub day_key: NaiveDate,
    pub rows: Vec<MeasurementRecord>,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("sink task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait DaySink: Send + Sync {
    /// Persist a day table, returning where it was written.
    async fn write_day(&self, table: &DayTable) -> Result<PathBuf, SinkError>;
}
