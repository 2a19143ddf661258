// Ingest service - Decodes datagrams and feeds the day aggregator
use crate::application::day_aggregator::{DayAggregator, FlushOutcome};
use crate::application::day_sink::SinkError;
use crate::domain::frame::{FrameDecoder, FrameError};
use crate::domain::measurement::MeasurementRecord;
use chrono::NaiveTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Admitted,
    Duplicate,
    Dropped(FrameError),
}

pub struct IngestService {
    decoder: FrameDecoder,
    aggregator: DayAggregator,
}

impl IngestService {
    pub fn new(decoder: FrameDecoder, aggregator: DayAggregator) -> Self {
        Self {
            decoder,
            aggregator,
        }
    }

    pub fn handle_datagram(&mut self, raw: &[u8], received_at: NaiveTime) -> IngestOutcome {
        let frame = match self.decoder.try_decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                match e {
                    FrameError::ChecksumMismatch { .. } | FrameError::BadMarkers { .. } => {
                        tracing::warn!("Dropping frame received at {}: {}", received_at, e);
                    }
                    _ => tracing::debug!("Ignoring frame received at {}: {}", received_at, e),
                }
                return IngestOutcome::Dropped(e);
            }
        };

        if !frame.checksum_ok() {
            tracing::warn!(
                "Checksum mismatch in frame received at {} (stored {:#04x}, computed {:#04x})",
                received_at,
                frame.stored_checksum,
                frame.computed_checksum
            );
        }
        if !frame.markers_ok {
            tracing::warn!("Unexpected frame markers in frame received at {}", received_at);
        }

        let record = MeasurementRecord::new(received_at, frame.telemetry);
        if self.aggregator.add(record) {
            tracing::debug!(
                "Admitted reading at {} ({} on {})",
                received_at,
                self.aggregator.count(),
                self.aggregator.day_key()
            );
            IngestOutcome::Admitted
        } else {
            IngestOutcome::Duplicate
        }
    }

    pub async fn end_of_day(&mut self) -> Result<FlushOutcome, SinkError> {
        self.aggregator.end_of_day().await
    }

    #[cfg(test)]
    pub fn aggregator(&self) -> &DayAggregator {
        &self.aggregator
    }
}
