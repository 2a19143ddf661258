// CSV spreadsheet sink - One file per closed day
use crate::application::day_sink::{DaySink, DayTable, SinkError};
use crate::domain::measurement::{InverterTelemetry, MeasurementRecord};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const COLUMNS: [&str; 15] = [
    "time",
    "serial",
    "power",
    "temperature",
    "vac1",
    "vac2",
    "vac3",
    "iac1",
    "iac2",
    "iac3",
    "vdc1",
    "vdc2",
    "idc1",
    "idc2",
    "frequency",
];

/// Flat spreadsheet row; field order must match `COLUMNS`.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    time: NaiveTime,
    serial: String,
    power: f64,
    temperature: f64,
    vac1: f64,
    vac2: f64,
    vac3: f64,
    iac1: f64,
    iac2: f64,
    iac3: f64,
    vdc1: f64,
    vdc2: f64,
    idc1: f64,
    idc2: f64,
    frequency: f64,
}

impl From<&MeasurementRecord> for CsvRow {
    fn from(record: &MeasurementRecord) -> Self {
        let t = record.telemetry();
        Self {
            time: record.receive_time(),
            serial: t.inverter_serial.clone(),
            power: t.current_power,
            temperature: t.temperature,
            vac1: t.vac1,
            vac2: t.vac2,
            vac3: t.vac3,
            iac1: t.iac1,
            iac2: t.iac2,
            iac3: t.iac3,
            vdc1: t.vdc1,
            vdc2: t.vdc2,
            idc1: t.idc1,
            idc2: t.idc2,
            frequency: t.frequency,
        }
    }
}

impl From<CsvRow> for MeasurementRecord {
    fn from(row: CsvRow) -> Self {
        MeasurementRecord::new(
            row.time,
            InverterTelemetry {
                inverter_serial: row.serial,
                current_power: row.power,
                temperature: row.temperature,
                frequency: row.frequency,
                vac1: row.vac1,
                vac2: row.vac2,
                vac3: row.vac3,
                iac1: row.iac1,
                iac2: row.iac2,
                iac3: row.iac3,
                vdc1: row.vdc1,
                vdc2: row.vdc2,
                idc1: row.idc1,
                idc2: row.idc2,
            },
        )
    }
}

#[derive(Debug, Clone)]
pub struct CsvDaySink {
    output_dir: PathBuf,
}

impl CsvDaySink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn write_blocking(output_dir: &Path, table: &DayTable) -> Result<PathBuf, SinkError> {
        std::fs::create_dir_all(output_dir).map_err(|source| SinkError::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;

        let (path, file) = Self::create_day_file(output_dir, table.day_key)?;
        let mut writer = csv::Writer::from_writer(file);
        if table.rows.is_empty() {
            // serialize() only emits the header along with the first row
            writer
                .write_record(COLUMNS)
                .map_err(|source| SinkError::Encode {
                    path: path.clone(),
                    source: source.into(),
                })?;
        }
        for record in &table.rows {
            writer
                .serialize(CsvRow::from(record))
                .map_err(|source| SinkError::Encode {
                    path: path.clone(),
                    source: source.into(),
                })?;
        }
        writer.flush().map_err(|source| SinkError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(path)
    }

    /// Create the day's file without ever reusing an existing one.
    fn create_day_file(output_dir: &Path, day: NaiveDate) -> Result<(PathBuf, File), SinkError> {
        let stem = day.format("%Y-%m-%d").to_string();
        let mut suffix = 1;
        loop {
            let name = if suffix == 1 {
                format!("{}.csv", stem)
            } else {
                format!("{}_{}.csv", stem, suffix)
            };
            let path = output_dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::warn!("{} already exists, choosing another name", path.display());
                    suffix += 1;
                }
                Err(source) => return Err(SinkError::Io { path, source }),
            }
        }
    }
}

#[async_trait]
impl DaySink for CsvDaySink {
    async fn write_day(&self, table: &DayTable) -> Result<PathBuf, SinkError> {
        let output_dir = self.output_dir.clone();
        let table = table.clone();
        tokio::task::spawn_blocking(move || Self::write_blocking(&output_dir, &table))
            .await
            .map_err(|e| SinkError::Task(e.to_string()))?
    }
}

/// Read a day file back into records, in file order.
#[cfg(test)]
pub(crate) fn read_day_file(path: &Path) -> Result<Vec<MeasurementRecord>, SinkError> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| SinkError::Encode {
        path: path.to_path_buf(),
        source: source.into(),
    })?;

    reader
        .deserialize::<CsvRow>()
        .map(|row| {
            row.map(MeasurementRecord::from)
                .map_err(|source| SinkError::Encode {
                    path: path.to_path_buf(),
                    source: source.into(),
                })
        })
        .collect()
}
