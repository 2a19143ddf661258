// Solis data logger frame decoding
use crate::domain::checksum::checksum;
use crate::domain::measurement::InverterTelemetry;
use bytes::Buf;
use serde::Deserialize;
use std::ops::Range;
use thiserror::Error;

pub const LONG_FRAME_LEN: usize = 248;
pub const SHORT_FRAME_LEN: usize = 14;

pub const START_MARKER: u8 = 0x68;
pub const END_MARKER: u8 = 0x16;

const CHECKSUM_OFFSET: usize = 246;
const CHECKSUM_RANGE: Range<usize> = 1..CHECKSUM_OFFSET;
const SERIAL_RANGE: Range<usize> = 32..47;

/// Numeric values carried by the long frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Temperature,
    Vdc1,
    Vdc2,
    Idc1,
    Idc2,
    Iac1,
    Iac2,
    Iac3,
    Vac1,
    Vac2,
    Vac3,
    Frequency,
    Power,
}

/// Location and scale of one little-endian u16 field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub field: Field,
    pub offset: usize,
    pub scale: f64,
}

const fn spec(field: Field, offset: usize, scale: f64) -> FieldSpec {
    FieldSpec {
        field,
        offset,
        scale,
    }
}

pub const LONG_FRAME_FIELDS: [FieldSpec; 13] = [
    spec(Field::Temperature, 48, 10.0),
    spec(Field::Vdc1, 50, 10.0),
    spec(Field::Vdc2, 52, 10.0),
    spec(Field::Idc1, 54, 10.0),
    spec(Field::Idc2, 56, 10.0),
    spec(Field::Iac1, 58, 10.0),
    spec(Field::Iac2, 60, 10.0),
    spec(Field::Iac3, 62, 10.0),
    spec(Field::Vac1, 64, 10.0),
    spec(Field::Vac2, 66, 10.0),
    spec(Field::Vac3, 68, 10.0),
    spec(Field::Frequency, 70, 100.0),
    spec(Field::Power, 72, 1.0),
];

impl InverterTelemetry {
    fn set(&mut self, field: Field, value: f64) {
        let slot = match field {
            Field::Temperature => &mut self.temperature,
            Field::Vdc1 => &mut self.vdc1,
            Field::Vdc2 => &mut self.vdc2,
            Field::Idc1 => &mut self.idc1,
            Field::Idc2 => &mut self.idc2,
            Field::Iac1 => &mut self.iac1,
            Field::Iac2 => &mut self.iac2,
            Field::Iac3 => &mut self.iac3,
            Field::Vac1 => &mut self.vac1,
            Field::Vac2 => &mut self.vac2,
            Field::Vac3 => &mut self.vac3,
            Field::Frequency => &mut self.frequency,
            Field::Power => &mut self.current_power,
        };
        *slot = value;
    }
}

/// What to do when an integrity check on a long frame fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityPolicy {
    /// Keep the record and flag it.
    #[default]
    Warn,
    /// Drop the frame.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("unrecognized frame of {0} bytes")]
    UnrecognizedLength(usize),
    #[error("status frame ignored")]
    StatusFrame,
    #[error("checksum mismatch: stored {stored:#04x}, computed {computed:#04x}")]
    ChecksumMismatch { stored: u8, computed: u8 },
    #[error("bad frame markers: start {start:#04x}, end {end:#04x}")]
    BadMarkers { start: u8, end: u8 },
}

/// A fully decoded long frame plus the outcome of its integrity checks.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub telemetry: InverterTelemetry,
    pub stored_checksum: u8,
    pub computed_checksum: u8,
    pub markers_ok: bool,
}

impl DecodedFrame {
    pub fn checksum_ok(&self) -> bool {
        self.stored_checksum == self.computed_checksum
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder {
    checksum_policy: IntegrityPolicy,
    marker_policy: IntegrityPolicy,
}

impl FrameDecoder {
    pub fn new(checksum_policy: IntegrityPolicy, marker_policy: IntegrityPolicy) -> Self {
        Self {
            checksum_policy,
            marker_policy,
        }
    }

    /// Decode a datagram, discarding the reason when nothing is produced.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn decode(&self, raw: &[u8]) -> Option<DecodedFrame> {
        self.try_decode(raw).ok()
    }

    pub fn try_decode(&self, raw: &[u8]) -> Result<DecodedFrame, FrameError> {
        match raw.len() {
            LONG_FRAME_LEN => self.decode_long(raw),
            SHORT_FRAME_LEN => Err(FrameError::StatusFrame),
            len => Err(FrameError::UnrecognizedLength(len)),
        }
    }

    fn decode_long(&self, raw: &[u8]) -> Result<DecodedFrame, FrameError> {
        let stored_checksum = raw[CHECKSUM_OFFSET];
        let computed_checksum = checksum(&raw[CHECKSUM_RANGE]);
        if stored_checksum != computed_checksum && self.checksum_policy == IntegrityPolicy::Reject {
            return Err(FrameError::ChecksumMismatch {
                stored: stored_checksum,
                computed: computed_checksum,
            });
        }

        let start = raw[0];
        let end = raw[LONG_FRAME_LEN - 1];
        let markers_ok = start == START_MARKER && end == END_MARKER;
        if !markers_ok && self.marker_policy == IntegrityPolicy::Reject {
            return Err(FrameError::BadMarkers { start, end });
        }

        let mut telemetry = InverterTelemetry {
            inverter_serial: decode_serial(&raw[SERIAL_RANGE]),
            ..Default::default()
        };
        for field in &LONG_FRAME_FIELDS {
            telemetry.set(field.field, read_scaled(raw, field));
        }

        Ok(DecodedFrame {
            telemetry,
            stored_checksum,
            computed_checksum,
            markers_ok,
        })
    }
}

fn decode_serial(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

fn read_scaled(raw: &[u8], field: &FieldSpec) -> f64 {
    let mut cursor = &raw[field.offset..field.offset + 2];
    f64::from(cursor.get_u16_le()) / field.scale
}
