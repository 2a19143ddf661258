// Measurement domain models
use chrono::NaiveTime;

/// Electrical and thermal values carried by one long frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InverterTelemetry {
    pub inverter_serial: String,
    pub current_power: f64,
    pub temperature: f64,
    pub frequency: f64,
    pub vac1: f64,
    pub vac2: f64,
    pub vac3: f64,
    pub iac1: f64,
    pub iac2: f64,
    pub iac3: f64,
    pub vdc1: f64,
    pub vdc2: f64,
    pub idc1: f64,
    pub idc2: f64,
}

/// A decoded reading stamped with the time-of-day it arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    receive_time: NaiveTime,
    telemetry: InverterTelemetry,
}

impl MeasurementRecord {
    pub fn new(receive_time: NaiveTime, telemetry: InverterTelemetry) -> Self {
        Self {
            receive_time,
            telemetry,
        }
    }

    pub fn receive_time(&self) -> NaiveTime {
        self.receive_time
    }

    pub fn telemetry(&self) -> &InverterTelemetry {
        &self.telemetry
    }
}
