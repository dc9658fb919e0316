//! Power-status readings as stored in the durable queue

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Voltage at or above which a supply is reported as healthy
pub const DEFAULT_STATUS_THRESHOLD: i64 = 90;

/// Health of a supply line. Persisted and published as `0` (OK) / `1` (LOW).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerStatus {
    Ok,
    Low,
}

impl PowerStatus {
    /// Numeric code used in the queue table and on the wire
    pub fn code(self) -> u8 {
        match self {
            PowerStatus::Ok => 0,
            PowerStatus::Low => 1,
        }
    }

    /// Decode a persisted status code
    pub fn from_code(code: i64) -> Result<Self, ReadingError> {
        match code {
            0 => Ok(PowerStatus::Ok),
            1 => Ok(PowerStatus::Low),
            other => Err(ReadingError::InvalidStatusCode(other)),
        }
    }

    /// Derive status from a measured voltage
    pub fn from_voltage(voltage: i64, threshold: i64) -> Self {
        if voltage >= threshold {
            PowerStatus::Ok
        } else {
            PowerStatus::Low
        }
    }
}

/// A reading that has been persisted and assigned an id.
///
/// Readings are immutable once stored. The relay only ever reads and deletes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub id: i64,
    /// Acquisition time, seconds since the Unix epoch
    pub timestamp: i64,
    pub ac_voltage: i64,
    pub ac_status: PowerStatus,
    pub ups_voltage: i64,
    pub ups_status: PowerStatus,
}

/// A reading before it has been written to the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReading {
    pub timestamp: i64,
    pub ac_voltage: i64,
    pub ac_status: PowerStatus,
    pub ups_voltage: i64,
    pub ups_status: PowerStatus,
}

impl NewReading {
    /// Build a reading whose statuses are derived from the voltages
    pub fn from_voltages(timestamp: i64, ac_voltage: i64, ups_voltage: i64) -> Self {
        Self {
            timestamp,
            ac_voltage,
            ac_status: PowerStatus::from_voltage(ac_voltage, DEFAULT_STATUS_THRESHOLD),
            ups_voltage,
            ups_status: PowerStatus::from_voltage(ups_voltage, DEFAULT_STATUS_THRESHOLD),
        }
    }

    /// Attach the id assigned by the queue
    pub fn with_id(self, id: i64) -> Reading {
        Reading {
            id,
            timestamp: self.timestamp,
            ac_voltage: self.ac_voltage,
            ac_status: self.ac_status,
            ups_voltage: self.ups_voltage,
            ups_status: self.ups_status,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ReadingError {
    #[error("Invalid power status code: {0} (expected 0 or 1)")]
    InvalidStatusCode(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(PowerStatus::Ok.code(), 0);
        assert_eq!(PowerStatus::Low.code(), 1);
        assert_eq!(PowerStatus::from_code(0), Ok(PowerStatus::Ok));
        assert_eq!(PowerStatus::from_code(1), Ok(PowerStatus::Low));
    }

    #[test]
    fn test_invalid_status_code() {
        assert_eq!(
            PowerStatus::from_code(7),
            Err(ReadingError::InvalidStatusCode(7))
        );
        assert!(PowerStatus::from_code(-1).is_err());
    }

    #[test]
    fn test_status_from_voltage_threshold() {
        assert_eq!(PowerStatus::from_voltage(90, 90), PowerStatus::Ok);
        assert_eq!(PowerStatus::from_voltage(230, 90), PowerStatus::Ok);
        assert_eq!(PowerStatus::from_voltage(89, 90), PowerStatus::Low);
        assert_eq!(PowerStatus::from_voltage(0, 90), PowerStatus::Low);
    }

    #[test]
    fn test_new_reading_from_voltages() {
        let reading = NewReading::from_voltages(1000, 95, 80);
        assert_eq!(reading.ac_status, PowerStatus::Ok);
        assert_eq!(reading.ups_status, PowerStatus::Low);

        let stored = reading.with_id(1);
        assert_eq!(stored.id, 1);
        assert_eq!(stored.timestamp, 1000);
        assert_eq!(stored.ac_voltage, 95);
        assert_eq!(stored.ups_voltage, 80);
    }
}
