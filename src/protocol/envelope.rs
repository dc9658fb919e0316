//! Delivery envelope published for each reading

use super::reading::Reading;
use serde::{Deserialize, Serialize};

/// JSON payload sent to the broker for a single reading.
///
/// Field names are fixed by the consumers on the broker side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEnvelope {
    #[serde(rename = "devId")]
    pub device_id: String,
    #[serde(rename = "inputVoltage")]
    pub input_voltage: i64,
    #[serde(rename = "acStatus")]
    pub ac_status: u8,
    #[serde(rename = "outputVoltage")]
    pub output_voltage: i64,
    #[serde(rename = "upsStatus")]
    pub ups_status: u8,
    pub location: String,
    /// Acquisition time of the reading
    pub timestamp: i64,
    /// Time the envelope was built for publishing
    #[serde(rename = "pubTime")]
    pub pub_time: i64,
}

impl DeliveryEnvelope {
    pub fn from_reading(reading: &Reading, device_id: &str, location: &str, pub_time: i64) -> Self {
        Self {
            device_id: device_id.to_string(),
            input_voltage: reading.ac_voltage,
            ac_status: reading.ac_status.code(),
            output_voltage: reading.ups_voltage,
            ups_status: reading.ups_status.code(),
            location: location.to_string(),
            timestamp: reading.timestamp,
            pub_time,
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
