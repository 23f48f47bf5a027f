//! Measurement and device types shared by the transport and the tracker core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One heart-rate sample as delivered by the sensor.
///
/// Everything except the RR difference is fixed at creation. The RR difference
/// is assigned when the sample is drained from the
/// [`MeasurementBuffer`](crate::core::MeasurementBuffer), replacing whatever
/// value the sample carried in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Time the sample was received
    pub timestamp: DateTime<Utc>,
    /// Heart rate in beats per minute
    pub heart_rate: f64,
    /// Time between two consecutive heartbeats in milliseconds
    pub rr_interval: f64,
    /// |RR(n) - RR(n-1)| in drain order, absent for the first sample of a session
    rr_difference: Option<f64>,
}

impl Measurement {
    /// Create a sample timestamped now.
    pub fn new(heart_rate: f64, rr_interval: f64) -> Self {
        Self::at(Utc::now(), heart_rate, rr_interval)
    }

    /// Create a sample with an explicit timestamp.
    pub fn at(timestamp: DateTime<Utc>, heart_rate: f64, rr_interval: f64) -> Self {
        Self {
            timestamp,
            heart_rate,
            rr_interval,
            rr_difference: None,
        }
    }

    pub fn rr_difference(&self) -> Option<f64> {
        self.rr_difference
    }

    /// Overwrites any difference the sample arrived with.
    pub(crate) fn set_rr_difference(&mut self, difference: Option<f64>) {
        self.rr_difference = difference;
    }
}

/// A reachable sensor as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Identity remembered in settings
    pub name: String,
    /// Transport-level address
    pub address: String,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}
