//! Tunable detection settings and their validation rules.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Fixed id of the single settings record.
pub const SETTINGS_ID: &str = "detectionSettings";

const RANGE_MIN: f32 = 1.0;
const RANGE_MAX: f32 = 10.0;
const RANGE_STEP: f32 = 0.5;
const CONFIDENCE_MIN: f32 = 0.1;
const CONFIDENCE_MAX: f32 = 0.9;

#[derive(Error, Debug, PartialEq)]
pub enum SettingsError {
    #[error("detection range {0}m outside {RANGE_MIN}..={RANGE_MAX}m or not a multiple of {RANGE_STEP}m")]
    RangeOutOfBounds(f32),
    #[error("minimum confidence {0} outside {CONFIDENCE_MIN}..={CONFIDENCE_MAX}")]
    ConfidenceOutOfBounds(f32),
}

/// How aggressively the camera is scanned and how often the same person is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanFrequency {
    Low,
    Medium,
    High,
}

impl ScanFrequency {
    /// Minimum time between two recorded detections of the same identity.
    pub fn record_interval(&self) -> Duration {
        match self {
            ScanFrequency::Low => Duration::from_millis(5000),
            ScanFrequency::Medium => Duration::from_millis(2000),
            ScanFrequency::High => Duration::from_millis(1000),
        }
    }

    /// Delay between two detection cycles.
    pub fn scan_delay(&self) -> Duration {
        match self {
            ScanFrequency::Low => Duration::from_millis(300),
            ScanFrequency::Medium => Duration::from_millis(150),
            ScanFrequency::High => Duration::ZERO,
        }
    }
}

impl std::str::FromStr for ScanFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(ScanFrequency::Low),
            "medium" => Ok(ScanFrequency::Medium),
            "high" => Ok(ScanFrequency::High),
            other => Err(format!("unknown scan frequency: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub detection_range_meters: f32,
    pub min_confidence: f32,
    pub scan_frequency: ScanFrequency,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            detection_range_meters: 5.0,
            min_confidence: 0.3,
            scan_frequency: ScanFrequency::High,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        let range = self.detection_range_meters;
        let steps = range / RANGE_STEP;
        if !(RANGE_MIN..=RANGE_MAX).contains(&range) || (steps - steps.round()).abs() > 1e-3 {
            return Err(SettingsError::RangeOutOfBounds(range));
        }
        let conf = self.min_confidence;
        // Small tolerance so values like 0.1 + 0.2 survive float rounding.
        if !(conf >= CONFIDENCE_MIN - 1e-6 && conf <= CONFIDENCE_MAX + 1e-6) {
            return Err(SettingsError::ConfidenceOutOfBounds(conf));
        }
        Ok(())
    }

    /// Apply a partial update, returning the merged settings without validating.
    pub fn merged(&self, patch: &SettingsPatch) -> Settings {
        Settings {
            detection_range_meters: patch
                .detection_range_meters
                .unwrap_or(self.detection_range_meters),
            min_confidence: patch.min_confidence.unwrap_or(self.min_confidence),
            scan_frequency: patch.scan_frequency.unwrap_or(self.scan_frequency),
        }
    }
}

/// Partial settings update; absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub detection_range_meters: Option<f32>,
    pub min_confidence: Option<f32>,
    pub scan_frequency: Option<ScanFrequency>,
}

/// Stored form of the settings: one row under [`SETTINGS_ID`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsRecord {
    pub id: String,
    pub data: Settings,
}

impl SettingsRecord {
    pub fn new(data: Settings) -> Self {
        Self {
            id: SETTINGS_ID.to_string(),
            data,
        }
    }
}
