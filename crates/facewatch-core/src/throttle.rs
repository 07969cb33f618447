//! Per-identity rate limiting of recorded detections.

use crate::settings::ScanFrequency;
use crate::types::{BoundingBox, UNKNOWN_LABEL};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Cells per side of the grid used to tell unknown faces apart by position.
const REGION_GRID: u32 = 4;

/// How unknown faces are grouped for throttling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownKeyPolicy {
    /// All unknown faces share one key: at most one unknown record per window.
    Shared,
    /// Unknown faces are keyed by the grid cell holding the face centre.
    #[default]
    Region,
}

impl std::str::FromStr for UnknownKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(UnknownKeyPolicy::Shared),
            "region" => Ok(UnknownKeyPolicy::Region),
            other => Err(format!("unknown throttle policy: {other}")),
        }
    }
}

impl UnknownKeyPolicy {
    /// Derive the throttle key for a detection.
    pub fn identity_key(
        &self,
        label: &str,
        is_known: bool,
        bbox: &BoundingBox,
        frame_width: u32,
        frame_height: u32,
    ) -> String {
        if is_known {
            return label.to_string();
        }
        match self {
            UnknownKeyPolicy::Shared => UNKNOWN_LABEL.to_string(),
            UnknownKeyPolicy::Region => {
                let (cx, cy) = bbox.center();
                let col = grid_cell(cx, frame_width);
                let row = grid_cell(cy, frame_height);
                format!("{UNKNOWN_LABEL}@{col}x{row}")
            }
        }
    }
}

fn grid_cell(pos: f32, extent: u32) -> u32 {
    if extent == 0 {
        return 0;
    }
    let cell = (pos / extent as f32 * REGION_GRID as f32).floor();
    cell.clamp(0.0, (REGION_GRID - 1) as f32) as u32
}

/// Last-processed instant per identity key.
///
/// `should_process` never mutates; callers record an accepted detection with
/// [`DetectionThrottle::record`].
#[derive(Debug, Default)]
pub struct DetectionThrottle {
    last_processed: HashMap<String, DateTime<Utc>>,
}

impl DetectionThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_process(&self, key: &str, now: DateTime<Utc>, frequency: ScanFrequency) -> bool {
        let threshold = frequency.record_interval().as_millis() as i64;
        match self.last_processed.get(key) {
            None => true,
            Some(last) => (now - *last).num_milliseconds() > threshold,
        }
    }

    pub fn record(&mut self, key: &str, now: DateTime<Utc>) {
        self.last_processed.insert(key.to_string(), now);
    }

    /// Forget keys that have been idle longer than `max_age`.
    pub fn prune(&mut self, now: DateTime<Utc>, max_age: Duration) {
        let max_age_ms = max_age.as_millis() as i64;
        self.last_processed
            .retain(|_, last| (now - *last).num_milliseconds() <= max_age_ms);
    }

    pub fn len(&self) -> usize {
        self.last_processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_processed.is_empty()
    }
}
