//! facewatch-core: Face records, matching, distance estimation and throttling.
//!
//! Also hosts the ONNX Runtime models behind the two-stage analysis used by
//! the daemon: an UltraFace detector, a 128-d descriptor network and an
//! expression classifier.

pub mod analyzer;
pub mod detector;
pub mod distance;
pub mod expression;
pub mod matcher;
pub mod recognizer;
pub mod settings;
pub mod throttle;
pub mod types;

pub use analyzer::{AnalyzerError, AnalyzerModels, OnnxAnalyzer};
pub use distance::estimate_distance;
pub use matcher::{EuclideanMatcher, MatchResult, Matcher, FACE_MATCH_THRESHOLD};
pub use settings::{ScanFrequency, Settings, SettingsError, SettingsPatch, SettingsRecord, SETTINGS_ID};
pub use throttle::{DetectionThrottle, UnknownKeyPolicy};
pub use types::{
    AccessLevel, BoundingBox, Descriptor, DetectionRecord, EncodedImage, Expression,
    ExpressionScores, FaceAnalysis, KnownFace, NotificationKind, NotificationRecord,
    PersonDetails, DESCRIPTOR_LEN, UNKNOWN_LABEL,
};

/// Default directory for ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/facewatch/models")
}
