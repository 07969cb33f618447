use facewatch_core::{AnalyzerModels, UnknownKeyPolicy};
use std::path::PathBuf;

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
///
/// Detection range, confidence and scan frequency are not here: they live in
/// the settings collection and change at runtime.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Number of warmup frames to discard after opening the camera.
    pub warmup_frames: usize,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub scan_model: String,
    pub scan_input: (u32, u32),
    pub detail_model: String,
    pub detail_input: (u32, u32),
    pub descriptor_model: String,
    pub expression_model: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// How unknown faces are grouped by the detection throttle.
    pub unknown_policy: UnknownKeyPolicy,
    /// Program run once per alert recipient. Alerts are disabled when unset.
    pub alert_command: Option<String>,
    pub alert_phone: Option<String>,
    pub alert_email: Option<String>,
    /// Human-readable camera name included in alert texts.
    pub camera_label: String,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `FACEWATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACEWATCH_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facewatch_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facewatch");

        let db_path = std::env::var("FACEWATCH_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("facewatch.db"));

        let unknown_policy = match std::env::var("FACEWATCH_UNKNOWN_THROTTLE") {
            Ok(v) => v.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "ignoring FACEWATCH_UNKNOWN_THROTTLE");
                UnknownKeyPolicy::default()
            }),
            Err(_) => UnknownKeyPolicy::default(),
        };

        let bus = match std::env::var("FACEWATCH_BUS").as_deref() {
            Ok("system") => BusKind::System,
            _ => BusKind::Session,
        };

        Self {
            camera_device: std::env::var("FACEWATCH_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            warmup_frames: env_usize("FACEWATCH_WARMUP_FRAMES", 4),
            model_dir,
            scan_model: env_string("FACEWATCH_SCAN_MODEL", "version-RFB-320.onnx"),
            scan_input: env_size("FACEWATCH_SCAN_INPUT", (320, 240)),
            detail_model: env_string("FACEWATCH_DETAIL_MODEL", "version-RFB-640.onnx"),
            detail_input: env_size("FACEWATCH_DETAIL_INPUT", (640, 480)),
            descriptor_model: env_string("FACEWATCH_DESCRIPTOR_MODEL", "face_descriptor_128.onnx"),
            expression_model: env_string("FACEWATCH_EXPRESSION_MODEL", "emotion-ferplus-8.onnx"),
            db_path,
            unknown_policy,
            alert_command: env_opt("FACEWATCH_ALERT_COMMAND"),
            alert_phone: env_opt("FACEWATCH_ALERT_PHONE"),
            alert_email: env_opt("FACEWATCH_ALERT_EMAIL"),
            camera_label: env_string("FACEWATCH_CAMERA_LABEL", "Camera 1"),
            bus,
        }
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }

    /// Resolved model paths and input sizes for the analyzer.
    pub fn analyzer_models(&self) -> AnalyzerModels {
        AnalyzerModels {
            scan_model: self.model_path(&self.scan_model),
            scan_input: self.scan_input,
            detail_model: self.model_path(&self.detail_model),
            detail_input: self.detail_input,
            descriptor_model: self.model_path(&self.descriptor_model),
            expression_model: self.model_path(&self.expression_model),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse `WIDTHxHEIGHT`, falling back to `default` on anything else.
fn env_size(key: &str, default: (u32, u32)) -> (u32, u32) {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_size(&v))
        .unwrap_or(default)
}

fn parse_size(v: &str) -> Option<(u32, u32)> {
    let (w, h) = v.trim().split_once(|c: char| c == 'x' || c == 'X')?;
    let w = w.trim().parse().ok()?;
    let h = h.trim().parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("320x240"), Some((320, 240)));
        assert_eq!(parse_size(" 640 X 480 "), Some((640, 480)));
        assert_eq!(parse_size("0x240"), None);
        assert_eq!(parse_size("320"), None);
        assert_eq!(parse_size("axb"), None);
    }

    #[test]
    fn test_analyzer_models_resolve_under_model_dir() {
        let mut cfg = Config::from_env();
        cfg.model_dir = PathBuf::from("/opt/models");
        cfg.scan_model = "scan.onnx".into();
        let models = cfg.analyzer_models();
        assert_eq!(models.scan_model, "/opt/models/scan.onnx");
        assert_eq!(models.scan_input, cfg.scan_input);
    }
}
