use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Label carried by detections that matched nobody in the registry.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Length of a face descriptor produced by the recognizer.
pub const DESCRIPTOR_LEN: usize = 128;

/// Axis-aligned face box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// The larger side of the box, used as the face size for distance estimation.
    pub fn face_size(&self) -> f32 {
        self.width.max(self.height)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Integer pixel region `(x, y, width, height)` covering the box grown by
    /// `margin` on every side, clipped to the frame. `None` when nothing of the
    /// box lies inside the frame.
    pub fn padded_region(
        &self,
        margin: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<(u32, u32, u32, u32)> {
        let x0 = (self.x - margin).max(0.0).floor();
        let y0 = (self.y - margin).max(0.0).floor();
        let x1 = (self.x + self.width + margin).min(frame_width as f32).ceil();
        let y1 = (self.y + self.height + margin).min(frame_height as f32).ceil();
        if !(x1 > x0 && y1 > y0) {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }

    /// Compute Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union_area = self.width * self.height + other.width * other.height - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}

/// 128-dimensional face descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(pub Vec<f32>);

impl Descriptor {
    /// A descriptor is usable for matching when it has the expected length and
    /// contains only finite values.
    pub fn is_valid(&self) -> bool {
        self.0.len() == DESCRIPTOR_LEN && self.0.iter().all(|v| v.is_finite())
    }

    /// Compute Euclidean distance between two descriptors.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Facial expression labels, in the order the analyzer reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

impl Expression {
    pub const ALL: [Expression; 7] = [
        Expression::Neutral,
        Expression::Happy,
        Expression::Sad,
        Expression::Angry,
        Expression::Fearful,
        Expression::Disgusted,
        Expression::Surprised,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Happy => "happy",
            Expression::Sad => "sad",
            Expression::Angry => "angry",
            Expression::Fearful => "fearful",
            Expression::Disgusted => "disgusted",
            Expression::Surprised => "surprised",
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-expression probabilities for one face.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpressionScores(pub BTreeMap<Expression, f32>);

impl ExpressionScores {
    /// The highest-scoring expression and its score. An empty map reports
    /// neutral with zero confidence.
    pub fn dominant(&self) -> (Expression, f32) {
        let mut best = (Expression::Neutral, f32::NEG_INFINITY);
        for (&expr, &score) in &self.0 {
            if score > best.1 {
                best = (expr, score);
            }
        }
        if best.1 == f32::NEG_INFINITY {
            (Expression::Neutral, 0.0)
        } else {
            best
        }
    }
}

/// Full per-face output of the detailed analysis pass.
#[derive(Debug, Clone)]
pub struct FaceAnalysis {
    pub bbox: BoundingBox,
    /// Facial landmarks when the detector provides them; drawing only.
    pub landmarks: Vec<(f32, f32)>,
    pub descriptor: Descriptor,
    pub expressions: ExpressionScores,
}

/// Access level assigned to a known person.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[default]
    Standard,
    Restricted,
    Admin,
    Security,
}

impl std::str::FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(AccessLevel::Standard),
            "restricted" => Ok(AccessLevel::Restricted),
            "admin" => Ok(AccessLevel::Admin),
            "security" => Ok(AccessLevel::Security),
            other => Err(format!("unknown access level: {other}")),
        }
    }
}

/// Encoded image bytes (JPEG). Stored as a `data:` URL so records stay
/// self-contained JSON documents.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage(pub Vec<u8>);

impl EncodedImage {
    const DATA_URL_PREFIX: &'static str = "data:image/jpeg;base64,";

    pub fn to_data_url(&self) -> String {
        let payload = base64::engine::general_purpose::STANDARD.encode(&self.0);
        format!("{}{payload}", Self::DATA_URL_PREFIX)
    }

    pub fn from_data_url(url: &str) -> Result<Self, base64::DecodeError> {
        // Accept any media type; only the base64 payload matters.
        let payload = match url.split_once(";base64,") {
            Some((_, payload)) => payload,
            None => url,
        };
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map(EncodedImage)
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedImage({} bytes)", self.0.len())
    }
}

impl Serialize for EncodedImage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_data_url())
    }
}

impl<'de> Deserialize<'de> for EncodedImage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let url = String::deserialize(deserializer)?;
        EncodedImage::from_data_url(&url).map_err(serde::de::Error::custom)
    }
}

/// Snapshot of a known person copied into a detection at detection time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonDetails {
    pub name: String,
    pub role: String,
    pub access_level: AccessLevel,
}

/// One processed face detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: f32,
    pub dominant_expression: Expression,
    pub expression_confidence: f32,
    pub face_thumbnail: Option<EncodedImage>,
    pub context_image: Option<EncodedImage>,
    pub person_name: String,
    pub is_known: bool,
    pub estimated_distance_meters: f32,
    pub person_details: Option<PersonDetails>,
    pub face_descriptor: Descriptor,
}

impl DetectionRecord {
    /// Build a detection id from the detection instant plus a random suffix.
    pub fn new_id(timestamp: DateTime<Utc>) -> String {
        const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let mut rng = rand::thread_rng();
        let suffix: String = (0..8)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        format!(
            "face-{}-{suffix}",
            timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        )
    }
}

/// A person enrolled in the known-face registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownFace {
    pub id: String,
    pub name: String,
    pub role: String,
    pub access_level: AccessLevel,
    pub date_added: DateTime<Utc>,
    pub face_descriptor: Descriptor,
    pub thumbnail: Option<EncodedImage>,
}

impl KnownFace {
    pub fn new_id(date_added: DateTime<Utc>) -> String {
        format!("person-{}", date_added.timestamp_millis())
    }

    pub fn details(&self) -> PersonDetails {
        PersonDetails {
            name: self.name.clone(),
            role: self.role.clone(),
            access_level: self.access_level,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Warning,
}

/// User-facing notification derived from a detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub thumbnail: Option<EncodedImage>,
    pub context_image: Option<EncodedImage>,
    pub is_read: bool,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub detection_id: String,
    pub person_name: String,
    pub is_known: bool,
    pub estimated_distance_meters: f32,
}

impl NotificationRecord {
    /// Derive the notification for a freshly recorded detection.
    pub fn for_detection(detection: &DetectionRecord) -> Self {
        let summary = format!(
            "at ~{:.1}m with {:.2} confidence. Expression: {}",
            detection.estimated_distance_meters,
            detection.confidence,
            detection.dominant_expression
        );

        let (title, message, kind) = match &detection.person_details {
            Some(details) if detection.is_known => (
                format!("{} Detected", detection.person_name),
                format!(
                    "Detected {} ({}) {summary}",
                    detection.person_name, details.role
                ),
                NotificationKind::Info,
            ),
            _ => (
                "Unknown Person Detected".to_string(),
                format!("Unknown person detected {summary}"),
                NotificationKind::Warning,
            ),
        };

        Self {
            id: format!("notification-{}", detection.id),
            title,
            message,
            timestamp: detection.timestamp,
            thumbnail: detection.face_thumbnail.clone(),
            context_image: detection.context_image.clone(),
            is_read: false,
            kind,
            detection_id: detection.id.clone(),
            person_name: detection.person_name.clone(),
            is_known: detection.is_known,
            estimated_distance_meters: detection.estimated_distance_meters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(known: bool) -> DetectionRecord {
        let timestamp = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        DetectionRecord {
            id: "face-1".into(),
            timestamp,
            confidence: 0.876,
            dominant_expression: Expression::Happy,
            expression_confidence: 0.9,
            face_thumbnail: Some(EncodedImage(vec![1, 2, 3])),
            context_image: None,
            person_name: if known { "alice".into() } else { UNKNOWN_LABEL.into() },
            is_known: known,
            estimated_distance_meters: 2.345,
            person_details: known.then(|| PersonDetails {
                name: "alice".into(),
                role: "guard".into(),
                access_level: AccessLevel::Security,
            }),
            face_descriptor: Descriptor(vec![0.0; DESCRIPTOR_LEN]),
        }
    }

    #[test]
    fn test_padded_region_clips_to_frame() {
        let b = BoundingBox { x: 10.0, y: 20.0, width: 40.0, height: 40.0, confidence: 1.0 };
        assert_eq!(b.padded_region(0.0, 640, 480), Some((10, 20, 40, 40)));
        assert_eq!(b.padded_region(15.0, 640, 480), Some((0, 5, 65, 70)));
        let edge = BoundingBox { x: 620.0, y: 460.0, width: 40.0, height: 40.0, confidence: 1.0 };
        assert_eq!(edge.padded_region(0.0, 640, 480), Some((620, 460, 20, 20)));
        let outside = BoundingBox { x: 700.0, y: 0.0, width: 10.0, height: 10.0, confidence: 1.0 };
        assert_eq!(outside.padded_region(0.0, 640, 480), None);
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0, confidence: 1.0 };
        let b = BoundingBox { x: 5.0, ..a };
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_descriptor_distance_self_is_zero() {
        let d = Descriptor((0..DESCRIPTOR_LEN).map(|i| i as f32 / 128.0).collect());
        assert_eq!(d.euclidean_distance(&d), 0.0);
    }

    #[test]
    fn test_descriptor_distance_known_value() {
        let a = Descriptor(vec![0.0, 0.0]);
        let b = Descriptor(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_descriptor_validity() {
        assert!(Descriptor(vec![0.1; DESCRIPTOR_LEN]).is_valid());
        assert!(!Descriptor(vec![0.1; 12]).is_valid());
        let mut bad = vec![0.1; DESCRIPTOR_LEN];
        bad[5] = f32::NAN;
        assert!(!Descriptor(bad).is_valid());
    }

    #[test]
    fn test_dominant_expression() {
        let mut scores = ExpressionScores::default();
        scores.0.insert(Expression::Neutral, 0.2);
        scores.0.insert(Expression::Surprised, 0.7);
        scores.0.insert(Expression::Sad, 0.1);
        assert_eq!(scores.dominant(), (Expression::Surprised, 0.7));
        assert_eq!(ExpressionScores::default().dominant(), (Expression::Neutral, 0.0));
    }

    #[test]
    fn test_encoded_image_data_url() {
        let img = EncodedImage(vec![0xff, 0xd8, 0xff]);
        let url = img.to_data_url();
        assert!(url.starts_with("data:image/jpeg;base64,"));
        assert_eq!(EncodedImage::from_data_url(&url).unwrap(), img);
    }

    #[test]
    fn test_detection_id_shape() {
        let ts = DateTime::from_timestamp_millis(0).unwrap();
        let id = DetectionRecord::new_id(ts);
        assert!(id.starts_with("face-1970-01-01T00:00:00.000Z-"), "{id}");
        assert_eq!(id.rsplit('-').next().unwrap().len(), 8);
        assert_ne!(DetectionRecord::new_id(ts), DetectionRecord::new_id(ts));
    }

    #[test]
    fn test_known_face_id() {
        let ts = DateTime::from_timestamp_millis(1234).unwrap();
        assert_eq!(KnownFace::new_id(ts), "person-1234");
    }

    #[test]
    fn test_notification_for_known_person() {
        let n = NotificationRecord::for_detection(&detection(true));
        assert_eq!(n.id, "notification-face-1");
        assert_eq!(n.title, "alice Detected");
        assert_eq!(
            n.message,
            "Detected alice (guard) at ~2.3m with 0.88 confidence. Expression: happy"
        );
        assert_eq!(n.kind, NotificationKind::Info);
        assert!(!n.is_read);
        assert_eq!(n.thumbnail, Some(EncodedImage(vec![1, 2, 3])));
    }

    #[test]
    fn test_notification_for_unknown_person() {
        let n = NotificationRecord::for_detection(&detection(false));
        assert_eq!(n.title, "Unknown Person Detected");
        assert_eq!(
            n.message,
            "Unknown person detected at ~2.3m with 0.88 confidence. Expression: happy"
        );
        assert_eq!(n.kind, NotificationKind::Warning);
        assert_eq!(n.detection_id, "face-1");
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let json = serde_json::to_value(detection(true)).unwrap();
        assert_eq!(json["personName"], "alice");
        assert_eq!(json["dominantExpression"], "happy");
        assert_eq!(json["personDetails"]["accessLevel"], "security");
        assert_eq!(json["faceDescriptor"].as_array().unwrap().len(), DESCRIPTOR_LEN);
    }

    #[test]
    fn test_access_level_parse() {
        assert_eq!("Admin".parse::<AccessLevel>(), Ok(AccessLevel::Admin));
        assert!("root".parse::<AccessLevel>().is_err());
    }
}
