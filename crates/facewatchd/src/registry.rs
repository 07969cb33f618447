//! Known-face registry: the in-memory copy of the known faces collection.

use crate::engine::EngineError;
use chrono::{DateTime, Utc};
use facewatch_core::{
    AccessLevel, Descriptor, DetectionRecord, EncodedImage, KnownFace, DESCRIPTOR_LEN, UNKNOWN_LABEL,
};
use facewatch_store::Store;
use serde::Deserialize;

/// A person to enroll directly, without a prior detection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewKnownFace {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub access_level: AccessLevel,
    pub face_descriptor: Descriptor,
    #[serde(default)]
    pub thumbnail: Option<EncodedImage>,
}

pub struct Registry {
    store: Store,
    faces: Vec<KnownFace>,
}

impl Registry {
    pub async fn load(store: Store) -> Result<Self, EngineError> {
        let faces: Vec<KnownFace> = store.get_all().await?;
        tracing::info!(count = faces.len(), "known faces loaded");
        Ok(Self { store, faces })
    }

    pub fn list(&self) -> &[KnownFace] {
        &self.faces
    }

    pub fn get(&self, id: &str) -> Option<&KnownFace> {
        self.faces.iter().find(|f| f.id == id)
    }

    /// Validate, persist and append a new known face.
    pub async fn add(&mut self, new: NewKnownFace, now: DateTime<Utc>) -> Result<KnownFace, EngineError> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidInput("name must not be blank".into()));
        }
        // The matcher reports non-matches under this label.
        if name.eq_ignore_ascii_case(UNKNOWN_LABEL) {
            return Err(EngineError::InvalidInput(format!(
                "\"{name}\" is reserved for unrecognised faces"
            )));
        }
        if !new.face_descriptor.is_valid() {
            return Err(EngineError::InvalidInput(format!(
                "face descriptor must be {DESCRIPTOR_LEN} finite values, got {}",
                new.face_descriptor.0.len()
            )));
        }

        // Ids are millisecond based; step forward past any collision.
        let mut date_added = now;
        let mut id = KnownFace::new_id(date_added);
        while self.get(&id).is_some() {
            date_added += chrono::Duration::milliseconds(1);
            id = KnownFace::new_id(date_added);
        }

        let face = KnownFace {
            id,
            name: name.to_string(),
            role: new.role.trim().to_string(),
            access_level: new.access_level,
            date_added,
            face_descriptor: new.face_descriptor,
            thumbnail: new.thumbnail,
        };
        self.store.put(&face).await?;
        tracing::info!(id = %face.id, name = %face.name, "known face added");
        self.faces.push(face.clone());
        Ok(face)
    }

    /// Enroll the person seen in a stored detection.
    pub async fn add_from_detection(
        &mut self,
        detection_id: &str,
        name: &str,
        role: &str,
        access_level: AccessLevel,
        now: DateTime<Utc>,
    ) -> Result<KnownFace, EngineError> {
        let detection: DetectionRecord = self
            .store
            .get_by_id(detection_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(detection_id.to_string()))?;

        self.add(
            NewKnownFace {
                name: name.to_string(),
                role: role.to_string(),
                access_level,
                face_descriptor: detection.face_descriptor,
                thumbnail: detection.face_thumbnail,
            },
            now,
        )
        .await
    }

    /// Returns whether the id was present in memory.
    pub async fn remove(&mut self, id: &str) -> Result<bool, EngineError> {
        self.store.delete::<KnownFace>(id).await?;
        let before = self.faces.len();
        self.faces.retain(|f| f.id != id);
        let removed = self.faces.len() != before;
        if removed {
            tracing::info!(id, "known face removed");
        }
        Ok(removed)
    }

    /// Drop every known face. Returns how many were held in memory.
    pub async fn reset(&mut self) -> Result<usize, EngineError> {
        self.store.clear::<KnownFace>().await?;
        let count = self.faces.len();
        self.faces.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facewatch_core::{EuclideanMatcher, Expression, Matcher};

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn descriptor(v: f32) -> Descriptor {
        Descriptor(vec![v; DESCRIPTOR_LEN])
    }

    fn new_face(name: &str) -> NewKnownFace {
        NewKnownFace {
            name: name.to_string(),
            role: "staff".into(),
            access_level: AccessLevel::Standard,
            face_descriptor: descriptor(0.1),
            thumbnail: None,
        }
    }

    async fn registry() -> (tempfile::TempDir, Store, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("facewatch.db")).await.unwrap();
        let registry = Registry::load(store.clone()).await.unwrap();
        (dir, store, registry)
    }

    #[tokio::test]
    async fn test_add_persists_and_lists() {
        let (_dir, store, mut reg) = registry().await;
        let face = reg.add(new_face("  Alice "), at(1000)).await.unwrap();
        assert_eq!(face.id, "person-1000");
        assert_eq!(face.name, "Alice");
        assert_eq!(reg.list().len(), 1);

        let stored: KnownFace = store.get_by_id("person-1000").await.unwrap().unwrap();
        assert_eq!(stored, face);
    }

    #[tokio::test]
    async fn test_add_rejects_blank_name() {
        let (_dir, store, mut reg) = registry().await;
        let err = reg.add(new_face("   "), at(0)).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert!(store.get_all::<KnownFace>().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_rejects_reserved_unknown_name() {
        let (_dir, store, mut reg) = registry().await;
        for name in [UNKNOWN_LABEL, " unknown ", "Unknown"] {
            let err = reg.add(new_face(name), at(0)).await.unwrap_err();
            assert!(matches!(err, EngineError::InvalidInput(_)), "{name}");
        }
        assert!(reg.list().is_empty());
        assert!(store.get_all::<KnownFace>().await.unwrap().is_empty());

        // With nothing enrolled the matcher keeps reporting the face as unknown.
        let result = EuclideanMatcher::default().best_match(&descriptor(0.1), reg.list());
        assert_eq!(result.label, UNKNOWN_LABEL);
        assert!(result.face_id.is_none());
    }

    #[tokio::test]
    async fn test_add_rejects_bad_descriptor() {
        let (_dir, _store, mut reg) = registry().await;
        let mut short = new_face("bob");
        short.face_descriptor = Descriptor(vec![0.0; 64]);
        assert!(matches!(reg.add(short, at(0)).await, Err(EngineError::InvalidInput(_))));

        let mut nan = new_face("bob");
        nan.face_descriptor.0[3] = f32::NAN;
        assert!(matches!(reg.add(nan, at(0)).await, Err(EngineError::InvalidInput(_))));
        assert!(reg.list().is_empty());
    }

    #[tokio::test]
    async fn test_ids_stay_unique_within_one_millisecond() {
        let (_dir, _store, mut reg) = registry().await;
        let a = reg.add(new_face("a"), at(5)).await.unwrap();
        let b = reg.add(new_face("b"), at(5)).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(b.id, "person-6");
    }

    #[tokio::test]
    async fn test_add_from_detection_copies_descriptor() {
        let (_dir, store, mut reg) = registry().await;
        let detection = DetectionRecord {
            id: "face-x".into(),
            timestamp: at(0),
            confidence: 0.9,
            dominant_expression: Expression::Neutral,
            expression_confidence: 0.5,
            face_thumbnail: Some(EncodedImage(vec![9, 9])),
            context_image: None,
            person_name: UNKNOWN_LABEL.into(),
            is_known: false,
            estimated_distance_meters: 1.0,
            person_details: None,
            face_descriptor: descriptor(0.25),
        };
        store.put(&detection).await.unwrap();

        let face = reg
            .add_from_detection("face-x", "carol", "visitor", AccessLevel::Restricted, at(10))
            .await
            .unwrap();
        assert_eq!(face.face_descriptor, descriptor(0.25));
        assert_eq!(face.thumbnail, Some(EncodedImage(vec![9, 9])));
        assert_eq!(face.access_level, AccessLevel::Restricted);

        let missing = reg
            .add_from_detection("face-missing", "dave", "", AccessLevel::Standard, at(11))
            .await;
        assert!(matches!(missing, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_and_reset() {
        let (_dir, store, mut reg) = registry().await;
        let a = reg.add(new_face("a"), at(1)).await.unwrap();
        reg.add(new_face("b"), at(2)).await.unwrap();

        assert!(reg.remove(&a.id).await.unwrap());
        assert!(!reg.remove(&a.id).await.unwrap());
        assert_eq!(store.get_all::<KnownFace>().await.unwrap().len(), 1);

        assert_eq!(reg.reset().await.unwrap(), 1);
        assert!(reg.list().is_empty());
        assert!(store.get_all::<KnownFace>().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_sees_existing_faces() {
        let (_dir, store, mut reg) = registry().await;
        reg.add(new_face("a"), at(1)).await.unwrap();
        let reloaded = Registry::load(store).await.unwrap();
        assert_eq!(reloaded.list(), reg.list());
    }
}
