use crate::engine::{EngineError, EngineHandle};
use crate::registry::NewKnownFace;
use facewatch_core::{AccessLevel, SettingsPatch};
use serde::Serialize;
use zbus::interface;

/// D-Bus interface for the facewatch daemon.
///
/// Bus name: org.facewatch.Facewatch1
/// Object path: /org/facewatch/Facewatch1
///
/// Records and settings travel as JSON strings.
pub struct FacewatchService {
    engine: EngineHandle,
}

impl FacewatchService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    match e {
        EngineError::InvalidInput(_) | EngineError::NotFound(_) => {
            zbus::fdo::Error::InvalidArgs(e.to_string())
        }
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.facewatch.Facewatch1")]
impl FacewatchService {
    /// Start detection, restarting it if already running.
    async fn start(&self) -> zbus::fdo::Result<()> {
        tracing::info!("start requested");
        self.engine.start().await.map_err(to_fdo)
    }

    async fn stop(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop requested");
        self.engine.stop().await.map_err(to_fdo)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(&self.engine.status().await.map_err(to_fdo)?)
    }

    /// Up to 20 most recent detections, newest first.
    async fn recent_detections(&self) -> zbus::fdo::Result<String> {
        to_json(&self.engine.recent_detections().await.map_err(to_fdo)?)
    }

    async fn notifications(&self) -> zbus::fdo::Result<String> {
        to_json(&self.engine.notifications().await.map_err(to_fdo)?)
    }

    async fn unread_count(&self) -> zbus::fdo::Result<u32> {
        let count = self.engine.unread_count().await.map_err(to_fdo)?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn mark_notification_read(&self, id: &str) -> zbus::fdo::Result<bool> {
        self.engine.mark_notification_read(id).await.map_err(to_fdo)
    }

    async fn clear_notifications(&self) -> zbus::fdo::Result<()> {
        tracing::info!("clear notifications requested");
        self.engine.clear_notifications().await.map_err(to_fdo)
    }

    async fn list_known_faces(&self) -> zbus::fdo::Result<String> {
        to_json(&self.engine.known_faces().await.map_err(to_fdo)?)
    }

    /// Enroll the person from a recorded detection. Returns the new face as JSON.
    async fn add_known_face(
        &self,
        detection_id: &str,
        name: &str,
        role: &str,
        access_level: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(detection_id, name, "add known face requested");
        let access_level: AccessLevel = access_level
            .parse()
            .map_err(zbus::fdo::Error::InvalidArgs)?;
        let face = self
            .engine
            .add_known_face(detection_id, name, role, access_level)
            .await
            .map_err(to_fdo)?;
        to_json(&face)
    }

    /// Enroll a person from a JSON document carrying a face descriptor.
    async fn enroll_known_face(&self, face_json: &str) -> zbus::fdo::Result<String> {
        let face: NewKnownFace = serde_json::from_str(face_json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad face document: {e}")))?;
        tracing::info!(name = %face.name, "enroll known face requested");
        let face = self.engine.enroll_known_face(face).await.map_err(to_fdo)?;
        to_json(&face)
    }

    async fn remove_known_face(&self, id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(id, "remove known face requested");
        self.engine.remove_known_face(id).await.map_err(to_fdo)
    }

    /// Delete every known face. Returns how many were removed.
    async fn reset_known_faces(&self) -> zbus::fdo::Result<u32> {
        tracing::info!("reset known faces requested");
        let count = self.engine.reset_known_faces().await.map_err(to_fdo)?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn get_settings(&self) -> zbus::fdo::Result<String> {
        to_json(&self.engine.settings().await.map_err(to_fdo)?)
    }

    /// Apply a partial settings update, e.g. `{"detectionRangeMeters": 3.5}`.
    /// Returns the resulting settings.
    async fn update_settings(&self, patch_json: &str) -> zbus::fdo::Result<String> {
        let patch: SettingsPatch = serde_json::from_str(patch_json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad settings document: {e}")))?;
        to_json(&self.engine.update_settings(patch).await.map_err(to_fdo)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            to_fdo(EngineError::InvalidInput("x".into())),
            zbus::fdo::Error::InvalidArgs(_)
        ));
        assert!(matches!(
            to_fdo(EngineError::NotFound("face-1".into())),
            zbus::fdo::Error::InvalidArgs(_)
        ));
        assert!(matches!(
            to_fdo(EngineError::ChannelClosed),
            zbus::fdo::Error::Failed(_)
        ));
    }
}
