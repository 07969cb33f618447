use facewatch_core::{DetectionRecord, KnownFace, NotificationRecord, SettingsRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// The four independently addressed collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Detections,
    KnownFaces,
    Notifications,
    Settings,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Detections,
        Collection::KnownFaces,
        Collection::Notifications,
        Collection::Settings,
    ];

    pub(crate) fn table(&self) -> &'static str {
        match self {
            Collection::Detections => "detections",
            Collection::KnownFaces => "known_faces",
            Collection::Notifications => "notifications",
            Collection::Settings => "settings",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

/// A JSON document stored in one collection under its id.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn id(&self) -> &str;
}

impl Record for DetectionRecord {
    const COLLECTION: Collection = Collection::Detections;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for KnownFace {
    const COLLECTION: Collection = Collection::KnownFaces;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for NotificationRecord {
    const COLLECTION: Collection = Collection::Notifications;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for SettingsRecord {
    const COLLECTION: Collection = Collection::Settings;

    fn id(&self) -> &str {
        &self.id
    }
}
