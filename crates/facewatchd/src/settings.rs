use crate::engine::EngineError;
use facewatch_core::{Settings, SettingsPatch, SettingsRecord, SETTINGS_ID};
use facewatch_store::Store;

/// Owns the single settings record.
pub struct SettingsManager {
    store: Store,
    current: Settings,
}

impl SettingsManager {
    /// Seed from the store. The canonical row wins, then the first row, then
    /// defaults. Any other rows are deleted, and an adopted or invalid row is
    /// rewritten under the canonical id.
    pub async fn load(store: Store) -> Result<Self, EngineError> {
        let rows: Vec<SettingsRecord> = store.get_all().await?;
        let chosen = rows
            .iter()
            .find(|r| r.id == SETTINGS_ID)
            .or_else(|| rows.first())
            .cloned();

        let (current, rewrite) = match &chosen {
            Some(row) => match row.data.validate() {
                Ok(()) => (row.data, row.id != SETTINGS_ID),
                Err(e) => {
                    tracing::warn!(id = %row.id, error = %e, "stored settings invalid; using defaults");
                    (Settings::default(), true)
                }
            },
            None => (Settings::default(), false),
        };

        for row in rows.iter().filter(|r| r.id != SETTINGS_ID) {
            tracing::warn!(id = %row.id, "removing extra settings row");
            store.delete::<SettingsRecord>(&row.id).await?;
        }
        if rewrite {
            store.put(&SettingsRecord::new(current)).await?;
        }

        tracing::info!(
            range_m = current.detection_range_meters,
            min_confidence = current.min_confidence,
            frequency = ?current.scan_frequency,
            "settings loaded"
        );
        Ok(Self { store, current })
    }

    pub fn current(&self) -> Settings {
        self.current
    }

    /// Validate and persist a partial update. Memory changes only after the write.
    pub async fn update(&mut self, patch: &SettingsPatch) -> Result<Settings, EngineError> {
        let next = self.current.merged(patch);
        next.validate()?;
        self.store.put(&SettingsRecord::new(next)).await?;
        self.current = next;
        tracing::info!(settings = ?next, "settings updated");
        Ok(next)
    }
}
