use std::path::{Path, PathBuf};

use anyhow::Context;

use super::models::PipelineSettings;

pub struct SettingsStore {
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self {
            file_path: settings_path(),
        }
    }

    pub fn with_path(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Defaults when the file is absent; anything present must validate.
    pub async fn load(&self) -> anyhow::Result<PipelineSettings> {
        if !tokio::fs::try_exists(&self.file_path)
            .await
            .unwrap_or(false)
        {
            return Ok(PipelineSettings::default());
        }

        let content = tokio::fs::read_to_string(&self.file_path)
            .await
            .with_context(|| {
                format!("failed to read settings file {}", self.file_path.display())
            })?;

        let parsed = serde_json::from_str::<PipelineSettings>(&content).with_context(|| {
            format!("invalid JSON in settings file {}", self.file_path.display())
        })?;
        parsed
            .validate()
            .with_context(|| format!("rejected settings in {}", self.file_path.display()))?;

        Ok(parsed)
    }

    pub async fn save(&self, settings: &PipelineSettings) -> anyhow::Result<()> {
        settings.validate()?;
        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(settings)?;
        tokio::fs::write(&self.file_path, json).await?;
        Ok(())
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

fn settings_path() -> PathBuf {
    app_data_root().join("intake-settings.json")
}

pub fn app_data_root() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(local_app_data) = std::env::var("LOCALAPPDATA") {
            return PathBuf::from(local_app_data).join("TalentIntake");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = dirs::home_dir() {
            return home
                .join("Library")
                .join("Application Support")
                .join("TalentIntake");
        }
    }

    if let Some(path) = dirs::data_local_dir() {
        return path.join("TalentIntake");
    }

    PathBuf::from(".").join("TalentIntake")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let store = SettingsStore::with_path(temp.path().join("absent.json"));
        let settings = store.load().await.unwrap();
        assert_eq!(settings.persist_batch_size, 50);
        assert_eq!(settings.high_water_mark, 200);
    }

    #[tokio::test]
    async fn partial_file_fills_defaults_and_round_trips() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("settings.json");
        tokio::fs::write(&path, r#"{"workerCount": 3, "maxRetries": 5}"#)
            .await
            .unwrap();

        let store = SettingsStore::with_path(&path);
        let mut settings = store.load().await.unwrap();
        assert_eq!(settings.worker_count, 3);
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.default_country_code, "1");

        settings.persist_batch_size = 10;
        store.save(&settings).await.unwrap();
        assert_eq!(store.load().await.unwrap().persist_batch_size, 10);
    }

    #[tokio::test]
    async fn invalid_weights_are_rejected_at_load() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("settings.json");
        tokio::fs::write(
            &path,
            r#"{"defaultWeights": {"skillCoverage": 0.9, "experienceFit": 0.2, "educationFit": 0.1, "semanticSimilarity": 0.2}}"#,
        )
        .await
        .unwrap();

        let err = SettingsStore::with_path(&path).load().await.unwrap_err();
        assert!(format!("{err:#}").contains("Invalid configuration"));
    }
}
