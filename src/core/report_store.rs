use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use super::models::BatchReport;

/// Batch reports on disk, one directory per run, pruned after the retention window.
pub struct JsonReportStore {
    runs_root: PathBuf,
    retention_hours: i64,
    mutex: Mutex<()>,
}

impl JsonReportStore {
    pub fn new_with_root(runs_root: PathBuf, retention_hours: i64) -> Self {
        Self {
            runs_root,
            retention_hours: retention_hours.max(1),
            mutex: Mutex::new(()),
        }
    }

    pub fn runs_root(&self) -> &Path {
        &self.runs_root
    }

    pub async fn save_report(&self, report: &BatchReport) -> anyhow::Result<()> {
        let _lock = self.mutex.lock().await;
        let path = self.report_path(&report.run_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("failed writing {}", path.display()))?;
        Ok(())
    }

    pub async fn load_report(&self, run_id: &str) -> anyhow::Result<Option<BatchReport>> {
        let _lock = self.mutex.lock().await;
        let path = self.report_path(run_id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        let json = tokio::fs::read_to_string(&path).await?;
        let report = serde_json::from_str::<BatchReport>(&json)
            .with_context(|| format!("invalid report JSON in {}", path.display()))?;
        Ok(Some(report))
    }

    /// Run ids still within retention, newest first.
    pub async fn list_runs(&self) -> anyhow::Result<Vec<String>> {
        self.cleanup_expired_runs().await?;

        if !tokio::fs::try_exists(&self.runs_root)
            .await
            .unwrap_or(false)
        {
            return Ok(Vec::new());
        }

        let mut dir = tokio::fs::read_dir(&self.runs_root).await?;
        let mut runs = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.metadata().await?.is_dir() {
                continue;
            }

            let run_id = entry.file_name().to_string_lossy().to_string();
            if run_id.trim().is_empty() {
                continue;
            }
            let completed_at = self
                .read_completed_at(&run_id)
                .await
                .unwrap_or_else(Utc::now);
            runs.push((completed_at, run_id));
        }

        runs.sort_by(|a, b| b.cmp(a));
        Ok(runs.into_iter().map(|(_, run_id)| run_id).collect())
    }

    pub async fn cleanup_expired_runs(&self) -> anyhow::Result<usize> {
        if !tokio::fs::try_exists(&self.runs_root)
            .await
            .unwrap_or(false)
        {
            return Ok(0);
        }

        let _lock = self.mutex.lock().await;
        let now = Utc::now();
        let mut removed = 0;
        let mut dir = tokio::fs::read_dir(&self.runs_root).await?;

        while let Some(entry) = dir.next_entry().await? {
            if !entry.metadata().await?.is_dir() {
                continue;
            }

            let run_id = entry.file_name().to_string_lossy().to_string();
            if run_id.trim().is_empty() {
                continue;
            }

            // Unreadable reports count as fresh so a half-written run is never pruned.
            let reference_time = self.read_completed_at(&run_id).await.unwrap_or(now);
            if now.signed_duration_since(reference_time) > Duration::hours(self.retention_hours) {
                tokio::fs::remove_dir_all(entry.path())
                    .await
                    .with_context(|| format!("failed removing run {run_id}"))?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, retention_hours = self.retention_hours, "pruned expired run reports");
        }
        Ok(removed)
    }

    async fn read_completed_at(&self, run_id: &str) -> Option<chrono::DateTime<Utc>> {
        let json = tokio::fs::read_to_string(self.report_path(run_id)).await.ok()?;
        serde_json::from_str::<BatchReport>(&json)
            .ok()
            .map(|report| report.completed_at)
    }

    fn report_path(&self, run_id: &str) -> PathBuf {
        self.runs_root.join(run_id).join("report.json")
    }
}
