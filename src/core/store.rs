use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, Semaphore, SemaphorePermit};

use super::errors::CoreError;
use super::fingerprint::FingerprintEntry;
use super::models::{Application, Candidate, JobRequirements, MatchScore, ScreeningDecision};

/// One unit of work handed to [`RecordStore::upsert_records`].
#[derive(Debug, Clone)]
pub enum PersistRecord {
    /// Insert-if-absent by fingerprint, together with the score computed for it.
    NewCandidate {
        candidate: Candidate,
        score: MatchScore,
    },
    /// Replace the score of an already stored candidate.
    ScoreRefresh { score: MatchScore },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowResult {
    Stored,
    Conflict { existing_candidate_id: String },
    Rejected(String),
}

/// Point-in-time copy of everything in the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub candidates: Vec<Candidate>,
    pub scores: Vec<MatchScore>,
    pub decisions: Vec<ScreeningDecision>,
    pub applications: Vec<Application>,
    pub jobs: Vec<JobRequirements>,
}

impl StoreSnapshot {
    /// Latest published version of every job, keyed by job id.
    pub fn latest_jobs(&self) -> BTreeMap<&str, &JobRequirements> {
        let mut latest: BTreeMap<&str, &JobRequirements> = BTreeMap::new();
        for job in &self.jobs {
            match latest.get(job.job_id.as_str()) {
                Some(current) if current.version >= job.version => {}
                _ => {
                    latest.insert(job.job_id.as_str(), job);
                }
            }
        }
        latest
    }
}

/// Batched persistence for candidates, scores, decisions, applications and job versions.
///
/// Batched calls return one [`RowResult`] per input row, in input order. An `Err` means the
/// whole call failed and nothing from it was applied.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn upsert_records(&self, records: &[PersistRecord]) -> Result<Vec<RowResult>, CoreError>;

    async fn upsert_decisions(
        &self,
        decisions: &[ScreeningDecision],
    ) -> Result<Vec<RowResult>, CoreError>;

    async fn upsert_applications(
        &self,
        applications: &[Application],
    ) -> Result<Vec<RowResult>, CoreError>;

    async fn publish_job(&self, job: &JobRequirements) -> Result<(), CoreError>;

    /// A specific version, or the latest one when `version` is `None`.
    async fn load_job(
        &self,
        job_id: &str,
        version: Option<u32>,
    ) -> Result<Option<JobRequirements>, CoreError>;

    async fn load_candidate(&self, candidate_id: &str) -> Result<Option<Candidate>, CoreError>;

    async fn load_score(
        &self,
        candidate_id: &str,
        job_id: &str,
        job_version: u32,
    ) -> Result<Option<MatchScore>, CoreError>;

    async fn load_decision(
        &self,
        candidate_id: &str,
        job_id: &str,
        job_version: u32,
    ) -> Result<Option<ScreeningDecision>, CoreError>;

    async fn load_application(
        &self,
        application_id: &str,
    ) -> Result<Option<Application>, CoreError>;

    async fn fingerprint_entries(&self) -> Result<Vec<FingerprintEntry>, CoreError>;

    async fn snapshot(&self) -> Result<StoreSnapshot, CoreError>;
}

fn pair_key(candidate_id: &str, job_id: &str, job_version: u32) -> String {
    format!("{candidate_id}::{job_id}::{job_version}")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoreState {
    candidates: BTreeMap<String, Candidate>,
    fingerprints: BTreeMap<String, String>,
    scores: BTreeMap<String, MatchScore>,
    decisions: BTreeMap<String, ScreeningDecision>,
    applications: BTreeMap<String, Application>,
    jobs: BTreeMap<String, BTreeMap<u32, JobRequirements>>,
}

impl StoreState {
    fn apply_records(&mut self, records: &[PersistRecord]) -> Vec<RowResult> {
        records
            .iter()
            .map(|record| match record {
                PersistRecord::NewCandidate { candidate, score } => {
                    if score.candidate_id != candidate.id {
                        return RowResult::Rejected(format!(
                            "score belongs to {} not {}",
                            score.candidate_id, candidate.id
                        ));
                    }
                    if let Some(existing) = self.fingerprints.get(&candidate.fingerprint) {
                        if existing != &candidate.id {
                            return RowResult::Conflict {
                                existing_candidate_id: existing.clone(),
                            };
                        }
                    }

                    self.fingerprints
                        .insert(candidate.fingerprint.clone(), candidate.id.clone());
                    self.candidates.insert(candidate.id.clone(), candidate.clone());
                    self.insert_score(score.clone());
                    RowResult::Stored
                }
                PersistRecord::ScoreRefresh { score } => {
                    if !self.candidates.contains_key(&score.candidate_id) {
                        return RowResult::Rejected(format!(
                            "unknown candidate {}",
                            score.candidate_id
                        ));
                    }
                    self.insert_score(score.clone());
                    RowResult::Stored
                }
            })
            .collect()
    }

    fn insert_score(&mut self, score: MatchScore) {
        let key = pair_key(&score.candidate_id, &score.job_id, score.job_version);
        self.scores.insert(key, score);
    }

    fn apply_decisions(&mut self, decisions: &[ScreeningDecision]) -> Vec<RowResult> {
        decisions
            .iter()
            .map(|decision| {
                if !self.candidates.contains_key(&decision.candidate_id) {
                    return RowResult::Rejected(format!(
                        "unknown candidate {}",
                        decision.candidate_id
                    ));
                }
                let key = pair_key(&decision.candidate_id, &decision.job_id, decision.job_version);
                // Checked under the write lock so racing screening runs cannot undo a final status.
                if let Some(stored) = self.decisions.get(&key) {
                    if let Err(err) = decision.may_replace(stored) {
                        return RowResult::Rejected(format!(
                            "decision for {} on {} v{}: {err}",
                            decision.candidate_id, decision.job_id, decision.job_version
                        ));
                    }
                }
                self.decisions.insert(key, decision.clone());
                RowResult::Stored
            })
            .collect()
    }

    fn apply_applications(&mut self, applications: &[Application]) -> Vec<RowResult> {
        applications
            .iter()
            .map(|application| {
                if !self.candidates.contains_key(&application.candidate_id) {
                    return RowResult::Rejected(format!(
                        "unknown candidate {}",
                        application.candidate_id
                    ));
                }
                if !self.jobs.contains_key(&application.job_id) {
                    return RowResult::Rejected(format!("unknown job {}", application.job_id));
                }
                self.applications
                    .insert(application.id.clone(), application.clone());
                RowResult::Stored
            })
            .collect()
    }

    fn publish_job(&mut self, job: &JobRequirements) -> Result<bool, CoreError> {
        if job.version == 0 {
            return Err(CoreError::InvalidRequest(format!(
                "job {} cannot be published with version 0",
                job.job_id
            )));
        }

        let versions = self.jobs.entry(job.job_id.clone()).or_default();
        match versions.get(&job.version) {
            Some(existing) if existing == job => Ok(false),
            Some(_) => Err(CoreError::InvalidRequest(format!(
                "job {} version {} is already published; revise it to publish changes",
                job.job_id, job.version
            ))),
            None => {
                versions.insert(job.version, job.clone());
                Ok(true)
            }
        }
    }

    fn load_job(&self, job_id: &str, version: Option<u32>) -> Option<JobRequirements> {
        let versions = self.jobs.get(job_id)?;
        match version {
            Some(version) => versions.get(&version).cloned(),
            None => versions.values().next_back().cloned(),
        }
    }

    fn fingerprint_entries(&self) -> Vec<FingerprintEntry> {
        let mut scored: BTreeMap<&str, BTreeMap<String, BTreeSet<u32>>> = BTreeMap::new();
        for score in self.scores.values() {
            scored
                .entry(score.candidate_id.as_str())
                .or_default()
                .entry(score.job_id.clone())
                .or_default()
                .insert(score.job_version);
        }

        self.fingerprints
            .iter()
            .map(|(fingerprint, candidate_id)| FingerprintEntry {
                fingerprint: fingerprint.clone(),
                candidate_id: candidate_id.clone(),
                scored: scored.remove(candidate_id.as_str()).unwrap_or_default(),
            })
            .collect()
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            candidates: self.candidates.values().cloned().collect(),
            scores: self.scores.values().cloned().collect(),
            decisions: self.decisions.values().cloned().collect(),
            applications: self.applications.values().cloned().collect(),
            jobs: self
                .jobs
                .values()
                .flat_map(|versions| versions.values().cloned())
                .collect(),
        }
    }
}

/// Process-local store. Each batched call is applied under one write lock.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert_records(&self, records: &[PersistRecord]) -> Result<Vec<RowResult>, CoreError> {
        Ok(self.state.write().await.apply_records(records))
    }

    async fn upsert_decisions(
        &self,
        decisions: &[ScreeningDecision],
    ) -> Result<Vec<RowResult>, CoreError> {
        Ok(self.state.write().await.apply_decisions(decisions))
    }

    async fn upsert_applications(
        &self,
        applications: &[Application],
    ) -> Result<Vec<RowResult>, CoreError> {
        Ok(self.state.write().await.apply_applications(applications))
    }

    async fn publish_job(&self, job: &JobRequirements) -> Result<(), CoreError> {
        self.state.write().await.publish_job(job).map(|_| ())
    }

    async fn load_job(
        &self,
        job_id: &str,
        version: Option<u32>,
    ) -> Result<Option<JobRequirements>, CoreError> {
        Ok(self.state.read().await.load_job(job_id, version))
    }

    async fn load_candidate(&self, candidate_id: &str) -> Result<Option<Candidate>, CoreError> {
        Ok(self.state.read().await.candidates.get(candidate_id).cloned())
    }

    async fn load_score(
        &self,
        candidate_id: &str,
        job_id: &str,
        job_version: u32,
    ) -> Result<Option<MatchScore>, CoreError> {
        let key = pair_key(candidate_id, job_id, job_version);
        Ok(self.state.read().await.scores.get(&key).cloned())
    }

    async fn load_decision(
        &self,
        candidate_id: &str,
        job_id: &str,
        job_version: u32,
    ) -> Result<Option<ScreeningDecision>, CoreError> {
        let key = pair_key(candidate_id, job_id, job_version);
        Ok(self.state.read().await.decisions.get(&key).cloned())
    }

    async fn load_application(
        &self,
        application_id: &str,
    ) -> Result<Option<Application>, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .applications
            .get(application_id)
            .cloned())
    }

    async fn fingerprint_entries(&self) -> Result<Vec<FingerprintEntry>, CoreError> {
        Ok(self.state.read().await.fingerprint_entries())
    }

    async fn snapshot(&self) -> Result<StoreSnapshot, CoreError> {
        Ok(self.state.read().await.snapshot())
    }
}

/// Store persisted as a single JSON document.
///
/// Mutations are applied to a copy, written to `<file>.tmp` and renamed over the
/// original; the in-memory state only advances once the rename succeeded.
///
/// Every mutation rewrites the whole file, candidate raw text included, so a batch costs
/// one full rewrite per persistence group. Large or shared deployments should put another
/// [`RecordStore`] behind the pool instead.
pub struct JsonFileStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl JsonFileStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let state = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let json = tokio::fs::read_to_string(&path).await.map_err(|err| {
                CoreError::persistence(format!("failed reading {}: {err}", path.display()), true)
            })?;
            serde_json::from_str::<StoreState>(&json).map_err(|err| {
                CoreError::persistence(format!("invalid store file {}: {err}", path.display()), false)
            })?
        } else {
            StoreState::default()
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_state(&self, state: &StoreState) -> Result<(), CoreError> {
        let io_error =
            |err: std::io::Error| CoreError::persistence(format!("{}: {err}", self.path.display()), true);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let json = serde_json::to_string_pretty(state)
            .map_err(|err| CoreError::persistence(err.to_string(), false))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(io_error)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_error)?;
        Ok(())
    }

    async fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut StoreState) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        let output = apply(&mut next)?;
        self.write_state(&next).await?;
        *guard = next;
        Ok(output)
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn upsert_records(&self, records: &[PersistRecord]) -> Result<Vec<RowResult>, CoreError> {
        self.mutate(|state| Ok(state.apply_records(records))).await
    }

    async fn upsert_decisions(
        &self,
        decisions: &[ScreeningDecision],
    ) -> Result<Vec<RowResult>, CoreError> {
        self.mutate(|state| Ok(state.apply_decisions(decisions)))
            .await
    }

    async fn upsert_applications(
        &self,
        applications: &[Application],
    ) -> Result<Vec<RowResult>, CoreError> {
        self.mutate(|state| Ok(state.apply_applications(applications)))
            .await
    }

    async fn publish_job(&self, job: &JobRequirements) -> Result<(), CoreError> {
        {
            let state = self.state.read().await;
            if state.load_job(&job.job_id, Some(job.version)).as_ref() == Some(job) {
                return Ok(());
            }
        }
        self.mutate(|state| state.publish_job(job).map(|_| ())).await
    }

    async fn load_job(
        &self,
        job_id: &str,
        version: Option<u32>,
    ) -> Result<Option<JobRequirements>, CoreError> {
        Ok(self.state.read().await.load_job(job_id, version))
    }

    async fn load_candidate(&self, candidate_id: &str) -> Result<Option<Candidate>, CoreError> {
        Ok(self.state.read().await.candidates.get(candidate_id).cloned())
    }

    async fn load_score(
        &self,
        candidate_id: &str,
        job_id: &str,
        job_version: u32,
    ) -> Result<Option<MatchScore>, CoreError> {
        let key = pair_key(candidate_id, job_id, job_version);
        Ok(self.state.read().await.scores.get(&key).cloned())
    }

    async fn load_decision(
        &self,
        candidate_id: &str,
        job_id: &str,
        job_version: u32,
    ) -> Result<Option<ScreeningDecision>, CoreError> {
        let key = pair_key(candidate_id, job_id, job_version);
        Ok(self.state.read().await.decisions.get(&key).cloned())
    }

    async fn load_application(
        &self,
        application_id: &str,
    ) -> Result<Option<Application>, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .applications
            .get(application_id)
            .cloned())
    }

    async fn fingerprint_entries(&self) -> Result<Vec<FingerprintEntry>, CoreError> {
        Ok(self.state.read().await.fingerprint_entries())
    }

    async fn snapshot(&self) -> Result<StoreSnapshot, CoreError> {
        Ok(self.state.read().await.snapshot())
    }
}

/// Bounds concurrent store access. Acquisition waits while every slot is in use.
#[derive(Clone)]
pub struct StorePool {
    store: Arc<dyn RecordStore>,
    permits: Arc<Semaphore>,
}

pub struct PooledStore<'a> {
    store: &'a dyn RecordStore,
    _permit: SemaphorePermit<'a>,
}

impl<'a> Deref for PooledStore<'a> {
    type Target = dyn RecordStore + 'a;

    fn deref(&self) -> &Self::Target {
        self.store
    }
}

impl StorePool {
    pub fn new(store: Arc<dyn RecordStore>, size: usize) -> Self {
        Self {
            store,
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn acquire(&self) -> Result<PooledStore<'_>, CoreError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CoreError::persistence("store pool closed", false))?;
        Ok(PooledStore {
            store: self.store.as_ref(),
            _permit: permit,
        })
    }
}
