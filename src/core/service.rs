use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::analytics::{aggregate, ranked_matches, AnalyticsQuery, AnalyticsReport, RankedMatch};
use super::batcher::BulkIngestionBatcher;
use super::document_parser::{DocumentExtractor, ResumeDocumentParser};
use super::errors::CoreError;
use super::fingerprint::FingerprintIndex;
use super::lexicon::{SharedLexicon, SkillLexicon};
use super::matching::MatchingEngine;
use super::models::{
    Application, ApplicationStatus, BatchReport, DocumentInput, JobRequirements, MatchScore,
    PipelineSettings, PostingStatus, ScreeningStatus, SourceMetadata,
};
use super::normalizer::{ResumeNormalizer, SectionLexicon};
use super::record_builder::{BuiltRecord, CandidateRecordBuilder};
use super::report_store::JsonReportStore;
use super::screening::{apply_override, PairOutcome, ScreeningCriteria, ScreeningEngine, ScreeningPair};
use super::settings_store::SettingsStore;
use super::similarity::{BagOfTermsCosine, SemanticSimilarity};
use super::store::{JsonFileStore, PersistRecord, RecordStore, RowResult, StorePool};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedDocument {
    pub file_name: String,
    pub content_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub run_id: Option<String>,
    pub job_id: String,
    /// Latest published version when absent.
    pub job_version: Option<u32>,
    pub documents: Vec<EncodedDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    pub candidate_id: String,
    pub job_id: String,
    pub job_version: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopMatchesRequest {
    pub job_id: String,
    pub job_version: Option<u32>,
    pub limit: usize,
    #[serde(default)]
    pub min_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningRequest {
    pub job_id: String,
    pub job_version: Option<u32>,
    #[serde(default)]
    pub criteria: ScreeningCriteria,
    /// Every candidate scored against the job version when absent.
    pub candidate_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningRunReport {
    pub job_id: String,
    pub job_version: u32,
    pub passed: usize,
    pub failed: usize,
    pub held_for_review: usize,
    pub errors: usize,
    pub outcomes: Vec<PairOutcome>,
}

impl ScreeningRunReport {
    fn tally(job: &JobRequirements, outcomes: Vec<PairOutcome>) -> Self {
        let mut report = Self {
            job_id: job.job_id.clone(),
            job_version: job.version,
            ..Self::default()
        };
        for outcome in &outcomes {
            match outcome {
                PairOutcome::Decided { decision } => match decision.status {
                    ScreeningStatus::Passed => report.passed += 1,
                    ScreeningStatus::Failed => report.failed += 1,
                    ScreeningStatus::HeldForReview => report.held_for_review += 1,
                    ScreeningStatus::Pending => {}
                },
                PairOutcome::Error { .. } => report.errors += 1,
            }
        }
        report.outcomes = outcomes;
        report
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRequest {
    pub job_id: String,
    pub job_version: Option<u32>,
    pub candidate_ids: Vec<String>,
    pub status: ScreeningStatus,
    pub actor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitApplicationRequest {
    pub candidate_id: String,
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceApplicationRequest {
    pub application_id: String,
    pub status: ApplicationStatus,
}

pub struct IntakeService {
    settings: PipelineSettings,
    pool: StorePool,
    index: Arc<FingerprintIndex>,
    lexicon: SharedLexicon,
    similarity: Arc<dyn SemanticSimilarity>,
    extractor: Arc<dyn DocumentExtractor>,
    normalizer: Arc<ResumeNormalizer>,
    reports: Option<JsonReportStore>,
    cancellation_tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl IntakeService {
    /// Validates settings, loads the lexicon and seeds the fingerprint index from `store`.
    pub async fn new(
        settings: PipelineSettings,
        store: Arc<dyn RecordStore>,
    ) -> anyhow::Result<Self> {
        settings.validate()?;

        let lexicon = match settings.lexicon_path.as_deref() {
            Some(path) => SkillLexicon::load(path).await?,
            None => SkillLexicon::builtin(),
        };
        let entries = store
            .fingerprint_entries()
            .await
            .context("failed to load fingerprint index")?;
        let similarity: Arc<dyn SemanticSimilarity> = Arc::new(BagOfTermsCosine);
        tracing::info!(
            aliases = lexicon.len(),
            fingerprints = entries.len(),
            similarity = similarity.name(),
            "intake service ready"
        );

        Ok(Self {
            pool: StorePool::new(store, settings.store_pool_size),
            index: Arc::new(FingerprintIndex::from_entries(entries)),
            lexicon: SharedLexicon::new(lexicon),
            similarity,
            extractor: Arc::new(ResumeDocumentParser::new()),
            normalizer: Arc::new(ResumeNormalizer::new(
                SectionLexicon::default(),
                settings.min_text_length,
            )),
            reports: None,
            cancellation_tokens: Mutex::new(HashMap::new()),
            settings,
        })
    }

    /// File-backed service rooted at `data_root`: settings, records and run reports.
    pub async fn open(data_root: &Path) -> anyhow::Result<Self> {
        let settings = SettingsStore::with_path(data_root.join("intake-settings.json"))
            .load()
            .await?;
        let store = JsonFileStore::open(data_root.join("records.json"))
            .await
            .with_context(|| format!("failed to open record store in {}", data_root.display()))?;
        let reports =
            JsonReportStore::new_with_root(data_root.join("runs"), settings.report_retention_hours);

        Ok(Self::new(settings, Arc::new(store)).await?.with_report_store(reports))
    }

    pub fn with_report_store(mut self, reports: JsonReportStore) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn matching_engine(&self, lexicon: Arc<SkillLexicon>) -> Result<MatchingEngine, CoreError> {
        MatchingEngine::new(
            lexicon,
            Arc::clone(&self.similarity),
            self.settings.default_weights,
        )
    }

    async fn store(&self) -> Result<super::store::PooledStore<'_>, CoreError> {
        self.pool.acquire().await
    }

    async fn load_job(&self, job_id: &str, version: Option<u32>) -> Result<JobRequirements, CoreError> {
        self.store()
            .await?
            .load_job(job_id, version)
            .await?
            .ok_or_else(|| match version {
                Some(version) => CoreError::JobNotFound(format!("{job_id} v{version}")),
                None => CoreError::JobNotFound(job_id.to_string()),
            })
    }

    pub async fn publish_job(&self, job: JobRequirements) -> anyhow::Result<JobRequirements> {
        self.matching_engine(self.lexicon.snapshot())?
            .validate_job(&job)?;
        self.store().await?.publish_job(&job).await?;
        tracing::info!(job_id = %job.job_id, version = job.version, "job published");
        Ok(job)
    }

    /// Publish the next version of `job_id` with the posting closed.
    pub async fn close_job(&self, job_id: &str) -> anyhow::Result<JobRequirements> {
        let current = self.load_job(job_id, None).await?;
        if current.status == PostingStatus::Closed {
            return Ok(current);
        }
        let mut closed = current.revise();
        closed.status = PostingStatus::Closed;
        self.publish_job(closed).await
    }

    pub async fn ingest_batch(&self, request: IngestRequest) -> anyhow::Result<BatchReport> {
        let engine = base64::engine::general_purpose::STANDARD;
        let documents = request
            .documents
            .into_iter()
            .map(|doc| {
                engine
                    .decode(doc.content_base64.trim())
                    .map(|bytes| DocumentInput::new(doc.file_name.clone(), bytes))
                    .map_err(|err| {
                        CoreError::InvalidRequest(format!(
                            "{} is not valid base64: {err}",
                            doc.file_name
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.ingest_documents(request.run_id, &request.job_id, request.job_version, documents)
            .await
    }

    pub async fn ingest_documents(
        &self,
        run_id: Option<String>,
        job_id: &str,
        job_version: Option<u32>,
        documents: Vec<DocumentInput>,
    ) -> anyhow::Result<BatchReport> {
        let job = self.load_job(job_id, job_version).await?;
        if job.status == PostingStatus::Closed {
            return Err(CoreError::InvalidRequest(format!(
                "job {} v{} is closed to new candidates",
                job.job_id, job.version
            ))
            .into());
        }

        let engine = Arc::new(self.matching_engine(self.lexicon.snapshot())?);
        let batcher = BulkIngestionBatcher::new(
            Arc::clone(&self.extractor),
            Arc::clone(&self.normalizer),
            self.pool.clone(),
            Arc::clone(&self.index),
            self.settings.clone(),
        )?;

        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let token = CancellationToken::new();
        {
            let mut tokens = self.cancellation_tokens.lock().await;
            if tokens.contains_key(&run_id) {
                return Err(CoreError::InvalidRequest(format!("run {run_id} is already active")).into());
            }
            tokens.insert(run_id.clone(), token.clone());
        }

        let result = batcher
            .ingest_batch(run_id.clone(), documents, &job, engine, token)
            .await;
        self.cancellation_tokens.lock().await.remove(&run_id);
        let report = result?;

        if let Some(reports) = &self.reports {
            if let Err(err) = reports.save_report(&report).await {
                tracing::warn!(run_id = %report.run_id, error = %err, "failed to save run report");
            }
        }
        Ok(report)
    }

    /// Returns false when no run with this id is active.
    pub async fn cancel_batch(&self, run_id: &str) -> bool {
        let token = {
            let tokens = self.cancellation_tokens.lock().await;
            tokens.get(run_id).cloned()
        };

        match token {
            Some(token) => {
                token.cancel();
                tracing::info!(run_id, "batch cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Parse one document into a candidate record without storing it.
    pub async fn parse_document(&self, document: DocumentInput) -> anyhow::Result<BuiltRecord> {
        let extracted = self
            .extractor
            .extract(&document.file_name, &document.bytes)
            .await?;
        let normalized = self.normalizer.normalize(&extracted.text, extracted.format);
        let source = SourceMetadata {
            file_name: document.file_name,
            byte_len: extracted.byte_len,
            format: extracted.format,
            ingested_at: chrono::Utc::now(),
        };
        let lexicon = self.lexicon.snapshot();
        Ok(CandidateRecordBuilder::new(&self.settings).build(&normalized, &lexicon, source)?)
    }

    pub async fn score_candidate(&self, request: ScoreRequest) -> anyhow::Result<MatchScore> {
        let job = self.load_job(&request.job_id, request.job_version).await?;
        let candidate = self
            .store()
            .await?
            .load_candidate(&request.candidate_id)
            .await?
            .ok_or_else(|| CoreError::CandidateNotFound(request.candidate_id.clone()))?;

        let score = self
            .matching_engine(self.lexicon.snapshot())?
            .score(&candidate, &job)?;
        let rows = self
            .store()
            .await?
            .upsert_records(&[PersistRecord::ScoreRefresh {
                score: score.clone(),
            }])
            .await?;
        single_row(rows)?;
        Ok(score)
    }

    /// Stored scores for one job version, best first.
    pub async fn top_matches(&self, request: TopMatchesRequest) -> anyhow::Result<Vec<RankedMatch>> {
        if !(request.min_score.is_finite() && (0.0..=1.0).contains(&request.min_score)) {
            return Err(CoreError::InvalidRequest(format!(
                "minimum score must be within [0, 1], got {}",
                request.min_score
            ))
            .into());
        }
        let job = self.load_job(&request.job_id, request.job_version).await?;
        let snapshot = self.store().await?.snapshot().await?;
        Ok(ranked_matches(&snapshot, &job, request.limit, request.min_score))
    }

    pub async fn run_screening(&self, request: ScreeningRequest) -> anyhow::Result<ScreeningRunReport> {
        let job = self.load_job(&request.job_id, request.job_version).await?;
        let lexicon = self.lexicon.snapshot();
        let screening = ScreeningEngine::new(request.criteria, Arc::clone(&lexicon))?;
        let matching = self.matching_engine(lexicon)?;
        let snapshot = self.store().await?.snapshot().await?;

        let candidates: HashMap<&str, _> = snapshot
            .candidates
            .iter()
            .map(|c| (c.id.as_str(), c))
            .collect();
        let scores: BTreeMap<&str, _> = snapshot
            .scores
            .iter()
            .filter(|s| s.job_id == job.job_id && s.job_version == job.version)
            .map(|s| (s.candidate_id.as_str(), s))
            .collect();
        let decisions: HashMap<&str, _> = snapshot
            .decisions
            .iter()
            .filter(|d| d.job_id == job.job_id && d.job_version == job.version)
            .map(|d| (d.candidate_id.as_str(), d))
            .collect();

        let candidate_ids: Vec<String> = match request.candidate_ids {
            Some(ids) => ids,
            None => scores.keys().map(|id| id.to_string()).collect(),
        };

        let mut slots: Vec<Result<ScreeningPair, PairOutcome>> = Vec::with_capacity(candidate_ids.len());
        let mut fresh_scores = Vec::new();
        for candidate_id in &candidate_ids {
            let Some(candidate) = candidates.get(candidate_id.as_str()) else {
                slots.push(Err(PairOutcome::Error {
                    candidate_id: candidate_id.clone(),
                    job_id: job.job_id.clone(),
                    reason: CoreError::CandidateNotFound(candidate_id.clone()).to_string(),
                }));
                continue;
            };

            let score = match scores.get(candidate_id.as_str()) {
                Some(score) => (*score).clone(),
                None => {
                    let score = matching.score(candidate, &job)?;
                    fresh_scores.push(PersistRecord::ScoreRefresh {
                        score: score.clone(),
                    });
                    score
                }
            };
            slots.push(Ok(ScreeningPair {
                candidate: (*candidate).clone(),
                score,
                existing: decisions.get(candidate_id.as_str()).map(|d| (*d).clone()),
            }));
        }

        if !fresh_scores.is_empty() {
            if let Err(err) = self.store().await?.upsert_records(&fresh_scores).await {
                tracing::warn!(job_id = %job.job_id, error = %err, "failed to store scores computed for screening");
            }
        }

        let pairs: Vec<ScreeningPair> = slots
            .iter()
            .filter_map(|slot| slot.as_ref().ok().cloned())
            .collect();
        let mut evaluated = screening.run_bulk(&job, pairs).into_iter();
        let outcomes: Vec<PairOutcome> = slots
            .into_iter()
            .filter_map(|slot| match slot {
                Ok(_) => evaluated.next(),
                Err(outcome) => Some(outcome),
            })
            .collect();

        let outcomes = self.persist_decisions(outcomes).await?;
        let report = ScreeningRunReport::tally(&job, outcomes);
        tracing::info!(
            job_id = %report.job_id,
            job_version = report.job_version,
            passed = report.passed,
            failed = report.failed,
            held_for_review = report.held_for_review,
            errors = report.errors,
            "screening run finished"
        );
        Ok(report)
    }

    pub async fn override_decisions(&self, request: OverrideRequest) -> anyhow::Result<ScreeningRunReport> {
        let job = self.load_job(&request.job_id, request.job_version).await?;
        let mut outcomes = Vec::with_capacity(request.candidate_ids.len());

        for candidate_id in &request.candidate_ids {
            let loaded = self
                .store()
                .await?
                .load_decision(candidate_id, &job.job_id, job.version)
                .await?;
            let result = match loaded {
                Some(mut decision) => apply_override(&mut decision, request.status, &request.actor)
                    .map(|()| decision),
                None => Err(CoreError::InvalidRequest(format!(
                    "no screening decision for {candidate_id} on {} v{}",
                    job.job_id, job.version
                ))),
            };

            outcomes.push(match result {
                Ok(decision) => PairOutcome::Decided { decision },
                Err(err) => PairOutcome::Error {
                    candidate_id: candidate_id.clone(),
                    job_id: job.job_id.clone(),
                    reason: err.to_string(),
                },
            });
        }

        let outcomes = self.persist_decisions(outcomes).await?;
        Ok(ScreeningRunReport::tally(&job, outcomes))
    }

    /// Store every decided outcome; rows the store refuses turn into per-pair errors.
    async fn persist_decisions(&self, mut outcomes: Vec<PairOutcome>) -> Result<Vec<PairOutcome>, CoreError> {
        let decided: Vec<(usize, _)> = outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, outcome)| match outcome {
                PairOutcome::Decided { decision } => Some((i, decision.clone())),
                PairOutcome::Error { .. } => None,
            })
            .collect();
        if decided.is_empty() {
            return Ok(outcomes);
        }

        let decisions: Vec<_> = decided.iter().map(|(_, d)| d.clone()).collect();
        let rows = match self.store().await?.upsert_decisions(&decisions).await {
            Ok(rows) => rows,
            Err(err) => vec![RowResult::Rejected(err.to_string()); decisions.len()],
        };

        for ((i, decision), row) in decided.into_iter().zip(rows) {
            let reason = match row {
                RowResult::Stored => continue,
                RowResult::Rejected(reason) => reason,
                RowResult::Conflict { existing_candidate_id } => {
                    format!("conflicts with {existing_candidate_id}")
                }
            };
            outcomes[i] = PairOutcome::Error {
                candidate_id: decision.candidate_id,
                job_id: decision.job_id,
                reason,
            };
        }
        Ok(outcomes)
    }

    pub async fn get_analytics(&self, query: AnalyticsQuery) -> anyhow::Result<AnalyticsReport> {
        let snapshot = self.store().await?.snapshot().await?;
        Ok(aggregate(&snapshot, &query))
    }

    /// Swap in a new lexicon; batches already running keep the one they started with.
    pub async fn reload_lexicon(&self, path: Option<PathBuf>) -> anyhow::Result<usize> {
        let lexicon = match path.or_else(|| self.settings.lexicon_path.clone()) {
            Some(path) => SkillLexicon::load(&path).await?,
            None => SkillLexicon::builtin(),
        };
        let aliases = lexicon.len();
        self.lexicon.replace(lexicon);
        tracing::info!(aliases, "skill lexicon reloaded");
        Ok(aliases)
    }

    pub async fn submit_application(&self, request: SubmitApplicationRequest) -> anyhow::Result<Application> {
        let job = self.load_job(&request.job_id, None).await?;
        if job.status == PostingStatus::Closed {
            return Err(CoreError::InvalidRequest(format!("job {} is closed", job.job_id)).into());
        }
        let application = Application::submit(request.candidate_id, request.job_id);
        let rows = self
            .store()
            .await?
            .upsert_applications(std::slice::from_ref(&application))
            .await?;
        single_row(rows)?;
        Ok(application)
    }

    pub async fn advance_application(&self, request: AdvanceApplicationRequest) -> anyhow::Result<Application> {
        let mut application = self
            .store()
            .await?
            .load_application(&request.application_id)
            .await?
            .ok_or_else(|| {
                CoreError::InvalidRequest(format!("unknown application {}", request.application_id))
            })?;

        application.advance(request.status)?;
        let rows = self
            .store()
            .await?
            .upsert_applications(std::slice::from_ref(&application))
            .await?;
        single_row(rows)?;
        Ok(application)
    }

    pub async fn load_report(&self, run_id: &str) -> anyhow::Result<Option<BatchReport>> {
        match &self.reports {
            Some(reports) => reports.load_report(run_id).await,
            None => Ok(None),
        }
    }

    pub async fn list_runs(&self) -> anyhow::Result<Vec<String>> {
        match &self.reports {
            Some(reports) => reports.list_runs().await,
            None => Ok(Vec::new()),
        }
    }
}

fn single_row(rows: Vec<RowResult>) -> Result<(), CoreError> {
    match rows.into_iter().next() {
        Some(RowResult::Stored) => Ok(()),
        Some(RowResult::Rejected(reason)) => Err(CoreError::InvalidRequest(reason)),
        Some(RowResult::Conflict { existing_candidate_id }) => Err(CoreError::InvalidRequest(
            format!("conflicts with candidate {existing_candidate_id}"),
        )),
        None => Err(CoreError::persistence("store returned no result", false)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::core::models::{DocumentOutcome, RunOutcome, ScreeningDecision};
    use crate::core::store::MemoryStore;

    fn encoded(file_name: &str, text: &str) -> EncodedDocument {
        EncodedDocument {
            file_name: file_name.to_string(),
            content_base64: base64::engine::general_purpose::STANDARD.encode(text.as_bytes()),
        }
    }

    fn strong_resume() -> String {
        "Jane Doe\njane.doe@example.com\n(650) 253-0000\n\nSkills\nPython, SQL, Docker, Kubernetes\n\nExperience\nSenior data engineer with 8 years of experience building Python and SQL pipelines.\n\nEducation\nMaster of Science in Computer Science\n".to_string()
    }

    fn weak_resume() -> String {
        "John Smith\njohn.smith@example.com\n\nSkills\nPhotoshop, Illustrator\n\nExperience\nGraphic designer for two agencies creating brand identities.\n".to_string()
    }

    fn data_job() -> JobRequirements {
        let mut job = JobRequirements::new("data-eng");
        job.title = "Data Engineer".to_string();
        job.required_skills = BTreeSet::from(["python".to_string(), "sql".to_string()]);
        job.preferred_skills = BTreeSet::from(["docker".to_string()]);
        job.min_years_experience = Some(3.0);
        job.description = "Senior data engineer building Python and SQL pipelines".to_string();
        job
    }

    async fn service() -> IntakeService {
        let settings = PipelineSettings {
            worker_count: 2,
            retry_delay_seconds: 0.0,
            ..PipelineSettings::default()
        };
        IntakeService::new(settings, Arc::new(MemoryStore::new()))
            .await
            .unwrap()
    }

    fn core_error(err: &anyhow::Error) -> Option<&CoreError> {
        err.downcast_ref::<CoreError>()
    }

    #[tokio::test]
    async fn ingest_then_screen_then_override() {
        let service = service().await;
        service.publish_job(data_job()).await.unwrap();

        let report = service
            .ingest_batch(IngestRequest {
                run_id: Some("run-1".to_string()),
                job_id: "data-eng".to_string(),
                job_version: None,
                documents: vec![
                    encoded("jane.txt", &strong_resume()),
                    encoded("john.txt", &weak_resume()),
                    encoded("scan.tiff", "II*"),
                ],
            })
            .await
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::PartialSuccess);
        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(report.summary.parse_failed, 1);

        let screening = service
            .run_screening(ScreeningRequest {
                job_id: "data-eng".to_string(),
                job_version: None,
                criteria: ScreeningCriteria {
                    pass_threshold: 0.5,
                    ambiguity_band: 0.1,
                    ..ScreeningCriteria::default()
                },
                candidate_ids: None,
            })
            .await
            .unwrap();
        assert_eq!(screening.outcomes.len(), 2);
        assert_eq!(screening.errors, 0);
        assert_eq!(screening.passed + screening.failed + screening.held_for_review, 2);

        // A second run over terminal decisions is rejected pair by pair.
        let rerun = service
            .run_screening(ScreeningRequest {
                job_id: "data-eng".to_string(),
                job_version: None,
                criteria: ScreeningCriteria::default(),
                candidate_ids: None,
            })
            .await
            .unwrap();
        assert_eq!(rerun.errors, 2);

        let first_id = match &screening.outcomes[0] {
            PairOutcome::Decided { decision } => decision.candidate_id.clone(),
            other => panic!("unexpected {other:?}"),
        };
        let overridden = service
            .override_decisions(OverrideRequest {
                job_id: "data-eng".to_string(),
                job_version: None,
                candidate_ids: vec![first_id],
                status: ScreeningStatus::Passed,
                actor: "recruiter@example.com".to_string(),
            })
            .await
            .unwrap();
        // Only held decisions can be overridden; terminal ones are refused.
        assert_eq!(overridden.outcomes.len(), 1);
        if screening.held_for_review == 0 {
            assert_eq!(overridden.errors, 1);
        }

        let analytics = service.get_analytics(AnalyticsQuery::default()).await.unwrap();
        assert_eq!(analytics.totals.candidates, 2);
        assert_eq!(analytics.job_scores[0].candidates_scored, 2);
    }

    #[tokio::test]
    async fn concurrent_screening_runs_decide_each_pair_once() {
        let service = service().await;
        service.publish_job(data_job()).await.unwrap();
        service
            .ingest_documents(
                None,
                "data-eng",
                None,
                vec![
                    DocumentInput::new("jane.txt", strong_resume().into_bytes()),
                    DocumentInput::new("john.txt", weak_resume().into_bytes()),
                ],
            )
            .await
            .unwrap();

        let request = |pass_threshold: f64| ScreeningRequest {
            job_id: "data-eng".to_string(),
            job_version: None,
            criteria: ScreeningCriteria {
                pass_threshold,
                ambiguity_band: 0.0,
                ..ScreeningCriteria::default()
            },
            candidate_ids: None,
        };
        let (lenient, strict) = tokio::join!(
            service.run_screening(request(0.0)),
            service.run_screening(request(1.0))
        );
        let (lenient, strict) = (lenient.unwrap(), strict.unwrap());

        let decided: Vec<&ScreeningDecision> = lenient
            .outcomes
            .iter()
            .chain(&strict.outcomes)
            .filter_map(|outcome| match outcome {
                PairOutcome::Decided { decision } => Some(decision),
                PairOutcome::Error { .. } => None,
            })
            .collect();
        assert_eq!(decided.len(), 2);
        assert_eq!(lenient.errors + strict.errors, 2);

        let snapshot = service.store().await.unwrap().snapshot().await.unwrap();
        assert_eq!(snapshot.decisions.len(), 2);
        for decision in decided {
            let stored = snapshot
                .decisions
                .iter()
                .find(|d| d.candidate_id == decision.candidate_id)
                .unwrap();
            assert_eq!(stored.status, decision.status);
        }
    }

    #[tokio::test]
    async fn top_matches_rank_best_first() {
        let service = service().await;
        service.publish_job(data_job()).await.unwrap();
        service
            .ingest_documents(
                None,
                "data-eng",
                None,
                vec![
                    DocumentInput::new("john.txt", weak_resume().into_bytes()),
                    DocumentInput::new("jane.txt", strong_resume().into_bytes()),
                ],
            )
            .await
            .unwrap();

        let request = |limit: usize, min_score: f64| TopMatchesRequest {
            job_id: "data-eng".to_string(),
            job_version: None,
            limit,
            min_score,
        };
        let ranked = service.top_matches(request(10, 0.0)).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[0].candidate_name, "Jane Doe");
        assert!(ranked[0].composite > ranked[1].composite);

        let best = service.top_matches(request(1, 0.0)).await.unwrap();
        assert_eq!(best[0].candidate_id, ranked[0].candidate_id);

        let floor = ranked[1].composite + 1e-6;
        let above = service.top_matches(request(10, floor)).await.unwrap();
        assert_eq!(above.len(), 1);

        let err = service.top_matches(request(10, 1.5)).await.unwrap_err();
        assert!(matches!(core_error(&err), Some(CoreError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn reingesting_same_resume_reports_duplicate() {
        let service = service().await;
        service.publish_job(data_job()).await.unwrap();

        for run in ["run-a", "run-b"] {
            service
                .ingest_batch(IngestRequest {
                    run_id: Some(run.to_string()),
                    job_id: "data-eng".to_string(),
                    job_version: Some(1),
                    documents: vec![encoded("jane.txt", &strong_resume())],
                })
                .await
                .unwrap();
        }

        let analytics = service.get_analytics(AnalyticsQuery::default()).await.unwrap();
        assert_eq!(analytics.totals.candidates, 1);

        let report = service
            .ingest_documents(
                None,
                "data-eng",
                None,
                vec![DocumentInput::new("copy.txt", strong_resume().into_bytes())],
            )
            .await
            .unwrap();
        assert!(matches!(
            report.entries[0].outcome,
            DocumentOutcome::Duplicate { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_job_and_bad_payload_fail_fast() {
        let service = service().await;
        let err = service
            .ingest_batch(IngestRequest {
                run_id: None,
                job_id: "missing".to_string(),
                job_version: None,
                documents: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(core_error(&err), Some(CoreError::JobNotFound(_))));

        service.publish_job(data_job()).await.unwrap();
        let err = service
            .ingest_batch(IngestRequest {
                run_id: None,
                job_id: "data-eng".to_string(),
                job_version: None,
                documents: vec![EncodedDocument {
                    file_name: "cv.txt".to_string(),
                    content_base64: "***".to_string(),
                }],
            })
            .await
            .unwrap_err();
        assert!(matches!(core_error(&err), Some(CoreError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn closed_jobs_refuse_new_candidates() {
        let service = service().await;
        service.publish_job(data_job()).await.unwrap();
        let closed = service.close_job("data-eng").await.unwrap();
        assert_eq!(closed.version, 2);

        let err = service
            .ingest_documents(None, "data-eng", None, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(core_error(&err), Some(CoreError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn published_versions_are_immutable() {
        let service = service().await;
        service.publish_job(data_job()).await.unwrap();

        let mut edited = data_job();
        edited.title = "Platform Engineer".to_string();
        assert!(service.publish_job(edited.clone()).await.is_err());
        assert_eq!(service.publish_job(edited.revise()).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn application_lifecycle_is_enforced() {
        let service = service().await;
        service.publish_job(data_job()).await.unwrap();
        let report = service
            .ingest_documents(
                None,
                "data-eng",
                None,
                vec![DocumentInput::new("jane.txt", strong_resume().into_bytes())],
            )
            .await
            .unwrap();
        let candidate_id = match &report.entries[0].outcome {
            DocumentOutcome::Succeeded { candidate_id, .. } => candidate_id.clone(),
            other => panic!("unexpected {other:?}"),
        };

        let application = service
            .submit_application(SubmitApplicationRequest {
                candidate_id,
                job_id: "data-eng".to_string(),
            })
            .await
            .unwrap();
        let err = service
            .advance_application(AdvanceApplicationRequest {
                application_id: application.id.clone(),
                status: ApplicationStatus::Offer,
            })
            .await
            .unwrap_err();
        assert!(matches!(core_error(&err), Some(CoreError::InvalidTransition { .. })));

        let advanced = service
            .advance_application(AdvanceApplicationRequest {
                application_id: application.id,
                status: ApplicationStatus::UnderReview,
            })
            .await
            .unwrap();
        assert_eq!(advanced.status, ApplicationStatus::UnderReview);
    }

    #[tokio::test]
    async fn cancel_unknown_run_is_false() {
        let service = service().await;
        assert!(!service.cancel_batch("nope").await);
    }

    #[tokio::test]
    async fn reload_keeps_existing_snapshots() {
        let service = service().await;
        let before = service.lexicon.snapshot();

        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("lexicon.json");
        tokio::fs::write(
            &path,
            r#"{"skills": [{"name": "cobol", "aliases": ["cobol", "cobol85"]}]}"#,
        )
        .await
        .unwrap();

        service.reload_lexicon(Some(path)).await.unwrap();
        let after = service.lexicon.snapshot();
        assert_eq!(after.normalize_token("COBOL85").as_deref(), Some("cobol"));
        assert!(after.find_in_text("python and sql").is_empty());
        assert_eq!(
            before.find_in_text("python and sql"),
            BTreeSet::from(["python".to_string(), "sql".to_string()])
        );
    }
}
