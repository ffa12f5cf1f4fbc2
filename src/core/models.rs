use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::CoreError;
use super::fingerprint::FingerprintPolicy;
use super::screening::RuleHit;
use super::weights::ScoringWeights;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum EducationLevel {
    None,
    Associate,
    Bachelor,
    Master,
    Doctorate,
    #[default]
    Unknown,
}

impl EducationLevel {
    /// Ordinal position on the degree scale; `Unknown` has no rank.
    pub fn rank(self) -> Option<u8> {
        match self {
            EducationLevel::None => Some(0),
            EducationLevel::Associate => Some(1),
            EducationLevel::Bachelor => Some(2),
            EducationLevel::Master => Some(3),
            EducationLevel::Doctorate => Some(4),
            EducationLevel::Unknown => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EducationLevel::None => "none",
            EducationLevel::Associate => "associate",
            EducationLevel::Bachelor => "bachelor",
            EducationLevel::Master => "master",
            EducationLevel::Doctorate => "doctorate",
            EducationLevel::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Txt,
    Unknown,
}

impl DocumentFormat {
    pub fn from_file_name(file_name: &str) -> Self {
        let extension = std::path::Path::new(file_name)
            .extension()
            .and_then(|v| v.to_str())
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => DocumentFormat::Pdf,
            "docx" => DocumentFormat::Docx,
            "txt" | "text" | "md" => DocumentFormat::Txt,
            _ => DocumentFormat::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    pub file_name: String,
    pub byte_len: usize,
    pub format: DocumentFormat,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: String,
    pub contact: ContactInfo,
    pub skills: BTreeSet<String>,
    pub years_experience: Option<f64>,
    pub education: EducationLevel,
    pub raw_text: String,
    pub source: SourceMetadata,
    pub fingerprint: String,
    pub degraded: bool,
    pub confidence: f64,
}

impl Candidate {
    pub fn display_name(&self) -> &str {
        self.contact
            .name
            .as_deref()
            .unwrap_or(self.source.file_name.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationPolicy {
    pub location: Option<String>,
    #[serde(default)]
    pub remote_ok: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostingStatus {
    #[default]
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobRequirements {
    pub job_id: String,
    #[serde(default = "first_version")]
    pub version: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub required_skills: BTreeSet<String>,
    #[serde(default)]
    pub preferred_skills: BTreeSet<String>,
    pub min_years_experience: Option<f64>,
    pub min_education: Option<EducationLevel>,
    #[serde(default)]
    pub location: LocationPolicy,
    #[serde(default)]
    pub description: String,
    pub weights: Option<ScoringWeights>,
    #[serde(default)]
    pub status: PostingStatus,
}

fn first_version() -> u32 {
    1
}

impl JobRequirements {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            version: 1,
            title: String::new(),
            required_skills: BTreeSet::new(),
            preferred_skills: BTreeSet::new(),
            min_years_experience: None,
            min_education: None,
            location: LocationPolicy::default(),
            description: String::new(),
            weights: None,
            status: PostingStatus::Open,
        }
    }

    /// Published versions never change; an edit starts from a copy with the next version number.
    pub fn revise(&self) -> Self {
        Self {
            version: self.version + 1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubScores {
    pub skill_coverage: f64,
    pub experience_fit: f64,
    pub education_fit: f64,
    pub semantic_similarity: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchTier {
    Excellent,
    Strong,
    Good,
    Potential,
    Poor,
}

impl MatchTier {
    pub fn from_composite(composite: f64) -> Self {
        if composite >= 0.85 {
            MatchTier::Excellent
        } else if composite >= 0.75 {
            MatchTier::Strong
        } else if composite >= 0.65 {
            MatchTier::Good
        } else if composite >= 0.5 {
            MatchTier::Potential
        } else {
            MatchTier::Poor
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchScore {
    pub candidate_id: String,
    pub job_id: String,
    pub job_version: u32,
    pub composite: f64,
    pub sub_scores: SubScores,
    pub weights: ScoringWeights,
    pub matched_skills: Vec<String>,
    pub missing_required: Vec<String>,
    pub tier: MatchTier,
    pub reasons: Vec<String>,
    pub concerns: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningStatus {
    Pending,
    Passed,
    Failed,
    HeldForReview,
}

impl ScreeningStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScreeningStatus::Pending => "pending",
            ScreeningStatus::Passed => "passed",
            ScreeningStatus::Failed => "failed",
            ScreeningStatus::HeldForReview => "held_for_review",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ScreeningStatus::Passed | ScreeningStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningDecision {
    pub candidate_id: String,
    pub job_id: String,
    pub job_version: u32,
    pub status: ScreeningStatus,
    pub rules: Vec<RuleHit>,
    pub score: MatchScore,
    pub decided_at: DateTime<Utc>,
    pub overridden_by: Option<String>,
}

impl ScreeningDecision {
    /// Whether this decision may take the place of `stored` for the same pair.
    ///
    /// Passed and failed are final. A held decision only gives way to an override.
    pub fn may_replace(&self, stored: &ScreeningDecision) -> Result<(), CoreError> {
        let allowed = match stored.status {
            ScreeningStatus::Pending => true,
            ScreeningStatus::HeldForReview => {
                self.status.is_terminal() && self.overridden_by.is_some()
            }
            ScreeningStatus::Passed | ScreeningStatus::Failed => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                from: stored.status.as_str().to_string(),
                to: self.status.as_str().to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Submitted,
    UnderReview,
    Screened,
    Interview,
    Offer,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::UnderReview => "under_review",
            ApplicationStatus::Screened => "screened",
            ApplicationStatus::Interview => "interview",
            ApplicationStatus::Offer => "offer",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ApplicationStatus::Offer | ApplicationStatus::Rejected)
    }

    pub fn can_advance_to(self, next: ApplicationStatus) -> bool {
        use ApplicationStatus::*;
        match (self, next) {
            (from, Rejected) => !from.is_terminal(),
            (Submitted, UnderReview) | (UnderReview, Screened) | (Screened, Interview) => true,
            (Interview, Offer) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub candidate_id: String,
    pub job_id: String,
    pub status: ApplicationStatus,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn submit(candidate_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            candidate_id: candidate_id.into(),
            job_id: job_id.into(),
            status: ApplicationStatus::Submitted,
            submitted_at: now,
            updated_at: now,
        }
    }

    pub fn advance(&mut self, next: ApplicationStatus) -> Result<(), CoreError> {
        if !self.status.can_advance_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl DocumentInput {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Extraction,
    Parse,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Succeeded {
        candidate_id: String,
        score: MatchScore,
        #[serde(default)]
        issues: Vec<String>,
    },
    ParseFailed {
        kind: FailureKind,
        reason: String,
    },
    Duplicate {
        existing_candidate_id: String,
        refreshed_score: Option<MatchScore>,
    },
    FailedToPersist {
        candidate_id: String,
        score: MatchScore,
        reason: String,
    },
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub index: usize,
    pub file_name: String,
    pub outcome: DocumentOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub parse_failed: usize,
    pub duplicates: usize,
    pub failed_to_persist: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    PartialSuccess,
    TotalFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub run_id: String,
    pub job_id: String,
    pub job_version: u32,
    pub outcome: RunOutcome,
    pub cancelled: bool,
    pub summary: BatchSummary,
    pub entries: Vec<BatchEntry>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl BatchReport {
    pub fn assemble(
        run_id: String,
        job: &JobRequirements,
        entries: Vec<BatchEntry>,
        cancelled: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut summary = BatchSummary {
            total: entries.len(),
            ..BatchSummary::default()
        };
        for entry in &entries {
            match entry.outcome {
                DocumentOutcome::Succeeded { .. } => summary.succeeded += 1,
                DocumentOutcome::ParseFailed { .. } => summary.parse_failed += 1,
                DocumentOutcome::Duplicate { .. } => summary.duplicates += 1,
                DocumentOutcome::FailedToPersist { .. } => summary.failed_to_persist += 1,
                DocumentOutcome::Cancelled => summary.cancelled += 1,
            }
        }

        let handled = summary.succeeded + summary.duplicates;
        let outcome = if handled == summary.total {
            RunOutcome::Success
        } else if handled == 0 {
            RunOutcome::TotalFailure
        } else {
            RunOutcome::PartialSuccess
        };

        let completed_at = Utc::now();
        Self {
            run_id,
            job_id: job.job_id.clone(),
            job_version: job.version,
            outcome,
            cancelled,
            summary,
            entries,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    pub worker_count: usize,
    pub persist_batch_size: usize,
    pub high_water_mark: usize,
    pub store_pool_size: usize,
    pub max_retries: usize,
    pub retry_delay_seconds: f64,
    pub min_text_length: usize,
    pub max_years_experience: f64,
    pub default_country_code: String,
    pub fingerprint_policy: FingerprintPolicy,
    pub lexicon_path: Option<PathBuf>,
    pub default_weights: ScoringWeights,
    pub report_retention_hours: i64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            persist_batch_size: 50,
            high_water_mark: 200,
            store_pool_size: 4,
            max_retries: 3,
            retry_delay_seconds: 0.5,
            min_text_length: 50,
            max_years_experience: 50.0,
            default_country_code: "1".to_string(),
            fingerprint_policy: FingerprintPolicy::default(),
            lexicon_path: None,
            default_weights: ScoringWeights::default(),
            report_retention_hours: 24 * 7,
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<(), CoreError> {
        let positive = [
            ("workerCount", self.worker_count),
            ("persistBatchSize", self.persist_batch_size),
            ("highWaterMark", self.high_water_mark),
            ("storePoolSize", self.store_pool_size),
            ("maxRetries", self.max_retries),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(CoreError::Configuration(format!("{name} must be at least 1")));
            }
        }

        if !(self.retry_delay_seconds.is_finite() && self.retry_delay_seconds >= 0.0) {
            return Err(CoreError::Configuration(
                "retryDelaySeconds must be a non-negative number".to_string(),
            ));
        }
        if !(self.max_years_experience.is_finite() && self.max_years_experience > 0.0) {
            return Err(CoreError::Configuration(
                "maxYearsExperience must be positive".to_string(),
            ));
        }
        if self.default_country_code.is_empty()
            || !self.default_country_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(CoreError::Configuration(format!(
                "defaultCountryCode must be numeric, got '{}'",
                self.default_country_code
            )));
        }
        if self.report_retention_hours < 1 {
            return Err(CoreError::Configuration(
                "reportRetentionHours must be at least 1".to_string(),
            ));
        }

        self.default_weights.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn education_rank_orders_degrees() {
        assert!(EducationLevel::Doctorate.rank() > EducationLevel::Master.rank());
        assert!(EducationLevel::Bachelor.rank() > EducationLevel::Associate.rank());
        assert_eq!(EducationLevel::None.rank(), Some(0));
        assert_eq!(EducationLevel::Unknown.rank(), None);
    }

    #[test]
    fn application_follows_lifecycle() {
        let mut application = Application::submit("cand-1", "job-1");
        assert!(application.advance(ApplicationStatus::Interview).is_err());
        application.advance(ApplicationStatus::UnderReview).unwrap();
        application.advance(ApplicationStatus::Screened).unwrap();
        application.advance(ApplicationStatus::Interview).unwrap();
        application.advance(ApplicationStatus::Offer).unwrap();

        let err = application.advance(ApplicationStatus::Rejected).unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidTransition {
                from: "offer".to_string(),
                to: "rejected".to_string()
            }
        );
    }

    #[test]
    fn revise_bumps_version_and_keeps_content() {
        let mut job = JobRequirements::new("job-7");
        job.required_skills.insert("python".to_string());
        let revised = job.revise();
        assert_eq!(revised.version, 2);
        assert_eq!(revised.required_skills, job.required_skills);
        assert_eq!(job.version, 1);
    }

    #[test]
    fn settings_validation_rejects_zero_workers() {
        let settings = PipelineSettings {
            worker_count: 0,
            ..PipelineSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(CoreError::Configuration(_))
        ));
        assert!(PipelineSettings::default().validate().is_ok());
    }

    #[test]
    fn document_format_follows_extension() {
        assert_eq!(DocumentFormat::from_file_name("CV.PDF"), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_file_name("a.docx"), DocumentFormat::Docx);
        assert_eq!(DocumentFormat::from_file_name("notes.txt"), DocumentFormat::Txt);
        assert_eq!(DocumentFormat::from_file_name("scan.tiff"), DocumentFormat::Unknown);
    }
}
