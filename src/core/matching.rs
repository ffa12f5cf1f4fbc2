use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::errors::CoreError;
use super::lexicon::SkillLexicon;
use super::models::{
    Candidate, EducationLevel, JobRequirements, MatchScore, MatchTier, SubScores,
};
use super::similarity::SemanticSimilarity;
use super::weights::ScoringWeights;

const REQUIRED_SKILL_WEIGHT: f64 = 1.0;
const PREFERRED_SKILL_WEIGHT: f64 = 0.5;
const UNKNOWN_EDUCATION_CREDIT: f64 = 0.5;

/// Scores candidates against a job version. Pure: no clocks, no randomness, no I/O.
pub struct MatchingEngine {
    lexicon: Arc<SkillLexicon>,
    similarity: Arc<dyn SemanticSimilarity>,
    default_weights: ScoringWeights,
}

struct SkillBreakdown {
    coverage: f64,
    matched: Vec<String>,
    missing_required: Vec<String>,
}

impl MatchingEngine {
    pub fn new(
        lexicon: Arc<SkillLexicon>,
        similarity: Arc<dyn SemanticSimilarity>,
        default_weights: ScoringWeights,
    ) -> Result<Self, CoreError> {
        default_weights.validate()?;
        Ok(Self {
            lexicon,
            similarity,
            default_weights,
        })
    }

    pub fn lexicon(&self) -> &Arc<SkillLexicon> {
        &self.lexicon
    }

    pub fn weights_for(&self, job: &JobRequirements) -> ScoringWeights {
        job.weights.unwrap_or(self.default_weights)
    }

    /// Reject a job whose configuration would make scoring meaningless.
    pub fn validate_job(&self, job: &JobRequirements) -> Result<(), CoreError> {
        if job.job_id.trim().is_empty() {
            return Err(CoreError::Configuration("job id must not be empty".to_string()));
        }
        if job.version == 0 {
            return Err(CoreError::Configuration(format!(
                "job {} has version 0; versions start at 1",
                job.job_id
            )));
        }
        if let Some(years) = job.min_years_experience {
            if !years.is_finite() || years < 0.0 {
                return Err(CoreError::Configuration(format!(
                    "job {} has invalid minimum experience {years}",
                    job.job_id
                )));
            }
        }
        if let Some(weights) = job.weights {
            weights.validate().map_err(|err| match err {
                CoreError::Configuration(message) => {
                    CoreError::Configuration(format!("job {}: {message}", job.job_id))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    pub fn score(
        &self,
        candidate: &Candidate,
        job: &JobRequirements,
    ) -> Result<MatchScore, CoreError> {
        self.validate_job(job)?;
        let weights = self.weights_for(job);

        let skills = self.skill_breakdown(&candidate.skills, job);
        let sub_scores = SubScores {
            skill_coverage: skills.coverage,
            experience_fit: experience_fit(candidate.years_experience, job.min_years_experience),
            education_fit: education_fit(candidate.education, job.min_education),
            semantic_similarity: self
                .similarity
                .similarity(&candidate.raw_text, &job_text(job))
                .clamp(0.0, 1.0),
        };

        let composite = (weights.skill_coverage * sub_scores.skill_coverage
            + weights.experience_fit * sub_scores.experience_fit
            + weights.education_fit * sub_scores.education_fit
            + weights.semantic_similarity * sub_scores.semantic_similarity)
            .clamp(0.0, 1.0);

        let (reasons, concerns) = rationale(candidate, job, &sub_scores, &skills);

        Ok(MatchScore {
            candidate_id: candidate.id.clone(),
            job_id: job.job_id.clone(),
            job_version: job.version,
            composite,
            sub_scores,
            weights,
            matched_skills: skills.matched,
            missing_required: skills.missing_required,
            tier: MatchTier::from_composite(composite),
            reasons,
            concerns,
        })
    }

    fn skill_breakdown(
        &self,
        candidate_skills: &BTreeSet<String>,
        job: &JobRequirements,
    ) -> SkillBreakdown {
        let required = self.lexicon.normalize_set(&job.required_skills);
        let preferred: BTreeSet<String> = self
            .lexicon
            .normalize_set(&job.preferred_skills)
            .difference(&required)
            .cloned()
            .collect();

        let mass = required.len() as f64 * REQUIRED_SKILL_WEIGHT
            + preferred.len() as f64 * PREFERRED_SKILL_WEIGHT;

        let matched_required: Vec<String> =
            required.intersection(candidate_skills).cloned().collect();
        let matched_preferred: Vec<String> =
            preferred.intersection(candidate_skills).cloned().collect();
        let missing_required: Vec<String> =
            required.difference(candidate_skills).cloned().collect();

        let coverage = if mass == 0.0 {
            1.0
        } else {
            (matched_required.len() as f64 * REQUIRED_SKILL_WEIGHT
                + matched_preferred.len() as f64 * PREFERRED_SKILL_WEIGHT)
                / mass
        };

        let mut matched = matched_required;
        matched.extend(matched_preferred);

        SkillBreakdown {
            coverage: coverage.clamp(0.0, 1.0),
            matched,
            missing_required,
        }
    }
}

pub fn experience_fit(candidate_years: Option<f64>, min_years: Option<f64>) -> f64 {
    match min_years {
        Some(min) if min > 0.0 => (candidate_years.unwrap_or(0.0).max(0.0) / min).min(1.0),
        _ => 1.0,
    }
}

pub fn education_fit(candidate: EducationLevel, minimum: Option<EducationLevel>) -> f64 {
    let Some(required_rank) = minimum.and_then(EducationLevel::rank) else {
        return 1.0;
    };
    let Some(candidate_rank) = candidate.rank() else {
        return UNKNOWN_EDUCATION_CREDIT;
    };

    match required_rank.saturating_sub(candidate_rank) {
        0 => 1.0,
        1 => 0.5,
        _ => 0.0,
    }
}

/// True when the two free-form locations share a comma separated component.
pub fn locations_overlap(left: &str, right: &str) -> bool {
    let parts = |value: &str| -> BTreeSet<String> {
        value
            .split(',')
            .map(|part| part.trim().to_lowercase())
            .filter(|part| !part.is_empty())
            .collect()
    };
    !parts(left).is_disjoint(&parts(right))
}

fn job_text(job: &JobRequirements) -> String {
    format!("{}\n{}", job.title, job.description)
}

fn rationale(
    candidate: &Candidate,
    job: &JobRequirements,
    sub_scores: &SubScores,
    skills: &SkillBreakdown,
) -> (Vec<String>, Vec<String>) {
    let mut reasons = Vec::new();
    let mut concerns = Vec::new();

    if sub_scores.skill_coverage >= 0.8 {
        reasons.push("Strong skill alignment".to_string());
    } else if sub_scores.skill_coverage >= 0.5 {
        reasons.push("Good skill match with some gaps".to_string());
    } else {
        concerns.push("Significant skill gaps identified".to_string());
    }

    match skills.missing_required.len() {
        0 => {}
        1 => concerns.push(format!(
            "Missing required skill: {}",
            skills.missing_required[0]
        )),
        2..=3 => concerns.push(format!(
            "Missing skills: {}",
            skills.missing_required.join(", ")
        )),
        n => concerns.push(format!("Missing {n} required skills")),
    }

    if let Some(min) = job.min_years_experience.filter(|min| *min > 0.0) {
        match candidate.years_experience {
            Some(years) if years >= min => {
                reasons.push(format!("Meets experience requirement ({years} years)"))
            }
            Some(years) => concerns.push(format!(
                "Below minimum experience requirement ({years} of {min} years)"
            )),
            None => concerns.push("Experience could not be determined".to_string()),
        }
    }

    if job.min_education.and_then(EducationLevel::rank).is_some() {
        if candidate.education == EducationLevel::Unknown {
            concerns.push("Education could not be determined".to_string());
        } else if sub_scores.education_fit >= 1.0 {
            reasons.push("Meets education requirement".to_string());
        } else {
            concerns.push("Below minimum education requirement".to_string());
        }
    }

    if sub_scores.semantic_similarity >= 0.3 {
        reasons.push("Profile closely matches the job description".to_string());
    }

    if let (Some(job_location), Some(candidate_location)) = (
        job.location.location.as_deref(),
        candidate.contact.location.as_deref(),
    ) {
        if !job.location.remote_ok && !locations_overlap(job_location, candidate_location) {
            concerns.push("Location mismatch - may require relocation".to_string());
        }
    }

    (reasons, concerns)
}

/// Order by composite descending, then candidate id so equal scores rank the same way every run.
pub fn rank_matches(mut scores: Vec<MatchScore>) -> Vec<MatchScore> {
    scores.sort_by(|a, b| {
        match b
            .composite
            .partial_cmp(&a.composite)
            .unwrap_or(Ordering::Equal)
        {
            Ordering::Equal => a.candidate_id.cmp(&b.candidate_id),
            other => other,
        }
    });
    scores
}
