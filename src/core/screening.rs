use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::errors::CoreError;
use super::lexicon::SkillLexicon;
use super::matching::locations_overlap;
use super::models::{
    Candidate, EducationLevel, JobRequirements, MatchScore, ScreeningDecision, ScreeningStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScreeningCriteria {
    pub pass_threshold: f64,
    /// Width of the hold-for-review band directly below `pass_threshold`.
    pub ambiguity_band: f64,
    pub mandatory_skills: BTreeSet<String>,
    pub all_required_mandatory: bool,
    pub education_floor: Option<EducationLevel>,
    pub require_location_match: bool,
}

impl Default for ScreeningCriteria {
    fn default() -> Self {
        Self {
            pass_threshold: 0.75,
            ambiguity_band: 0.10,
            mandatory_skills: BTreeSet::new(),
            all_required_mandatory: false,
            education_floor: None,
            require_location_match: false,
        }
    }
}

impl ScreeningCriteria {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(self.pass_threshold.is_finite() && (0.0..=1.0).contains(&self.pass_threshold)) {
            return Err(CoreError::Configuration(format!(
                "pass threshold must be within [0, 1], got {}",
                self.pass_threshold
            )));
        }
        if !(self.ambiguity_band.is_finite()
            && self.ambiguity_band >= 0.0
            && self.ambiguity_band <= self.pass_threshold)
        {
            return Err(CoreError::Configuration(format!(
                "ambiguity band must be within [0, {}], got {}",
                self.pass_threshold, self.ambiguity_band
            )));
        }
        if self.education_floor == Some(EducationLevel::Unknown) {
            return Err(CoreError::Configuration(
                "education floor cannot be 'unknown'".to_string(),
            ));
        }
        Ok(())
    }
}

/// Rules in evaluation order. Hard disqualifiers are all checked; the rest stop at the first hit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningRule {
    MissingMandatorySkill,
    BelowEducationFloor,
    LocationMismatch,
    PassThreshold,
    AmbiguityBand,
    Fallthrough,
}

impl ScreeningRule {
    pub const ORDER: [ScreeningRule; 6] = [
        ScreeningRule::MissingMandatorySkill,
        ScreeningRule::BelowEducationFloor,
        ScreeningRule::LocationMismatch,
        ScreeningRule::PassThreshold,
        ScreeningRule::AmbiguityBand,
        ScreeningRule::Fallthrough,
    ];

    pub fn is_hard_disqualifier(self) -> bool {
        matches!(
            self,
            ScreeningRule::MissingMandatorySkill
                | ScreeningRule::BelowEducationFloor
                | ScreeningRule::LocationMismatch
        )
    }

    pub fn outcome(self) -> ScreeningStatus {
        match self {
            ScreeningRule::PassThreshold => ScreeningStatus::Passed,
            ScreeningRule::AmbiguityBand => ScreeningStatus::HeldForReview,
            _ => ScreeningStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleHit {
    pub rule: ScreeningRule,
    pub detail: String,
}

/// One (candidate, job) pair submitted for bulk screening.
#[derive(Debug, Clone)]
pub struct ScreeningPair {
    pub candidate: Candidate,
    pub score: MatchScore,
    pub existing: Option<ScreeningDecision>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PairOutcome {
    Decided {
        decision: ScreeningDecision,
    },
    Error {
        candidate_id: String,
        job_id: String,
        reason: String,
    },
}

pub struct ScreeningEngine {
    criteria: ScreeningCriteria,
    mandatory: BTreeSet<String>,
    lexicon: Arc<SkillLexicon>,
}

impl ScreeningEngine {
    pub fn new(criteria: ScreeningCriteria, lexicon: Arc<SkillLexicon>) -> Result<Self, CoreError> {
        criteria.validate()?;
        let mandatory = lexicon.normalize_set(&criteria.mandatory_skills);
        Ok(Self {
            criteria,
            mandatory,
            lexicon,
        })
    }

    fn check(
        &self,
        rule: ScreeningRule,
        candidate: &Candidate,
        job: &JobRequirements,
        score: &MatchScore,
    ) -> Option<String> {
        let criteria = &self.criteria;
        match rule {
            ScreeningRule::MissingMandatorySkill => {
                let mut mandatory = self.mandatory.clone();
                if criteria.all_required_mandatory {
                    mandatory.extend(self.lexicon.normalize_set(&job.required_skills));
                }
                let missing: Vec<&str> = mandatory
                    .iter()
                    .filter(|skill| !candidate.skills.contains(*skill))
                    .map(String::as_str)
                    .collect();
                (!missing.is_empty())
                    .then(|| format!("missing mandatory skills: {}", missing.join(", ")))
            }
            ScreeningRule::BelowEducationFloor => {
                let floor = criteria.education_floor?;
                // Unknown education never triggers the floor.
                let candidate_rank = candidate.education.rank()?;
                (candidate_rank < floor.rank()?).then(|| {
                    format!(
                        "education {} below floor {}",
                        candidate.education.as_str(),
                        floor.as_str()
                    )
                })
            }
            ScreeningRule::LocationMismatch => {
                if !criteria.require_location_match || job.location.remote_ok {
                    return None;
                }
                let job_location = job.location.location.as_deref()?;
                let candidate_location = candidate.contact.location.as_deref()?;
                (!locations_overlap(job_location, candidate_location)).then(|| {
                    format!("candidate in {candidate_location}, job in {job_location}")
                })
            }
            ScreeningRule::PassThreshold => (score.composite >= criteria.pass_threshold)
                .then(|| {
                    format!(
                        "composite {:.3} >= threshold {:.3}",
                        score.composite, criteria.pass_threshold
                    )
                }),
            ScreeningRule::AmbiguityBand => {
                let lower = criteria.pass_threshold - criteria.ambiguity_band;
                (criteria.ambiguity_band > 0.0
                    && score.composite >= lower
                    && score.composite < criteria.pass_threshold)
                    .then(|| {
                        format!(
                            "composite {:.3} within review band [{lower:.3}, {:.3})",
                            score.composite, criteria.pass_threshold
                        )
                    })
            }
            ScreeningRule::Fallthrough => Some(format!(
                "composite {:.3} below review band",
                score.composite
            )),
        }
    }

    pub fn evaluate(
        &self,
        candidate: &Candidate,
        job: &JobRequirements,
        score: &MatchScore,
    ) -> Result<ScreeningDecision, CoreError> {
        if score.candidate_id != candidate.id
            || score.job_id != job.job_id
            || score.job_version != job.version
        {
            return Err(CoreError::InvalidRequest(format!(
                "score for {}/{}@{} does not belong to {}/{}@{}",
                score.candidate_id,
                score.job_id,
                score.job_version,
                candidate.id,
                job.job_id,
                job.version
            )));
        }

        let mut hits = Vec::new();
        for rule in ScreeningRule::ORDER
            .into_iter()
            .filter(|rule| rule.is_hard_disqualifier())
        {
            if let Some(detail) = self.check(rule, candidate, job, score) {
                hits.push(RuleHit { rule, detail });
            }
        }

        let status = if hits.is_empty() {
            let decided = ScreeningRule::ORDER
                .into_iter()
                .filter(|rule| !rule.is_hard_disqualifier())
                .find_map(|rule| {
                    self.check(rule, candidate, job, score)
                        .map(|detail| RuleHit { rule, detail })
                });
            match decided {
                Some(hit) => {
                    let status = hit.rule.outcome();
                    hits.push(hit);
                    status
                }
                None => ScreeningStatus::Failed,
            }
        } else {
            ScreeningStatus::Failed
        };

        Ok(ScreeningDecision {
            candidate_id: candidate.id.clone(),
            job_id: job.job_id.clone(),
            job_version: job.version,
            status,
            rules: hits,
            score: score.clone(),
            decided_at: Utc::now(),
            overridden_by: None,
        })
    }

    /// Evaluate every pair independently; one bad pair never blocks the others.
    pub fn run_bulk(&self, job: &JobRequirements, pairs: Vec<ScreeningPair>) -> Vec<PairOutcome> {
        pairs
            .into_iter()
            .map(|pair| {
                let result = match pair.existing.as_ref() {
                    Some(existing)
                        if existing.job_version == job.version
                            && existing.status != ScreeningStatus::Pending =>
                    {
                        Err(CoreError::InvalidTransition {
                            from: existing.status.as_str().to_string(),
                            to: "rescreen".to_string(),
                        })
                    }
                    _ => self.evaluate(&pair.candidate, job, &pair.score),
                };

                match result {
                    Ok(decision) => PairOutcome::Decided { decision },
                    Err(err) => {
                        tracing::debug!(
                            candidate_id = %pair.candidate.id,
                            job_id = %job.job_id,
                            error = %err,
                            "screening pair rejected"
                        );
                        PairOutcome::Error {
                            candidate_id: pair.candidate.id.clone(),
                            job_id: job.job_id.clone(),
                            reason: err.to_string(),
                        }
                    }
                }
            })
            .collect()
    }
}

/// Move a held decision to a final status on behalf of `actor`.
pub fn apply_override(
    decision: &mut ScreeningDecision,
    status: ScreeningStatus,
    actor: &str,
) -> Result<(), CoreError> {
    if decision.status != ScreeningStatus::HeldForReview || !status.is_terminal() {
        return Err(CoreError::InvalidTransition {
            from: decision.status.as_str().to_string(),
            to: status.as_str().to_string(),
        });
    }
    if actor.trim().is_empty() {
        return Err(CoreError::InvalidRequest(
            "override requires an actor".to_string(),
        ));
    }

    decision.status = status;
    decision.overridden_by = Some(actor.trim().to_string());
    decision.decided_at = Utc::now();
    Ok(())
}
