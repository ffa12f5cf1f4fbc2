use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::matching::rank_matches;
use super::models::{ApplicationStatus, JobRequirements, MatchTier, PostingStatus, ScreeningStatus};
use super::store::StoreSnapshot;

/// Demand above this multiple of supply is reported as a skill gap.
const SKILL_GAP_RATIO: f64 = 2.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyticsQuery {
    /// Restrict funnel, screening counts and job scores to one job.
    pub job_id: Option<String>,
    /// Ignore candidates and applications created before this instant.
    pub since: Option<DateTime<Utc>>,
    pub top_skills: usize,
    /// Best-ranked candidates listed per job.
    pub top_candidates: usize,
}

impl Default for AnalyticsQuery {
    fn default() -> Self {
        Self {
            job_id: None,
            since: None,
            top_skills: 10,
            top_candidates: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub candidates: usize,
    pub jobs: usize,
    pub open_jobs: usize,
    pub scores: usize,
    pub decisions: usize,
    pub applications: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrendBucket {
    pub period_start: NaiveDate,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrendSeries {
    pub daily: Vec<TrendBucket>,
    /// Buckets start on Monday.
    pub weekly: Vec<TrendBucket>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkillDemand {
    pub skill: String,
    pub demand: usize,
    pub supply: usize,
    pub gap_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobScoreSummary {
    pub job_id: String,
    pub job_version: u32,
    pub title: String,
    pub candidates_scored: usize,
    pub average_composite: Option<f64>,
    pub max_composite: Option<f64>,
    pub top_candidates: Vec<RankedMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankedMatch {
    /// 1-based position in the ranking.
    pub rank: usize,
    pub candidate_id: String,
    pub candidate_name: String,
    pub composite: f64,
    pub tier: MatchTier,
    pub matched_skills: Vec<String>,
    pub missing_required: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub generated_at: DateTime<Utc>,
    pub totals: Totals,
    pub funnel: BTreeMap<ApplicationStatus, usize>,
    pub screening: BTreeMap<ScreeningStatus, usize>,
    pub candidate_trend: TrendSeries,
    pub application_trend: TrendSeries,
    pub skills_in_demand: Vec<SkillDemand>,
    pub skill_gaps: Vec<String>,
    pub job_scores: Vec<JobScoreSummary>,
}

const ALL_APPLICATION_STATUSES: [ApplicationStatus; 6] = [
    ApplicationStatus::Submitted,
    ApplicationStatus::UnderReview,
    ApplicationStatus::Screened,
    ApplicationStatus::Interview,
    ApplicationStatus::Offer,
    ApplicationStatus::Rejected,
];

const ALL_SCREENING_STATUSES: [ScreeningStatus; 4] = [
    ScreeningStatus::Pending,
    ScreeningStatus::Passed,
    ScreeningStatus::Failed,
    ScreeningStatus::HeldForReview,
];

/// Read-only rollups over a single snapshot; nothing here touches the store.
pub fn aggregate(snapshot: &StoreSnapshot, query: &AnalyticsQuery) -> AnalyticsReport {
    let in_scope_job = |job_id: &str| query.job_id.as_deref().map_or(true, |wanted| wanted == job_id);
    let in_window = |at: &DateTime<Utc>| query.since.map_or(true, |since| *at >= since);

    let latest = snapshot.latest_jobs();
    let open_jobs: Vec<&JobRequirements> = latest
        .values()
        .copied()
        .filter(|job| job.status == PostingStatus::Open)
        .collect();

    let mut funnel: BTreeMap<ApplicationStatus, usize> =
        ALL_APPLICATION_STATUSES.iter().map(|s| (*s, 0)).collect();
    let mut application_dates = Vec::new();
    for application in snapshot
        .applications
        .iter()
        .filter(|a| in_scope_job(&a.job_id) && in_window(&a.submitted_at))
    {
        *funnel.entry(application.status).or_default() += 1;
        application_dates.push(application.submitted_at.date_naive());
    }

    let mut screening: BTreeMap<ScreeningStatus, usize> =
        ALL_SCREENING_STATUSES.iter().map(|s| (*s, 0)).collect();
    for decision in snapshot.decisions.iter().filter(|d| in_scope_job(&d.job_id)) {
        *screening.entry(decision.status).or_default() += 1;
    }

    let candidate_dates: Vec<NaiveDate> = snapshot
        .candidates
        .iter()
        .filter(|c| in_window(&c.source.ingested_at))
        .map(|c| c.source.ingested_at.date_naive())
        .collect();

    let skills_in_demand = skill_demand(snapshot, &open_jobs, query.top_skills);
    let skill_gaps = skills_in_demand
        .iter()
        .filter(|s| s.gap_ratio > SKILL_GAP_RATIO)
        .map(|s| s.skill.clone())
        .collect();

    let job_scores = latest
        .values()
        .filter(|job| in_scope_job(&job.job_id))
        .map(|job| {
            let composites: Vec<f64> = snapshot
                .scores
                .iter()
                .filter(|s| s.job_id == job.job_id && s.job_version == job.version)
                .map(|s| s.composite)
                .collect();
            JobScoreSummary {
                job_id: job.job_id.clone(),
                job_version: job.version,
                title: job.title.clone(),
                candidates_scored: composites.len(),
                average_composite: (!composites.is_empty())
                    .then(|| composites.iter().sum::<f64>() / composites.len() as f64),
                max_composite: composites.iter().copied().reduce(f64::max),
                top_candidates: ranked_matches(snapshot, job, query.top_candidates, 0.0),
            }
        })
        .collect();

    AnalyticsReport {
        generated_at: Utc::now(),
        totals: Totals {
            candidates: snapshot.candidates.len(),
            jobs: latest.len(),
            open_jobs: open_jobs.len(),
            scores: snapshot.scores.len(),
            decisions: snapshot.decisions.len(),
            applications: snapshot.applications.len(),
        },
        funnel,
        screening,
        candidate_trend: trend(&candidate_dates),
        application_trend: trend(&application_dates),
        skills_in_demand,
        skill_gaps,
        job_scores,
    }
}

fn skill_demand(
    snapshot: &StoreSnapshot,
    open_jobs: &[&JobRequirements],
    limit: usize,
) -> Vec<SkillDemand> {
    let mut demand: BTreeMap<&str, usize> = BTreeMap::new();
    for job in open_jobs {
        for skill in &job.required_skills {
            *demand.entry(skill.as_str()).or_default() += 1;
        }
    }

    let wanted: BTreeSet<&str> = demand.keys().copied().collect();
    let mut supply: BTreeMap<&str, usize> = BTreeMap::new();
    for candidate in &snapshot.candidates {
        for skill in &candidate.skills {
            if wanted.contains(skill.as_str()) {
                *supply.entry(skill.as_str()).or_default() += 1;
            }
        }
    }

    let mut rows: Vec<SkillDemand> = demand
        .into_iter()
        .map(|(skill, demand)| {
            let supply = supply.get(skill).copied().unwrap_or(0);
            let ratio = demand as f64 / supply.max(1) as f64;
            SkillDemand {
                skill: skill.to_string(),
                demand,
                supply,
                gap_ratio: (ratio * 100.0).round() / 100.0,
            }
        })
        .collect();
    // BTreeMap order makes the skill name the tie-break.
    rows.sort_by(|a, b| b.demand.cmp(&a.demand));
    rows.truncate(limit);
    rows
}

fn trend(dates: &[NaiveDate]) -> TrendSeries {
    let mut daily: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    let mut weekly: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for date in dates {
        *daily.entry(*date).or_default() += 1;
        let monday = *date - Duration::days(date.weekday().num_days_from_monday() as i64);
        *weekly.entry(monday).or_default() += 1;
    }

    let buckets = |map: BTreeMap<NaiveDate, usize>| -> Vec<TrendBucket> {
        map.into_iter()
            .map(|(period_start, count)| TrendBucket {
                period_start,
                count,
            })
            .collect()
    };
    TrendSeries {
        daily: buckets(daily),
        weekly: buckets(weekly),
    }
}

/// Candidates scored against this exact job version with a composite of at least
/// `min_score`, best first. Equal composites keep a stable candidate-id order.
pub fn ranked_matches(
    snapshot: &StoreSnapshot,
    job: &JobRequirements,
    limit: usize,
    min_score: f64,
) -> Vec<RankedMatch> {
    let names: BTreeMap<&str, &str> = snapshot
        .candidates
        .iter()
        .map(|c| (c.id.as_str(), c.display_name()))
        .collect();
    let scores = snapshot
        .scores
        .iter()
        .filter(|s| s.job_id == job.job_id && s.job_version == job.version)
        .filter(|s| s.composite >= min_score)
        .cloned()
        .collect();

    rank_matches(scores)
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, score)| RankedMatch {
            rank: i + 1,
            candidate_name: names
                .get(score.candidate_id.as_str())
                .map(|name| (*name).to_string())
                .unwrap_or_default(),
            candidate_id: score.candidate_id,
            composite: score.composite,
            tier: score.tier,
            matched_skills: score.matched_skills,
            missing_required: score.missing_required,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::core::models::Application;
    use crate::core::store::tests::{sample_candidate, sample_score};

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn snapshot() -> StoreSnapshot {
        let mut job_v1 = JobRequirements::new("data-eng");
        job_v1.required_skills = BTreeSet::from(["python".to_string(), "sql".to_string()]);
        let mut job_v2 = job_v1.revise();
        job_v2.title = "Data Engineer".to_string();
        job_v2.required_skills.insert("kafka".to_string());
        let mut closed = JobRequirements::new("legacy");
        closed.required_skills = BTreeSet::from(["cobol".to_string()]);
        closed.status = PostingStatus::Closed;

        let mut candidates = Vec::new();
        // 2024-03-04 is a Monday.
        for (id, day) in [("a", 4), ("b", 4), ("c", 6), ("d", 12)] {
            let mut candidate = sample_candidate(id, &format!("fp-{id}"));
            candidate.source.ingested_at = at(2024, 3, day);
            candidates.push(candidate);
        }

        let mut applications = Vec::new();
        for (candidate, status) in [
            ("a", ApplicationStatus::Submitted),
            ("b", ApplicationStatus::Interview),
            ("c", ApplicationStatus::Interview),
        ] {
            let mut application = Application::submit(candidate, "data-eng");
            application.status = status;
            application.submitted_at = at(2024, 3, 7);
            applications.push(application);
        }

        StoreSnapshot {
            candidates,
            scores: vec![
                sample_score("a", "data-eng", 1, 0.9),
                sample_score("a", "data-eng", 2, 0.4),
                sample_score("b", "data-eng", 2, 0.8),
            ],
            decisions: Vec::new(),
            applications,
            jobs: vec![job_v1, job_v2, closed],
        }
    }

    #[test]
    fn funnel_counts_every_status() {
        let report = aggregate(&snapshot(), &AnalyticsQuery::default());
        assert_eq!(report.funnel.len(), 6);
        assert_eq!(report.funnel[&ApplicationStatus::Submitted], 1);
        assert_eq!(report.funnel[&ApplicationStatus::Interview], 2);
        assert_eq!(report.funnel[&ApplicationStatus::Offer], 0);
        assert_eq!(report.screening[&ScreeningStatus::Passed], 0);
    }

    #[test]
    fn trends_bucket_by_day_and_monday_week() {
        let report = aggregate(&snapshot(), &AnalyticsQuery::default());
        let daily: Vec<(u32, usize)> = report
            .candidate_trend
            .daily
            .iter()
            .map(|b| (b.period_start.day(), b.count))
            .collect();
        assert_eq!(daily, vec![(4, 2), (6, 1), (12, 1)]);

        let weekly: Vec<(u32, usize)> = report
            .candidate_trend
            .weekly
            .iter()
            .map(|b| (b.period_start.day(), b.count))
            .collect();
        assert_eq!(weekly, vec![(4, 3), (11, 1)]);
    }

    #[test]
    fn demand_uses_latest_open_jobs_only() {
        let report = aggregate(&snapshot(), &AnalyticsQuery::default());
        let skills: Vec<&str> = report
            .skills_in_demand
            .iter()
            .map(|s| s.skill.as_str())
            .collect();
        assert_eq!(skills, vec!["kafka", "python", "sql"]);

        let python = &report.skills_in_demand[1];
        assert_eq!((python.demand, python.supply), (1, 4));
        assert_eq!(python.gap_ratio, 0.25);
        assert!(report.skill_gaps.is_empty());
        assert_eq!(report.totals.open_jobs, 1);
        assert_eq!(report.totals.jobs, 2);
    }

    #[test]
    fn job_scores_are_against_latest_version() {
        let query = AnalyticsQuery {
            job_id: Some("data-eng".to_string()),
            ..AnalyticsQuery::default()
        };
        let report = aggregate(&snapshot(), &query);
        assert_eq!(report.job_scores.len(), 1);
        let summary = &report.job_scores[0];
        assert_eq!(summary.job_version, 2);
        assert_eq!(summary.candidates_scored, 2);
        assert!((summary.average_composite.unwrap() - 0.6).abs() < 1e-9);
        assert_eq!(summary.max_composite, Some(0.8));
        let ranked: Vec<(usize, &str)> = summary
            .top_candidates
            .iter()
            .map(|m| (m.rank, m.candidate_id.as_str()))
            .collect();
        assert_eq!(ranked, vec![(1, "b"), (2, "a")]);
        assert_eq!(summary.top_candidates[0].candidate_name, "Jane Doe");
    }

    #[test]
    fn ranked_matches_apply_floor_limit_and_tie_break() {
        let mut snapshot = snapshot();
        snapshot.candidates.push(sample_candidate("c2", "fp-c2"));
        snapshot.scores.push(sample_score("c2", "data-eng", 2, 0.8));
        let latest = snapshot.latest_jobs()["data-eng"].clone();

        let ids = |matches: Vec<RankedMatch>| -> Vec<String> {
            matches.into_iter().map(|m| m.candidate_id).collect()
        };
        assert_eq!(ids(ranked_matches(&snapshot, &latest, 10, 0.0)), vec!["b", "c2", "a"]);
        assert_eq!(ids(ranked_matches(&snapshot, &latest, 10, 0.5)), vec!["b", "c2"]);
        assert_eq!(ids(ranked_matches(&snapshot, &latest, 1, 0.0)), vec!["b"]);
    }

    #[test]
    fn since_filters_trends() {
        let query = AnalyticsQuery {
            since: Some(at(2024, 3, 10)),
            ..AnalyticsQuery::default()
        };
        let report = aggregate(&snapshot(), &query);
        assert_eq!(report.candidate_trend.daily.len(), 1);
        assert!(report.application_trend.daily.is_empty());
    }
}
