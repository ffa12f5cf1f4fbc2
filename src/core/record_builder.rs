use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::CoreError;
use super::field_extractor::{
    date_range_years, explicit_years, extract_email, extract_location, guess_name,
    highest_education, normalize_phone, score_confidence, ConfidenceInputs,
};
use super::fingerprint::{compute_fingerprint, FingerprintPolicy};
use super::lexicon::SkillLexicon;
use super::models::{Candidate, ContactInfo, EducationLevel, PipelineSettings, SourceMetadata};
use super::normalizer::NormalizedResume;

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltRecord {
    pub candidate: Candidate,
    /// Non-fatal gaps worth surfacing next to a successful ingestion.
    pub issues: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CandidateRecordBuilder {
    default_country_code: String,
    max_years_experience: f64,
    fingerprint_policy: FingerprintPolicy,
}

impl CandidateRecordBuilder {
    pub fn new(settings: &PipelineSettings) -> Self {
        Self {
            default_country_code: settings.default_country_code.clone(),
            max_years_experience: settings.max_years_experience,
            fingerprint_policy: settings.fingerprint_policy,
        }
    }

    pub fn build(
        &self,
        normalized: &NormalizedResume,
        lexicon: &SkillLexicon,
        source: SourceMetadata,
    ) -> Result<BuiltRecord, CoreError> {
        if normalized.full_text.trim().is_empty() {
            return Err(CoreError::Parse(format!(
                "{} contains no usable text",
                source.file_name
            )));
        }

        let full_text = normalized.full_text.as_str();
        let head: String = full_text.lines().take(15).collect::<Vec<_>>().join("\n");
        let contact_block = normalized.contact.as_deref().unwrap_or(head.as_str());
        let mut issues = Vec::new();

        let contact = ContactInfo {
            name: guess_name(contact_block),
            email: extract_email(contact_block).or_else(|| extract_email(full_text)),
            phone: normalize_phone(contact_block, &self.default_country_code)
                .or_else(|| normalize_phone(full_text, &self.default_country_code)),
            location: extract_location(contact_block),
        };

        let mut skills = normalized
            .skills
            .as_deref()
            .map(|segment| lexicon.find_in_text(segment))
            .unwrap_or_default();
        if skills.is_empty() {
            skills = lexicon.find_in_text(full_text);
        }

        let years_experience = self.estimate_years(normalized, source.ingested_at, &mut issues);

        let education = normalized
            .education
            .as_deref()
            .map(highest_education)
            .filter(|level| *level != EducationLevel::Unknown)
            .unwrap_or_else(|| highest_education(full_text));

        let confidence = score_confidence(&ConfidenceInputs {
            name: contact.name.as_deref(),
            email: contact.email.as_deref(),
            phone: contact.phone.as_deref(),
            has_skills: !skills.is_empty(),
            has_experience: years_experience.is_some(),
            has_education: education != EducationLevel::Unknown,
        });

        if contact.email.is_none() {
            issues.push("missing email".to_string());
        }
        if contact.name.is_none() {
            issues.push("missing name".to_string());
        }
        if skills.is_empty() {
            issues.push("no skills recognised".to_string());
        }
        if normalized.degraded {
            issues.push("text too short to segment".to_string());
        }

        let fingerprint =
            compute_fingerprint(self.fingerprint_policy, &contact, &skills, full_text);

        Ok(BuiltRecord {
            candidate: Candidate {
                id: Uuid::new_v4().to_string(),
                contact,
                skills,
                years_experience,
                education,
                raw_text: full_text.to_string(),
                source,
                fingerprint,
                degraded: normalized.degraded,
                confidence,
            },
            issues,
        })
    }

    fn estimate_years(
        &self,
        normalized: &NormalizedResume,
        as_of: DateTime<Utc>,
        issues: &mut Vec<String>,
    ) -> Option<f64> {
        // Date ranges only count inside the experience segment; education years are not work.
        let estimates = [
            explicit_years(&normalized.full_text),
            normalized
                .experience
                .as_deref()
                .and_then(|segment| date_range_years(segment, as_of)),
        ];

        let mut best: Option<f64> = None;
        for estimate in estimates.into_iter().flatten() {
            if estimate > self.max_years_experience {
                issues.push(format!(
                    "discarded implausible experience estimate of {estimate} years"
                ));
                continue;
            }
            best = Some(best.map_or(estimate, |b| b.max(estimate)));
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::core::models::DocumentFormat;
    use crate::core::normalizer::{ResumeNormalizer, SectionLexicon};

    const RESUME: &str = "Jane Doe\njane@example.com | (650) 253-0000 | Austin, TX\n\nSkills\nPython, SQL, Docker, JS\n\nExperience\nData Engineer at Acme, Jan 2019 - Present\nAnalyst at Globex, 2016 - 2018\n\nEducation\nM.S. Computer Science\n";

    fn source(as_of: DateTime<Utc>) -> SourceMetadata {
        SourceMetadata {
            file_name: "jane.txt".to_string(),
            byte_len: RESUME.len(),
            format: DocumentFormat::Txt,
            ingested_at: as_of,
        }
    }

    fn build(text: &str) -> Result<BuiltRecord, CoreError> {
        let as_of = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let normalized =
            ResumeNormalizer::new(SectionLexicon::default(), 50).normalize(text, DocumentFormat::Txt);
        CandidateRecordBuilder::new(&PipelineSettings::default()).build(
            &normalized,
            &SkillLexicon::builtin(),
            source(as_of),
        )
    }

    #[test]
    fn builds_canonical_candidate() {
        let record = build(RESUME).unwrap();
        let candidate = &record.candidate;

        assert_eq!(candidate.contact.name.as_deref(), Some("Jane Doe"));
        assert_eq!(candidate.contact.email.as_deref(), Some("jane@example.com"));
        assert_eq!(candidate.contact.phone.as_deref(), Some("+16502530000"));
        assert_eq!(candidate.contact.location.as_deref(), Some("Austin, TX"));
        assert_eq!(
            candidate.skills.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["docker", "javascript", "python", "sql"]
        );
        // Jan 2019 to Jan 2024 plus 2016 to 2018.
        assert_eq!(candidate.years_experience, Some(7.0));
        assert_eq!(candidate.education, EducationLevel::Master);
        assert!(record.issues.is_empty());
        assert!((candidate.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn same_text_yields_same_fingerprint_but_new_id() {
        let a = build(RESUME).unwrap().candidate;
        let b = build(RESUME).unwrap().candidate;
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn implausible_years_are_discarded() {
        let text = "Jane Doe\nI have 120 years of experience writing software for many companies.";
        let record = build(text).unwrap();
        assert_eq!(record.candidate.years_experience, None);
        assert!(record
            .issues
            .iter()
            .any(|issue| issue.contains("implausible")));
    }

    #[test]
    fn education_dates_do_not_count_as_experience() {
        let text = "Jane Doe\njane@example.com\n\nSkills\nPython, SQL\n\nEducation\nB.S. Computer Science, State University 2014 - 2018\n";
        let record = build(text).unwrap();
        assert_eq!(record.candidate.years_experience, None);
        assert_eq!(record.candidate.education, EducationLevel::Bachelor);
    }

    #[test]
    fn explicit_years_are_read_outside_the_experience_segment() {
        let text = "Jane Doe\njane@example.com\nBackend engineer with 6 years of experience in Python.\n\nEducation\nB.S. Computer Science, 2010 - 2014\n";
        let record = build(text).unwrap();
        assert_eq!(record.candidate.years_experience, Some(6.0));
    }

    #[test]
    fn partial_extraction_still_builds() {
        let record = build("just a few words").unwrap();
        assert!(record.candidate.degraded);
        assert!(record.candidate.contact.email.is_none());
        assert!(record.issues.contains(&"missing email".to_string()));
    }

    #[test]
    fn empty_text_is_a_parse_error() {
        assert!(matches!(build(" \n\t "), Err(CoreError::Parse(_))));
    }
}
