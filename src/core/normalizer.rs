use serde::{Deserialize, Serialize};

use super::models::DocumentFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Contact,
    Skills,
    Experience,
    Education,
    Other,
}

/// Header keywords per section, matched case-insensitively against whole lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SectionLexicon {
    pub contact: Vec<String>,
    pub skills: Vec<String>,
    pub experience: Vec<String>,
    pub education: Vec<String>,
    pub other: Vec<String>,
}

impl Default for SectionLexicon {
    fn default() -> Self {
        fn owned(words: &[&str]) -> Vec<String> {
            words.iter().map(|w| (*w).to_string()).collect()
        }

        Self {
            contact: owned(&[
                "contact",
                "contact information",
                "personal details",
                "summary",
                "professional summary",
                "profile",
                "objective",
            ]),
            skills: owned(&[
                "skills",
                "technical skills",
                "key skills",
                "skills summary",
                "core competencies",
                "technologies",
                "tools",
            ]),
            experience: owned(&[
                "experience",
                "work experience",
                "professional experience",
                "relevant experience",
                "work history",
                "employment",
                "employment history",
            ]),
            education: owned(&[
                "education",
                "education and training",
                "academic background",
                "qualifications",
            ]),
            other: owned(&[
                "projects",
                "certifications",
                "awards",
                "achievements",
                "publications",
                "references",
                "interests",
                "languages",
            ]),
        }
    }
}

impl SectionLexicon {
    /// A header is a whole keyword, optionally followed by `:` and inline content that
    /// belongs to the new section.
    fn classify<'a>(&self, line: &'a str) -> Option<(Section, Option<&'a str>)> {
        let (head, inline) = match line.split_once(':') {
            Some((head, rest)) => (head, Some(rest.trim()).filter(|rest| !rest.is_empty())),
            None => (line, None),
        };
        if head.chars().any(|c| c.is_ascii_digit()) || head.split_whitespace().count() > 5 {
            return None;
        }

        let key = head
            .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
            .to_lowercase();
        if key.is_empty() {
            return None;
        }

        let groups = [
            (&self.contact, Section::Contact),
            (&self.skills, Section::Skills),
            (&self.experience, Section::Experience),
            (&self.education, Section::Education),
            (&self.other, Section::Other),
        ];
        groups
            .into_iter()
            .find(|(keywords, _)| keywords.iter().any(|keyword| keyword.to_lowercase() == key))
            .map(|(_, section)| (section, inline))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedResume {
    pub contact: Option<String>,
    pub skills: Option<String>,
    pub experience: Option<String>,
    pub education: Option<String>,
    pub full_text: String,
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub struct ResumeNormalizer {
    headers: SectionLexicon,
    min_text_length: usize,
}

impl ResumeNormalizer {
    pub fn new(headers: SectionLexicon, min_text_length: usize) -> Self {
        Self {
            headers,
            min_text_length,
        }
    }

    pub fn normalize(&self, text: &str, format: DocumentFormat) -> NormalizedResume {
        let full_text = clean_text(text);
        if full_text.chars().count() < self.min_text_length {
            tracing::debug!(
                ?format,
                chars = full_text.chars().count(),
                "resume text below minimum length; marking degraded"
            );
            return NormalizedResume {
                full_text,
                degraded: true,
                ..NormalizedResume::default()
            };
        }

        let mut result = NormalizedResume {
            full_text: full_text.clone(),
            ..NormalizedResume::default()
        };
        let mut current = Section::Contact;

        for line in full_text.lines() {
            let line = match self.headers.classify(line) {
                Some((section, inline)) => {
                    current = section;
                    match inline {
                        Some(rest) => rest,
                        None => continue,
                    }
                }
                None => line,
            };
            if line.is_empty() {
                continue;
            }

            let slot = match current {
                Section::Contact => &mut result.contact,
                Section::Skills => &mut result.skills,
                Section::Experience => &mut result.experience,
                Section::Education => &mut result.education,
                Section::Other => continue,
            };
            match slot {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(line);
                }
                None => *slot = Some(line.to_string()),
            }
        }

        result
    }
}

/// Collapse whitespace and strip control characters while keeping line structure.
pub fn clean_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = Vec::new();
    let mut previous_blank = true;

    for raw_line in unified.split('\n') {
        let visible: String = raw_line
            .chars()
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect();
        let line = visible.split_whitespace().collect::<Vec<_>>().join(" ");

        if line.is_empty() {
            if !previous_blank {
                lines.push(String::new());
            }
            previous_blank = true;
        } else {
            lines.push(line);
            previous_blank = false;
        }
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESUME: &str = "Jane Doe\njane@example.com | (650) 253-0000\n\nTECHNICAL SKILLS:\nPython, SQL, Docker\n\nWork Experience\nData Engineer, Acme  Corp\nJan 2019 - Present\n\nProjects\nSide project in Rust\n\nEducation\nB.S. Computer Science, 2018\n";

    fn normalizer() -> ResumeNormalizer {
        ResumeNormalizer::new(SectionLexicon::default(), 50)
    }

    #[test]
    fn segments_resume_by_headers() {
        let normalized = normalizer().normalize(RESUME, DocumentFormat::Txt);

        assert!(!normalized.degraded);
        assert_eq!(
            normalized.contact.as_deref(),
            Some("Jane Doe\njane@example.com | (650) 253-0000")
        );
        assert_eq!(normalized.skills.as_deref(), Some("Python, SQL, Docker"));
        assert_eq!(
            normalized.experience.as_deref(),
            Some("Data Engineer, Acme Corp\nJan 2019 - Present")
        );
        assert_eq!(
            normalized.education.as_deref(),
            Some("B.S. Computer Science, 2018")
        );
        assert!(normalized.full_text.contains("Side project in Rust"));
    }

    #[test]
    fn lines_with_digits_are_not_headers() {
        let text = "Summary\n5 years experience building data pipelines for analytics teams and more\n";
        let normalized = normalizer().normalize(text, DocumentFormat::Txt);
        assert!(normalized.experience.is_none());
        assert!(normalized
            .contact
            .as_deref()
            .unwrap_or_default()
            .contains("5 years experience"));
    }

    #[test]
    fn inline_header_content_is_kept() {
        let text = "Jane Doe\njane@example.com\nSkills: Python, SQL\nExperience\nData Engineer at Acme\nTechnologies used: Rust, Kafka\nJan 2019 - Present\nEducation: B.S. Computer Science, 2018\n";
        let normalized = normalizer().normalize(text, DocumentFormat::Txt);

        assert_eq!(normalized.skills.as_deref(), Some("Python, SQL"));
        assert_eq!(
            normalized.experience.as_deref(),
            Some("Data Engineer at Acme\nTechnologies used: Rust, Kafka\nJan 2019 - Present")
        );
        assert_eq!(
            normalized.education.as_deref(),
            Some("B.S. Computer Science, 2018")
        );
    }

    #[test]
    fn short_text_is_degraded_not_failed() {
        let normalized = normalizer().normalize("  Jane\u{0}  Doe \r\n", DocumentFormat::Pdf);
        assert_eq!(
            normalized,
            NormalizedResume {
                full_text: "Jane Doe".to_string(),
                degraded: true,
                ..NormalizedResume::default()
            }
        );
    }

    #[test]
    fn clean_text_collapses_unicode_whitespace_and_blank_runs() {
        let cleaned = clean_text("a\u{00A0}\u{2003}b\n\n\n\nc\u{FFFD}d\t\te\n\n");
        assert_eq!(cleaned, "a b\n\nc\u{FFFD}d e");
    }
}
