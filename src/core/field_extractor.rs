use chrono::{DateTime, Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::models::EducationLevel;

static MAILTO_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"mailto:\s*([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})").unwrap(),
        Regex::new(r#"href=["']mailto:([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})["']"#)
            .unwrap(),
    ]
});

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap());
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{2,4}\)|\d{2,4})[\s.-]?\d{3,4}[\s.-]?\d{3,4}")
        .unwrap()
});
static PHONE_CLEAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\-\(\)\.]").unwrap());
static LOCATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z][a-zA-Z]+(?: [A-Z][a-zA-Z]+){0,2}), ([A-Z]{2})\b").unwrap()
});

static YEARS_PHRASE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,3}(?:\.\d+)?)\s*\+?\s*(?:years?|yrs?)(?:\s+of)?(?:\s+(?:professional|industry|relevant|work|hands-on))?\s+experience",
    )
    .unwrap()
});
static DATE_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+)?((?:19|20)\d{2})\s*(?:-|–|—|to)\s*(?:(?:(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+)?((?:19|20)\d{2})|(present|current|now|date))\b",
    )
    .unwrap()
});

static EDUCATION_PATTERNS: Lazy<Vec<(EducationLevel, Regex)>> = Lazy::new(|| {
    vec![
        (
            EducationLevel::Doctorate,
            Regex::new(r"(?i)\b(?:ph\.?\s?d\b|doctorate|doctoral|doctor of)").unwrap(),
        ),
        (
            EducationLevel::Master,
            Regex::new(r"(?i)\b(?:master'?s?\b|m\.\s?s\.|m\.\s?sc\b|msc\b|mba\b|m\.\s?tech\b|m\.\s?eng\b)")
                .unwrap(),
        ),
        (
            EducationLevel::Bachelor,
            Regex::new(
                r"(?i)\b(?:bachelor'?s?\b|b\.\s?s\.|b\.\s?sc\b|bsc\b|b\.\s?a\.|b\.\s?tech\b|btech\b|b\.\s?e\.|undergraduate degree)",
            )
            .unwrap(),
        ),
        (
            EducationLevel::Associate,
            Regex::new(r"(?i)\b(?:associate'?s? degree|associate of|a\.\s?a\.)").unwrap(),
        ),
        (
            EducationLevel::None,
            Regex::new(r"(?i)\b(?:high school|secondary school|ged|diploma)\b").unwrap(),
        ),
    ]
});

const NAME_STOP_WORDS: &[&str] = &[
    "resume",
    "curriculum",
    "vitae",
    "contact",
    "summary",
    "profile",
    "objective",
    "skills",
    "experience",
    "education",
];

pub fn extract_email(text: &str) -> Option<String> {
    for regex in &*MAILTO_REGEXES {
        if let Some(email) = regex.captures(text).and_then(|captures| captures.get(1)) {
            return Some(email.as_str().to_lowercase());
        }
    }

    EMAIL_RE.find(text).map(|m| m.as_str().to_lowercase())
}

/// First separator-tolerant phone match, in E.164 when the number is valid.
///
/// Ten-digit national numbers get `default_country_code` prepended. An unverifiable match is
/// returned as its cleaned digit string.
pub fn normalize_phone(text: &str, default_country_code: &str) -> Option<String> {
    let mut fallback = None;

    for m in PHONE_RE.find_iter(text) {
        let raw = m.as_str();
        let cleaned = PHONE_CLEAN_RE.replace_all(raw, "");
        let digits = cleaned.trim_start_matches('+');
        if !(7..=15).contains(&digits.len()) {
            continue;
        }

        let candidate = if cleaned.starts_with('+') {
            cleaned.to_string()
        } else if digits.len() == 10 {
            format!("+{default_country_code}{digits}")
        } else {
            format!("+{digits}")
        };

        if let Some(normalized) = format_if_valid_phone(&candidate) {
            return Some(normalized);
        }
        if fallback.is_none() {
            fallback = Some(cleaned.to_string());
        }
    }

    fallback
}

pub fn guess_name(contact_block: &str) -> Option<String> {
    for raw in contact_block.lines().take(15) {
        let line = raw.trim().trim_start_matches("Name:").trim();
        if line.is_empty() || line.len() > 50 || line.contains('@') {
            continue;
        }
        if line.chars().any(|c| c.is_ascii_digit()) {
            continue;
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() < 2 || words.len() > 4 {
            continue;
        }

        let lower = line.to_lowercase();
        if NAME_STOP_WORDS.iter().any(|stop| lower.contains(stop)) {
            continue;
        }

        if words.iter().all(|w| {
            w.chars().next().is_some_and(|c| c.is_uppercase())
                && w.chars().all(|c| c.is_alphabetic() || matches!(c, '.' | '-' | '\''))
        }) {
            return Some(line.to_string());
        }
    }

    None
}

pub fn extract_location(text: &str) -> Option<String> {
    LOCATION_RE
        .captures(text)
        .map(|captures| format!("{}, {}", &captures[1], &captures[2]))
}

/// Largest explicit "N years of experience" figure.
pub fn explicit_years(text: &str) -> Option<f64> {
    YEARS_PHRASE_RE
        .captures_iter(text)
        .filter_map(|captures| captures.get(1)?.as_str().parse::<f64>().ok())
        .fold(None, |best: Option<f64>, value| {
            Some(best.map_or(value, |b| b.max(value)))
        })
}

/// Length of the union of all date ranges, in years rounded to one decimal.
///
/// Open ranges ("present", "current") end at `as_of`. Overlapping jobs are only counted once.
pub fn date_range_years(text: &str, as_of: DateTime<Utc>) -> Option<f64> {
    let now_month = as_of.year() * 12 + as_of.month0() as i32;
    let mut spans: Vec<(i32, i32)> = Vec::new();

    for captures in DATE_RANGE_RE.captures_iter(text) {
        let Some(start_year) = captures.get(2).and_then(|m| m.as_str().parse::<i32>().ok())
        else {
            continue;
        };
        let start = start_year * 12 + month_index(captures.get(1).map(|m| m.as_str()));

        let end = if captures.get(5).is_some() {
            now_month
        } else {
            match captures.get(4).and_then(|m| m.as_str().parse::<i32>().ok()) {
                Some(end_year) => end_year * 12 + month_index(captures.get(3).map(|m| m.as_str())),
                None => continue,
            }
        };

        if end > start {
            spans.push((start, end.min(now_month.max(start))));
        }
    }

    if spans.is_empty() {
        return None;
    }

    spans.sort_unstable();
    let mut total_months = 0;
    let (mut current_start, mut current_end) = spans[0];
    for &(start, end) in &spans[1..] {
        if start <= current_end {
            current_end = current_end.max(end);
        } else {
            total_months += current_end - current_start;
            current_start = start;
            current_end = end;
        }
    }
    total_months += current_end - current_start;

    Some((f64::from(total_months) / 12.0 * 10.0).round() / 10.0)
}

fn month_index(month: Option<&str>) -> i32 {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    month
        .map(|m| m.to_ascii_lowercase())
        .and_then(|m| MONTHS.iter().position(|candidate| m.starts_with(candidate)))
        .map(|i| i as i32)
        .unwrap_or(0)
}

pub fn highest_education(text: &str) -> EducationLevel {
    // Patterns are ordered highest first.
    EDUCATION_PATTERNS
        .iter()
        .find(|(_, regex)| regex.is_match(text))
        .map(|(level, _)| *level)
        .unwrap_or(EducationLevel::Unknown)
}

pub struct ConfidenceInputs<'a> {
    pub name: Option<&'a str>,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub has_skills: bool,
    pub has_experience: bool,
    pub has_education: bool,
}

pub fn score_confidence(inputs: &ConfidenceInputs<'_>) -> f64 {
    let present = |value: Option<&str>| value.is_some_and(|v| !v.trim().is_empty());
    let mut score: f64 = 0.0;

    if present(inputs.email) {
        score += 0.3;
    }
    if present(inputs.phone) {
        score += 0.2;
    }
    if present(inputs.name) {
        score += 0.15;
    }
    if inputs.has_skills {
        score += 0.2;
    }
    if inputs.has_experience {
        score += 0.1;
    }
    if inputs.has_education {
        score += 0.05;
    }

    score.min(1.0)
}

fn format_if_valid_phone(input: &str) -> Option<String> {
    let parsed = phonenumber::parse(None, input).ok()?;
    if !phonenumber::is_valid(&parsed) {
        return None;
    }

    Some(parsed.format().mode(phonenumber::Mode::E164).to_string())
}
