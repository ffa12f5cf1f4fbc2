use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::errors::CoreError;

/// Built-in skill table: canonical name followed by every alias that folds into it.
///
/// Bare English words that double as skill names ("go", "spring", "express", "rest")
/// are only listed in their unambiguous long forms.
const BUILTIN_SKILLS: &[(&str, &[&str])] = &[
    ("javascript", &["javascript", "js", "ecmascript", "es6"]),
    ("typescript", &["typescript", "ts"]),
    ("nodejs", &["nodejs", "node.js", "node js"]),
    ("react", &["react", "reactjs", "react.js", "react native"]),
    ("angular", &["angular", "angularjs", "angular.js"]),
    ("vue", &["vue", "vuejs", "vue.js"]),
    ("html", &["html", "html5"]),
    ("css", &["css", "css3", "sass", "scss", "tailwind", "bootstrap"]),
    ("python", &["python", "python3", "python 3"]),
    ("java", &["java", "openjdk"]),
    ("csharp", &["c#", "csharp", "c sharp", ".net", "dotnet"]),
    ("cplusplus", &["c++", "cpp", "c plus plus"]),
    ("golang", &["golang", "go lang"]),
    ("rust", &["rust", "rust lang"]),
    ("php", &["php", "laravel"]),
    ("ruby", &["ruby", "ruby on rails", "rails"]),
    ("swift", &["swift", "ios swift"]),
    ("kotlin", &["kotlin"]),
    ("scala", &["scala"]),
    ("sql", &["sql", "t-sql", "pl/sql", "sql server"]),
    ("postgresql", &["postgresql", "postgres"]),
    ("mysql", &["mysql", "mariadb"]),
    ("mongodb", &["mongodb", "mongo"]),
    ("redis", &["redis"]),
    ("sqlite", &["sqlite", "sqlite3"]),
    ("elasticsearch", &["elasticsearch", "elastic search"]),
    ("aws", &["aws", "amazon web services"]),
    ("gcp", &["gcp", "google cloud", "google cloud platform"]),
    ("azure", &["azure", "microsoft azure"]),
    ("docker", &["docker", "containerization"]),
    ("kubernetes", &["kubernetes", "k8s"]),
    ("terraform", &["terraform"]),
    ("ansible", &["ansible"]),
    ("jenkins", &["jenkins"]),
    ("git", &["git", "github", "gitlab"]),
    ("ci/cd", &["ci/cd", "cicd", "continuous integration", "github actions"]),
    ("linux", &["linux", "unix"]),
    ("django", &["django", "django rest framework"]),
    ("flask", &["flask"]),
    ("fastapi", &["fastapi", "fast api"]),
    ("spring", &["spring boot", "springboot", "spring framework"]),
    ("express", &["express.js", "expressjs"]),
    ("graphql", &["graphql"]),
    ("rest", &["rest api", "rest apis", "restful"]),
    ("machine learning", &["machine learning", "ml"]),
    ("deep learning", &["deep learning", "neural networks"]),
    ("data science", &["data science"]),
    ("pandas", &["pandas"]),
    ("numpy", &["numpy"]),
    ("tensorflow", &["tensorflow"]),
    ("pytorch", &["pytorch"]),
    ("scikit-learn", &["scikit-learn", "sklearn"]),
    ("tableau", &["tableau"]),
    ("power bi", &["power bi", "powerbi"]),
    ("agile", &["agile", "scrum", "kanban"]),
    ("jira", &["jira"]),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexiconSource {
    pub skills: Vec<SkillEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillEntry {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl LexiconSource {
    pub fn builtin() -> Self {
        Self {
            skills: BUILTIN_SKILLS
                .iter()
                .map(|(name, aliases)| SkillEntry {
                    name: (*name).to_string(),
                    aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
                })
                .collect(),
        }
    }
}

/// Immutable skill dictionary. Readers share it through [`SharedLexicon`] snapshots.
#[derive(Debug)]
pub struct SkillLexicon {
    alias_to_canonical: HashMap<String, String>,
    matchers: Vec<(Regex, String)>,
}

impl SkillLexicon {
    pub fn builtin() -> Self {
        // The builtin table is static and always compiles.
        Self::from_source(LexiconSource::builtin()).unwrap_or_else(|_| Self::empty())
    }

    pub fn empty() -> Self {
        Self {
            alias_to_canonical: HashMap::new(),
            matchers: Vec::new(),
        }
    }

    pub fn from_source(source: LexiconSource) -> Result<Self, CoreError> {
        let mut alias_to_canonical = HashMap::new();
        let mut pairs: BTreeSet<(String, String)> = BTreeSet::new();

        for entry in source.skills {
            let canonical = collapse_lower(&entry.name);
            if canonical.is_empty() {
                return Err(CoreError::Configuration(
                    "skill lexicon entry with empty name".to_string(),
                ));
            }

            let mut aliases: Vec<String> = entry.aliases.iter().map(|a| collapse_lower(a)).collect();
            aliases.push(canonical.clone());

            for alias in aliases.into_iter().filter(|a| !a.is_empty()) {
                if let Some(existing) = alias_to_canonical.get(&alias) {
                    if existing != &canonical {
                        return Err(CoreError::Configuration(format!(
                            "alias '{alias}' maps to both '{existing}' and '{canonical}'"
                        )));
                    }
                    continue;
                }
                alias_to_canonical.insert(alias.clone(), canonical.clone());
                pairs.insert((alias, canonical.clone()));
            }
        }

        let mut matchers = Vec::with_capacity(pairs.len());
        for (alias, canonical) in pairs {
            let pattern = alias
                .split(' ')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+");
            let regex = Regex::new(&format!(r"(?:^|[^a-z0-9+#]){pattern}(?:$|[^a-z0-9+#])"))
                .map_err(|err| {
                    CoreError::Configuration(format!("invalid skill alias '{alias}': {err}"))
                })?;
            matchers.push((regex, canonical));
        }

        Ok(Self {
            alias_to_canonical,
            matchers,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        let source = serde_json::from_str::<LexiconSource>(json)
            .map_err(|err| CoreError::Configuration(format!("invalid skill lexicon: {err}")))?;
        Self::from_source(source)
    }

    pub async fn load(path: &Path) -> Result<Self, CoreError> {
        let json = tokio::fs::read_to_string(path).await.map_err(|err| {
            CoreError::Configuration(format!(
                "failed to read skill lexicon {}: {err}",
                path.display()
            ))
        })?;
        Self::from_json_str(&json)
    }

    pub fn len(&self) -> usize {
        self.alias_to_canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alias_to_canonical.is_empty()
    }

    /// Lower-case, collapse whitespace and fold through the synonym table.
    /// Tokens unknown to the lexicon are kept in their cleaned form.
    pub fn normalize_token(&self, raw: &str) -> Option<String> {
        let cleaned = collapse_lower(raw);
        if cleaned.is_empty() {
            return None;
        }

        Some(
            self.alias_to_canonical
                .get(&cleaned)
                .cloned()
                .unwrap_or(cleaned),
        )
    }

    pub fn normalize_set<'a, I>(&self, raw: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        raw.into_iter()
            .filter_map(|token| self.normalize_token(token))
            .collect()
    }

    pub fn find_in_text(&self, text: &str) -> BTreeSet<String> {
        let lowered = text.to_lowercase();
        let mut found = BTreeSet::new();
        for (regex, canonical) in &self.matchers {
            if found.contains(canonical) {
                continue;
            }
            if regex.is_match(&lowered) {
                found.insert(canonical.clone());
            }
        }
        found
    }
}

/// Process-wide lexicon handle. Reloads replace the whole snapshot; a snapshot taken
/// before a reload stays valid and unchanged for as long as its holder keeps it.
pub struct SharedLexicon {
    current: RwLock<Arc<SkillLexicon>>,
}

impl SharedLexicon {
    pub fn new(lexicon: SkillLexicon) -> Self {
        Self {
            current: RwLock::new(Arc::new(lexicon)),
        }
    }

    pub fn snapshot(&self) -> Arc<SkillLexicon> {
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub fn replace(&self, lexicon: SkillLexicon) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(lexicon);
    }
}

pub fn collapse_lower(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_synonyms_and_whitespace() {
        let lexicon = SkillLexicon::builtin();
        assert_eq!(lexicon.normalize_token("JS"), Some("javascript".to_string()));
        assert_eq!(
            lexicon.normalize_token("  Machine\t Learning "),
            Some("machine learning".to_string())
        );
        assert_eq!(lexicon.normalize_token("COBOL"), Some("cobol".to_string()));
        assert_eq!(lexicon.normalize_token("   "), None);
    }

    #[test]
    fn finds_skills_on_word_boundaries() {
        let lexicon = SkillLexicon::builtin();
        let found = lexicon.find_in_text("Python, C++ and Node.js; some MySQL. Also k8s");
        assert!(found.contains("python"));
        assert!(found.contains("cplusplus"));
        assert!(found.contains("nodejs"));
        assert!(found.contains("mysql"));
        assert!(found.contains("kubernetes"));
        // "sql" must not be picked out of "mysql"
        assert!(!found.contains("sql"));
    }

    #[test]
    fn ambiguous_words_are_not_matched() {
        let lexicon = SkillLexicon::builtin();
        let found = lexicon.find_in_text("Ready to go in spring, express delivery, the rest");
        assert!(found.is_empty(), "unexpected skills: {found:?}");
    }

    #[test]
    fn rejects_conflicting_aliases() {
        let json = r#"{"skills":[{"name":"a","aliases":["x"]},{"name":"b","aliases":["x"]}]}"#;
        assert!(matches!(
            SkillLexicon::from_json_str(json),
            Err(CoreError::Configuration(_))
        ));
    }

    #[test]
    fn reload_does_not_affect_existing_snapshot() {
        let shared = SharedLexicon::new(SkillLexicon::builtin());
        let before = shared.snapshot();

        let custom = SkillLexicon::from_json_str(r#"{"skills":[{"name":"cobol","aliases":["cbl"]}]}"#)
            .unwrap();
        shared.replace(custom);

        assert_eq!(before.normalize_token("js"), Some("javascript".to_string()));
        assert_eq!(shared.snapshot().normalize_token("cbl"), Some("cobol".to_string()));
        assert_eq!(shared.snapshot().normalize_token("js"), Some("js".to_string()));
    }
}
