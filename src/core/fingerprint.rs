use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::lexicon::collapse_lower;
use super::models::ContactInfo;

/// Which parts of a parsed resume feed the duplicate-detection hash.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintPolicy {
    #[default]
    ContactAndSkills,
    ContactOnly,
    RawText,
}

pub fn compute_fingerprint(
    policy: FingerprintPolicy,
    contact: &ContactInfo,
    skills: &BTreeSet<String>,
    full_text: &str,
) -> String {
    let contact_key = [
        contact.name.as_deref(),
        contact.email.as_deref(),
        contact.phone.as_deref(),
    ]
    .iter()
    .map(|field| field.map(collapse_lower).unwrap_or_default())
    .collect::<Vec<_>>()
    .join("|");
    let has_contact = contact_key.chars().any(|c| c != '|');

    let material = match policy {
        FingerprintPolicy::RawText => format!("text:{}", collapse_lower(full_text)),
        FingerprintPolicy::ContactOnly if has_contact => format!("contact:{contact_key}"),
        FingerprintPolicy::ContactAndSkills if has_contact => {
            let skill_key = skills.iter().cloned().collect::<Vec<_>>().join(",");
            format!("contact:{contact_key}\nskills:{skill_key}")
        }
        // Skills alone do not identify a person; without contact fields hash the whole text.
        _ => format!("text:{}", collapse_lower(full_text)),
    };

    let digest = Sha256::digest(material.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// A persisted fingerprint and the job versions its candidate has been scored against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintEntry {
    pub fingerprint: String,
    pub candidate_id: String,
    #[serde(default)]
    pub scored: BTreeMap<String, BTreeSet<u32>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// First writer; the caller owns the fingerprint until it persists or releases it.
    Claimed,
    Existing {
        candidate_id: String,
        needs_refresh: bool,
    },
}

#[derive(Debug, Clone)]
struct IndexSlot {
    candidate_id: String,
    scored: BTreeMap<String, BTreeSet<u32>>,
}

/// The only mutable structure shared by ingestion workers. Every operation runs under one lock,
/// so insert-if-absent is atomic per fingerprint.
#[derive(Debug, Default)]
pub struct FingerprintIndex {
    slots: Mutex<HashMap<String, IndexSlot>>,
}

impl FingerprintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<FingerprintEntry>) -> Self {
        let slots = entries
            .into_iter()
            .map(|entry| {
                (
                    entry.fingerprint,
                    IndexSlot {
                        candidate_id: entry.candidate_id,
                        scored: entry.scored,
                    },
                )
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Claim `fingerprint` for `candidate_id`, or report who already holds it.
    ///
    /// When the holder has not been scored against this job version yet, the version is
    /// reserved in the same step so only one duplicate per version triggers a refresh.
    pub async fn claim(
        &self,
        fingerprint: &str,
        candidate_id: &str,
        job_id: &str,
        job_version: u32,
    ) -> Claim {
        let mut slots = self.slots.lock().await;
        match slots.get_mut(fingerprint) {
            Some(slot) => {
                let versions = slot.scored.entry(job_id.to_string()).or_default();
                let needs_refresh = versions.insert(job_version);
                Claim::Existing {
                    candidate_id: slot.candidate_id.clone(),
                    needs_refresh,
                }
            }
            None => {
                let mut scored = BTreeMap::new();
                scored.insert(job_id.to_string(), BTreeSet::from([job_version]));
                slots.insert(
                    fingerprint.to_string(),
                    IndexSlot {
                        candidate_id: candidate_id.to_string(),
                        scored,
                    },
                );
                Claim::Claimed
            }
        }
    }

    /// Drop a claim whose candidate never reached the store.
    pub async fn release(&self, fingerprint: &str, candidate_id: &str) {
        let mut slots = self.slots.lock().await;
        if slots
            .get(fingerprint)
            .is_some_and(|slot| slot.candidate_id == candidate_id)
        {
            slots.remove(fingerprint);
        }
    }

    /// Point a fingerprint at the candidate the store already holds for it.
    pub async fn adopt(&self, fingerprint: &str, existing_candidate_id: &str) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(fingerprint) {
            slot.candidate_id = existing_candidate_id.to_string();
            slot.scored.clear();
        }
    }

    /// Undo a version reservation after a refresh that could not be stored.
    pub async fn forget_version(&self, fingerprint: &str, job_id: &str, job_version: u32) {
        let mut slots = self.slots.lock().await;
        if let Some(versions) = slots
            .get_mut(fingerprint)
            .and_then(|slot| slot.scored.get_mut(job_id))
        {
            versions.remove(&job_version);
        }
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn contact(email: &str) -> ContactInfo {
        ContactInfo {
            name: Some("Jane  Doe".to_string()),
            email: Some(email.to_string()),
            ..ContactInfo::default()
        }
    }

    #[test]
    fn fingerprint_ignores_case_and_spacing_in_contact() {
        let skills = BTreeSet::from(["python".to_string()]);
        let a = compute_fingerprint(
            FingerprintPolicy::ContactAndSkills,
            &contact("jane@example.com"),
            &skills,
            "one",
        );
        let mut other = contact("jane@example.com");
        other.name = Some("jane doe".to_string());
        let b = compute_fingerprint(FingerprintPolicy::ContactAndSkills, &other, &skills, "two");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn shared_skills_without_contact_do_not_collide() {
        let empty = ContactInfo::default();
        let skills = BTreeSet::from(["python".to_string(), "sql".to_string()]);
        let alice = compute_fingerprint(
            FingerprintPolicy::ContactAndSkills,
            &empty,
            &skills,
            "alice wong, backend developer\n\nSkills\nPython, SQL",
        );
        let bob = compute_fingerprint(
            FingerprintPolicy::ContactAndSkills,
            &empty,
            &skills,
            "bob martinez, data analyst\n\nSkills\nPython, SQL",
        );
        assert_ne!(alice, bob);
    }

    #[test]
    fn empty_contact_and_skills_fall_back_to_text() {
        let empty = ContactInfo::default();
        let skills = BTreeSet::new();
        let a = compute_fingerprint(FingerprintPolicy::ContactAndSkills, &empty, &skills, "alpha");
        let b = compute_fingerprint(FingerprintPolicy::ContactAndSkills, &empty, &skills, "beta");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn concurrent_claims_have_a_single_winner() {
        let index = Arc::new(FingerprintIndex::new());
        let mut handles = Vec::new();
        for n in 0..16 {
            let index = Arc::clone(&index);
            handles.push(tokio::spawn(async move {
                index.claim("fp", &format!("cand-{n}"), "job", 1).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() == Claim::Claimed {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn refresh_is_reserved_once_per_job_version() {
        let index = FingerprintIndex::new();
        assert_eq!(index.claim("fp", "c1", "job", 1).await, Claim::Claimed);
        assert_eq!(
            index.claim("fp", "c2", "job", 1).await,
            Claim::Existing {
                candidate_id: "c1".to_string(),
                needs_refresh: false
            }
        );
        assert_eq!(
            index.claim("fp", "c3", "job", 2).await,
            Claim::Existing {
                candidate_id: "c1".to_string(),
                needs_refresh: true
            }
        );
        index.forget_version("fp", "job", 2).await;
        assert!(matches!(
            index.claim("fp", "c4", "job", 2).await,
            Claim::Existing {
                needs_refresh: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn release_only_drops_own_claim() {
        let index = FingerprintIndex::new();
        index.claim("fp", "c1", "job", 1).await;
        index.release("fp", "someone-else").await;
        assert_eq!(index.len().await, 1);
        index.release("fp", "c1").await;
        assert!(index.is_empty().await);
    }
}
