use serde::{Deserialize, Serialize};

use super::errors::CoreError;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Default blend: skills dominate, the semantic signal only breaks ties.
pub const DEFAULT_WEIGHTS: ScoringWeights = ScoringWeights {
    skill_coverage: 0.5,
    experience_fit: 0.2,
    education_fit: 0.1,
    semantic_similarity: 0.2,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoringWeights {
    pub skill_coverage: f64,
    pub experience_fit: f64,
    pub education_fit: f64,
    pub semantic_similarity: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        DEFAULT_WEIGHTS
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.skill_coverage + self.experience_fit + self.education_fit + self.semantic_similarity
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let named = [
            ("skillCoverage", self.skill_coverage),
            ("experienceFit", self.experience_fit),
            ("educationFit", self.education_fit),
            ("semanticSimilarity", self.semantic_similarity),
        ];
        for (name, value) in named {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(CoreError::Configuration(format!(
                    "weight {name} must be within [0, 1], got {value}"
                )));
            }
        }

        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(CoreError::Configuration(format!(
                "scoring weights must sum to 1.0, got {sum:.6}"
            )));
        }

        Ok(())
    }
}
