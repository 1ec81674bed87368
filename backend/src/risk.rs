use shared::RiskTier;

use crate::labels::LabelRegistry;

const UNKNOWN_DESCRIPTION: &str = "This lesion type is not part of the reference taxonomy.";
const UNKNOWN_RECOMMENDATION: &str =
    "Consult a dermatologist if you have any concerns about this lesion.";

#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub risk: RiskTier,
    pub description: String,
    pub recommendation: String,
}

/// Risk is a function of the class alone. Confidence is reported next to it
/// and never moves the tier away from the registry default.
pub fn classify(registry: &LabelRegistry, class_code: &str, confidence: f32) -> RiskAssessment {
    match registry.entry(class_code) {
        Some(entry) => {
            log::debug!(
                "Class '{}' classified as {} (confidence {:.3})",
                entry.code,
                entry.default_risk,
                confidence
            );
            RiskAssessment {
                risk: entry.default_risk,
                description: entry.description.clone(),
                recommendation: entry.recommendation.clone(),
            }
        }
        None => {
            log::warn!("No risk information for unknown class '{}'", class_code);
            RiskAssessment {
                risk: RiskTier::LEAST_SEVERE,
                description: UNKNOWN_DESCRIPTION.to_string(),
                recommendation: UNKNOWN_RECOMMENDATION.to_string(),
            }
        }
    }
}
