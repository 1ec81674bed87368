use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use strum_macros::{Display, EnumString};

/// Coarse clinical-urgency bucket. Ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum RiskTier {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub const LEAST_SEVERE: RiskTier = RiskTier::Low;
}

/// One classifier's verdict after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    #[serde(default)]
    pub model_name: String,
    pub class_id: i64,
    #[serde(alias = "class_name")]
    pub class_code: String,
    pub display_name: String,
    pub confidence: f32,
}

/// Class code -> probability, in the order the backend reported them.
///
/// Only finite, non-negative values are ever stored and the first
/// occurrence of a code wins. Each entry also remembers the label the
/// backend used for it, which may differ from the canonical code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassProbabilityMap {
    entries: Vec<ProbabilityEntry>,
}

#[derive(Debug, Clone, PartialEq)]
struct ProbabilityEntry {
    code: String,
    label: String,
    probability: f64,
}

impl ClassProbabilityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the value was rejected or the code already exists.
    pub fn insert(&mut self, code: impl Into<String>, probability: f64) -> bool {
        let code = code.into();
        let label = code.clone();
        self.insert_labeled(code, label, probability)
    }

    pub fn insert_labeled(
        &mut self,
        code: impl Into<String>,
        label: impl Into<String>,
        probability: f64,
    ) -> bool {
        if !probability.is_finite() || probability < 0.0 {
            return false;
        }
        let code = code.into();
        if self.contains(&code) {
            return false;
        }
        self.entries.push(ProbabilityEntry {
            code,
            label: label.into(),
            probability,
        });
        true
    }

    fn entry(&self, code: &str) -> Option<&ProbabilityEntry> {
        self.entries.iter().find(|e| e.code == code)
    }

    pub fn get(&self, code: &str) -> Option<f64> {
        self.entry(code).map(|e| e.probability)
    }

    /// The backend's own spelling of `code`.
    pub fn label(&self, code: &str) -> Option<&str> {
        self.entry(code).map(|e| e.label.as_str())
    }

    pub fn contains(&self, code: &str) -> bool {
        self.entry(code).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|e| (e.code.as_str(), e.probability))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ClassProbabilityMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.code, &entry.probability)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ClassProbabilityMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ProbabilityVisitor;

        impl<'de> Visitor<'de> for ProbabilityVisitor {
            type Value = ClassProbabilityMap;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of class codes to probabilities")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut map = ClassProbabilityMap::new();
                while let Some((code, probability)) = access.next_entry::<String, f64>()? {
                    map.insert(code, probability);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(ProbabilityVisitor)
    }
}

/// The consensus classification together with its risk text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryClassification {
    pub class_id: i64,
    #[serde(alias = "class_name")]
    pub class_code: String,
    pub display_name: String,
    pub risk: RiskTier,
    pub description: String,
    pub recommendation: String,
    pub confidence: f32,
    /// Fraction of models that voted for this class.
    #[serde(default)]
    pub agreement: f32,
}

/// The only artifact returned to callers of the analysis endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    #[serde(rename = "prediction", alias = "primary")]
    pub primary: PrimaryClassification,
    #[serde(with = "model_prediction_map")]
    pub model_predictions: Vec<ModelPrediction>,
    pub class_probabilities: ClassProbabilityMap,
}

impl PredictionResult {
    pub fn model_prediction(&self, model_name: &str) -> Option<&ModelPrediction> {
        self.model_predictions
            .iter()
            .find(|p| p.model_name == model_name)
    }
}

// Model predictions travel as an object keyed by model name.
mod model_prediction_map {
    use super::ModelPrediction;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(predictions: &[ModelPrediction], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(predictions.len()))?;
        for prediction in predictions {
            map.serialize_entry(&prediction.model_name, prediction)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<ModelPrediction>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PredictionsVisitor;

        impl<'de> Visitor<'de> for PredictionsVisitor {
            type Value = Vec<ModelPrediction>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of model names to predictions")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut predictions = Vec::new();
                while let Some((name, mut prediction)) =
                    access.next_entry::<String, ModelPrediction>()?
                {
                    prediction.model_name = name;
                    predictions.push(prediction);
                }
                Ok(predictions)
            }
        }

        deserializer.deserialize_map(PredictionsVisitor)
    }
}

/// A registry entry as exposed by the labels endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelDescriptor {
    pub code: String,
    pub class_id: i64,
    pub display_name: String,
    pub risk: RiskTier,
    pub description: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn probability_map_keeps_backend_order() {
        let map: ClassProbabilityMap =
            serde_json::from_str(r#"{"nv": 0.2, "mel": 0.7, "bkl": 0.1}"#).unwrap();
        let codes: Vec<&str> = map.iter().map(|(c, _)| c).collect();
        assert_eq!(codes, vec!["nv", "mel", "bkl"]);

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"nv":0.2,"mel":0.7,"bkl":0.1}"#);
    }

    #[test]
    fn probability_map_rejects_invalid_values() {
        let mut map = ClassProbabilityMap::new();
        assert!(map.insert("mel", 0.5));
        assert!(!map.insert("mel", 0.9));
        assert!(!map.insert("nv", -0.1));
        assert!(!map.insert("bkl", f64::NAN));
        assert!(!map.insert("df", f64::INFINITY));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("mel"), Some(0.5));
    }

    #[test]
    fn probability_map_keeps_backend_label() {
        let mut map = ClassProbabilityMap::new();
        assert!(map.insert_labeled("lentigo", "Lentigo", 0.9));
        assert!(map.insert("nv", 0.1));
        assert_eq!(map.label("lentigo"), Some("Lentigo"));
        assert_eq!(map.label("nv"), Some("nv"));
        assert_eq!(map.label("mel"), None);

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"lentigo":0.9,"nv":0.1}"#);
    }

    #[test]
    fn probability_map_keeps_full_precision() {
        let map: ClassProbabilityMap =
            serde_json::from_str(r#"{"nv": 0.45, "mel": 0.450000001}"#).unwrap();
        assert!(map.get("mel").unwrap() > map.get("nv").unwrap());
    }

    #[test]
    fn risk_tier_parses_case_insensitively() {
        assert_eq!(RiskTier::from_str("high").unwrap(), RiskTier::High);
        assert_eq!(RiskTier::Medium.to_string(), "Medium");
        assert!(RiskTier::Low < RiskTier::High);
        assert_eq!(RiskTier::default(), RiskTier::Low);
    }

    #[test]
    fn prediction_result_uses_model_name_keys() {
        let json = r#"{
            "prediction": {
                "class_id": 4,
                "class_name": "mel",
                "display_name": "Melanoma",
                "risk": "High",
                "description": "d",
                "recommendation": "r",
                "confidence": 0.72
            },
            "model_predictions": {
                "resnet50": {"class_id": 4, "class_code": "mel", "display_name": "Melanoma", "confidence": 0.7}
            },
            "class_probabilities": {"mel": 0.72}
        }"#;
        let result: PredictionResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.primary.class_code, "mel");
        assert_eq!(result.primary.agreement, 0.0);
        let resnet = result.model_prediction("resnet50").unwrap();
        assert_eq!(resnet.class_id, 4);

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["model_predictions"]["resnet50"]["class_code"], "mel");
        assert_eq!(value["prediction"]["risk"], "High");
    }

    #[test]
    fn error_response_omits_missing_status() {
        let body = ErrorResponse {
            error: "Analysis unavailable".into(),
            kind: "no_models".into(),
            upstream_status: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("upstream_status"));
    }
}
