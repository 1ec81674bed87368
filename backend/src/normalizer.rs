use serde_json::{Map, Value};
use shared::{ClassProbabilityMap, ModelPrediction};

use crate::labels::{normalize_code, LabelRegistry};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Confidence reported by model '{model}' is not numeric")]
    OutOfRange { model: String },
    #[error("Class id reported by model '{model}' is not an integer")]
    InvalidClassId { model: String },
    #[error("Prediction from model '{model}' is missing {field}")]
    MissingField { model: String, field: &'static str },
}

const CLASS_ID_KEYS: &[&str] = &["class_id", "classId"];
const CLASS_CODE_KEYS: &[&str] = &["class_name", "class_code", "classCode", "label"];
const CONFIDENCE_KEYS: &[&str] = &["confidence", "score"];

fn field<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| raw.get(*key))
        .find(|value| !value.is_null())
}

/// Numbers and numeric strings; NaN counts as non-numeric.
fn coerce_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| !n.is_nan())
}

fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    }
}

fn integral(n: f64) -> Option<i64> {
    (n.is_finite() && n.fract() == 0.0).then_some(n as i64)
}

fn clamp_unit(n: f64) -> f32 {
    n.clamp(0.0, 1.0) as f32
}

/// Validate one raw per-model record from the backend.
///
/// Numeric confidences outside [0, 1] are clamped; only values that are not
/// numbers at all are rejected. A missing class code is recovered from the
/// class id when the registry knows it, and vice versa.
pub fn normalize(
    registry: &LabelRegistry,
    model_name: &str,
    raw: &Value,
) -> Result<ModelPrediction, ValidationError> {
    let confidence = field(raw, CONFIDENCE_KEYS)
        .ok_or_else(|| ValidationError::MissingField {
            model: model_name.to_string(),
            field: "confidence",
        })
        .and_then(|value| {
            coerce_f64(value).ok_or_else(|| ValidationError::OutOfRange {
                model: model_name.to_string(),
            })
        })
        .map(clamp_unit)?;

    let class_id = match field(raw, CLASS_ID_KEYS) {
        Some(value) => Some(coerce_i64(value).ok_or_else(|| ValidationError::InvalidClassId {
            model: model_name.to_string(),
        })?),
        None => None,
    };

    let raw_code = field(raw, CLASS_CODE_KEYS)
        .and_then(Value::as_str)
        .filter(|code| !code.trim().is_empty())
        .map(str::to_string)
        .or_else(|| {
            class_id
                .and_then(|id| registry.by_class_id(id))
                .map(|entry| entry.code.clone())
        })
        .ok_or_else(|| ValidationError::MissingField {
            model: model_name.to_string(),
            field: "class_name",
        })?;

    let class_id = match class_id {
        Some(id) => id,
        None => registry
            .class_id(&raw_code)
            .ok_or_else(|| ValidationError::MissingField {
                model: model_name.to_string(),
                field: "class_id",
            })?,
    };

    let resolved = registry.resolve(&raw_code);
    if !resolved.known {
        log::debug!("Model '{}' reported unregistered class '{}'", model_name, raw_code);
    }
    Ok(ModelPrediction {
        model_name: model_name.to_string(),
        class_id,
        class_code: normalize_code(&raw_code),
        display_name: resolved.display_name,
        confidence,
    })
}

/// Build the probability map, dropping entries that are not finite,
/// non-negative numbers. Keys are canonicalized; the first occurrence of a
/// code wins and its original spelling is kept as the entry label.
/// Values stay in f64 so near-equal probabilities do not collapse.
pub fn normalize_probabilities(raw: &Map<String, Value>) -> ClassProbabilityMap {
    let mut probabilities = ClassProbabilityMap::new();
    for (code, value) in raw {
        let canonical = normalize_code(code);
        let probability = coerce_f64(value).filter(|p| p.is_finite() && *p >= 0.0);
        match probability {
            Some(p) if !canonical.is_empty() => {
                if !probabilities.insert_labeled(canonical, code.trim(), p.min(1.0)) {
                    log::warn!("Dropping duplicate probability for class '{}'", code);
                }
            }
            _ => log::warn!("Dropping invalid probability for class '{}': {}", code, value),
        }
    }
    probabilities
}
