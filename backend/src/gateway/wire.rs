use serde::Deserialize;
use serde_json::{Map, Value};

/// Success body of the model backend's `/predict` endpoint. Any precomputed
/// `prediction` block is ignored; consensus is always recomputed here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendPrediction {
    pub model_predictions: Map<String, Value>,
    #[serde(default, alias = "probs")]
    pub class_probabilities: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct BackendErrorBody {
    detail: Value,
}

/// Structured `detail` when the body carries one, otherwise the raw text.
pub fn error_detail(body: &str, reason: Option<&str>) -> String {
    if let Ok(error) = serde_json::from_str::<BackendErrorBody>(body) {
        return match error.detail {
            Value::String(detail) => detail,
            other => other.to_string(),
        };
    }
    if body.trim().is_empty() {
        return reason.unwrap_or("Unknown error").to_string();
    }
    body.to_string()
}
