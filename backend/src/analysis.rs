use shared::{ModelPrediction, PredictionResult};
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregator::{AggregationError, Aggregator};
use crate::gateway::{BackendPrediction, GatewayError, ImageUpload, InferenceGateway};
use crate::labels::LabelRegistry;
use crate::normalizer;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
}

impl AnalysisError {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Gateway(e) => e.kind(),
            AnalysisError::Aggregation(AggregationError::NoModels) => "no_models",
        }
    }

    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            AnalysisError::Gateway(e) => e.upstream_status(),
            AnalysisError::Aggregation(_) => None,
        }
    }
}

/// Gateway -> normalizer -> aggregator for a single uploaded image.
#[derive(Clone)]
pub struct AnalysisPipeline {
    gateway: InferenceGateway,
    registry: Arc<LabelRegistry>,
    aggregator: Aggregator,
}

impl AnalysisPipeline {
    pub fn new(gateway: InferenceGateway, registry: Arc<LabelRegistry>) -> Self {
        let aggregator = Aggregator::new(registry.clone());
        Self {
            gateway,
            registry,
            aggregator,
        }
    }

    pub fn registry(&self) -> &LabelRegistry {
        &self.registry
    }

    pub async fn analyze(&self, upload: ImageUpload) -> Result<PredictionResult, AnalysisError> {
        let request_id = Uuid::new_v4();
        log::info!(
            "[{}] Forwarding {} byte {} image to model backend (metadata: {})",
            request_id,
            upload.len(),
            upload.mime_type(),
            upload.meta().is_some()
        );

        let raw = match self.gateway.predict(upload).await {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("[{}] Model backend call failed: {}", request_id, e);
                return Err(e.into());
            }
        };

        match self.assemble(request_id, &raw) {
            Ok(result) => {
                log::info!(
                    "[{}] Classified as '{}' ({} risk, confidence {:.3}, {} models)",
                    request_id,
                    result.primary.class_code,
                    result.primary.risk,
                    result.primary.confidence,
                    result.model_predictions.len()
                );
                Ok(result)
            }
            Err(e) => {
                log::error!("[{}] Aggregation failed: {}", request_id, e);
                Err(e.into())
            }
        }
    }

    /// Normalize the raw backend output and build the result. Records that
    /// fail validation are dropped; the request only fails when nothing
    /// usable is left.
    pub fn assemble(
        &self,
        request_id: Uuid,
        raw: &BackendPrediction,
    ) -> Result<PredictionResult, AggregationError> {
        let model_predictions: Vec<ModelPrediction> = raw
            .model_predictions
            .iter()
            .filter_map(|(model_name, record)| {
                match normalizer::normalize(&self.registry, model_name, record) {
                    Ok(prediction) => Some(prediction),
                    Err(e) => {
                        log::warn!("[{}] Dropping model record: {}", request_id, e);
                        None
                    }
                }
            })
            .collect();

        let class_probabilities = normalizer::normalize_probabilities(&raw.class_probabilities);
        if class_probabilities.len() < raw.class_probabilities.len() {
            log::warn!(
                "[{}] Kept {} of {} class probabilities",
                request_id,
                class_probabilities.len(),
                raw.class_probabilities.len()
            );
        }

        self.aggregator
            .aggregate(model_predictions, class_probabilities)
    }

    pub async fn backend_health(&self) -> Result<serde_json::Value, GatewayError> {
        self.gateway.health().await
    }
}
