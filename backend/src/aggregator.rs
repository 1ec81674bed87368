use shared::{ClassProbabilityMap, ModelPrediction, PredictionResult, PrimaryClassification};
use std::sync::Arc;

use crate::labels::{normalize_code, LabelRegistry};
use crate::risk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AggregationError {
    #[error("No model predictions available to aggregate")]
    NoModels,
}

/// Where the primary class came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusSource {
    Probabilities,
    MajorityVote,
}

struct Tally<'a> {
    code: &'a str,
    votes: usize,
    confidence_sum: f32,
}

/// Reconciles per-model verdicts and the class distribution into a single
/// `PredictionResult`. This is the only place results are built.
#[derive(Clone)]
pub struct Aggregator {
    registry: Arc<LabelRegistry>,
}

impl Aggregator {
    pub fn new(registry: Arc<LabelRegistry>) -> Self {
        Self { registry }
    }

    pub fn aggregate(
        &self,
        model_predictions: Vec<ModelPrediction>,
        class_probabilities: ClassProbabilityMap,
    ) -> Result<PredictionResult, AggregationError> {
        if model_predictions.is_empty() {
            return Err(AggregationError::NoModels);
        }

        let (class_code, source) = match highest_probability(&class_probabilities) {
            Some(code) => (code, ConsensusSource::Probabilities),
            None => (
                majority_vote(&model_predictions).ok_or(AggregationError::NoModels)?,
                ConsensusSource::MajorityVote,
            ),
        };
        let class_code = normalize_code(&class_code);

        let agreeing: Vec<&ModelPrediction> = model_predictions
            .iter()
            .filter(|p| p.class_code == class_code)
            .collect();

        let confidence = match class_probabilities.get(&class_code) {
            Some(probability) => probability as f32,
            None => mean_confidence(&agreeing),
        };
        let agreement = agreeing.len() as f32 / model_predictions.len() as f32;

        let class_id = self
            .registry
            .class_id(&class_code)
            .or_else(|| agreeing.first().map(|p| p.class_id))
            .unwrap_or(-1);
        let resolved = self.registry.resolve(&class_code);
        // Unknown classes fall back to the backend's own spelling.
        let display_name = if resolved.known {
            resolved.display_name
        } else {
            class_probabilities
                .label(&class_code)
                .or_else(|| agreeing.first().map(|p| p.display_name.as_str()))
                .map(str::to_string)
                .unwrap_or(resolved.display_name)
        };
        let assessment = risk::classify(&self.registry, &class_code, confidence);

        log::debug!(
            "Consensus '{}' via {:?}: confidence {:.3}, agreement {:.2}",
            class_code,
            source,
            confidence,
            agreement
        );

        Ok(PredictionResult {
            primary: PrimaryClassification {
                class_id,
                class_code,
                display_name,
                risk: assessment.risk,
                description: assessment.description,
                recommendation: assessment.recommendation,
                confidence,
                agreement,
            },
            model_predictions,
            class_probabilities,
        })
    }
}

/// Strictly greater comparison, so the first-inserted code wins ties.
fn highest_probability(probabilities: &ClassProbabilityMap) -> Option<String> {
    let mut best: Option<(&str, f64)> = None;
    for (code, probability) in probabilities.iter() {
        match best {
            Some((_, top)) if probability <= top => {}
            _ => best = Some((code, probability)),
        }
    }
    best.map(|(code, _)| code.to_string())
}

/// Most votes wins; ties go to the higher summed confidence, then to the
/// class whose first voter was supplied earliest.
fn majority_vote(predictions: &[ModelPrediction]) -> Option<String> {
    let mut tallies: Vec<Tally> = Vec::new();
    for prediction in predictions {
        match tallies.iter_mut().find(|t| t.code == prediction.class_code) {
            Some(tally) => {
                tally.votes += 1;
                tally.confidence_sum += prediction.confidence;
            }
            None => tallies.push(Tally {
                code: &prediction.class_code,
                votes: 1,
                confidence_sum: prediction.confidence,
            }),
        }
    }

    let mut winner: Option<&Tally> = None;
    for tally in &tallies {
        let better = match winner {
            None => true,
            Some(best) => {
                tally.votes > best.votes
                    || (tally.votes == best.votes && tally.confidence_sum > best.confidence_sum)
            }
        };
        if better {
            winner = Some(tally);
        }
    }
    winner.map(|t| t.code.to_string())
}

fn mean_confidence(predictions: &[&ModelPrediction]) -> f32 {
    if predictions.is_empty() {
        return 0.0;
    }
    predictions.iter().map(|p| p.confidence).sum::<f32>() / predictions.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::RiskTier;

    fn aggregator() -> Aggregator {
        Aggregator::new(Arc::new(LabelRegistry::builtin().unwrap()))
    }

    fn prediction(model: &str, code: &str, confidence: f32) -> ModelPrediction {
        let registry = LabelRegistry::builtin().unwrap();
        ModelPrediction {
            model_name: model.to_string(),
            class_id: registry.class_id(code).unwrap_or(99),
            class_code: code.to_string(),
            display_name: registry.resolve(code).display_name,
            confidence,
        }
    }

    fn probabilities(entries: &[(&str, f64)]) -> ClassProbabilityMap {
        let mut map = ClassProbabilityMap::new();
        for (code, p) in entries {
            map.insert(*code, *p);
        }
        map
    }

    #[test]
    fn no_models_is_an_error() {
        let err = aggregator()
            .aggregate(Vec::new(), ClassProbabilityMap::new())
            .unwrap_err();
        assert_eq!(err, AggregationError::NoModels);

        let err = aggregator()
            .aggregate(Vec::new(), probabilities(&[("mel", 0.9)]))
            .unwrap_err();
        assert_eq!(err, AggregationError::NoModels);
    }

    #[test]
    fn melanoma_consensus_uses_probability_map() {
        let result = aggregator()
            .aggregate(
                vec![
                    prediction("resnet50", "mel", 0.70),
                    prediction("densenet121", "mel", 0.75),
                ],
                probabilities(&[("mel", 0.72), ("nv", 0.20), ("bkl", 0.08)]),
            )
            .unwrap();

        let primary = &result.primary;
        assert_eq!(primary.class_code, "mel");
        assert_eq!(primary.class_id, 4);
        assert_eq!(primary.display_name, "Melanoma");
        assert_eq!(primary.risk, RiskTier::High);
        assert_eq!(primary.confidence, 0.72);
        assert_eq!(primary.agreement, 1.0);
        assert_eq!(primary.recommendation, "Seek immediate medical attention.");
        assert_eq!(result.model_predictions.len(), 2);
        assert_eq!(result.class_probabilities.len(), 3);
    }

    #[test]
    fn probability_map_overrides_model_votes() {
        let result = aggregator()
            .aggregate(
                vec![
                    prediction("a", "nv", 0.9),
                    prediction("b", "nv", 0.8),
                    prediction("c", "bkl", 0.6),
                ],
                probabilities(&[("nv", 0.3), ("bkl", 0.45), ("mel", 0.25)]),
            )
            .unwrap();
        assert_eq!(result.primary.class_code, "bkl");
        assert_eq!(result.primary.confidence, 0.45);
        assert!((result.primary.agreement - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn probability_ties_go_to_first_inserted() {
        for _ in 0..10 {
            let result = aggregator()
                .aggregate(
                    vec![prediction("a", "mel", 0.5)],
                    probabilities(&[("bkl", 0.1), ("nv", 0.45), ("mel", 0.45)]),
                )
                .unwrap();
            assert_eq!(result.primary.class_code, "nv");
        }
    }

    #[test]
    fn near_equal_probabilities_pick_the_strict_maximum() {
        let result = aggregator()
            .aggregate(
                vec![prediction("a", "nv", 0.5)],
                probabilities(&[("nv", 0.45), ("mel", 0.450000001)]),
            )
            .unwrap();
        assert_eq!(result.primary.class_code, "mel");
        assert_eq!(result.primary.risk, RiskTier::High);
    }

    #[test]
    fn majority_vote_without_probabilities() {
        let result = aggregator()
            .aggregate(
                vec![
                    prediction("a", "bcc", 0.9),
                    prediction("b", "nv", 0.6),
                    prediction("c", "nv", 0.8),
                ],
                ClassProbabilityMap::new(),
            )
            .unwrap();
        assert_eq!(result.primary.class_code, "nv");
        assert!((result.primary.confidence - 0.7).abs() < 1e-6);
        assert_eq!(result.primary.risk, RiskTier::Low);
    }

    #[test]
    fn vote_ties_use_summed_confidence_then_order() {
        let by_confidence = aggregator()
            .aggregate(
                vec![prediction("a", "bkl", 0.55), prediction("b", "akiec", 0.65)],
                ClassProbabilityMap::new(),
            )
            .unwrap();
        assert_eq!(by_confidence.primary.class_code, "akiec");
        assert_eq!(by_confidence.primary.risk, RiskTier::High);

        let by_order = aggregator()
            .aggregate(
                vec![prediction("a", "df", 0.6), prediction("b", "vasc", 0.6)],
                ClassProbabilityMap::new(),
            )
            .unwrap();
        assert_eq!(by_order.primary.class_code, "df");
    }

    #[test]
    fn unknown_primary_class_degrades_gracefully() {
        let result = aggregator()
            .aggregate(
                vec![prediction("a", "lentigo", 0.4)],
                ClassProbabilityMap::new(),
            )
            .unwrap();
        assert_eq!(result.primary.display_name, "lentigo");
        assert_eq!(result.primary.class_id, 99);
        assert_eq!(result.primary.risk, RiskTier::Low);
        assert!(!result.primary.description.is_empty());
    }

    #[test]
    fn unknown_class_keeps_backend_spelling() {
        let mut lentigo = prediction("a", "lentigo", 0.8);
        lentigo.display_name = "Lentigo".to_string();
        let mut probs = ClassProbabilityMap::new();
        probs.insert_labeled("lentigo", "Lentigo", 0.9);
        probs.insert("nv", 0.1);

        let result = aggregator()
            .aggregate(vec![lentigo.clone()], probs)
            .unwrap();
        assert_eq!(result.primary.class_code, "lentigo");
        assert_eq!(result.primary.display_name, "Lentigo");
        assert_eq!(
            result.primary.display_name,
            result.model_predictions[0].display_name
        );

        let voted = aggregator()
            .aggregate(vec![lentigo], ClassProbabilityMap::new())
            .unwrap();
        assert_eq!(voted.primary.display_name, "Lentigo");

        let mut only_probs = ClassProbabilityMap::new();
        only_probs.insert_labeled("solar_lentigo", "Solar Lentigo", 0.7);
        let from_map = aggregator()
            .aggregate(vec![prediction("b", "nv", 0.6)], only_probs)
            .unwrap();
        assert_eq!(from_map.primary.display_name, "Solar Lentigo");
        assert_eq!(from_map.primary.class_id, -1);
    }

    #[test]
    fn low_confidence_melanoma_stays_high_risk() {
        let result = aggregator()
            .aggregate(
                vec![prediction("a", "mel", 0.12)],
                ClassProbabilityMap::new(),
            )
            .unwrap();
        assert_eq!(result.primary.risk, RiskTier::High);
        assert_eq!(result.primary.confidence, 0.12);
    }
}
