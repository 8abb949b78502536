//! Bag-of-words linear model loaded from JSON
//!
//! File format:
//! ```json
//! {
//!   "classes": [0, 1, 2],
//!   "bias": [0.1, -0.2, 0.05],
//!   "weights": { "invoice": [0.0, 0.4, 1.2], "unsubscribe": [1.5, 0.0, -0.8] }
//! }
//! ```
//! Class entries may be numeric ids or label strings. Scores are the bias
//! plus the weights of every token occurrence; probabilities are the
//! softmax of the scores.

use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use super::{PredictedLabel, ProbabilisticEstimator};

#[derive(Debug, Clone, Deserialize)]
pub struct LinearTextModel {
    classes: Vec<PredictedLabel>,
    bias: Vec<f64>,
    weights: HashMap<String, Vec<f64>>,
}

impl LinearTextModel {
    /// Load and validate a model file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model file: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Invalid model file: {}", path.display()))
    }

    /// Parse and validate a model from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let model: Self = serde_json::from_str(json).context("Failed to parse model JSON")?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        let n = self.classes.len();
        ensure!(n > 0, "model has no classes");
        ensure!(
            self.bias.len() == n,
            "bias has {} entries, expected {}",
            self.bias.len(),
            n
        );
        for (token, weights) in &self.weights {
            ensure!(
                weights.len() == n,
                "weights for '{}' have {} entries, expected {}",
                token,
                weights.len(),
                n
            );
        }
        Ok(())
    }

    fn scores(&self, input: &str) -> Vec<f64> {
        let mut scores = self.bias.clone();
        for token in tokenize(input) {
            if let Some(weights) = self.weights.get(&token) {
                for (score, w) in scores.iter_mut().zip(weights) {
                    *score += w;
                }
            }
        }
        scores
    }
}

impl ProbabilisticEstimator for LinearTextModel {
    fn predict(&self, input: &str) -> Result<PredictedLabel> {
        let scores = self.scores(input);
        let best = scores
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)
            .context("model produced no scores")?;
        Ok(self.classes[best].clone())
    }

    fn predict_proba(&self, input: &str) -> Result<Option<Vec<f64>>> {
        Ok(Some(softmax(&self.scores(input))))
    }
}

/// Lowercase alphanumeric tokens
fn tokenize(input: &str) -> impl Iterator<Item = String> + '_ {
    input
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Classifier, EstimatorClassifier};
    use crate::models::Priority;

    const MODEL: &str = r#"{
        "classes": [0, 1, 2],
        "bias": [0.5, 0.0, -0.5],
        "weights": {
            "urgent": [-1.0, 0.0, 3.0],
            "invoice": [0.0, 1.5, 0.5],
            "newsletter": [2.0, 0.0, -1.0]
        }
    }"#;

    #[test]
    fn test_predicts_from_weights() {
        let model = LinearTextModel::from_json(MODEL).unwrap();
        assert_eq!(model.predict("URGENT: server down").unwrap(), PredictedLabel::Id(2));
        assert_eq!(model.predict("your invoice").unwrap(), PredictedLabel::Id(1));
        assert_eq!(model.predict("weekly newsletter").unwrap(), PredictedLabel::Id(0));
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let model = LinearTextModel::from_json(MODEL).unwrap();
        let probs = model.predict_proba("urgent invoice").unwrap().unwrap();
        assert_eq!(probs.len(), 3);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_wrapped_in_adapter() {
        let classifier = EstimatorClassifier::new(LinearTextModel::from_json(MODEL).unwrap());
        let result = classifier.classify("urgent urgent");
        assert_eq!(result.priority, Priority::High);
        assert!(result.confidence > 0.5);
    }

    #[test]
    fn test_rejects_mismatched_shapes() {
        let bad = r#"{ "classes": [0, 1], "bias": [0.0], "weights": {} }"#;
        assert!(LinearTextModel::from_json(bad).is_err());

        let bad_weights = r#"{ "classes": [0, 1], "bias": [0.0, 0.0], "weights": { "a": [1.0] } }"#;
        assert!(LinearTextModel::from_json(bad_weights).is_err());

        let empty = r#"{ "classes": [], "bias": [], "weights": {} }"#;
        assert!(LinearTextModel::from_json(empty).is_err());
    }

    #[test]
    fn test_string_classes() {
        let json = r#"{ "classes": ["Low", "High"], "bias": [0.0, 1.0], "weights": {} }"#;
        let model = LinearTextModel::from_json(json).unwrap();
        assert_eq!(
            model.predict("anything").unwrap(),
            PredictedLabel::Text("High".to_string())
        );
    }
}
