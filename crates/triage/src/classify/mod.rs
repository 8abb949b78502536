//! Classifier adapter
//!
//! The single seam between the sync pipeline and any prediction backend.
//! Two backend shapes are supported:
//! - [`ProbabilisticEstimator`]: a class id or label plus a probability vector
//! - [`RankedLabelPipeline`]: a ranked list of label/score pairs
//!
//! Both are wrapped behind [`Classifier`], which never fails: any backend
//! error degrades to `Unknown` with confidence 0.0.

mod http;
mod linear;

pub use http::HttpPipeline;
pub use linear::LinearTextModel;

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::ClassifierConfig;
use crate::models::{ClassificationResult, Priority};

/// Classify prepared input text into a priority tier
pub trait Classifier: Send + Sync {
    fn classify(&self, input: &str) -> ClassificationResult;
}

/// Raw label as a backend reports it, before normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictedLabel {
    Id(i64),
    Text(String),
}

impl PredictedLabel {
    pub fn to_priority(&self) -> Priority {
        match self {
            PredictedLabel::Id(id) => Priority::from_class_id(*id),
            PredictedLabel::Text(label) => Priority::from_label(label),
        }
    }
}

/// Estimator that predicts a class and, optionally, class probabilities
pub trait ProbabilisticEstimator: Send + Sync {
    fn predict(&self, input: &str) -> Result<PredictedLabel>;

    /// Class probabilities, or `None` if the estimator has no probability output
    fn predict_proba(&self, input: &str) -> Result<Option<Vec<f64>>>;
}

/// One entry of a ranked classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

/// Text-classification pipeline returning ranked label/score pairs
pub trait RankedLabelPipeline: Send + Sync {
    fn rank(&self, input: &str) -> Result<Vec<LabelScore>>;
}

/// Adapter for probabilistic estimators
pub struct EstimatorClassifier<E> {
    estimator: E,
}

impl<E: ProbabilisticEstimator> EstimatorClassifier<E> {
    pub fn new(estimator: E) -> Self {
        Self { estimator }
    }

    fn try_classify(&self, input: &str) -> Result<ClassificationResult> {
        let label = self.estimator.predict(input)?;
        let probabilities = self
            .estimator
            .predict_proba(input)?
            .context("Estimator does not provide probabilities")?;
        let confidence = probabilities
            .iter()
            .copied()
            .filter(|p| !p.is_nan())
            .reduce(f64::max)
            .context("Estimator returned an empty probability vector")?;

        Ok(ClassificationResult::new(label.to_priority(), confidence))
    }
}

impl<E: ProbabilisticEstimator> Classifier for EstimatorClassifier<E> {
    fn classify(&self, input: &str) -> ClassificationResult {
        match self.try_classify(input) {
            Ok(result) => result,
            Err(e) => {
                warn!("Classifier failed, marking message Unknown: {:#}", e);
                ClassificationResult::unknown()
            }
        }
    }
}

/// Adapter for ranked-label pipelines
pub struct PipelineClassifier<P> {
    pipeline: P,
}

impl<P: RankedLabelPipeline> PipelineClassifier<P> {
    pub fn new(pipeline: P) -> Self {
        Self { pipeline }
    }

    fn try_classify(&self, input: &str) -> Result<ClassificationResult> {
        let ranked = self.pipeline.rank(input)?;
        let top = ranked
            .into_iter()
            .filter(|entry| !entry.score.is_nan())
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .context("Pipeline returned no labels")?;

        Ok(ClassificationResult::new(
            Priority::from_label(&top.label),
            top.score,
        ))
    }
}

impl<P: RankedLabelPipeline> Classifier for PipelineClassifier<P> {
    fn classify(&self, input: &str) -> ClassificationResult {
        match self.try_classify(input) {
            Ok(result) => result,
            Err(e) => {
                warn!("Classifier failed, marking message Unknown: {:#}", e);
                ClassificationResult::unknown()
            }
        }
    }
}

/// Load the configured classifier backend
///
/// Backends are loaded once and shared for the lifetime of the process.
pub fn load_classifier(config: &ClassifierConfig) -> Result<Arc<dyn Classifier>> {
    match config {
        ClassifierConfig::Linear { model_path } => {
            let model = LinearTextModel::from_file(model_path)?;
            Ok(Arc::new(EstimatorClassifier::new(model)))
        }
        ClassifierConfig::Http {
            endpoint,
            token_env,
            timeout_secs,
        } => {
            let token = match token_env {
                Some(var) => Some(
                    std::env::var(var)
                        .with_context(|| format!("{} environment variable not set", var))?,
                ),
                None => None,
            };
            let pipeline = HttpPipeline::new(endpoint, token, *timeout_secs);
            Ok(Arc::new(PipelineClassifier::new(pipeline)))
        }
    }
}
