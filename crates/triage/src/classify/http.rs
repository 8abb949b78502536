//! Remote text-classification pipeline over HTTP
//!
//! Posts `{"inputs": "<text>"}` to an inference endpoint and reads back
//! ranked label/score pairs. Uses synchronous HTTP (ureq) like the Gmail
//! client, so it can be called from the sync thread directly.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LabelScore, RankedLabelPipeline};

/// Request body for a single input
#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
}

/// Inference servers return either a flat list or one list per input
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Nested(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
}

impl InferenceResponse {
    fn into_scores(self) -> Vec<LabelScore> {
        match self {
            InferenceResponse::Nested(mut lists) => {
                if lists.is_empty() {
                    Vec::new()
                } else {
                    lists.swap_remove(0)
                }
            }
            InferenceResponse::Flat(scores) => scores,
        }
    }
}

/// Ranked-label pipeline backed by an HTTP endpoint
pub struct HttpPipeline {
    agent: ureq::Agent,
    endpoint: String,
    token: Option<String>,
}

impl HttpPipeline {
    pub fn new(endpoint: &str, token: Option<String>, timeout_secs: u64) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(timeout_secs.max(1))))
            .build();

        Self {
            agent: ureq::Agent::new_with_config(config),
            endpoint: endpoint.to_string(),
            token,
        }
    }
}

impl RankedLabelPipeline for HttpPipeline {
    fn rank(&self, input: &str) -> Result<Vec<LabelScore>> {
        let mut request = self.agent.post(&self.endpoint);
        if let Some(token) = &self.token {
            request = request.header("Authorization", &format!("Bearer {}", token));
        }

        let mut response = request
            .send_json(&InferenceRequest { inputs: input })
            .context("Failed to send classification request")?;

        let parsed: InferenceResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse classification response")?;

        Ok(parsed.into_scores())
    }
}
