//! Scoring service client
//!
//! Annotates status reports with derived crop scores. The service is treated
//! as unreliable: any failure or timeout yields neutral scores so a report is
//! never held back.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ScoringConfig;
use crate::domain::Scores;
use crate::error::Result;

/// Source of derived scores for a report
#[async_trait]
pub trait ScoringClient: Send + Sync {
    /// Scores for a pass at `altitude_m`; never fails, falls back to neutral scores
    async fn score(&self, altitude_m: f64) -> Scores;
}

/// Always returns neutral scores; used when scoring is disabled
pub struct NeutralScoring;

#[async_trait]
impl ScoringClient for NeutralScoring {
    async fn score(&self, _altitude_m: f64) -> Scores {
        Scores::default()
    }
}

#[derive(Debug, Clone, Serialize)]
struct AnalyzeRequest {
    altitude_meters: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    #[serde(default)]
    yield_score: f64,
    #[serde(default)]
    weed_score: f64,
    #[serde(default)]
    infection_score: Option<String>,
}

impl From<AnalyzeResponse> for Scores {
    fn from(resp: AnalyzeResponse) -> Self {
        Scores {
            yield_score: resp.yield_score,
            weed_score: resp.weed_score,
            infection: resp.infection_score,
        }
    }
}

/// HTTP client for the `/analyze` endpoint
pub struct HttpScoringClient {
    base_url: String,
    http: Client,
}

impl HttpScoringClient {
    pub fn new(config: &ScoringConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Raw call; errors are surfaced to the caller
    pub async fn analyze(&self, altitude_m: f64) -> Result<Scores> {
        let url = format!("{}/analyze", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&AnalyzeRequest {
                altitude_meters: altitude_m,
            })
            .send()
            .await?
            .error_for_status()?;

        let body: AnalyzeResponse = resp.json().await?;
        Ok(body.into())
    }
}

#[async_trait]
impl ScoringClient for HttpScoringClient {
    async fn score(&self, altitude_m: f64) -> Scores {
        match self.analyze(altitude_m).await {
            Ok(scores) => {
                debug!(altitude_m, ?scores, "scores received");
                scores
            }
            Err(e) => {
                warn!(altitude_m, error = %e, "scoring service unavailable; using neutral scores");
                Scores::default()
            }
        }
    }
}

/// Build the scoring client selected by configuration
pub fn from_config(config: &ScoringConfig) -> Result<Box<dyn ScoringClient>> {
    if config.enabled {
        Ok(Box::new(HttpScoringClient::new(config)?))
    } else {
        Ok(Box::new(NeutralScoring))
    }
}
