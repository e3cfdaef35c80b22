//! Ollama `/api/generate` client.
//!
//! One non-streaming completion per prompt. Transient failures (connection
//! errors, timeouts, 429 and 5xx) are retried with exponential backoff
//! starting at `model.backoff_base_ms`. Other 4xx responses are not
//! retried.

use std::time::Duration;

use async_trait::async_trait;
use faultline_core::model::{ModelClient, Prompt};
use faultline_core::{PipelineError, Result};
use tracing::{debug, warn};

use crate::config::ModelConfig;

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    max_retries: u32,
    backoff_base: Duration,
    temperature: Option<f64>,
}

impl OllamaClient {
    pub fn new(config: &ModelConfig, model: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            temperature: config.temperature,
        })
    }

    fn body(&self, prompt: &Prompt) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "system": prompt.system,
            "prompt": prompt.user,
            "stream": false,
        });
        if let Some(t) = self.temperature {
            body["options"] = serde_json::json!({ "temperature": t });
        }
        body
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = self.body(prompt);
        let mut last_err = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff_base * (1u32 << (attempt - 1).min(5));
                warn!(
                    chunk = %prompt.chunk_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_err,
                    "retrying model call"
                );
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&url)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        match response.json::<serde_json::Value>().await {
                            Ok(json) => match json.get("response").and_then(|r| r.as_str()) {
                                Some(text) => {
                                    debug!(chunk = %prompt.chunk_id, attempt, "model call ok");
                                    return Ok(text.to_string());
                                }
                                None => {
                                    last_err =
                                        "Ollama response has no 'response' field".to_string();
                                }
                            },
                            Err(e) => last_err = format!("invalid Ollama response body: {}", e),
                        }
                        continue;
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = format!("Ollama API error {}: {}", status, body_text);
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(PipelineError::ModelRejected {
                        status: status.as_u16(),
                        body: body_text,
                    });
                }
                Err(e) => {
                    last_err = format!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        self.base_url, e
                    );
                    continue;
                }
            }
        }

        Err(PipelineError::ModelUnavailable {
            attempts: self.max_retries + 1,
            last_error: last_err,
        })
    }
}
