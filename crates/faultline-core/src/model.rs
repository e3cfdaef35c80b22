//! Model client seam.
//!
//! [`ModelClient`] is the capability the phases depend on: send one prompt,
//! get the raw completion back. Timeouts and retries live inside the
//! implementation (see the app's `OllamaClient`). [`invoke`] adds timing
//! and structured-region recovery on top.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;

use crate::error::{PipelineError, Result};
use crate::extract::{recover, Extraction};
use crate::progress::Phase;

/// A single model request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub phase: Phase,
    pub chunk_id: String,
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// System and user text as one block, for models without a system role
    /// and for trace dumps.
    pub fn render(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

/// A completed call: raw text plus whatever structure could be recovered.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub raw: String,
    pub extraction: Extraction,
    pub duration_ms: u64,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model identifier, as passed to the service.
    fn model_name(&self) -> &str;

    /// Raw completion text for `prompt`.
    async fn generate(&self, prompt: &Prompt) -> Result<String>;
}

/// Call the model and recover the structured region of its answer.
pub async fn invoke(client: &dyn ModelClient, prompt: &Prompt) -> Result<ModelReply> {
    let started = Instant::now();
    let raw = client.generate(prompt).await?;
    let extraction = recover(&raw);
    Ok(ModelReply {
        extraction,
        raw,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

type Responder = Box<dyn Fn(&Prompt) -> Result<String> + Send + Sync>;

/// Deterministic client for tests: answers from a function and records
/// every prompt it receives.
pub struct ScriptedModel {
    name: String,
    responder: Responder,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedModel {
    pub fn new<F>(name: impl Into<String>, responder: F) -> Self
    where
        F: Fn(&Prompt) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            responder: Box::new(responder),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answers with `replies` in order; fails with `ModelUnavailable` once
    /// they run out.
    pub fn queue(name: impl Into<String>, replies: Vec<String>) -> Self {
        let replies = Mutex::new(VecDeque::from(replies));
        Self::new(name, move |_| {
            replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| PipelineError::ModelUnavailable {
                    attempts: 1,
                    last_error: "scripted replies exhausted".to_string(),
                })
        })
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        (self.responder)(prompt)
    }
}
