//! Mock generation backend for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use evidentia_inference::mock::MockGenerationBackend;
//!
//! let backend = MockGenerationBackend::new()
//!     .with_fixed_response(r#"{"narrative": "ok", "confidence": "high", "missing_steps": []}"#);
//! ```
//!
//! Responses are chosen in this order: a queued response, the responder
//! closure, the failure message, the fixed response.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use evidentia_core::{Error, GenerationBackend, Result};

type Responder = dyn Fn(&str, &str) -> Result<String> + Send + Sync;

/// Mock generation backend for testing.
#[derive(Clone)]
pub struct MockGenerationBackend {
    config: Arc<MockConfig>,
    queued: Arc<Mutex<VecDeque<Result<String>>>>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

#[derive(Clone)]
struct MockConfig {
    model: String,
    default_response: String,
    failure: Option<String>,
    latency_ms: u64,
    responder: Option<Arc<Responder>>,
}

/// One recorded call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub system: String,
    pub prompt: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            model: "mock-model".to_string(),
            default_response: "{}".to_string(),
            failure: None,
            latency_ms: 0,
            responder: None,
        }
    }
}

impl MockGenerationBackend {
    /// Create a new mock backend with default configuration.
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            queued: Arc::new(Mutex::new(VecDeque::new())),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set the response returned when nothing else applies.
    pub fn with_fixed_response(mut self, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).default_response = response.into();
        self
    }

    /// Compute responses from `(system, prompt)`.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String> + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.config).responder = Some(Arc::new(responder));
        self
    }

    /// Fail every call with an inference error.
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).failure = Some(message.into());
        self
    }

    /// Set simulated latency for every call.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency_ms = latency_ms;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).model = model.into();
        self
    }

    /// Queue a one-shot response, consumed before any other rule.
    pub fn push_response(&self, response: Result<String>) {
        self.queued.lock().unwrap().push_back(response);
    }

    /// Get all logged calls for assertion.
    pub fn calls(&self) -> Vec<MockCall> {
        self.call_log.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    /// Clear the call log.
    pub fn clear_calls(&self) {
        self.call_log.lock().unwrap().clear()
    }
}

impl Default for MockGenerationBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate_json(&self, system: &str, prompt: &str) -> Result<String> {
        self.call_log.lock().unwrap().push(MockCall {
            system: system.to_string(),
            prompt: prompt.to_string(),
        });

        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        if let Some(queued) = self.queued.lock().unwrap().pop_front() {
            return queued;
        }
        if let Some(responder) = &self.config.responder {
            return responder(system, prompt);
        }
        if let Some(message) = &self.config.failure {
            return Err(Error::Inference(message.clone()));
        }
        Ok(self.config.default_response.clone())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
