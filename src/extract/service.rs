//! Optional hosted extraction service and its rate-limit gate.
//!
//! The HTTP client speaks the OpenAI-compatible chat-completions protocol
//! (LM Studio, llama.cpp server, hosted gateways). Every call goes through
//! a [`ServiceGate`] that spaces requests, backs off on rate limiting and
//! trips a circuit breaker once retries are exhausted.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::StructuredExtraction;
use crate::config::ExtractionConfig;
use crate::error::{FaultlineError, Result};
use crate::utils::truncate_chars;

const SERVICE_NAME: &str = "extraction service";
const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 1000;
const SYSTEM_PROMPT: &str = "You are a bug report analyzer. Return only valid JSON.";

/// A structured-extraction backend.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    fn name(&self) -> &str;

    /// False once the service has been disabled for this process.
    fn is_available(&self) -> bool {
        true
    }

    async fn extract(&self, text: &str) -> Result<StructuredExtraction>;
}

// ---------------------------------------------------------------------------
// Rate-limit gate
// ---------------------------------------------------------------------------

/// Spacing, backoff and circuit-breaker state for one external service.
///
/// Owned by the service client and shared through an `Arc`; once tripped
/// it stays open for the lifetime of the gate.
#[derive(Debug)]
pub struct ServiceGate {
    min_interval: Duration,
    max_retries: u32,
    initial_backoff: Duration,
    last_call: Mutex<Option<Instant>>,
    open: AtomicBool,
}

impl ServiceGate {
    pub fn new(min_interval: Duration, max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            min_interval,
            max_retries,
            initial_backoff,
            last_call: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(
            Duration::from_millis(config.min_interval_ms),
            config.max_retries,
            Duration::from_millis(config.initial_backoff_ms),
        )
    }

    /// Whether the breaker has tripped.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn trip(&self) {
        self.open.store(true, Ordering::Release);
    }

    /// Backoff before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `op` under the gate.
    ///
    /// `RateLimited` results are retried with exponential backoff up to
    /// `max_retries` times, after which the breaker trips and
    /// `CircuitOpen` is returned. Other errors are returned unchanged.
    /// Dropping the returned future while a rate limit is still pending
    /// (an outer timeout firing mid-backoff) also trips the breaker.
    pub async fn run<T, F, Fut>(&self, service: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut pending = PendingRateLimit {
            gate: self,
            service,
            armed: false,
        };
        let mut attempt = 0;
        loop {
            if self.is_open() {
                pending.armed = false;
                return Err(FaultlineError::circuit_open(service));
            }
            self.wait_turn().await;

            match op().await {
                Err(FaultlineError::RateLimited { .. }) if attempt < self.max_retries => {
                    pending.armed = true;
                    let wait = self.backoff(attempt);
                    debug!(service, attempt, wait_ms = wait.as_millis() as u64, "rate limited; backing off");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(FaultlineError::RateLimited { .. }) => {
                    pending.armed = false;
                    warn!(service, retries = attempt, "rate limit persists; disabling service");
                    self.trip();
                    return Err(FaultlineError::circuit_open(service));
                }
                other => {
                    pending.armed = false;
                    return other;
                }
            }
        }
    }

    async fn wait_turn(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Trips the gate if a [`ServiceGate::run`] call is abandoned while the
/// service is still rate limiting it.
struct PendingRateLimit<'a> {
    gate: &'a ServiceGate,
    service: &'a str,
    armed: bool,
}

impl Drop for PendingRateLimit<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(service = self.service, "call abandoned while rate limited; disabling service");
            self.gate.trip();
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Chat-completions extraction client.
pub struct HttpExtractionService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout_ms: u64,
    gate: Arc<ServiceGate>,
}

impl HttpExtractionService {
    pub fn new(config: &ExtractionConfig, gate: Arc<ServiceGate>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| FaultlineError::config_with_source("failed to build HTTP client", e))?;
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.trim().is_empty());
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            timeout_ms: config.timeout_ms,
            gate,
        })
    }

    pub fn gate(&self) -> &Arc<ServiceGate> {
        &self.gate
    }

    async fn request(&self, text: &str) -> Result<StructuredExtraction> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: SYSTEM_PROMPT.into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: prompt(text),
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FaultlineError::timeout(SERVICE_NAME, self.timeout_ms)
            } else {
                FaultlineError::external(SERVICE_NAME, e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(FaultlineError::rate_limited(SERVICE_NAME));
        }
        let raw = response
            .text()
            .await
            .map_err(|e| FaultlineError::external(SERVICE_NAME, e.to_string()))?;
        if !status.is_success() {
            return Err(FaultlineError::external(
                SERVICE_NAME,
                format!("HTTP {status}: {}", truncate_chars(raw.trim(), 200)),
            ));
        }

        let parsed: ChatResponse = serde_json::from_str(&raw)
            .map_err(|e| FaultlineError::external(SERVICE_NAME, format!("bad response: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| FaultlineError::external(SERVICE_NAME, "response has no choices"))?;
        parse_extraction(&content)
    }
}

#[async_trait]
impl ExtractionService for HttpExtractionService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn is_available(&self) -> bool {
        !self.gate.is_open()
    }

    async fn extract(&self, text: &str) -> Result<StructuredExtraction> {
        self.gate.run(SERVICE_NAME, || self.request(text)).await
    }
}

fn prompt(text: &str) -> String {
    format!(
        "Extract key information from this bug report and return ONLY a JSON object with:\n\
         - summary: brief summary\n\
         - error_type: type of error\n\
         - keywords: list of technical keywords\n\
         - potential_classes: list of class names that might be related\n\
         - potential_methods: list of method names that might be related\n\
         - stack_trace_classes: classes from the stack trace\n\n\
         Bug report:\n{text}\n\nReturn only JSON:"
    )
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

/// Parse a model reply into a [`StructuredExtraction`].
pub fn parse_extraction(content: &str) -> Result<StructuredExtraction> {
    let json = extract_json_object(content)
        .ok_or_else(|| FaultlineError::external(SERVICE_NAME, "no JSON object in reply"))?;
    serde_json::from_str(json)
        .map_err(|e| FaultlineError::external(SERVICE_NAME, format!("malformed extraction: {e}")))
}

fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    clean.strip_suffix("```").unwrap_or(clean).trim()
}

/// Outermost balanced `{...}`, ignoring braces inside strings.
fn extract_json_object(text: &str) -> Option<&str> {
    let text = strip_markdown_fences(text);
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = None;

    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            _ if in_string => {}
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|s| &text[s..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
