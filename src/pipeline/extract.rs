//! Vision-model interaction: send page images, get back one structured record.
//!
//! This module owns the only network I/O in the pipeline. Prompt text lives
//! in [`crate::prompts`] so it can be changed without touching retry or
//! error-handling logic here.
//!
//! ## Retry Strategy
//!
//! Every failure is first classified (see [`ExtractionErrorKind`]), then a
//! pure transition function decides what happens next:
//!
//! * **not found** on the primary model switches to the fallback model, once;
//!   on the fallback it is terminal
//! * **rate limited** waits and retries on the same model
//! * **server error** waits (a shorter time) and retries on the same model
//! * **unparseable output** and **unknown** errors are terminal immediately,
//!   retrying a reply the model already got wrong just burns quota
//!
//! One attempt budget (`max_attempts`, default 3) spans both models, so a
//! document can never hold a batch hostage with an unbounded retry loop.

use crate::config::PipelineConfig;
use crate::error::{ExtractionErrorKind, Po2LedgerError, Result};
use crate::pipeline::encode::EncodedPage;
use crate::prompts::build_extraction_prompt;
use crate::record::StructuredRecord;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// A transport failure that has already been classified.
#[derive(Debug, Clone)]
pub struct ClassifiedFailure {
    pub kind: ExtractionErrorKind,
    pub detail: String,
}

impl fmt::Display for ClassifiedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// Terminal failure of a whole extraction, all attempts spent.
///
/// Carries no filename; the batch layer adds it when building the
/// per-document error, since only the batch knows which file it fed in.
#[derive(Debug, Clone)]
pub struct ExtractionFailure {
    /// Model used on the last attempt.
    pub model: String,
    pub kind: ExtractionErrorKind,
    /// Attempts actually consumed, across both models.
    pub attempts: u32,
    pub detail: String,
}

/// A successful extraction.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Decoded record, `used_model` already stamped.
    pub record: StructuredRecord,

    /// Attempts consumed, across both models.
    pub attempts: u32,
}

/// Raw model access: one request, one reply, failure already classified.
///
/// The production implementation is [`GeminiTransport`]; tests inject
/// scripted transports to drive the retry machinery without a network.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        pages: &[EncodedPage],
    ) -> std::result::Result<String, ClassifiedFailure>;
}

/// Which model the next attempt will use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelState {
    Primary,
    Fallback,
}

/// What the retry loop does after a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Wait, then try the same model again.
    Retry { backoff: Duration },
    /// Move to the fallback model immediately, no wait.
    SwitchModel,
    /// Stop now, remaining budget notwithstanding.
    Terminal,
}

/// Transition function of the retry state machine. Pure, so the whole
/// failure-handling policy is testable as a table.
fn next_step(
    state: ModelState,
    kind: ExtractionErrorKind,
    rate_limit_backoff: Duration,
    server_error_backoff: Duration,
) -> Disposition {
    match (kind, state) {
        (ExtractionErrorKind::NotFound, ModelState::Primary) => Disposition::SwitchModel,
        (ExtractionErrorKind::NotFound, ModelState::Fallback) => Disposition::Terminal,
        (ExtractionErrorKind::RateLimited, _) => Disposition::Retry {
            backoff: rate_limit_backoff,
        },
        (ExtractionErrorKind::ServerError, _) => Disposition::Retry {
            backoff: server_error_backoff,
        },
        (ExtractionErrorKind::ParseError, _) | (ExtractionErrorKind::Unknown, _) => {
            Disposition::Terminal
        }
    }
}

/// Drives the model-fallback and retry state machine over a [`ModelTransport`].
pub struct ExtractionClient {
    transport: Arc<dyn ModelTransport>,
    prompt: String,
    config: PipelineConfig,
}

impl ExtractionClient {
    /// Build a client backed by the hosted inference REST API.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let transport = Arc::new(GeminiTransport::new(config)?);
        Ok(Self::with_transport(transport, config))
    }

    /// Build a client over a caller-supplied transport.
    pub fn with_transport(transport: Arc<dyn ModelTransport>, config: &PipelineConfig) -> Self {
        let prompt = match &config.extraction_prompt {
            Some(custom) => custom.clone(),
            None => build_extraction_prompt(&config.excluded_client_keywords),
        };
        Self {
            transport,
            prompt,
            config: config.clone(),
        }
    }

    fn model_for(&self, state: ModelState) -> &str {
        match state {
            ModelState::Primary => &self.config.primary_model,
            ModelState::Fallback => &self.config.fallback_model,
        }
    }

    /// Extract one structured record from a document's encoded pages.
    ///
    /// Returns the decoded record with `used_model` stamped, or the last
    /// classified failure once the attempt budget is spent or a terminal
    /// failure occurs.
    pub async fn extract(
        &self,
        pages: &[EncodedPage],
    ) -> std::result::Result<Extraction, ExtractionFailure> {
        let budget = self.config.max_attempts;
        let rate_backoff = Duration::from_secs(self.config.rate_limit_backoff_secs);
        let server_backoff = Duration::from_secs(self.config.server_error_backoff_secs);

        let mut state = ModelState::Primary;
        let mut wait_before: Option<Duration> = None;
        let mut last: Option<(String, ClassifiedFailure)> = None;
        let mut attempts_used = 0;

        for attempt in 1..=budget {
            if let Some(backoff) = wait_before.take() {
                warn!("Waiting {:?} before attempt {}/{}", backoff, attempt, budget);
                sleep(backoff).await;
            }
            attempts_used = attempt;
            let model = self.model_for(state);
            debug!("Attempt {}/{} using model '{}'", attempt, budget, model);

            let failure = match self.transport.generate(model, &self.prompt, pages).await {
                Ok(reply) => match decode_record(&reply) {
                    Ok(mut record) => {
                        record.used_model = model.to_string();
                        info!(
                            "Extraction succeeded on '{}' after {} attempt(s): {} item(s)",
                            model,
                            attempt,
                            record.items.len()
                        );
                        return Ok(Extraction {
                            record,
                            attempts: attempt,
                        });
                    }
                    Err(detail) => ClassifiedFailure {
                        kind: ExtractionErrorKind::ParseError,
                        detail,
                    },
                },
                Err(failure) => failure,
            };

            warn!(
                "Attempt {}/{} on '{}' failed: {}",
                attempt, budget, model, failure
            );
            let disposition = next_step(state, failure.kind, rate_backoff, server_backoff);
            last = Some((model.to_string(), failure));

            match disposition {
                Disposition::SwitchModel => {
                    info!("Model not found, switching to fallback '{}'", self.config.fallback_model);
                    state = ModelState::Fallback;
                }
                Disposition::Retry { backoff } => {
                    wait_before = Some(backoff);
                }
                Disposition::Terminal => break,
            }
        }

        let (model, failure) = last.unwrap_or_else(|| {
            (
                self.model_for(state).to_string(),
                ClassifiedFailure {
                    kind: ExtractionErrorKind::Unknown,
                    detail: "no attempts were made".to_string(),
                },
            )
        });

        Err(ExtractionFailure {
            model,
            kind: failure.kind,
            attempts: attempts_used,
            detail: failure.detail,
        })
    }
}

// ── Reply decoding ───────────────────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```(?:json|JSON)?\s*\n(.*?)\n?\s*```\s*$").unwrap()
});

/// Strip one outer markdown code fence, if the whole reply is fenced.
///
/// Models wrap JSON in ```json fences no matter how firmly the prompt says
/// not to. Only a fence spanning the entire reply is stripped; fences inside
/// a remark field must survive.
fn strip_code_fences(text: &str) -> &str {
    match RE_OUTER_FENCE.captures(text) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(text).trim(),
        None => text.trim(),
    }
}

/// Find the first balanced `{ ... }` object in the text, respecting strings
/// and escapes, for replies that wrap the JSON in prose.
fn extract_first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Decode a model reply into a [`StructuredRecord`].
///
/// Tries the fence-stripped reply as JSON first, then falls back to the
/// first balanced object found inside it.
fn decode_record(reply: &str) -> std::result::Result<StructuredRecord, String> {
    let stripped = strip_code_fences(reply);

    let direct_err = match serde_json::from_str::<StructuredRecord>(stripped) {
        Ok(record) => return Ok(record),
        Err(e) => e,
    };

    if let Some(object) = extract_first_json_object(stripped) {
        return serde_json::from_str::<StructuredRecord>(object)
            .map_err(|e| format!("embedded JSON object did not decode: {e}"));
    }

    Err(format!("reply contained no decodable JSON object: {direct_err}"))
}

// ── Hosted inference transport ───────────────────────────────────────────

/// Transport for the `generateContent` REST endpoint of the hosted
/// inference API.
pub struct GeminiTransport {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl GeminiTransport {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| Po2LedgerError::Internal(format!("HTTP client build failed: {e}")))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ModelTransport for GeminiTransport {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        pages: &[EncodedPage],
    ) -> std::result::Result<String, ClassifiedFailure> {
        // The key travels as a query parameter; never log the full URL.
        let url = format!(
            "{}/{}:generateContent?key={}",
            self.api_base, model, self.api_key
        );

        let mut parts = vec![json!({ "text": prompt })];
        for page in pages {
            parts.push(json!({
                "inline_data": {
                    "mime_type": "image/png",
                    "data": page.png_base64,
                }
            }));
        }
        let body = json!({ "contents": [{ "parts": parts }] });

        debug!("POST generateContent model='{}' pages={}", model, pages.len());
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifiedFailure {
                kind: ExtractionErrorKind::Unknown,
                detail: format!("request failed: {e}"),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ClassifiedFailure {
            kind: ExtractionErrorKind::Unknown,
            detail: format!("reading reply body failed: {e}"),
        })?;

        if !status.is_success() {
            return Err(classify_http_failure(status.as_u16(), &text));
        }

        let envelope: Value = serde_json::from_str(&text).map_err(|e| ClassifiedFailure {
            kind: ExtractionErrorKind::Unknown,
            detail: format!("reply envelope was not JSON: {e}"),
        })?;

        let reply = envelope
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ClassifiedFailure {
                kind: ExtractionErrorKind::Unknown,
                detail: format!("reply envelope missing candidates: {}", snippet(&text)),
            })?;

        Ok(reply)
    }
}

/// Map an HTTP failure onto an [`ExtractionErrorKind`].
///
/// Status codes decide when they can; otherwise well-known markers in the
/// body do. 4xx codes other than 404/429 often carry a quota or routing
/// message worth classifying instead of giving up as unknown.
fn classify_http_failure(status: u16, body: &str) -> ClassifiedFailure {
    let detail = format!("HTTP {status}: {}", snippet(body));
    let kind = match status {
        404 => ExtractionErrorKind::NotFound,
        429 => ExtractionErrorKind::RateLimited,
        500..=599 => ExtractionErrorKind::ServerError,
        _ => {
            let lower = body.to_lowercase();
            if lower.contains("not found") {
                ExtractionErrorKind::NotFound
            } else if lower.contains("quota") || lower.contains("rate") {
                ExtractionErrorKind::RateLimited
            } else if lower.contains("internal") {
                ExtractionErrorKind::ServerError
            } else {
                ExtractionErrorKind::Unknown
            }
        }
    };
    ClassifiedFailure { kind, detail }
}

/// First 200 characters of a reply body, for error details.
fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= 200 {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(200).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    // ── Transition table ─────────────────────────────────────────────────

    #[test]
    fn transition_table_is_exactly_the_documented_policy() {
        use Disposition::*;
        use ExtractionErrorKind::*;
        use ModelState::*;

        let rate = Duration::from_secs(5);
        let server = Duration::from_secs(2);
        let cases = [
            (Primary, NotFound, SwitchModel),
            (Fallback, NotFound, Terminal),
            (Primary, RateLimited, Retry { backoff: rate }),
            (Fallback, RateLimited, Retry { backoff: rate }),
            (Primary, ServerError, Retry { backoff: server }),
            (Fallback, ServerError, Retry { backoff: server }),
            (Primary, ParseError, Terminal),
            (Fallback, ParseError, Terminal),
            (Primary, Unknown, Terminal),
            (Fallback, Unknown, Terminal),
        ];
        for (state, kind, expected) in cases {
            assert_eq!(
                next_step(state, kind, rate, server),
                expected,
                "state={state:?} kind={kind:?}"
            );
        }
    }

    // ── Reply decoding ───────────────────────────────────────────────────

    #[test]
    fn strip_fences_handles_common_wrappings() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(
            strip_code_fences("  ```JSON\n{\"a\":1}\n```  \n"),
            "{\"a\":1}"
        );
    }

    #[test]
    fn fences_inside_the_reply_survive() {
        let text = "{\"remarks\":\"use ``` for code\"}";
        assert_eq!(strip_code_fences(text), text);
    }

    #[test]
    fn first_object_is_found_through_prose_and_strings() {
        let text = "Here is the data: {\"a\": {\"b\": \"}\"}, \"c\": 1} hope it helps";
        assert_eq!(
            extract_first_json_object(text),
            Some("{\"a\": {\"b\": \"}\"}, \"c\": 1}")
        );
        assert_eq!(extract_first_json_object("no object here"), None);
        assert_eq!(extract_first_json_object("{\"unterminated\": "), None);
    }

    #[test]
    fn decode_accepts_full_and_minimal_records() {
        let full = r#"{"order_date":"2024-05-20","client_name":"OO건설","phone_number":"010-1234-5678","address":"서울","consignee":"홍길동","payment_type":"월말","remarks":"","items":[{"item_name":"단열재","spec":"50T","qty":10}]}"#;
        let record = decode_record(full).unwrap();
        assert_eq!(record.client_name, "OO건설");
        assert_eq!(record.items.len(), 1);
        assert_eq!(record.items[0].qty, 10);

        let minimal = decode_record("{}").unwrap();
        assert_eq!(minimal.order_date, "");
        assert!(minimal.items.is_empty());
    }

    #[test]
    fn decode_recovers_from_fences_and_prose() {
        let fenced = "```json\n{\"client_name\":\"A\"}\n```";
        assert_eq!(decode_record(fenced).unwrap().client_name, "A");

        let prose = "Sure! The extracted order is {\"client_name\":\"B\"} as requested.";
        assert_eq!(decode_record(prose).unwrap().client_name, "B");

        let garbage = decode_record("I could not read the document.");
        assert!(garbage.is_err());
    }

    // ── HTTP classification ──────────────────────────────────────────────

    #[test]
    fn http_status_classification() {
        assert_eq!(
            classify_http_failure(404, "").kind,
            ExtractionErrorKind::NotFound
        );
        assert_eq!(
            classify_http_failure(429, "").kind,
            ExtractionErrorKind::RateLimited
        );
        assert_eq!(
            classify_http_failure(503, "").kind,
            ExtractionErrorKind::ServerError
        );
        assert_eq!(
            classify_http_failure(400, "model xyz was not found").kind,
            ExtractionErrorKind::NotFound
        );
        assert_eq!(
            classify_http_failure(400, "quota exceeded for project").kind,
            ExtractionErrorKind::RateLimited
        );
        assert_eq!(
            classify_http_failure(400, "invalid argument").kind,
            ExtractionErrorKind::Unknown
        );
        assert!(classify_http_failure(429, "slow down").detail.contains("HTTP 429"));
    }

    #[test]
    fn snippet_truncates_long_bodies_on_char_boundaries() {
        let long = "에".repeat(500);
        let s = snippet(&long);
        assert!(s.chars().count() <= 201);
        assert!(s.ends_with('…'));
    }

    // ── Driver ───────────────────────────────────────────────────────────

    struct ScriptedTransport {
        replies: Mutex<VecDeque<std::result::Result<String, ClassifiedFailure>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(
            replies: Vec<std::result::Result<String, ClassifiedFailure>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelTransport for ScriptedTransport {
        async fn generate(
            &self,
            model: &str,
            _prompt: &str,
            _pages: &[EncodedPage],
        ) -> std::result::Result<String, ClassifiedFailure> {
            self.calls.lock().unwrap().push(model.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted transport ran out of replies")
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            rate_limit_backoff_secs: 0,
            server_error_backoff_secs: 0,
            ..PipelineConfig::default()
        }
    }

    fn failure(kind: ExtractionErrorKind) -> ClassifiedFailure {
        ClassifiedFailure {
            kind,
            detail: "scripted".to_string(),
        }
    }

    #[tokio::test]
    async fn not_found_switches_to_fallback_exactly_once() {
        let transport = ScriptedTransport::new(vec![
            Err(failure(ExtractionErrorKind::NotFound)),
            Ok("{\"client_name\":\"A\"}".to_string()),
        ]);
        let config = fast_config();
        let client = ExtractionClient::with_transport(transport.clone(), &config);

        let extraction = client.extract(&[]).await.unwrap();
        assert_eq!(extraction.attempts, 2);
        assert_eq!(extraction.record.used_model, config.fallback_model);
        assert_eq!(
            transport.calls(),
            vec![config.primary_model.clone(), config.fallback_model.clone()]
        );
    }

    #[tokio::test]
    async fn not_found_on_fallback_is_terminal() {
        let transport = ScriptedTransport::new(vec![
            Err(failure(ExtractionErrorKind::NotFound)),
            Err(failure(ExtractionErrorKind::NotFound)),
        ]);
        let config = fast_config();
        let client = ExtractionClient::with_transport(transport.clone(), &config);

        let err = client.extract(&[]).await.unwrap_err();
        assert_eq!(err.kind, ExtractionErrorKind::NotFound);
        assert_eq!(err.attempts, 2);
        assert_eq!(err.model, config.fallback_model);
        // Budget is 3 but the second NotFound must stop the loop.
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn rate_limits_retry_until_the_budget_is_spent() {
        let transport = ScriptedTransport::new(vec![
            Err(failure(ExtractionErrorKind::RateLimited)),
            Err(failure(ExtractionErrorKind::RateLimited)),
            Err(failure(ExtractionErrorKind::RateLimited)),
        ]);
        let config = fast_config();
        let client = ExtractionClient::with_transport(transport.clone(), &config);

        let err = client.extract(&[]).await.unwrap_err();
        assert_eq!(err.kind, ExtractionErrorKind::RateLimited);
        assert_eq!(err.attempts, 3);
        // Same model throughout, never switched.
        assert!(transport.calls().iter().all(|m| *m == config.primary_model));
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn unparseable_reply_is_terminal_after_one_attempt() {
        let transport =
            ScriptedTransport::new(vec![Ok("I could not read this document.".to_string())]);
        let config = fast_config();
        let client = ExtractionClient::with_transport(transport.clone(), &config);

        let err = client.extract(&[]).await.unwrap_err();
        assert_eq!(err.kind, ExtractionErrorKind::ParseError);
        assert_eq!(err.attempts, 1);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn server_error_retries_on_the_same_model() {
        let transport = ScriptedTransport::new(vec![
            Err(failure(ExtractionErrorKind::ServerError)),
            Ok("{\"client_name\":\"C\"}".to_string()),
        ]);
        let config = fast_config();
        let client = ExtractionClient::with_transport(transport.clone(), &config);

        let extraction = client.extract(&[]).await.unwrap();
        assert_eq!(extraction.attempts, 2);
        assert_eq!(extraction.record.used_model, config.primary_model);
        assert!(transport.calls().iter().all(|m| *m == config.primary_model));
    }

    #[tokio::test]
    async fn custom_prompt_overrides_the_default() {
        let transport = ScriptedTransport::new(vec![Ok("{}".to_string())]);
        let config = PipelineConfig {
            extraction_prompt: Some("CUSTOM".to_string()),
            ..fast_config()
        };
        let client = ExtractionClient::with_transport(transport, &config);
        assert_eq!(client.prompt, "CUSTOM");
    }
}
