//! Configuration types for extraction and the ledger.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`] and all
//! storage behaviour through [`LedgerConfig`], each built via its builder.
//! Keeping every knob in one struct makes it trivial to share configs across
//! threads, log them, and diff two runs to understand why their outputs
//! differ.
//!
//! # Design choice: builder over constructor
//! A dozen-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::error::Po2LedgerError;
use crate::progress::BatchCallback;
use std::fmt;
use std::path::PathBuf;

/// Configuration for the extraction pipeline and batch orchestration.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use po2ledger::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .api_key("AIza...")
///     .primary_model("models/gemini-flash-latest")
///     .document_pacing_secs(5)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// API key for the inference service. Required for live extraction.
    pub api_key: String,

    /// Base URL of the inference REST API.
    /// Default: `https://generativelanguage.googleapis.com/v1beta`.
    pub api_base: String,

    /// Model tried first for every document.
    /// Default: `models/gemini-flash-latest`.
    pub primary_model: String,

    /// Model switched to, at most once per document, when the primary
    /// reports "not found". Default: `models/gemini-1.5-flash-001`.
    ///
    /// The alias models rotate faster than deployments do; when an alias
    /// disappears the pinned fallback keeps the pipeline alive until the
    /// configuration catches up.
    pub fallback_model: String,

    /// Global attempt budget per document, across both models. Default: 3.
    ///
    /// Three attempts absorb one rate-limit wait or one server hiccup plus
    /// the model switch without stalling a batch for long. Terminal failures
    /// (unparseable output, unclassifiable errors) never consume retries.
    pub max_attempts: u32,

    /// Wait before retrying after a rate-limit classification, in seconds.
    /// Default: 5.
    pub rate_limit_backoff_secs: u64,

    /// Wait before retrying after a server-error classification, in seconds.
    /// Default: 2.
    ///
    /// Shorter than the rate-limit wait: 5xx responses usually clear as soon
    /// as the overloaded backend rotates, while quota windows need real time
    /// to refill.
    pub server_error_backoff_secs: u64,

    /// Pause between documents in a batch, in seconds. Default: 5.
    ///
    /// Documents are processed strictly one at a time; this pacing keeps a
    /// large upload from tripping the service's request-per-minute limits in
    /// the first place, which is cheaper than burning the attempt budget on
    /// 429s afterwards.
    pub document_pacing_secs: u64,

    /// Per-request timeout for inference calls, in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Upscaling factor applied when rasterising pages. Default: 2.0.
    ///
    /// Order forms are usually faxed or photographed; doubling the render
    /// resolution keeps small print (phone numbers, specs) legible to the
    /// vision model. Range 1.0–4.0; beyond 4× the payload size hurts more
    /// than the extra pixels help.
    pub render_scale: f32,

    /// Client-name variants of the operator's own company, excluded from
    /// `client_name` by the extraction prompt. Default: empty.
    ///
    /// Purchase orders carry both parties' names; without this list the
    /// model occasionally returns the receiving company as the client.
    pub excluded_client_keywords: Vec<String>,

    /// Custom extraction prompt. If None, the built-in prompt is composed
    /// from the field schema and `excluded_client_keywords`.
    pub extraction_prompt: Option<String>,

    /// Progress callback fired around each document. If None, progress is
    /// only visible through logs.
    pub progress_callback: Option<BatchCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            primary_model: "models/gemini-flash-latest".to_string(),
            fallback_model: "models/gemini-1.5-flash-001".to_string(),
            max_attempts: 3,
            rate_limit_backoff_secs: 5,
            server_error_backoff_secs: 2,
            document_pacing_secs: 5,
            api_timeout_secs: 60,
            render_scale: 2.0,
            excluded_client_keywords: Vec::new(),
            extraction_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("api_key", &mask(&self.api_key))
            .field("api_base", &self.api_base)
            .field("primary_model", &self.primary_model)
            .field("fallback_model", &self.fallback_model)
            .field("max_attempts", &self.max_attempts)
            .field("rate_limit_backoff_secs", &self.rate_limit_backoff_secs)
            .field("server_error_backoff_secs", &self.server_error_backoff_secs)
            .field("document_pacing_secs", &self.document_pacing_secs)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("render_scale", &self.render_scale)
            .field("excluded_client_keywords", &self.excluded_client_keywords)
            .field("extraction_prompt", &self.extraction_prompt.as_deref().map(|_| "<custom>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.config.api_base = base.into();
        self
    }

    pub fn primary_model(mut self, model: impl Into<String>) -> Self {
        self.config.primary_model = model.into();
        self
    }

    pub fn fallback_model(mut self, model: impl Into<String>) -> Self {
        self.config.fallback_model = model.into();
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn rate_limit_backoff_secs(mut self, secs: u64) -> Self {
        self.config.rate_limit_backoff_secs = secs;
        self
    }

    pub fn server_error_backoff_secs(mut self, secs: u64) -> Self {
        self.config.server_error_backoff_secs = secs;
        self
    }

    pub fn document_pacing_secs(mut self, secs: u64) -> Self {
        self.config.document_pacing_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale.clamp(1.0, 4.0);
        self
    }

    pub fn excluded_client_keywords(mut self, keywords: Vec<String>) -> Self {
        self.config.excluded_client_keywords = keywords;
        self
    }

    pub fn exclude_client_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.config.excluded_client_keywords.push(keyword.into());
        self
    }

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, callback: BatchCallback) -> Self {
        self.config.progress_callback = Some(callback);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, Po2LedgerError> {
        let c = &self.config;
        if c.api_key.trim().is_empty() {
            return Err(Po2LedgerError::InvalidConfig(
                "api_key is required (set GEMINI_API_KEY or use .api_key(...))".into(),
            ));
        }
        if c.api_base.trim().is_empty() {
            return Err(Po2LedgerError::InvalidConfig("api_base must not be empty".into()));
        }
        if c.primary_model.trim().is_empty() || c.fallback_model.trim().is_empty() {
            return Err(Po2LedgerError::InvalidConfig(
                "primary_model and fallback_model must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Configuration for the dual-backend ledger.
///
/// With no `remote_token` the remote backend reports itself not configured
/// and the ledger runs local-only (degraded mode, not an error).
#[derive(Clone)]
pub struct LedgerConfig {
    /// Full URL of the hosted spreadsheet. Takes precedence over
    /// `sheet_name` when set.
    pub sheet_url: Option<String>,

    /// Well-known document name used to look up, or create, the hosted
    /// spreadsheet when no URL is configured. Default: `po_ledger`.
    pub sheet_name: String,

    /// OAuth bearer token for the hosted spreadsheet service.
    pub remote_token: Option<String>,

    /// E-mail granted write access when the spreadsheet is created by this
    /// crate. Sharing is best-effort; a failure only logs.
    pub admin_email: Option<String>,

    /// Path of the local CSV store. Default: `po_database.csv`.
    pub local_path: PathBuf,

    /// Per-request timeout for remote-store calls, in seconds. Default: 30.
    pub http_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            sheet_url: None,
            sheet_name: "po_ledger".to_string(),
            remote_token: None,
            admin_email: None,
            local_path: PathBuf::from("po_database.csv"),
            http_timeout_secs: 30,
        }
    }
}

impl fmt::Debug for LedgerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerConfig")
            .field("sheet_url", &self.sheet_url)
            .field("sheet_name", &self.sheet_name)
            .field("remote_token", &self.remote_token.as_deref().map(mask))
            .field("admin_email", &self.admin_email)
            .field("local_path", &self.local_path)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}

impl LedgerConfig {
    /// Create a new builder for `LedgerConfig`.
    pub fn builder() -> LedgerConfigBuilder {
        LedgerConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`LedgerConfig`].
#[derive(Debug)]
pub struct LedgerConfigBuilder {
    config: LedgerConfig,
}

impl LedgerConfigBuilder {
    pub fn sheet_url(mut self, url: impl Into<String>) -> Self {
        self.config.sheet_url = Some(url.into());
        self
    }

    pub fn sheet_name(mut self, name: impl Into<String>) -> Self {
        self.config.sheet_name = name.into();
        self
    }

    pub fn remote_token(mut self, token: impl Into<String>) -> Self {
        self.config.remote_token = Some(token.into());
        self
    }

    pub fn admin_email(mut self, email: impl Into<String>) -> Self {
        self.config.admin_email = Some(email.into());
        self
    }

    pub fn local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.local_path = path.into();
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http_timeout_secs = secs.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<LedgerConfig, Po2LedgerError> {
        let c = &self.config;
        if c.sheet_name.trim().is_empty() {
            return Err(Po2LedgerError::InvalidConfig(
                "sheet_name must not be empty".into(),
            ));
        }
        if c.local_path.as_os_str().is_empty() {
            return Err(Po2LedgerError::InvalidConfig(
                "local_path must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Secrets never reach Debug output whole.
fn mask(secret: &str) -> String {
    if secret.is_empty() {
        "<unset>".to_string()
    } else {
        format!("<{} chars>", secret.len())
    }
}
