//! Pipeline configuration.
//!
//! `PipelineConfig` is the fully resolved, immutable per-run configuration.
//! Callers supply a `PipelineOverrides` (every field optional) which is
//! merged onto the defaults and validated before any backend call is made.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::ssr::{SsrParams, ANCHOR_SETS};

/// Rating elicitation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Method {
    /// Direct Likert Rating
    Dlr,
    /// Free-text then Likert Rating
    Flr,
    /// Semantic Similarity Rating
    Ssr,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Dlr => "DLR",
            Method::Flr => "FLR",
            Method::Ssr => "SSR",
        }
    }

    /// Concurrency pool a task of this method runs in.
    pub fn stage(&self) -> &'static str {
        match self {
            Method::Dlr => "dlr",
            Method::Flr => "flr",
            Method::Ssr => "ssr",
        }
    }

    /// Pre-call token estimate handed to the rate limiter.
    pub fn estimated_tokens(&self) -> u64 {
        match self {
            Method::Dlr => 800,
            Method::Flr | Method::Ssr => 1000,
        }
    }

    /// Backend calls per sample (SSR counts its embedding call).
    pub fn calls_per_sample(&self) -> u64 {
        match self {
            Method::Dlr => 1,
            Method::Flr | Method::Ssr => 2,
        }
    }
}

impl FromStr for Method {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DLR" => Ok(Method::Dlr),
            "FLR" => Ok(Method::Flr),
            "SSR" => Ok(Method::Ssr),
            other => Err(ConfigError::UnknownMethod(other.to_string())),
        }
    }
}

impl TryFrom<String> for Method {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Method> for String {
    fn from(m: Method) -> String {
        m.as_str().to_string()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::None => "none",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Low,
    Medium,
    High,
}

impl Verbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Low => "low",
            Verbosity::Medium => "medium",
            Verbosity::High => "high",
        }
    }
}

/// Permits per concurrency pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub dlr: usize,
    pub flr: usize,
    pub ssr: usize,
    pub embed: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            dlr: 20,
            flr: 15,
            ssr: 15,
            embed: 30,
        }
    }
}

impl ConcurrencyConfig {
    /// Stage name to permit count, as consumed by the throttler.
    pub fn stages(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("dlr", self.dlr),
            ("flr", self.flr),
            ("ssr", self.ssr),
            ("embed", self.embed),
        ]
    }

    pub fn for_method(&self, method: Method) -> usize {
        match method {
            Method::Dlr => self.dlr,
            Method::Flr => self.flr,
            Method::Ssr => self.ssr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests per minute
    pub rpm: u64,
    /// Tokens per minute
    pub tpm: u64,
    /// Base delay for exponential backoff after 429/5xx
    pub retry_backoff_ms: u64,
    pub max_retries: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rpm: 500,
            tpm: 150_000,
            retry_backoff_ms: 1000,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub dlr: ReasoningEffort,
    pub flr_text: ReasoningEffort,
    pub flr_rating: ReasoningEffort,
    pub ssr_text: ReasoningEffort,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            dlr: ReasoningEffort::None,
            flr_text: ReasoningEffort::Medium,
            flr_rating: ReasoningEffort::None,
            ssr_text: ReasoningEffort::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbosityConfig {
    pub dlr: Verbosity,
    pub flr_text: Verbosity,
    pub flr_rating: Verbosity,
    pub ssr_text: Verbosity,
}

impl Default for VerbosityConfig {
    fn default() -> Self {
        Self {
            dlr: Verbosity::Low,
            flr_text: Verbosity::Medium,
            flr_rating: Verbosity::Low,
            ssr_text: Verbosity::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxTokensConfig {
    pub dlr: u32,
    pub flr_text: u32,
    pub flr_rating: u32,
    pub ssr_text: u32,
}

impl Default for MaxTokensConfig {
    fn default() -> Self {
        Self {
            dlr: 5,
            flr_text: 150,
            flr_rating: 5,
            ssr_text: 150,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsrConfig {
    pub epsilon: f64,
    pub temperature: f64,
    /// How many built-in anchor sets to average over.
    pub anchor_sets: usize,
}

impl Default for SsrConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.01,
            temperature: 1.0,
            anchor_sets: ANCHOR_SETS.len(),
        }
    }
}

impl SsrConfig {
    pub fn params(&self) -> SsrParams {
        SsrParams {
            epsilon: self.epsilon,
            temperature: self.temperature,
        }
    }
}

/// Resolved configuration for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub method: Method,
    pub n_respondents: usize,
    pub n_samples_per_respondent: usize,
    pub concurrency: ConcurrencyConfig,
    pub rate_limits: RateLimitConfig,
    pub reasoning_effort: ReasoningConfig,
    pub verbosity: VerbosityConfig,
    pub max_output_tokens: MaxTokensConfig,
    pub ssr: SsrConfig,
    pub dry_run: bool,
    pub cost_cap_usd: Option<f64>,
    pub use_cache: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            method: Method::Ssr,
            n_respondents: 200,
            n_samples_per_respondent: 2,
            concurrency: ConcurrencyConfig::default(),
            rate_limits: RateLimitConfig::default(),
            reasoning_effort: ReasoningConfig::default(),
            verbosity: VerbosityConfig::default(),
            max_output_tokens: MaxTokensConfig::default(),
            ssr: SsrConfig::default(),
            dry_run: false,
            cost_cap_usd: None,
            use_cache: true,
        }
    }
}

/// Caller-supplied partial configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOverrides {
    pub method: Option<Method>,
    pub n_respondents: Option<usize>,
    pub n_samples_per_respondent: Option<usize>,
    pub concurrency: Option<ConcurrencyConfig>,
    pub rate_limits: Option<RateLimitConfig>,
    pub reasoning_effort: Option<ReasoningConfig>,
    pub verbosity: Option<VerbosityConfig>,
    pub max_output_tokens: Option<MaxTokensConfig>,
    pub ssr: Option<SsrConfig>,
    pub dry_run: Option<bool>,
    pub cost_cap_usd: Option<f64>,
    pub use_cache: Option<bool>,
}

impl PipelineOverrides {
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(s).map_err(|e| ConfigError::Load(e.to_string()))
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(|e| ConfigError::Load(e.to_string()))
    }

    /// Reads overrides from a `.json`, `.yaml` or `.yml` file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }
}

impl PipelineConfig {
    /// Merges overrides onto the defaults and validates the result.
    pub fn from_overrides(overrides: PipelineOverrides) -> Result<Self, ConfigError> {
        let d = PipelineConfig::default();
        let config = PipelineConfig {
            method: overrides.method.unwrap_or(d.method),
            n_respondents: overrides.n_respondents.unwrap_or(d.n_respondents),
            n_samples_per_respondent: overrides
                .n_samples_per_respondent
                .unwrap_or(d.n_samples_per_respondent),
            concurrency: overrides.concurrency.unwrap_or(d.concurrency),
            rate_limits: overrides.rate_limits.unwrap_or(d.rate_limits),
            reasoning_effort: overrides.reasoning_effort.unwrap_or(d.reasoning_effort),
            verbosity: overrides.verbosity.unwrap_or(d.verbosity),
            max_output_tokens: overrides.max_output_tokens.unwrap_or(d.max_output_tokens),
            ssr: overrides.ssr.unwrap_or(d.ssr),
            dry_run: overrides.dry_run.unwrap_or(d.dry_run),
            cost_cap_usd: overrides.cost_cap_usd.or(d.cost_cap_usd),
            use_cache: overrides.use_cache.unwrap_or(d.use_cache),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid { field, reason: reason.into() }
        }

        if self.n_respondents == 0 {
            return Err(invalid("n_respondents", "must be at least 1"));
        }
        if self.n_samples_per_respondent == 0 {
            return Err(invalid("n_samples_per_respondent", "must be at least 1"));
        }
        if self.n_respondents.checked_mul(self.n_samples_per_respondent).is_none() {
            return Err(invalid(
                "n_samples_per_respondent",
                format!("{} respondents x {} samples overflows the task count", self.n_respondents, self.n_samples_per_respondent),
            ));
        }
        for (stage, permits) in self.concurrency.stages() {
            if permits == 0 {
                return Err(invalid("concurrency", format!("stage '{}' needs at least one permit", stage)));
            }
        }
        if self.rate_limits.rpm == 0 || self.rate_limits.tpm == 0 {
            return Err(invalid("rate_limits", "rpm and tpm must be positive"));
        }
        if !(self.ssr.temperature.is_finite() && self.ssr.temperature > 0.0) {
            return Err(invalid("ssr.temperature", format!("must be positive, got {}", self.ssr.temperature)));
        }
        if !(self.ssr.epsilon.is_finite() && self.ssr.epsilon >= 0.0) {
            return Err(invalid("ssr.epsilon", format!("must be non-negative, got {}", self.ssr.epsilon)));
        }
        if self.ssr.anchor_sets == 0 || self.ssr.anchor_sets > ANCHOR_SETS.len() {
            return Err(invalid(
                "ssr.anchor_sets",
                format!("must be between 1 and {}", ANCHOR_SETS.len()),
            ));
        }
        if let Some(cap) = self.cost_cap_usd {
            if !(cap.is_finite() && cap >= 0.0) {
                return Err(invalid("cost_cap_usd", format!("must be non-negative, got {}", cap)));
            }
        }
        Ok(())
    }

    /// Saturates for configs that have not been through [`Self::validate`].
    pub fn total_tasks(&self) -> usize {
        self.n_respondents.saturating_mul(self.n_samples_per_respondent)
    }
}
