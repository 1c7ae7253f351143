//! Configuration system for Sprout.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from the user config directory (`config.toml`) and/or
//! `.sprout/config.toml` in the workspace directory.

use crate::error::ConfigError;
use crate::registry::SpecialistRegistry;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SproutConfig {
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub invoker: InvokerConfig,
    /// Specialist registry file; the bundled registry is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_path: Option<PathBuf>,
}

impl SproutConfig {
    /// Load the configured registry, or the bundled one.
    pub fn load_registry(&self) -> Result<SpecialistRegistry, ConfigError> {
        match &self.registry_path {
            Some(path) => SpecialistRegistry::load(path),
            None => SpecialistRegistry::builtin(),
        }
    }

    /// All configuration problems, empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = self.routing.validate();
        problems.extend(self.synthesis.validate());
        problems
    }
}

/// Tuning knobs for routing, retries, and parallel execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Weight `k` of the mean matched-keyword length in the score.
    #[serde(default = "default_keyword_length_weight")]
    pub keyword_length_weight: f64,
    /// Retries per specialist on the single-specialist path.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Timeout for one specialist call, in milliseconds.
    #[serde(default = "default_per_call_timeout_ms")]
    pub per_call_timeout_ms: u64,
    /// Global parallel deadline as a multiple of the per-call timeout.
    #[serde(default = "default_global_deadline_factor")]
    pub global_deadline_factor: u32,
    /// Local retries per specialist on the parallel path (0 = single attempt).
    #[serde(default)]
    pub parallel_retries: u32,
    /// Whether auto mode may fan out when a query spans several domains.
    #[serde(default = "default_true")]
    pub auto_parallel: bool,
    /// Minimum fraction of the top score for a second domain to count.
    #[serde(default = "default_multi_domain_ratio")]
    pub multi_domain_ratio: f64,
    /// Minimum matched keywords for a candidate to count as its own domain.
    #[serde(default = "default_multi_domain_min_matches")]
    pub multi_domain_min_matches: usize,
    /// Upper bound on specialists dispatched by multi-domain detection.
    #[serde(default = "default_max_parallel_specialists")]
    pub max_parallel_specialists: usize,
    /// Text returned when every attempt failed without producing any text.
    #[serde(default = "default_degraded_message")]
    pub degraded_message: String,
}

fn default_true() -> bool {
    true
}
fn default_keyword_length_weight() -> f64 {
    0.1
}
fn default_max_retries() -> u32 {
    2
}
fn default_per_call_timeout_ms() -> u64 {
    30_000
}
fn default_global_deadline_factor() -> u32 {
    3
}
fn default_multi_domain_ratio() -> f64 {
    0.75
}
fn default_multi_domain_min_matches() -> usize {
    2
}
fn default_max_parallel_specialists() -> usize {
    3
}
fn default_degraded_message() -> String {
    "Sorry, we could not get a reliable answer right now. Please try again later, \
     and contact a professional if you are worried."
        .to_string()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            keyword_length_weight: default_keyword_length_weight(),
            max_retries: default_max_retries(),
            per_call_timeout_ms: default_per_call_timeout_ms(),
            global_deadline_factor: default_global_deadline_factor(),
            parallel_retries: 0,
            auto_parallel: true,
            multi_domain_ratio: default_multi_domain_ratio(),
            multi_domain_min_matches: default_multi_domain_min_matches(),
            max_parallel_specialists: default_max_parallel_specialists(),
            degraded_message: default_degraded_message(),
        }
    }
}

impl RoutingConfig {
    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    /// Deadline for a whole parallel orchestration.
    pub fn global_deadline(&self) -> Duration {
        self.per_call_timeout()
            .saturating_mul(self.global_deadline_factor.max(1))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.keyword_length_weight.is_finite() || self.keyword_length_weight < 0.0 {
            problems.push("routing.keyword_length_weight must be a non-negative number".into());
        }
        if self.per_call_timeout_ms == 0 {
            problems.push("routing.per_call_timeout_ms must be greater than zero".into());
        }
        if self.global_deadline_factor == 0 {
            problems.push("routing.global_deadline_factor must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.multi_domain_ratio) {
            problems.push("routing.multi_domain_ratio must be between 0 and 1".into());
        }
        if self.max_parallel_specialists < 2 {
            problems.push("routing.max_parallel_specialists must be at least 2".into());
        }
        problems
    }
}

/// How parallel results are merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStrategy {
    /// Deterministic template report.
    #[default]
    Template,
    /// Ask the generalist to merge sections; template on failure.
    Chairman,
}

impl std::fmt::Display for SynthesisStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SynthesisStrategy::Template => write!(f, "template"),
            SynthesisStrategy::Chairman => write!(f, "chairman"),
        }
    }
}

/// Report synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default)]
    pub strategy: SynthesisStrategy,
    /// Sentences kept from each section.
    #[serde(default = "default_summary_sentences")]
    pub summary_sentences: usize,
    /// Character cap for each section summary.
    #[serde(default = "default_max_section_chars")]
    pub max_section_chars: usize,
    /// Opposing advice phrases; a section pair containing both sides conflicts.
    #[serde(default = "default_conflict_pairs")]
    pub conflict_pairs: Vec<(String, String)>,
    /// Report opening line; `{count}` is the number of sections.
    #[serde(default = "default_header_template")]
    pub header_template: String,
    /// Opening line when only one section survived; `{name}` is its display name.
    #[serde(default = "default_single_header_template")]
    pub single_header_template: String,
    /// Line per missing domain; `{name}` is its display name.
    #[serde(default = "default_missing_template")]
    pub missing_template: String,
    /// Line per conflict; `{higher}` and `{lower}` are display names.
    #[serde(default = "default_conflict_template")]
    pub conflict_template: String,
}

fn default_summary_sentences() -> usize {
    2
}
fn default_max_section_chars() -> usize {
    400
}
fn default_conflict_pairs() -> Vec<(String, String)> {
    vec![
        ("様子を見".to_string(), "受診".to_string()),
        ("続けて".to_string(), "中止".to_string()),
        ("wait and see".to_string(), "see a doctor".to_string()),
    ]
}
fn default_header_template() -> String {
    "Combined advice from {count} specialists:".to_string()
}
fn default_single_header_template() -> String {
    "Advice from the {name} specialist:".to_string()
}
fn default_missing_template() -> String {
    "The {name} specialist's analysis could not be completed.".to_string()
}
fn default_conflict_template() -> String {
    "Where the {lower} and {higher} advice differ, follow the {higher} specialist.".to_string()
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            strategy: SynthesisStrategy::Template,
            summary_sentences: default_summary_sentences(),
            max_section_chars: default_max_section_chars(),
            conflict_pairs: default_conflict_pairs(),
            header_template: default_header_template(),
            single_header_template: default_single_header_template(),
            missing_template: default_missing_template(),
            conflict_template: default_conflict_template(),
        }
    }
}

impl SynthesisConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.summary_sentences == 0 {
            problems.push("synthesis.summary_sentences must be at least 1".into());
        }
        if !self.missing_template.contains("{name}") {
            problems.push("synthesis.missing_template must contain {name}".into());
        }
        if self
            .conflict_pairs
            .iter()
            .any(|(a, b)| a.trim().is_empty() || b.trim().is_empty())
        {
            problems.push("synthesis.conflict_pairs must not contain blank phrases".into());
        }
        problems
    }
}

/// OpenAI-compatible invocation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokerConfig {
    /// Base URL, e.g. `https://api.openai.com/v1` or a local server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Inline API key; prefer `api_key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: default_model(),
            api_key_env: default_api_key_env(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `SPROUT_`)
/// 3. Workspace-local config (`.sprout/config.toml`)
/// 4. User config (`<config dir>/sprout/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&SproutConfig>,
) -> crate::Result<SproutConfig> {
    let mut figment = Figment::from(Serialized::defaults(SproutConfig::default()));

    // User-level config
    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".sprout").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (SPROUT_ROUTING__MAX_RETRIES, SPROUT_INVOKER__MODEL, etc.)
    figment = figment.merge(Env::prefixed("SPROUT_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    Ok(figment.extract().map_err(extract_error)?)
}

/// Load configuration from one explicit file on top of defaults and environment.
pub fn load_config_file(path: &Path) -> crate::Result<SproutConfig> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    Ok(Figment::from(Serialized::defaults(SproutConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SPROUT_").split("__"))
        .extract()
        .map_err(extract_error)?)
}

fn extract_error(err: figment::Error) -> ConfigError {
    ConfigError::ParseError {
        message: err.to_string(),
    }
}

/// User-level config file location.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "sprout", "sprout")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
