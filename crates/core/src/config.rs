use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_COMPLETIONS_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub ledger: LedgerConfig,
    pub reminders: ReminderConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub models: Vec<String>,
    pub request_timeout_secs: u64,
    pub total_budget_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub site_url: Option<String>,
    pub site_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    pub pending_tab: String,
    pub history_tab: String,
    pub max_per_day: u32,
    pub cadence_days: u32,
    pub search_window_days: u32,
    pub rounding_unit: u32,
    /// Largest installment count a plan may have.
    pub max_installments: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReminderConfig {
    pub lead_minutes: u32,
    pub search_window_days: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_models: Option<Vec<String>>,
    pub llm_total_budget_secs: Option<u64>,
    pub ledger_max_per_day: Option<u32>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            ledger: LedgerConfig::default(),
            reminders: ReminderConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new().into(),
            base_url: DEFAULT_COMPLETIONS_URL.to_string(),
            models: vec![
                "google/gemini-2.0-flash-exp:free".to_string(),
                "meta-llama/llama-3.2-3b-instruct:free".to_string(),
                "microsoft/phi-3-mini-128k-instruct:free".to_string(),
                "qwen/qwen-2-7b-instruct:free".to_string(),
                "anthropic/claude-3-haiku:free".to_string(),
            ],
            request_timeout_secs: 25,
            total_budget_secs: 180,
            max_tokens: 512,
            temperature: 0.0,
            site_url: None,
            site_name: None,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            pending_tab: "Deuda Pendiente".to_string(),
            history_tab: "Historial de Pagos".to_string(),
            max_per_day: 3,
            cadence_days: 30,
            search_window_days: 45,
            rounding_unit: 50,
            max_installments: 60,
        }
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self { lead_minutes: 24 * 60, search_window_days: 90 }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("payplan.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(api_key_value) = llm.api_key {
                self.llm.api_key = secret_value(api_key_value);
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(models) = llm.models {
                self.llm.models = models;
            }
            if let Some(request_timeout_secs) = llm.request_timeout_secs {
                self.llm.request_timeout_secs = request_timeout_secs;
            }
            if let Some(total_budget_secs) = llm.total_budget_secs {
                self.llm.total_budget_secs = total_budget_secs;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(site_url) = llm.site_url {
                self.llm.site_url = Some(site_url);
            }
            if let Some(site_name) = llm.site_name {
                self.llm.site_name = Some(site_name);
            }
        }

        if let Some(ledger) = patch.ledger {
            if let Some(pending_tab) = ledger.pending_tab {
                self.ledger.pending_tab = pending_tab;
            }
            if let Some(history_tab) = ledger.history_tab {
                self.ledger.history_tab = history_tab;
            }
            if let Some(max_per_day) = ledger.max_per_day {
                self.ledger.max_per_day = max_per_day;
            }
            if let Some(cadence_days) = ledger.cadence_days {
                self.ledger.cadence_days = cadence_days;
            }
            if let Some(search_window_days) = ledger.search_window_days {
                self.ledger.search_window_days = search_window_days;
            }
            if let Some(rounding_unit) = ledger.rounding_unit {
                self.ledger.rounding_unit = rounding_unit;
            }
            if let Some(max_installments) = ledger.max_installments {
                self.ledger.max_installments = max_installments;
            }
        }

        if let Some(reminders) = patch.reminders {
            if let Some(lead_minutes) = reminders.lead_minutes {
                self.reminders.lead_minutes = lead_minutes;
            }
            if let Some(search_window_days) = reminders.search_window_days {
                self.reminders.search_window_days = search_window_days;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PAYPLAN_LLM_API_KEY") {
            self.llm.api_key = secret_value(value);
        }
        if let Some(value) = read_env("PAYPLAN_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("PAYPLAN_LLM_MODELS") {
            self.llm.models = split_list(&value);
        }
        if let Some(value) = read_env("PAYPLAN_LLM_REQUEST_TIMEOUT_SECS") {
            self.llm.request_timeout_secs = parse_u64("PAYPLAN_LLM_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PAYPLAN_LLM_TOTAL_BUDGET_SECS") {
            self.llm.total_budget_secs = parse_u64("PAYPLAN_LLM_TOTAL_BUDGET_SECS", &value)?;
        }
        if let Some(value) = read_env("PAYPLAN_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("PAYPLAN_LLM_MAX_TOKENS", &value)?;
        }

        if let Some(value) = read_env("PAYPLAN_LEDGER_MAX_PER_DAY") {
            self.ledger.max_per_day = parse_u32("PAYPLAN_LEDGER_MAX_PER_DAY", &value)?;
        }
        if let Some(value) = read_env("PAYPLAN_REMINDERS_LEAD_MINUTES") {
            self.reminders.lead_minutes = parse_u32("PAYPLAN_REMINDERS_LEAD_MINUTES", &value)?;
        }

        let log_level =
            read_env("PAYPLAN_LOGGING_LEVEL").or_else(|| read_env("PAYPLAN_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PAYPLAN_LOGGING_FORMAT").or_else(|| read_env("PAYPLAN_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(api_key) = overrides.llm_api_key {
            self.llm.api_key = secret_value(api_key);
        }
        if let Some(base_url) = overrides.llm_base_url {
            self.llm.base_url = base_url;
        }
        if let Some(models) = overrides.llm_models {
            self.llm.models = models;
        }
        if let Some(total_budget_secs) = overrides.llm_total_budget_secs {
            self.llm.total_budget_secs = total_budget_secs;
        }
        if let Some(max_per_day) = overrides.ledger_max_per_day {
            self.ledger.max_per_day = max_per_day;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_ledger(&self.ledger)?;
        validate_reminders(&self.reminders)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("payplan.toml"), PathBuf::from("config/payplan.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.api_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "llm.api_key is required (set PAYPLAN_LLM_API_KEY or [llm].api_key)".to_string(),
        ));
    }

    let url = llm.base_url.trim();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    if llm.models.iter().all(|model| model.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "llm.models must list at least one model name".to_string(),
        ));
    }

    if llm.request_timeout_secs == 0 || llm.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.request_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.total_budget_secs <= llm.request_timeout_secs {
        return Err(ConfigError::Validation(
            "llm.total_budget_secs must be greater than llm.request_timeout_secs".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    Ok(())
}

fn validate_ledger(ledger: &LedgerConfig) -> Result<(), ConfigError> {
    if ledger.pending_tab.trim().is_empty() || ledger.history_tab.trim().is_empty() {
        return Err(ConfigError::Validation(
            "ledger.pending_tab and ledger.history_tab must not be empty".to_string(),
        ));
    }
    if ledger.pending_tab == ledger.history_tab {
        return Err(ConfigError::Validation(
            "ledger.pending_tab and ledger.history_tab must name different tabs".to_string(),
        ));
    }
    if ledger.max_per_day == 0 {
        return Err(ConfigError::Validation(
            "ledger.max_per_day must be greater than zero".to_string(),
        ));
    }
    if ledger.cadence_days == 0 {
        return Err(ConfigError::Validation(
            "ledger.cadence_days must be greater than zero".to_string(),
        ));
    }
    if ledger.search_window_days == 0 {
        return Err(ConfigError::Validation(
            "ledger.search_window_days must be greater than zero".to_string(),
        ));
    }
    if ledger.rounding_unit == 0 {
        return Err(ConfigError::Validation(
            "ledger.rounding_unit must be greater than zero".to_string(),
        ));
    }
    if ledger.max_installments == 0 {
        return Err(ConfigError::Validation(
            "ledger.max_installments must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_reminders(reminders: &ReminderConfig) -> Result<(), ConfigError> {
    if reminders.search_window_days == 0 {
        return Err(ConfigError::Validation(
            "reminders.search_window_days must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    ledger: Option<LedgerPatch>,
    reminders: Option<ReminderPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    models: Option<Vec<String>>,
    request_timeout_secs: Option<u64>,
    total_budget_secs: Option<u64>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    site_url: Option<String>,
    site_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LedgerPatch {
    pending_tab: Option<String>,
    history_tab: Option<String>,
    max_per_day: Option<u32>,
    cadence_days: Option<u32>,
    search_window_days: Option<u32>,
    rounding_unit: Option<u32>,
    max_installments: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ReminderPatch {
    lead_minutes: Option<u32>,
    search_window_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
