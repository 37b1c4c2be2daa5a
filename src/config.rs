use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::{self, Write};
use std::path::Path;

const ENV_FILE: &str = ".env";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub schedule: ScheduleConfig,
    pub broker: BrokerConfig,
    pub research: ResearchConfig,
    pub analysis: ModelConfig,
    pub decision: DecisionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    /// "Mon", "Monday", ...
    pub weekday: String,
    /// Local wall-clock time, "HH:MM".
    pub time: String,
    /// IANA zone name, e.g. "America/Chicago".
    pub timezone: String,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_s: u64,
    #[serde(default = "default_closed_recheck")]
    pub market_closed_recheck_s: u64,
}

fn default_tick_interval() -> u64 { 60 }
fn default_closed_recheck() -> u64 { 900 }

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerConfig {
    pub api_base: String,
    #[serde(default = "default_broker_timeout")]
    pub request_timeout_ms: u64,
}

fn default_broker_timeout() -> u64 { 10_000 }

/// Settings shared by every chat-model backed stage.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_model_timeout")]
    pub request_timeout_ms: u64,
}

fn default_max_tokens() -> u32 { 4096 }
fn default_model_timeout() -> u64 { 180_000 }

#[derive(Debug, Deserialize, Clone)]
pub struct ResearchConfig {
    #[serde(flatten)]
    pub model: ModelConfig,
    #[serde(default = "default_pick_count")]
    pub pick_count: usize,
}

fn default_pick_count() -> usize { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct DecisionConfig {
    #[serde(flatten)]
    pub model: ModelConfig,
    /// Largest share of available capital a single purchase may use.
    #[serde(default = "default_max_position_fraction")]
    pub max_position_fraction: f64,
}

fn default_max_position_fraction() -> f64 { 0.25 }

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_file")]
    pub file: String,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_file() -> String {
    "weekly-trader.log".to_string()
}

fn default_log_filter() -> String {
    "weekly_trader=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            filter: default_log_filter(),
        }
    }
}

/// Credentials for every external service.
#[derive(Clone)]
pub struct Secrets {
    pub broker_key_id: String,
    pub broker_secret: String,
    pub openai_api_key: String,
    pub anthropic_api_key: String,
    pub xai_api_key: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secrets { .. }")
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .with_context(|| "Failed to parse config TOML")?;
        if config.schedule.tick_interval_s == 0 {
            anyhow::bail!("schedule.tick_interval_s must be > 0");
        }
        if !(0.0..=1.0).contains(&config.decision.max_position_fraction) {
            anyhow::bail!(
                "decision.max_position_fraction must be within 0-1, got {}",
                config.decision.max_position_fraction
            );
        }
        Ok(config)
    }

    /// Load .env file into process environment. Real env vars take precedence.
    pub fn load_env_file() {
        let path = Path::new(ENV_FILE);
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return,
        };
        // Strip BOM if present (common on Windows-created files)
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
        for line in content.lines() {
            let line = line.trim().trim_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"').trim_matches('\'');
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }

    /// API keys come from environment variables, or prompted at startup.
    /// Prompted values are saved to .env for future runs.
    pub fn secrets() -> Result<Secrets> {
        Ok(Secrets {
            broker_key_id: secret("ALPACA_API_KEY", "Alpaca API key ID")?,
            broker_secret: secret("ALPACA_API_SECRET", "Alpaca API secret")?,
            openai_api_key: secret("OPENAI_API_KEY", "OpenAI API key (research)")?,
            anthropic_api_key: secret("ANTHROPIC_API_KEY", "Anthropic API key (analysis)")?,
            xai_api_key: secret("XAI_API_KEY", "xAI API key (decision)")?,
        })
    }
}

fn secret(var: &str, label: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(key) if !key.is_empty() => Ok(sanitize_key(&key)),
        _ => {
            let key = prompt(label)?;
            save_env_var(var, &key);
            Ok(key)
        }
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("  {} > ", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let value = sanitize_key(&input);
    if value.is_empty() {
        anyhow::bail!("{} cannot be empty", label);
    }
    Ok(value)
}

/// Strip carriage returns, BOM, and other invisible chars from a key value.
fn sanitize_key(raw: &str) -> String {
    raw.replace(['\r', '\u{feff}', '\u{200b}'], "")
        .trim()
        .to_string()
}

/// Append a KEY=VALUE line to .env and set it in the current process.
fn save_env_var(key: &str, value: &str) {
    std::env::set_var(key, value);
    let path = Path::new(ENV_FILE);
    let mut contents = std::fs::read_to_string(path).unwrap_or_default();
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(&format!("{}={}\n", key, value));
    if let Err(e) = std::fs::write(path, contents) {
        tracing::warn!(error = %e, "could not persist {} to {}", key, ENV_FILE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parses() {
        let config = Config::load(Path::new("config.toml")).unwrap();
        assert_eq!(config.schedule.weekday, "Mon");
        assert_eq!(config.schedule.time, "08:30");
        assert_eq!(config.schedule.timezone, "America/Chicago");
        assert_eq!(config.schedule.tick_interval_s, 60);
        assert_eq!(config.research.pick_count, 5);
        assert!((config.decision.max_position_fraction - 0.25).abs() < f64::EPSILON);
        assert!(config.decision.model.base_url.contains("x.ai"));
        assert_eq!(config.analysis.max_tokens, 4096);
    }

    #[test]
    fn test_defaults_fill_optional_fields() {
        let config = Config::parse(
            r#"
            [schedule]
            weekday = "Fri"
            time = "15:00"
            timezone = "UTC"

            [broker]
            api_base = "http://localhost:1"

            [research]
            base_url = "http://localhost:2"
            model = "m"

            [analysis]
            base_url = "http://localhost:3"
            model = "m"

            [decision]
            base_url = "http://localhost:4"
            model = "m"
            "#,
        )
        .unwrap();
        assert_eq!(config.schedule.market_closed_recheck_s, 900);
        assert_eq!(config.broker.request_timeout_ms, 10_000);
        assert_eq!(config.research.pick_count, 5);
        assert!(config.research.model.temperature.is_none());
        assert_eq!(config.logging.file, "weekly-trader.log");
    }

    #[test]
    fn test_rejects_out_of_range_position_fraction() {
        let err = Config::parse(
            r#"
            [schedule]
            weekday = "Mon"
            time = "08:30"
            timezone = "UTC"
            [broker]
            api_base = "x"
            [research]
            base_url = "x"
            model = "m"
            [analysis]
            base_url = "x"
            model = "m"
            [decision]
            base_url = "x"
            model = "m"
            max_position_fraction = 1.5
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_sanitize_key_strips_invisible_chars() {
        assert_eq!(sanitize_key("\u{feff} abc\r\n"), "abc");
    }
}
