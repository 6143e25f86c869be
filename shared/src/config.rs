use anyhow::Context;
use dotenv::dotenv;

pub struct Config {
    pub tokens_full_access: Vec<String>,
    pub tokens_read_only: Vec<String>,
    pub candles_dir: String,
    pub api_base_url: String,
    pub sync_instruments: Vec<String>,
    pub sync_skip: Vec<String>,
    pub sync_interval: String,
    pub unavailable_retry_delay_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, anyhow::Error> {
        Ok(Config {
            tokens_full_access: token_list(&var, "TOKENS_FULL_ACCESS")?,
            tokens_read_only: token_list(&var, "TOKENS_READ_ONLY")?,
            candles_dir: var("CANDLES_DIR")
                .unwrap_or_else(|| "./data/csv/instruments".to_string()),
            api_base_url: var("API_BASE_URL")
                .unwrap_or_else(|| "https://invest-public-api.tinkoff.ru/rest".to_string()),
            sync_instruments: comma_list(var("SYNC_INSTRUMENTS")),
            sync_skip: comma_list(var("SYNC_SKIP")),
            sync_interval: var("SYNC_INTERVAL").unwrap_or_else(|| "1d".to_string()),
            unavailable_retry_delay_ms: var("UNAVAILABLE_RETRY_DELAY_MS")
                .map(|v| v.parse())
                .transpose()
                .context("UNAVAILABLE_RETRY_DELAY_MS must be a number of milliseconds")?
                .unwrap_or(1000),
        })
    }

    /// Rotation order: full-access tokens first, then read-only ones
    pub fn credentials(&self) -> Vec<String> {
        self.tokens_full_access
            .iter()
            .chain(self.tokens_read_only.iter())
            .cloned()
            .collect()
    }
}

fn token_list(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Vec<String>, anyhow::Error> {
    match var(key) {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
            .with_context(|| format!("{key} must be a JSON array of strings")),
        _ => Ok(Vec::new()),
    }
}

fn comma_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
