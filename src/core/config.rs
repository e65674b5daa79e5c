use crate::core::bars::Market;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EastmoneyProviderConfig {
    pub base_url: String,
    /// Host of the instrument listing API, which differs from the kline host.
    #[serde(default = "default_eastmoney_listing_url")]
    pub listing_url: String,
}

fn default_eastmoney_listing_url() -> String {
    "https://push2.eastmoney.com".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TushareProviderConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct YahooProviderConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub eastmoney: Option<EastmoneyProviderConfig>,
    pub tushare: Option<TushareProviderConfig>,
    pub yahoo: Option<YahooProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            eastmoney: Some(EastmoneyProviderConfig {
                base_url: "https://push2his.eastmoney.com".to_string(),
                listing_url: default_eastmoney_listing_url(),
            }),
            tushare: None,
            yahoo: Some(YahooProviderConfig {
                base_url: "https://query1.finance.yahoo.com".to_string(),
            }),
        }
    }
}

fn default_priorities() -> HashMap<Market, Vec<String>> {
    HashMap::from([
        (
            Market::China,
            vec![
                "eastmoney".to_string(),
                "tushare".to_string(),
                "yahoo".to_string(),
            ],
        ),
        (Market::HongKong, vec!["yahoo".to_string()]),
        (Market::UnitedStates, vec!["yahoo".to_string()]),
    ])
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct VolatileTierConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub timeout_ms: u64,
    pub max_entries: usize,
}

impl Default for VolatileTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 2 * 60 * 60,
            timeout_ms: 50,
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StructuredTierConfig {
    pub enabled: bool,
    /// Defaults to `<data dir>/structured`
    pub path: Option<PathBuf>,
    pub ttl_secs: u64,
    pub timeout_ms: u64,
}

impl Default for StructuredTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            ttl_secs: 24 * 60 * 60,
            timeout_ms: 250,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct FileTierConfig {
    pub enabled: bool,
    /// Defaults to `<data dir>/files`
    pub dir: Option<PathBuf>,
    pub ttl_secs: u64,
    pub timeout_ms: u64,
}

impl Default for FileTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            ttl_secs: 7 * 24 * 60 * 60,
            timeout_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct TiersConfig {
    pub volatile: VolatileTierConfig,
    pub structured: StructuredTierConfig,
    pub file: FileTierConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub factor: u32,
    pub max_delay_ms: u64,
    /// Upper bound for one adapter call
    pub call_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 200,
            factor: 2,
            max_delay_ms: 2_000,
            call_timeout_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as u32;
        let delay = self
            .base_delay_ms
            .saturating_mul(u64::from(self.factor).saturating_pow(exponent));
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 5 * 60,
        }
    }
}

impl CircuitConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// How cache writes relate to the response of the request that fetched.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// The fastest tier is written before responding; slower tiers in the background.
    #[default]
    FastestTierSync,
    /// Every tier is written in the background. Concurrent callers keep
    /// joining the finished fetch until the fastest tier holds the entry.
    FullyAsync,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub deadline_ms: u64,
    pub write_policy: WritePolicy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 30_000,
            write_policy: WritePolicy::default(),
        }
    }
}

impl RetrievalConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Provider ids per market, in priority order
    #[serde(default = "default_priorities")]
    pub markets: HashMap<Market, Vec<String>>,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub tiers: TiersConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit: CircuitConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub data_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            markets: default_priorities(),
            providers: ProvidersConfig::default(),
            tiers: TiersConfig::default(),
            retry: RetryConfig::default(),
            circuit: CircuitConfig::default(),
            retrieval: RetrievalConfig::default(),
            data_path: None,
        }
    }
}

impl AppConfig {
    /// Loads the config from the default location, falling back to built-in
    /// defaults when no file exists there.
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(
                "No config at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "quotecache", "quotecache")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("io", "quotecache", "quotecache")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn structured_path(&self) -> Result<PathBuf> {
        match &self.tiers.structured.path {
            Some(path) => Ok(path.clone()),
            None => Ok(self.default_data_path()?.join("structured")),
        }
    }

    pub fn file_dir(&self) -> Result<PathBuf> {
        match &self.tiers.file.dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.default_data_path()?.join("files")),
        }
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}
