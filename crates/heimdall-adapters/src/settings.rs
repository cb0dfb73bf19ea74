//! Adapter-private settings: endpoints, credentials, timeouts.
//!
//! Deserialized by the binary from its layered configuration (TOML file +
//! `HEIMDALL_`-prefixed environment, with a dotenv file loaded first).
//! Credential variable names are adapter-private; nothing else in the system
//! knows them.

use std::time::Duration;

use serde::Deserialize;

fn default_timeout_secs() -> u64 {
  10
}

fn default_news_page_size() -> u32 {
  100
}

#[derive(Debug, Clone, Deserialize)]
pub struct MacroSourceSettings {
  #[serde(default = "MacroSourceSettings::default_base_url")]
  pub base_url:     String,
  pub api_key:      String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl MacroSourceSettings {
  fn default_base_url() -> String {
    "https://api.stlouisfed.org/fred".to_owned()
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceSourceSettings {
  #[serde(default = "PriceSourceSettings::default_base_url")]
  pub base_url:     String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl PriceSourceSettings {
  fn default_base_url() -> String {
    "https://query1.finance.yahoo.com/v8/finance/chart".to_owned()
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewsSourceSettings {
  #[serde(default = "NewsSourceSettings::default_base_url")]
  pub base_url:     String,
  pub api_key:      String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  #[serde(default = "default_news_page_size")]
  pub page_size:    u32,
}

impl NewsSourceSettings {
  fn default_base_url() -> String {
    "https://newsapi.org/v2".to_owned()
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

/// The full adapter configuration block.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterSettings {
  pub macro_series: MacroSourceSettings,
  pub price_bars:   PriceSourceSettings,
  pub news_feed:    NewsSourceSettings,
}
