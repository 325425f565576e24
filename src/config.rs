use serde::Deserialize;
use thiserror::Error;

use crate::api::{Credentials, SymbolMap};
use crate::risk::HoldGuardConfig;

const DEFAULT_CONFIG_FILE: &str = "aitrader";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("failed to read system prompt {path}: {source}")]
    SystemPrompt {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct CapitalSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub identifier: String,
    pub demo_mode: bool,
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiSettings {
    #[serde(default)]
    pub api_key: String,
    pub model: String,
}

/// Runtime settings: defaults, then `aitrader.toml`, then environment
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub capital: CapitalSettings,
    pub gemini: GeminiSettings,
    pub database_url: Option<String>,
    pub tickers: Vec<String>,
    pub system_prompt_path: String,
    pub guard: HoldGuardConfig,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

impl Settings {
    /// Load settings from `.env`, the optional config file and the environment
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let guard = HoldGuardConfig::default();
        let file = match config_path {
            Some(path) => config::File::with_name(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let tickers = env_var("TICKERS").map(|raw| {
            raw.split(',')
                .map(|t| t.trim().to_uppercase())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
        });

        let settings = config::Config::builder()
            .set_default("capital.demo_mode", true)?
            .set_default("gemini.model", crate::api::gemini::DEFAULT_MODEL)?
            .set_default("tickers", vec!["BTC", "ETH", "SOL"])?
            .set_default("system_prompt_path", "system_prompt.txt")?
            .set_default("guard.min_hold_minutes", guard.min_hold_minutes)?
            .set_default("guard.stop_loss_pct", guard.stop_loss_pct)?
            .set_default("guard.take_profit_pct", guard.take_profit_pct)?
            .add_source(file)
            .set_override_option("capital.api_key", env_var("CAPITAL_API_KEY"))?
            .set_override_option("capital.password", env_var("CAPITAL_API_PASSWORD"))?
            .set_override_option("capital.identifier", env_var("CAPITAL_IDENTIFIER"))?
            .set_override_option(
                "capital.demo_mode",
                env_var("CAPITAL_DEMO_MODE").map(|v| parse_bool(&v)),
            )?
            .set_override_option("capital.account_id", env_var("CAPITAL_ACCOUNT_ID"))?
            .set_override_option("gemini.api_key", env_var("GEMINI_API_KEY"))?
            .set_override_option("gemini.model", env_var("GEMINI_MODEL"))?
            .set_override_option("database_url", env_var("DATABASE_URL"))?
            .set_override_option("tickers", tickers)?
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Broker credentials; all three secrets are required
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let capital = &self.capital;
        if capital.api_key.is_empty() {
            return Err(ConfigError::Missing("CAPITAL_API_KEY"));
        }
        if capital.password.is_empty() {
            return Err(ConfigError::Missing("CAPITAL_API_PASSWORD"));
        }
        if capital.identifier.is_empty() {
            return Err(ConfigError::Missing("CAPITAL_IDENTIFIER"));
        }

        Ok(Credentials {
            api_key: capital.api_key.clone(),
            password: capital.password.clone(),
            identifier: capital.identifier.clone(),
            demo_mode: capital.demo_mode,
            account_id: capital.account_id.clone().filter(|id| !id.is_empty()),
        })
    }

    pub fn gemini_api_key(&self) -> Result<&str, ConfigError> {
        if self.gemini.api_key.is_empty() {
            return Err(ConfigError::Missing("GEMINI_API_KEY"));
        }
        Ok(&self.gemini.api_key)
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }

    /// Ticker table for the configured tickers (`BTC` -> `BTCUSD`)
    pub fn symbol_map(&self) -> SymbolMap {
        let epics: Vec<String> = self.tickers.iter().map(|t| format!("{}USD", t)).collect();
        let pairs: Vec<(&str, &str)> = self
            .tickers
            .iter()
            .zip(epics.iter())
            .map(|(t, e)| (t.as_str(), e.as_str()))
            .collect();
        SymbolMap::from_pairs(&pairs)
    }

    pub fn load_system_prompt(&self) -> Result<String, ConfigError> {
        std::fs::read_to_string(&self.system_prompt_path).map_err(|source| {
            ConfigError::SystemPrompt {
                path: self.system_prompt_path.clone(),
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            capital: CapitalSettings {
                api_key: "key".to_string(),
                password: "pw".to_string(),
                identifier: "id".to_string(),
                demo_mode: true,
                account_id: Some(String::new()),
            },
            gemini: GeminiSettings {
                api_key: String::new(),
                model: "gemini-2.5-pro".to_string(),
            },
            database_url: None,
            tickers: vec!["BTC".to_string(), "DOGE".to_string()],
            system_prompt_path: "does/not/exist.txt".to_string(),
            guard: HoldGuardConfig::default(),
        }
    }

    #[test]
    fn test_credentials_require_all_secrets() {
        let mut s = settings();
        let creds = s.credentials().unwrap();
        assert!(creds.demo_mode);
        assert!(creds.account_id.is_none());

        s.capital.password.clear();
        assert!(matches!(
            s.credentials(),
            Err(ConfigError::Missing("CAPITAL_API_PASSWORD"))
        ));
    }

    #[test]
    fn test_missing_optional_services() {
        let s = settings();
        assert!(matches!(s.gemini_api_key(), Err(ConfigError::Missing(_))));
        assert!(matches!(s.database_url(), Err(ConfigError::Missing(_))));
        assert!(matches!(
            s.load_system_prompt(),
            Err(ConfigError::SystemPrompt { .. })
        ));
    }

    #[test]
    fn test_symbol_map_from_tickers() {
        let map = settings().symbol_map();
        assert_eq!(map.to_epic("DOGE"), "DOGEUSD");
        assert_eq!(map.to_symbol("BTCUSD"), "BTC");
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("True"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("no"));
    }
}
