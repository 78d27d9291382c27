use std::{env, fmt::Display, str::FromStr};

use anyhow::Context;
use tracing::info;

use crate::forecast::EstimatorSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Shared secret for the prediction endpoint. Token issuance lives in an
    /// external service; when unset the endpoint is open (local development).
    pub api_token: Option<String>,
    pub estimator: EstimatorSettings,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;

        let estimator = EstimatorSettings {
            window: try_load("FORECAST_WINDOW", 5)?,
            ..EstimatorSettings::default()
        };

        Ok(Self {
            database_url,
            port: try_load("PORT", 8080)?,
            api_token: env::var("API_TOKEN").ok().filter(|token| !token.is_empty()),
            estimator,
        })
    }
}

fn try_load<T: FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: Display,
    T: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key} value {raw:?}: {e}")),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
