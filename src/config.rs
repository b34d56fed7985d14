use serde::Deserialize;

use crate::badges::{self, Badge};

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

/// Process configuration, read from the environment.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// The port the HTTP server binds to.
    pub server_port: u16,
    /// The Postgres connection URL.
    pub database_url: String,
    /// The public host invite links point at.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Point values and badge thresholds.
    #[serde(default)]
    pub rewards: RewardsPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;
        config.try_deserialize()
    }
}

/// Point values, conversion rate, and the badge catalog.
///
/// Injected rather than hard-coded so tests can override thresholds
/// deterministically.
#[derive(Debug, Deserialize, Clone)]
pub struct RewardsPolicy {
    /// Points granted to a referrer per completed referral.
    pub referral_points: i64,
    /// Bonus points granted to a newly referred member.
    pub new_member_points: i64,
    /// Points per one US dollar of monetary value.
    pub points_per_dollar: i64,
    /// How many fresh codes to try before giving up on a collision streak.
    pub code_retry_limit: u32,
    /// The badge catalog, ascending by requirement.
    pub badges: Vec<Badge>,
}

impl Default for RewardsPolicy {
    fn default() -> Self {
        Self {
            referral_points: 10_000,
            new_member_points: 5_000,
            points_per_dollar: 10_000,
            code_retry_limit: 5,
            badges: badges::default_catalog(),
        }
    }
}
