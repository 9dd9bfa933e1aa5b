use crate::domain::{Language, Region};
use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientConfig {
    pub region: Region,
    /// ISO country code, sent with map access requests.
    pub country: String,
    pub language: Language,
    /// Calling code prepended to phone-number usernames.
    pub phone_prefix: String,
    pub http_timeout: Duration,
    pub connect_timeout: Duration,
    pub property_wait: Duration,
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            region: Region::Eu,
            country: "GB".to_string(),
            language: Language::En,
            phone_prefix: "86".to_string(),
            http_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(30),
            property_wait: Duration::from_secs(5),
            event_capacity: 64,
        }
    }
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("KARCHER_REGION") {
            config.region = value.parse().map_err(|_| ConfigError::InvalidValue {
                name: "KARCHER_REGION",
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("KARCHER_COUNTRY") {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(ConfigError::InvalidValue {
                    name: "KARCHER_COUNTRY",
                    value,
                });
            }
            config.country = trimmed.to_ascii_uppercase();
        }
        if let Some(value) = lookup("KARCHER_LANGUAGE") {
            config.language = value.parse().map_err(|_| ConfigError::InvalidValue {
                name: "KARCHER_LANGUAGE",
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("KARCHER_PROPERTY_WAIT_SECS") {
            let secs = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue {
                    name: "KARCHER_PROPERTY_WAIT_SECS",
                    value: value.clone(),
                })?;
            config.property_wait = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlays_environment_values() {
        let config = ClientConfig::from_lookup(|name| match name {
            "KARCHER_REGION" => Some("us".to_string()),
            "KARCHER_COUNTRY" => Some("de".to_string()),
            "KARCHER_PROPERTY_WAIT_SECS" => Some("2".to_string()),
            _ => None,
        })
        .expect("config");
        assert_eq!(config.region, Region::Us);
        assert_eq!(config.country, "DE");
        assert_eq!(config.language, Language::En);
        assert_eq!(config.property_wait, Duration::from_secs(2));
    }

    #[test]
    fn rejects_unknown_language() {
        let error = ClientConfig::from_lookup(|name| {
            (name == "KARCHER_LANGUAGE").then(|| "klingon".to_string())
        })
        .expect_err("invalid");
        assert_eq!(
            error,
            ConfigError::InvalidValue {
                name: "KARCHER_LANGUAGE",
                value: "klingon".to_string()
            }
        );
    }
}
