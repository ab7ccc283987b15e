use std::{env, path::PathBuf};
use thiserror::Error;

use crate::statement::ScorePropagation;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

/// Runtime settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub public_base_url: String,
    pub max_upload_bytes: usize,
    pub site_admins: Vec<i64>,
    pub score_propagation: ScorePropagation,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/h5pbank.db?mode=rwc".into(),
            port: 8081,
            data_dir: PathBuf::from("./data"),
            public_base_url: String::new(),
            max_upload_bytes: 200 * 1024 * 1024,
            site_admins: Vec::new(),
            score_propagation: ScorePropagation::NonZeroOnly,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Builds a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();

        if let Some(url) = lookup("DATABASE_URL") {
            cfg.database_url = url;
        }
        if let Some(port) = lookup("PORT") {
            cfg.port = parse("PORT", &port)?;
        }
        if let Some(dir) = lookup("DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(base) = lookup("PUBLIC_BASE_URL") {
            cfg.public_base_url = base.trim_end_matches('/').to_string();
        }
        if let Some(max) = lookup("MAX_UPLOAD_BYTES") {
            cfg.max_upload_bytes = parse("MAX_UPLOAD_BYTES", &max)?;
        }
        if let Some(admins) = lookup("SITE_ADMINS") {
            cfg.site_admins = admins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse("SITE_ADMINS", s))
                .collect::<Result<_, _>>()?;
        }
        if let Some(policy) = lookup("SCORE_PROPAGATION") {
            cfg.score_propagation = match policy.as_str() {
                "nonzero" => ScorePropagation::NonZeroOnly,
                "always" => ScorePropagation::Always,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "SCORE_PROPAGATION",
                        value: policy,
                    })
                }
            };
        }

        Ok(cfg)
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.port, 8081);
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert!(cfg.site_admins.is_empty());
        assert_eq!(cfg.score_propagation, ScorePropagation::NonZeroOnly);
    }

    #[test]
    fn reads_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("SITE_ADMINS", "2, 5,"),
            ("SCORE_PROPAGATION", "always"),
            ("PUBLIC_BASE_URL", "https://lms.example/"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.site_admins, vec![2, 5]);
        assert_eq!(cfg.score_propagation, ScorePropagation::Always);
        assert_eq!(cfg.public_base_url, "https://lms.example");
    }

    #[test]
    fn rejects_bad_values() {
        let err = Config::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert_eq!(err.to_string(), "invalid value for PORT: eighty");
        assert!(Config::from_lookup(lookup(&[("SCORE_PROPAGATION", "sometimes")])).is_err());
    }
}
