//! Process configuration, read once at startup from the environment.
//!
//! A `.env` file in the working directory is honoured when present.
use log::{info, warn};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://cafes.db";
pub const DEFAULT_API_KEY: &str = "TopSecretAPIKey";

#[derive(Clone, Debug)]
pub struct TemplateSettings {
    pub dir: String,
    pub debug: bool,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub debug: bool,
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Shared secret required by `DELETE /remove/:id`.
    pub api_key: String,
    pub migrations_dir: Option<PathBuf>,
    pub template: TemplateSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            debug: false,
            host: "127.0.0.1".to_string(),
            port: 5000,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            api_key: DEFAULT_API_KEY.to_string(),
            migrations_dir: None,
            template: TemplateSettings {
                dir: "templates".to_string(),
                debug: false,
            },
        }
    }
}

impl Settings {
    /// Load settings from `.env` and the process environment.
    pub fn from_env() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            info!("Loaded environment from {}", path.display());
        }

        let defaults = Settings::default();
        let debug = try_load("DEBUG", defaults.debug, parse_flag);
        let api_key = env::var("CAFE_API_KEY").unwrap_or_else(|_| {
            warn!("CAFE_API_KEY not set, falling back to the built-in development key");
            defaults.api_key.clone()
        });

        Settings {
            debug,
            host: env::var("HOST").unwrap_or(defaults.host),
            port: try_load("PORT", defaults.port, |raw| raw.parse::<u16>()),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            api_key,
            migrations_dir: env::var("MIGRATIONS_DIR").ok().map(PathBuf::from),
            template: TemplateSettings {
                dir: env::var("TEMPLATE_DIR").unwrap_or(defaults.template.dir),
                debug,
            },
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn try_load<T, E, F>(key: &str, default: T, parse: F) -> T
where
    T: Display,
    E: Display,
    F: Fn(&str) -> Result<T, E>,
{
    match env::var(key) {
        Ok(raw) => parse(raw.trim()).unwrap_or_else(|e| {
            warn!("Invalid {key} value `{raw}` ({e}), using default: {default}");
            default
        }),
        Err(_) => default,
    }
}

/// Parse an on/off style environment flag.
pub fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(format!("`{other}` is not a boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse_common_spellings() {
        assert_eq!(parse_flag("TRUE"), Ok(true));
        assert_eq!(parse_flag("on"), Ok(true));
        assert_eq!(parse_flag("0"), Ok(false));
        assert_eq!(parse_flag(""), Ok(false));
        assert!(parse_flag("maybe").is_err());
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let settings = Settings {
            host: "0.0.0.0".into(),
            port: 8080,
            ..Settings::default()
        };
        assert_eq!(settings.bind_addr(), "0.0.0.0:8080");
    }
}
