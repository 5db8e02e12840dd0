use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Which fetch backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Cookie-authenticated GraphQL API client.
    Api,
    /// Chromium automation with a persistent logged-in profile.
    Browser,
}

/// Application configuration loaded from environment variables.
///
/// Session and credential state lives here and is pushed into backend
/// construction; the collection engine never reads it.
#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub store_path: PathBuf,

    // Backend selection
    pub backend: BackendKind,

    // API backend (cookie auth)
    pub api_base_url: String,
    pub auth_token: Option<String>,
    pub csrf_token: Option<String>,

    // Browser backend
    pub chrome_profile: PathBuf,
    pub chrome_path: Option<String>,
    pub headless: bool,

    // Shared fetch settings
    pub proxy: Option<String>,
    pub page_size: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable has an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            store_path: PathBuf::from(env_or_default("TWEETDUMP_STORE", "./data/posts.sqlite")),

            backend: parse_backend_kind(&env_or_default("TWEETDUMP_BACKEND", "api"))?,

            api_base_url: env_or_default("TWEETDUMP_API_BASE_URL", "https://x.com/i/api/graphql"),
            auth_token: optional_env("TWEETDUMP_AUTH_TOKEN"),
            csrf_token: optional_env("TWEETDUMP_CSRF_TOKEN"),

            chrome_profile: PathBuf::from(env_or_default(
                "TWEETDUMP_CHROME_PROFILE",
                "./data/chrome-profile",
            )),
            chrome_path: optional_env("TWEETDUMP_CHROME_PATH"),
            headless: parse_env_bool("TWEETDUMP_HEADLESS", true)?,

            proxy: optional_env("TWEETDUMP_PROXY"),
            page_size: parse_env_u32("TWEETDUMP_PAGE_SIZE", 20)?,
        })
    }

    /// Validate that the configuration is usable for the selected backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "TWEETDUMP_PAGE_SIZE".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.backend == BackendKind::Api {
            if self.auth_token.as_deref().unwrap_or_default().is_empty() {
                return Err(ConfigError::MissingEnvVar(
                    "TWEETDUMP_AUTH_TOKEN".to_string(),
                ));
            }
            if self.csrf_token.as_deref().unwrap_or_default().is_empty() {
                return Err(ConfigError::MissingEnvVar(
                    "TWEETDUMP_CSRF_TOKEN".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// A configuration suitable for tests: no environment access, API
    /// backend with dummy credentials.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            store_path: PathBuf::from("./data/test-posts.sqlite"),
            backend: BackendKind::Api,
            api_base_url: "https://x.com/i/api/graphql".to_string(),
            auth_token: Some("test-auth-token".to_string()),
            csrf_token: Some("test-csrf-token".to_string()),
            chrome_profile: PathBuf::from("./data/chrome-profile"),
            chrome_path: None,
            headless: true,
            proxy: None,
            page_size: 20,
        }
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

fn parse_backend_kind(value: &str) -> Result<BackendKind, ConfigError> {
    match value.to_lowercase().as_str() {
        "api" => Ok(BackendKind::Api),
        "browser" => Ok(BackendKind::Browser),
        _ => Err(ConfigError::InvalidValue {
            name: "TWEETDUMP_BACKEND".to_string(),
            message: format!("must be 'api' or 'browser', got '{value}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend_kind() {
        assert_eq!(parse_backend_kind("api").unwrap(), BackendKind::Api);
        assert_eq!(parse_backend_kind("API").unwrap(), BackendKind::Api);
        assert_eq!(parse_backend_kind("browser").unwrap(), BackendKind::Browser);
        assert!(parse_backend_kind("curl").is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_env_bool("TWEETDUMP_NONEXISTENT_VAR", true).unwrap());
        assert!(!parse_env_bool("TWEETDUMP_NONEXISTENT_VAR", false).unwrap());
    }

    #[test]
    fn test_validate_api_requires_cookies() {
        let mut config = Config::for_testing();
        config.auth_token = None;
        assert!(config.validate().is_err());

        let mut config = Config::for_testing();
        config.backend = BackendKind::Browser;
        config.auth_token = None;
        config.csrf_token = None;
        assert!(config.validate().is_ok());
    }
}
