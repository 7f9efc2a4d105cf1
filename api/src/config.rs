use std::str::FromStr;
use tracing::{info, warn};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_PAGE_LIMIT: usize = 7;
pub const DEFAULT_MONGODB_DATABASE: &str = "pokedex";

/// Runtime settings read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    /// Page size used when a listing omits `limit`.
    pub default_limit: usize,
    /// MongoDB connection string. Without it the in-memory store is used.
    pub mongodb_uri: Option<String>,
    pub mongodb_database: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, falling back to defaults on
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = parse_or_default(&lookup, "PORT", DEFAULT_PORT);
        let default_limit = match parse_or_default(&lookup, "DEFAULT_LIMIT", DEFAULT_PAGE_LIMIT) {
            0 => {
                warn!("DEFAULT_LIMIT must be at least 1. Using {}.", DEFAULT_PAGE_LIMIT);
                DEFAULT_PAGE_LIMIT
            }
            limit => limit,
        };
        let mongodb_uri = lookup("MONGODB_URI").filter(|uri| !uri.trim().is_empty());
        let mongodb_database = lookup("MONGODB_DATABASE")
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MONGODB_DATABASE.to_string());

        Self {
            port,
            default_limit,
            mongodb_uri,
            mongodb_database,
        }
    }
}

fn parse_or_default<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
{
    match lookup(key) {
        Some(raw) => match T::from_str(raw.trim()) {
            Ok(value) => {
                info!("Using {} {} from environment.", key, value);
                value
            }
            Err(_) => {
                warn!(
                    "Invalid {} value '{}' in environment. Using default {}.",
                    key, raw, default
                );
                default
            }
        },
        None => default,
    }
}
