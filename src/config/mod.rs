//! Configuration module for the forum backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::forum::NotificationPolicy;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key gating the API (optional, disabled when unset)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Base URL for identicon avatars
    pub avatar_base_url: String,
    /// Who gets flagged when a post lands
    pub notifications: NotificationPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let api_psk = env::var("FORUM_API_PSK").ok().filter(|k| !k.is_empty());

        let db_path = env::var("FORUM_DB_PATH")
            .unwrap_or_else(|_| "./data/forum.sqlite".to_string())
            .into();

        let bind_addr = env::var("FORUM_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .expect("Invalid FORUM_BIND_ADDR format");

        let log_level = env::var("FORUM_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let avatar_base_url = env::var("FORUM_AVATAR_BASE_URL")
            .unwrap_or_else(|_| "https://www.gravatar.com/avatar".to_string());

        let notifications = NotificationPolicy {
            notify_author: env_flag("FORUM_NOTIFY_AUTHOR", true),
            topic_fanout: env_flag("FORUM_TOPIC_FANOUT", true),
        };

        Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            avatar_base_url,
            notifications,
        }
    }
}

/// Read a boolean flag; anything other than a recognised false spelling is true.
fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => parse_flag(&value).unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
