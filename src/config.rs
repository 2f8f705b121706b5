use std::{env, io};

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::debug;

use crate::auth::AuthToken;

pub const DEFAULT_API_BASE_URL: &str = "https://www.osrsbotdetector.com/api";
const DEFAULT_AUTO_SEND_SECS: u64 = 5 * 60;
const DEFAULT_MANUAL_COOLDOWN_SECS: u64 = 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RANK_HIGHLIGHT: u32 = 0xFF0000;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_base_url: String,
    pub anonymous_reporting: bool,
    pub auth_full_token: Option<SecretString>,
    pub auto_send_interval_secs: u64,
    pub manual_send_cooldown_secs: u64,
    pub http_timeout_secs: u64,
    pub rank_highlight_color: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub api_base_url: String,
    pub anonymous_reporting: bool,
    pub auto_send_interval_secs: u64,
    pub manual_send_cooldown_secs: u64,
    pub http_timeout_secs: u64,
    pub rank_highlight_color: String,
    pub has_auth_token: bool,
    pub auth_token_type: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            api_base_url: env::var("BOT_DETECTOR_API_BASE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            anonymous_reporting: parse_bool("BOT_DETECTOR_ANONYMOUS", true),
            auth_full_token: env::var("BOT_DETECTOR_AUTH_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| SecretString::new(v.trim().into())),
            auto_send_interval_secs: parse_u64(
                "BOT_DETECTOR_AUTO_SEND_SECS",
                DEFAULT_AUTO_SEND_SECS,
            ),
            manual_send_cooldown_secs: parse_u64(
                "BOT_DETECTOR_MANUAL_COOLDOWN_SECS",
                DEFAULT_MANUAL_COOLDOWN_SECS,
            ),
            http_timeout_secs: parse_u64(
                "BOT_DETECTOR_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )
            .max(1),
            rank_highlight_color: parse_hex_color(
                "BOT_DETECTOR_RANK_HIGHLIGHT",
                DEFAULT_RANK_HIGHLIGHT,
            ),
        }
    }

    /// Parses the configured full token. Absent or malformed values yield the empty token.
    pub fn auth_token(&self) -> AuthToken {
        AuthToken::parse(
            self.auth_full_token
                .as_ref()
                .map(|secret| secret.expose_secret()),
        )
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            api_base_url: self.api_base_url.clone(),
            anonymous_reporting: self.anonymous_reporting,
            auto_send_interval_secs: self.auto_send_interval_secs,
            manual_send_cooldown_secs: self.manual_send_cooldown_secs,
            http_timeout_secs: self.http_timeout_secs,
            rank_highlight_color: format!("#{:06X}", self.rank_highlight_color),
            has_auth_token: self.auth_full_token.is_some(),
            auth_token_type: self.auth_token().token_type().as_str().to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            anonymous_reporting: true,
            auth_full_token: None,
            auto_send_interval_secs: DEFAULT_AUTO_SEND_SECS,
            manual_send_cooldown_secs: DEFAULT_MANUAL_COOLDOWN_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            rank_highlight_color: DEFAULT_RANK_HIGHLIGHT,
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_hex_color(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| {
            let trimmed = v.trim();
            let digits = trimmed
                .strip_prefix('#')
                .or_else(|| trimmed.strip_prefix("0x"))
                .unwrap_or(trimmed);
            u32::from_str_radix(digits, 16).ok()
        })
        .map(|color| color & 0xFF_FF_FF)
        .unwrap_or(default)
}
