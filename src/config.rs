use anyhow::{Context, Result};
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::net::SocketAddr;

use crate::domain::TariffKind;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub upstream: UpstreamConfig,
    pub tariff: TariffConfig,
    pub refresh: RefreshConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub request_timeout_secs: u64,
}
impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig { pub token: String }

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub email: String,
    pub password: String,
    pub http_timeout_seconds: u64,
    /// Restrict to one account when the login owns several.
    pub account_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TariffConfig {
    pub timezone: String,
    pub kind: TariffKind,
    pub dispatch_merge_minutes: i64,
    /// Local hour before which tomorrow's schedule is withheld (0 = always published).
    pub publish_tomorrow_after_hour: u32,
}
impl TariffConfig {
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid timezone {:?}: {e}", self.timezone))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    pub poll_seconds: u64,
    pub session_history_capacity: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("SFB__").split("__"));
        figment.extract().context("configuration invalid")
    }
}
