use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

use tally_db::DEFAULT_READER_POOL_SIZE;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub reader_pool_size: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("TALLY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("TALLY_JWT_SECRET is unset or still a placeholder; it must match the identity service's signing secret");
        }

        let host = lookup("TALLY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = match lookup("TALLY_PORT") {
            Some(raw) => raw.parse().with_context(|| format!("TALLY_PORT is not a port: {}", raw))?,
            None => 3000,
        };
        let db_path = lookup("TALLY_DB_PATH").unwrap_or_else(|| "tally.db".into()).into();
        let reader_pool_size = match lookup("TALLY_READER_POOL_SIZE") {
            Some(raw) => raw
                .parse()
                .ok()
                .filter(|n: &usize| *n > 0)
                .with_context(|| format!("TALLY_READER_POOL_SIZE must be a positive integer: {}", raw))?,
            None => DEFAULT_READER_POOL_SIZE,
        };

        Ok(Self {
            host,
            port,
            db_path,
            jwt_secret,
            reader_pool_size,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
