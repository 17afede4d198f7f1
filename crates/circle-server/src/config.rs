use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub cors_origin: String,
    pub session_sweep_secs: u64,
    /// bcrypt work factor; the library default when unset.
    pub bcrypt_cost: Option<u32>,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

impl Config {
    /// Read `CIRCLE_*` variables. Call after `dotenvy::dotenv()`.
    pub fn from_env() -> anyhow::Result<Self> {
        let port = var_or("CIRCLE_PORT", "8080")
            .parse()
            .context("CIRCLE_PORT must be a port number")?;
        let session_sweep_secs = var_or("CIRCLE_SESSION_SWEEP_SECS", "600")
            .parse()
            .context("CIRCLE_SESSION_SWEEP_SECS must be a number of seconds")?;
        let bcrypt_cost = std::env::var("CIRCLE_BCRYPT_COST")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("CIRCLE_BCRYPT_COST must be a number")?;

        Ok(Self {
            host: var_or("CIRCLE_HOST", "0.0.0.0"),
            port,
            db_path: var_or("CIRCLE_DB_PATH", "social-network.db").into(),
            cors_origin: var_or("CIRCLE_CORS_ORIGIN", "http://localhost:5173"),
            session_sweep_secs,
            bcrypt_cost,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().with_context(|| format!("invalid address {addr}"))
    }
}

