use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use parley_gateway::gateway::DEFAULT_HISTORY_LIMIT;

const MAX_HISTORY_LIMIT: u32 = 200;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Directory snapshot (users, groups, channels) imported at startup
    pub seed_path: Option<PathBuf>,
    pub history_limit: u32,
    /// Bearer token guarding the internal notification routes
    pub internal_token: Option<String>,
}

impl ServerConfig {
    /// Read `PARLEY_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = lookup("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = match lookup("PARLEY_PORT") {
            Some(raw) => raw.parse().with_context(|| format!("invalid PARLEY_PORT '{raw}'"))?,
            None => 3000,
        };
        let db_path = PathBuf::from(lookup("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into()));
        let seed_path = lookup("PARLEY_SEED_PATH")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        let history_limit = match lookup("PARLEY_HISTORY_LIMIT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid PARLEY_HISTORY_LIMIT '{raw}'"))?,
            None => DEFAULT_HISTORY_LIMIT,
        };
        if history_limit == 0 || history_limit > MAX_HISTORY_LIMIT {
            bail!("PARLEY_HISTORY_LIMIT must be between 1 and {MAX_HISTORY_LIMIT}, got {history_limit}");
        }

        let internal_token = lookup("PARLEY_INTERNAL_TOKEN").filter(|t| !t.is_empty());

        Ok(Self {
            host,
            port,
            db_path,
            seed_path,
            history_limit,
            internal_token,
        })
    }

    /// `host:port` as configured. The host may be a name; it is resolved
    /// when the listener binds.
    pub fn bind_target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_target(), "0.0.0.0:3000");
        assert_eq!(cfg.db_path, PathBuf::from("parley.db"));
        assert_eq!(cfg.history_limit, 50);
        assert!(cfg.seed_path.is_none());
        assert!(cfg.internal_token.is_none());
    }

    #[test]
    fn overrides() {
        let cfg = config(&[
            ("PARLEY_HOST", "127.0.0.1"),
            ("PARLEY_PORT", "8080"),
            ("PARLEY_SEED_PATH", "data.json"),
            ("PARLEY_HISTORY_LIMIT", "20"),
            ("PARLEY_INTERNAL_TOKEN", "s3cret"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_target(), "127.0.0.1:8080");
        assert_eq!(cfg.seed_path, Some(PathBuf::from("data.json")));
        assert_eq!(cfg.history_limit, 20);
        assert_eq!(cfg.internal_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config(&[("PARLEY_PORT", "http")]).is_err());
        assert!(config(&[("PARLEY_HISTORY_LIMIT", "0")]).is_err());
        assert!(config(&[("PARLEY_HISTORY_LIMIT", "500")]).is_err());
    }

    #[tokio::test]
    async fn host_names_are_resolved_on_bind() {
        let cfg = config(&[("PARLEY_HOST", "localhost"), ("PARLEY_PORT", "0")]).unwrap();
        let listener = tokio::net::TcpListener::bind(cfg.bind_target()).await.unwrap();
        assert!(listener.local_addr().unwrap().ip().is_loopback());
    }
}
