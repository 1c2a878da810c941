use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::time::Duration;

/// Where bearer tokens get their verification keys.
#[derive(Clone, Debug)]
pub enum KeySource {
    /// Shared HS256 secret.
    Secret(String),
    /// Remote JSON Web Key Set.
    Jwks { url: String, refresh: Duration },
}

/// Server configuration loaded from environment variables.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_path: PathBuf,
    pub keys: KeySource,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
    pub sync_pull_limit: usize,
    pub sync_push_max_operations: usize,
    pub request_timeout: Duration,
    pub json_logs: bool,
}

impl AppConfig {
    /// Read the process environment (after loading `.env`, if any).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_path = match var("DATABASE_PATH") {
            Some(path) => PathBuf::from(path),
            None => {
                let data_dir = var("BUDGETSYNC_DATA_DIR").unwrap_or_else(|| "data".into());
                PathBuf::from(data_dir).join("budgetsync.db")
            }
        };

        let keys = match (var("AUTH_JWT_SECRET"), var("AUTH_JWKS_URL")) {
            (Some(secret), None) => KeySource::Secret(secret),
            (None, Some(url)) => KeySource::Jwks {
                url,
                refresh: Duration::from_secs(parse_number(&var, "JWKS_REFRESH_SECS", 3600)?),
            },
            (Some(_), Some(_)) => bail!("set only one of AUTH_JWT_SECRET and AUTH_JWKS_URL"),
            (None, None) => bail!("one of AUTH_JWT_SECRET or AUTH_JWKS_URL is required"),
        };

        let allowed_origins = var("ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty() && *o != "*")
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let log_format = var("LOG_FORMAT").unwrap_or_else(|| "text".into());
        let json_logs = match log_format.to_ascii_lowercase().as_str() {
            "json" => true,
            "text" => false,
            other => bail!("LOG_FORMAT must be json or text, got {other:?}"),
        };

        Ok(Self {
            port: parse_number(&var, "PORT", 3000)?,
            database_path,
            keys,
            issuer: var("AUTH_ISSUER"),
            audience: var("AUTH_AUDIENCE"),
            allowed_origins,
            sync_pull_limit: parse_number(&var, "SYNC_PULL_LIMIT", 500usize)?.max(1),
            sync_push_max_operations: parse_number(&var, "SYNC_PUSH_MAX_OPERATIONS", 500usize)?
                .max(1),
            request_timeout: Duration::from_secs(parse_number(&var, "REQUEST_TIMEOUT_SECS", 60)?),
            json_logs,
        })
    }
}

fn parse_number<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw.parse().with_context(|| format!("invalid {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_with_secret() {
        let cfg = load(&[("AUTH_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.database_path, PathBuf::from("data").join("budgetsync.db"));
        assert_eq!(cfg.sync_pull_limit, 500);
        assert_eq!(cfg.sync_push_max_operations, 500);
        assert_eq!(cfg.request_timeout, Duration::from_secs(60));
        assert!(cfg.allowed_origins.is_empty());
        assert!(!cfg.json_logs);
        assert!(matches!(cfg.keys, KeySource::Secret(ref s) if s == "s3cret"));
    }

    #[test]
    fn requires_exactly_one_key_source() {
        assert!(load(&[]).is_err());
        assert!(load(&[("AUTH_JWT_SECRET", "a"), ("AUTH_JWKS_URL", "https://x/jwks")]).is_err());
        let cfg = load(&[("AUTH_JWKS_URL", "https://id.example.com/jwks.json")]).unwrap();
        assert!(matches!(
            cfg.keys,
            KeySource::Jwks { refresh, .. } if refresh == Duration::from_secs(3600)
        ));
    }

    #[test]
    fn database_path_overrides_data_dir() {
        let cfg = load(&[
            ("AUTH_JWT_SECRET", "a"),
            ("BUDGETSYNC_DATA_DIR", "/var/lib/bs"),
            ("DATABASE_PATH", "/tmp/x.db"),
        ])
        .unwrap();
        assert_eq!(cfg.database_path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn parses_origins_and_numbers() {
        let cfg = load(&[
            ("AUTH_JWT_SECRET", "a"),
            ("ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
            ("SYNC_PULL_LIMIT", "25"),
            ("LOG_FORMAT", "JSON"),
        ])
        .unwrap();
        assert_eq!(cfg.allowed_origins, vec!["https://a.example", "https://b.example"]);
        assert_eq!(cfg.sync_pull_limit, 25);
        assert!(cfg.json_logs);
        assert!(load(&[("AUTH_JWT_SECRET", "a"), ("PORT", "http")]).is_err());
    }
}
