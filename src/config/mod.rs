use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::ipcr::evidence::{FORM_LEVEL_LIMIT, INDICATOR_LEVEL_LIMIT, MAX_FILE_SIZE, SIGNED_URL_TTL};
use crate::security::file_validation::default_evidence_types;

pub const CONFIG_FILE: &str = "ipcr.toml";
pub const ENV_PREFIX: &str = "IPCR_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub backend: Backend,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub drive: DriveConfig,
    pub evidence: EvidenceConfig,
}

/// Where forms, cycles and evidence live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Postgres,
    /// Process-local stores; nothing survives a restart.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection URL; takes precedence over the individual fields.
    pub url: Option<String>,
    pub username: String,
    pub password: String,
    pub server: String,
    pub port: u32,
    pub database: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    pub server: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceConfig {
    pub max_file_size: usize,
    pub form_limit: usize,
    pub indicator_limit: usize,
    pub signed_url_ttl_secs: u64,
    pub allowed_types: Vec<String>,
    pub admin_may_delete_others: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Postgres,
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: None,
                username: "ipcr".to_string(),
                password: String::new(),
                server: "localhost".to_string(),
                port: 5432,
                database: "ipcr".to_string(),
                pool_size: 10,
            },
            drive: DriveConfig {
                server: "http://localhost:9000".to_string(),
                access_key: "minioadmin".to_string(),
                secret_key: "minioadmin".to_string(),
                bucket: "ipcr-evidence".to_string(),
                region: "us-east-1".to_string(),
            },
            evidence: EvidenceConfig::default(),
        }
    }
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            form_limit: FORM_LEVEL_LIMIT,
            indicator_limit: INDICATOR_LEVEL_LIMIT,
            signed_url_ttl_secs: SIGNED_URL_TTL.as_secs(),
            allowed_types: default_evidence_types(),
            admin_may_delete_others: false,
        }
    }
}

impl AppConfig {
    /// Defaults, then `ipcr.toml` (or `IPCR_CONFIG`), then `IPCR_*` variables
    /// with `__` separating sections, e.g. `IPCR_SERVER__PORT=9090`.
    /// A plain `DATABASE_URL` is honoured when no URL is configured.
    pub fn load() -> Result<Self, anyhow::Error> {
        let file = std::env::var("IPCR_CONFIG").unwrap_or_else(|_| CONFIG_FILE.to_string());
        let mut config = Self::figment(&file).extract::<Self>()?;
        if config.database.url.is_none() {
            config.database.url = std::env::var("DATABASE_URL").ok();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn figment(file: &str) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__").ignore(&["config"]))
    }

    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database.url {
            return url.clone();
        }
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.database.username,
            self.database.password,
            self.database.server,
            self.database.port,
            self.database.database
        )
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let evidence = &self.evidence;
        if evidence.max_file_size == 0 || evidence.form_limit == 0 || evidence.indicator_limit == 0 {
            anyhow::bail!("evidence limits must be greater than zero");
        }
        if evidence.signed_url_ttl_secs == 0 {
            anyhow::bail!("evidence.signed_url_ttl_secs must be greater than zero");
        }
        if evidence.allowed_types.is_empty() {
            anyhow::bail!("evidence.allowed_types must list at least one MIME type");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
