//! Logging and backend initialization

use chrono::{Datelike, NaiveDate, Utc};
use log::{error, info, warn};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, Backend};
use crate::core::shared::state::Backends;
use crate::core::shared::utils::{self, DbPool};
use crate::drive::{BlobStore, InMemoryBlobStore};
use crate::ipcr::cycles::{InMemoryCycleRegistry, PgCycleRegistry};
use crate::ipcr::notify::{LogNotificationHandler, NotificationHandler, Notifier};
use crate::ipcr::pg_store::PgFormStore;
use crate::ipcr::store::InMemoryFormStore;
use crate::security::audit::{InMemoryAuditStore, PgAuditStore};

pub const DEFAULT_LOG_FILTER: &str = "ipcrserver=info,tower_http=info";

/// `RUST_LOG` wins over the default filter. `log` records from the domain
/// code are bridged into the same subscriber.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_err()
    {
        eprintln!("Logging already initialized");
    }
}

pub fn default_notifier() -> Notifier {
    let handlers: Vec<Arc<dyn NotificationHandler>> = vec![Arc::new(LogNotificationHandler)];
    Notifier::new(handlers)
}

pub async fn build_backends(config: &AppConfig) -> Result<(Option<DbPool>, Backends), anyhow::Error> {
    match config.backend {
        Backend::Postgres => {
            let pool = init_database(config)?;
            let blobs = init_drive(config).await?;
            let backends = Backends {
                cycles: Arc::new(PgCycleRegistry::new(pool.clone())),
                forms: Arc::new(PgFormStore::new(pool.clone())),
                blobs,
                audit: Arc::new(PgAuditStore::new(pool.clone())),
                notifier: default_notifier(),
            };
            Ok((Some(pool), backends))
        }
        Backend::Memory => {
            warn!("Using in-memory backend; forms and evidence are lost on restart");
            let cycles = InMemoryCycleRegistry::new();
            seed_current_cycle(&cycles).await?;
            let backends = Backends {
                cycles: Arc::new(cycles),
                forms: Arc::new(InMemoryFormStore::new()),
                blobs: Arc::new(InMemoryBlobStore::new()),
                audit: Arc::new(InMemoryAuditStore::default()),
                notifier: default_notifier(),
            };
            Ok((None, backends))
        }
    }
}

pub fn init_database(config: &AppConfig) -> Result<DbPool, anyhow::Error> {
    let pool = utils::create_conn(config).map_err(|e| {
        error!("Failed to create database pool: {}", e);
        anyhow::anyhow!("Database pool creation failed: {e}")
    })?;

    info!("Running database migrations...");
    if let Err(e) = utils::run_migrations(&pool) {
        error!("Failed to run migrations: {}", e);
        warn!("Continuing despite migration errors - database might be partially migrated");
    } else {
        info!("Database migrations completed successfully");
    }
    Ok(pool)
}

#[cfg(feature = "drive")]
async fn init_drive(config: &AppConfig) -> Result<Arc<dyn BlobStore>, anyhow::Error> {
    let store = crate::drive::S3BlobStore::new(&config.drive).await?;
    info!(
        "Evidence bucket '{}' on {}",
        config.drive.bucket, config.drive.server
    );
    Ok(Arc::new(store))
}

#[cfg(not(feature = "drive"))]
async fn init_drive(_config: &AppConfig) -> Result<Arc<dyn BlobStore>, anyhow::Error> {
    warn!("Built without the drive feature; evidence is kept in memory");
    Ok(Arc::new(InMemoryBlobStore::new()))
}

/// Registers and activates the half-year cycle containing today.
pub async fn seed_current_cycle(cycles: &InMemoryCycleRegistry) -> Result<(), anyhow::Error> {
    let (name, start, end) = half_year_containing(Utc::now().date_naive())
        .ok_or_else(|| anyhow::anyhow!("could not compute the current rating period"))?;
    let cycle = cycles.insert(&name, start, end).await;
    cycles.activate(cycle.id).await?;
    info!("Seeded active rating cycle {}", name);
    Ok(())
}

fn half_year_containing(today: NaiveDate) -> Option<(String, NaiveDate, NaiveDate)> {
    let year = today.year();
    if today.month() <= 6 {
        Some((
            format!("January-June {year}"),
            NaiveDate::from_ymd_opt(year, 1, 1)?,
            NaiveDate::from_ymd_opt(year, 6, 30)?,
        ))
    } else {
        Some((
            format!("July-December {year}"),
            NaiveDate::from_ymd_opt(year, 7, 1)?,
            NaiveDate::from_ymd_opt(year, 12, 31)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_year_boundaries() {
        let (name, start, end) =
            half_year_containing(NaiveDate::from_ymd_opt(2026, 6, 30).unwrap()).unwrap();
        assert_eq!(name, "January-June 2026");
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 6, 30).unwrap());

        let (name, _, end) =
            half_year_containing(NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()).unwrap();
        assert_eq!(name, "July-December 2026");
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 12, 31).unwrap());
    }

    #[tokio::test]
    async fn test_memory_backend_has_active_cycle() {
        let mut config = AppConfig::default();
        config.backend = Backend::Memory;
        let (conn, backends) = build_backends(&config).await.unwrap();
        assert!(conn.is_none());
        let cycle = backends.cycles.active_cycle().await.unwrap();
        assert!(cycle.is_some_and(|c| c.is_active));
    }
}
