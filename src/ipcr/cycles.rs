use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::{IpcrError, IpcrResult};
use super::types::RatingCycle;
use crate::core::shared::schema::ipcr_rating_cycles;
use crate::core::shared::utils::DbPool;

/// Read access to rating periods. Implementations must not cache the
/// active cycle; every call reflects the current stored flag.
#[async_trait]
pub trait RatingCycleRegistry: Send + Sync {
    async fn active_cycle(&self) -> IpcrResult<Option<RatingCycle>>;
    async fn get_cycle(&self, cycle_id: Uuid) -> IpcrResult<Option<RatingCycle>>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCycleRegistry {
    cycles: Arc<RwLock<Vec<RatingCycle>>>,
}

impl InMemoryCycleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, name: &str, period_start: NaiveDate, period_end: NaiveDate) -> RatingCycle {
        let cycle = RatingCycle {
            id: Uuid::new_v4(),
            name: name.to_string(),
            period_start,
            period_end,
            is_active: false,
            created_at: Utc::now(),
        };
        self.cycles.write().await.push(cycle.clone());
        cycle
    }

    /// Marks `cycle_id` active and clears the flag everywhere else.
    pub async fn activate(&self, cycle_id: Uuid) -> IpcrResult<()> {
        let mut cycles = self.cycles.write().await;
        if !cycles.iter().any(|c| c.id == cycle_id) {
            return Err(IpcrError::NotFound("Rating cycle not found".to_string()));
        }
        for cycle in cycles.iter_mut() {
            cycle.is_active = cycle.id == cycle_id;
        }
        Ok(())
    }

    pub async fn deactivate_all(&self) {
        for cycle in self.cycles.write().await.iter_mut() {
            cycle.is_active = false;
        }
    }
}

#[async_trait]
impl RatingCycleRegistry for InMemoryCycleRegistry {
    async fn active_cycle(&self) -> IpcrResult<Option<RatingCycle>> {
        Ok(self.cycles.read().await.iter().find(|c| c.is_active).cloned())
    }

    async fn get_cycle(&self, cycle_id: Uuid) -> IpcrResult<Option<RatingCycle>> {
        Ok(self.cycles.read().await.iter().find(|c| c.id == cycle_id).cloned())
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ipcr_rating_cycles)]
struct CycleRecord {
    id: Uuid,
    name: String,
    period_start: NaiveDate,
    period_end: NaiveDate,
    is_active: bool,
    created_at: DateTime<Utc>,
}

fn record_to_cycle(record: CycleRecord) -> RatingCycle {
    RatingCycle {
        id: record.id,
        name: record.name,
        period_start: record.period_start,
        period_end: record.period_end,
        is_active: record.is_active,
        created_at: record.created_at,
    }
}

pub struct PgCycleRegistry {
    pool: DbPool,
}

impl PgCycleRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RatingCycleRegistry for PgCycleRegistry {
    async fn active_cycle(&self) -> IpcrResult<Option<RatingCycle>> {
        let pool = self.pool.clone();
        let record = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            ipcr_rating_cycles::table
                .filter(ipcr_rating_cycles::is_active.eq(true))
                .select(CycleRecord::as_select())
                .first::<CycleRecord>(&mut conn)
                .optional()
                .map_err(IpcrError::from)
        })
        .await??;

        Ok(record.map(record_to_cycle))
    }

    async fn get_cycle(&self, cycle_id: Uuid) -> IpcrResult<Option<RatingCycle>> {
        let pool = self.pool.clone();
        let record = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            ipcr_rating_cycles::table
                .find(cycle_id)
                .select(CycleRecord::as_select())
                .first::<CycleRecord>(&mut conn)
                .optional()
                .map_err(IpcrError::from)
        })
        .await??;

        Ok(record.map(record_to_cycle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_no_active_cycle_is_not_an_error() {
        let registry = InMemoryCycleRegistry::new();
        registry.insert("Jan-Jun 2026", date(2026, 1, 1), date(2026, 6, 30)).await;
        assert!(registry.active_cycle().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_activation_is_exclusive() {
        let registry = InMemoryCycleRegistry::new();
        let first = registry.insert("Jan-Jun 2026", date(2026, 1, 1), date(2026, 6, 30)).await;
        let second = registry.insert("Jul-Dec 2026", date(2026, 7, 1), date(2026, 12, 31)).await;

        registry.activate(first.id).await.unwrap();
        assert_eq!(registry.active_cycle().await.unwrap().unwrap().id, first.id);

        registry.activate(second.id).await.unwrap();
        let active = registry.active_cycle().await.unwrap().unwrap();
        assert_eq!(active.id, second.id);
        assert!(!registry.get_cycle(first.id).await.unwrap().unwrap().is_active);

        assert!(registry.activate(Uuid::new_v4()).await.is_err());
    }
}
