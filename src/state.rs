use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use moka::future::Cache;
use serde_json::Value;
use sqlx::PgPool;

use crate::{config::AppConfig, db::build_pool, error::AppError};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub reporting_tz: Tz,
    pub report_cache: Cache<String, Value>,
    report_generation: Arc<AtomicU64>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, sqlx::Error> {
        let db_pool = build_pool(&config)?;
        let reporting_tz = config.reporting_tz();
        let report_cache = Cache::builder()
            .max_capacity(config.report_response_cache_max_entries)
            .time_to_live(Duration::from_secs(
                config.report_response_cache_ttl_seconds.max(1),
            ))
            .build();

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            reporting_tz,
            report_cache,
            report_generation: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn db_pool(&self) -> Result<&PgPool, AppError> {
        self.db_pool.as_ref().ok_or_else(|| {
            AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
        })
    }

    /// Cache key for a report selection under the current generation. A load
    /// that started before an invalidation stores under the old generation,
    /// which no later lookup asks for.
    pub fn report_cache_key(&self, selection_key: &str) -> String {
        format!(
            "{}|{selection_key}",
            self.report_generation.load(Ordering::Acquire)
        )
    }

    /// Drops every cached monthly report. Called after any write that can
    /// change report contents.
    pub fn invalidate_reports(&self) {
        self.report_generation.fetch_add(1, Ordering::AcqRel);
        self.report_cache.invalidate_all();
    }
}
