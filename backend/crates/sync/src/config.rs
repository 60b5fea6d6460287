use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shopsync_common::error::{ShopsyncError, ShopsyncResult};
use shopsync_common::types::ResourceType;
use shopsync_config::parse_var_or;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub page_size: u32,
    /// Upper bound on exports (and remote deletes) per run.
    pub export_batch: i64,
    pub use_bulk_for_full: bool,
    pub resources: Vec<ResourceType>,
    pub worker_poll_interval_secs: u64,
    /// Interval of the built-in incremental trigger; 0 disables it.
    pub schedule_interval_secs: u64,
    pub webhook_retention_days: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            export_batch: 100,
            use_bulk_for_full: false,
            resources: ResourceType::ALL.to_vec(),
            worker_poll_interval_secs: 5,
            schedule_interval_secs: 0,
            webhook_retention_days: 7,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> ShopsyncResult<Self> {
        let defaults = Self::default();

        let resources = match std::env::var("SYNC_RESOURCES") {
            Ok(raw) if !raw.trim().is_empty() => parse_resources(&raw)?,
            _ => defaults.resources,
        };

        let page_size = parse_var_or("SYNC_PAGE_SIZE", defaults.page_size)?;
        if page_size == 0 || page_size > 250 {
            return Err(ShopsyncError::Config(format!(
                "SYNC_PAGE_SIZE must be between 1 and 250, got {page_size}"
            )));
        }

        Ok(Self {
            page_size,
            export_batch: parse_var_or("SYNC_EXPORT_BATCH", defaults.export_batch)?,
            use_bulk_for_full: parse_var_or("SYNC_USE_BULK_FOR_FULL", defaults.use_bulk_for_full)?,
            resources,
            worker_poll_interval_secs: parse_var_or(
                "WORKER_POLL_INTERVAL_SECS",
                defaults.worker_poll_interval_secs,
            )?,
            schedule_interval_secs: parse_var_or(
                "SYNC_SCHEDULE_INTERVAL_SECS",
                defaults.schedule_interval_secs,
            )?,
            webhook_retention_days: parse_var_or(
                "WEBHOOK_EVENT_RETENTION_DAYS",
                defaults.webhook_retention_days,
            )?,
        })
    }
}

/// Parse a comma-separated resource list, dropping duplicates.
pub fn parse_resources(raw: &str) -> ShopsyncResult<Vec<ResourceType>> {
    let mut resources = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let resource = ResourceType::from_str(part).map_err(ShopsyncError::Config)?;
        if !resources.contains(&resource) {
            resources.push(resource);
        }
    }
    if resources.is_empty() {
        return Err(ShopsyncError::Config(
            "SYNC_RESOURCES is set but names no resource".to_string(),
        ));
    }
    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn parse_resources_dedups_and_normalizes() {
        let parsed = parse_resources(" products, Customer ,product").unwrap();
        assert_eq!(parsed, vec![ResourceType::Product, ResourceType::Customer]);
    }

    #[test]
    fn parse_resources_rejects_unknown_and_empty() {
        assert!(parse_resources("product,collections").is_err());
        assert!(parse_resources(" , ").is_err());
    }

    #[test]
    fn from_env_defaults() {
        let _g = ENV_LOCK.lock().unwrap();
        for key in ["SYNC_RESOURCES", "SYNC_PAGE_SIZE", "SYNC_USE_BULK_FOR_FULL"] {
            std::env::remove_var(key);
        }
        let cfg = SyncConfig::from_env().unwrap();
        assert_eq!(cfg.page_size, 50);
        assert!(!cfg.use_bulk_for_full);
        assert_eq!(cfg.resources.len(), 3);
    }

    #[test]
    fn from_env_rejects_oversized_pages() {
        let _g = ENV_LOCK.lock().unwrap();
        std::env::set_var("SYNC_PAGE_SIZE", "500");
        let err = SyncConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("SYNC_PAGE_SIZE"));
        std::env::remove_var("SYNC_PAGE_SIZE");
    }
}
