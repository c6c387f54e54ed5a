use crate::config::{Config, MAX_POLL_INTERVAL_SECS, MIN_POLL_INTERVAL_SECS};
use crate::db::DbPool;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::HashMap;
use tracing::warn;

const KEY_DEVICE_HOST: &str = "device_host";
const KEY_POLL_INTERVAL: &str = "poll_interval_secs";
const KEY_CACHING: &str = "caching_enabled";

/// User-adjustable settings that survive restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSettings {
    pub device_host: String,
    pub poll_interval_secs: f64,
    pub caching_enabled: bool,
}

impl DashboardSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            device_host: config.device.host.clone(),
            poll_interval_secs: config.device.poll_interval_secs,
            caching_enabled: config.storage.caching_enabled,
        }
    }

    pub fn apply(&self, patch: &SettingsPatch) -> Result<Self> {
        let next = Self {
            device_host: patch
                .device_host
                .as_ref()
                .map(|h| h.trim().to_string())
                .unwrap_or_else(|| self.device_host.clone()),
            poll_interval_secs: patch.poll_interval_secs.unwrap_or(self.poll_interval_secs),
            caching_enabled: patch.caching_enabled.unwrap_or(self.caching_enabled),
        };
        next.validate()?;
        Ok(next)
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_host.is_empty() {
            return Err(AppError::Validation("device host cannot be empty".to_string()));
        }
        if !(MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&self.poll_interval_secs) {
            return Err(AppError::Validation(format!(
                "poll interval must be between {} and {} seconds",
                MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SettingsPatch {
    pub device_host: Option<String>,
    pub poll_interval_secs: Option<f64>,
    pub caching_enabled: Option<bool>,
}

pub struct SettingsRepository {
    pool: DbPool,
}

impl SettingsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Stored values layered over `defaults`. Unreadable entries keep the default.
    pub async fn load(&self, defaults: &DashboardSettings) -> Result<DashboardSettings> {
        let rows = sqlx::query("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await?;
        let mut stored = HashMap::with_capacity(rows.len());
        for row in &rows {
            let key: String = row.try_get("key")?;
            let value: String = row.try_get("value")?;
            stored.insert(key, value);
        }

        let mut settings = defaults.clone();
        if let Some(host) = stored.get(KEY_DEVICE_HOST).filter(|h| !h.trim().is_empty()) {
            settings.device_host = host.clone();
        }
        if let Some(raw) = stored.get(KEY_POLL_INTERVAL) {
            match raw.parse::<f64>() {
                Ok(secs) if (MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&secs) => {
                    settings.poll_interval_secs = secs;
                }
                _ => warn!(value = %raw, "ignoring stored poll interval"),
            }
        }
        if let Some(raw) = stored.get(KEY_CACHING) {
            match raw.parse::<bool>() {
                Ok(enabled) => settings.caching_enabled = enabled,
                Err(_) => warn!(value = %raw, "ignoring stored caching flag"),
            }
        }
        Ok(settings)
    }

    pub async fn save(&self, settings: &DashboardSettings) -> Result<()> {
        let entries = [
            (KEY_DEVICE_HOST, settings.device_host.clone()),
            (KEY_POLL_INTERVAL, settings.poll_interval_secs.to_string()),
            (KEY_CACHING, settings.caching_enabled.to_string()),
        ];

        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            sqlx::query(
                "INSERT INTO settings (key, value) VALUES (?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use pretty_assertions::assert_eq;

    fn defaults() -> DashboardSettings {
        DashboardSettings {
            device_host: "192.168.68.10".into(),
            poll_interval_secs: 1.0,
            caching_enabled: false,
        }
    }

    #[tokio::test]
    async fn test_load_without_rows_returns_defaults() {
        let repo = SettingsRepository::new(db::connect("sqlite::memory:").await.unwrap());
        assert_eq!(repo.load(&defaults()).await.unwrap(), defaults());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let repo = SettingsRepository::new(db::connect("sqlite::memory:").await.unwrap());
        let changed = DashboardSettings {
            device_host: "10.0.0.20".into(),
            poll_interval_secs: 2.5,
            caching_enabled: true,
        };
        repo.save(&changed).await.unwrap();
        repo.save(&changed).await.unwrap();
        assert_eq!(repo.load(&defaults()).await.unwrap(), changed);
    }

    #[tokio::test]
    async fn test_corrupt_values_fall_back() {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        sqlx::query("INSERT INTO settings (key, value) VALUES ('poll_interval_secs', 'fast'), ('caching_enabled', 'yes')")
            .execute(&pool)
            .await
            .unwrap();
        let repo = SettingsRepository::new(pool);
        assert_eq!(repo.load(&defaults()).await.unwrap(), defaults());
    }

    #[test]
    fn test_apply_patch_validates() {
        let base = defaults();
        let patched = base
            .apply(&SettingsPatch {
                poll_interval_secs: Some(5.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(patched.poll_interval_secs, 5.0);
        assert_eq!(patched.device_host, base.device_host);

        let err = base
            .apply(&SettingsPatch {
                device_host: Some("   ".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert!(base
            .apply(&SettingsPatch {
                poll_interval_secs: Some(0.0),
                ..Default::default()
            })
            .is_err());
    }
}
