//! # Settings Repository
//!
//! The single `site_settings` row. A missing row means "use defaults".

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::error::DbResult;
use market_core::{PointsRate, StoreSettings};

#[derive(Debug, sqlx::FromRow)]
struct SettingsRow {
    company_name: String,
    bank_name: String,
    bank_account_name: String,
    bank_account_number: String,
    points_rate_minor: i64,
    referral_bonus_amount: i64,
    currency_code: String,
}

impl From<SettingsRow> for StoreSettings {
    fn from(row: SettingsRow) -> Self {
        StoreSettings {
            company_name: row.company_name,
            bank_name: row.bank_name,
            bank_account_name: row.bank_account_name,
            bank_account_number: row.bank_account_number,
            points_to_currency_rate: PointsRate::from_minor_per_point(row.points_rate_minor),
            referral_bonus_amount: row.referral_bonus_amount,
            currency_code: row.currency_code,
        }
    }
}

/// Repository for store settings.
#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    /// Creates a new SettingsRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SettingsRepository { pool }
    }

    /// Reads the settings in effect on the given connection.
    pub async fn load(conn: &mut SqliteConnection) -> DbResult<StoreSettings> {
        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            SELECT company_name, bank_name, bank_account_name, bank_account_number,
                   points_rate_minor, referral_bonus_amount, currency_code
            FROM site_settings
            WHERE id = 1
            "#,
        )
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(StoreSettings::from).unwrap_or_default())
    }

    /// Reads the current settings from the pool.
    pub async fn current(&self) -> DbResult<StoreSettings> {
        let mut conn = self.pool.acquire().await?;
        Self::load(&mut conn).await
    }

    /// Writes `settings` only if no row exists yet.
    /// Returns whether the row was created.
    pub async fn initialize(&self, settings: &StoreSettings, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO site_settings (
                id, company_name, bank_name, bank_account_name, bank_account_number,
                points_rate_minor, referral_bonus_amount, currency_code, updated_at
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&settings.company_name)
        .bind(&settings.bank_name)
        .bind(&settings.bank_account_name)
        .bind(&settings.bank_account_number)
        .bind(settings.points_to_currency_rate.minor_per_point())
        .bind(settings.referral_bonus_amount)
        .bind(&settings.currency_code)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() == 1;
        if created {
            info!(rate = %settings.points_to_currency_rate, "Store settings initialized");
        }
        Ok(created)
    }

    /// Creates or replaces the settings row.
    pub async fn save(&self, settings: &StoreSettings, now: DateTime<Utc>) -> DbResult<()> {
        info!(
            rate = %settings.points_to_currency_rate,
            referral_bonus = settings.referral_bonus_amount,
            "Saving store settings"
        );

        sqlx::query(
            r#"
            INSERT INTO site_settings (
                id, company_name, bank_name, bank_account_name, bank_account_number,
                points_rate_minor, referral_bonus_amount, currency_code, updated_at
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (id) DO UPDATE SET
                company_name = excluded.company_name,
                bank_name = excluded.bank_name,
                bank_account_name = excluded.bank_account_name,
                bank_account_number = excluded.bank_account_number,
                points_rate_minor = excluded.points_rate_minor,
                referral_bonus_amount = excluded.referral_bonus_amount,
                currency_code = excluded.currency_code,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&settings.company_name)
        .bind(&settings.bank_name)
        .bind(&settings.bank_account_name)
        .bind(&settings.bank_account_number)
        .bind(settings.points_to_currency_rate.minor_per_point())
        .bind(settings.referral_bonus_amount)
        .bind(&settings.currency_code)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_defaults_when_no_row() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let settings = db.settings().current().await.unwrap();
        assert_eq!(settings, StoreSettings::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.settings();

        let mut settings = StoreSettings::default();
        settings.points_to_currency_rate = PointsRate::from_minor_per_point(25);
        settings.referral_bonus_amount = 80;
        repo.save(&settings, Utc::now()).await.unwrap();

        settings.bank_name = "Bangkok Bank".to_string();
        repo.save(&settings, Utc::now()).await.unwrap();

        let loaded = repo.current().await.unwrap();
        assert_eq!(loaded, settings);
    }

    #[tokio::test]
    async fn test_initialize_keeps_existing_row() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.settings();

        let mut first = StoreSettings::default();
        first.referral_bonus_amount = 70;
        assert!(repo.initialize(&first, Utc::now()).await.unwrap());

        let second = StoreSettings::default();
        assert!(!repo.initialize(&second, Utc::now()).await.unwrap());
        assert_eq!(repo.current().await.unwrap().referral_bonus_amount, 70);
    }
}
