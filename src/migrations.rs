use deadpool_postgres::{Pool, Transaction};
use log::info;

type MigrationResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// schema steps in order; a step never changes once released
const MIGRATIONS: &[(i32, &str)] = &[
    (
        1,
        r#"
        -- directory channels; metrics are written by the fetcher
        CREATE TABLE channels (
            id SERIAL PRIMARY KEY,
            owner_id BIGINT NOT NULL DEFAULT 0,
            name VARCHAR(255) NOT NULL,
            tg_link VARCHAR(255) NOT NULL UNIQUE,
            tg_id BIGINT NOT NULL UNIQUE,
            category VARCHAR(255) NOT NULL DEFAULT '',
            sub_count BIGINT NOT NULL DEFAULT 0 CHECK (sub_count >= 0),
            avg_coverage BIGINT NOT NULL DEFAULT 0 CHECK (avg_coverage >= 0),
            er DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (er >= 0),
            cpm DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (cpm >= 0),
            post_price DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (post_price >= 0),
            photo_path VARCHAR(512) NOT NULL DEFAULT '',
            created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
        );

        CREATE INDEX idx_channels_sub_count ON channels(sub_count);
        CREATE INDEX idx_channels_er ON channels(er);
        "#,
    ),
    (
        2,
        r#"
        -- last fetcher refresh
        ALTER TABLE channels ADD COLUMN updated_at TIMESTAMP WITH TIME ZONE DEFAULT NOW();
        CREATE INDEX idx_channels_updated ON channels(updated_at);
        "#,
    ),
];

pub struct MigrationManager;

impl MigrationManager {
    /// brings the schema to `latest_version`, all pending steps in one transaction
    pub async fn run_migrations(pool: &Pool) -> MigrationResult<()> {
        info!("Running database migrations...");
        let mut client = pool.get().await?;
        let transaction = client.transaction().await?;

        transaction
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
                )",
            )
            .await?;

        let current_version = Self::current_version(&transaction).await?;
        let pending: Vec<_> = MIGRATIONS
            .iter()
            .filter(|(version, _)| *version > current_version)
            .collect();

        if pending.is_empty() {
            info!("Database schema is up to date (version {})", current_version);
            return Ok(());
        }

        for (version, sql) in pending {
            transaction.batch_execute(sql).await?;
            transaction
                .execute(
                    "INSERT INTO schema_migrations (version) VALUES ($1)",
                    &[version],
                )
                .await?;
            info!("Applied migration {}", version);
        }

        transaction.commit().await?;
        info!("Database migrations completed (version {})", Self::latest_version());
        Ok(())
    }

    async fn current_version(transaction: &Transaction<'_>) -> MigrationResult<i32> {
        let row = transaction
            .query_one("SELECT MAX(version) FROM schema_migrations", &[])
            .await?;
        Ok(row.get::<_, Option<i32>>(0).unwrap_or(0))
    }

    pub fn latest_version() -> i32 {
        MIGRATIONS.last().map_or(0, |(version, _)| *version)
    }
}
