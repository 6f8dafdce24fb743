use crate::config::DatabaseConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgConnectOptions, PgDatabaseError, PgPool, PgPoolOptions};
use sqlx::FromRow;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Persistence failures, classified by what the caller can do about them
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Short identifier already exists: {0}")]
    DuplicateIdentifier(String),

    #[error("Required column missing: {0}")]
    MissingRequiredField(String),

    #[error("Identity record {0} does not exist")]
    RecordMissing(i64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Stored identity record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct IdentityRecord {
    /// Internal primary key
    pub id: i64,
    /// Short public identifier
    pub nano_id: String,
    /// QR payload
    pub qr_content: String,
    /// Opaque profile payload
    pub data: serde_json::Value,
    /// Record type tag ("persona", "mascota", ...)
    pub vcard_type: Option<String>,
    /// Public URL of the uploaded image
    pub pic_path: Option<String>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

/// Skeleton record written before any image upload
#[derive(Debug, Clone, PartialEq)]
pub struct NewIdentity {
    pub nano_id: String,
    pub qr_content: String,
    pub data: serde_json::Value,
    pub vcard_type: Option<String>,
}

/// Persistence seam for identity records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    /// Insert a record; the store assigns `id` and `created_at`
    async fn insert(&self, record: NewIdentity) -> Result<IdentityRecord, StoreError>;

    /// Set the image URL of an existing record
    async fn update_pic_path(&self, id: i64, pic_path: &str) -> Result<(), StoreError>;

    async fn find_by_nano_id(&self, nano_id: &str) -> Result<Option<IdentityRecord>, StoreError>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<(), StoreError>;
}

/// PostgreSQL-backed identity store
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    /// Create a new identity store with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let options = match config.url {
            Some(ref url) => url.parse::<PgConnectOptions>()?,
            None => PgConnectOptions::new()
                .host(&config.host)
                .port(config.port)
                .username(&config.user)
                .password(&config.password)
                .database(&config.name),
        }
        .options([("search_path", config.schema.as_str())]);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect_with(options)
            .await?;

        info!(
            host = %config.host,
            database = %config.name,
            schema = %config.schema,
            "Connected to PostgreSQL database"
        );

        Ok(Self { pool })
    }

    /// Create the identity table when it does not exist yet
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        info!("Ensuring identity schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS identity (
                id BIGSERIAL PRIMARY KEY,
                nano_id VARCHAR(255) NOT NULL,
                qr_content TEXT NOT NULL,
                data JSONB NOT NULL,
                vcard_type VARCHAR(100),
                pic_path TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS identity_nano_id_key ON identity (nano_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl IdentityRepository for PgIdentityStore {
    #[instrument(skip(self, record), fields(nano_id = %record.nano_id))]
    async fn insert(&self, record: NewIdentity) -> Result<IdentityRecord, StoreError> {
        let stored = sqlx::query_as::<_, IdentityRecord>(
            r#"
            INSERT INTO identity (nano_id, qr_content, data, vcard_type, pic_path)
            VALUES ($1, $2, $3, $4, NULL)
            RETURNING id, nano_id, qr_content, data, vcard_type, pic_path, created_at
            "#,
        )
        .bind(&record.nano_id)
        .bind(&record.qr_content)
        .bind(&record.data)
        .bind(&record.vcard_type)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify_error(e, &record.nano_id))?;

        debug!(id = stored.id, "Identity record inserted");
        Ok(stored)
    }

    #[instrument(skip(self))]
    async fn update_pic_path(&self, id: i64, pic_path: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE identity SET pic_path = $2 WHERE id = $1")
            .bind(id)
            .bind(pic_path)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordMissing(id));
        }

        Ok(())
    }

    async fn find_by_nano_id(&self, nano_id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let record = sqlx::query_as::<_, IdentityRecord>(
            r#"
            SELECT id, nano_id, qr_content, data, vcard_type, pic_path, created_at
            FROM identity
            WHERE nano_id = $1
            "#,
        )
        .bind(nano_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Map constraint violations onto their store error kinds
fn classify_error(error: sqlx::Error, nano_id: &str) -> StoreError {
    let kind = match error {
        sqlx::Error::Database(ref db) => Some((
            db.kind(),
            db.try_downcast_ref::<PgDatabaseError>()
                .and_then(|pg| pg.column())
                .map(String::from),
        )),
        _ => None,
    };

    match kind {
        Some((ErrorKind::UniqueViolation, _)) => StoreError::DuplicateIdentifier(nano_id.to_string()),
        Some((ErrorKind::NotNullViolation, column)) => {
            StoreError::MissingRequiredField(column.unwrap_or_else(|| "unknown".to_string()))
        }
        _ => StoreError::Database(error),
    }
}
