use config::builder::{ConfigBuilder, DefaultState};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the identity service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// S3 connection configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Image upload rules
    #[serde(default)]
    pub upload: UploadConfig,
    /// Short identifier generation
    #[serde(default)]
    pub identifier: IdentifierConfig,
    /// QR content configuration
    #[serde(default)]
    pub qr: QrConfig,
    /// Registration workflow policy
    #[serde(default)]
    pub registration: RegistrationConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum accepted request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Database configuration
///
/// `url` wins when set; otherwise the connection is assembled from the
/// individual fields.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Database name
    #[serde(default = "default_db_name")]
    pub name: String,
    /// Schema placed on the connection search path
    #[serde(default = "default_db_schema")]
    pub schema: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Create the identity table on startup when it does not exist
    #[serde(default = "default_true")]
    pub ensure_schema: bool,
}

/// S3 connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for identity images
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Static access key; falls back to the AWS default chain when unset
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

/// Image upload rules
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum image size in bytes (10MB default)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
    /// Accepted image MIME types
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
    /// Key prefix for pet ("mascota") records
    #[serde(default = "default_folder_path_mascotas")]
    pub folder_path_mascotas: String,
    /// Key prefix for person ("persona") records and the fallback
    #[serde(default = "default_folder_path_personas")]
    pub folder_path_personas: String,
}

/// Short identifier generation
#[derive(Debug, Clone, Deserialize)]
pub struct IdentifierConfig {
    /// Identifier length
    #[serde(default = "default_identifier_size")]
    pub size: usize,
    /// Symbols identifiers are drawn from
    #[serde(default = "default_identifier_alphabet")]
    pub alphabet: String,
}

/// QR content configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QrConfig {
    /// Prefix prepended to the short identifier
    #[serde(default = "default_qr_base_url")]
    pub base_url: String,
    /// Also render the QR content as an SVG data URL
    #[serde(default)]
    pub render_image: bool,
}

/// What a failed image upload does to the registration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFailurePolicy {
    /// Log the failure and return the record without an image
    #[default]
    Continue,
    /// Fail the request; the record stays persisted without an image
    Fail,
}

/// Registration workflow policy
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    #[serde(default)]
    pub image_failure_policy: ImageFailurePolicy,
    /// Extra attempts with a fresh identifier after a collision
    #[serde(default = "default_duplicate_retries")]
    pub duplicate_retries: u32,
}

// Default value functions
fn default_service_name() -> String {
    "identity-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    3000
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024 // 16MB, room for a base64 encoded 10MB image
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_db_name() -> String {
    "qr_identity_db".to_string()
}

fn default_db_schema() -> String {
    "public".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_bucket() -> String {
    "bucket-01-desarrollo".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_file_size() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_allowed_mime_types() -> Vec<String> {
    ["image/jpeg", "image/png", "image/gif", "image/webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_folder_path_mascotas() -> String {
    "vCards056/uploads/images/mascotas/".to_string()
}

fn default_folder_path_personas() -> String {
    "vCards056/uploads/images/personas/".to_string()
}

fn default_identifier_size() -> usize {
    10
}

fn default_identifier_alphabet() -> String {
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz".to_string()
}

fn default_qr_base_url() -> String {
    "http://056.cl/".to_string()
}

fn default_duplicate_retries() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Flat environment names accepted on top of the `IDENTITY__` ones
const LEGACY_ENV: &[(&str, &str)] = &[
    ("s3.region", "AWS_REGION"),
    ("s3.access_key_id", "AWS_ACCESS_KEY_ID"),
    ("s3.secret_access_key", "AWS_SECRET_ACCESS_KEY"),
    ("s3.bucket", "AWS_S3_BUCKET_NAME"),
    ("upload.max_file_size", "AWS_S3_MAX_FILE_SIZE"),
    ("upload.folder_path_mascotas", "AWS_S3_FOLDER_PATH_MASCOTAS"),
    ("upload.folder_path_personas", "AWS_S3_FOLDER_PATH_PERSONAS"),
    ("identifier.size", "NANOID_SIZE"),
    ("identifier.alphabet", "NANOID_ALPHABET"),
    ("api.port", "PORT"),
];

impl Config {
    /// Load configuration from config files and environment
    pub fn load() -> anyhow::Result<Self> {
        let mut builder = apply_db_properties(
            config::Config::builder(),
            "config/postgres-config.properties",
        )?
        .add_source(config::File::with_name("config/identity").required(false))
            .add_source(config::File::with_name("/etc/identity/identity").required(false))
            // IDENTITY__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("IDENTITY")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("upload.allowed_mime_types")
                    .with_list_parse_key("api.cors_origins"),
            );

        for (key, var) in LEGACY_ENV {
            builder = builder.set_override_option(*key, std::env::var(var).ok())?;
        }

        if let Ok(types) = std::env::var("AWS_S3_ALLOWED_MIME_TYPES") {
            builder = builder.set_override("upload.allowed_mime_types", split_list(&types))?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identifier.size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "identifier.size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.identifier.alphabet.is_empty() {
            return Err(ConfigError::MissingRequired("identifier.alphabet".to_string()));
        }

        if self.upload.max_file_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "upload.max_file_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.upload.allowed_mime_types.is_empty() {
            return Err(ConfigError::MissingRequired(
                "upload.allowed_mime_types".to_string(),
            ));
        }

        if self.s3.bucket.trim().is_empty() {
            return Err(ConfigError::MissingRequired("s3.bucket".to_string()));
        }

        if self.s3.access_key_id.is_some() != self.s3.secret_access_key.is_some() {
            return Err(ConfigError::InvalidValue {
                key: "s3.access_key_id".to_string(),
                message: "access key id and secret access key must be set together".to_string(),
            });
        }

        Ok(())
    }
}

impl DatabaseConfig {
    /// Get pool acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get pool idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Keys of `config/postgres-config.properties` and the settings they feed
const DB_PROPERTIES: &[(&str, &str)] = &[
    ("host", "database.host"),
    ("port", "database.port"),
    ("user", "database.user"),
    ("password", "database.password"),
    ("database", "database.name"),
    ("schema", "database.schema"),
];

/// Use a `key=value` properties file as database defaults
///
/// Values replace built-in defaults only; config files and env still win.
fn apply_db_properties(
    mut builder: ConfigBuilder<DefaultState>,
    path: &str,
) -> anyhow::Result<ConfigBuilder<DefaultState>> {
    let properties = config::Config::builder()
        .add_source(config::File::new(path, config::FileFormat::Ini).required(false))
        .build()?;

    for (property, key) in DB_PROPERTIES {
        if let Ok(value) = properties.get_string(property) {
            builder = builder.set_default(*key, value)?;
        }
    }

    Ok(builder)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_db_host(),
            port: default_db_port(),
            user: default_db_user(),
            password: String::new(),
            name: default_db_name(),
            schema: default_db_schema(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            ensure_schema: default_true(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            allowed_mime_types: default_allowed_mime_types(),
            folder_path_mascotas: default_folder_path_mascotas(),
            folder_path_personas: default_folder_path_personas(),
        }
    }
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            size: default_identifier_size(),
            alphabet: default_identifier_alphabet(),
        }
    }
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            base_url: default_qr_base_url(),
            render_image: false,
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            image_failure_policy: ImageFailurePolicy::default(),
            duplicate_retries: default_duplicate_retries(),
        }
    }
}
