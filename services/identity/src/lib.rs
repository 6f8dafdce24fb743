//! Identity Registration Service
//!
//! Registers identity records (people, pets) that are reachable through a
//! short public identifier encoded in a QR code. Each record carries an
//! opaque profile payload and an optional image stored in S3.
//!
//! ## Features
//!
//! - **Short Identifiers**: Fixed-length random identifiers over a
//!   configurable alphabet, drawn from the OS random source
//! - **QR Content**: Public URL built from a base prefix and the identifier,
//!   optionally rendered as an SVG data URL
//! - **Image Upload**: Binary or base64 data-URL images, validated for size
//!   and media type before anything is written
//! - **PostgreSQL Records**: Skeleton insert first, image URL patched in
//!   after a successful upload
//!
//! ## Architecture
//!
//! ```text
//! HTTP API                  PostgreSQL               S3 Bucket
//! ┌──────────────┐         ┌──────────────┐         ┌──────────────┐
//! │ POST         │         │ identity     │         │ {folder}/    │
//! │ /identities  │         └──────────────┘         │   {id}/      │
//! └──────────────┘            ▲       ▲             │   {id}.{ext} │
//!        │                    │       │             └──────────────┘
//!        ▼                    │       │                    ▲
//! ┌──────────────┐  insert    │       │ patch pic_path     │
//! │ Identity     │────────────┘       │                    │
//! │ Service      │────────────────────┘             ┌──────────────┐
//! └──────────────┘─────────────────────────────────▶│ Image        │
//!        │                                          │ Storage      │
//!        ▼                                          └──────────────┘
//! ┌──────────────┐
//! │ Id Generator │
//! │ QR Builder   │
//! └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod id_generator;
pub mod identity_store;
pub mod image_storage;
pub mod qr;
pub mod registration;
pub mod s3_uploader;

pub use api::{create_router, start_api_server, AppState, ErrorResponse};
pub use config::{Config, ConfigError, ImageFailurePolicy};
pub use id_generator::IdGenerator;
pub use identity_store::{IdentityRecord, IdentityRepository, PgIdentityStore, StoreError};
pub use image_storage::{ImageStorage, ValidationError};
pub use qr::QrBuilder;
pub use registration::{
    IdentityError, IdentityResponse, IdentityService, ImageInput, ImageMetadata,
    RegistrationRequest,
};
pub use s3_uploader::{ObjectStore, S3Uploader, StorageError};
