use crate::config::{ImageFailurePolicy, RegistrationConfig};
use crate::id_generator::IdGenerator;
use crate::identity_store::{IdentityRecord, IdentityRepository, NewIdentity, StoreError};
use crate::image_storage::{ImageStorage, PreparedImage, ValidationError};
use crate::qr::QrBuilder;
use crate::s3_uploader::StorageError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Errors surfaced by the registration and lookup workflows
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Generated identifier already exists: {0}")]
    DuplicateIdentifier(String),

    #[error("Required data missing")]
    MissingRequiredField,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Identity not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for IdentityError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateIdentifier(id) => IdentityError::DuplicateIdentifier(id),
            StoreError::MissingRequiredField(column) => {
                warn!(column = %column, "Not-null constraint violated");
                IdentityError::MissingRequiredField
            }
            other => IdentityError::Internal(other.to_string()),
        }
    }
}

/// Image material attached to a registration
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// Raw file upload
    Binary {
        bytes: Vec<u8>,
        file_name: String,
        content_type: String,
    },
    /// `data:image/<type>;base64,<data>` payload
    Base64 {
        payload: String,
        file_name: String,
        mime_type: String,
    },
}

/// Registration input
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub vcard_type: String,
    pub data: serde_json::Value,
    pub image: Option<ImageInput>,
}

/// Image fields of a response; all null when the record has no image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub image_name: Option<String>,
    pub image_type: Option<String>,
    pub image_path_s3: Option<String>,
}

impl ImageMetadata {
    /// Rebuild image fields from a stored URL
    ///
    /// Name and type are not persisted; both derive from the last path segment.
    pub fn from_stored_path(pic_path: Option<&str>) -> Self {
        let Some(path) = pic_path.filter(|p| !p.is_empty()) else {
            return Self::default();
        };

        let without_query = path.split(['?', '#']).next().unwrap_or(path);
        let name = without_query
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .map(String::from);

        Self {
            image_type: Some(mime_type_for_path(without_query).to_string()),
            image_name: name,
            image_path_s3: Some(path.to_string()),
        }
    }
}

/// Response shared by registration and lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResponse {
    pub id: i64,
    pub nano_id: String,
    pub qr_content: String,
    /// Rendered QR code, when enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_image: Option<String>,
    pub vcard_type: Option<String>,
    pub image: ImageMetadata,
    pub data: serde_json::Value,
    /// UTC, millisecond precision, `Z` suffix
    #[serde(rename = "created_at")]
    pub created_at: String,
}

/// Registration and lookup workflows
///
/// Registration writes the skeleton record before uploading the image, so a
/// record is visible with a null `pic_path` while its upload is in flight.
/// A crash in that window leaves the record without an image and possibly an
/// orphaned object; nothing compensates for it.
pub struct IdentityService {
    repository: Arc<dyn IdentityRepository>,
    images: ImageStorage,
    ids: IdGenerator,
    qr: QrBuilder,
    policy: RegistrationConfig,
}

impl IdentityService {
    pub fn new(
        repository: Arc<dyn IdentityRepository>,
        images: ImageStorage,
        ids: IdGenerator,
        qr: QrBuilder,
        policy: RegistrationConfig,
    ) -> Self {
        Self {
            repository,
            images,
            ids,
            qr,
            policy,
        }
    }

    pub fn repository(&self) -> &Arc<dyn IdentityRepository> {
        &self.repository
    }

    /// Register a new identity record
    #[instrument(skip(self, request), fields(vcard_type = %request.vcard_type))]
    pub async fn register(
        &self,
        request: RegistrationRequest,
    ) -> Result<IdentityResponse, IdentityError> {
        let result = self.try_register(request).await;

        match result {
            Ok(ref response) => {
                metrics::counter!("identity.registrations").increment(1);
                info!(id = response.id, nano_id = %response.nano_id, "Registration completed");
            }
            Err(ref e) => {
                metrics::counter!("identity.registrations.failed").increment(1);
                error!(error = %e, "Registration failed");
            }
        }

        result
    }

    async fn try_register(
        &self,
        request: RegistrationRequest,
    ) -> Result<IdentityResponse, IdentityError> {
        let vcard_type = request.vcard_type.trim().to_string();
        if vcard_type.is_empty() {
            return Err(ValidationError::MissingField("vcardType").into());
        }

        if !request.data.is_object() {
            return Err(ValidationError::InvalidField {
                field: "data",
                message: "must be a JSON object".to_string(),
            }
            .into());
        }

        // Everything about the image is checked before the first write
        let image = request
            .image
            .map(|input| self.prepare_image(input))
            .transpose()?;

        let mut record = self.insert_skeleton(&vcard_type, request.data).await?;
        info!(id = record.id, nano_id = %record.nano_id, "Identity record persisted");

        let image_metadata = match image {
            Some(image) => self.attach_image(&mut record, image, &vcard_type).await?,
            None => {
                debug!(nano_id = %record.nano_id, "No image provided");
                ImageMetadata::default()
            }
        };

        self.respond(record, image_metadata)
    }

    fn prepare_image(&self, input: ImageInput) -> Result<PreparedImage, ValidationError> {
        match input {
            ImageInput::Binary {
                bytes,
                file_name,
                content_type,
            } => self.images.prepare_binary(bytes, &file_name, &content_type),
            ImageInput::Base64 {
                payload,
                file_name,
                mime_type,
            } => {
                if file_name.trim().is_empty() {
                    return Err(ValidationError::MissingField("imageName"));
                }
                if mime_type.trim().is_empty() {
                    return Err(ValidationError::MissingField("imageType"));
                }
                self.images.prepare_base64(&payload, &file_name, &mime_type)
            }
        }
    }

    /// Insert the skeleton, retrying with a fresh identifier on collision
    async fn insert_skeleton(
        &self,
        vcard_type: &str,
        data: serde_json::Value,
    ) -> Result<IdentityRecord, IdentityError> {
        let attempts = self.policy.duplicate_retries.saturating_add(1);
        let mut last_collision = String::new();

        for attempt in 1..=attempts {
            let nano_id = self.ids.generate();
            let skeleton = NewIdentity {
                qr_content: self.qr.build(&nano_id),
                nano_id,
                data: data.clone(),
                vcard_type: Some(vcard_type.to_string()),
            };

            match self.repository.insert(skeleton).await {
                Ok(record) => return Ok(record),
                Err(StoreError::DuplicateIdentifier(nano_id)) => {
                    metrics::counter!("identity.identifier_collisions").increment(1);
                    warn!(nano_id = %nano_id, attempt = attempt, "Identifier collision");
                    last_collision = nano_id;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(IdentityError::DuplicateIdentifier(last_collision))
    }

    /// Upload the image and patch the record, applying the failure policy
    async fn attach_image(
        &self,
        record: &mut IdentityRecord,
        image: PreparedImage,
        vcard_type: &str,
    ) -> Result<ImageMetadata, IdentityError> {
        let file_name = image.file_name.clone();
        let content_type = image.content_type.clone();

        let outcome = match self.images.upload(image, vcard_type, &record.nano_id).await {
            Ok(url) => match self.repository.update_pic_path(record.id, &url).await {
                Ok(()) => Ok(url),
                Err(e) => {
                    // The object is unreachable without the patch
                    if let Err(cleanup) = self.images.delete_by_url(Some(url.as_str())).await {
                        warn!(error = %cleanup, url = %url, "Failed to remove orphaned image");
                    }
                    Err(IdentityError::from(e))
                }
            },
            Err(e) => Err(IdentityError::from(e)),
        };

        match outcome {
            Ok(url) => {
                record.pic_path = Some(url.clone());
                Ok(ImageMetadata {
                    image_name: (!file_name.is_empty()).then_some(file_name),
                    image_type: Some(content_type),
                    image_path_s3: Some(url),
                })
            }
            Err(e) => {
                metrics::counter!("identity.images.failed").increment(1);
                match self.policy.image_failure_policy {
                    ImageFailurePolicy::Continue => {
                        warn!(
                            error = %e,
                            nano_id = %record.nano_id,
                            "Image upload failed; record kept without image"
                        );
                        Ok(ImageMetadata::default())
                    }
                    ImageFailurePolicy::Fail => Err(e),
                }
            }
        }
    }

    /// Look up a record by its short identifier
    #[instrument(skip(self))]
    pub async fn lookup(&self, nano_id: &str) -> Result<IdentityResponse, IdentityError> {
        metrics::counter!("identity.lookups").increment(1);

        let record = match self.repository.find_by_nano_id(nano_id).await? {
            Some(record) => record,
            None => {
                metrics::counter!("identity.lookups.not_found").increment(1);
                return Err(IdentityError::NotFound(nano_id.to_string()));
            }
        };

        let image = ImageMetadata::from_stored_path(record.pic_path.as_deref());
        self.respond(record, image)
    }

    fn respond(
        &self,
        record: IdentityRecord,
        image: ImageMetadata,
    ) -> Result<IdentityResponse, IdentityError> {
        let qr_image = if self.qr.renders_image() {
            let rendered = self
                .qr
                .render_data_url(&record.qr_content)
                .map_err(|e| IdentityError::Internal(format!("QR rendering failed: {e}")))?;
            Some(rendered)
        } else {
            None
        };

        Ok(IdentityResponse {
            id: record.id,
            nano_id: record.nano_id,
            qr_content: record.qr_content,
            qr_image,
            vcard_type: record.vcard_type,
            image,
            data: record.data,
            created_at: format_timestamp(&record.created_at),
        })
    }
}

/// MIME type implied by a path's extension; unknown extensions map to JPEG
pub fn mime_type_for_path(path: &str) -> &'static str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

/// e.g. 2024-01-15T10:30:45.123Z
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IdentifierConfig, QrConfig, UploadConfig};
    use crate::identity_store::memory::InMemoryIdentityStore;
    use crate::identity_store::MockIdentityRepository;
    use crate::s3_uploader::MockObjectStore;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const BUCKET_URL: &str = "https://bucket-01-desarrollo.s3.us-east-1.amazonaws.com";

    fn untouched_store() -> MockObjectStore {
        let mut store = MockObjectStore::new();
        store.expect_put_object().times(0);
        store.expect_delete_object().times(0);
        store
    }

    fn accepting_store() -> MockObjectStore {
        let mut store = MockObjectStore::new();
        store.expect_put_object().returning(|_, _, _| Ok(()));
        store
            .expect_public_url()
            .returning(|key| format!("{BUCKET_URL}/{key}"));
        store
    }

    fn failing_store() -> MockObjectStore {
        let mut store = MockObjectStore::new();
        store
            .expect_put_object()
            .returning(|_, _, _| Err(StorageError::BucketNotFound("bucket-01-desarrollo".into())));
        store
    }

    fn service(
        repository: Arc<dyn IdentityRepository>,
        store: MockObjectStore,
        policy: RegistrationConfig,
    ) -> IdentityService {
        IdentityService::new(
            repository,
            ImageStorage::new(Arc::new(store), UploadConfig::default()),
            IdGenerator::from_config(&IdentifierConfig::default()).unwrap(),
            QrBuilder::new(&QrConfig::default()),
            policy,
        )
    }

    fn fail_policy() -> RegistrationConfig {
        RegistrationConfig {
            image_failure_policy: ImageFailurePolicy::Fail,
            ..Default::default()
        }
    }

    fn ana(image: Option<ImageInput>) -> RegistrationRequest {
        RegistrationRequest {
            vcard_type: "persona".to_string(),
            data: json!({ "name": "Ana" }),
            image,
        }
    }

    fn png_image() -> ImageInput {
        ImageInput::Base64 {
            payload: format!("data:image/png;base64,{}", STANDARD.encode(b"\x89PNG\r\n")),
            file_name: "ana.png".to_string(),
            mime_type: "image/png".to_string(),
        }
    }

    fn stored_record(record: NewIdentity) -> IdentityRecord {
        IdentityRecord {
            id: 7,
            nano_id: record.nano_id,
            qr_content: record.qr_content,
            data: record.data,
            vcard_type: record.vcard_type,
            pic_path: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_register_without_image() {
        let repository = Arc::new(InMemoryIdentityStore::new());
        let service = service(repository.clone(), untouched_store(), Default::default());

        let response = service.register(ana(None)).await.unwrap();

        assert_eq!(response.image, ImageMetadata::default());
        assert_eq!(response.data["name"], "Ana");
        assert_eq!(response.vcard_type.as_deref(), Some("persona"));
        assert_eq!(response.nano_id.len(), 10);
        assert!(response.nano_id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(response.qr_content, format!("http://056.cl/{}", response.nano_id));
        assert_eq!(response.qr_image, None);
        assert_eq!(repository.get(&response.nano_id).unwrap().pic_path, None);
    }

    #[tokio::test]
    async fn test_oversized_base64_rejected_before_any_io() {
        let mut repository = MockIdentityRepository::new();
        repository.expect_insert().times(0);
        repository.expect_update_pic_path().times(0);
        let service = service(Arc::new(repository), untouched_store(), Default::default());

        // 20MB of image data as base64 text
        let payload = format!("data:image/png;base64,{}", "A".repeat(27_962_028));
        let result = service
            .register(ana(Some(ImageInput::Base64 {
                payload,
                file_name: "big.png".to_string(),
                mime_type: "image/png".to_string(),
            })))
            .await;

        assert!(matches!(
            result,
            Err(IdentityError::Validation(ValidationError::FileTooLarge { max: 10_485_760, .. }))
        ));
    }

    #[tokio::test]
    async fn test_register_then_lookup_round_trip() {
        let repository = Arc::new(InMemoryIdentityStore::new());
        let service = service(repository.clone(), accepting_store(), Default::default());

        let registered = service.register(ana(Some(png_image()))).await.unwrap();
        let expected_path = format!(
            "{BUCKET_URL}/vCards056/uploads/images/personas/{id}/{id}.png",
            id = registered.nano_id
        );
        assert_eq!(registered.image.image_path_s3.as_deref(), Some(expected_path.as_str()));
        assert_eq!(registered.image.image_name.as_deref(), Some("ana.png"));
        assert_eq!(registered.image.image_type.as_deref(), Some("image/png"));

        let found = service.lookup(&registered.nano_id).await.unwrap();
        assert_eq!(found.id, registered.id);
        assert_eq!(found.data, registered.data);
        assert_eq!(found.vcard_type, registered.vcard_type);
        assert_eq!(found.qr_content, registered.qr_content);
        assert_eq!(found.created_at, registered.created_at);
        assert_eq!(found.image.image_path_s3, registered.image.image_path_s3);
        assert_eq!(found.image.image_type.as_deref(), Some("image/png"));
        assert_eq!(
            found.image.image_name,
            Some(format!("{}.png", registered.nano_id))
        );
    }

    #[tokio::test]
    async fn test_lookup_is_idempotent() {
        let repository = Arc::new(InMemoryIdentityStore::new());
        let service = service(repository.clone(), accepting_store(), Default::default());
        let registered = service.register(ana(Some(png_image()))).await.unwrap();

        let first = service.lookup(&registered.nano_id).await.unwrap();
        let second = service.lookup(&registered.nano_id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(repository.len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_unknown_identifier() {
        let service = service(
            Arc::new(InMemoryIdentityStore::new()),
            untouched_store(),
            Default::default(),
        );

        match service.lookup("neverIssued").await {
            Err(IdentityError::NotFound(id)) => assert_eq!(id, "neverIssued"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_image_failure_continues_by_default() {
        let repository = Arc::new(InMemoryIdentityStore::new());
        let service = service(repository.clone(), failing_store(), Default::default());

        let response = service.register(ana(Some(png_image()))).await.unwrap();

        assert_eq!(response.image, ImageMetadata::default());
        assert_eq!(repository.get(&response.nano_id).unwrap().pic_path, None);
    }

    #[tokio::test]
    async fn test_image_failure_is_fatal_under_fail_policy() {
        let repository = Arc::new(InMemoryIdentityStore::new());
        let service = service(repository.clone(), failing_store(), fail_policy());

        let result = service.register(ana(Some(png_image()))).await;

        assert!(matches!(
            result,
            Err(IdentityError::Storage(StorageError::BucketNotFound(_)))
        ));
        // The skeleton stays behind without an image
        assert_eq!(repository.len(), 1);
    }

    #[tokio::test]
    async fn test_record_visible_without_image_during_upload() {
        let repository = Arc::new(InMemoryIdentityStore::new());
        let observed: Arc<Mutex<Option<Option<String>>>> = Arc::new(Mutex::new(None));

        let mut store = MockObjectStore::new();
        let probe_repository = repository.clone();
        let probe = observed.clone();
        store.expect_put_object().returning(move |key, _, _| {
            let nano_id = key.rsplit('/').nth(1).unwrap_or_default();
            let record = probe_repository.get(nano_id).expect("skeleton inserted first");
            *probe.lock().unwrap() = Some(record.pic_path);
            Ok(())
        });
        store
            .expect_public_url()
            .returning(|key| format!("{BUCKET_URL}/{key}"));

        let service = service(repository.clone(), store, Default::default());
        let response = service.register(ana(Some(png_image()))).await.unwrap();

        assert_eq!(*observed.lock().unwrap(), Some(None));
        assert_eq!(
            repository.get(&response.nano_id).unwrap().pic_path,
            response.image.image_path_s3
        );
    }

    #[tokio::test]
    async fn test_duplicate_identifier_retried_with_fresh_id() {
        let attempted = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut repository = MockIdentityRepository::new();
        let seen = attempted.clone();
        let counter = calls.clone();
        repository.expect_insert().times(2).returning(move |record| {
            seen.lock().unwrap().push(record.nano_id.clone());
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StoreError::DuplicateIdentifier(record.nano_id))
            } else {
                Ok(stored_record(record))
            }
        });

        let service = service(Arc::new(repository), untouched_store(), Default::default());
        let response = service.register(ana(None)).await.unwrap();

        let attempted = attempted.lock().unwrap();
        assert_eq!(attempted.len(), 2);
        assert_ne!(attempted[0], attempted[1]);
        assert_eq!(response.nano_id, attempted[1]);
    }

    #[tokio::test]
    async fn test_duplicate_identifier_surfaces_after_retry() {
        let mut repository = MockIdentityRepository::new();
        repository
            .expect_insert()
            .times(2)
            .returning(|record| Err(StoreError::DuplicateIdentifier(record.nano_id)));

        let service = service(Arc::new(repository), untouched_store(), Default::default());

        assert!(matches!(
            service.register(ana(None)).await,
            Err(IdentityError::DuplicateIdentifier(_))
        ));
    }

    #[tokio::test]
    async fn test_not_null_violation_maps_to_missing_field() {
        let mut repository = MockIdentityRepository::new();
        repository
            .expect_insert()
            .returning(|_| Err(StoreError::MissingRequiredField("qr_content".into())));

        let service = service(Arc::new(repository), untouched_store(), Default::default());

        assert!(matches!(
            service.register(ana(None)).await,
            Err(IdentityError::MissingRequiredField)
        ));
    }

    #[tokio::test]
    async fn test_failed_patch_removes_orphaned_image() {
        let mut repository = MockIdentityRepository::new();
        repository
            .expect_insert()
            .returning(|record| Ok(stored_record(record)));
        repository
            .expect_update_pic_path()
            .returning(|id, _| Err(StoreError::RecordMissing(id)));

        let mut store = accepting_store();
        store
            .expect_key_from_url()
            .returning(|url| Ok(url.trim_start_matches(BUCKET_URL).trim_start_matches('/').to_string()));
        store.expect_delete_object().times(1).returning(|_| Ok(()));

        let service = service(Arc::new(repository), store, fail_policy());

        assert!(matches!(
            service.register(ana(Some(png_image()))).await,
            Err(IdentityError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_invalid_requests() {
        let mut repository = MockIdentityRepository::new();
        repository.expect_insert().times(0);
        let service = service(Arc::new(repository), untouched_store(), Default::default());

        let mut blank_type = ana(None);
        blank_type.vcard_type = "  ".to_string();
        assert!(matches!(
            service.register(blank_type).await,
            Err(IdentityError::Validation(ValidationError::MissingField("vcardType")))
        ));

        let mut not_object = ana(None);
        not_object.data = json!(["Ana"]);
        assert!(matches!(
            service.register(not_object).await,
            Err(IdentityError::Validation(ValidationError::InvalidField { field: "data", .. }))
        ));

        let nameless = ana(Some(ImageInput::Base64 {
            payload: "data:image/png;base64,aGVsbG8=".to_string(),
            file_name: String::new(),
            mime_type: "image/png".to_string(),
        }));
        assert!(matches!(
            service.register(nameless).await,
            Err(IdentityError::Validation(ValidationError::MissingField("imageName")))
        ));

        let bmp = ana(Some(ImageInput::Binary {
            bytes: vec![0u8; 16],
            file_name: "ana.bmp".to_string(),
            content_type: "image/bmp".to_string(),
        }));
        assert!(matches!(
            service.register(bmp).await,
            Err(IdentityError::Validation(ValidationError::UnsupportedMediaType { .. }))
        ));
    }

    #[tokio::test]
    async fn test_sequential_registrations_get_unique_identifiers() {
        let repository = Arc::new(InMemoryIdentityStore::new());
        let service = service(repository.clone(), untouched_store(), Default::default());

        let mut ids = HashSet::new();
        for _ in 0..500 {
            let response = service.register(ana(None)).await.unwrap();
            assert!(ids.insert(response.nano_id));
        }
        assert_eq!(repository.len(), 500);
    }

    #[tokio::test]
    async fn test_qr_image_rendered_when_enabled() {
        let service = IdentityService::new(
            Arc::new(InMemoryIdentityStore::new()),
            ImageStorage::new(Arc::new(untouched_store()), UploadConfig::default()),
            IdGenerator::from_config(&IdentifierConfig::default()).unwrap(),
            QrBuilder::new(&QrConfig {
                render_image: true,
                ..Default::default()
            }),
            Default::default(),
        );

        let response = service.register(ana(None)).await.unwrap();
        assert!(response
            .qr_image
            .unwrap()
            .starts_with("data:image/svg+xml;base64,"));
    }

    #[test]
    fn test_mime_type_inference_is_total() {
        for (path, expected) in [
            ("a/b.jpg", "image/jpeg"),
            ("a/b.JPEG", "image/jpeg"),
            ("a/b.png", "image/png"),
            ("a/b.gif", "image/gif"),
            ("a/b.webp", "image/webp"),
            ("a/b.bmp", "image/jpeg"),
            ("a/b", "image/jpeg"),
            ("a.png/b", "image/jpeg"),
            ("", "image/jpeg"),
        ] {
            assert_eq!(mime_type_for_path(path), expected, "{path}");
        }
    }

    #[test]
    fn test_image_metadata_from_stored_path() {
        assert_eq!(ImageMetadata::from_stored_path(None), ImageMetadata::default());
        assert_eq!(ImageMetadata::from_stored_path(Some("")), ImageMetadata::default());

        let url = format!("{BUCKET_URL}/folder/abc/abc.webp?v=2");
        let metadata = ImageMetadata::from_stored_path(Some(&url));
        assert_eq!(metadata.image_name.as_deref(), Some("abc.webp"));
        assert_eq!(metadata.image_type.as_deref(), Some("image/webp"));
        assert_eq!(metadata.image_path_s3, Some(url));
    }

    #[test]
    fn test_format_timestamp() {
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap()
            + chrono::Duration::milliseconds(7);
        assert_eq!(format_timestamp(&timestamp), "2024-01-15T10:30:45.007Z");
    }

    #[test]
    fn test_response_serialization_shape() {
        let response = IdentityResponse {
            id: 1,
            nano_id: "aB3dE5gH9k".to_string(),
            qr_content: "http://056.cl/aB3dE5gH9k".to_string(),
            qr_image: None,
            vcard_type: Some("mascota".to_string()),
            image: ImageMetadata::default(),
            data: json!({ "name": "Firulais" }),
            created_at: "2024-01-15T10:30:45.007Z".to_string(),
        };

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["nanoId"], "aB3dE5gH9k");
        assert_eq!(value["qrContent"], "http://056.cl/aB3dE5gH9k");
        assert_eq!(value["vcardType"], "mascota");
        assert_eq!(value["created_at"], "2024-01-15T10:30:45.007Z");
        assert!(value["image"]["imagePathS3"].is_null());
        assert!(value["image"]["imageName"].is_null());
        assert!(value.get("qrImage").is_none());
    }
}
