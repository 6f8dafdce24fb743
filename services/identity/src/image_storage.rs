use crate::config::UploadConfig;
use crate::s3_uploader::{ObjectStore, StorageError};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

/// Rejected image input; raised before any network I/O
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    #[error("No image content provided")]
    EmptyPayload,

    #[error("Image exceeds the maximum allowed size ({max} bytes): {size} bytes")]
    FileTooLarge { size: usize, max: usize },

    #[error("Image type {mime_type} not allowed. Allowed types: {allowed}")]
    UnsupportedMediaType { mime_type: String, allowed: String },

    #[error("Malformed base64 image; expected data:image/<type>;base64,<data>")]
    MalformedDataUrl,

    #[error("Invalid base64 content: {0}")]
    InvalidBase64(String),
}

/// Image bytes that passed validation and are ready to upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
    pub extension: String,
}

/// Failure of a combined validate-and-upload call
#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Image storage client: validation, key layout and upload of identity images
#[derive(Clone)]
pub struct ImageStorage {
    store: Arc<dyn ObjectStore>,
    config: UploadConfig,
}

impl ImageStorage {
    pub fn new(store: Arc<dyn ObjectStore>, config: UploadConfig) -> Self {
        Self { store, config }
    }

    /// Validate raw image bytes
    pub fn prepare_binary(
        &self,
        bytes: Vec<u8>,
        original_file_name: &str,
        content_type: &str,
    ) -> Result<PreparedImage, ValidationError> {
        if bytes.is_empty() {
            return Err(ValidationError::EmptyPayload);
        }

        let content_type = self.check_mime_type(content_type)?;
        self.check_size(bytes.len())?;

        Ok(PreparedImage {
            extension: extension_for(original_file_name, &content_type),
            file_name: original_file_name.to_string(),
            bytes,
            content_type,
        })
    }

    /// Validate and decode a `data:image/<type>;base64,<data>` payload
    ///
    /// The size check uses the length implied by the base64 text so oversized
    /// payloads are rejected without decoding them.
    pub fn prepare_base64(
        &self,
        payload: &str,
        file_name: &str,
        mime_type: &str,
    ) -> Result<PreparedImage, ValidationError> {
        if payload.trim().is_empty() {
            return Err(ValidationError::EmptyPayload);
        }

        let (declared_type, content) = parse_data_url(payload)?;
        let content_type = self.check_mime_type(&declared_type)?;

        if content.is_empty() {
            return Err(ValidationError::EmptyPayload);
        }

        self.check_size(base64_decoded_len(content))?;

        let bytes = STANDARD
            .decode(content)
            .map_err(|e| ValidationError::InvalidBase64(e.to_string()))?;

        if !mime_type.eq_ignore_ascii_case(&content_type) {
            tracing::warn!(
                declared = %mime_type,
                data_url = %content_type,
                "Declared image type differs from data URL; using data URL type"
            );
        }

        Ok(PreparedImage {
            extension: extension_for(file_name, &content_type),
            file_name: file_name.to_string(),
            bytes,
            content_type,
        })
    }

    /// Upload a prepared image and return its public URL
    #[instrument(skip(self, image), fields(size_bytes = image.bytes.len()))]
    pub async fn upload(
        &self,
        image: PreparedImage,
        record_type: &str,
        id: &str,
    ) -> Result<String, StorageError> {
        let key = self.object_key(record_type, id, &image.extension);

        self.store
            .put_object(&key, image.bytes, &image.content_type)
            .await?;

        let url = self.store.public_url(&key);
        info!(key = %key, url = %url, "Image uploaded");
        metrics::counter!("identity.images.uploaded").increment(1);

        Ok(url)
    }

    /// Validate and upload raw image bytes
    pub async fn upload_binary(
        &self,
        bytes: Vec<u8>,
        original_file_name: &str,
        content_type: &str,
        record_type: &str,
        id: &str,
    ) -> Result<String, UploadError> {
        let image = self.prepare_binary(bytes, original_file_name, content_type)?;
        Ok(self.upload(image, record_type, id).await?)
    }

    /// Validate and upload a base64 data URL image
    pub async fn upload_base64(
        &self,
        payload: &str,
        file_name: &str,
        mime_type: &str,
        record_type: &str,
        id: &str,
    ) -> Result<String, UploadError> {
        let image = self.prepare_base64(payload, file_name, mime_type)?;
        Ok(self.upload(image, record_type, id).await?)
    }

    /// Delete the object behind a public URL; empty input is a no-op
    #[instrument(skip(self))]
    pub async fn delete_by_url(&self, url: Option<&str>) -> Result<(), StorageError> {
        let url = match url.map(str::trim) {
            Some(url) if !url.is_empty() => url,
            _ => return Ok(()),
        };

        let key = self.store.key_from_url(url)?;
        self.store.delete_object(&key).await?;

        info!(url = %url, "Image deleted");
        Ok(())
    }

    /// Key prefix for a record type
    pub fn folder_for(&self, record_type: &str) -> &str {
        match record_type.to_lowercase().as_str() {
            "mascota" => &self.config.folder_path_mascotas,
            _ => &self.config.folder_path_personas,
        }
    }

    /// Format: {folder}{id}/{id}.{extension}
    pub fn object_key(&self, record_type: &str, id: &str, extension: &str) -> String {
        let id = sanitize_path_component(id);
        format!(
            "{folder}{id}/{id}.{extension}",
            folder = self.folder_for(record_type),
            id = id,
            extension = extension
        )
    }

    fn check_size(&self, size: usize) -> Result<(), ValidationError> {
        if size > self.config.max_file_size {
            return Err(ValidationError::FileTooLarge {
                size,
                max: self.config.max_file_size,
            });
        }
        Ok(())
    }

    fn check_mime_type(&self, mime_type: &str) -> Result<String, ValidationError> {
        let normalized = mime_type.trim().to_lowercase();
        if self
            .config
            .allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&normalized))
        {
            Ok(normalized)
        } else {
            Err(ValidationError::UnsupportedMediaType {
                mime_type: mime_type.to_string(),
                allowed: self.config.allowed_mime_types.join(", "),
            })
        }
    }
}

/// Split a data URL into its MIME type and base64 content
fn parse_data_url(payload: &str) -> Result<(String, &str), ValidationError> {
    let (header, content) = payload
        .split_once(',')
        .ok_or(ValidationError::MalformedDataUrl)?;

    let header = header.trim();
    let scheme = header.get(..5).ok_or(ValidationError::MalformedDataUrl)?;
    if !scheme.eq_ignore_ascii_case("data:") {
        return Err(ValidationError::MalformedDataUrl);
    }

    let (mime_type, encoding) = header[5..]
        .split_once(';')
        .ok_or(ValidationError::MalformedDataUrl)?;

    let subtype = mime_type
        .get(..6)
        .filter(|prefix| prefix.eq_ignore_ascii_case("image/"))
        .map(|_| &mime_type[6..])
        .ok_or(ValidationError::MalformedDataUrl)?;

    let well_formed_subtype = !subtype.is_empty()
        && subtype
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    if !well_formed_subtype || !encoding.eq_ignore_ascii_case("base64") {
        return Err(ValidationError::MalformedDataUrl);
    }

    Ok((mime_type.to_lowercase(), content.trim()))
}

/// Exact decoded size of a base64 text, trailing `=` padding excluded
fn base64_decoded_len(content: &str) -> usize {
    let padding = content
        .bytes()
        .rev()
        .take(2)
        .take_while(|&b| b == b'=')
        .count();
    (content.len() - padding) * 3 / 4
}

/// Extension from the file name, or from the content type when it has none
fn extension_for(file_name: &str, content_type: &str) -> String {
    let from_name = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.trim().to_lowercase())
        .filter(|ext| !ext.is_empty());

    match from_name {
        Some(ext) => sanitize_path_component(&ext),
        None => match content_type {
            "image/jpeg" => "jpg".to_string(),
            other => other
                .rsplit('/')
                .next()
                .map(sanitize_path_component)
                .unwrap_or_else(|| "bin".to_string()),
        },
    }
}

/// Sanitize a path component to prevent path traversal
fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}
