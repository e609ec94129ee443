use axum::extract::{multipart::Field, Multipart};
use bytes::{Bytes, BytesMut};
use http::StatusCode;
use tracing::{debug, warn};

use super::{UploadStore, ALLOWED_CONTENT_TYPES, ALLOWED_EXTENSIONS};
use crate::errors::ServiceError;

const MAX_TEXT_FIELD_LEN: usize = 256;
const MAX_FILE_NAME_LEN: usize = 255;

/// A validated file held in memory until the workflow decides to persist it.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub original_name: String,
    /// Lower-cased extension without the dot
    pub extension: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// Parsed `multipart/form-data` body of a slip upload.
#[derive(Debug, Default)]
pub struct SlipUploadForm {
    pub payment_id: Option<String>,
    pub reference_number: Option<String>,
    pub amount: Option<String>,
    pub file: Option<StagedFile>,
}

/// Reads the slip upload form. Type checks run on the part headers before any
/// bytes are read and the size limit is enforced chunk by chunk.
pub async fn parse_slip_form(
    mut multipart: Multipart,
    store: &UploadStore,
) -> Result<SlipUploadForm, ServiceError> {
    let mut form = SlipUploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, store))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                if form.file.is_some() {
                    return Err(ServiceError::ValidationError(
                        "Only one file may be uploaded per request".to_string(),
                    ));
                }
                form.file = Some(read_file_field(field, store).await?);
            }
            "paymentId" => form.payment_id = Some(read_text_field(field, &name, store).await?),
            "referenceNumber" => {
                form.reference_number = Some(read_text_field(field, &name, store).await?)
            }
            "amount" => form.amount = Some(read_text_field(field, &name, store).await?),
            other => {
                debug!(field = %other, "ignoring unexpected multipart field");
            }
        }
    }

    Ok(form)
}

async fn read_file_field(
    mut field: Field<'_>,
    store: &UploadStore,
) -> Result<StagedFile, ServiceError> {
    let original_name = field
        .file_name()
        .map(sanitize_file_name)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ServiceError::ValidationError("Please upload a file".to_string()))?;
    let content_type = field
        .content_type()
        .map(|ct| ct.to_ascii_lowercase())
        .unwrap_or_default();
    let extension = check_file_type(&original_name, &content_type)?;

    let limit = store.max_file_size();
    let mut buffer = BytesMut::new();
    while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, store))? {
        if (buffer.len() + chunk.len()) as u64 > limit {
            warn!(file = %original_name, limit, "upload exceeds size limit");
            return Err(ServiceError::ValidationError(store.too_large_message()));
        }
        buffer.extend_from_slice(&chunk);
    }

    if buffer.is_empty() {
        return Err(ServiceError::ValidationError("Please upload a file".to_string()));
    }

    Ok(StagedFile {
        original_name,
        extension,
        content_type,
        bytes: buffer.freeze(),
    })
}

async fn read_text_field(
    field: Field<'_>,
    name: &str,
    store: &UploadStore,
) -> Result<String, ServiceError> {
    let text = field.text().await.map_err(|e| multipart_error(e, store))?;
    if text.len() > MAX_TEXT_FIELD_LEN {
        return Err(ServiceError::ValidationError(format!("{} is too long", name)));
    }
    Ok(text.trim().to_string())
}

/// Both the extension and the declared content type must be on the allow list.
pub fn check_file_type(file_name: &str, content_type: &str) -> Result<String, ServiceError> {
    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    if ALLOWED_EXTENSIONS.contains(&extension.as_str())
        && ALLOWED_CONTENT_TYPES.contains(&content_type)
    {
        Ok(extension)
    } else {
        warn!(file = %file_name, content_type = %content_type, "rejected upload type");
        Err(ServiceError::ValidationError(
            "Only images (jpg, jpeg, png) and PDF files are allowed".to_string(),
        ))
    }
}

/// Keeps only the final path segment of a client-supplied name and drops
/// control characters.
fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    base.chars()
        .filter(|c| !c.is_control())
        .take(MAX_FILE_NAME_LEN)
        .collect::<String>()
        .trim()
        .to_string()
}

fn multipart_error(err: axum::extract::multipart::MultipartError, store: &UploadStore) -> ServiceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::ValidationError(store.too_large_message())
    } else {
        err.into()
    }
}
