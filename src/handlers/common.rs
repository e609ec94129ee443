use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::convert::Infallible;
use std::path::PathBuf;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::{config::AppConfig, errors::ServiceError, AppState};

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

/// Scheme and host the client used to reach us, for building absolute file URLs.
///
/// A configured `public_base_url` wins; otherwise `X-Forwarded-Proto` and
/// `Host` are used, falling back to the bind address.
#[derive(Debug, Clone)]
pub struct RequestOrigin(pub String);

impl RequestOrigin {
    pub fn base_url(&self) -> &str {
        &self.0
    }

    pub fn from_headers(config: &AppConfig, headers: &HeaderMap) -> Self {
        if let Some(base) = config.public_base_url.as_deref() {
            return Self(base.trim_end_matches('/').to_string());
        }

        let proto = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| *v == "http" || *v == "https")
            .unwrap_or("http");
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .filter(|h| is_plausible_host(h))
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}:{}", config.host, config.port));

        Self(format!("{}://{}", proto, host))
    }
}

fn is_plausible_host(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 255
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'))
}

#[async_trait]
impl FromRequestParts<AppState> for RequestOrigin {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&state.config, &parts.headers))
    }
}

/// How a served file should be presented by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    Attachment,
}

/// `Content-Disposition` with an ASCII fallback name and an RFC 5987 UTF-8 name.
pub fn content_disposition(kind: Disposition, file_name: &str) -> String {
    let kind = match kind {
        Disposition::Inline => "inline",
        Disposition::Attachment => "attachment",
    };
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded: String =
        url::form_urlencoded::byte_serialize(file_name.as_bytes()).collect::<String>();
    format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        kind,
        fallback,
        encoded.replace('+', "%20")
    )
}

/// Streams `path` through `ServeFile`, which infers the content type and
/// handles range and conditional requests. The file handle is dropped if the
/// client goes away mid-stream.
pub async fn serve_file(
    path: PathBuf,
    request: Request,
    disposition: Disposition,
    file_name: &str,
    cache_control: Option<&'static str>,
) -> Result<Response, ServiceError> {
    let response = match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    let mut response = response.map(Body::new);

    if response.status().is_success() {
        let value = HeaderValue::from_str(&content_disposition(disposition, file_name))
            .map_err(|e| ServiceError::InternalError(format!("Invalid file name header: {}", e)))?;
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_DISPOSITION, value);
        if let Some(cache_control) = cache_control {
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache_control));
        }
    } else if response.status() == StatusCode::NOT_FOUND {
        // Removed between the existence check and the open.
        return Err(ServiceError::NotFound("File not found".to_string()));
    }

    Ok(response)
}
