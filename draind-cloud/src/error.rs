//! Mapping from transport/status errors to [`CloudError`].

use draind_types::CloudError;

/// Map an HTTP status code to a [`CloudError`].
pub(crate) fn map_http_status(status: reqwest::StatusCode, body: &str) -> CloudError {
    match status.as_u16() {
        401 | 403 => CloudError::Unauthorized(body.to_string()),
        404 => CloudError::NotFound(body.to_string()),
        408 | 425 | 429 | 500..=599 => CloudError::Transient(format!("HTTP {status}: {body}")),
        _ => CloudError::InvalidResponse(format!("HTTP {status}: {body}")),
    }
}

/// Map a [`reqwest::Error`] to a [`CloudError`].
#[must_use]
pub fn map_reqwest_error(err: reqwest::Error) -> CloudError {
    if err.is_timeout() || err.is_connect() {
        CloudError::Transient(err.to_string())
    } else {
        CloudError::Other(Box::new(err))
    }
}

pub(crate) async fn map_response(resp: reqwest::Response) -> Result<reqwest::Response, CloudError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(map_http_status(status, &body))
}
