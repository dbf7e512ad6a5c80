use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

pub const FALLBACK_DETAIL: &str = "An error occurred";

#[derive(Debug, thiserror::Error)]
#[error("{detail}")]
pub struct ServerError {
    pub status_code: u16,
    pub detail: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<Value>,
}

/// Pull the human readable message out of an error body.
///
/// The backend answers with `{"detail": "..."}`; validation errors carry a
/// structured `detail`, which is rendered as JSON.
pub fn error_detail(body: &[u8]) -> String {
    let detail = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|body| body.detail);
    match detail {
        Some(Value::String(detail)) if !detail.is_empty() => detail,
        Some(Value::Null) | Some(Value::String(_)) | None => FALLBACK_DETAIL.to_owned(),
        Some(other) => other.to_string(),
    }
}

/// Consume a non-success response into a [`ServerError`].
pub async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, ServerError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    Err(server_error(status, res).await)
}

pub async fn server_error(status: StatusCode, res: reqwest::Response) -> ServerError {
    let body = res.bytes().await.unwrap_or_default();
    ServerError {
        status_code: status.as_u16(),
        detail: error_detail(&body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_detail_verbatim() {
        assert_eq!(
            error_detail(br#"{"detail":"Invalid credentials"}"#),
            "Invalid credentials"
        );
    }

    #[test]
    fn fallback_when_unparseable() {
        assert_eq!(error_detail(b"<html>502 Bad Gateway</html>"), FALLBACK_DETAIL);
        assert_eq!(error_detail(b""), FALLBACK_DETAIL);
        assert_eq!(error_detail(br#"{"error":"nope"}"#), FALLBACK_DETAIL);
    }

    #[test]
    fn structured_detail_rendered() {
        let detail = error_detail(br#"{"detail":[{"loc":["body","email"],"msg":"field required"}]}"#);
        assert!(detail.contains("field required"));
    }
}
