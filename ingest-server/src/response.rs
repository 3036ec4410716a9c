use actix_web::{error::JsonPayloadError, http::StatusCode, HttpRequest, HttpResponse};

use crate::validate::RejectReason;

pub(crate) fn json_error_with_code(
    status: StatusCode,
    message: impl Into<String>,
    error_code: Option<&str>,
) -> HttpResponse {
    let mut body = serde_json::json!({
        "success": false,
        "error": message.into(),
    });
    if let Some(code) = error_code {
        body["error_code"] = serde_json::Value::String(code.to_string());
    }
    HttpResponse::build(status).json(body)
}

pub(crate) fn rejection(reason: &RejectReason) -> HttpResponse {
    json_error_with_code(
        StatusCode::BAD_REQUEST,
        reason.to_string(),
        Some(reason.code()),
    )
}

/// Body extractor failures surface as 400 `invalid_json` (413 for oversize).
pub(crate) fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = match &err {
        JsonPayloadError::OverflowKnownLength { .. } | JsonPayloadError::Overflow { .. } => {
            json_error_with_code(
                StatusCode::PAYLOAD_TOO_LARGE,
                err.to_string(),
                Some("payload_too_large"),
            )
        }
        _ => json_error_with_code(
            StatusCode::BAD_REQUEST,
            format!("invalid frame json: {err}"),
            Some("invalid_json"),
        ),
    };
    actix_web::error::InternalError::from_response(err, response).into()
}
