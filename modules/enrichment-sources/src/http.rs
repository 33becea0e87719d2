//! Shared response handling for vendor calls.

use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use enrichment_common::SourceKind;

use crate::error::{Result, VendorError};

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StatusClass {
    Data,
    NoData,
    Failed,
}

pub(crate) fn classify_status(status: StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Data
    } else if status == StatusCode::NOT_FOUND || status == StatusCode::UNPROCESSABLE_ENTITY {
        StatusClass::NoData
    } else {
        StatusClass::Failed
    }
}

pub(crate) fn status_error(status: StatusCode, message: String) -> VendorError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => VendorError::Unauthorized {
            status: status.as_u16(),
        },
        StatusCode::TOO_MANY_REQUESTS => VendorError::RateLimited,
        _ => VendorError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

/// Send a prepared request and read the body as JSON.
///
/// 404 and 422 mean the vendor has nothing for this query and come back as `Ok(None)`.
pub(crate) async fn send_json(
    vendor: SourceKind,
    request: reqwest::RequestBuilder,
) -> Result<Option<Value>> {
    let resp = request.send().await?;
    let status = resp.status();

    match classify_status(status) {
        StatusClass::Data => {
            let body = resp.text().await?;
            if body.trim().is_empty() {
                return Ok(None);
            }
            Ok(Some(serde_json::from_str(&body)?))
        }
        StatusClass::NoData => {
            debug!(source = %vendor, status = status.as_u16(), "Vendor returned no data");
            Ok(None)
        }
        StatusClass::Failed => {
            let body = resp.text().await.unwrap_or_default();
            Err(status_error(status, body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        assert_eq!(classify_status(StatusCode::OK), StatusClass::Data);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), StatusClass::NoData);
        assert_eq!(classify_status(StatusCode::UNPROCESSABLE_ENTITY), StatusClass::NoData);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), StatusClass::Failed);
    }

    #[test]
    fn failed_statuses_map_to_error_kinds() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, String::new()),
            VendorError::Unauthorized { status: 401 }
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, String::new()),
            VendorError::Unauthorized { status: 403 }
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, String::new()),
            VendorError::RateLimited
        ));

        let server = status_error(StatusCode::SERVICE_UNAVAILABLE, "down".into());
        assert!(server.is_retryable());
        let client = status_error(StatusCode::BAD_REQUEST, "bad".into());
        assert!(!client.is_retryable());
    }
}
