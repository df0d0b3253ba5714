// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error taxonomy surfaced to S3 clients, and their HTTP/XML mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Every error kind the gateway returns to a client, plus the detail used
/// for server-side logs. The detail is never included in the response body:
/// spec.md §7 requires that invalid signatures never leak which step failed.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    #[error("no such key: {bucket}/{key}")]
    NoSuchKey { bucket: String, key: String },

    #[error("no such upload: {0}")]
    NoSuchUpload(String),

    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),

    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("checksum mismatch: {0}")]
    InvalidChecksum(String),

    #[error("signature does not match")]
    SignatureDoesNotMatch,

    #[error("access denied")]
    AccessDenied,

    #[error("missing authorization header")]
    MissingAuth,

    #[error("invalid authorization header format: {0}")]
    InvalidAuthFormat(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The `Code` element S3 clients match on.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::NoSuchBucket(_) => "NoSuchBucket",
            GatewayError::NoSuchKey { .. } => "NoSuchKey",
            GatewayError::NoSuchUpload(_) => "NoSuchUpload",
            GatewayError::BucketAlreadyExists(_) => "BucketAlreadyExists",
            GatewayError::BucketNotEmpty(_) => "BucketNotEmpty",
            GatewayError::InvalidBucketName(_) => "InvalidBucketName",
            GatewayError::InvalidArgument(_) => "InvalidArgument",
            GatewayError::InvalidChecksum(_) => "InvalidChecksum",
            GatewayError::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            GatewayError::AccessDenied => "AccessDenied",
            GatewayError::MissingAuth => "MissingAuth",
            GatewayError::InvalidAuthFormat(_) => "InvalidAuthFormat",
            GatewayError::Io(_) | GatewayError::Internal(_) => "InternalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoSuchBucket(_)
            | GatewayError::NoSuchKey { .. }
            | GatewayError::NoSuchUpload(_) => StatusCode::NOT_FOUND,
            GatewayError::BucketAlreadyExists(_) | GatewayError::BucketNotEmpty(_) => {
                StatusCode::CONFLICT
            }
            GatewayError::InvalidBucketName(_)
            | GatewayError::InvalidArgument(_)
            | GatewayError::InvalidChecksum(_) => StatusCode::BAD_REQUEST,
            GatewayError::SignatureDoesNotMatch | GatewayError::AccessDenied => {
                StatusCode::FORBIDDEN
            }
            GatewayError::MissingAuth | GatewayError::InvalidAuthFormat(_) => {
                StatusCode::UNAUTHORIZED
            }
            GatewayError::Io(_) | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Resource path (bucket/key) included in the error body, when known.
    fn resource(&self) -> String {
        match self {
            GatewayError::NoSuchBucket(b) => format!("/{b}"),
            GatewayError::NoSuchKey { bucket, key } => format!("/{bucket}/{key}"),
            GatewayError::BucketAlreadyExists(b) | GatewayError::BucketNotEmpty(b) => {
                format!("/{b}")
            }
            _ => String::new(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if matches!(self, GatewayError::Io(_) | GatewayError::Internal(_)) {
            tracing::warn!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let status = self.status();
        let body = crate::http::xml::error_response(self.code(), &self.to_string(), &self.resource());
        (status, [("Content-Type", "application/xml")], body).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
