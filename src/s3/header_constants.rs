// MinIO Rust Library for Amazon S3 Compatible Cloud Storage
// Copyright 2025 MinIO, Inc.
//
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

pub const CONTENT_MD5: &str = "Content-MD5";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const AUTHORIZATION: &str = "Authorization";
pub const HOST: &str = "Host";

pub const X_AMZ_DATE: &str = "X-Amz-Date";
pub const X_AMZ_ALGORITHM: &str = "X-Amz-Algorithm";
pub const X_AMZ_CREDENTIAL: &str = "X-Amz-Credential";
pub const X_AMZ_SIGNATURE: &str = "X-Amz-Signature";
pub const X_AMZ_SIGNED_HEADERS: &str = "X-Amz-SignedHeaders";
pub const X_AMZ_CONTENT_SHA256: &str = "X-Amz-Content-SHA256";
pub const X_AMZ_DECODED_CONTENT_LENGTH: &str = "X-Amz-Decoded-Content-Length";
pub const X_AMZ_SECURITY_TOKEN: &str = "X-Amz-Security-Token";
pub const X_AMZ_REQUEST_ID: &str = "X-Amz-Request-Id";

pub const X_AMZ_META_PREFIX: &str = "x-amz-meta-";
pub const X_AMZ_CHECKSUM_PREFIX: &str = "x-amz-checksum-";
pub const X_AMZ_CHECKSUM_CRC32: &str = "x-amz-checksum-crc32";
pub const X_AMZ_CHECKSUM_CRC32C: &str = "x-amz-checksum-crc32c";
pub const X_AMZ_CHECKSUM_CRC64NVME: &str = "x-amz-checksum-crc64nvme";
pub const X_AMZ_CHECKSUM_SHA1: &str = "x-amz-checksum-sha1";
pub const X_AMZ_CHECKSUM_SHA256: &str = "x-amz-checksum-sha256";

/// Marker values of `x-amz-content-sha256` for a chunked streaming upload.
pub const STREAMING_PAYLOAD: &str = "STREAMING-AWS4-HMAC-SHA256-PAYLOAD";
pub const STREAMING_PAYLOAD_TRAILER: &str = "STREAMING-AWS4-HMAC-SHA256-PAYLOAD-TRAILER";
pub const STREAMING_UNSIGNED_PAYLOAD_TRAILER: &str = "STREAMING-UNSIGNED-PAYLOAD-TRAILER";

pub const X_AMZ_TRAILER: &str = "X-Amz-Trailer";
