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

//! Various utility and helper functions shared across the signer, the
//! chunked parser, and the storage engine.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::Engine as _;
use chrono::{DateTime, Datelike, NaiveDateTime, ParseError, Utc};
use lazy_static::lazy_static;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use sha1::{Digest as Sha1Digest, Sha1};
use sha2::{Digest as Sha256Digest, Sha256};

use crate::error::GatewayError;

/// Date and time with UTC timezone.
pub type UtcTime = DateTime<Utc>;

/// Encodes data using base64.
pub fn b64_encode<T: AsRef<[u8]>>(input: T) -> String {
    BASE64.encode(input)
}

/// Gets hex encoded SHA256 hash of given data.
pub fn sha256_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Gets lowercase hex SHA-1 hash of given data — the gateway's ETag.
pub fn sha1_hash_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Gets current UTC time.
pub fn utc_now() -> UtcTime {
    Utc::now()
}

/// Gets signer date value (`YYYYMMDD`) of given time.
pub fn to_signer_date(time: UtcTime) -> String {
    time.format("%Y%m%d").to_string()
}

/// Gets AMZ date value (`YYYYMMDDTHHMMSSZ`) of given time.
pub fn to_amz_date(time: UtcTime) -> String {
    time.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Parses an `X-Amz-Date` or `Date` header value.
pub fn parse_amz_date(s: &str) -> Result<UtcTime, ParseError> {
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(
        NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%SZ")?,
        Utc,
    ))
}

/// Gets HTTP header value (RFC 1123-ish, as S3 emits `Last-Modified`) of a time.
pub fn to_http_header_value(time: UtcTime) -> String {
    format!(
        "{}, {:02} {} {} {} GMT",
        time.weekday(),
        time.day(),
        month_abbrev(time.month()),
        time.year(),
        time.format("%H:%M:%S")
    )
}

fn month_abbrev(month: u32) -> &'static str {
    const NAMES: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    NAMES[(month.saturating_sub(1) as usize).min(11)]
}

/// Gets ISO-8601 UTC formatted value of given time, as persisted in metadata JSON.
pub fn to_iso8601utc(time: UtcTime) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parses ISO-8601 UTC formatted value back to a time.
pub fn from_iso8601utc(s: &str) -> Result<UtcTime, ParseError> {
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(
        match NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.3fZ") {
            Ok(d) => d,
            _ => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ")?,
        },
        Utc,
    ))
}

pub mod iso8601 {
    use super::{from_iso8601utc, to_iso8601utc, UtcTime};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &UtcTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&to_iso8601utc(*date))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<UtcTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        from_iso8601utc(&s).map_err(serde::de::Error::custom)
    }
}

const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encodes a single path segment or query component per RFC 3986's
/// unreserved set, matching the canonical-request encoding rules.
pub fn url_encode(s: &str) -> String {
    utf8_percent_encode(s, UNRESERVED).collect()
}

const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Percent-encodes a full canonical URI (slashes preserved).
pub fn uri_encode_path(s: &str) -> String {
    utf8_percent_encode(s, URI_ENCODE_SET).collect()
}

/// Validates a bucket name per spec.md §3: 3-63 chars,
/// `^[a-z0-9][a-z0-9.-]*[a-z0-9]$`, no `..`/`.-`/`-.`, not IPv4-shaped, and
/// none of the reserved prefixes `xn--`, `sthree-`, `amzn-s3-demo-`.
pub fn check_bucket_name(bucket_name: &str) -> Result<(), GatewayError> {
    lazy_static! {
        static ref IPV4_REGEX: Regex = Regex::new(
            r"^((25[0-5]|2[0-4][0-9]|1[0-9][0-9]|[1-9][0-9]|[0-9])\.){3}(25[0-5]|2[0-4][0-9]|1[0-9][0-9]|[1-9][0-9]|[0-9])$"
        ).unwrap();
        static ref VALID_BUCKET_NAME_REGEX: Regex =
            Regex::new(r"^[a-z0-9][a-z0-9.\-]*[a-z0-9]$").unwrap();
    }

    if bucket_name.len() < 3 || bucket_name.len() > 63 {
        return Err(GatewayError::InvalidBucketName(format!(
            "{bucket_name}: must be between 3 and 63 characters"
        )));
    }
    if !VALID_BUCKET_NAME_REGEX.is_match(bucket_name) {
        return Err(GatewayError::InvalidBucketName(format!(
            "{bucket_name}: must match ^[a-z0-9][a-z0-9.-]*[a-z0-9]$"
        )));
    }
    if bucket_name.contains("..") || bucket_name.contains(".-") || bucket_name.contains("-.") {
        return Err(GatewayError::InvalidBucketName(format!(
            "{bucket_name}: contains invalid successive characters '..', '.-' or '-.'"
        )));
    }
    if IPV4_REGEX.is_match(bucket_name) {
        return Err(GatewayError::InvalidBucketName(format!(
            "{bucket_name}: must not be formatted as an IP address"
        )));
    }
    for prefix in ["xn--", "sthree-", "amzn-s3-demo-"] {
        if bucket_name.starts_with(prefix) {
            return Err(GatewayError::InvalidBucketName(format!(
                "{bucket_name}: must not start with reserved prefix '{prefix}'"
            )));
        }
    }
    Ok(())
}

/// Guesses content type from a key's extension, per the non-exhaustive table
/// in spec.md §4.3.5. Falls back to `application/octet-stream`.
pub fn detect_content_type(key: &str) -> &'static str {
    let lower = key.to_lowercase();
    let ext = lower.rsplit('.').next().unwrap_or("");
    let base = lower.rsplit('/').next().unwrap_or(&lower);

    if base == "dockerfile" || base == ".gitignore" {
        return "text/plain";
    }

    match ext {
        "txt" | "log" => "text/plain",
        "json" => "application/json",
        "xml" => "text/xml",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "yaml" | "yml" => "text/yaml",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "zip" => "application/x-zip-compressed",
        _ => "application/octet-stream",
    }
}

/// Checksum algorithms recognized by `x-amz-checksum-*` / `x-amz-sdk-checksum-algorithm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Crc32,
    Crc32c,
    Crc64Nvme,
    Sha1,
    Sha256,
}

impl ChecksumAlgorithm {
    pub fn header_name(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Crc32 => crate::s3::header_constants::X_AMZ_CHECKSUM_CRC32,
            ChecksumAlgorithm::Crc32c => crate::s3::header_constants::X_AMZ_CHECKSUM_CRC32C,
            ChecksumAlgorithm::Crc64Nvme => crate::s3::header_constants::X_AMZ_CHECKSUM_CRC64NVME,
            ChecksumAlgorithm::Sha1 => crate::s3::header_constants::X_AMZ_CHECKSUM_SHA1,
            ChecksumAlgorithm::Sha256 => crate::s3::header_constants::X_AMZ_CHECKSUM_SHA256,
        }
    }

    pub fn from_header_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "x-amz-checksum-crc32" => Some(ChecksumAlgorithm::Crc32),
            "x-amz-checksum-crc32c" => Some(ChecksumAlgorithm::Crc32c),
            "x-amz-checksum-crc64nvme" => Some(ChecksumAlgorithm::Crc64Nvme),
            "x-amz-checksum-sha1" => Some(ChecksumAlgorithm::Sha1),
            "x-amz-checksum-sha256" => Some(ChecksumAlgorithm::Sha256),
            _ => None,
        }
    }
}

pub mod xml {
    //! Thin read-side wrapper over `xmltree::Element`, indexed by child tag
    //! name so repeated lookups (e.g. iterating `<Part>` entries) don't
    //! re-scan the children list.
    use std::collections::HashMap;

    use crate::error::GatewayError;

    #[derive(Debug, Clone)]
    struct ElementIndex {
        children: HashMap<String, Vec<usize>>,
    }

    impl From<&xmltree::Element> for ElementIndex {
        fn from(value: &xmltree::Element) -> Self {
            let mut children: HashMap<String, Vec<usize>> = HashMap::new();
            for (i, e) in value
                .children
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.as_element().map(|e| (i, e)))
            {
                children.entry(e.name.clone()).or_default().push(i);
            }
            Self { children }
        }
    }

    #[derive(Debug, Clone)]
    pub struct Element<'a> {
        inner: &'a xmltree::Element,
        index: ElementIndex,
    }

    impl<'a> From<&'a xmltree::Element> for Element<'a> {
        fn from(value: &'a xmltree::Element) -> Self {
            Self {
                inner: value,
                index: ElementIndex::from(value),
            }
        }
    }

    impl Element<'_> {
        pub fn name(&self) -> &str {
            self.inner.name.as_str()
        }

        pub fn get_child_text(&self, tag: &str) -> Option<String> {
            let i = *self.index.children.get(tag)?.first()?;
            self.inner.children[i].as_element()?.get_text().map(|v| v.to_string())
        }

        pub fn get_child_text_or_error(&self, tag: &str) -> Result<String, GatewayError> {
            self.get_child_text(tag)
                .ok_or_else(|| GatewayError::InvalidArgument(format!("<{tag}> tag not found")))
        }

        pub fn get_matching_children(&self, tag: &str) -> Vec<Element<'_>> {
            self.index
                .children
                .get(tag)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|i| self.inner.children[i].as_element().unwrap().into())
                .collect()
        }
    }

    pub fn parse(body: &[u8]) -> Result<xmltree::Element, GatewayError> {
        xmltree::Element::parse(body)
            .map_err(|e| GatewayError::InvalidArgument(format!("malformed XML body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_name_rejects_short_and_long() {
        assert!(check_bucket_name("ab").is_err());
        assert!(check_bucket_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn bucket_name_rejects_reserved_prefixes() {
        assert!(check_bucket_name("xn--foo123").is_err());
        assert!(check_bucket_name("sthree-foo123").is_err());
        assert!(check_bucket_name("amzn-s3-demo-foo").is_err());
    }

    #[test]
    fn bucket_name_rejects_ipv4_shape() {
        assert!(check_bucket_name("192.168.1.1").is_err());
    }

    #[test]
    fn bucket_name_rejects_successive_chars() {
        assert!(check_bucket_name("my..bucket").is_err());
        assert!(check_bucket_name("my.-bucket").is_err());
        assert!(check_bucket_name("my-.bucket").is_err());
    }

    #[test]
    fn bucket_name_accepts_valid() {
        assert!(check_bucket_name("my-bucket.01").is_ok());
    }

    #[test]
    fn sha1_hash_matches_known_vector() {
        assert_eq!(
            sha1_hash_hex(b"Hello"),
            "f7ff9e8b7bb2e09b70935a5d785e0cc5d9d0abf0"
        );
    }

    #[test]
    fn content_type_detection_covers_table() {
        assert_eq!(detect_content_type("a.txt"), "text/plain");
        assert_eq!(detect_content_type("a.json"), "application/json");
        assert_eq!(detect_content_type("a.unknownext"), "application/octet-stream");
        assert_eq!(detect_content_type("Dockerfile"), "text/plain");
    }
}
