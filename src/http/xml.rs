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

//! Outbound XML response bodies, and the `CompleteMultipartUpload` request
//! parser. Parsing reuses `s3::utils::xml`'s `xmltree`-backed helpers;
//! building the handful of shallow, fixed-shape response documents is
//! simpler as escaped string templates than as an `xmltree::Element` tree,
//! since nothing here needs the parser's indexed lookups.

use crate::s3::utils::to_iso8601utc;
use crate::storage::listing::ListingOutput;
use crate::types::{Bucket, MultipartUpload, ObjectMetadata, PartMetadata};
use crate::error::GatewayError;

const XML_NS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Body for `GatewayError::IntoResponse`. `resource` and `message` are
/// client-supplied path/detail text and are escaped; `code` is always one
/// of the fixed strings `GatewayError::code()` returns.
pub fn error_response(code: &str, message: &str, resource: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <Error><Code>{}</Code><Message>{}</Message><Resource>{}</Resource><RequestId>{}</RequestId></Error>",
        escape(code),
        escape(message),
        escape(resource),
        uuid::Uuid::new_v4().simple()
    )
}

pub fn list_all_my_buckets_response(buckets: &[Bucket]) -> String {
    let mut body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <ListAllMyBucketsResult xmlns=\"{XML_NS}\">\n  \
         <Owner><ID>lamina</ID><DisplayName>lamina</DisplayName></Owner>\n  <Buckets>"
    );
    for b in buckets {
        body.push_str(&format!(
            "\n    <Bucket><Name>{}</Name><CreationDate>{}</CreationDate></Bucket>",
            escape(&b.name),
            to_iso8601utc(b.created)
        ));
    }
    body.push_str("\n  </Buckets>\n</ListAllMyBucketsResult>");
    body
}

pub fn location_response(region: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <LocationConstraint xmlns=\"{XML_NS}\">{}</LocationConstraint>",
        escape(region)
    )
}

#[allow(clippy::too_many_arguments)]
pub fn list_bucket_response(
    bucket: &str,
    prefix: &str,
    delimiter: Option<&str>,
    max_keys: usize,
    output: &ListingOutput,
    objects: &[ObjectMetadata],
) -> String {
    let mut body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <ListBucketResult xmlns=\"{XML_NS}\">\n  \
         <Name>{}</Name>\n  <Prefix>{}</Prefix>\n  <MaxKeys>{}</MaxKeys>\n  \
         <KeyCount>{}</KeyCount>\n  <IsTruncated>{}</IsTruncated>",
        escape(bucket),
        escape(prefix),
        max_keys,
        output.keys.len(),
        output.truncated
    );
    if let Some(d) = delimiter {
        body.push_str(&format!("\n  <Delimiter>{}</Delimiter>", escape(d)));
    }
    if let Some(token) = &output.next_continuation_token {
        body.push_str(&format!(
            "\n  <NextContinuationToken>{}</NextContinuationToken>",
            escape(token)
        ));
    }
    for meta in objects {
        body.push_str(&format!(
            "\n  <Contents><Key>{}</Key><LastModified>{}</LastModified><ETag>&quot;{}&quot;</ETag>\
             <Size>{}</Size><StorageClass>STANDARD</StorageClass></Contents>",
            escape(&meta.key),
            to_iso8601utc(meta.last_modified),
            meta.etag,
            meta.size
        ));
    }
    for cp in &output.common_prefixes {
        body.push_str(&format!(
            "\n  <CommonPrefixes><Prefix>{}</Prefix></CommonPrefixes>",
            escape(cp)
        ));
    }
    body.push_str("\n</ListBucketResult>");
    body
}

pub fn initiate_multipart_upload_response(bucket: &str, key: &str, upload_id: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <InitiateMultipartUploadResult xmlns=\"{XML_NS}\">\
         <Bucket>{}</Bucket><Key>{}</Key><UploadId>{}</UploadId>\
         </InitiateMultipartUploadResult>",
        escape(bucket),
        escape(key),
        escape(upload_id)
    )
}

pub fn complete_multipart_upload_response(bucket: &str, key: &str, etag: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <CompleteMultipartUploadResult xmlns=\"{XML_NS}\">\
         <Bucket>{}</Bucket><Key>{}</Key><ETag>&quot;{}&quot;</ETag>\
         </CompleteMultipartUploadResult>",
        escape(bucket),
        escape(key),
        etag
    )
}

pub fn list_parts_response(bucket: &str, key: &str, upload_id: &str, parts: &[(u16, PartMetadata)]) -> String {
    let mut body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <ListPartsResult xmlns=\"{XML_NS}\">\n  \
         <Bucket>{}</Bucket>\n  <Key>{}</Key>\n  <UploadId>{}</UploadId>",
        escape(bucket),
        escape(key),
        escape(upload_id)
    );
    for (number, part) in parts {
        body.push_str(&format!(
            "\n  <Part><PartNumber>{}</PartNumber><ETag>&quot;{}&quot;</ETag>\
             <Size>{}</Size><LastModified>{}</LastModified></Part>",
            number,
            part.etag,
            part.size,
            to_iso8601utc(part.last_modified)
        ));
    }
    body.push_str("\n</ListPartsResult>");
    body
}

pub fn list_multipart_uploads_response(bucket: &str, uploads: &[MultipartUpload]) -> String {
    let mut body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <ListMultipartUploadsResult xmlns=\"{XML_NS}\">\n  <Bucket>{}</Bucket>",
        escape(bucket)
    );
    for upload in uploads {
        body.push_str(&format!(
            "\n  <Upload><Key>{}</Key><UploadId>{}</UploadId><Initiated>{}</Initiated></Upload>",
            escape(&upload.key),
            escape(&upload.upload_id),
            to_iso8601utc(upload.initiated)
        ));
    }
    body.push_str("\n</ListMultipartUploadsResult>");
    body
}

/// Parses a `CompleteMultipartUpload` request body into ordered
/// `(partNumber, eTag)` pairs, in document order (the order
/// `multipart::upload::complete` requires to be strictly increasing).
pub fn parse_complete_multipart_upload_request(body: &[u8]) -> Result<Vec<(u16, String)>, GatewayError> {
    let root = crate::s3::utils::xml::parse(body)?;
    let root_view: crate::s3::utils::xml::Element = (&root).into();

    let mut parts = Vec::new();
    for part_el in root_view.get_matching_children("Part") {
        let part_number: u16 = part_el
            .get_child_text_or_error("PartNumber")?
            .trim()
            .parse()
            .map_err(|_| GatewayError::InvalidArgument("PartNumber must be an integer".into()))?;
        let etag = part_el
            .get_child_text_or_error("ETag")?
            .trim()
            .trim_matches('"')
            .to_string();
        parts.push((part_number, etag));
    }
    Ok(parts)
}
