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

//! Bridges an axum request body directly into a storage-engine sink,
//! decoding `aws-chunked` framing and hashing as bytes arrive rather than
//! collecting the whole object into memory first — the HTTP-layer half of
//! spec.md §2's streaming ingest pipeline.

use std::collections::HashMap;
use std::io;

use axum::body::Body;
use axum::http::HeaderMap;
use futures_util::TryStreamExt;
use sha1::Digest as _;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::GatewayError;
use crate::s3::aws_chunked::{self, StreamingHasher};
use crate::s3::header_constants::{
    STREAMING_PAYLOAD, STREAMING_PAYLOAD_TRAILER, STREAMING_UNSIGNED_PAYLOAD_TRAILER, X_AMZ_TRAILER,
};
use crate::s3::signer::ChunkValidator;
use crate::s3::utils::ChecksumAlgorithm;

/// Outcome of streaming one request body into a sink: the decoded byte
/// count, the object's ETag (SHA-1 of the decoded bytes), and any checksum
/// the client declared (and which was verified to match what was computed).
pub struct StreamOutcome {
    pub total_bytes: u64,
    pub etag: String,
    pub checksums: HashMap<ChecksumAlgorithm, String>,
}

fn body_reader(body: Body) -> impl AsyncRead + Unpin {
    let stream = body
        .into_data_stream()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
    tokio_util::io::StreamReader::new(stream)
}

/// A non-trailer single-value checksum header on a plain (non-chunked) PUT —
/// e.g. `x-amz-checksum-sha256: <base64>` sent alongside a regular body.
fn declared_checksum(headers: &HeaderMap) -> Option<(ChecksumAlgorithm, String)> {
    for algorithm in [
        ChecksumAlgorithm::Crc32,
        ChecksumAlgorithm::Crc32c,
        ChecksumAlgorithm::Crc64Nvme,
        ChecksumAlgorithm::Sha1,
        ChecksumAlgorithm::Sha256,
    ] {
        if let Some(value) = headers.get(algorithm.header_name()).and_then(|v| v.to_str().ok()) {
            return Some((algorithm, value.to_string()));
        }
    }
    None
}

/// Streams `body` into `sink`, decoding `aws-chunked` framing when
/// `x-amz-content-sha256` names one of the `STREAMING-*` markers and
/// validating each chunk's signature via `chunk_validator`. Plain bodies are
/// copied straight through while being hashed. In both cases bytes are
/// written to `sink` as they're read — the caller's sink is expected to be a
/// `storage::engine::TempFile`, so a validation failure here leaves nothing
/// but an aborted temp file behind.
pub async fn stream_body_into<W>(
    headers: &HeaderMap,
    chunk_validator: Option<ChunkValidator>,
    body: Body,
    sink: &mut W,
) -> Result<StreamOutcome, GatewayError>
where
    W: AsyncWrite + Unpin,
{
    let content_sha256 = headers
        .get("x-amz-content-sha256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_sha256 == STREAMING_PAYLOAD
        || content_sha256 == STREAMING_PAYLOAD_TRAILER
        || content_sha256 == STREAMING_UNSIGNED_PAYLOAD_TRAILER
    {
        let has_trailer = content_sha256 != STREAMING_PAYLOAD;
        let requested_checksum = headers
            .get(X_AMZ_TRAILER)
            .and_then(|v| v.to_str().ok())
            .and_then(ChecksumAlgorithm::from_header_name);

        let reader = body_reader(body);
        let decoded =
            aws_chunked::decode_chunked_body(reader, sink, chunk_validator, has_trailer, requested_checksum).await?;
        Ok(StreamOutcome {
            total_bytes: decoded.total_bytes_written,
            etag: decoded.etag,
            checksums: decoded.checksums,
        })
    } else {
        let requested = declared_checksum(headers);
        let mut reader = body_reader(body);
        let mut etag_hasher = sha1::Sha1::new();
        let mut checksum_hasher = requested.as_ref().map(|(algorithm, _)| StreamingHasher::new(*algorithm));
        let mut total = 0u64;
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let n = reader.read(&mut buf).await.map_err(GatewayError::Io)?;
            if n == 0 {
                break;
            }
            etag_hasher.update(&buf[..n]);
            if let Some(hasher) = checksum_hasher.as_mut() {
                hasher.update(&buf[..n]);
            }
            sink.write_all(&buf[..n]).await.map_err(GatewayError::Io)?;
            total += n as u64;
        }
        sink.flush().await.map_err(GatewayError::Io)?;

        let mut checksums = HashMap::new();
        if let (Some((algorithm, claimed)), Some(hasher)) = (requested, checksum_hasher) {
            let computed = hasher.finalize();
            if computed != claimed {
                return Err(GatewayError::InvalidChecksum(format!(
                    "{}: computed {computed} but header claimed {claimed}",
                    algorithm.header_name()
                )));
            }
            checksums.insert(algorithm, computed);
        }

        Ok(StreamOutcome {
            total_bytes: total,
            etag: hex::encode(etag_hasher.finalize()),
            checksums,
        })
    }
}
