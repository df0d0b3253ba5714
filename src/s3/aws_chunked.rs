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

//! Decoder for the `aws-chunked` request body encoding
//! (`STREAMING-AWS4-HMAC-SHA256-PAYLOAD[-TRAILER]` and
//! `STREAMING-UNSIGNED-PAYLOAD-TRAILER`).
//!
//! Wire format, one chunk per iteration:
//! ```text
//! <hex-chunk-size>[;chunk-signature=<sig>]\r\n
//! <chunk-data>\r\n
//! ...
//! 0[;chunk-signature=<final-sig>]\r\n
//! [x-amz-checksum-<algorithm>:<base64-value>\r\n]
//! [x-amz-trailer-signature:<trailer-sig>\r\n]
//! \r\n
//! ```
//!
//! The trailer section (present only for `-TRAILER` variants) is hashed for
//! signing with LF line endings even though the wire bytes use CRLF — see
//! `trailer_signing_string`.

use std::collections::HashMap;

#[cfg(feature = "ring")]
use ring::digest::{Context, SHA256};
use sha1::{Digest as Sha1Digest, Sha1};
#[cfg(not(feature = "ring"))]
use sha2::{Digest as Sha256Digest, Sha256};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::GatewayError;
use crate::s3::signer::ChunkValidator;
use crate::s3::utils::{b64_encode, sha256_hash, ChecksumAlgorithm};

pub(crate) enum StreamingHasher {
    Crc32(crc_fast::Digest),
    Crc32c(crc_fast::Digest),
    Crc64Nvme(crc_fast::Digest),
    Sha1(Sha1),
    #[cfg(feature = "ring")]
    Sha256(Context),
    #[cfg(not(feature = "ring"))]
    Sha256(Sha256),
}

impl StreamingHasher {
    pub(crate) fn new(algorithm: ChecksumAlgorithm) -> Self {
        use crc_fast::CrcAlgorithm;
        match algorithm {
            ChecksumAlgorithm::Crc32 => StreamingHasher::Crc32(crc_fast::Digest::new(CrcAlgorithm::Crc32IsoHdlc)),
            ChecksumAlgorithm::Crc32c => StreamingHasher::Crc32c(crc_fast::Digest::new(CrcAlgorithm::Crc32Iscsi)),
            ChecksumAlgorithm::Crc64Nvme => {
                StreamingHasher::Crc64Nvme(crc_fast::Digest::new(CrcAlgorithm::Crc64Nvme))
            }
            ChecksumAlgorithm::Sha1 => StreamingHasher::Sha1(Sha1::new()),
            #[cfg(feature = "ring")]
            ChecksumAlgorithm::Sha256 => StreamingHasher::Sha256(Context::new(&SHA256)),
            #[cfg(not(feature = "ring"))]
            ChecksumAlgorithm::Sha256 => StreamingHasher::Sha256(Sha256::new()),
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            StreamingHasher::Crc32(d) | StreamingHasher::Crc32c(d) | StreamingHasher::Crc64Nvme(d) => {
                d.update(data)
            }
            StreamingHasher::Sha1(h) => h.update(data),
            #[cfg(feature = "ring")]
            StreamingHasher::Sha256(ctx) => ctx.update(data),
            #[cfg(not(feature = "ring"))]
            StreamingHasher::Sha256(h) => h.update(data),
        }
    }

    pub(crate) fn finalize(self) -> String {
        match self {
            StreamingHasher::Crc32(d) | StreamingHasher::Crc32c(d) => b64_encode((d.finalize() as u32).to_be_bytes()),
            StreamingHasher::Crc64Nvme(d) => b64_encode(d.finalize().to_be_bytes()),
            StreamingHasher::Sha1(h) => b64_encode(h.finalize()),
            #[cfg(feature = "ring")]
            StreamingHasher::Sha256(ctx) => b64_encode(ctx.finish().as_ref()),
            #[cfg(not(feature = "ring"))]
            StreamingHasher::Sha256(h) => b64_encode(h.finalize()),
        }
    }
}

/// Outcome of successfully decoding a whole chunked body.
pub struct DecodedBody {
    pub total_bytes_written: u64,
    pub etag: String,
    pub checksums: HashMap<ChecksumAlgorithm, String>,
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, GatewayError> {
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .await
        .map_err(GatewayError::Io)?;
    if n == 0 {
        return Err(GatewayError::InvalidArgument(
            "unexpected end of chunked body".into(),
        ));
    }
    if !line.ends_with("\r\n") {
        return Err(GatewayError::InvalidArgument(
            "chunked body line not terminated by CRLF".into(),
        ));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

fn parse_chunk_header(line: &str) -> Result<(u64, Option<String>), GatewayError> {
    let mut parts = line.splitn(2, ';');
    let size_hex = parts.next().unwrap_or("");
    let size = u64::from_str_radix(size_hex, 16)
        .map_err(|_| GatewayError::InvalidArgument(format!("invalid chunk size: {size_hex}")))?;
    let signature = parts.next().and_then(|ext| {
        ext.strip_prefix("chunk-signature=")
            .map(|s| s.to_string())
    });
    Ok((size, signature))
}

/// Reads one `STREAMING-*` request body from `reader`, validating chunk
/// signatures through `validator` (absent for `STREAMING-UNSIGNED-PAYLOAD-TRAILER`)
/// and writing the decoded bytes to `sink`. `has_trailer` selects whether a
/// checksum trailer section follows the terminating zero-size chunk.
///
/// Computes the object's ETag (SHA-1 of the decoded bytes, per this
/// gateway's non-standard ETag scheme) and, if `requested_checksum` is set,
/// the matching rolling checksum — then verifies it against the trailer
/// value when present.
pub async fn decode_chunked_body<R, W>(
    reader: R,
    mut sink: W,
    mut validator: Option<ChunkValidator>,
    has_trailer: bool,
    requested_checksum: Option<ChecksumAlgorithm>,
) -> Result<DecodedBody, GatewayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = tokio::io::BufReader::new(reader);
    let mut etag_hasher = Sha1::new();
    let mut checksum_hasher = requested_checksum.map(StreamingHasher::new);
    let mut total_bytes_written = 0u64;

    loop {
        let header_line = read_line(&mut reader).await?;
        let (size, signature) = parse_chunk_header(&header_line)?;

        let mut buf = vec![0u8; size as usize];
        reader.read_exact(&mut buf).await.map_err(GatewayError::Io)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await.map_err(GatewayError::Io)?;
        if &crlf != b"\r\n" {
            return Err(GatewayError::InvalidArgument(
                "chunk data not terminated by CRLF".into(),
            ));
        }

        if let Some(v) = validator.as_mut() {
            let sig = signature.ok_or_else(|| {
                GatewayError::InvalidArgument("chunk missing chunk-signature extension".into())
            })?;
            v.validate_chunk(&buf, &sig)?;
        }

        etag_hasher.update(&buf);
        if let Some(h) = checksum_hasher.as_mut() {
            h.update(&buf);
        }
        sink.write_all(&buf).await.map_err(GatewayError::Io)?;
        total_bytes_written += size;

        if size == 0 {
            break;
        }
    }

    let mut trailer_values: HashMap<String, String> = HashMap::new();
    if has_trailer {
        loop {
            let line = read_line(&mut reader).await?;
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                GatewayError::InvalidArgument("malformed trailer line".into())
            })?;
            trailer_values.insert(name.to_ascii_lowercase(), value.to_string());
        }
    }

    sink.flush().await.map_err(GatewayError::Io)?;

    let mut checksums = HashMap::new();
    if let (Some(algorithm), Some(hasher)) = (requested_checksum, checksum_hasher) {
        let computed = hasher.finalize();
        if let Some(claimed) = trailer_values.get(algorithm.header_name()) {
            if claimed != &computed {
                return Err(GatewayError::InvalidChecksum(format!(
                    "{}: computed {computed} but trailer claimed {claimed}",
                    algorithm.header_name()
                )));
            }
        }
        checksums.insert(algorithm, computed);
    }

    Ok(DecodedBody {
        total_bytes_written,
        etag: hex::encode(etag_hasher.finalize()),
        checksums,
    })
}

/// Canonical (LF-terminated) form of one trailer line, as hashed for the
/// trailer signature — distinct from the CRLF-terminated wire bytes.
pub fn trailer_signing_string(header_name: &str, value: &str) -> String {
    format!("{}:{}\n", header_name.to_ascii_lowercase(), value)
}

pub fn trailer_signing_hash(header_name: &str, value: &str) -> String {
    sha256_hash(trailer_signing_string(header_name, value).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn decodes_unsigned_single_chunk_no_trailer() {
        let body = b"d\r\nHello, World!\r\n0\r\n\r\n".to_vec();
        let mut sink = Vec::new();
        let result = decode_chunked_body(Cursor::new(body), &mut sink, None, false, None)
            .await
            .unwrap();
        assert_eq!(sink, b"Hello, World!");
        assert_eq!(result.total_bytes_written, 13);
    }

    #[tokio::test]
    async fn decodes_multiple_chunks() {
        let body = b"7\r\nHello, \r\n6\r\nWorld!\r\n0\r\n\r\n".to_vec();
        let mut sink = Vec::new();
        let result = decode_chunked_body(Cursor::new(body), &mut sink, None, false, None)
            .await
            .unwrap();
        assert_eq!(sink, b"Hello, World!");
        assert_eq!(result.total_bytes_written, 13);
    }

    #[tokio::test]
    async fn rejects_truncated_body() {
        let body = b"d\r\nHello".to_vec();
        let mut sink = Vec::new();
        let result = decode_chunked_body(Cursor::new(body), &mut sink, None, false, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reads_checksum_trailer_and_verifies_match() {
        let mut sink = Vec::new();
        {
            let mut h = StreamingHasher::new(ChecksumAlgorithm::Sha256);
            h.update(b"abc");
            let checksum = h.finalize();
            let body = format!("3\r\nabc\r\n0\r\nx-amz-checksum-sha256:{checksum}\r\n\r\n");
            let result = decode_chunked_body(
                Cursor::new(body.into_bytes()),
                &mut sink,
                None,
                true,
                Some(ChecksumAlgorithm::Sha256),
            )
            .await
            .unwrap();
            assert_eq!(result.checksums.get(&ChecksumAlgorithm::Sha256), Some(&checksum));
        }
    }

    #[tokio::test]
    async fn trailer_checksum_mismatch_is_rejected() {
        let body = b"3\r\nabc\r\n0\r\nx-amz-checksum-sha256:not-the-real-value\r\n\r\n".to_vec();
        let mut sink = Vec::new();
        let result = decode_chunked_body(
            Cursor::new(body),
            &mut sink,
            None,
            true,
            Some(ChecksumAlgorithm::Sha256),
        )
        .await;
        assert!(result.is_err());
    }
}
