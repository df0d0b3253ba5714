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

//! One-shot checksum helpers for metadata repair (§4.3.5). The streaming
//! chunked path in `s3::aws_chunked` computes the same algorithms
//! incrementally; these operate on a whole buffer already in memory.

use crc_fast::{CrcAlgorithm, Digest};

use crate::s3::utils::{b64_encode, sha1_hash_hex, sha256_hash};

pub fn crc32(data: &[u8]) -> String {
    let mut d = Digest::new(CrcAlgorithm::Crc32IsoHdlc);
    d.update(data);
    b64_encode((d.finalize() as u32).to_be_bytes())
}

pub fn crc32c(data: &[u8]) -> String {
    let mut d = Digest::new(CrcAlgorithm::Crc32Iscsi);
    d.update(data);
    b64_encode((d.finalize() as u32).to_be_bytes())
}

pub fn crc64nvme(data: &[u8]) -> String {
    let mut d = Digest::new(CrcAlgorithm::Crc64Nvme);
    d.update(data);
    b64_encode(d.finalize().to_be_bytes())
}

pub fn sha1(data: &[u8]) -> String {
    b64_encode(hex::decode(sha1_hash_hex(data)).expect("sha1_hash_hex always returns valid hex"))
}

pub fn sha256(data: &[u8]) -> String {
    b64_encode(hex::decode(sha256_hash(data)).expect("sha256_hash always returns valid hex"))
}
