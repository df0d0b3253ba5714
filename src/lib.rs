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

//! `lamina` — an S3-compatible object storage gateway over local and
//! network filesystems.
//!
//! The crate is organized around four layers: `s3` (signature verification
//! and the chunked-transfer wire format), `storage` (the atomic-write
//! filesystem engine, locking, listing, and the metadata cache), `multipart`
//! (the part registry and assembly), and `http` (the axum-based request
//! surface tying everything together). `cleaners` runs the background
//! sweeps described in spec.md §4.5.

pub mod cleaners;
pub mod config;
pub mod error;
pub mod http;
pub mod multipart;
pub mod s3;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{GatewayError, GatewayResult};
pub use storage::StorageEngine;
