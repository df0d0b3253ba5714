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

//! The filesystem storage engine, per spec.md §4.3: atomic writes, the
//! three metadata modes, network-FS retry, per-path locking, listing, and
//! the metadata cache.

pub mod cache;
pub mod checksum;
pub mod engine;
pub mod listing;
pub mod lock;
pub mod metadata;
pub mod retry;

pub use engine::{PutOutcome, StorageEngine};
