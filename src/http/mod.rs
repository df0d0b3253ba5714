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

//! The axum-based HTTP facade, per spec.md §4.1/§8: route table, the
//! two-stage auth check handlers call into, request-body bridging, and
//! outbound XML rendering.

pub mod auth;
pub mod body;
pub mod handlers;
pub mod state;
pub mod xml;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::s3::creds::CredentialStore;
use crate::storage::StorageEngine;

pub use state::AppState;

/// Builds the full route table, wired with request tracing and a permissive
/// CORS policy (S3 clients commonly run from browser-based tooling).
pub fn build_router(engine: Arc<StorageEngine>, credentials: Arc<CredentialStore>, region: String) -> Router {
    let state = AppState {
        engine,
        credentials,
        region,
    };

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/",
            get(handlers::bucket::list_all_buckets),
        )
        .route(
            "/{bucket}",
            get(handlers::bucket::bucket_get)
                .put(handlers::bucket::create_bucket)
                .delete(handlers::bucket::delete_bucket)
                .head(handlers::bucket::head_bucket),
        )
        .route(
            "/{bucket}/{*key}",
            get(handlers::object::get_object)
                .put(handlers::object::put_object)
                .delete(handlers::object::delete_object)
                .head(handlers::object::head_object)
                .post(handlers::object::object_post),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Grace period main.rs's graceful shutdown allows in-flight requests
/// before forcing the listener closed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
