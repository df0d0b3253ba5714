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

//! Bucket-level operations: `/`, and `/{bucket}` (list, create, delete, head).

use axum::extract::{Path, RawQuery, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use crate::error::GatewayResult;
use crate::http::auth::{authenticate_and_authorize, parse_query, to_signing_multimap};
use crate::http::state::AppState;
use crate::http::xml;
use crate::multipart;
use crate::storage::listing::ListingInput;
use crate::types::BucketKind;

pub async fn list_all_buckets(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: axum::http::HeaderMap,
) -> GatewayResult<Response> {
    let query = parse_query(None);
    let header_map = to_signing_multimap(&headers);
    authenticate_and_authorize(&state, &method, uri.path(), &query, &header_map, "").await?;

    let buckets = state.engine.list_buckets().await?;
    let body = xml::list_all_my_buckets_response(&buckets);
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/xml")], body).into_response())
}

pub async fn bucket_get(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    method: Method,
    uri: Uri,
    RawQuery(raw): RawQuery,
    headers: axum::http::HeaderMap,
) -> GatewayResult<Response> {
    let query = parse_query(raw.as_deref());
    let header_map = to_signing_multimap(&headers);
    authenticate_and_authorize(&state, &method, uri.path(), &query, &header_map, &bucket).await?;

    if !state.engine.bucket_exists(&bucket).await {
        return Err(crate::error::GatewayError::NoSuchBucket(bucket));
    }

    if query.contains_key("location") {
        let body = xml::location_response(&state.region);
        return Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/xml")], body).into_response());
    }

    if query.contains_key("uploads") {
        let uploads = multipart::list_uploads(&state.engine, &bucket).await?;
        let body = xml::list_multipart_uploads_response(&bucket, &uploads);
        return Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/xml")], body).into_response());
    }

    if let Some(encoding) = query.get("encoding-type") {
        if encoding != "url" {
            return Err(crate::error::GatewayError::InvalidArgument(format!(
                "unsupported encoding-type: {encoding}"
            )));
        }
    }

    let prefix = query.get("prefix").cloned().unwrap_or_default();
    let delimiter = query.get("delimiter").cloned();
    let max_keys: usize = query
        .get("max-keys")
        .and_then(|v| v.parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or(1000);
    let start_after = query
        .get("start-after")
        .or_else(|| query.get("marker"))
        .or_else(|| query.get("continuation-token"))
        .cloned();

    let output = state
        .engine
        .list_bucket(
            &bucket,
            BucketKind::from_bucket_name(&bucket),
            ListingInput {
                prefix: &prefix,
                delimiter: delimiter.as_deref(),
                start_after: start_after.as_deref(),
                max_keys,
            },
        )
        .await?;

    let mut objects = Vec::with_capacity(output.keys.len());
    for key in &output.keys {
        if let Some(meta) = state.engine.head_object(&bucket, key).await? {
            objects.push(meta);
        }
    }

    let body = xml::list_bucket_response(&bucket, &prefix, delimiter.as_deref(), max_keys, &output, &objects);
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/xml")], body).into_response())
}

pub async fn create_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    method: Method,
    uri: Uri,
    RawQuery(raw): RawQuery,
    headers: axum::http::HeaderMap,
) -> GatewayResult<Response> {
    let query = parse_query(raw.as_deref());
    let header_map = to_signing_multimap(&headers);
    authenticate_and_authorize(&state, &method, uri.path(), &query, &header_map, &bucket).await?;

    state.engine.create_bucket(&bucket).await?;
    Ok((StatusCode::OK, [(header::LOCATION, format!("/{bucket}"))]).into_response())
}

pub async fn head_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    method: Method,
    uri: Uri,
    RawQuery(raw): RawQuery,
    headers: axum::http::HeaderMap,
) -> GatewayResult<Response> {
    let query = parse_query(raw.as_deref());
    let header_map = to_signing_multimap(&headers);
    authenticate_and_authorize(&state, &method, uri.path(), &query, &header_map, &bucket).await?;

    if state.engine.bucket_exists(&bucket).await {
        Ok(StatusCode::OK.into_response())
    } else {
        Err(crate::error::GatewayError::NoSuchBucket(bucket))
    }
}

pub async fn delete_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    method: Method,
    uri: Uri,
    RawQuery(raw): RawQuery,
    headers: axum::http::HeaderMap,
) -> GatewayResult<Response> {
    let query = parse_query(raw.as_deref());
    let header_map = to_signing_multimap(&headers);
    authenticate_and_authorize(&state, &method, uri.path(), &query, &header_map, &bucket).await?;

    let force = headers
        .get("x-amz-force-delete")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    state.engine.delete_bucket(&bucket, force).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
