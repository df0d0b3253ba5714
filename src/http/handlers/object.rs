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

//! Object-level operations: `/{bucket}/{*key}`, plain and multipart.

use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{AppendHeaders, IntoResponse, Response};
use tokio::io::AsyncReadExt;

use crate::error::{GatewayError, GatewayResult};
use crate::http::auth::{authenticate_and_authorize, extract_user_metadata, parse_query, to_signing_multimap};
use crate::http::body::stream_body_into;
use crate::http::state::AppState;
use crate::http::xml;
use crate::multipart;
use crate::types::Checksums;

fn content_type_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> GatewayResult<Response> {
    let query = parse_query(raw.as_deref());
    let header_map = to_signing_multimap(&headers);
    authenticate_and_authorize(&state, &method, uri.path(), &query, &header_map, &bucket).await?;

    if let Some(upload_id) = query.get("uploadId") {
        let parts = multipart::list_parts(&state.engine, &bucket, &key, upload_id).await?;
        let body = xml::list_parts_response(&bucket, &key, upload_id, &parts);
        return Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/xml")], body).into_response());
    }

    let Some((meta, mut file)) = state.engine.get_object(&bucket, &key).await? else {
        return Err(GatewayError::NoSuchKey { bucket, key });
    };

    let mut bytes = Vec::with_capacity(meta.size as usize);
    file.read_to_end(&mut bytes).await.map_err(GatewayError::Io)?;

    let mut response_headers = vec![
        (header::CONTENT_TYPE, meta.content_type.clone()),
        (header::ETAG, format!("\"{}\"", meta.etag)),
        (header::LAST_MODIFIED, meta.last_modified.to_rfc2822()),
    ];
    for (k, v) in &meta.user_metadata {
        response_headers.push((header::HeaderName::from_bytes(format!("x-amz-meta-{k}").as_bytes()).unwrap(), v.clone()));
    }

    Ok((StatusCode::OK, AppendHeaders(response_headers), bytes).into_response())
}

pub async fn head_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> GatewayResult<Response> {
    let query = parse_query(raw.as_deref());
    let header_map = to_signing_multimap(&headers);
    authenticate_and_authorize(&state, &method, uri.path(), &query, &header_map, &bucket).await?;

    let Some(meta) = state.engine.head_object(&bucket, &key).await? else {
        return Err(GatewayError::NoSuchKey { bucket, key });
    };

    let response_headers = [
        (header::CONTENT_TYPE, meta.content_type.clone()),
        (header::CONTENT_LENGTH, meta.size.to_string()),
        (header::ETAG, format!("\"{}\"", meta.etag)),
        (header::LAST_MODIFIED, meta.last_modified.to_rfc2822()),
    ];
    Ok((StatusCode::OK, response_headers).into_response())
}

pub async fn delete_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> GatewayResult<Response> {
    let query = parse_query(raw.as_deref());
    let header_map = to_signing_multimap(&headers);
    authenticate_and_authorize(&state, &method, uri.path(), &query, &header_map, &bucket).await?;

    if let Some(upload_id) = query.get("uploadId") {
        multipart::abort(&state.engine, &bucket, &key, upload_id).await?;
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    state.engine.delete_object(&bucket, &key).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn put_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
    body: Body,
) -> GatewayResult<Response> {
    let query = parse_query(raw.as_deref());
    let header_map = to_signing_multimap(&headers);
    let verified = authenticate_and_authorize(&state, &method, uri.path(), &query, &header_map, &bucket).await?;

    if let (Some(part_number), Some(upload_id)) = (query.get("partNumber"), query.get("uploadId")) {
        let part_number: u16 = part_number
            .parse()
            .map_err(|_| GatewayError::InvalidArgument("partNumber must be an integer".into()))?;
        let (guard, path, mut temp) =
            multipart::begin_part_write(&state.engine, &bucket, &key, upload_id, part_number).await?;
        let streamed = match stream_body_into(&headers, verified.chunk_validator, body, &mut temp).await {
            Ok(s) => s,
            Err(e) => {
                temp.abort().await;
                return Err(e);
            }
        };
        let part = multipart::commit_part_write(
            &state.engine,
            &bucket,
            &key,
            upload_id,
            part_number,
            guard,
            path,
            temp,
            streamed.etag,
            streamed.total_bytes,
            Checksums::from_map(streamed.checksums),
        )
        .await?;
        return Ok((StatusCode::OK, [(header::ETAG, format!("\"{}\"", part.etag))]).into_response());
    }

    if !state.engine.bucket_exists(&bucket).await {
        return Err(GatewayError::NoSuchBucket(bucket));
    }

    let content_type = content_type_header(&headers);
    let user_metadata = extract_user_metadata(&headers);
    let (guard, data_path, mut temp) = state.engine.begin_write(&bucket, &key).await?;
    let streamed = match stream_body_into(&headers, verified.chunk_validator, body, &mut temp).await {
        Ok(s) => s,
        Err(e) => {
            temp.abort().await;
            return Err(e);
        }
    };
    let outcome = state
        .engine
        .commit_write(
            guard,
            &bucket,
            &key,
            &data_path,
            temp,
            streamed.etag,
            streamed.total_bytes,
            content_type,
            user_metadata,
            Checksums::from_map(streamed.checksums),
        )
        .await?;

    Ok((StatusCode::OK, [(header::ETAG, format!("\"{}\"", outcome.etag))]).into_response())
}

pub async fn object_post(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
    body: Body,
) -> GatewayResult<Response> {
    let query = parse_query(raw.as_deref());
    let header_map = to_signing_multimap(&headers);
    authenticate_and_authorize(&state, &method, uri.path(), &query, &header_map, &bucket).await?;

    if query.contains_key("uploads") {
        let content_type = content_type_header(&headers).unwrap_or_else(|| "application/octet-stream".to_string());
        let user_metadata = extract_user_metadata(&headers);
        let upload = multipart::initiate(&state.engine, &bucket, &key, content_type, user_metadata).await?;
        let body = xml::initiate_multipart_upload_response(&bucket, &key, &upload.upload_id);
        return Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/xml")], body).into_response());
    }

    if let Some(upload_id) = query.get("uploadId") {
        let raw_body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| GatewayError::InvalidArgument(format!("failed to read request body: {e}")))?;
        let requested_parts = xml::parse_complete_multipart_upload_request(&raw_body)?;
        let outcome = multipart::complete(&state.engine, &bucket, &key, upload_id, &requested_parts).await?;
        let body = xml::complete_multipart_upload_response(&bucket, &key, &outcome.etag);
        return Ok((StatusCode::OK, [(header::CONTENT_TYPE, "application/xml")], body).into_response());
    }

    Err(GatewayError::InvalidArgument(
        "unsupported POST operation on object".into(),
    ))
}
