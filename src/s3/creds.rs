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

//! Credential storage and bucket-permission checks for request authorization.

use std::collections::HashMap;

use crate::config::AuthenticationConfig;

/// An S3 operation category, derived from the HTTP method per spec.md §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Delete,
    List,
}

impl Action {
    pub fn from_method(method: &axum::http::Method) -> Self {
        use axum::http::Method;
        match *method {
            Method::GET | Method::HEAD => Action::Read,
            Method::PUT | Method::POST => Action::Write,
            Method::DELETE => Action::Delete,
            _ => Action::List,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Delete => "delete",
            Action::List => "list",
        }
    }
}

#[derive(Debug, Clone)]
struct BucketPermission {
    bucket_name: String,
    permissions: Vec<String>,
}

#[derive(Debug, Clone)]
struct User {
    secret_key: String,
    permissions: Vec<BucketPermission>,
}

/// Holds the configured users and answers signer/authorizer lookups. Built
/// once from `AuthenticationConfig` at startup.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    enabled: bool,
    users: HashMap<String, User>,
}

impl CredentialStore {
    pub fn from_config(config: &AuthenticationConfig) -> Self {
        let mut users = HashMap::new();
        for u in &config.users {
            users.insert(
                u.access_key_id.clone(),
                User {
                    secret_key: u.secret_access_key.clone(),
                    permissions: u
                        .bucket_permissions
                        .iter()
                        .map(|p| BucketPermission {
                            bucket_name: p.bucket_name.clone(),
                            permissions: p.permissions.clone(),
                        })
                        .collect(),
                },
            );
        }
        Self {
            enabled: config.enabled,
            users,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn secret_key(&self, access_key: &str) -> Option<&str> {
        self.users.get(access_key).map(|u| u.secret_key.as_str())
    }

    /// Bucket-wildcard and permission-wildcard (`*`) honored; permission
    /// names compared case-insensitively, per spec.md §4.1.
    pub fn is_allowed(&self, access_key: &str, bucket: &str, action: Action) -> bool {
        let Some(user) = self.users.get(access_key) else {
            return false;
        };
        user.permissions.iter().any(|bp| {
            (bp.bucket_name == "*" || bp.bucket_name == bucket)
                && bp.permissions.iter().any(|p| {
                    p == "*" || p.eq_ignore_ascii_case(action.as_str())
                })
        })
    }
}
