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

//! Entry point: loads configuration, builds the storage engine and
//! credential store, starts the background cleaners, and serves the HTTP
//! facade until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use lamina::s3::creds::CredentialStore;
use lamina::{Config, StorageEngine};

fn config_path() -> Option<PathBuf> {
    std::env::args().nth(1).map(PathBuf::from)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lamina=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::load(config_path().as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    tokio::fs::create_dir_all(&config.filesystem_storage.data_directory)
        .await
        .expect("failed to create data directory");
    tokio::fs::create_dir_all(&config.filesystem_storage.metadata_directory)
        .await
        .expect("failed to create metadata directory");

    let port = config.port;
    let region = config.region.clone();
    let credentials = Arc::new(CredentialStore::from_config(&config.authentication));
    let engine = Arc::new(StorageEngine::new(config));

    let cleaner_handles = lamina::cleaners::spawn_all(engine.clone());

    let app = lamina::http::build_router(engine, credentials, region);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {addr}: {e}"));
    tracing::info!(%addr, "lamina listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    for handle in cleaner_handles {
        handle.abort();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
