//! Shared helpers: run the server in-process on an ephemeral port

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;

use filedeck_core::config::ServerConfig;
use filedeck_core::server::archive::ArchiveFetcher;
use filedeck_core::server::{serve, AppContext, AppError};

pub struct TestServer {
    pub base: String,
    pub addr: std::net::SocketAddr,
    pub exports: TempDir,
}

/// Fetcher that never finds an archive
pub struct NoArchives;

#[async_trait]
impl ArchiveFetcher for NoArchives {
    async fn fetch(&self, _url: &str, _dest: &Path) -> Result<bool, AppError> {
        Ok(false)
    }
}

pub async fn spawn_server(root: &Path) -> TestServer {
    spawn_with(root, |_| {}).await
}

pub async fn spawn_with(root: &Path, configure: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let exports = TempDir::new().unwrap();
    let mut config = ServerConfig::default();
    config.files.root_dir = Some(root.to_path_buf());
    config.archive.exports_dir = Some(exports.path().to_path_buf());
    config.terminal.command_timeout_secs = 30;
    configure(&mut config);

    let ctx = AppContext::with_fetcher(config, Arc::new(NoArchives));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = serve(listener, ctx).await;
    });

    TestServer {
        base: format!("http://{}", addr),
        addr,
        exports,
    }
}
