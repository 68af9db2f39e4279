//! Router assembly and server entry points

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::server::context::AppContext;
use crate::server::handlers::{archive, files};
use crate::server::ws;

/// Build the HTTP router for `ctx`.
///
/// Without a `static_dir`, `GET /` returns the JSON listing of the root
/// directory. With one, `/` and every other unmatched path is served from it.
pub fn build_router(ctx: AppContext) -> Router {
    let config = ctx.config.clone();

    let mut router = Router::new()
        .route("/api/files", get(files::list_files))
        .route("/file-content", get(files::file_content))
        .route("/save-file", post(files::save_file))
        .route("/create", post(files::create))
        .route("/delete", delete(files::delete))
        .route(
            "/delete-multiple",
            delete(files::delete_multiple).post(files::delete_multiple),
        )
        .route("/rename", post(files::rename))
        .route("/copy", post(files::copy))
        .route("/move", post(files::move_entries))
        .route("/upload-files", post(files::upload_files))
        .route("/download", get(files::download))
        .route("/download-folder", get(archive::download_folder))
        .route("/download-multiple", get(archive::download_multiple))
        .route("/export-zip", post(archive::export_zip))
        .route("/download-zip-file", get(archive::download_zip_file))
        .route("/import-zip", post(archive::import_zip_upload))
        .route("/import-git", post(archive::import_git))
        .route("/terminal", get(ws::terminal_ws));

    router = match &config.server.static_dir {
        Some(dir) => {
            info!("Serving web client from {:?}", dir);
            router.fallback_service(ServeDir::new(dir))
        }
        None => router.route("/", get(files::list_files)),
    };

    router = router
        .layer(DefaultBodyLimit::max(config.server.max_upload_bytes))
        .layer(TraceLayer::new_for_http());
    if config.server.cors {
        router = router.layer(CorsLayer::permissive());
    }

    router.with_state(ctx)
}

/// Serve on an already-bound listener (tests bind `127.0.0.1:0`).
pub async fn serve(listener: TcpListener, ctx: AppContext) -> std::io::Result<()> {
    axum::serve(listener, build_router(ctx)).await
}

/// Bind the configured address and serve until the process exits.
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let ctx = AppContext::new(config)?;

    info!(
        root = %ctx.paths.root_dir().display(),
        sandbox = ctx.config.files.sandbox_root.is_some(),
        "Starting file manager server"
    );

    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    serve(listener, ctx).await?;
    Ok(())
}
