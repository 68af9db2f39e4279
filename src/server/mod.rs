pub mod app;
pub mod archive;
pub mod bridge;
pub mod context;
pub mod download;
pub mod file_api;
pub mod handlers;
pub mod icons;
pub mod listing;
pub mod protocol;
pub mod ws;

pub use app::{build_router, run_server, serve};
pub use context::{AppContext, AppError};
pub use file_api::PathPolicy;
pub use listing::{list_directory, DirectoryEntry, ListingResult};
